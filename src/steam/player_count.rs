use serde_json::Value;
use tracing::{debug, warn};

use super::SteamFeeds;
use crate::http::Transport;
use crate::model::{PlayerCountEntry, RunKey};
use crate::normalization::coerce::safe_count;

impl<T: Transport> SteamFeeds<T> {
    /// Live player count. Never fails: problems become a null count.
    pub async fn fetch_player_count(&self, run: RunKey, appid: i64) -> PlayerCountEntry {
        let current_players = match self
            .client
            .fetch_json(&self.player_count_url(), &[("appid", appid.to_string())])
            .await
        {
            Ok(body) => parse_player_count(&body),
            Err(err) => {
                warn!(appid, error = %err, "player count fetch failed");
                None
            }
        };
        debug!(appid, ?current_players, "player count");
        PlayerCountEntry {
            appid,
            run_date: run.run_date(),
            run_hour: run.run_hour(),
            current_players,
        }
    }
}

/// `{"response": {"player_count": N, "result": 1}}`; any other result code is null.
pub fn parse_player_count(body: &Value) -> Option<i64> {
    let response = body.get("response")?;
    if response.get("result").and_then(Value::as_i64) != Some(1) {
        return None;
    }
    response.get("player_count").and_then(safe_count)
}
