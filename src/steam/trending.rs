use serde_json::Value;
use tracing::{info, instrument, warn};

use super::SteamFeeds;
use crate::http::{FetchError, Transport};
use crate::model::{RunKey, TrendingEntry};
use crate::normalization::coerce::{non_blank, safe_count};

impl<T: Transport> SteamFeeds<T> {
    /// Top games by median playtime over the last two weeks. Defines the run's universe.
    #[instrument(skip_all, fields(run = %run))]
    pub async fn fetch_trending(&self, run: RunKey) -> Result<Vec<TrendingEntry>, FetchError> {
        let body = self
            .client
            .fetch_json(&self.steamspy_url(), &[("request", "top100in2weeks".into())])
            .await?;
        let rows = parse_trending(&body, run, self.trending_limit);
        info!(count = rows.len(), "fetched trending games");
        Ok(rows)
    }
}

/// SteamSpy answers with an object keyed by appid. Non-numeric keys are skipped.
pub fn parse_trending(body: &Value, run: RunKey, limit: usize) -> Vec<TrendingEntry> {
    let Some(map) = body.as_object() else {
        warn!("trending payload is not an object");
        return Vec::new();
    };
    let mut rows: Vec<TrendingEntry> = map
        .iter()
        .filter_map(|(key, info)| {
            let appid = key.parse::<i64>().ok().filter(|id| *id > 0)?;
            Some(TrendingEntry {
                appid,
                run_date: run.run_date(),
                run_hour: run.run_hour(),
                name: non_blank(info.get("name").and_then(Value::as_str)).map(str::to_string),
                median_2weeks: info.get("median_2weeks").and_then(safe_count),
            })
        })
        .collect();
    // most-played first so the limit keeps the head of the list
    rows.sort_by(|a, b| {
        b.median_2weeks
            .cmp(&a.median_2weeks)
            .then(a.appid.cmp(&b.appid))
    });
    rows.truncate(limit);
    rows
}
