use serde_json::Value;
use tracing::{debug, warn};

use super::SteamFeeds;
use crate::http::Transport;
use crate::model::{PopularityEntry, RunKey};
use crate::normalization::coerce::{non_blank, safe_count};

impl<T: Transport> SteamFeeds<T> {
    /// SteamSpy aggregates for one app. Never fails: problems become an all-null row.
    pub async fn fetch_popularity(&self, run: RunKey, appid: i64) -> PopularityEntry {
        let query = [("request", "appdetails".to_string()), ("appid", appid.to_string())];
        match self.client.fetch_json(&self.steamspy_url(), &query).await {
            Ok(body) => {
                debug!(appid, "fetched popularity stats");
                parse_popularity(appid, run, &body)
            }
            Err(err) => {
                warn!(appid, error = %err, "popularity fetch failed");
                PopularityEntry::empty(appid, run)
            }
        }
    }
}

pub fn parse_popularity(appid: i64, run: RunKey, body: &Value) -> PopularityEntry {
    let count = |field: &str| body.get(field).and_then(safe_count);
    PopularityEntry {
        owners: non_blank(body.get("owners").and_then(Value::as_str)).map(str::to_string),
        ccu: count("ccu"),
        positive: count("positive"),
        negative: count("negative"),
        average_forever: count("average_forever"),
        average_2weeks: count("average_2weeks"),
        median_forever: count("median_forever"),
        median_2weeks: count("median_2weeks"),
        price_cents: count("price"),
        score_rank: count("score_rank"),
        discount_percent: count("discount"),
        tags: body.get("tags").and_then(parse_tags),
        ..PopularityEntry::empty(appid, run)
    }
}

/// Tags arrive either as `{"tag": votes}` or as a list of strings / `{"tag": ..}` objects.
fn parse_tags(raw: &Value) -> Option<String> {
    let tags: Vec<String> = match raw {
        Value::Object(map) => {
            let mut voted: Vec<(&String, i64)> = map
                .iter()
                .map(|(tag, votes)| (tag, safe_count(votes).unwrap_or(0)))
                .collect();
            voted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
            voted.into_iter().map(|(tag, _)| tag.clone()).collect()
        }
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.as_str()),
                Value::Object(o) => o.get("tag").and_then(Value::as_str),
                _ => None,
            })
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    (!tags.is_empty()).then(|| tags.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run() -> RunKey {
        RunKey::parse("2025-02-01", 6).unwrap()
    }

    #[test]
    fn parses_steamspy_appdetails() {
        let body = json!({
            "appid": 570,
            "name": "Dota 2",
            "owners": "100,000,000 .. 200,000,000",
            "ccu": 45000,
            "positive": 900000,
            "negative": 50000,
            "average_forever": 40000,
            "average_2weeks": 1500,
            "median_forever": 900,
            "median_2weeks": 800,
            "price": "0",
            "initialprice": "0",
            "discount": "0",
            "score_rank": "",
            "tags": {"Free to Play": 59000, "MOBA": 20000, "Strategy": 21000}
        });
        let row = parse_popularity(570, run(), &body);
        assert_eq!(row.owners.as_deref(), Some("100,000,000 .. 200,000,000"));
        assert_eq!(row.ccu, Some(45_000));
        assert_eq!(row.price_cents, Some(0));
        assert_eq!(row.discount_percent, Some(0));
        assert_eq!(row.score_rank, None);
        assert_eq!(row.tags.as_deref(), Some("Free to Play,Strategy,MOBA"));
        assert!(run().matches(row.run_date, row.run_hour));
    }

    #[test]
    fn tag_lists_are_supported() {
        assert_eq!(
            parse_tags(&json!(["RPG", {"tag": "Indie"}, 3])).as_deref(),
            Some("RPG,Indie")
        );
        assert_eq!(parse_tags(&json!([])), None);
    }

    #[test]
    fn garbage_fields_become_null_but_row_stays() {
        let body = json!({"ccu": "lots", "positive": -3, "price": "19.99"});
        let row = parse_popularity(1, run(), &body);
        assert_eq!(row.appid, 1);
        assert_eq!(row.ccu, None);
        assert_eq!(row.positive, None);
        assert_eq!(row.price_cents, None);
        assert!(row.is_empty());
    }
}
