use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::SteamFeeds;
use crate::http::{FetchError, Transport};
use crate::model::CatalogRecord;
use crate::normalization::coerce::{cents_to_usd, non_blank};

#[derive(Debug, Deserialize)]
struct AppDetailsWrapper {
    #[serde(default)]
    success: bool,
    data: Option<AppData>,
}

#[derive(Debug, Default, Deserialize)]
struct AppData {
    name: Option<String>,
    #[serde(default)]
    developers: Vec<String>,
    release_date: Option<ReleaseDate>,
    #[serde(default)]
    genres: Vec<GenreEntry>,
    price_overview: Option<PriceOverview>,
    #[serde(default)]
    is_free: bool,
    short_description: Option<String>,
    #[serde(default)]
    platforms: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ReleaseDate {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenreEntry {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceOverview {
    #[serde(rename = "final")]
    final_price: Option<i64>,
}

impl<T: Transport> SteamFeeds<T> {
    /// Store details for one app; `Ok(None)` when the store does not know it.
    pub async fn fetch_catalog(&self, appid: i64) -> Result<Option<CatalogRecord>, FetchError> {
        let body = self
            .client
            .fetch_json(&self.store_url(), &[("appids", appid.to_string())])
            .await?;
        let record = parse_catalog(appid, &body);
        if record.is_none() {
            warn!(appid, "store returned no details");
        } else {
            debug!(appid, "fetched store details");
        }
        Ok(record)
    }
}

/// Flatten the store's `{"<appid>": {"success": .., "data": {..}}}` envelope.
pub fn parse_catalog(appid: i64, body: &Value) -> Option<CatalogRecord> {
    let entry = body.get(appid.to_string())?;
    let wrapper: AppDetailsWrapper = match serde_json::from_value(entry.clone()) {
        Ok(w) => w,
        Err(err) => {
            warn!(appid, error = %err, "unexpected store details shape");
            return None;
        }
    };
    if !wrapper.success {
        return None;
    }
    let data = wrapper.data.unwrap_or_default();

    let genres = join_non_blank(data.genres.iter().filter_map(|g| g.description.as_deref()));
    let platforms = join_non_blank(
        data.platforms
            .iter()
            .filter(|(_, supported)| supported.as_bool().unwrap_or(false))
            .map(|(name, _)| name.as_str()),
    );
    let price = match data.price_overview.and_then(|p| p.final_price) {
        Some(cents) => cents_to_usd(Some(cents)),
        None if data.is_free => Some(BigDecimal::new(0.into(), 2)),
        None => None,
    };

    Some(CatalogRecord {
        appid,
        name: owned(data.name.as_deref()),
        developer: owned(data.developers.first().map(String::as_str)),
        release_date: owned(data.release_date.and_then(|r| r.date).as_deref()),
        genres,
        price,
        description: owned(data.short_description.as_deref()),
        platforms,
    })
}

fn owned(value: Option<&str>) -> Option<String> {
    non_blank(value).map(str::to_string)
}

fn join_non_blank<'a>(parts: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined = parts
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    (!joined.is_empty()).then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn flattens_store_details() {
        let body = json!({
            "620": {
                "success": true,
                "data": {
                    "name": "Portal 2",
                    "developers": ["Valve", "Someone Else"],
                    "release_date": {"coming_soon": false, "date": "18 Apr, 2011"},
                    "genres": [{"id": "1", "description": "Action"}, {"id": "25", "description": "Adventure"}],
                    "price_overview": {"currency": "USD", "initial": 999, "final": 199, "discount_percent": 80},
                    "short_description": "The sequel.",
                    "platforms": {"windows": true, "mac": true, "linux": false}
                }
            }
        });
        let rec = parse_catalog(620, &body).unwrap();
        assert_eq!(rec.name.as_deref(), Some("Portal 2"));
        assert_eq!(rec.developer.as_deref(), Some("Valve"));
        assert_eq!(rec.release_date.as_deref(), Some("18 Apr, 2011"));
        assert_eq!(rec.genres.as_deref(), Some("Action,Adventure"));
        assert_eq!(rec.price, Some(BigDecimal::from_str("1.99").unwrap()));
        assert_eq!(rec.description.as_deref(), Some("The sequel."));
        let platforms = rec.platforms.unwrap();
        assert!(platforms.contains("windows") && platforms.contains("mac"));
        assert!(!platforms.contains("linux"));
    }

    #[test]
    fn free_titles_cost_zero() {
        let body = json!({"570": {"success": true, "data": {"name": "Dota 2", "is_free": true}}});
        let rec = parse_catalog(570, &body).unwrap();
        let price = rec.price.unwrap();
        assert_eq!(price.to_plain_string(), "0.00");
        assert_eq!(rec.genres, None);
        assert_eq!(rec.developer, None);
    }

    #[test]
    fn price_too_large_for_the_column_is_null() {
        let body = json!({"9": {"success": true, "data": {
            "name": "Whale Pack",
            "price_overview": {"currency": "USD", "final": 10000000000_i64}
        }}});
        let rec = parse_catalog(9, &body).unwrap();
        assert_eq!(rec.name.as_deref(), Some("Whale Pack"));
        assert_eq!(rec.price, None);
    }

    #[test]
    fn unsuccessful_or_missing_entries_are_none() {
        assert!(parse_catalog(1, &json!({"1": {"success": false}})).is_none());
        assert!(parse_catalog(1, &json!({"2": {"success": true, "data": {}}})).is_none());
        assert!(parse_catalog(1, &json!({"1": "garbage"})).is_none());
    }
}
