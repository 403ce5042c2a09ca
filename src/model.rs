//! Bronze and silver rows plus the run key that partitions them.
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunKeyError {
    #[error("run hour {0} outside 0..=23")]
    Hour(u32),
    #[error("unparseable run date {0:?} (expected YYYY-MM-DD)")]
    Date(String),
}

/// Identifies one hourly pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunKey {
    run_date: NaiveDate,
    run_hour: i16,
}

impl RunKey {
    pub fn new(run_date: NaiveDate, run_hour: u32) -> Result<Self, RunKeyError> {
        if run_hour > 23 {
            return Err(RunKeyError::Hour(run_hour));
        }
        Ok(Self {
            run_date,
            run_hour: run_hour as i16,
        })
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            run_date: at.date_naive(),
            run_hour: at.hour() as i16,
        }
    }

    pub fn parse(date: &str, hour: u32) -> Result<Self, RunKeyError> {
        let run_date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|_| RunKeyError::Date(date.to_string()))?;
        Self::new(run_date, hour)
    }

    // Rows read back from storage carry already-validated partition columns.
    pub(crate) fn from_parts(run_date: NaiveDate, run_hour: i16) -> Self {
        Self { run_date, run_hour }
    }

    pub fn run_date(&self) -> NaiveDate {
        self.run_date
    }

    pub fn run_hour(&self) -> i16 {
        self.run_hour
    }

    /// True when a row's partition columns point at this run.
    pub fn matches(&self, run_date: NaiveDate, run_hour: i16) -> bool {
        self.run_date == run_date && self.run_hour == run_hour
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{:02}", self.run_date.format("%Y-%m-%d"), self.run_hour)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TrendingEntry {
    pub appid: i64,
    pub run_date: NaiveDate,
    pub run_hour: i16,
    pub name: Option<String>,
    pub median_2weeks: Option<i64>,
}

/// Store metadata for one game. Not partitioned by run; first write wins.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CatalogRecord {
    pub appid: i64,
    pub name: Option<String>,
    pub developer: Option<String>,
    pub release_date: Option<String>,
    pub genres: Option<String>,
    /// Major units (USD), converted from cents when fetched.
    pub price: Option<BigDecimal>,
    pub description: Option<String>,
    pub platforms: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PlayerCountEntry {
    pub appid: i64,
    pub run_date: NaiveDate,
    pub run_hour: i16,
    pub current_players: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PopularityEntry {
    pub appid: i64,
    pub run_date: NaiveDate,
    pub run_hour: i16,
    pub owners: Option<String>,
    pub ccu: Option<i64>,
    pub positive: Option<i64>,
    pub negative: Option<i64>,
    pub average_forever: Option<i64>,
    pub average_2weeks: Option<i64>,
    pub median_forever: Option<i64>,
    pub median_2weeks: Option<i64>,
    /// Minor units (cents).
    pub price_cents: Option<i64>,
    pub score_rank: Option<i64>,
    pub discount_percent: Option<i64>,
    pub tags: Option<String>,
}

impl PopularityEntry {
    /// Placeholder kept when the popularity call fails for an app.
    pub fn empty(appid: i64, run: RunKey) -> Self {
        Self {
            appid,
            run_date: run.run_date(),
            run_hour: run.run_hour(),
            owners: None,
            ccu: None,
            positive: None,
            negative: None,
            average_forever: None,
            average_2weeks: None,
            median_forever: None,
            median_2weeks: None,
            price_cents: None,
            score_rank: None,
            discount_percent: None,
            tags: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::empty(self.appid, RunKey::from_parts(self.run_date, self.run_hour))
    }
}

/// Silver row: one reconciled snapshot per game per run.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CleanedSnapshot {
    pub appid: i64,
    pub run_date: NaiveDate,
    pub run_hour: i16,
    pub name: String,
    pub current_players: Option<i64>,
    pub ccu: Option<i64>,
    pub average_playtime_2weeks: Option<i64>,
    pub median_playtime_2weeks: Option<i64>,
    pub estimated_owners: Option<i64>,
    pub positive_reviews: Option<i64>,
    pub negative_reviews: Option<i64>,
    pub average_playtime_forever: Option<i64>,
    pub median_playtime_forever: Option<i64>,
    pub price_usd: Option<BigDecimal>,
    pub score_rank: Option<i64>,
    pub discount_percent: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_key_from_wall_clock() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 17, 42, 5).unwrap();
        let run = RunKey::from_datetime(at);
        assert_eq!(run.run_date(), NaiveDate::from_ymd_opt(2025, 3, 9).unwrap());
        assert_eq!(run.run_hour(), 17);
        assert_eq!(run.to_string(), "2025-03-09T17");
    }

    #[test]
    fn run_key_rejects_bad_input() {
        assert_eq!(RunKey::parse("2025-03-09", 24), Err(RunKeyError::Hour(24)));
        assert!(matches!(
            RunKey::parse("09/03/2025", 1),
            Err(RunKeyError::Date(_))
        ));
        assert!(RunKey::parse("2025-03-09", 0).is_ok());
    }

    #[test]
    fn empty_popularity_row_is_detected() {
        let run = RunKey::parse("2025-03-09", 4).unwrap();
        let mut row = PopularityEntry::empty(570, run);
        assert!(row.is_empty());
        row.ccu = Some(1);
        assert!(!row.is_empty());
    }
}
