//! Idempotent persistence for bronze and silver rows.
//!
//! Every write is an upsert keyed by the table's unique key, so replaying a run
//! converges on the same table contents instead of duplicating rows.
use std::collections::hash_map::{Entry, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::{FromRow, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{debug, instrument};

use super::db::Db;
use crate::model::{
    CatalogRecord, CleanedSnapshot, PlayerCountEntry, PopularityEntry, RunKey, TrendingEntry,
};

/// Postgres caps bind parameters at 65535; the widest row binds 16.
pub const MAX_ROWS_PER_STATEMENT: usize = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("table {0} holds rows of an unexpected type")]
    Corrupt(&'static str),
}

/// What happens when an incoming row hits an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// Replace every non-key column.
    Overwrite,
    /// Keep the stored row (first write wins).
    Ignore,
}

#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub key: &'static [&'static str],
    pub conflict: Conflict,
}

/// Unique key of a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKey {
    App(i64),
    AppRun(i64, RunKey),
}

impl RecordKey {
    pub fn run(&self) -> Option<RunKey> {
        match self {
            RecordKey::App(_) => None,
            RecordKey::AppRun(_, run) => Some(*run),
        }
    }
}

/// A row type bound to one table.
pub trait Record: Clone + Send + Sync + 'static {
    const TABLE: TableSpec;

    fn key(&self) -> RecordKey;

    /// Bind values in `TABLE.columns` order.
    fn push_binds<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>);
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update `rows`; returns the number of rows written.
    async fn upsert_many<R: Record>(&self, rows: &[R]) -> Result<u64, StoreError>;

    async fn catalog_contains(&self, appid: i64) -> Result<bool, StoreError>;

    async fn load_trending(&self, run: RunKey) -> Result<Vec<TrendingEntry>, StoreError>;

    async fn load_catalog(&self, appids: &[i64]) -> Result<Vec<CatalogRecord>, StoreError>;

    async fn load_player_counts(&self, run: RunKey)
        -> Result<Vec<PlayerCountEntry>, StoreError>;

    async fn load_popularity(&self, run: RunKey) -> Result<Vec<PopularityEntry>, StoreError>;

    async fn load_snapshots(&self, run: RunKey) -> Result<Vec<CleanedSnapshot>, StoreError>;
}

/// Collapse rows sharing a key so no statement touches a key twice.
/// Overwrite tables keep the last row, ignore tables the first; positions follow first sight.
pub fn merge_by_key<R: Record>(rows: &[R]) -> Vec<&R> {
    let mut index: HashMap<RecordKey, usize> = HashMap::with_capacity(rows.len());
    let mut merged: Vec<&R> = Vec::with_capacity(rows.len());
    for row in rows {
        match index.entry(row.key()) {
            Entry::Occupied(slot) => {
                if R::TABLE.conflict == Conflict::Overwrite {
                    merged[*slot.get()] = row;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(merged.len());
                merged.push(row);
            }
        }
    }
    merged
}

/// `INSERT .. VALUES .. ON CONFLICT` for one chunk of already-merged rows.
pub fn upsert_statement<'args, R: Record>(rows: &[&'args R]) -> QueryBuilder<'args, Postgres> {
    let spec = &R::TABLE;
    let mut qb: QueryBuilder<'args, Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        spec.name,
        spec.columns.join(", ")
    ));
    qb.push_values(rows.iter().copied(), |mut b, row| row.push_binds(&mut b));
    qb.push(format!(" ON CONFLICT ({}) ", spec.key.join(", ")));
    match spec.conflict {
        Conflict::Ignore => {
            qb.push("DO NOTHING");
        }
        Conflict::Overwrite => {
            let updates: Vec<String> = spec
                .columns
                .iter()
                .filter(|c| !spec.key.contains(c))
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect();
            qb.push("DO UPDATE SET ");
            qb.push(updates.join(", "));
        }
    }
    qb
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    async fn load_run<R>(&self, run: RunKey) -> Result<Vec<R>, StoreError>
    where
        R: Record + for<'r> FromRow<'r, PgRow> + Unpin,
    {
        let sql = format!(
            "SELECT {} FROM {} WHERE run_date = $1 AND run_hour = $2 ORDER BY appid",
            R::TABLE.columns.join(", "),
            R::TABLE.name
        );
        let rows = sqlx::query_as::<_, R>(&sql)
            .bind(run.run_date())
            .bind(run.run_hour())
            .persistent(false)
            .fetch_all(&self.db.pool)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self, rows), fields(table = R::TABLE.name, rows = rows.len()))]
    async fn upsert_many<R: Record>(&self, rows: &[R]) -> Result<u64, StoreError> {
        let merged = merge_by_key(rows);
        if merged.is_empty() {
            return Ok(0);
        }
        let mut tx = self.db.pool.begin().await?;
        let mut written = 0;
        for chunk in merged.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb = upsert_statement(chunk);
            written += qb
                .build()
                .persistent(false)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        debug!(written, "upserted");
        Ok(written)
    }

    async fn catalog_contains(&self, appid: i64) -> Result<bool, StoreError> {
        let found: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM game_catalog WHERE appid = $1)")
                .bind(appid)
                .persistent(false)
                .fetch_one(&self.db.pool)
                .await?;
        Ok(found)
    }

    async fn load_trending(&self, run: RunKey) -> Result<Vec<TrendingEntry>, StoreError> {
        self.load_run(run).await
    }

    async fn load_catalog(&self, appids: &[i64]) -> Result<Vec<CatalogRecord>, StoreError> {
        if appids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM game_catalog WHERE appid = ANY($1) ORDER BY appid",
            CatalogRecord::TABLE.columns.join(", ")
        );
        let rows = sqlx::query_as::<_, CatalogRecord>(&sql)
            .bind(appids)
            .persistent(false)
            .fetch_all(&self.db.pool)
            .await?;
        Ok(rows)
    }

    async fn load_player_counts(
        &self,
        run: RunKey,
    ) -> Result<Vec<PlayerCountEntry>, StoreError> {
        self.load_run(run).await
    }

    async fn load_popularity(&self, run: RunKey) -> Result<Vec<PopularityEntry>, StoreError> {
        self.load_run(run).await
    }

    async fn load_snapshots(&self, run: RunKey) -> Result<Vec<CleanedSnapshot>, StoreError> {
        self.load_run(run).await
    }
}

fn app_run(appid: i64, run_date: NaiveDate, run_hour: i16) -> RecordKey {
    RecordKey::AppRun(appid, RunKey::from_parts(run_date, run_hour))
}

impl Record for TrendingEntry {
    const TABLE: TableSpec = TableSpec {
        name: "trending_games",
        columns: &["appid", "run_date", "run_hour", "name", "median_2weeks"],
        key: &["appid", "run_date", "run_hour"],
        conflict: Conflict::Overwrite,
    };

    fn key(&self) -> RecordKey {
        app_run(self.appid, self.run_date, self.run_hour)
    }

    fn push_binds<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.appid)
            .push_bind(self.run_date)
            .push_bind(self.run_hour)
            .push_bind(&self.name)
            .push_bind(self.median_2weeks);
    }
}

impl Record for CatalogRecord {
    const TABLE: TableSpec = TableSpec {
        name: "game_catalog",
        columns: &[
            "appid",
            "name",
            "developer",
            "release_date",
            "genres",
            "price",
            "description",
            "platforms",
        ],
        key: &["appid"],
        conflict: Conflict::Ignore,
    };

    fn key(&self) -> RecordKey {
        RecordKey::App(self.appid)
    }

    fn push_binds<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.appid)
            .push_bind(&self.name)
            .push_bind(&self.developer)
            .push_bind(&self.release_date)
            .push_bind(&self.genres)
            .push_bind(&self.price)
            .push_bind(&self.description)
            .push_bind(&self.platforms);
    }
}

impl Record for PlayerCountEntry {
    const TABLE: TableSpec = TableSpec {
        name: "player_count",
        columns: &["appid", "run_date", "run_hour", "current_players"],
        key: &["appid", "run_date", "run_hour"],
        conflict: Conflict::Overwrite,
    };

    fn key(&self) -> RecordKey {
        app_run(self.appid, self.run_date, self.run_hour)
    }

    fn push_binds<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.appid)
            .push_bind(self.run_date)
            .push_bind(self.run_hour)
            .push_bind(self.current_players);
    }
}

impl Record for PopularityEntry {
    const TABLE: TableSpec = TableSpec {
        name: "popularity_stats",
        columns: &[
            "appid",
            "run_date",
            "run_hour",
            "owners",
            "ccu",
            "positive",
            "negative",
            "average_forever",
            "average_2weeks",
            "median_forever",
            "median_2weeks",
            "price_cents",
            "score_rank",
            "discount_percent",
            "tags",
        ],
        key: &["appid", "run_date", "run_hour"],
        conflict: Conflict::Overwrite,
    };

    fn key(&self) -> RecordKey {
        app_run(self.appid, self.run_date, self.run_hour)
    }

    fn push_binds<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.appid)
            .push_bind(self.run_date)
            .push_bind(self.run_hour)
            .push_bind(&self.owners)
            .push_bind(self.ccu)
            .push_bind(self.positive)
            .push_bind(self.negative)
            .push_bind(self.average_forever)
            .push_bind(self.average_2weeks)
            .push_bind(self.median_forever)
            .push_bind(self.median_2weeks)
            .push_bind(self.price_cents)
            .push_bind(self.score_rank)
            .push_bind(self.discount_percent)
            .push_bind(&self.tags);
    }
}

impl Record for CleanedSnapshot {
    const TABLE: TableSpec = TableSpec {
        name: "games_cleaned",
        columns: &[
            "appid",
            "run_date",
            "run_hour",
            "name",
            "current_players",
            "ccu",
            "average_playtime_2weeks",
            "median_playtime_2weeks",
            "estimated_owners",
            "positive_reviews",
            "negative_reviews",
            "average_playtime_forever",
            "median_playtime_forever",
            "price_usd",
            "score_rank",
            "discount_percent",
        ],
        key: &["appid", "run_date", "run_hour"],
        conflict: Conflict::Overwrite,
    };

    fn key(&self) -> RecordKey {
        app_run(self.appid, self.run_date, self.run_hour)
    }

    fn push_binds<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.appid)
            .push_bind(self.run_date)
            .push_bind(self.run_hour)
            .push_bind(&self.name)
            .push_bind(self.current_players)
            .push_bind(self.ccu)
            .push_bind(self.average_playtime_2weeks)
            .push_bind(self.median_playtime_2weeks)
            .push_bind(self.estimated_owners)
            .push_bind(self.positive_reviews)
            .push_bind(self.negative_reviews)
            .push_bind(self.average_playtime_forever)
            .push_bind(self.median_playtime_forever)
            .push_bind(&self.price_usd)
            .push_bind(self.score_rank)
            .push_bind(self.discount_percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> RunKey {
        RunKey::parse("2025-02-01", 6).unwrap()
    }

    fn player(appid: i64, players: Option<i64>) -> PlayerCountEntry {
        PlayerCountEntry {
            appid,
            run_date: run().run_date(),
            run_hour: run().run_hour(),
            current_players: players,
        }
    }

    fn catalog(appid: i64, name: &str) -> CatalogRecord {
        CatalogRecord {
            appid,
            name: Some(name.into()),
            developer: None,
            release_date: None,
            genres: None,
            price: None,
            description: None,
            platforms: None,
        }
    }

    #[test]
    fn partitioned_tables_update_every_non_key_column() {
        let rows = [player(570, Some(1)), player(730, None)];
        let refs: Vec<&PlayerCountEntry> = rows.iter().collect();
        let qb = upsert_statement(&refs);
        assert_eq!(
            qb.sql(),
            "INSERT INTO player_count (appid, run_date, run_hour, current_players) \
             VALUES ($1, $2, $3, $4), ($5, $6, $7, $8) \
             ON CONFLICT (appid, run_date, run_hour) DO UPDATE SET current_players = EXCLUDED.current_players"
        );
    }

    #[test]
    fn catalog_inserts_are_first_write_wins() {
        let rows = [catalog(570, "Dota 2")];
        let refs: Vec<&CatalogRecord> = rows.iter().collect();
        let sql = upsert_statement(&refs).sql().to_string();
        assert!(sql.starts_with("INSERT INTO game_catalog (appid, name, developer,"));
        assert!(sql.ends_with("ON CONFLICT (appid) DO NOTHING"));
        assert!(!sql.contains("EXCLUDED"));
    }

    #[test]
    fn snapshot_update_list_skips_key_columns() {
        let snapshot = CleanedSnapshot {
            appid: 1,
            run_date: run().run_date(),
            run_hour: run().run_hour(),
            name: "x".into(),
            current_players: None,
            ccu: None,
            average_playtime_2weeks: None,
            median_playtime_2weeks: None,
            estimated_owners: None,
            positive_reviews: None,
            negative_reviews: None,
            average_playtime_forever: None,
            median_playtime_forever: None,
            price_usd: None,
            score_rank: None,
            discount_percent: None,
        };
        let sql = upsert_statement(&[&snapshot]).sql().to_string();
        let (_, updates) = sql.split_once("DO UPDATE SET ").unwrap();
        assert!(!updates.contains("appid ="));
        assert!(!updates.contains("run_hour ="));
        assert!(updates.contains("price_usd = EXCLUDED.price_usd"));
        assert_eq!(updates.matches("EXCLUDED.").count(), 13);
        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"));
    }

    #[test]
    fn duplicate_keys_merge_before_writing() {
        let rows = vec![
            player(570, Some(1)),
            player(730, Some(2)),
            player(570, Some(3)),
        ];
        let merged = merge_by_key(&rows);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].appid, 570);
        assert_eq!(merged[0].current_players, Some(3));
        assert_eq!(merged[1].appid, 730);

        let catalogs = vec![catalog(570, "first"), catalog(570, "second")];
        let merged = merge_by_key(&catalogs);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name.as_deref(), Some("first"));
    }

    #[test]
    fn widest_chunk_fits_bind_limit() {
        assert!(MAX_ROWS_PER_STATEMENT * CleanedSnapshot::TABLE.columns.len() <= u16::MAX as usize);
        assert_eq!(
            PopularityEntry::TABLE.columns.len(),
            15,
            "column list must track push_binds"
        );
    }
}
