//! In-process [`Store`] with the same upsert semantics as Postgres.
use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::store::{merge_by_key, Conflict, Record, RecordKey, Store, StoreError};
use crate::model::{
    CatalogRecord, CleanedSnapshot, PlayerCountEntry, PopularityEntry, RunKey, TrendingEntry,
};

type Table = BTreeMap<RecordKey, Box<dyn Any + Send + Sync>>;

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<&'static str, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently stored in `table`.
    pub async fn row_count(&self, table: &str) -> usize {
        self.tables.lock().await.get(table).map_or(0, BTreeMap::len)
    }

    async fn rows<R: Record>(
        &self,
        keep: impl Fn(&RecordKey) -> bool,
    ) -> Result<Vec<R>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(table) = tables.get(R::TABLE.name) else {
            return Ok(Vec::new());
        };
        table
            .iter()
            .filter(|(key, _)| keep(key))
            .map(|(_, row)| {
                row.downcast_ref::<R>()
                    .cloned()
                    .ok_or(StoreError::Corrupt(R::TABLE.name))
            })
            .collect()
    }

    async fn run_rows<R: Record>(&self, run: RunKey) -> Result<Vec<R>, StoreError> {
        self.rows(|key| key.run() == Some(run)).await
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_many<R: Record>(&self, rows: &[R]) -> Result<u64, StoreError> {
        let merged = merge_by_key(rows);
        let mut tables = self.tables.lock().await;
        let table = tables.entry(R::TABLE.name).or_default();
        let mut written = 0;
        for row in merged {
            let key = row.key();
            if R::TABLE.conflict == Conflict::Ignore && table.contains_key(&key) {
                continue;
            }
            table.insert(key, Box::new(row.clone()));
            written += 1;
        }
        Ok(written)
    }

    async fn catalog_contains(&self, appid: i64) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(CatalogRecord::TABLE.name)
            .is_some_and(|t| t.contains_key(&RecordKey::App(appid))))
    }

    async fn load_trending(&self, run: RunKey) -> Result<Vec<TrendingEntry>, StoreError> {
        self.run_rows(run).await
    }

    async fn load_catalog(&self, appids: &[i64]) -> Result<Vec<CatalogRecord>, StoreError> {
        self.rows(|key| matches!(key, RecordKey::App(id) if appids.contains(id)))
            .await
    }

    async fn load_player_counts(
        &self,
        run: RunKey,
    ) -> Result<Vec<PlayerCountEntry>, StoreError> {
        self.run_rows(run).await
    }

    async fn load_popularity(&self, run: RunKey) -> Result<Vec<PopularityEntry>, StoreError> {
        self.run_rows(run).await
    }

    async fn load_snapshots(&self, run: RunKey) -> Result<Vec<CleanedSnapshot>, StoreError> {
        self.run_rows(run).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn run(hour: u32) -> RunKey {
        RunKey::parse("2025-02-01", hour).unwrap()
    }

    fn trending(appid: i64, run: RunKey, name: &str) -> TrendingEntry {
        TrendingEntry {
            appid,
            run_date: run.run_date(),
            run_hour: run.run_hour(),
            name: Some(name.into()),
            median_2weeks: Some(10),
        }
    }

    fn catalog(appid: i64, name: &str) -> CatalogRecord {
        CatalogRecord {
            appid,
            name: Some(name.into()),
            developer: None,
            release_date: None,
            genres: None,
            price: Some(BigDecimal::from(5)),
            description: None,
            platforms: None,
        }
    }

    fn snapshot(appid: i64, run: RunKey, players: i64) -> CleanedSnapshot {
        CleanedSnapshot {
            appid,
            run_date: run.run_date(),
            run_hour: run.run_hour(),
            name: format!("game {appid}"),
            current_players: Some(players),
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
        }
    }

    #[tokio::test]
    async fn replaying_a_batch_is_idempotent() {
        let store = MemoryStore::new();
        let r = run(6);
        let trending_rows = vec![trending(570, r, "Dota 2"), trending(730, r, "CS2")];
        let players = vec![PlayerCountEntry {
            appid: 570,
            run_date: r.run_date(),
            run_hour: r.run_hour(),
            current_players: Some(800_000),
        }];
        let popularity = vec![PopularityEntry::empty(570, r)];
        let snapshots = vec![snapshot(570, r, 800_000)];

        for _ in 0..2 {
            store.upsert_many(&trending_rows).await.unwrap();
            store.upsert_many(&[catalog(570, "Dota 2")]).await.unwrap();
            store.upsert_many(&players).await.unwrap();
            store.upsert_many(&popularity).await.unwrap();
            store.upsert_many(&snapshots).await.unwrap();
        }

        assert_eq!(store.row_count("trending_games").await, 2);
        assert_eq!(store.row_count("game_catalog").await, 1);
        assert_eq!(store.row_count("player_count").await, 1);
        assert_eq!(store.row_count("popularity_stats").await, 1);
        assert_eq!(store.row_count("games_cleaned").await, 1);
        assert_eq!(store.load_trending(r).await.unwrap(), trending_rows);
        assert_eq!(store.load_player_counts(r).await.unwrap(), players);
        assert_eq!(store.load_popularity(r).await.unwrap(), popularity);
        assert_eq!(store.load_snapshots(r).await.unwrap(), snapshots);
    }

    #[tokio::test]
    async fn duplicate_keys_collapse_to_one_row() {
        let store = MemoryStore::new();
        let r = run(6);
        let written = store
            .upsert_many(&[snapshot(1, r, 10), snapshot(1, r, 20), snapshot(2, r, 5)])
            .await
            .unwrap();
        assert_eq!(written, 2);
        let rows = store.load_snapshots(r).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].current_players, Some(20));
    }

    #[tokio::test]
    async fn reruns_overwrite_partitioned_rows() {
        let store = MemoryStore::new();
        let r = run(6);
        store.upsert_many(&[snapshot(1, r, 10)]).await.unwrap();
        store.upsert_many(&[snapshot(1, r, 99)]).await.unwrap();
        let rows = store.load_snapshots(r).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].current_players, Some(99));
    }

    #[tokio::test]
    async fn catalog_keeps_first_write() {
        let store = MemoryStore::new();
        assert!(!store.catalog_contains(570).await.unwrap());
        assert_eq!(store.upsert_many(&[catalog(570, "first")]).await.unwrap(), 1);
        assert_eq!(store.upsert_many(&[catalog(570, "second")]).await.unwrap(), 0);
        assert!(store.catalog_contains(570).await.unwrap());
        let rows = store.load_catalog(&[570, 999]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn runs_are_partitioned() {
        let store = MemoryStore::new();
        store
            .upsert_many(&[trending(1, run(5), "a"), trending(1, run(6), "b")])
            .await
            .unwrap();
        assert_eq!(store.row_count("trending_games").await, 2);
        let rows = store.load_trending(run(6)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name.as_deref(), Some("b"));
        assert!(store.load_trending(run(7)).await.unwrap().is_empty());
    }
}
