//! One hourly run: trending, the three per-game feeds, then merge & clean.
use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::database_ops::{CatalogCache, Store, StoreError};
use crate::http::{FetchError, ResilientClient, Transport};
use crate::model::RunKey;
use crate::normalization::reconcile::{reconcile, Reconciliation};
use crate::steam::SteamFeeds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Trending,
    CatalogDetail,
    PlayerCount,
    Popularity,
    Reconcile,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Trending => "trending",
            Stage::CatalogDetail => "catalog_detail",
            Stage::PlayerCount => "player_count",
            Stage::Popularity => "popularity",
            Stage::Reconcile => "reconcile",
            Stage::Persist => "persist",
        })
    }
}

#[derive(Debug, Error)]
pub enum StageCause {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A failure that aborts the run. The invoker decides whether to retry.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {cause}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub cause: StageCause,
}

impl StageFailure {
    pub fn new(stage: Stage, cause: impl Into<StageCause>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

/// Counts for one run, logged at the end and returned to the caller.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub trending: usize,
    pub catalog_fetched: usize,
    pub catalog_skipped: usize,
    pub catalog_failed: usize,
    pub player_counts: usize,
    pub player_counts_missing: usize,
    pub popularity: usize,
    pub popularity_missing: usize,
    pub snapshots: usize,
    pub dropped: Vec<i64>,
}

#[derive(Debug, Default)]
struct CatalogStats {
    fetched: usize,
    skipped: usize,
    failed: usize,
}

pub struct Pipeline<T, S> {
    feeds: SteamFeeds<T>,
    store: S,
    permits: Semaphore,
}

impl<T: Transport, S: Store> Pipeline<T, S> {
    pub fn new(feeds: SteamFeeds<T>, store: S, concurrency: usize) -> Self {
        Self {
            feeds,
            store,
            permits: Semaphore::new(concurrency.max(1)),
        }
    }

    pub fn from_config(config: &PipelineConfig, transport: T, store: S) -> Self {
        let client = ResilientClient::new(transport, config.retry_policy());
        let feeds = SteamFeeds::new(client, config.endpoints.clone(), config.trending_limit);
        Self::new(feeds, store, config.concurrency)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip_all, fields(run = %run))]
    pub async fn run(&self, run: RunKey) -> Result<RunReport, StageFailure> {
        let trending = self
            .feeds
            .fetch_trending(run)
            .await
            .map_err(|e| StageFailure::new(Stage::Trending, e))?;
        if trending.is_empty() {
            warn!("trending feed is empty; nothing to enrich");
        }
        self.store
            .upsert_many(&trending)
            .await
            .map_err(|e| StageFailure::new(Stage::Trending, e))?;
        let appids: Vec<i64> = trending.iter().map(|t| t.appid).collect();

        // barrier: merge & clean waits for all three
        let (catalog, players, popularity) = tokio::join!(
            self.catalog_stage(&appids),
            self.player_count_stage(run, &appids),
            self.popularity_stage(run, &appids),
        );
        let catalog = catalog?;
        let (player_counts, player_counts_missing) = players?;
        let (popularity, popularity_missing) = popularity?;

        let reconciliation = self.reconcile_stage(run).await?;
        self.store
            .upsert_many(&reconciliation.snapshots)
            .await
            .map_err(|e| StageFailure::new(Stage::Persist, e))?;

        let report = RunReport {
            trending: trending.len(),
            catalog_fetched: catalog.fetched,
            catalog_skipped: catalog.skipped,
            catalog_failed: catalog.failed,
            player_counts,
            player_counts_missing,
            popularity,
            popularity_missing,
            snapshots: reconciliation.snapshots.len(),
            dropped: reconciliation.dropped,
        };
        info!(
            trending = report.trending,
            catalog_fetched = report.catalog_fetched,
            catalog_skipped = report.catalog_skipped,
            catalog_failed = report.catalog_failed,
            player_counts_missing = report.player_counts_missing,
            popularity_missing = report.popularity_missing,
            snapshots = report.snapshots,
            dropped = report.dropped.len(),
            "run complete"
        );
        Ok(report)
    }

    /// Retry whole runs: `attempts` tries in total, `delay` apart. Every stage is
    /// an upsert, so a retried run simply overwrites what the failed one wrote.
    pub async fn run_with_retries(
        &self,
        run: RunKey,
        attempts: u32,
        delay: Duration,
    ) -> Result<RunReport, StageFailure> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run(run).await {
                Ok(report) => return Ok(report),
                Err(err) if attempt < attempts => {
                    warn!(run = %run, attempt, attempts, stage = %err.stage, error = %err, "run failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(run = %run, attempts, stage = %err.stage, error = %err, "run failed; giving up");
                    return Err(err);
                }
            }
        }
    }

    /// Drive `task` for every appid, at most `concurrency` in flight across all stages.
    /// Results come back ordered by appid.
    async fn fan_out<F, Fut, O>(&self, appids: &[i64], task: F) -> Vec<(i64, O)>
    where
        F: Fn(i64) -> Fut,
        Fut: Future<Output = O>,
    {
        let mut pending: FuturesUnordered<_> = appids
            .iter()
            .map(|&appid| {
                let fut = task(appid);
                async move {
                    let _permit = self.permits.acquire().await.ok();
                    (appid, fut.await)
                }
            })
            .collect();
        let mut out = Vec::with_capacity(appids.len());
        while let Some(done) = pending.next().await {
            out.push(done);
        }
        out.sort_by_key(|(appid, _)| *appid);
        out
    }

    async fn catalog_stage(&self, appids: &[i64]) -> Result<CatalogStats, StageFailure> {
        let (to_fetch, skipped) = CatalogCache::new(&self.store).partition(appids).await;
        let mut stats = CatalogStats {
            skipped: skipped.len(),
            ..Default::default()
        };
        let mut records = Vec::with_capacity(to_fetch.len());
        for (appid, result) in self
            .fan_out(&to_fetch, |appid| self.feeds.fetch_catalog(appid))
            .await
        {
            match result {
                Ok(Some(record)) => records.push(record),
                Ok(None) => stats.failed += 1,
                Err(err) => {
                    warn!(appid, error = %err, "catalog fetch failed; skipping");
                    stats.failed += 1;
                }
            }
        }
        self.store
            .upsert_many(&records)
            .await
            .map_err(|e| StageFailure::new(Stage::CatalogDetail, e))?;
        stats.fetched = records.len();
        info!(
            fetched = stats.fetched,
            skipped = stats.skipped,
            failed = stats.failed,
            "catalog stage done"
        );
        Ok(stats)
    }

    async fn player_count_stage(
        &self,
        run: RunKey,
        appids: &[i64],
    ) -> Result<(usize, usize), StageFailure> {
        let rows: Vec<_> = self
            .fan_out(appids, |appid| self.feeds.fetch_player_count(run, appid))
            .await
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        let missing = rows.iter().filter(|r| r.current_players.is_none()).count();
        self.store
            .upsert_many(&rows)
            .await
            .map_err(|e| StageFailure::new(Stage::PlayerCount, e))?;
        info!(rows = rows.len(), missing, "player count stage done");
        Ok((rows.len(), missing))
    }

    async fn popularity_stage(
        &self,
        run: RunKey,
        appids: &[i64],
    ) -> Result<(usize, usize), StageFailure> {
        let rows: Vec<_> = self
            .fan_out(appids, |appid| self.feeds.fetch_popularity(run, appid))
            .await
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        let missing = rows.iter().filter(|r| r.is_empty()).count();
        self.store
            .upsert_many(&rows)
            .await
            .map_err(|e| StageFailure::new(Stage::Popularity, e))?;
        info!(rows = rows.len(), missing, "popularity stage done");
        Ok((rows.len(), missing))
    }

    /// Merge & clean from what the store holds for `run`, so a rerun sees the
    /// same inputs as the original attempt.
    async fn reconcile_stage(&self, run: RunKey) -> Result<Reconciliation, StageFailure> {
        let fail = |e: StoreError| StageFailure::new(Stage::Reconcile, e);
        let trending = self.store.load_trending(run).await.map_err(fail)?;
        let appids: Vec<i64> = trending.iter().map(|t| t.appid).collect();
        let catalog = self.store.load_catalog(&appids).await.map_err(fail)?;
        let players = self.store.load_player_counts(run).await.map_err(fail)?;
        let popularity = self.store.load_popularity(run).await.map_err(fail)?;
        Ok(reconcile(run, &trending, &catalog, &players, &popularity))
    }
}
