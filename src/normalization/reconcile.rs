//! Merge & clean: joins the four bronze feeds of one run into silver snapshots.
use std::collections::BTreeMap;

use tracing::{debug, info};

use super::coerce::{cents_to_usd, non_blank, non_negative, parse_owners};
use crate::model::{
    CatalogRecord, CleanedSnapshot, PlayerCountEntry, PopularityEntry, RunKey, TrendingEntry,
};

/// Result of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reconciliation {
    /// One row per surviving appid, ordered by appid.
    pub snapshots: Vec<CleanedSnapshot>,
    /// Appids dropped for lacking a name in both trending and catalog.
    pub dropped: Vec<i64>,
}

/// Everything known about one appid for the run, assembled source by source.
#[derive(Debug, Default)]
struct Joined<'a> {
    trending: Option<&'a TrendingEntry>,
    catalog: Option<&'a CatalogRecord>,
    players: Option<&'a PlayerCountEntry>,
    popularity: Option<&'a PopularityEntry>,
}

impl Joined<'_> {
    fn name(&self) -> Option<&str> {
        non_blank(self.trending.and_then(|t| t.name.as_deref()))
            .or_else(|| non_blank(self.catalog.and_then(|c| c.name.as_deref())))
    }

    fn clean(&self, appid: i64, run: RunKey) -> Option<CleanedSnapshot> {
        let name = self.name()?;
        let pop = self.popularity;
        let count = |pick: fn(&PopularityEntry) -> Option<i64>| non_negative(pop.and_then(pick));
        Some(CleanedSnapshot {
            appid,
            run_date: run.run_date(),
            run_hour: run.run_hour(),
            name: name.to_string(),
            current_players: non_negative(self.players.and_then(|p| p.current_players)),
            ccu: count(|p| p.ccu),
            average_playtime_2weeks: count(|p| p.average_2weeks),
            median_playtime_2weeks: count(|p| p.median_2weeks),
            estimated_owners: pop.and_then(|p| p.owners.as_deref()).and_then(parse_owners),
            positive_reviews: count(|p| p.positive),
            negative_reviews: count(|p| p.negative),
            average_playtime_forever: count(|p| p.average_forever),
            median_playtime_forever: count(|p| p.median_forever),
            // popularity price tracks current discounting; catalog price is list price
            price_usd: cents_to_usd(pop.and_then(|p| p.price_cents)),
            score_rank: count(|p| p.score_rank),
            discount_percent: count(|p| p.discount_percent).filter(|d| *d <= 100),
        })
    }
}

/// Join the four feeds for `run`. Trending defines the universe; catalog is not
/// run-scoped; player counts and popularity rows of other runs are ignored.
/// Pure: identical inputs always give identical output.
pub fn reconcile(
    run: RunKey,
    trending: &[TrendingEntry],
    catalog: &[CatalogRecord],
    player_counts: &[PlayerCountEntry],
    popularity: &[PopularityEntry],
) -> Reconciliation {
    let mut universe: BTreeMap<i64, Joined<'_>> = BTreeMap::new();
    for t in trending
        .iter()
        .filter(|t| t.appid > 0 && run.matches(t.run_date, t.run_hour))
    {
        universe.entry(t.appid).or_default().trending = Some(t);
    }
    for c in catalog {
        if let Some(j) = universe.get_mut(&c.appid) {
            j.catalog = Some(c);
        }
    }
    for p in player_counts
        .iter()
        .filter(|p| run.matches(p.run_date, p.run_hour))
    {
        if let Some(j) = universe.get_mut(&p.appid) {
            j.players = Some(p);
        }
    }
    for p in popularity
        .iter()
        .filter(|p| run.matches(p.run_date, p.run_hour))
    {
        if let Some(j) = universe.get_mut(&p.appid) {
            j.popularity = Some(p);
        }
    }

    let mut out = Reconciliation::default();
    for (appid, joined) in &universe {
        match joined.clean(*appid, run) {
            Some(row) => out.snapshots.push(row),
            None => {
                debug!(appid, run = %run, "dropping snapshot without a name");
                out.dropped.push(*appid);
            }
        }
    }
    info!(
        run = %run,
        universe = universe.len(),
        snapshots = out.snapshots.len(),
        dropped = out.dropped.len(),
        "reconciled run"
    );
    out
}
