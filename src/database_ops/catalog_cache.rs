use tracing::{debug, warn};

use super::store::{Store, StoreError};

/// Read-through view of which apps already have a `game_catalog` row.
///
/// Every question goes to the store; nothing is memoized across runs, so a row
/// persisted by an earlier run is always seen.
pub struct CatalogCache<'a, S> {
    store: &'a S,
}

impl<'a, S: Store> CatalogCache<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn exists(&self, appid: i64) -> Result<bool, StoreError> {
        self.store.catalog_contains(appid).await
    }

    /// Split `appids` into `(to_fetch, skipped)`, preserving input order.
    /// A failed lookup counts as "not cached"; the catalog insert ignores conflicts anyway.
    pub async fn partition(&self, appids: &[i64]) -> (Vec<i64>, Vec<i64>) {
        let mut to_fetch = Vec::new();
        let mut skipped = Vec::new();
        for &appid in appids {
            match self.exists(appid).await {
                Ok(true) => skipped.push(appid),
                Ok(false) => to_fetch.push(appid),
                Err(err) => {
                    warn!(appid, error = %err, "catalog lookup failed; fetching anyway");
                    to_fetch.push(appid);
                }
            }
        }
        debug!(
            to_fetch = to_fetch.len(),
            skipped = skipped.len(),
            "catalog cache partition"
        );
        (to_fetch, skipped)
    }
}
