//! Feed fetchers for SteamSpy, the Steam store and the Steam Web API.
//!
//! Each fetcher turns one provider response into bronze rows. Only the trending
//! fetch can fail a run; per-app fetchers resolve their failures to skipped or
//! null-valued rows so one bad app never sinks the others.
pub mod catalog;
pub mod player_count;
pub mod popularity;
pub mod trending;

use std::sync::Arc;

use crate::config::Endpoints;
use crate::http::{ResilientClient, Transport};

/// Shared handle used by every fetcher of a run.
pub struct SteamFeeds<T> {
    client: Arc<ResilientClient<T>>,
    endpoints: Endpoints,
    trending_limit: usize,
}

impl<T> Clone for SteamFeeds<T> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            endpoints: self.endpoints.clone(),
            trending_limit: self.trending_limit,
        }
    }
}

impl<T: Transport> SteamFeeds<T> {
    pub fn new(client: ResilientClient<T>, endpoints: Endpoints, trending_limit: usize) -> Self {
        Self {
            client: Arc::new(client),
            endpoints,
            trending_limit,
        }
    }

    pub fn client(&self) -> &ResilientClient<T> {
        &self.client
    }

    fn steamspy_url(&self) -> String {
        format!("{}/api.php", self.endpoints.steamspy.trim_end_matches('/'))
    }

    fn store_url(&self) -> String {
        format!("{}/api/appdetails", self.endpoints.store.trim_end_matches('/'))
    }

    fn player_count_url(&self) -> String {
        format!(
            "{}/ISteamUserStats/GetNumberOfCurrentPlayers/v1/",
            self.endpoints.web_api.trim_end_matches('/')
        )
    }
}
