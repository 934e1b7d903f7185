//! Connection-state cache and the probe policy around it
//!
//! A probe result is cached per `(scope, url, project)` whether it succeeded
//! or not. Read and write records for the same URL carry different
//! credentials, so their states never share an entry.
//! Lists refresh every visible repository concurrently; a failing probe only
//! marks its own item as failed.

use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::models::{ConnectionState, RepositoryView};
use super::resolver::normalize_url;
use crate::db::{RepoScope, RepositoryStore};
use crate::error::ServerError;
use crate::reposerver::RepoTester;

/// Message shown to callers when a probe failed because of how credentials are configured
pub const CREDENTIALS_CONFIGURATION_MESSAGE: &str =
    "Configuration error - please check the server logs";

#[derive(Debug, thiserror::Error)]
pub enum ConnectionCacheError {
    #[error("connection state cache unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ConnectionStateCache: Send + Sync {
    async fn get_state(&self, scope: RepoScope, url: &str, project: &str) -> Option<ConnectionState>;

    async fn set_state(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
        state: ConnectionState,
    ) -> Result<(), ConnectionCacheError>;

    async fn invalidate(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
    ) -> Result<(), ConnectionCacheError>;
}

/// In-memory TTL cache backed by moka
pub struct MokaConnectionCache {
    cache: Cache<(RepoScope, String, String), ConnectionState>,
}

impl MokaConnectionCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        Self { cache }
    }

    fn key(scope: RepoScope, url: &str, project: &str) -> (RepoScope, String, String) {
        (scope, normalize_url(url), project.to_string())
    }
}

#[async_trait]
impl ConnectionStateCache for MokaConnectionCache {
    async fn get_state(&self, scope: RepoScope, url: &str, project: &str) -> Option<ConnectionState> {
        self.cache.get(&Self::key(scope, url, project)).await
    }

    async fn set_state(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
        state: ConnectionState,
    ) -> Result<(), ConnectionCacheError> {
        self.cache.insert(Self::key(scope, url, project), state).await;
        Ok(())
    }

    async fn invalidate(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
    ) -> Result<(), ConnectionCacheError> {
        self.cache.invalidate(&Self::key(scope, url, project)).await;
        Ok(())
    }
}

/// Computes connection states, consulting and refreshing the cache
#[derive(Clone)]
pub struct ConnectionMonitor {
    store: Arc<dyn RepositoryStore>,
    tester: Arc<dyn RepoTester>,
    cache: Arc<dyn ConnectionStateCache>,
    probe_concurrency: usize,
}

impl ConnectionMonitor {
    pub fn new(
        store: Arc<dyn RepositoryStore>,
        tester: Arc<dyn RepoTester>,
        cache: Arc<dyn ConnectionStateCache>,
        probe_concurrency: usize,
    ) -> Self {
        Self {
            store,
            tester,
            cache,
            probe_concurrency: probe_concurrency.max(1),
        }
    }

    /// Connection state of one repository.
    ///
    /// Served from the cache unless `force_refresh` is set or nothing is
    /// cached. A fresh result is always written back, failures included.
    pub async fn get_connection_state(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
        force_refresh: bool,
    ) -> ConnectionState {
        if !force_refresh {
            if let Some(state) = self.cache.get_state(scope, url, project).await {
                return state;
            }
        }

        let now = Utc::now();
        let probe = match self.store.get_repository(scope, url, project).await {
            Ok(repo) => self.tester.test_repository(&repo).await.map_err(|e| {
                if e.is_credentials_configuration() {
                    tracing::warn!(repo = %url, project = %project, "could not retrieve repo: {}", e);
                    CREDENTIALS_CONFIGURATION_MESSAGE.to_string()
                } else {
                    format!("Unable to connect to repository: {}", e)
                }
            }),
            Err(e) => Err(format!("Unable to connect to repository: {}", e)),
        };

        let state = match probe {
            Ok(()) => ConnectionState::successful(now),
            Err(message) => ConnectionState::failed(message, now),
        };

        if let Err(e) = self.cache.set_state(scope, url, project, state.clone()).await {
            tracing::warn!(repo = %url, "connection state cache set error: {}", e);
        }
        state
    }

    /// Drop the cached state so the next read probes again
    pub async fn invalidate(&self, scope: RepoScope, url: &str, project: &str) {
        if let Err(e) = self.cache.invalidate(scope, url, project).await {
            tracing::warn!(repo = %url, project = %project, "connection state cache invalidate error: {}", e);
        }
    }

    /// Fill in the connection state of every item, at most `probe_concurrency`
    /// probes at a time, and sort by `project/repo`.
    ///
    /// Only a failed task (not a failed probe) fails the whole call; the
    /// remaining probes are aborted in that case.
    pub async fn refresh_all(
        &self,
        scope: RepoScope,
        mut items: Vec<RepositoryView>,
        force_refresh: bool,
    ) -> Result<Vec<RepositoryView>, ServerError> {
        let permits = Arc::new(Semaphore::new(self.probe_concurrency));
        let mut tasks = JoinSet::new();

        for (index, item) in items.iter().enumerate() {
            let monitor = self.clone();
            let permits = permits.clone();
            let url = item.repo.clone();
            let project = item.project.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await?;
                let state = monitor
                    .get_connection_state(scope, &url, &project, force_refresh)
                    .await;
                Ok::<_, tokio::sync::AcquireError>((index, state))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, state) = joined
                .map_err(|e| ServerError::internal_anyhow(e.into(), "connection probe task failed"))?
                .map_err(|e| ServerError::internal_anyhow(e.into(), "connection probe task failed"))?;
            items[index].connection_state = state;
        }

        items.sort_by_cached_key(|item| format!("{}/{}", item.project, item.repo));
        Ok(items)
    }
}
