//! Persistence for repositories, credential templates, applications and projects
//!
//! The service talks to storage only through the traits in this module.
//! [`PgStore`] backs them with PostgreSQL, [`MemoryStore`] keeps everything
//! in process for single-node setups and tests.

pub mod applications;
pub mod memory;
pub mod models;
pub mod projects;
pub mod repo_credentials;
pub mod repositories;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::application::models::Application;
use crate::error::ServerError;
use crate::project::Project;
use crate::repository::models::{RepoCredentials, Repository};

pub use memory::MemoryStore;

/// Read repositories are used to render manifests, write repositories to push hydrated ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RepoScope {
    Read,
    Write,
}

impl RepoScope {
    pub fn as_str(self) -> &'static str {
        match self {
            RepoScope::Read => "read",
            RepoScope::Write => "write",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("repository {0:?} not found")]
    NotFound(String),
    #[error("repository {0:?} already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(url) => ServerError::not_found(format!("repo '{}' not found", url)),
            StoreError::AlreadyExists(url) => {
                ServerError::conflict(format!("repo '{}' already exists", url))
            }
            StoreError::Backend(e) => ServerError::internal_anyhow(e, "repository store error"),
        }
    }
}

/// Repository records keyed by `(scope, normalized URL, project)`
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn list_repositories(&self, scope: RepoScope) -> Result<Vec<Repository>, StoreError>;

    /// Repositories of type `helm` in the read scope
    async fn list_helm_repositories(&self) -> Result<Vec<Repository>, StoreError>;

    async fn get_repository(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
    ) -> Result<Repository, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] if the key is taken
    async fn create_repository(
        &self,
        scope: RepoScope,
        repo: &Repository,
    ) -> Result<Repository, StoreError>;

    /// Fails with [`StoreError::NotFound`] if no record has the key
    async fn update_repository(
        &self,
        scope: RepoScope,
        repo: &Repository,
    ) -> Result<Repository, StoreError>;

    async fn delete_repository(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
    ) -> Result<(), StoreError>;

    /// Credential template whose URL is the longest prefix of `url`
    async fn get_repository_credentials(
        &self,
        url: &str,
    ) -> Result<Option<RepoCredentials>, StoreError>;
}

#[async_trait]
pub trait ApplicationLister: Send + Sync {
    async fn get_application(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<Application>>;
}

#[async_trait]
pub trait ProjectLookup: Send + Sync {
    async fn get_project(&self, name: &str) -> anyhow::Result<Option<Project>>;
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and apply pending migrations
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        tracing::info!("Database migrations applied");
        Ok(Self { pool })
    }
}

#[async_trait]
impl RepositoryStore for PgStore {
    async fn list_repositories(&self, scope: RepoScope) -> Result<Vec<Repository>, StoreError> {
        Ok(repositories::list(&self.pool, scope).await?)
    }

    async fn list_helm_repositories(&self) -> Result<Vec<Repository>, StoreError> {
        Ok(repositories::list_by_type(&self.pool, RepoScope::Read, "helm").await?)
    }

    async fn get_repository(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
    ) -> Result<Repository, StoreError> {
        repositories::find(&self.pool, scope, url, project)
            .await?
            .ok_or_else(|| StoreError::NotFound(url.to_string()))
    }

    async fn create_repository(
        &self,
        scope: RepoScope,
        repo: &Repository,
    ) -> Result<Repository, StoreError> {
        repositories::insert(&self.pool, scope, repo)
            .await?
            .ok_or_else(|| StoreError::AlreadyExists(repo.repo.clone()))
    }

    async fn update_repository(
        &self,
        scope: RepoScope,
        repo: &Repository,
    ) -> Result<Repository, StoreError> {
        repositories::update(&self.pool, scope, repo)
            .await?
            .ok_or_else(|| StoreError::NotFound(repo.repo.clone()))
    }

    async fn delete_repository(
        &self,
        scope: RepoScope,
        url: &str,
        project: &str,
    ) -> Result<(), StoreError> {
        if repositories::delete(&self.pool, scope, url, project).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(url.to_string()))
        }
    }

    async fn get_repository_credentials(
        &self,
        url: &str,
    ) -> Result<Option<RepoCredentials>, StoreError> {
        Ok(repo_credentials::find_for_url(&self.pool, url).await?)
    }
}

#[async_trait]
impl ApplicationLister for PgStore {
    async fn get_application(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<Application>> {
        applications::find(&self.pool, namespace, name).await
    }
}

#[async_trait]
impl ProjectLookup for PgStore {
    async fn get_project(&self, name: &str) -> anyhow::Result<Option<Project>> {
        projects::find_by_name(&self.pool, name).await
    }
}
