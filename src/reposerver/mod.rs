//! Client side of the repo-server, the component that actually talks to git,
//! helm and OCI registries.

pub mod client;
pub mod error;
pub mod models;

use async_trait::async_trait;

use crate::repository::models::Repository;
pub use client::RemoteRepoServer;
pub use error::RepoServerError;
use models::{AppDetailsRequest, AppList, HelmCharts, Refs, RepoAppDetails};

/// Probes whether a repository is reachable with its credentials
#[async_trait]
pub trait RepoTester: Send + Sync {
    async fn test_repository(&self, repo: &Repository) -> Result<(), RepoServerError>;
}

/// Discovery operations against a repository
#[async_trait]
pub trait RepoServer: Send + Sync {
    async fn list_refs(&self, repo: &Repository) -> Result<Refs, RepoServerError>;

    async fn list_oci_tags(&self, repo: &Repository) -> Result<Refs, RepoServerError>;

    async fn list_apps(&self, repo: &Repository, revision: &str)
        -> Result<AppList, RepoServerError>;

    async fn get_app_details(
        &self,
        request: AppDetailsRequest,
    ) -> Result<RepoAppDetails, RepoServerError>;

    async fn get_helm_charts(&self, repo: &Repository) -> Result<HelmCharts, RepoServerError>;
}
