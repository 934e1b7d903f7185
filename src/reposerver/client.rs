use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use super::models::{
    AppDetailsRequest, AppList, ErrorBody, HelmCharts, ListAppsRequest, Refs, RepoAppDetails,
    RepositoryRequest,
};
use super::{RepoServer, RepoServerError, RepoTester};
use crate::repository::models::Repository;
use crate::settings::RepoServerSettings;

/// HTTP client for a remote repo-server
#[derive(Clone)]
pub struct RemoteRepoServer {
    http_client: Client,
    base_url: String,
}

impl RemoteRepoServer {
    pub fn new(settings: &RepoServerSettings) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build repo-server HTTP client")?;

        Ok(Self {
            http_client,
            base_url: settings.url.trim_end_matches('/').to_string(),
        })
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, RepoServerError> {
        let url = format!("{}/api/v1/{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    RepoServerError::Unreachable(e.to_string())
                } else {
                    RepoServerError::Transport(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY && body.kind == "credentials_configuration" {
            return Err(RepoServerError::CredentialsConfiguration(body.message));
        }

        let message = if body.message.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        } else {
            body.message
        };
        tracing::debug!(%url, %status, "repo-server returned an error");
        Err(RepoServerError::Server { status, message })
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, RepoServerError> {
        Ok(self.send(path, body).await?.json().await?)
    }
}

#[async_trait]
impl RepoTester for RemoteRepoServer {
    async fn test_repository(&self, repo: &Repository) -> Result<(), RepoServerError> {
        self.send(
            "repository/test",
            &RepositoryRequest {
                repo: repo.into(),
            },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RepoServer for RemoteRepoServer {
    async fn list_refs(&self, repo: &Repository) -> Result<Refs, RepoServerError> {
        self.post(
            "repository/refs",
            &RepositoryRequest {
                repo: repo.into(),
            },
        )
        .await
    }

    async fn list_oci_tags(&self, repo: &Repository) -> Result<Refs, RepoServerError> {
        self.post(
            "repository/oci-tags",
            &RepositoryRequest {
                repo: repo.into(),
            },
        )
        .await
    }

    async fn list_apps(
        &self,
        repo: &Repository,
        revision: &str,
    ) -> Result<AppList, RepoServerError> {
        self.post(
            "repository/apps",
            &ListAppsRequest {
                repo: repo.into(),
                revision: revision.to_string(),
            },
        )
        .await
    }

    async fn get_app_details(
        &self,
        request: AppDetailsRequest,
    ) -> Result<RepoAppDetails, RepoServerError> {
        self.post("repository/appdetails", &request).await
    }

    async fn get_helm_charts(&self, repo: &Repository) -> Result<HelmCharts, RepoServerError> {
        self.post(
            "repository/helmcharts",
            &RepositoryRequest {
                repo: repo.into(),
            },
        )
        .await
    }
}
