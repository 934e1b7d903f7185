use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::application::models::ApplicationSource;
use crate::repository::credentials::{derive_credentials, CredentialSet};
use crate::repository::models::Repository;

/// What the repo-server needs to reach a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryTarget {
    pub repo: String,
    #[serde(rename = "type")]
    pub repo_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub enable_lfs: bool,
    #[serde(default)]
    pub enable_oci: bool,
    #[serde(default)]
    pub insecure_oci_force_http: bool,
    #[serde(default)]
    pub force_http_basic_auth: bool,
    #[serde(default)]
    pub use_azure_workload_identity: bool,
    #[serde(default)]
    pub proxy: String,
    #[serde(default)]
    pub no_proxy: String,
    #[serde(default)]
    pub tls_client_cert_data: String,
    #[serde(default)]
    pub tls_client_cert_key: String,
    pub credentials: CredentialSet,
}

impl From<&Repository> for RepositoryTarget {
    fn from(repo: &Repository) -> Self {
        Self {
            repo: repo.repo.clone(),
            repo_type: repo.repo_type.clone(),
            name: repo.name.clone(),
            project: repo.project.clone(),
            insecure: repo.insecure,
            enable_lfs: repo.enable_lfs,
            enable_oci: repo.enable_oci,
            insecure_oci_force_http: repo.insecure_oci_force_http,
            force_http_basic_auth: repo.force_http_basic_auth,
            use_azure_workload_identity: repo.use_azure_workload_identity,
            proxy: repo.proxy.clone(),
            no_proxy: repo.no_proxy.clone(),
            tls_client_cert_data: repo.tls_client_cert_data.clone(),
            tls_client_cert_key: repo.tls_client_cert_key.clone(),
            credentials: derive_credentials(Some(repo)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RepositoryRequest {
    pub repo: RepositoryTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Refs {
    pub branches: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListAppsRequest {
    pub repo: RepositoryTarget,
    pub revision: String,
}

/// An application discovered inside a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(rename = "type")]
    pub app_type: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppList {
    pub items: Vec<AppInfo>,
}

/// A source referenced as `$<name>` by another source of a multi-source application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefTarget {
    pub repo: RepositoryTarget,
    pub target_revision: String,
    #[serde(default)]
    pub chart: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppDetailsRequest {
    pub repo: RepositoryTarget,
    pub source: ApplicationSource,
    pub app_name: String,
    pub helm_repos: Vec<RepositoryTarget>,
    pub ref_sources: BTreeMap<String, RefTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmParameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmAppSpec {
    pub name: String,
    pub value_files: Vec<String>,
    pub parameters: Vec<HelmParameter>,
    pub values: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KustomizeAppSpec {
    pub images: Vec<String>,
}

/// Parameters the repo-server rendered for one application source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoAppDetails {
    #[serde(rename = "type")]
    pub app_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmAppSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kustomize: Option<KustomizeAppSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmChart {
    pub name: String,
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmCharts {
    pub items: Vec<HelmChart>,
}

/// Error body returned by the repo-server
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ErrorBody {
    pub kind: String,
    pub message: String,
}
