use crate::application::models::ApplicationSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository type assumed when a record does not name one
pub const DEFAULT_REPO_TYPE: &str = "git";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Successful,
    Failed,
}

/// Outcome of the most recent reachability probe for a repository
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub fn successful(at: DateTime<Utc>) -> Self {
        Self {
            status: ConnectionStatus::Successful,
            message: String::new(),
            modified_at: Some(at),
        }
    }

    pub fn failed(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: ConnectionStatus::Failed,
            message: message.into(),
            modified_at: Some(at),
        }
    }
}

/// A configured source location (git, helm or OCI) plus the credentials used to reach it.
///
/// The natural key is `(normalized repo URL, project)`; an empty project means
/// the record is globally visible.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Repository {
    pub repo: String,
    #[serde(rename = "type")]
    pub repo_type: String,
    pub name: String,
    pub project: String,
    pub username: String,
    pub password: String,
    pub bearer_token: String,
    pub ssh_private_key: String,
    pub insecure: bool,
    pub enable_lfs: bool,
    pub tls_client_cert_data: String,
    pub tls_client_cert_key: String,
    pub enable_oci: bool,
    pub insecure_oci_force_http: bool,
    pub github_app_private_key: String,
    pub github_app_id: i64,
    pub github_app_installation_id: i64,
    pub github_app_enterprise_base_url: String,
    pub gcp_service_account_key: String,
    pub proxy: String,
    pub no_proxy: String,
    pub force_http_basic_auth: bool,
    pub use_azure_workload_identity: bool,
    /// Set when credentials were filled in from a credential template
    pub inherited_creds: bool,
    pub connection_state: ConnectionState,
}

impl Repository {
    /// Strip every credential field
    pub fn view(&self) -> RepositoryView {
        RepositoryView {
            repo: self.repo.clone(),
            repo_type: self.repo_type.clone(),
            name: self.name.clone(),
            project: self.project.clone(),
            insecure: self.insecure,
            enable_lfs: self.enable_lfs,
            enable_oci: self.enable_oci,
            proxy: self.proxy.clone(),
            no_proxy: self.no_proxy.clone(),
            force_http_basic_auth: self.force_http_basic_auth,
            inherited_creds: self.inherited_creds,
            github_app_id: self.github_app_id,
            github_app_installation_id: self.github_app_installation_id,
            github_app_enterprise_base_url: self.github_app_enterprise_base_url.clone(),
            use_azure_workload_identity: self.use_azure_workload_identity,
            connection_state: self.connection_state.clone(),
        }
    }

    pub fn summary(&self) -> RepositorySummary {
        RepositorySummary {
            repo: self.repo.clone(),
            repo_type: self.repo_type.clone(),
            name: self.name.clone(),
        }
    }
}

/// Shared credential template, applied to repositories whose URL starts with `url`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoCredentials {
    pub url: String,
    #[serde(rename = "type")]
    pub repo_type: String,
    pub username: String,
    pub password: String,
    pub bearer_token: String,
    pub ssh_private_key: String,
    pub tls_client_cert_data: String,
    pub tls_client_cert_key: String,
    pub github_app_private_key: String,
    pub github_app_id: i64,
    pub github_app_installation_id: i64,
    pub github_app_enterprise_base_url: String,
    pub gcp_service_account_key: String,
    pub proxy: String,
    pub no_proxy: String,
    pub enable_oci: bool,
    pub force_http_basic_auth: bool,
    pub use_azure_workload_identity: bool,
}

/// Public-safe projection of a repository, used for list and get responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryView {
    pub repo: String,
    #[serde(rename = "type")]
    pub repo_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
    pub insecure: bool,
    pub enable_lfs: bool,
    pub enable_oci: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub no_proxy: String,
    pub force_http_basic_auth: bool,
    pub inherited_creds: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub github_app_id: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub github_app_installation_id: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub github_app_enterprise_base_url: String,
    pub use_azure_workload_identity: bool,
    pub connection_state: ConnectionState,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// What create and update hand back: never any credential material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub repo: String,
    #[serde(rename = "type")]
    pub repo_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryList {
    pub items: Vec<RepositoryView>,
}

/// Empty acknowledgement for delete and validate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoResponse {}

/// Selects repositories by URL (and project, when ambiguous)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepoQuery {
    pub repo: String,
    pub force_refresh: bool,
    pub app_project: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoCreateRequest {
    pub repo: Option<Repository>,
    #[serde(default)]
    pub upsert: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpsertParams {
    pub upsert: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoUpdateRequest {
    pub repo: Option<Repository>,
}

/// Ad-hoc connection check with caller-supplied credentials
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepoAccessQuery {
    pub repo: String,
    #[serde(rename = "type")]
    pub repo_type: String,
    pub name: String,
    pub project: String,
    pub username: String,
    pub password: String,
    pub bearer_token: String,
    pub ssh_private_key: String,
    pub insecure: bool,
    pub tls_client_cert_data: String,
    pub tls_client_cert_key: String,
    pub enable_oci: bool,
    pub insecure_oci_force_http: bool,
    pub github_app_private_key: String,
    pub github_app_id: i64,
    pub github_app_installation_id: i64,
    pub github_app_enterprise_base_url: String,
    pub gcp_service_account_key: String,
    pub proxy: String,
    pub no_proxy: String,
    pub use_azure_workload_identity: bool,
}

impl RepoAccessQuery {
    pub fn into_repository(self) -> Repository {
        Repository {
            repo: self.repo,
            repo_type: self.repo_type,
            name: self.name,
            project: self.project,
            username: self.username,
            password: self.password,
            bearer_token: self.bearer_token,
            ssh_private_key: self.ssh_private_key,
            insecure: self.insecure,
            tls_client_cert_data: self.tls_client_cert_data,
            tls_client_cert_key: self.tls_client_cert_key,
            enable_oci: self.enable_oci,
            insecure_oci_force_http: self.insecure_oci_force_http,
            github_app_private_key: self.github_app_private_key,
            github_app_id: self.github_app_id,
            github_app_installation_id: self.github_app_installation_id,
            github_app_enterprise_base_url: self.github_app_enterprise_base_url,
            gcp_service_account_key: self.gcp_service_account_key,
            proxy: self.proxy,
            no_proxy: self.no_proxy,
            use_azure_workload_identity: self.use_azure_workload_identity,
            ..Default::default()
        }
    }
}

/// App discovery within a repository
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepoAppsQuery {
    pub repo: String,
    pub revision: String,
    pub app_name: String,
    pub app_project: String,
}

/// Parameter disclosure for one source of an application
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepoAppDetailsQuery {
    pub source: Option<ApplicationSource>,
    pub app_name: String,
    pub app_project: String,
    /// Position of `source` within a multi-source application
    pub source_index: i32,
    /// History entry id the source was taken from (multi-source applications)
    pub version_id: i32,
}
