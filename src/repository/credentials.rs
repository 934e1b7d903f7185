//! Credential resolution for repository records
//!
//! [`derive_credentials`] is the only place that decides which secret a
//! repository presents. Everything downstream works with the resulting
//! [`CredentialSet`].

use super::models::{RepoCredentials, Repository, DEFAULT_REPO_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport-ready secret bundle. Exactly one kind per resolution.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialSet {
    None,
    UsernamePassword {
        username: String,
        password: String,
    },
    BearerToken {
        token: String,
    },
    SshKey {
        private_key: String,
    },
    GitHubApp {
        app_id: i64,
        installation_id: i64,
        private_key: String,
        enterprise_base_url: String,
    },
    GoogleCloudServiceAccount {
        service_account_key: String,
    },
}

impl CredentialSet {
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialSet::None => "none",
            CredentialSet::UsernamePassword { .. } => "username_password",
            CredentialSet::BearerToken { .. } => "bearer_token",
            CredentialSet::SshKey { .. } => "ssh_key",
            CredentialSet::GitHubApp { .. } => "github_app",
            CredentialSet::GoogleCloudServiceAccount { .. } => "google_cloud_service_account",
        }
    }
}

// Secrets never reach logs through `{:?}`
impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSet::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            CredentialSet::GitHubApp {
                app_id,
                installation_id,
                enterprise_base_url,
                ..
            } => f
                .debug_struct("GitHubApp")
                .field("app_id", app_id)
                .field("installation_id", installation_id)
                .field("enterprise_base_url", enterprise_base_url)
                .field("private_key", &"<redacted>")
                .finish(),
            other => write!(f, "{}(<redacted>)", other.kind()),
        }
    }
}

/// Resolve the credentials a repository presents.
///
/// Precedence is fixed: username/password, bearer token, SSH key, GitHub App,
/// Google Cloud service account. The first populated kind wins no matter what
/// else the record carries.
pub fn derive_credentials(record: Option<&Repository>) -> CredentialSet {
    let Some(repo) = record else {
        return CredentialSet::None;
    };

    if !repo.username.is_empty() || !repo.password.is_empty() {
        CredentialSet::UsernamePassword {
            username: repo.username.clone(),
            password: repo.password.clone(),
        }
    } else if !repo.bearer_token.is_empty() {
        CredentialSet::BearerToken {
            token: repo.bearer_token.clone(),
        }
    } else if !repo.ssh_private_key.is_empty() {
        CredentialSet::SshKey {
            private_key: repo.ssh_private_key.clone(),
        }
    } else if !repo.github_app_private_key.is_empty() {
        CredentialSet::GitHubApp {
            app_id: repo.github_app_id,
            installation_id: repo.github_app_installation_id,
            private_key: repo.github_app_private_key.clone(),
            enterprise_base_url: repo.github_app_enterprise_base_url.clone(),
        }
    } else if !repo.gcp_service_account_key.is_empty() {
        CredentialSet::GoogleCloudServiceAccount {
            service_account_key: repo.gcp_service_account_key.clone(),
        }
    } else {
        CredentialSet::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialValidationError {
    #[error("only --bearer-token or --password is allowed, not both")]
    TokenAndPassword,
    #[error("--bearer-token is only supported for HTTPS repositories")]
    TokenRequiresHttps,
}

/// A bearer token and a password are mutually exclusive
pub fn validate_bearer_token_and_password(
    bearer_token: &str,
    password: &str,
) -> Result<(), CredentialValidationError> {
    if !bearer_token.is_empty() && !password.is_empty() {
        return Err(CredentialValidationError::TokenAndPassword);
    }
    Ok(())
}

/// Bearer tokens are an HTTPS-only transport credential
pub fn validate_bearer_token_for_https_only(
    bearer_token: &str,
    is_https: bool,
) -> Result<(), CredentialValidationError> {
    if !bearer_token.is_empty() && !is_https {
        return Err(CredentialValidationError::TokenRequiresHttps);
    }
    Ok(())
}

pub fn is_https_url(url: &str) -> bool {
    url.trim()
        .get(..8)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
}

impl Repository {
    /// Whether the record carries any credential of its own
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
            || !self.password.is_empty()
            || !self.bearer_token.is_empty()
            || !self.ssh_private_key.is_empty()
            || !self.tls_client_cert_data.is_empty()
            || !self.github_app_private_key.is_empty()
            || !self.gcp_service_account_key.is_empty()
            || self.use_azure_workload_identity
    }

    pub fn is_https(&self) -> bool {
        is_https_url(&self.repo)
    }

    /// Reject ambiguous or transport-incompatible credential combinations
    pub fn validate_credentials(&self) -> Result<(), CredentialValidationError> {
        validate_bearer_token_and_password(&self.bearer_token, &self.password)?;
        validate_bearer_token_for_https_only(&self.bearer_token, self.is_https())
    }

    /// Fill empty credential fields from a template
    pub fn copy_credentials_from(&mut self, template: &RepoCredentials) {
        fn fill(target: &mut String, source: &str) {
            if target.is_empty() {
                *target = source.to_string();
            }
        }

        fill(&mut self.username, &template.username);
        fill(&mut self.password, &template.password);
        fill(&mut self.bearer_token, &template.bearer_token);
        fill(&mut self.ssh_private_key, &template.ssh_private_key);
        fill(&mut self.tls_client_cert_data, &template.tls_client_cert_data);
        fill(&mut self.tls_client_cert_key, &template.tls_client_cert_key);
        fill(&mut self.github_app_private_key, &template.github_app_private_key);
        fill(
            &mut self.github_app_enterprise_base_url,
            &template.github_app_enterprise_base_url,
        );
        fill(&mut self.gcp_service_account_key, &template.gcp_service_account_key);
        fill(&mut self.proxy, &template.proxy);
        fill(&mut self.no_proxy, &template.no_proxy);
        if self.github_app_id == 0 {
            self.github_app_id = template.github_app_id;
        }
        if self.github_app_installation_id == 0 {
            self.github_app_installation_id = template.github_app_installation_id;
        }
        if self.repo_type.is_empty() && !template.repo_type.is_empty() {
            self.repo_type = template.repo_type.clone();
        }
        self.enable_oci |= template.enable_oci;
        self.force_http_basic_auth |= template.force_http_basic_auth;
        self.use_azure_workload_identity |= template.use_azure_workload_identity;
        self.inherited_creds = true;
    }

    /// Fill in the defaulted `type`
    pub fn normalize(mut self) -> Self {
        if self.repo_type.is_empty() {
            self.repo_type = DEFAULT_REPO_TYPE.to_string();
        }
        self
    }
}
