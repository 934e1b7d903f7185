use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RepoServerError {
    /// The repository's credentials cannot be used as configured (bad key
    /// format, unsupported combination). Details may contain secrets.
    #[error("credentials configuration error: {0}")]
    CredentialsConfiguration(String),
    #[error("repo-server unreachable: {0}")]
    Unreachable(String),
    #[error("repo-server request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message}")]
    Server { status: StatusCode, message: String },
}

impl RepoServerError {
    pub fn is_credentials_configuration(&self) -> bool {
        matches!(self, RepoServerError::CredentialsConfiguration(_))
    }
}
