use super::Principal;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by caller tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user or service identity)
    pub sub: String,
    /// Groups the subject belongs to, used by `group:` policy subjects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    /// Expiration timestamp
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT secret must not be empty")]
    EmptySecret,
    #[error("Invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// HS256 validator for caller tokens
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// Create a validator for the shared secret, optionally pinning the issuer
    pub fn new(secret: &str, issuer: Option<&str>) -> Result<Self, JwtError> {
        if secret.is_empty() {
            return Err(JwtError::EmptySecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn validate(&self, token: &str) -> Result<Principal, JwtError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;
        Ok(Principal {
            subject: claims.sub,
            groups: claims.groups.unwrap_or_default(),
        })
    }
}
