use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::application::models::Application;
use crate::project::Project;
use crate::repository::models::{RepoCredentials, Repository};

/// Row of the `repositories` table; the record itself is stored as JSONB
#[derive(Debug, FromRow)]
pub struct RepositoryRow {
    pub scope: String,
    pub normalized_url: String,
    pub project: String,
    pub record: Json<Repository>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct RepoCredentialsRow {
    pub normalized_url: String,
    pub record: Json<RepoCredentials>,
}

#[derive(Debug, FromRow)]
pub struct ApplicationRow {
    pub namespace: String,
    pub name: String,
    pub record: Json<Application>,
}

#[derive(Debug, FromRow)]
pub struct ProjectRow {
    pub name: String,
    pub record: Json<Project>,
}
