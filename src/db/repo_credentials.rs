use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::db::models::RepoCredentialsRow;
use crate::repository::models::RepoCredentials;
use crate::repository::resolver::normalize_url;

/// Find the credential template with the longest URL prefix matching `url`
pub async fn find_for_url(pool: &PgPool, url: &str) -> Result<Option<RepoCredentials>> {
    let row = sqlx::query_as::<_, RepoCredentialsRow>(
        r#"
        SELECT normalized_url, record
        FROM repository_credentials
        WHERE starts_with($1, normalized_url)
        ORDER BY length(normalized_url) DESC
        LIMIT 1
        "#,
    )
    .bind(normalize_url(url))
    .fetch_optional(pool)
    .await
    .context("Failed to find repository credentials")?;

    Ok(row.map(|row| row.record.0))
}

