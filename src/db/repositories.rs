use anyhow::{Context, Result};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::db::models::RepositoryRow;
use crate::db::RepoScope;
use crate::repository::models::Repository;
use crate::repository::resolver::normalize_url;

/// List all repositories of a scope, oldest first
pub async fn list(pool: &PgPool, scope: RepoScope) -> Result<Vec<Repository>> {
    let rows = sqlx::query_as::<_, RepositoryRow>(
        r#"
        SELECT scope, normalized_url, project, record, created_at, updated_at
        FROM repositories
        WHERE scope = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(scope.as_str())
    .fetch_all(pool)
    .await
    .context("Failed to list repositories")?;

    Ok(rows.into_iter().map(|row| row.record.0).collect())
}

/// List repositories of the given type
pub async fn list_by_type(
    pool: &PgPool,
    scope: RepoScope,
    repo_type: &str,
) -> Result<Vec<Repository>> {
    let rows = sqlx::query_as::<_, RepositoryRow>(
        r#"
        SELECT scope, normalized_url, project, record, created_at, updated_at
        FROM repositories
        WHERE scope = $1 AND record->>'type' = $2
        ORDER BY created_at ASC
        "#,
    )
    .bind(scope.as_str())
    .bind(repo_type)
    .fetch_all(pool)
    .await
    .context("Failed to list repositories by type")?;

    Ok(rows.into_iter().map(|row| row.record.0).collect())
}

/// Find a repository by URL and project
pub async fn find(
    pool: &PgPool,
    scope: RepoScope,
    url: &str,
    project: &str,
) -> Result<Option<Repository>> {
    let row = sqlx::query_as::<_, RepositoryRow>(
        r#"
        SELECT scope, normalized_url, project, record, created_at, updated_at
        FROM repositories
        WHERE scope = $1 AND normalized_url = $2 AND project = $3
        "#,
    )
    .bind(scope.as_str())
    .bind(normalize_url(url))
    .bind(project)
    .fetch_optional(pool)
    .await
    .context("Failed to find repository")?;

    Ok(row.map(|row| row.record.0))
}

/// Insert a repository unless one with the same key exists.
///
/// Returns `None` when the key was already taken.
pub async fn insert(
    pool: &PgPool,
    scope: RepoScope,
    repo: &Repository,
) -> Result<Option<Repository>> {
    let row = sqlx::query_as::<_, RepositoryRow>(
        r#"
        INSERT INTO repositories (scope, normalized_url, project, record)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (scope, normalized_url, project) DO NOTHING
        RETURNING scope, normalized_url, project, record, created_at, updated_at
        "#,
    )
    .bind(scope.as_str())
    .bind(normalize_url(&repo.repo))
    .bind(&repo.project)
    .bind(Json(repo))
    .fetch_optional(pool)
    .await
    .context("Failed to insert repository")?;

    Ok(row.map(|row| row.record.0))
}

/// Replace the stored record. Returns `None` if no record has this key.
pub async fn update(
    pool: &PgPool,
    scope: RepoScope,
    repo: &Repository,
) -> Result<Option<Repository>> {
    let row = sqlx::query_as::<_, RepositoryRow>(
        r#"
        UPDATE repositories
        SET record = $4, updated_at = NOW()
        WHERE scope = $1 AND normalized_url = $2 AND project = $3
        RETURNING scope, normalized_url, project, record, created_at, updated_at
        "#,
    )
    .bind(scope.as_str())
    .bind(normalize_url(&repo.repo))
    .bind(&repo.project)
    .bind(Json(repo))
    .fetch_optional(pool)
    .await
    .context("Failed to update repository")?;

    Ok(row.map(|row| row.record.0))
}

/// Delete a repository. Returns whether a row was removed.
pub async fn delete(pool: &PgPool, scope: RepoScope, url: &str, project: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM repositories
        WHERE scope = $1 AND normalized_url = $2 AND project = $3
        "#,
    )
    .bind(scope.as_str())
    .bind(normalize_url(url))
    .bind(project)
    .execute(pool)
    .await
    .context("Failed to delete repository")?;

    Ok(result.rows_affected() > 0)
}
