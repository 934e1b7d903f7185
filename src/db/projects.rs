use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::db::models::ProjectRow;
use crate::project::Project;

/// Get a project by name
pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Project>> {
    let row = sqlx::query_as::<_, ProjectRow>("SELECT name, record FROM projects WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("Failed to get project by name")?;

    Ok(row.map(|row| {
        let mut project = row.record.0;
        project.name = row.name;
        project
    }))
}
