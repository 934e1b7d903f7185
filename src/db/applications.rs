use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::application::models::Application;
use crate::db::models::ApplicationRow;

/// Get an application by namespace and name
pub async fn find(pool: &PgPool, namespace: &str, name: &str) -> Result<Option<Application>> {
    let row = sqlx::query_as::<_, ApplicationRow>(
        "SELECT namespace, name, record FROM applications WHERE namespace = $1 AND name = $2",
    )
    .bind(namespace)
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("Failed to get application")?;

    Ok(row.map(|row| {
        let mut app = row.record.0;
        app.namespace = row.namespace;
        app.name = row.name;
        app
    }))
}
