//! Database connection and schema migrations.

use thiserror::Error;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

/// Key of the advisory lock held while migrating, so concurrently starting
/// instances don't race.
const MIGRATION_LOCK_ID: i64 = 1;

/// Migrations embedded in the binary, applied in order.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    1,
    "init",
    include_str!("../migrations/0001_init.sql"),
)];

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("failed to acquire migration lock: {0}")]
    Lock(#[source] tokio_postgres::Error),
    #[error("failed to apply migration {version} ({name}): {source}")]
    Apply {
        version: i64,
        name: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
}

/// Connect to Postgres, driving the connection on a background task.
pub async fn connect(url: &str) -> Result<Client, tokio_postgres::Error> {
    let (client, connection) = tokio_postgres::connect(url, NoTls).await?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("database connection error: {}", e);
        }
    });

    Ok(client)
}

/// Apply every migration that hasn't been applied yet.
pub async fn migrate(client: &mut Client) -> Result<(), MigrateError> {
    client
        .execute("SELECT pg_advisory_lock($1)", &[&MIGRATION_LOCK_ID])
        .await
        .map_err(MigrateError::Lock)?;

    let result = apply_pending(client).await;

    if let Err(e) = client
        .execute("SELECT pg_advisory_unlock($1)", &[&MIGRATION_LOCK_ID])
        .await
    {
        error!("failed to release migration lock: {}", e);
    }

    result
}

async fn apply_pending(client: &mut Client) -> Result<(), MigrateError> {
    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version BIGINT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .await?;

    let applied: Vec<i64> = client
        .query("SELECT version FROM schema_migrations", &[])
        .await?
        .iter()
        .map(|row| row.try_get(0))
        .collect::<Result<_, _>>()?;

    let pending: Vec<_> = MIGRATIONS
        .iter()
        .filter(|(version, _, _)| !applied.contains(version))
        .collect();

    if pending.is_empty() {
        info!("no migrations required");
        return Ok(());
    }

    for &(version, name, sql) in pending {
        let apply_err = |source| MigrateError::Apply {
            version,
            name,
            source,
        };

        let tx = client.transaction().await?;
        tx.batch_execute(sql).await.map_err(apply_err)?;
        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES ($1)",
            &[&version],
        )
        .await
        .map_err(apply_err)?;
        tx.commit().await.map_err(apply_err)?;

        info!(version, name, "applied migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|(v, _, _)| *v).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();

        assert_eq!(versions, sorted);
        assert!(MIGRATIONS.iter().all(|(_, _, sql)| !sql.trim().is_empty()));
    }
}
