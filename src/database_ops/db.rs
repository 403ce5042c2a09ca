use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::util::env::env_flag;

const MIGRATIONS_DIR: &str = "./migrations";

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("invalid database URL")?;
        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connecting to postgres")?;
        info!(max_connections, "connected to db");

        let db = Self { pool };
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            db.migrate().await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(db)
    }

    /// Apply pending `NNNN_description.sql` files from `./migrations`, in version order.
    pub async fn migrate(&self) -> Result<usize> {
        run_migrations(&self.pool, Path::new(MIGRATIONS_DIR)).await
    }
}

async fn run_migrations(pool: &PgPool, dir: &Path) -> Result<usize> {
    if !dir.exists() {
        info!(dir = %dir.display(), "no migrations directory");
        return Ok(0);
    }
    // raw_sql keeps these off the prepared-statement path
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
            version BIGINT PRIMARY KEY,
            description TEXT,
            installed_at TIMESTAMPTZ DEFAULT now()
         )",
    )
    .execute(pool)
    .await?;

    let mut applied: HashSet<i64> = HashSet::new();
    for row in sqlx::raw_sql("SELECT version FROM _sqlx_migrations")
        .fetch_all(pool)
        .await?
    {
        applied.insert(row.try_get::<i64, _>(0)?);
    }

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some((version, desc)) = migration_version(name) {
            candidates.push((version, desc, path));
        }
    }
    candidates.sort_by_key(|(v, _, _)| *v);

    let mut count = 0;
    for (version, desc, path) in candidates {
        if !applied.insert(version) {
            continue;
        }
        apply(pool, version, &desc, &path).await?;
        count += 1;
    }
    info!(applied = count, "migrations up-to-date");
    Ok(count)
}

async fn apply(pool: &PgPool, version: i64, desc: &str, path: &Path) -> Result<()> {
    let sql = std::fs::read_to_string(path)
        .with_context(|| format!("reading migration {}", path.display()))?;
    info!(version, file = ?path, "applying migration");
    let mut tx = pool.begin().await?;
    sqlx::raw_sql(&sql).execute(&mut *tx).await?;
    sqlx::query("INSERT INTO _sqlx_migrations (version, description) VALUES ($1, $2)")
        .bind(version)
        .bind(desc)
        .persistent(false)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// `0001_steam_pulse_schema.sql` -> `(1, "steam_pulse_schema")`; anything else is ignored.
fn migration_version(file_name: &str) -> Option<(i64, String)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (num, desc) = stem.split_once('_')?;
    if num.is_empty() || !num.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((num.parse().ok()?, desc.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_file_names() {
        assert_eq!(
            migration_version("0001_steam_pulse_schema.sql"),
            Some((1, "steam_pulse_schema".to_string()))
        );
        assert_eq!(migration_version("database_settings.sql"), None);
        assert_eq!(migration_version("0002_notes.txt"), None);
        assert_eq!(migration_version("0003.sql"), None);
    }
}
