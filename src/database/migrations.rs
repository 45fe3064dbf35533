//! # Database Migration System
//!
//! Applies the SQL files under `migrations/` in version order and records each
//! applied version in `run_engine_schema_migrations`.
//!
//! ## Concurrency Control
//!
//! Every runner takes the same session-level advisory lock on a dedicated
//! connection before reading the tracking table, so parallel test binaries and
//! rolling deploys apply each migration exactly once:
//!
//! ```sql
//! SELECT pg_advisory_lock(7264913058)
//! ```
//!
//! ## Migration Discovery
//!
//! Files follow `YYYYMMDDHHMMSS_description.sql`. Anything else in the
//! directory is ignored.

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MIGRATION_LOCK_KEY: i64 = 7_264_913_058;

/// Represents a single database migration file.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: String,
    /// Human-readable migration name
    pub name: String,
    /// Full path to the SQL file
    pub path: PathBuf,
}

/// Manages database schema migrations with concurrency safety.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Migrations shipped with this crate.
    pub fn default_directory() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations")
    }

    /// Apply every outstanding migration from [`default_directory`](Self::default_directory).
    pub async fn run_all(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        Self::run_from_directory(pool, &Self::default_directory()).await
    }

    /// Apply outstanding migrations from `directory`. Returns the versions applied.
    pub async fn run_from_directory(
        pool: &PgPool,
        directory: &Path,
    ) -> Result<Vec<String>, sqlx::Error> {
        let migrations = Self::discover_migrations(directory)?;
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::apply_outstanding(&mut conn, &migrations).await;

        // Always release the lock
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn apply_outstanding(
        conn: &mut PoolConnection<Postgres>,
        migrations: &BTreeMap<String, Migration>,
    ) -> Result<Vec<String>, sqlx::Error> {
        Self::ensure_migration_table(conn).await?;
        let applied_migrations = Self::get_applied_migrations(conn).await?;

        let mut applied = Vec::new();
        for migration in migrations.values() {
            if applied_migrations.contains(&migration.version) {
                debug!(version = %migration.version, "Migration already applied");
                continue;
            }

            info!(
                version = %migration.version,
                name = %migration.name,
                "Applying migration"
            );
            let sql = fs::read_to_string(&migration.path).map_err(sqlx::Error::Io)?;

            let mut tx = sqlx::Connection::begin(&mut **conn).await?;
            sqlx::raw_sql(&sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO run_engine_schema_migrations (version) VALUES ($1)")
                .bind(&migration.version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            applied.push(migration.version.clone());
        }

        Ok(applied)
    }

    /// Discover all migration files in `directory`
    pub fn discover_migrations(directory: &Path) -> Result<BTreeMap<String, Migration>, sqlx::Error> {
        if !directory.exists() {
            return Ok(BTreeMap::new());
        }

        let mut migrations = BTreeMap::new();

        for entry in fs::read_dir(directory).map_err(sqlx::Error::Io)? {
            let path = entry.map_err(sqlx::Error::Io)?.path();

            if !path.is_file() || path.extension().map(|s| s != "sql").unwrap_or(true) {
                continue;
            }
            let Some(filename) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some((version, name)) = Self::parse_migration_filename(filename) {
                migrations.insert(
                    version.clone(),
                    Migration {
                        version,
                        name,
                        path,
                    },
                );
            }
        }

        Ok(migrations)
    }

    /// Parse migration filename to extract version and name
    fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
        // At least 14 digits + underscore
        if filename.len() < 15 || !filename.is_char_boundary(14) {
            return None;
        }

        let (version_part, name_part) = filename.split_at(14);
        if !version_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let name = name_part
            .strip_prefix('_')
            .unwrap_or(name_part)
            .replace('_', " ");

        Some((version_part.to_string(), name))
    }

    async fn ensure_migration_table(conn: &mut PoolConnection<Postgres>) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS run_engine_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&mut **conn)
        .await?;

        Ok(())
    }

    async fn get_applied_migrations(
        conn: &mut PoolConnection<Postgres>,
    ) -> Result<HashSet<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT version FROM run_engine_schema_migrations")
            .fetch_all(&mut **conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect())
    }
}
