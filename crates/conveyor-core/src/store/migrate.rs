//! Database migration system
//!
//! Runs schema migrations on startup and tracks applied versions in a
//! `_migrations` table.

use sqlx::{PgPool, Row};
use tracing::info;

use crate::Result;

/// Migration record tracking applied migrations
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub applied_at: chrono::DateTime<chrono::Utc>,
}

/// Database migration manager
pub struct Migrator {
    pool: PgPool,
}

impl Migrator {
    /// Create a new migrator instance
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize migration tracking table
    async fn init_migration_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get list of applied migrations
    pub async fn applied(&self) -> Result<Vec<Migration>> {
        self.init_migration_table().await?;

        let rows =
            sqlx::query(r#"SELECT version, name, applied_at FROM _migrations ORDER BY version"#)
                .fetch_all(&self.pool)
                .await?;

        let migrations = rows
            .into_iter()
            .map(|row| Migration {
                version: row.get("version"),
                name: row.get("name"),
                applied_at: row.get("applied_at"),
            })
            .collect();

        Ok(migrations)
    }

    /// Run all pending migrations
    pub async fn migrate(&self) -> Result<()> {
        self.init_migration_table().await?;

        let applied = self.applied().await?;
        info!("Found {} applied migrations", applied.len());

        let migrations = vec![(
            1i64,
            "initial_schema",
            include_str!("../../migrations/001_initial_schema.sql"),
        )];

        for (version, name, sql) in migrations {
            if applied.iter().any(|m| m.version == version) {
                continue;
            }

            // One transaction per migration; the advisory lock keeps
            // concurrent migrators from racing the DDL
            let mut tx = self.pool.begin().await?;
            sqlx::query(r#"SELECT pg_advisory_xact_lock(727421)"#)
                .execute(&mut *tx)
                .await?;

            let already_applied: Option<i64> =
                sqlx::query_scalar(r#"SELECT version FROM _migrations WHERE version = $1"#)
                    .bind(version)
                    .fetch_optional(&mut *tx)
                    .await?;
            if already_applied.is_some() {
                continue;
            }

            info!("Applying migration {}: {}", version, name);
            sqlx::raw_sql(sql).execute(&mut *tx).await?;
            sqlx::query(
                r#"INSERT INTO _migrations (version, name) VALUES ($1, $2) ON CONFLICT DO NOTHING"#,
            )
            .bind(version)
            .bind(name)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }

        Ok(())
    }
}
