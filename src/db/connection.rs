//! Database connection management using sqlx (Postgres, MySQL) and rusqlite (SQLite)

use crate::error::{InsightError, Result};
use crate::schema::EngineType;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Connection handle for the active engine.
///
/// SQLite is opened per introspection on a blocking thread, so only the
/// database path is kept.
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(PathBuf),
}

impl DbPool {
    pub fn engine(&self) -> EngineType {
        match self {
            DbPool::Postgres(_) => EngineType::Postgres,
            DbPool::MySql(_) => EngineType::MySql,
            DbPool::Sqlite(_) => EngineType::Sqlite,
        }
    }
}

/// Initialize the connection pool for the given engine and run a probe query
pub async fn init_pool(engine: EngineType, database_url: &str) -> Result<DbPool> {
    let pool = match engine {
        EngineType::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(30))
                .connect(database_url)
                .await?;

            // Test the connection
            sqlx::query("SELECT 1").execute(&pool).await?;
            DbPool::Postgres(pool)
        }
        EngineType::MySql => {
            let pool = MySqlPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(30))
                .connect(database_url)
                .await?;

            sqlx::query("SELECT 1").execute(&pool).await?;
            DbPool::MySql(pool)
        }
        EngineType::Sqlite => {
            let path = sqlite_path(database_url)?;
            let probe = path.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                let conn = rusqlite::Connection::open_with_flags(
                    &probe,
                    rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_URI,
                )?;
                conn.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok(())
            })
            .await
            .map_err(|e| InsightError::Database(format!("SQLite probe task failed: {}", e)))??;
            DbPool::Sqlite(path)
        }
    };

    info!(engine = %engine, "Database connection established");
    Ok(pool)
}

/// Extract the file path from a `sqlite:` URL (or accept a bare path)
pub fn sqlite_path(database_url: &str) -> Result<PathBuf> {
    let raw = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let raw = raw.split('?').next().unwrap_or_default();

    if raw.is_empty() || raw == ":memory:" {
        return Err(InsightError::Config(format!(
            "SQLite URL '{}' does not name a database file",
            database_url
        )));
    }
    Ok(Path::new(raw).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_path_forms() {
        assert_eq!(sqlite_path("sqlite:///tmp/crm.db").unwrap(), PathBuf::from("/tmp/crm.db"));
        assert_eq!(sqlite_path("sqlite:crm.db?mode=ro").unwrap(), PathBuf::from("crm.db"));
        assert_eq!(sqlite_path("/var/data/crm.db").unwrap(), PathBuf::from("/var/data/crm.db"));
        assert!(sqlite_path("sqlite::memory:").is_err());
    }
}
