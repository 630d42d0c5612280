//! Runtime configuration
//!
//! Loaded from environment variables (a `.env` file is honoured by the
//! binary through `dotenv`). Every knob has a default except the database URL.

use crate::error::{InsightError, Result};
use crate::schema::EngineType;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightConfig {
    /// Connection URL for the analytics database
    pub database_url: String,

    /// Engine type; inferred from the URL scheme when not set explicitly
    pub engine: EngineType,

    /// Postgres namespace (or MySQL database) to introspect
    pub db_schema: Option<String>,

    /// How long an introspected schema stays fresh
    pub schema_ttl_secs: u64,

    /// Upper bound on a single catalog introspection
    pub refresh_timeout_secs: u64,

    /// Safety limit injected into unaggregated plans without a limit
    pub default_limit: u64,

    /// Explicit limits above this are clamped
    pub max_limit: u64,

    /// Row count for "top deals" style questions without an explicit N
    pub top_n: u64,

    /// Column that scopes rows to a tenant
    pub tenant_column: String,

    /// Curated business vocabulary (JSON)
    pub vocabulary_path: Option<PathBuf>,

    /// Declared entity models used when catalog introspection fails (JSON)
    pub model_registry_path: Option<PathBuf>,

    /// SQLite file holding learned synonyms
    pub learned_store_path: Option<PathBuf>,

    /// Minimum Jaro-Winkler similarity for fuzzy identifier matches
    pub fuzzy_threshold: f64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            engine: EngineType::Postgres,
            db_schema: None,
            schema_ttl_secs: 300,
            refresh_timeout_secs: 30,
            default_limit: 1000,
            max_limit: 10_000,
            top_n: 10,
            tenant_column: "tenant_id".to_string(),
            vocabulary_path: None,
            model_registry_path: None,
            learned_store_path: None,
            fuzzy_threshold: 0.92,
        }
    }
}

impl InsightConfig {
    /// Build configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| InsightError::Config("DATABASE_URL is not set".to_string()))?;

        let engine = match env::var("INSIGHT_DB_ENGINE") {
            Ok(value) if !value.trim().is_empty() => value.parse()?,
            _ => EngineType::from_url(&database_url)?,
        };

        let defaults = Self::default();
        let config = Self {
            database_url,
            engine,
            db_schema: optional_var("INSIGHT_DB_SCHEMA"),
            schema_ttl_secs: parse_env_var("INSIGHT_SCHEMA_TTL_SECS", defaults.schema_ttl_secs)?,
            refresh_timeout_secs: parse_env_var("INSIGHT_REFRESH_TIMEOUT_SECS", defaults.refresh_timeout_secs)?,
            default_limit: parse_env_var("INSIGHT_DEFAULT_LIMIT", defaults.default_limit)?,
            max_limit: parse_env_var("INSIGHT_MAX_LIMIT", defaults.max_limit)?,
            top_n: parse_env_var("INSIGHT_TOP_N", defaults.top_n)?,
            tenant_column: optional_var("INSIGHT_TENANT_COLUMN").unwrap_or(defaults.tenant_column),
            vocabulary_path: optional_var("INSIGHT_VOCABULARY_PATH").map(PathBuf::from),
            model_registry_path: optional_var("INSIGHT_MODEL_REGISTRY_PATH").map(PathBuf::from),
            learned_store_path: optional_var("INSIGHT_LEARNED_STORE_PATH").map(PathBuf::from),
            fuzzy_threshold: parse_env_var("INSIGHT_FUZZY_THRESHOLD", defaults.fuzzy_threshold)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Configuration for a given URL with every other knob at its default
    pub fn for_url(database_url: impl Into<String>) -> Result<Self> {
        let database_url = database_url.into();
        let engine = EngineType::from_url(&database_url)?;
        Ok(Self {
            database_url,
            engine,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_limit == 0 {
            return Err(InsightError::Config("INSIGHT_DEFAULT_LIMIT must be at least 1".to_string()));
        }
        if self.max_limit < self.default_limit {
            return Err(InsightError::Config(format!(
                "INSIGHT_MAX_LIMIT ({}) must not be below INSIGHT_DEFAULT_LIMIT ({})",
                self.max_limit, self.default_limit
            )));
        }
        if self.top_n == 0 {
            return Err(InsightError::Config("INSIGHT_TOP_N must be at least 1".to_string()));
        }
        if self.tenant_column.trim().is_empty() {
            return Err(InsightError::Config("INSIGHT_TENANT_COLUMN cannot be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(InsightError::Config(format!(
                "INSIGHT_FUZZY_THRESHOLD must be between 0 and 1, got {}",
                self.fuzzy_threshold
            )));
        }
        Ok(())
    }

    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_ttl_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| InsightError::Config(format!("Invalid value '{}' for {}: {}", value, name, e))),
        None => Ok(default),
    }
}
