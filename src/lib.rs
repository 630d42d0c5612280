pub mod analyzer;
pub mod config;
pub mod db;
pub mod error;
pub mod introspect;
pub mod pipeline;
pub mod planner;
pub mod schema;
pub mod schema_cache;
pub mod sql;
pub mod validator;
pub mod vocabulary;

#[cfg(test)]
mod fixtures;

pub use analyzer::{QueryAnalysis, QueryAnalyzer, QueryIntent};
pub use config::InsightConfig;
pub use error::{InsightError, Result};
pub use pipeline::{QueryPipeline, QueryResponse};
pub use planner::{PlannedQuery, QueryPlan, QueryPlanner};
pub use schema::{ColumnSchema, DatabaseSchema, EngineType, TableSchema};
pub use schema_cache::SchemaCacheService;
pub use sql::{BuiltQuery, SqlBuilder};
pub use validator::{QueryValidator, ValidationResult};
pub use vocabulary::{BusinessVocabulary, LearnedSynonymStore, SchemaMetadataService};
