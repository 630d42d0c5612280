//! Engine Introspectors
//!
//! One [`SchemaIntrospector`] implementation per engine, all producing the
//! normalized model in [`crate::schema`]. The model registry implements the
//! same trait so the cache can treat it as just another source.

pub mod model_registry;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use crate::db::DbPool;
use crate::error::Result;
use crate::schema::{
    ColumnSchema, DatabaseSchema, EngineType, ForeignKeyInfo, IndexInfo, RelationshipInfo, SchemaSource, TableSchema,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub use model_registry::{EntityModel, FieldModel, ModelRegistry, RelationModel};
pub use mysql::MySqlIntrospector;
pub use postgres::PostgresIntrospector;
pub use sqlite::SqliteIntrospector;

/// Read-only access to a database catalog
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Engine this introspector reads
    fn engine(&self) -> EngineType;

    /// Where the produced schema comes from
    fn source(&self) -> SchemaSource {
        SchemaSource::Catalog
    }

    /// Namespace being introspected (Postgres schema, MySQL database)
    fn namespace(&self) -> Option<String> {
        None
    }

    /// Name of the connected database, when the engine reports one
    async fn database_name(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Base table names, sorted
    async fn get_tables(&self) -> Result<Vec<String>>;

    /// Columns in ordinal order
    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnSchema>>;

    /// Primary key columns in key order
    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>>;

    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>>;

    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>>;

    /// Full description of one table
    async fn get_table(&self, table: &str) -> Result<TableSchema> {
        let mut schema = TableSchema::new(table);
        schema.schema_namespace = self.namespace();
        schema.columns = self
            .get_columns(table)
            .await?
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        schema.primary_keys = self.get_primary_keys(table).await?;
        schema.foreign_keys = self.get_foreign_keys(table).await?;
        schema.indexes = self.get_indexes(table).await?;
        schema.apply_key_flags();
        Ok(schema)
    }

    /// Relationships derived from every table's foreign keys
    async fn get_relationships(&self) -> Result<Vec<RelationshipInfo>> {
        let mut relationships = Vec::new();
        for table in self.get_tables().await? {
            for fk in self.get_foreign_keys(&table).await? {
                relationships.push(RelationshipInfo::from_foreign_key(&table, &fk));
            }
        }
        Ok(relationships)
    }

    /// Introspect every table into a normalized schema
    async fn get_schema(&self) -> Result<DatabaseSchema> {
        let names = self.get_tables().await?;
        let mut tables = Vec::with_capacity(names.len());
        for name in &names {
            tables.push(self.get_table(name).await?);
        }

        let schema = DatabaseSchema::assemble(
            self.engine(),
            tables,
            self.source(),
            self.database_name().await?,
            self.namespace(),
        );
        debug!(
            engine = %schema.engine_type,
            tables = schema.metadata.table_count,
            relationships = schema.relationships.len(),
            "Introspected schema"
        );
        Ok(schema)
    }
}

/// Pick the introspector matching the pool's engine
pub fn create_introspector(pool: &DbPool, namespace: Option<String>) -> Arc<dyn SchemaIntrospector> {
    match pool {
        DbPool::Postgres(p) => Arc::new(PostgresIntrospector::new(p.clone(), namespace)),
        DbPool::MySql(p) => Arc::new(MySqlIntrospector::new(p.clone(), namespace)),
        DbPool::Sqlite(path) => Arc::new(SqliteIntrospector::new(path.clone())),
    }
}
