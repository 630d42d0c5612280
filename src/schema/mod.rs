//! Normalized schema model
//!
//! Every engine introspector produces these types. Nothing downstream of
//! introspection sees engine-specific catalog fields.

pub mod types;

use crate::error::{InsightError, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use types::{infer_data_category, normalize_type, parse_default, DefaultValue, NormalizedType, TypeDetails};

/// Supported SQL engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Postgres,
    MySql,
    Sqlite,
}

impl EngineType {
    /// Infer the engine from a connection URL scheme
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Ok(EngineType::Postgres),
            "mysql" | "mariadb" => Ok(EngineType::MySql),
            "sqlite" => Ok(EngineType::Sqlite),
            _ => Err(InsightError::Config(format!(
                "Cannot infer database engine from URL scheme '{}'",
                scheme
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Postgres => "postgres",
            EngineType::MySql => "mysql",
            EngineType::Sqlite => "sqlite",
        }
    }
}

impl FromStr for EngineType {
    type Err = InsightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(EngineType::Postgres),
            "mysql" | "mariadb" => Ok(EngineType::MySql),
            "sqlite" | "sqlite3" => Ok(EngineType::Sqlite),
            other => Err(InsightError::Config(format!("Unknown database engine '{}'", other))),
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business role of a column, used by planning heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCategory {
    Identifier,
    Measure,
    Dimension,
    Date,
    Text,
    System,
}

/// Where a schema snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSource {
    Catalog,
    ModelRegistry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub database_name: Option<String>,
    pub schema_namespace: Option<String>,
    pub source: SchemaSource,
    pub introspected_at: DateTime<Utc>,
    pub table_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub native_type: String,
    pub normalized_type: NormalizedType,
    pub nullable: bool,
    pub default_value: Option<DefaultValue>,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub business_name: Option<String>,
    pub data_category: DataCategory,
    pub aggregatable: bool,
    pub groupable: bool,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl ColumnSchema {
    /// Build a column from raw catalog facts. The normalized type, size details,
    /// data category, and aggregatable/groupable flags are derived here so every
    /// engine gets the same treatment.
    pub fn from_catalog(
        engine: EngineType,
        name: impl Into<String>,
        native_type: impl Into<String>,
        nullable: bool,
        raw_default: Option<&str>,
        is_primary_key: bool,
    ) -> Self {
        let name = name.into();
        let native_type = native_type.into();
        let details = normalize_type(engine, &native_type);
        let default_value = raw_default.map(|raw| parse_default(engine, raw));
        let data_category = infer_data_category(&name, details.normalized, is_primary_key, details.length);

        Self {
            aggregatable: data_category == DataCategory::Measure,
            groupable: matches!(data_category, DataCategory::Dimension | DataCategory::Date),
            name,
            native_type,
            normalized_type: details.normalized,
            nullable,
            default_value,
            is_primary_key,
            is_unique: is_primary_key,
            length: details.length,
            precision: details.precision,
            scale: details.scale,
            business_name: None,
            data_category,
            synonyms: Vec::new(),
        }
    }

    /// Fill size details the catalog reported separately from the type text
    pub fn with_sizes(mut self, length: Option<u32>, precision: Option<u32>, scale: Option<u32>) -> Self {
        self.length = length.or(self.length);
        self.precision = precision.or(self.precision);
        self.scale = scale.or(self.scale);
        self
    }

    /// Replace the normalized type and re-derive the category flags
    pub fn with_normalized_type(mut self, normalized: NormalizedType) -> Self {
        self.normalized_type = normalized;
        self.data_category = infer_data_category(&self.name, normalized, self.is_primary_key, self.length);
        self.aggregatable = self.data_category == DataCategory::Measure;
        self.groupable = matches!(self.data_category, DataCategory::Dimension | DataCategory::Date);
        self
    }

    pub fn is_numeric(&self) -> bool {
        self.normalized_type.is_numeric()
    }

    pub fn is_temporal(&self) -> bool {
        self.normalized_type.is_temporal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub name: Option<String>,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    ManyToOne,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipInfo {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub kind: RelationshipKind,
}

impl RelationshipInfo {
    pub fn from_foreign_key(table: &str, fk: &ForeignKeyInfo) -> Self {
        Self {
            from_table: table.to_string(),
            from_column: fk.column.clone(),
            to_table: fk.referenced_table.clone(),
            to_column: fk.referenced_column.clone(),
            kind: RelationshipKind::ManyToOne,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub schema_namespace: Option<String>,
    /// Columns in catalog ordinal order
    pub columns: IndexMap<String, ColumnSchema>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    pub indexes: Vec<IndexInfo>,
    pub business_name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_namespace: None,
            columns: IndexMap::new(),
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            business_name: None,
            description: None,
            category: None,
            synonyms: Vec::new(),
        }
    }

    /// Case-insensitive column lookup returning the canonical column name
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns
            .get(name)
            .or_else(|| self.columns.values().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Foreign key declared on the given column, if any
    pub fn foreign_key_for(&self, column: &str) -> Option<&ForeignKeyInfo> {
        self.foreign_keys.iter().find(|fk| fk.column.eq_ignore_ascii_case(column))
    }

    /// Mark primary-key and single-column unique index columns
    pub fn apply_key_flags(&mut self) {
        for pk in &self.primary_keys {
            if let Some(col) = self.columns.get_mut(pk) {
                col.is_primary_key = true;
                col.is_unique = true;
                col.data_category = DataCategory::Identifier;
                col.aggregatable = false;
                col.groupable = false;
            }
        }
        for index in &self.indexes {
            if index.is_unique && index.columns.len() == 1 {
                if let Some(col) = self.columns.get_mut(&index.columns[0]) {
                    col.is_unique = true;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub engine_type: EngineType,
    pub tables: IndexMap<String, TableSchema>,
    pub relationships: Vec<RelationshipInfo>,
    pub metadata: SchemaMetadata,
}

impl DatabaseSchema {
    /// Assemble a schema from introspected tables, deriving relationships 1:1
    /// from foreign keys.
    pub fn assemble(
        engine_type: EngineType,
        tables: Vec<TableSchema>,
        source: SchemaSource,
        database_name: Option<String>,
        schema_namespace: Option<String>,
    ) -> Self {
        let relationships = tables
            .iter()
            .flat_map(|t| t.foreign_keys.iter().map(move |fk| RelationshipInfo::from_foreign_key(&t.name, fk)))
            .collect();

        let table_count = tables.len();
        let tables = tables.into_iter().map(|t| (t.name.clone(), t)).collect();

        Self {
            engine_type,
            tables,
            relationships,
            metadata: SchemaMetadata {
                database_name,
                schema_namespace,
                source,
                introspected_at: Utc::now(),
                table_count,
            },
        }
    }

    /// Case-insensitive table lookup
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .get(name)
            .or_else(|| self.tables.values().find(|t| t.name.eq_ignore_ascii_case(name)))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Relationships leaving the given table
    pub fn relationships_from<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a RelationshipInfo> + 'a {
        self.relationships
            .iter()
            .filter(move |r| r.from_table.eq_ignore_ascii_case(table))
    }
}
