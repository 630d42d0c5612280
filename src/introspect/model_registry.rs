//! Model Registry
//!
//! Declared entity models (the application's ORM mapping) loaded from JSON.
//! Used as the always-available schema source when catalog introspection
//! fails and nothing is cached yet.

use super::SchemaIntrospector;
use crate::error::{InsightError, Result};
use crate::schema::{
    ColumnSchema, DatabaseSchema, EngineType, ForeignKeyInfo, IndexInfo, NormalizedType,
    SchemaSource, TableSchema,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldModel {
    pub name: String,
    /// Either a normalized type name (`decimal`) or a native type for the registry engine
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default: Option<String>,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationModel {
    pub field: String,
    pub target: String,
    #[serde(default = "default_target_field")]
    pub target_field: String,
}

fn default_target_field() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityModel {
    /// Entity name as the application knows it (`Deal`)
    pub name: String,
    /// Backing table
    pub table: String,
    pub fields: Vec<FieldModel>,
    #[serde(default)]
    pub relations: Vec<RelationModel>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRegistry {
    pub engine: EngineType,
    pub entities: Vec<EntityModel>,
}

impl ModelRegistry {
    pub fn from_json(json: &str) -> Result<Self> {
        let registry: ModelRegistry = serde_json::from_str(json)?;
        registry.check()?;
        Ok(registry)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let registry = Self::from_json(&content)?;
        info!(
            path = %path.display(),
            entities = registry.entities.len(),
            "Loaded model registry"
        );
        Ok(registry)
    }

    fn check(&self) -> Result<()> {
        for entity in &self.entities {
            if entity.fields.is_empty() {
                return Err(InsightError::Config(format!(
                    "Model '{}' declares no fields",
                    entity.name
                )));
            }
            for relation in &entity.relations {
                if !entity.fields.iter().any(|f| f.name == relation.field) {
                    return Err(InsightError::Config(format!(
                        "Model '{}' relation references unknown field '{}'",
                        entity.name, relation.field
                    )));
                }
            }
        }
        Ok(())
    }

    /// Built-in CRM models matching the default vocabulary
    pub fn crm_defaults(engine: EngineType, tenant_column: &str) -> Self {
        let field = |name: &str, ty: &str| FieldModel {
            name: name.to_string(),
            field_type: ty.to_string(),
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
        };
        let id = || FieldModel {
            primary_key: true,
            nullable: false,
            ..field("id", "integer")
        };
        let tenant = || FieldModel {
            nullable: false,
            ..field(tenant_column, "string")
        };

        let entities = vec![
            EntityModel {
                name: "User".to_string(),
                table: "users".to_string(),
                fields: vec![id(), tenant(), field("name", "string"), field("email", "string")],
                relations: Vec::new(),
                description: Some("Sales team members".to_string()),
            },
            EntityModel {
                name: "Account".to_string(),
                table: "accounts".to_string(),
                fields: vec![
                    id(),
                    tenant(),
                    field("name", "string"),
                    field("industry", "string"),
                    field("created_at", "timestamp"),
                ],
                relations: Vec::new(),
                description: Some("Customer companies".to_string()),
            },
            EntityModel {
                name: "Deal".to_string(),
                table: "deals".to_string(),
                fields: vec![
                    id(),
                    tenant(),
                    field("name", "string"),
                    field("amount", "decimal"),
                    field("stage", "string"),
                    field("probability", "integer"),
                    field("close_date", "date"),
                    field("owner_id", "integer"),
                    field("account_id", "integer"),
                    field("created_at", "timestamp"),
                ],
                relations: vec![
                    RelationModel {
                        field: "owner_id".to_string(),
                        target: "users".to_string(),
                        target_field: "id".to_string(),
                    },
                    RelationModel {
                        field: "account_id".to_string(),
                        target: "accounts".to_string(),
                        target_field: "id".to_string(),
                    },
                ],
                description: Some("Sales opportunities".to_string()),
            },
        ];

        Self { engine, entities }
    }

    fn entity(&self, table: &str) -> Result<&EntityModel> {
        self.entities
            .iter()
            .find(|e| e.table.eq_ignore_ascii_case(table))
            .ok_or_else(|| InsightError::NotFound(format!("No model declared for table '{}'", table)))
    }

    fn column_for(&self, field: &FieldModel) -> ColumnSchema {
        let mut column = ColumnSchema::from_catalog(
            self.engine,
            field.name.clone(),
            field.field_type.clone(),
            field.nullable && !field.primary_key,
            field.default.as_deref(),
            field.primary_key,
        );
        if let Some(normalized) = parse_normalized_name(&field.field_type) {
            if normalized != column.normalized_type {
                column = column.with_normalized_type(normalized);
            }
        }
        column.is_unique = field.unique || field.primary_key;
        column
    }

    /// Build the fallback schema synchronously
    pub fn to_schema(&self) -> DatabaseSchema {
        let tables = self
            .entities
            .iter()
            .map(|entity| self.table_for(entity))
            .collect();
        DatabaseSchema::assemble(self.engine, tables, SchemaSource::ModelRegistry, None, None)
    }

    fn table_for(&self, entity: &EntityModel) -> TableSchema {
        let mut table = TableSchema::new(entity.table.clone());
        table.description = entity.description.clone();
        table.columns = entity
            .fields
            .iter()
            .map(|f| (f.name.clone(), self.column_for(f)))
            .collect();
        table.primary_keys = primary_keys(entity);
        table.foreign_keys = foreign_keys(entity);
        table.apply_key_flags();
        table
    }
}

fn primary_keys(entity: &EntityModel) -> Vec<String> {
    entity
        .fields
        .iter()
        .filter(|f| f.primary_key)
        .map(|f| f.name.clone())
        .collect()
}

fn foreign_keys(entity: &EntityModel) -> Vec<ForeignKeyInfo> {
    entity
        .relations
        .iter()
        .map(|r| ForeignKeyInfo {
            name: None,
            column: r.field.clone(),
            referenced_table: r.target.clone(),
            referenced_column: r.target_field.clone(),
            on_delete: None,
            on_update: None,
        })
        .collect()
}

/// Accept normalized type names directly (`decimal`, `timestamp`, `string`)
fn parse_normalized_name(name: &str) -> Option<NormalizedType> {
    serde_json::from_value(serde_json::Value::String(name.trim().to_ascii_lowercase())).ok()
}

#[async_trait]
impl SchemaIntrospector for ModelRegistry {
    fn engine(&self) -> EngineType {
        self.engine
    }

    fn source(&self) -> SchemaSource {
        SchemaSource::ModelRegistry
    }

    async fn get_tables(&self) -> Result<Vec<String>> {
        let mut tables: Vec<String> = self.entities.iter().map(|e| e.table.clone()).collect();
        tables.sort();
        Ok(tables)
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnSchema>> {
        let entity = self.entity(table)?;
        Ok(entity.fields.iter().map(|f| self.column_for(f)).collect())
    }

    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        Ok(primary_keys(self.entity(table)?))
    }

    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        Ok(foreign_keys(self.entity(table)?))
    }

    async fn get_indexes(&self, _table: &str) -> Result<Vec<IndexInfo>> {
        Ok(Vec::new())
    }

    async fn get_schema(&self) -> Result<DatabaseSchema> {
        Ok(self.to_schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DataCategory;

    const REGISTRY_JSON: &str = r#"{
        "engine": "mysql",
        "entities": [
            {
                "name": "Opportunity",
                "table": "opportunities",
                "fields": [
                    {"name": "id", "type": "bigint(20) unsigned", "primary_key": true},
                    {"name": "tenantId", "type": "varchar(36)", "nullable": false},
                    {"name": "value", "type": "decimal"},
                    {"name": "active", "type": "tinyint(1)", "default": "1"},
                    {"name": "ownerId", "type": "int"}
                ],
                "relations": [{"field": "ownerId", "target": "users"}]
            },
            {
                "name": "User",
                "table": "users",
                "fields": [{"name": "id", "type": "int", "primary_key": true}]
            }
        ]
    }"#;

    #[test]
    fn test_registry_builds_schema() {
        let registry = ModelRegistry::from_json(REGISTRY_JSON).unwrap();
        let schema = registry.to_schema();

        assert_eq!(schema.engine_type, EngineType::MySql);
        assert_eq!(schema.metadata.source, SchemaSource::ModelRegistry);
        assert_eq!(schema.relationships.len(), 1);
        assert_eq!(schema.relationships[0].to_column, "id");

        let opp = schema.table("opportunities").unwrap();
        assert_eq!(opp.column("id").unwrap().normalized_type, NormalizedType::BigInt);
        assert_eq!(opp.column("value").unwrap().normalized_type, NormalizedType::Decimal);
        assert_eq!(opp.column("value").unwrap().data_category, DataCategory::Measure);
        assert_eq!(opp.column("active").unwrap().normalized_type, NormalizedType::Boolean);
        assert!(!opp.column("tenantId").unwrap().nullable);
    }

    #[test]
    fn test_relation_to_unknown_field_rejected() {
        let json = r#"{"engine": "postgres", "entities": [
            {"name": "Deal", "table": "deals", "fields": [{"name": "id", "type": "int4"}],
             "relations": [{"field": "owner_id", "target": "users"}]}
        ]}"#;
        assert!(matches!(ModelRegistry::from_json(json), Err(InsightError::Config(_))));
    }

    #[tokio::test]
    async fn test_crm_defaults_through_trait() {
        let registry = ModelRegistry::crm_defaults(EngineType::Postgres, "tenant_id");
        assert_eq!(registry.get_tables().await.unwrap(), vec!["accounts", "deals", "users"]);

        let schema = registry.get_schema().await.unwrap();
        let deals = schema.table("deals").unwrap();
        assert!(deals.has_column("tenant_id"));
        assert_eq!(deals.column("close_date").unwrap().normalized_type, NormalizedType::Date);
        assert_eq!(schema.relationships_from("deals").count(), 2);
        assert!(registry.get_columns("missing").await.is_err());
    }
}
