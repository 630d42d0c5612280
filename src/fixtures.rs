//! Shared CRM schema for unit tests

use crate::schema::{ColumnSchema, DatabaseSchema, EngineType, ForeignKeyInfo, SchemaSource, TableSchema};
use crate::vocabulary::{BusinessVocabulary, SchemaMetadataService};
use std::sync::Arc;

fn table(engine: EngineType, name: &str, columns: &[(&str, &str)]) -> TableSchema {
    let mut table = TableSchema::new(name);
    for (column, native) in columns {
        table.columns.insert(
            column.to_string(),
            ColumnSchema::from_catalog(engine, *column, *native, *column != "id", None, *column == "id"),
        );
    }
    table.primary_keys = vec!["id".to_string()];
    table.apply_key_flags();
    table
}

fn fk(column: &str, referenced_table: &str) -> ForeignKeyInfo {
    ForeignKeyInfo {
        name: None,
        column: column.to_string(),
        referenced_table: referenced_table.to_string(),
        referenced_column: "id".to_string(),
        on_delete: None,
        on_update: None,
    }
}

/// camelCase CRM schema as an ORM would create it
pub fn crm_schema(engine: EngineType) -> DatabaseSchema {
    let (int, text, money, date, pct) = match engine {
        EngineType::Postgres => ("int4", "varchar", "numeric", "timestamp", "int4"),
        EngineType::MySql => ("int", "varchar(255)", "decimal(12,2)", "datetime", "int"),
        EngineType::Sqlite => ("INTEGER", "TEXT", "NUMERIC", "DATETIME", "INTEGER"),
    };

    let users = table(
        engine,
        "users",
        &[("id", int), ("tenantId", text), ("name", text), ("email", text), ("department", text)],
    );
    let accounts = table(
        engine,
        "accounts",
        &[("id", int), ("tenantId", text), ("name", text), ("industry", text)],
    );
    let mut deals = table(
        engine,
        "deals",
        &[
            ("id", int),
            ("tenantId", text),
            ("name", text),
            ("amount", money),
            ("stage", text),
            ("probability", pct),
            ("closeDate", date),
            ("ownerId", int),
            ("accountId", int),
        ],
    );
    deals.foreign_keys = vec![fk("ownerId", "users"), fk("accountId", "accounts")];
    let notes = table(engine, "notes", &[("id", int), ("body", text)]);

    let raw = DatabaseSchema::assemble(
        engine,
        vec![users, accounts, deals, notes],
        SchemaSource::Catalog,
        Some("crm".to_string()),
        None,
    );
    BusinessVocabulary::crm_defaults().enrich(&raw)
}

pub fn metadata(engine: EngineType) -> SchemaMetadataService {
    SchemaMetadataService::new(
        Arc::new(crm_schema(engine)),
        Arc::new(BusinessVocabulary::crm_defaults()),
        0.92,
    )
}
