//! SQLite catalog introspection
//!
//! Uses the `pragma_*` table-valued functions so table names are bound as
//! parameters. rusqlite is synchronous, so every call runs on a blocking
//! thread with its own read-only connection.

use super::SchemaIntrospector;
use crate::error::{InsightError, Result};
use crate::schema::{ColumnSchema, DefaultValue, EngineType, ForeignKeyInfo, IndexInfo, TableSchema};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use std::path::PathBuf;

pub struct SqliteIntrospector {
    path: PathBuf,
}

impl SqliteIntrospector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            f(&conn)
        })
        .await
        .map_err(|e| InsightError::Introspection(format!("SQLite introspection task failed: {}", e)))?
    }
}

fn read_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

fn read_primary_keys(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
    let keys = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(keys)
}

fn read_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnSchema>> {
    let mut stmt =
        conn.prepare(r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid"#)?;
    let rows = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                row.get::<_, i64>(2)? != 0,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let pk_count = rows.iter().filter(|(_, _, _, _, pk)| *pk > 0).count();
    let columns = rows
        .into_iter()
        .map(|(name, declared, not_null, default, pk)| {
            let is_pk = pk > 0;
            let mut column = ColumnSchema::from_catalog(
                EngineType::Sqlite,
                name,
                declared.clone(),
                !not_null && !is_pk,
                default.as_deref(),
                is_pk,
            );
            // A lone INTEGER PRIMARY KEY aliases the rowid
            if is_pk && pk_count == 1 && default.is_none() && declared.eq_ignore_ascii_case("INTEGER") {
                column.default_value = Some(DefaultValue::AutoIncrement);
            }
            column
        })
        .collect();
    Ok(columns)
}

fn read_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKeyInfo>> {
    let mut stmt = conn.prepare(
        r#"SELECT "table", "from", "to", on_update, on_delete FROM pragma_foreign_key_list(?1) ORDER BY id, seq"#,
    )?;
    let rows = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut keys = Vec::with_capacity(rows.len());
    for (referenced_table, column, to, on_update, on_delete) in rows {
        // A missing target column means the referenced table's primary key
        let referenced_column = match to {
            Some(col) => col,
            None => read_primary_keys(conn, &referenced_table)?
                .into_iter()
                .next()
                .unwrap_or_else(|| "rowid".to_string()),
        };
        keys.push(ForeignKeyInfo {
            name: None,
            column,
            referenced_table,
            referenced_column,
            on_delete: on_delete.filter(|a| a != "NO ACTION"),
            on_update: on_update.filter(|a| a != "NO ACTION"),
        });
    }
    Ok(keys)
}

fn read_indexes(conn: &Connection, table: &str) -> Result<Vec<IndexInfo>> {
    let mut stmt = conn.prepare(r#"SELECT name, "unique", origin FROM pragma_index_list(?1) ORDER BY name"#)?;
    let listed = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? != 0,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut info_stmt = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let mut indexes = Vec::with_capacity(listed.len());
    for (name, is_unique, origin) in listed {
        let columns = info_stmt
            .query_map(params![name], |row| row.get::<_, Option<String>>(0))?
            .filter_map(|c| c.transpose())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        indexes.push(IndexInfo {
            name,
            columns,
            is_unique,
            is_primary: origin == "pk",
        });
    }
    Ok(indexes)
}

#[async_trait]
impl SchemaIntrospector for SqliteIntrospector {
    fn engine(&self) -> EngineType {
        EngineType::Sqlite
    }

    async fn database_name(&self) -> Result<Option<String>> {
        Ok(self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned()))
    }

    async fn get_tables(&self) -> Result<Vec<String>> {
        self.with_connection(read_tables).await
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnSchema>> {
        let table = table.to_string();
        self.with_connection(move |conn| read_columns(conn, &table)).await
    }

    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let table = table.to_string();
        self.with_connection(move |conn| read_primary_keys(conn, &table)).await
    }

    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let table = table.to_string();
        self.with_connection(move |conn| read_foreign_keys(conn, &table)).await
    }

    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        let table = table.to_string();
        self.with_connection(move |conn| read_indexes(conn, &table)).await
    }

    /// One connection for the whole table instead of one per catalog query
    async fn get_table(&self, table: &str) -> Result<TableSchema> {
        let name = table.to_string();
        self.with_connection(move |conn| {
            let mut schema = TableSchema::new(name.as_str());
            schema.columns = read_columns(conn, &name)?
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect();
            if schema.columns.is_empty() {
                return Err(InsightError::NotFound(format!("Table '{}' not found", name)));
            }
            schema.primary_keys = read_primary_keys(conn, &name)?;
            schema.foreign_keys = read_foreign_keys(conn, &name)?;
            schema.indexes = read_indexes(conn, &name)?;
            schema.apply_key_flags();
            Ok(schema)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NormalizedType;
    use tempfile::TempDir;

    fn create_crm_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("crm.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name VARCHAR(120) NOT NULL,
                email TEXT UNIQUE
            );
            CREATE TABLE deals (
                id INTEGER PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name VARCHAR(255) NOT NULL,
                amount NUMERIC(12,2) DEFAULT 0,
                stage VARCHAR(50) DEFAULT 'prospecting',
                is_active BOOLEAN DEFAULT TRUE,
                close_date DATETIME DEFAULT CURRENT_TIMESTAMP,
                owner_id INTEGER REFERENCES users(id) ON DELETE SET NULL
            );
            CREATE INDEX idx_deals_tenant_stage ON deals(tenant_id, stage);
            "#,
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_introspects_tables_in_order() {
        let dir = TempDir::new().unwrap();
        let introspector = SqliteIntrospector::new(create_crm_db(&dir));
        assert_eq!(introspector.get_tables().await.unwrap(), vec!["deals", "users"]);
    }

    #[tokio::test]
    async fn test_columns_types_and_defaults() {
        let dir = TempDir::new().unwrap();
        let introspector = SqliteIntrospector::new(create_crm_db(&dir));
        let table = introspector.get_table("deals").await.unwrap();

        let names: Vec<&str> = table.columns.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["id", "tenant_id", "name", "amount", "stage", "is_active", "close_date", "owner_id"]
        );

        let id = table.column("id").unwrap();
        assert!(id.is_primary_key);
        assert_eq!(id.default_value, Some(DefaultValue::AutoIncrement));

        let name = table.column("name").unwrap();
        assert_eq!(name.normalized_type, NormalizedType::String);
        assert_eq!(name.length, Some(255));
        assert!(!name.nullable);

        let amount = table.column("amount").unwrap();
        assert_eq!(amount.normalized_type, NormalizedType::Decimal);
        assert_eq!((amount.precision, amount.scale), (Some(12), Some(2)));
        assert_eq!(amount.default_value, Some(DefaultValue::Integer(0)));
        assert!(amount.aggregatable);

        assert_eq!(
            table.column("stage").unwrap().default_value,
            Some(DefaultValue::String("prospecting".to_string()))
        );
        assert_eq!(table.column("is_active").unwrap().default_value, Some(DefaultValue::Boolean(true)));
        assert_eq!(
            table.column("close_date").unwrap().default_value,
            Some(DefaultValue::CurrentTimestamp)
        );
    }

    #[tokio::test]
    async fn test_foreign_keys_and_indexes() {
        let dir = TempDir::new().unwrap();
        let introspector = SqliteIntrospector::new(create_crm_db(&dir));

        let fks = introspector.get_foreign_keys("deals").await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].column, "owner_id");
        assert_eq!(fks[0].referenced_table, "users");
        assert_eq!(fks[0].referenced_column, "id");
        assert_eq!(fks[0].on_delete.as_deref(), Some("SET NULL"));

        let indexes = introspector.get_indexes("deals").await.unwrap();
        let idx = indexes.iter().find(|i| i.name == "idx_deals_tenant_stage").unwrap();
        assert_eq!(idx.columns, vec!["tenant_id", "stage"]);
        assert!(!idx.is_unique);

        let users = introspector.get_table("users").await.unwrap();
        assert!(users.column("email").unwrap().is_unique);
    }

    #[tokio::test]
    async fn test_full_schema_relationships() {
        let dir = TempDir::new().unwrap();
        let introspector = SqliteIntrospector::new(create_crm_db(&dir));
        let schema = introspector.get_schema().await.unwrap();

        assert_eq!(schema.engine_type, EngineType::Sqlite);
        assert_eq!(schema.metadata.database_name.as_deref(), Some("crm"));
        assert_eq!(schema.relationships.len(), 1);
        assert_eq!(schema.relationships[0].from_table, "deals");
        assert_eq!(schema.relationships[0].to_table, "users");
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let dir = TempDir::new().unwrap();
        let introspector = SqliteIntrospector::new(create_crm_db(&dir));
        let err = introspector.get_table("nope").await.unwrap_err();
        assert!(matches!(err, InsightError::NotFound(_)));
    }
}
