//! PostgreSQL catalog introspection via `information_schema` and `pg_index`

use super::SchemaIntrospector;
use crate::error::Result;
use crate::schema::{ColumnSchema, EngineType, ForeignKeyInfo, IndexInfo, NormalizedType};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

const DEFAULT_NAMESPACE: &str = "public";

mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT table_name::text AS table_name
        FROM information_schema.tables
        WHERE table_schema = $1
        AND table_type = 'BASE TABLE'
        ORDER BY table_name
    "#;

    pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            c.data_type::text AS data_type,
            c.udt_name::text AS udt_name,
            c.is_nullable::text AS is_nullable,
            c.column_default::text AS column_default,
            c.character_maximum_length::int4 AS character_maximum_length,
            c.numeric_precision::int4 AS numeric_precision,
            c.numeric_scale::int4 AS numeric_scale,
            COALESCE(t.typtype = 'e', false) AS is_enum
        FROM information_schema.columns c
        LEFT JOIN pg_catalog.pg_namespace tn ON tn.nspname = c.udt_schema
        LEFT JOIN pg_catalog.pg_type t ON t.typname = c.udt_name AND t.typnamespace = tn.oid
        WHERE c.table_schema = $1 AND c.table_name = $2
        ORDER BY c.ordinal_position
    "#;

    pub const PRIMARY_KEYS: &str = r#"
        SELECT kcu.column_name::text AS column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
            AND tc.table_name = kcu.table_name
        WHERE tc.constraint_type = 'PRIMARY KEY'
        AND tc.table_schema = $1
        AND tc.table_name = $2
        ORDER BY kcu.ordinal_position
    "#;

    /// One row per column pair; `conkey` and `confkey` are unnested together
    /// so composite keys keep their positional pairing.
    pub const FOREIGN_KEYS: &str = r#"
        SELECT
            con.conname::text AS constraint_name,
            att.attname::text AS column_name,
            ref_tbl.relname::text AS foreign_table_name,
            ref_att.attname::text AS foreign_column_name,
            (CASE con.confdeltype
                WHEN 'a' THEN 'NO ACTION' WHEN 'r' THEN 'RESTRICT' WHEN 'c' THEN 'CASCADE'
                WHEN 'n' THEN 'SET NULL' WHEN 'd' THEN 'SET DEFAULT' END)::text AS delete_rule,
            (CASE con.confupdtype
                WHEN 'a' THEN 'NO ACTION' WHEN 'r' THEN 'RESTRICT' WHEN 'c' THEN 'CASCADE'
                WHEN 'n' THEN 'SET NULL' WHEN 'd' THEN 'SET DEFAULT' END)::text AS update_rule
        FROM pg_constraint con
        JOIN pg_class tbl ON tbl.oid = con.conrelid
        JOIN pg_namespace ns ON ns.oid = tbl.relnamespace
        JOIN pg_class ref_tbl ON ref_tbl.oid = con.confrelid
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, ref_attnum, position)
        JOIN pg_attribute att ON att.attrelid = con.conrelid AND att.attnum = k.attnum
        JOIN pg_attribute ref_att ON ref_att.attrelid = con.confrelid AND ref_att.attnum = k.ref_attnum
        WHERE con.contype = 'f'
        AND ns.nspname = $1
        AND tbl.relname = $2
        ORDER BY con.conname, k.position
    "#;

    pub const INDEXES: &str = r#"
        SELECT
            i.relname::text AS index_name,
            array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum)) AS column_names,
            ix.indisunique AS is_unique,
            ix.indisprimary AS is_primary
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE n.nspname = $1 AND t.relname = $2
        GROUP BY i.relname, ix.indisunique, ix.indisprimary
        ORDER BY i.relname
    "#;

    pub const CURRENT_DATABASE: &str = "SELECT current_database()::text AS name";
}

pub struct PostgresIntrospector {
    pool: PgPool,
    namespace: String,
}

impl PostgresIntrospector {
    pub fn new(pool: PgPool, namespace: Option<String>) -> Self {
        Self {
            pool,
            namespace: namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        }
    }
}

/// Type text fed to normalization. `udt_name` carries the precise base type
/// (`int4`, `timestamptz`, `_text`); user-defined types keep their own name.
fn native_type_text(data_type: &str, udt_name: &str) -> String {
    match data_type {
        "ARRAY" | "USER-DEFINED" => udt_name.to_string(),
        _ if udt_name.is_empty() => data_type.to_string(),
        _ => udt_name.to_string(),
    }
}

fn to_u32(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

#[async_trait]
impl SchemaIntrospector for PostgresIntrospector {
    fn engine(&self) -> EngineType {
        EngineType::Postgres
    }

    fn namespace(&self) -> Option<String> {
        Some(self.namespace.clone())
    }

    async fn database_name(&self) -> Result<Option<String>> {
        let row = sqlx::query(queries::CURRENT_DATABASE).fetch_one(&self.pool).await?;
        Ok(row.try_get::<Option<String>, _>("name")?)
    }

    async fn get_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(queries::LIST_TABLES)
            .bind(&self.namespace)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("table_name")).collect())
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnSchema>> {
        let primary_keys = self.get_primary_keys(table).await?;
        let rows = sqlx::query(queries::DESCRIBE_COLUMNS)
            .bind(&self.namespace)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("column_name")?;
            let data_type: String = row.try_get("data_type")?;
            let udt_name: Option<String> = row.try_get("udt_name")?;
            let nullable: String = row.try_get("is_nullable")?;
            let default: Option<String> = row.try_get("column_default")?;
            let is_enum: bool = row.try_get("is_enum")?;
            let length: Option<i32> = row.try_get("character_maximum_length")?;
            let precision: Option<i32> = row.try_get("numeric_precision")?;
            let scale: Option<i32> = row.try_get("numeric_scale")?;

            let native = native_type_text(&data_type, udt_name.as_deref().unwrap_or_default());
            let is_pk = primary_keys.contains(&name);
            let mut column = ColumnSchema::from_catalog(
                EngineType::Postgres,
                name,
                native,
                nullable.eq_ignore_ascii_case("YES"),
                default.as_deref(),
                is_pk,
            );
            if is_enum {
                column = column.with_normalized_type(NormalizedType::Enum);
            }
            // information_schema reports binary precision for float columns
            let (precision, scale) = if column.normalized_type == NormalizedType::Decimal {
                (to_u32(precision), to_u32(scale))
            } else {
                (None, None)
            };
            columns.push(column.with_sizes(to_u32(length), precision, scale));
        }
        Ok(columns)
    }

    async fn get_primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(queries::PRIMARY_KEYS)
            .bind(&self.namespace)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("column_name")).collect())
    }

    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let rows = sqlx::query(queries::FOREIGN_KEYS)
            .bind(&self.namespace)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            keys.push(ForeignKeyInfo {
                name: row.try_get("constraint_name")?,
                column: row.try_get("column_name")?,
                referenced_table: row.try_get("foreign_table_name")?,
                referenced_column: row.try_get("foreign_column_name")?,
                on_delete: row.try_get("delete_rule")?,
                on_update: row.try_get("update_rule")?,
            });
        }
        Ok(keys)
    }

    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::INDEXES)
            .bind(&self.namespace)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            indexes.push(IndexInfo {
                name: row.try_get("index_name")?,
                columns: row.try_get("column_names")?,
                is_unique: row.try_get("is_unique")?,
                is_primary: row.try_get("is_primary")?,
            });
        }
        Ok(indexes)
    }
}
