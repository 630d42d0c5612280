//! MySQL / MariaDB catalog introspection via `information_schema`

use super::SchemaIntrospector;
use crate::error::Result;
use crate::schema::{ColumnSchema, DefaultValue, EngineType, ForeignKeyInfo, IndexInfo};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::Row;

// Some server versions report catalog text as VARBINARY, hence the CONVERTs.
mod queries {
    pub const LIST_TABLES: &str = r#"
        SELECT CONVERT(TABLE_NAME USING utf8mb4) AS TABLE_NAME
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
    "#;

    pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8mb4) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8mb4) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8mb4) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8mb4) AS COLUMN_KEY,
            CONVERT(EXTRA USING utf8mb4) AS EXTRA,
            CAST(CHARACTER_MAXIMUM_LENGTH AS SIGNED) AS CHARACTER_MAXIMUM_LENGTH,
            CAST(NUMERIC_PRECISION AS SIGNED) AS NUMERIC_PRECISION,
            CAST(NUMERIC_SCALE AS SIGNED) AS NUMERIC_SCALE
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    "#;

    pub const PRIMARY_KEYS: &str = r#"
        SELECT CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND TABLE_NAME = ?
        AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
    "#;

    pub const FOREIGN_KEYS: &str = r#"
        SELECT
            CONVERT(kcu.CONSTRAINT_NAME USING utf8mb4) AS CONSTRAINT_NAME,
            CONVERT(kcu.COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(kcu.REFERENCED_TABLE_NAME USING utf8mb4) AS REFERENCED_TABLE_NAME,
            CONVERT(kcu.REFERENCED_COLUMN_NAME USING utf8mb4) AS REFERENCED_COLUMN_NAME,
            CONVERT(rc.DELETE_RULE USING utf8mb4) AS DELETE_RULE,
            CONVERT(rc.UPDATE_RULE USING utf8mb4) AS UPDATE_RULE
        FROM information_schema.KEY_COLUMN_USAGE kcu
        LEFT JOIN information_schema.REFERENTIAL_CONSTRAINTS rc
            ON rc.CONSTRAINT_SCHEMA = kcu.TABLE_SCHEMA
            AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
        WHERE kcu.TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND kcu.TABLE_NAME = ?
        AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
    "#;

    pub const INDEXES: &str = r#"
        SELECT
            CONVERT(INDEX_NAME USING utf8mb4) AS INDEX_NAME,
            CONVERT(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) USING utf8mb4) AS COLUMN_NAMES,
            CAST(MIN(NON_UNIQUE) AS SIGNED) AS NON_UNIQUE
        FROM information_schema.STATISTICS
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
        GROUP BY INDEX_NAME
        ORDER BY INDEX_NAME
    "#;

    pub const CURRENT_DATABASE: &str = "SELECT CONVERT(DATABASE() USING utf8mb4) AS NAME";
}

pub struct MySqlIntrospector {
    pool: MySqlPool,
    /// Database to read; `None` means the connection's current database
    database: Option<String>,
}

impl MySqlIntrospector {
    pub fn new(pool: MySqlPool, database: Option<String>) -> Self {
        Self { pool, database }
    }
}

/// Read a text column that may arrive as either VARCHAR or VARBINARY
fn get_string(row: &MySqlRow, column: &str) -> Result<Option<String>> {
    if let Ok(value) = row.try_get::<Option<String>, _>(column) {
        return Ok(value);
    }
    let bytes: Option<Vec<u8>> = row.try_get(column)?;
    Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
}

fn get_required_string(row: &MySqlRow, column: &str) -> Result<String> {
    Ok(get_string(row, column)?.unwrap_or_default())
}

fn to_u32(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

#[async_trait]
impl SchemaIntrospector for MySqlIntrospector {
    fn engine(&self) -> EngineType {
        EngineType::MySql
    }

    fn namespace(&self) -> Option<String> {
        self.database.clone()
    }

    async fn database_name(&self) -> Result<Option<String>> {
        if self.database.is_some() {
            return Ok(self.database.clone());
        }
        let row = sqlx::query(queries::CURRENT_DATABASE).fetch_one(&self.pool).await?;
        get_string(&row, "NAME")
    }

    async fn get_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(queries::LIST_TABLES)
            .bind(self.database.as_deref())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| get_required_string(row, "TABLE_NAME")).collect()
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<ColumnSchema>> {
        let rows = sqlx::query(queries::DESCRIBE_COLUMNS)
            .bind(self.database.as_deref())
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = get_required_string(row, "COLUMN_NAME")?;
            let column_type = get_required_string(row, "COLUMN_TYPE")?;
            let nullable = get_required_string(row, "IS_NULLABLE")?;
            let default = get_string(row, "COLUMN_DEFAULT")?;
            let key = get_required_string(row, "COLUMN_KEY")?;
            let extra = get_required_string(row, "EXTRA")?.to_ascii_lowercase();
            let length: Option<i64> = row.try_get("CHARACTER_MAXIMUM_LENGTH")?;
            let precision: Option<i64> = row.try_get("NUMERIC_PRECISION")?;
            let scale: Option<i64> = row.try_get("NUMERIC_SCALE")?;

            let mut column = ColumnSchema::from_catalog(
                EngineType::MySql,
                name,
                column_type,
                nullable.eq_ignore_ascii_case("YES"),
                default.as_deref(),
                key == "PRI",
            );
            if extra.contains("auto_increment") {
                column.default_value = Some(DefaultValue::AutoIncrement);
            }
            if key == "UNI" {
                column.is_unique = true;
            }
            let (precision, scale) = if column.normalized_type == crate::schema::NormalizedType::Decimal {
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
            .bind(self.database.as_deref())
            .bind(table)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| get_required_string(row, "COLUMN_NAME")).collect()
    }

    async fn get_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>> {
        let rows = sqlx::query(queries::FOREIGN_KEYS)
            .bind(self.database.as_deref())
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            keys.push(ForeignKeyInfo {
                name: get_string(row, "CONSTRAINT_NAME")?,
                column: get_required_string(row, "COLUMN_NAME")?,
                referenced_table: get_required_string(row, "REFERENCED_TABLE_NAME")?,
                referenced_column: get_required_string(row, "REFERENCED_COLUMN_NAME")?,
                on_delete: get_string(row, "DELETE_RULE")?,
                on_update: get_string(row, "UPDATE_RULE")?,
            });
        }
        Ok(keys)
    }

    async fn get_indexes(&self, table: &str) -> Result<Vec<IndexInfo>> {
        let rows = sqlx::query(queries::INDEXES)
            .bind(self.database.as_deref())
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = get_required_string(row, "INDEX_NAME")?;
            let columns = split_index_columns(&get_required_string(row, "COLUMN_NAMES")?);
            let non_unique: i64 = row.try_get("NON_UNIQUE")?;
            indexes.push(IndexInfo {
                is_primary: name == "PRIMARY",
                is_unique: non_unique == 0,
                name,
                columns,
            });
        }
        Ok(indexes)
    }
}

fn split_index_columns(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
