//! Native type normalization and default-value parsing
//!
//! Each engine has its own lookup table from base type name to
//! [`NormalizedType`]. Lookups are total: anything unmapped becomes
//! `Unknown`. Default values are parsed defensively and anything that does
//! not fit a known shape is kept verbatim as an expression.

use super::{DataCategory, EngineType};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizedType {
    String,
    Text,
    Integer,
    BigInt,
    Decimal,
    Float,
    Double,
    Date,
    Time,
    DateTime,
    Timestamp,
    Boolean,
    Binary,
    Blob,
    Json,
    Uuid,
    Array,
    Enum,
    Unknown,
}

impl NormalizedType {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            NormalizedType::Integer
                | NormalizedType::BigInt
                | NormalizedType::Decimal
                | NormalizedType::Float
                | NormalizedType::Double
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            NormalizedType::Date | NormalizedType::Time | NormalizedType::DateTime | NormalizedType::Timestamp
        )
    }
}

/// Result of normalizing a native type string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDetails {
    pub normalized: NormalizedType,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

use NormalizedType as N;

/// Postgres base types, keyed by `udt_name` or `format_type` spelling
pub const POSTGRES_TYPES: &[(&str, NormalizedType)] = &[
    ("smallint", N::Integer),
    ("int2", N::Integer),
    ("integer", N::Integer),
    ("int", N::Integer),
    ("int4", N::Integer),
    ("smallserial", N::Integer),
    ("serial", N::Integer),
    ("serial4", N::Integer),
    ("bigint", N::BigInt),
    ("int8", N::BigInt),
    ("bigserial", N::BigInt),
    ("serial8", N::BigInt),
    ("numeric", N::Decimal),
    ("decimal", N::Decimal),
    ("money", N::Decimal),
    ("real", N::Float),
    ("float4", N::Float),
    ("double precision", N::Double),
    ("float8", N::Double),
    ("character varying", N::String),
    ("varchar", N::String),
    ("character", N::String),
    ("char", N::String),
    ("bpchar", N::String),
    ("name", N::String),
    ("text", N::Text),
    ("citext", N::Text),
    ("date", N::Date),
    ("time", N::Time),
    ("time without time zone", N::Time),
    ("time with time zone", N::Time),
    ("timetz", N::Time),
    ("timestamp", N::DateTime),
    ("timestamp without time zone", N::DateTime),
    ("timestamp with time zone", N::Timestamp),
    ("timestamptz", N::Timestamp),
    ("boolean", N::Boolean),
    ("bool", N::Boolean),
    ("bytea", N::Binary),
    ("json", N::Json),
    ("jsonb", N::Json),
    ("uuid", N::Uuid),
];

pub const MYSQL_TYPES: &[(&str, NormalizedType)] = &[
    ("tinyint", N::Integer),
    ("smallint", N::Integer),
    ("mediumint", N::Integer),
    ("int", N::Integer),
    ("integer", N::Integer),
    ("year", N::Integer),
    ("bigint", N::BigInt),
    ("decimal", N::Decimal),
    ("numeric", N::Decimal),
    ("dec", N::Decimal),
    ("fixed", N::Decimal),
    ("float", N::Float),
    ("double", N::Double),
    ("double precision", N::Double),
    ("real", N::Double),
    ("bool", N::Boolean),
    ("boolean", N::Boolean),
    ("char", N::String),
    ("varchar", N::String),
    ("tinytext", N::Text),
    ("text", N::Text),
    ("mediumtext", N::Text),
    ("longtext", N::Text),
    ("date", N::Date),
    ("time", N::Time),
    ("datetime", N::DateTime),
    ("timestamp", N::Timestamp),
    ("binary", N::Binary),
    ("varbinary", N::Binary),
    ("bit", N::Binary),
    ("tinyblob", N::Blob),
    ("blob", N::Blob),
    ("mediumblob", N::Blob),
    ("longblob", N::Blob),
    ("json", N::Json),
    ("enum", N::Enum),
    ("set", N::String),
    ("uuid", N::Uuid),
];

pub const SQLITE_TYPES: &[(&str, NormalizedType)] = &[
    ("integer", N::Integer),
    ("int", N::Integer),
    ("tinyint", N::Integer),
    ("smallint", N::Integer),
    ("mediumint", N::Integer),
    ("bigint", N::BigInt),
    ("int8", N::BigInt),
    ("unsigned big int", N::BigInt),
    ("character", N::String),
    ("varchar", N::String),
    ("varying character", N::String),
    ("nchar", N::String),
    ("native character", N::String),
    ("nvarchar", N::String),
    ("char", N::String),
    ("text", N::Text),
    ("clob", N::Text),
    ("real", N::Double),
    ("double", N::Double),
    ("double precision", N::Double),
    ("float", N::Float),
    ("numeric", N::Decimal),
    ("decimal", N::Decimal),
    ("boolean", N::Boolean),
    ("bool", N::Boolean),
    ("date", N::Date),
    ("datetime", N::DateTime),
    ("timestamp", N::Timestamp),
    ("time", N::Time),
    ("blob", N::Blob),
    ("json", N::Json),
    ("uuid", N::Uuid),
];

fn type_table(engine: EngineType) -> &'static [(&'static str, NormalizedType)] {
    match engine {
        EngineType::Postgres => POSTGRES_TYPES,
        EngineType::MySql => MYSQL_TYPES,
        EngineType::Sqlite => SQLITE_TYPES,
    }
}

lazy_static! {
    static ref TYPE_ARGS: Regex = Regex::new(r"^([a-z][a-z0-9_ ]*?)\s*\(([^)]*)\)(.*)$").unwrap();
    static ref CURRENT_TIME_DEFAULT: Regex = Regex::new(
        r"(?i)^(current_timestamp|current_date|current_time|localtimestamp|localtime|now|sysdate)(\s*\(\s*\d*\s*\))?$"
    )
    .unwrap();
    static ref SQLITE_NOW_DEFAULT: Regex =
        Regex::new(r"(?i)^(datetime|date|time|strftime)\s*\(.*'now'.*\)$").unwrap();
    static ref TYPE_CAST_SUFFIX: Regex = Regex::new(r#"^[a-zA-Z_][\w \."\[\]]*$"#).unwrap();
}

/// Normalize a native type string for the given engine.
///
/// Handles size arguments (`varchar(50)`, `numeric(12,2)`), modifiers
/// (`unsigned`, `zerofill`), Postgres arrays (`_int4`, `text[]`) and the
/// MySQL `tinyint(1)` boolean convention.
pub fn normalize_type(engine: EngineType, native: &str) -> TypeDetails {
    let lowered = native.trim().to_ascii_lowercase();
    let mut details = TypeDetails {
        normalized: N::Unknown,
        length: None,
        precision: None,
        scale: None,
    };

    if lowered.is_empty() {
        return details;
    }

    if lowered.ends_with("[]") || (engine == EngineType::Postgres && lowered.starts_with('_')) {
        details.normalized = N::Array;
        return details;
    }

    let (base, args) = match TYPE_ARGS.captures(&lowered) {
        Some(caps) => {
            let base = caps[1].trim().to_string();
            let args: Vec<u32> = caps[2]
                .split(',')
                .filter_map(|a| a.trim().parse::<u32>().ok())
                .collect();
            (base, args)
        }
        None => (strip_modifiers(&lowered), Vec::new()),
    };
    let base = strip_modifiers(&base);

    if engine == EngineType::MySql && base == "tinyint" && args.first() == Some(&1) {
        details.normalized = N::Boolean;
        return details;
    }
    if engine == EngineType::MySql && base == "bit" && args.first().map_or(true, |n| *n == 1) {
        details.normalized = N::Boolean;
        return details;
    }

    details.normalized = lookup(type_table(engine), &base)
        .or_else(|| match engine {
            EngineType::Sqlite => sqlite_affinity(&base),
            _ => None,
        })
        .unwrap_or(N::Unknown);

    match details.normalized {
        N::String | N::Binary => details.length = args.first().copied(),
        N::Decimal => {
            details.precision = args.first().copied();
            details.scale = args.get(1).copied();
        }
        _ => {}
    }

    details
}

fn strip_modifiers(base: &str) -> String {
    base.trim()
        .trim_end_matches(" zerofill")
        .trim_end_matches(" unsigned")
        .trim_end_matches(" signed")
        .trim()
        .to_string()
}

fn lookup(table: &[(&str, NormalizedType)], base: &str) -> Option<NormalizedType> {
    table.iter().find(|(name, _)| *name == base).map(|(_, ty)| *ty)
}

/// SQLite column affinity rules for declared types outside the table
fn sqlite_affinity(base: &str) -> Option<NormalizedType> {
    if base.contains("int") {
        Some(N::Integer)
    } else if base.contains("char") {
        Some(N::String)
    } else if base.contains("clob") || base.contains("text") {
        Some(N::Text)
    } else if base.contains("blob") {
        Some(N::Blob)
    } else if base.contains("real") || base.contains("floa") || base.contains("doub") {
        Some(N::Double)
    } else {
        None
    }
}

/// Parsed column default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    AutoIncrement,
    CurrentTimestamp,
    /// Raw default text that did not match a known shape
    Expression(String),
}

/// Parse a catalog default-value string. Never fails: unparseable input is
/// returned as [`DefaultValue::Expression`] with the original text.
pub fn parse_default(engine: EngineType, raw: &str) -> DefaultValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return match engine {
            // MySQL reports DEFAULT '' as an empty string
            EngineType::MySql => DefaultValue::String(String::new()),
            _ => DefaultValue::Expression(raw.to_string()),
        };
    }

    let mut text = strip_outer_parens(trimmed);
    if engine == EngineType::Postgres {
        text = strip_pg_casts(text);
    }
    let upper = text.to_ascii_uppercase();

    if upper == "NULL" {
        return DefaultValue::Null;
    }
    if let Some(inner) = unquote(text) {
        return DefaultValue::String(inner);
    }
    if upper.starts_with("NEXTVAL(")
        || upper.contains("AUTO_INCREMENT")
        || upper.contains("AUTOINCREMENT")
        || upper.starts_with("GENERATED ")
        || upper.contains("IDENTITY")
    {
        return DefaultValue::AutoIncrement;
    }
    if CURRENT_TIME_DEFAULT.is_match(text) || SQLITE_NOW_DEFAULT.is_match(text) {
        return DefaultValue::CurrentTimestamp;
    }
    match upper.as_str() {
        "TRUE" | "B'1'" => return DefaultValue::Boolean(true),
        "FALSE" | "B'0'" => return DefaultValue::Boolean(false),
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return DefaultValue::Integer(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        if f.is_finite() {
            return DefaultValue::Float(f);
        }
    }
    // MySQL 8 reports literal string defaults without quotes
    if engine == EngineType::MySql && !text.contains('(') {
        return DefaultValue::String(text.to_string());
    }

    DefaultValue::Expression(raw.to_string())
}

fn strip_outer_parens(s: &str) -> &str {
    let mut current = s;
    while current.starts_with('(') && current.ends_with(')') && parens_wrap_whole(current) {
        current = current[1..current.len() - 1].trim();
    }
    current
}

/// True when the first '(' closes at the final character
fn parens_wrap_whole(s: &str) -> bool {
    let mut depth = 0i32;
    for (i, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return i == s.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

fn strip_pg_casts(s: &str) -> &str {
    let mut current = s;
    while let Some(idx) = current.rfind("::") {
        let suffix = &current[idx + 2..];
        if TYPE_CAST_SUFFIX.is_match(suffix) {
            current = current[..idx].trim();
        } else {
            break;
        }
    }
    current
}

fn unquote(s: &str) -> Option<String> {
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        let inner = &s[1..s.len() - 1];
        if inner.replace("''", "").contains('\'') {
            return None;
        }
        return Some(inner.replace("''", "'"));
    }
    None
}

const SYSTEM_COLUMNS: &[&str] = &[
    "tenant_id",
    "tenantid",
    "created_by",
    "updated_by",
    "deleted_at",
    "version",
    "row_version",
    "password",
    "password_hash",
    "api_key",
    "secret",
];

const NUMERIC_DIMENSIONS: &[&str] = &["year", "month", "quarter", "day", "rank", "position", "sort_order", "zip", "phone"];

/// Infer the business role of a column from its name and type
pub fn infer_data_category(
    name: &str,
    normalized: NormalizedType,
    is_primary_key: bool,
    length: Option<u32>,
) -> DataCategory {
    let lname = name.to_ascii_lowercase();

    if SYSTEM_COLUMNS.contains(&lname.as_str()) || lname.ends_with("_hash") || lname.ends_with("_token") {
        return DataCategory::System;
    }
    let camel_id = name.len() > 2 && name.ends_with("Id");
    if is_primary_key || lname == "id" || lname.ends_with("_id") || camel_id || normalized == N::Uuid {
        return DataCategory::Identifier;
    }
    if normalized.is_temporal() {
        return DataCategory::Date;
    }
    if normalized.is_numeric() {
        if NUMERIC_DIMENSIONS.contains(&lname.as_str()) {
            return DataCategory::Dimension;
        }
        return DataCategory::Measure;
    }
    match normalized {
        N::Text | N::Json | N::Blob | N::Binary => DataCategory::Text,
        N::String if length.map_or(false, |l| l > 255) => DataCategory::Text,
        _ => DataCategory::Dimension,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(engine: EngineType, native: &str) -> NormalizedType {
        normalize_type(engine, native).normalized
    }

    #[test]
    fn test_postgres_mapping_table() {
        let expected = [
            ("int4", N::Integer),
            ("int8", N::BigInt),
            ("numeric", N::Decimal),
            ("float8", N::Double),
            ("varchar", N::String),
            ("character varying(120)", N::String),
            ("text", N::Text),
            ("timestamptz", N::Timestamp),
            ("timestamp without time zone", N::DateTime),
            ("bool", N::Boolean),
            ("jsonb", N::Json),
            ("uuid", N::Uuid),
            ("bytea", N::Binary),
            ("_int4", N::Array),
            ("text[]", N::Array),
            ("tsvector", N::Unknown),
        ];
        for (native, ty) in expected {
            assert_eq!(norm(EngineType::Postgres, native), ty, "postgres {}", native);
        }
    }

    #[test]
    fn test_mysql_mapping_table() {
        let expected = [
            ("tinyint(1)", N::Boolean),
            ("tinyint(4)", N::Integer),
            ("int(11)", N::Integer),
            ("int unsigned", N::Integer),
            ("bigint(20) unsigned", N::BigInt),
            ("decimal(10,2)", N::Decimal),
            ("double", N::Double),
            ("varchar(255)", N::String),
            ("longtext", N::Text),
            ("datetime", N::DateTime),
            ("timestamp", N::Timestamp),
            ("enum('won','lost')", N::Enum),
            ("json", N::Json),
            ("geometry", N::Unknown),
        ];
        for (native, ty) in expected {
            assert_eq!(norm(EngineType::MySql, native), ty, "mysql {}", native);
        }
    }

    #[test]
    fn test_sqlite_mapping_table() {
        let expected = [
            ("VARCHAR(50)", N::String),
            ("INTEGER", N::Integer),
            ("BIGINT", N::BigInt),
            ("REAL", N::Double),
            ("NUMERIC(10,2)", N::Decimal),
            ("TEXT", N::Text),
            ("BLOB", N::Blob),
            ("DATETIME", N::DateTime),
            ("BOOLEAN", N::Boolean),
            ("UNSIGNED BIG INT", N::BigInt),
            ("MEDIUMINTEGER", N::Integer),
            ("", N::Unknown),
            ("WHATEVER", N::Unknown),
        ];
        for (native, ty) in expected {
            assert_eq!(norm(EngineType::Sqlite, native), ty, "sqlite {}", native);
        }
    }

    #[test]
    fn test_same_quantity_normalizes_identically_across_engines() {
        assert_eq!(norm(EngineType::Postgres, "int8"), norm(EngineType::MySql, "bigint(20)"));
        assert_eq!(norm(EngineType::MySql, "bigint(20)"), norm(EngineType::Sqlite, "BIGINT"));
        assert_eq!(norm(EngineType::Postgres, "numeric(12,2)"), norm(EngineType::MySql, "decimal(12,2)"));
        assert_eq!(norm(EngineType::Postgres, "float8"), norm(EngineType::Sqlite, "REAL"));
        assert_eq!(norm(EngineType::Postgres, "float4"), norm(EngineType::MySql, "float"));
    }

    #[test]
    fn test_size_details() {
        let d = normalize_type(EngineType::MySql, "decimal(12,2)");
        assert_eq!((d.precision, d.scale), (Some(12), Some(2)));
        let s = normalize_type(EngineType::Sqlite, "VARCHAR(50)");
        assert_eq!(s.length, Some(50));
    }

    #[test]
    fn test_parse_postgres_defaults() {
        assert_eq!(
            parse_default(EngineType::Postgres, "nextval('deals_id_seq'::regclass)"),
            DefaultValue::AutoIncrement
        );
        assert_eq!(
            parse_default(EngineType::Postgres, "'open'::character varying"),
            DefaultValue::String("open".to_string())
        );
        assert_eq!(parse_default(EngineType::Postgres, "NULL::text"), DefaultValue::Null);
        assert_eq!(parse_default(EngineType::Postgres, "now()"), DefaultValue::CurrentTimestamp);
        assert_eq!(parse_default(EngineType::Postgres, "0"), DefaultValue::Integer(0));
        assert_eq!(parse_default(EngineType::Postgres, "0.5"), DefaultValue::Float(0.5));
        assert_eq!(parse_default(EngineType::Postgres, "true"), DefaultValue::Boolean(true));
        assert_eq!(
            parse_default(EngineType::Postgres, "gen_random_uuid()"),
            DefaultValue::Expression("gen_random_uuid()".to_string())
        );
    }

    #[test]
    fn test_parse_mysql_and_sqlite_defaults() {
        assert_eq!(parse_default(EngineType::MySql, "active"), DefaultValue::String("active".to_string()));
        assert_eq!(parse_default(EngineType::MySql, ""), DefaultValue::String(String::new()));
        assert_eq!(parse_default(EngineType::MySql, "CURRENT_TIMESTAMP(6)"), DefaultValue::CurrentTimestamp);
        assert_eq!(parse_default(EngineType::MySql, "b'1'"), DefaultValue::Boolean(true));
        assert_eq!(
            parse_default(EngineType::MySql, "(uuid())"),
            DefaultValue::Expression("(uuid())".to_string())
        );
        assert_eq!(parse_default(EngineType::Sqlite, "'it''s'"), DefaultValue::String("it's".to_string()));
        assert_eq!(parse_default(EngineType::Sqlite, "(datetime('now'))"), DefaultValue::CurrentTimestamp);
        assert_eq!(parse_default(EngineType::Sqlite, "-1"), DefaultValue::Integer(-1));
    }

    #[test]
    fn test_infer_data_category() {
        assert_eq!(infer_data_category("id", N::Integer, true, None), DataCategory::Identifier);
        assert_eq!(infer_data_category("ownerId", N::Integer, false, None), DataCategory::Identifier);
        assert_eq!(infer_data_category("tenantId", N::String, false, None), DataCategory::System);
        assert_eq!(infer_data_category("amount", N::Decimal, false, None), DataCategory::Measure);
        assert_eq!(infer_data_category("close_date", N::Date, false, None), DataCategory::Date);
        assert_eq!(infer_data_category("stage", N::String, false, Some(50)), DataCategory::Dimension);
        assert_eq!(infer_data_category("notes", N::Text, false, None), DataCategory::Text);
        assert_eq!(infer_data_category("year", N::Integer, false, None), DataCategory::Dimension);
    }
}
