//! Per-engine SQL spelling

use crate::analyzer::TimeGrain;
use crate::schema::EngineType;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};

/// Escape character used for every LIKE pattern we generate
pub const LIKE_ESCAPE: char = '!';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlDialect {
    engine: EngineType,
}

impl SqlDialect {
    pub fn new(engine: EngineType) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> EngineType {
        self.engine
    }

    pub fn parser_dialect(&self) -> Box<dyn Dialect> {
        match self.engine {
            EngineType::Postgres => Box::new(PostgreSqlDialect {}),
            EngineType::MySql => Box::new(MySqlDialect {}),
            EngineType::Sqlite => Box::new(SQLiteDialect {}),
        }
    }

    /// Quote an identifier, doubling embedded quote characters
    pub fn quote(&self, ident: &str) -> String {
        let q = match self.engine {
            EngineType::MySql => '`',
            EngineType::Postgres | EngineType::Sqlite => '"',
        };
        let mut out = String::with_capacity(ident.len() + 2);
        out.push(q);
        for ch in ident.chars() {
            if ch == q {
                out.push(q);
            }
            out.push(ch);
        }
        out.push(q);
        out
    }

    /// Placeholder for the 1-based parameter `n`
    pub fn placeholder(&self, n: usize) -> String {
        match self.engine {
            EngineType::Postgres => format!("${}", n),
            EngineType::MySql | EngineType::Sqlite => "?".to_string(),
        }
    }

    pub fn date_bucket(&self, grain: TimeGrain, expr: &str) -> String {
        match self.engine {
            EngineType::Postgres => format!("DATE_TRUNC('{}', {})", grain.as_str(), expr),
            EngineType::MySql => match grain {
                TimeGrain::Day => format!("DATE_FORMAT({}, '%Y-%m-%d')", expr),
                TimeGrain::Week => format!("DATE_FORMAT({}, '%x-W%v')", expr),
                TimeGrain::Month => format!("DATE_FORMAT({}, '%Y-%m-01')", expr),
                TimeGrain::Quarter => format!("CONCAT(YEAR({e}), '-Q', QUARTER({e}))", e = expr),
                TimeGrain::Year => format!("DATE_FORMAT({}, '%Y-01-01')", expr),
            },
            EngineType::Sqlite => match grain {
                TimeGrain::Day => format!("strftime('%Y-%m-%d', {})", expr),
                TimeGrain::Week => format!("strftime('%Y-W%W', {})", expr),
                TimeGrain::Month => format!("strftime('%Y-%m-01', {})", expr),
                TimeGrain::Quarter => format!(
                    "strftime('%Y', {e}) || '-Q' || ((CAST(strftime('%m', {e}) AS INTEGER) + 2) / 3)",
                    e = expr
                ),
                TimeGrain::Year => format!("strftime('%Y-01-01', {})", expr),
            },
        }
    }

    pub fn group_concat(&self, expr: &str) -> String {
        match self.engine {
            EngineType::Postgres => format!("STRING_AGG(CAST({} AS TEXT), ',')", expr),
            EngineType::MySql | EngineType::Sqlite => format!("GROUP_CONCAT({})", expr),
        }
    }

    /// Case-insensitive LIKE against a bound pattern
    pub fn ilike(&self, expr: &str, placeholder: &str, negated: bool) -> String {
        let not = if negated { "NOT " } else { "" };
        match self.engine {
            EngineType::Postgres => format!("{} {}ILIKE {} ESCAPE '{}'", expr, not, placeholder, LIKE_ESCAPE),
            EngineType::MySql | EngineType::Sqlite => format!(
                "LOWER({}) {}LIKE LOWER({}) ESCAPE '{}'",
                expr, not, placeholder, LIKE_ESCAPE
            ),
        }
    }
}

/// `%needle%` with LIKE metacharacters escaped
pub fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if ch == '%' || ch == '_' || ch == LIKE_ESCAPE {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting_doubles_embedded_quotes() {
        assert_eq!(SqlDialect::new(EngineType::Postgres).quote("closeDate"), "\"closeDate\"");
        assert_eq!(SqlDialect::new(EngineType::Sqlite).quote("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(SqlDialect::new(EngineType::MySql).quote("a`b"), "`a``b`");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::new(EngineType::Postgres).placeholder(3), "$3");
        assert_eq!(SqlDialect::new(EngineType::MySql).placeholder(3), "?");
    }

    #[test]
    fn test_month_bucket_per_engine() {
        let col = "\"closeDate\"";
        assert_eq!(
            SqlDialect::new(EngineType::Postgres).date_bucket(TimeGrain::Month, col),
            "DATE_TRUNC('month', \"closeDate\")"
        );
        assert_eq!(
            SqlDialect::new(EngineType::Sqlite).date_bucket(TimeGrain::Month, col),
            "strftime('%Y-%m-01', \"closeDate\")"
        );
        assert!(SqlDialect::new(EngineType::MySql)
            .date_bucket(TimeGrain::Month, "`closeDate`")
            .starts_with("DATE_FORMAT("));
    }

    #[test]
    fn test_contains_pattern_escapes() {
        assert_eq!(contains_pattern("won"), "%won%");
        assert_eq!(contains_pattern("50%_off!"), "%50!%!_off!!%");
    }
}
