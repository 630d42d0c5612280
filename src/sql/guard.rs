//! Statement guard
//!
//! Re-parses generated SQL for the target dialect. Anything other than one
//! plain SELECT is refused before it leaves the crate.

use super::dialect::SqlDialect;
use crate::error::{InsightError, Result};
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::parser::Parser;

pub fn ensure_single_select(sql: &str, dialect: SqlDialect) -> Result<()> {
    let parser_dialect = dialect.parser_dialect();
    let statements = Parser::parse_sql(parser_dialect.as_ref(), sql)
        .map_err(|e| InsightError::SqlBuild(format!("Generated SQL does not parse as {}: {}", dialect.engine(), e)))?;

    if statements.len() != 1 {
        return Err(InsightError::SqlBuild(format!(
            "Expected exactly one statement, found {}",
            statements.len()
        )));
    }

    match &statements[0] {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) if select.into.is_none() => Ok(()),
            _ => Err(InsightError::SqlBuild("Only a plain SELECT query is allowed".to_string())),
        },
        _ => Err(InsightError::SqlBuild("Generated statement is not a query".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EngineType;

    #[test]
    fn test_accepts_select() {
        let pg = SqlDialect::new(EngineType::Postgres);
        assert!(ensure_single_select("SELECT \"name\" FROM \"deals\" WHERE \"tenantId\" = $1 LIMIT 5", pg).is_ok());
        let my = SqlDialect::new(EngineType::MySql);
        assert!(ensure_single_select("SELECT `name` FROM `deals` WHERE `tenantId` = ? LIMIT 5", my).is_ok());
    }

    #[test]
    fn test_rejects_writes_and_batches() {
        let pg = SqlDialect::new(EngineType::Postgres);
        assert!(ensure_single_select("DELETE FROM deals", pg).is_err());
        assert!(ensure_single_select("SELECT 1; SELECT 2", pg).is_err());
        assert!(ensure_single_select("SELECT 1 UNION SELECT 2", pg).is_err());
        assert!(ensure_single_select("SELEC nonsense", pg).is_err());
    }
}
