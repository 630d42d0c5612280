//! SQL Builder - renders a validated plan to parameterized SQL
//!
//! Identifiers come from the plan (already checked against the schema) and
//! are always quoted. Condition values never appear in the SQL text; they are
//! returned as bound parameters in placeholder order.

use super::dialect::{contains_pattern, SqlDialect};
use super::guard::ensure_single_select;
use crate::error::{InsightError, Result};
use crate::planner::{Aggregation, Condition, JoinType, Operator, PlanColumn, PlanExpression, QueryPlan};
use crate::schema::EngineType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltQuery {
    #[serde(rename = "text")]
    pub sql: String,
    pub params: Vec<Value>,
}

pub struct SqlBuilder {
    dialect: SqlDialect,
}

/// Render `plan` for `engine`
pub fn build(plan: &QueryPlan, engine: EngineType) -> Result<BuiltQuery> {
    SqlBuilder::new(engine).build(plan)
}

impl SqlBuilder {
    pub fn new(engine: EngineType) -> Self {
        Self {
            dialect: SqlDialect::new(engine),
        }
    }

    pub fn build(&self, plan: &QueryPlan) -> Result<BuiltQuery> {
        let render = Render {
            dialect: self.dialect,
            plan,
            qualify: !plan.joins.is_empty(),
        };
        let mut params = Vec::new();

        let select = if plan.columns.is_empty() {
            "*".to_string()
        } else {
            plan.columns
                .iter()
                .map(|c| render.select_item(c))
                .collect::<Result<Vec<_>>>()?
                .join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", select, self.dialect.quote(&plan.primary_table));

        for join in &plan.joins {
            let kind = match join.join_type {
                JoinType::Inner => "INNER JOIN",
                JoinType::Left => "LEFT JOIN",
            };
            sql.push_str(&format!(
                " {} {} ON {} = {}",
                kind,
                self.dialect.quote(&join.table),
                render.qualified(&join.on.left_table, &join.on.left_column),
                render.qualified(&join.table, &join.on.right_column),
            ));
        }

        if !plan.conditions.is_empty() {
            let clauses = plan
                .conditions
                .iter()
                .map(|c| render.condition(c, &mut params))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if !plan.group_by.is_empty() {
            let keys: Vec<String> = plan
                .group_by
                .iter()
                .map(|g| match &g.expression {
                    Some(expression) => render.expression(expression),
                    None => render.column(g.table.as_deref(), &g.column),
                })
                .collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&keys.join(", "));
        }

        if !plan.order_by.is_empty() {
            let keys: Vec<String> = plan
                .order_by
                .iter()
                .map(|o| {
                    let is_alias = o.table.is_none()
                        && plan
                            .columns
                            .iter()
                            .any(|c| c.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&o.column)));
                    let key = if is_alias {
                        self.dialect.quote(&o.column)
                    } else {
                        render.column(o.table.as_deref(), &o.column)
                    };
                    format!("{} {}", key, o.direction.as_str())
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        if let Some(limit) = plan.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        ensure_single_select(&sql, self.dialect)?;
        debug!(engine = %self.dialect.engine(), params = params.len(), sql = %sql, "Built SQL");
        Ok(BuiltQuery { sql, params })
    }
}

struct Render<'a> {
    dialect: SqlDialect,
    plan: &'a QueryPlan,
    qualify: bool,
}

impl<'a> Render<'a> {
    fn qualified(&self, table: &str, column: &str) -> String {
        format!("{}.{}", self.dialect.quote(table), self.dialect.quote(column))
    }

    /// Column reference, table-qualified when the plan joins
    fn column(&self, table: Option<&str>, column: &str) -> String {
        if self.qualify {
            self.qualified(table.unwrap_or(&self.plan.primary_table), column)
        } else {
            self.dialect.quote(column)
        }
    }

    fn expression(&self, expression: &PlanExpression) -> String {
        match expression {
            PlanExpression::DateBucket { grain, table, column } => {
                self.dialect.date_bucket(*grain, &self.column(table.as_deref(), column))
            }
            PlanExpression::StageOutcome { table, column } => {
                let col = self.column(table.as_deref(), column);
                format!(
                    "CASE WHEN LOWER({c}) LIKE '%won%' THEN 'won' WHEN LOWER({c}) LIKE '%lost%' THEN 'lost' ELSE 'open' END",
                    c = col
                )
            }
            PlanExpression::Weighted { table, value, weight } => format!(
                "({} * {} / 100.0)",
                self.column(table.as_deref(), value),
                self.column(table.as_deref(), weight)
            ),
        }
    }

    fn select_item(&self, column: &PlanColumn) -> Result<String> {
        let base = match &column.expression {
            Some(expression) => self.expression(expression),
            None if column.is_star() => "*".to_string(),
            None => self.column(column.table.as_deref(), &column.column),
        };

        let rendered = match &column.aggregation {
            None => base,
            Some(Aggregation::GroupConcat) => self.dialect.group_concat(&base),
            Some(Aggregation::Unknown(name)) => {
                return Err(InsightError::SqlBuild(format!("Unsupported aggregation '{}'", name)))
            }
            Some(aggregation) => format!("{}({})", aggregation.as_str(), base),
        };

        match column.alias.as_deref() {
            Some(alias) if column.expression.is_some() || column.aggregation.is_some() || alias != column.column => {
                Ok(format!("{} AS {}", rendered, self.dialect.quote(alias)))
            }
            _ => Ok(rendered),
        }
    }

    fn bind(&self, value: Value, params: &mut Vec<Value>) -> String {
        params.push(value);
        self.dialect.placeholder(params.len())
    }

    fn condition(&self, condition: &Condition, params: &mut Vec<Value>) -> Result<String> {
        let col = self.column(condition.table.as_deref(), &condition.column);
        let op = condition.operator;

        if op.takes_value() && condition.value.is_null() {
            return Err(InsightError::SqlBuild(format!(
                "Operator {} on '{}' requires a value",
                op.as_str(),
                condition.column
            )));
        }

        let clause = match op {
            Operator::Eq | Operator::Gt | Operator::GtEq | Operator::Lt | Operator::LtEq => {
                let ph = self.bind(condition.value.clone(), params);
                format!("{} {} {}", col, op.as_str(), ph)
            }
            Operator::NotEq => {
                let ph = self.bind(condition.value.clone(), params);
                format!("{} <> {}", col, ph)
            }
            Operator::Like | Operator::NotLike => {
                let ph = self.bind(condition.value.clone(), params);
                format!("{} {} {}", col, op.as_str(), ph)
            }
            Operator::Contains | Operator::NotContains => {
                let needle = match &condition.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let ph = self.bind(Value::String(contains_pattern(&needle)), params);
                self.dialect.ilike(&col, &ph, op == Operator::NotContains)
            }
            Operator::In | Operator::NotIn => {
                let values = match &condition.value {
                    Value::Array(values) => values.clone(),
                    single => vec![single.clone()],
                };
                if values.is_empty() {
                    // Nothing is in an empty set
                    return Ok(if op == Operator::In { "1 = 0" } else { "1 = 1" }.to_string());
                }
                let placeholders: Vec<String> = values.into_iter().map(|v| self.bind(v, params)).collect();
                format!("{} {} ({})", col, op.as_str(), placeholders.join(", "))
            }
            Operator::IsNull | Operator::IsNotNull => format!("{} {}", col, op.as_str()),
        };
        Ok(clause)
    }
}

#[cfg(test)]
mod tests;
