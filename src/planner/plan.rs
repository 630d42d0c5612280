//! Engine-agnostic query plan
//!
//! A plan names tables and columns, never SQL text. The validator corrects
//! it against the live schema and the SQL builder renders it per dialect.

use crate::analyzer::TimeGrain;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate function applied to a selected column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Aggregation {
    Count,
    Sum,
    Avg,
    Max,
    Min,
    GroupConcat,
    /// Anything else a generative planner might emit; the validator strips it
    Unknown(String),
}

impl Aggregation {
    pub fn as_str(&self) -> &str {
        match self {
            Aggregation::Count => "COUNT",
            Aggregation::Sum => "SUM",
            Aggregation::Avg => "AVG",
            Aggregation::Max => "MAX",
            Aggregation::Min => "MIN",
            Aggregation::GroupConcat => "GROUP_CONCAT",
            Aggregation::Unknown(name) => name,
        }
    }

    /// Aggregations that only make sense over numeric measures
    pub fn needs_measure(&self) -> bool {
        matches!(self, Aggregation::Sum | Aggregation::Avg)
    }
}

impl From<String> for Aggregation {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "COUNT" => Aggregation::Count,
            "SUM" => Aggregation::Sum,
            "AVG" | "AVERAGE" => Aggregation::Avg,
            "MAX" => Aggregation::Max,
            "MIN" => Aggregation::Min,
            "GROUP_CONCAT" | "STRING_AGG" => Aggregation::GroupConcat,
            _ => Aggregation::Unknown(s),
        }
    }
}

impl From<Aggregation> for String {
    fn from(agg: Aggregation) -> Self {
        agg.as_str().to_string()
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed expressions rendered per dialect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanExpression {
    /// Truncate a date column to a time grain
    DateBucket {
        grain: TimeGrain,
        table: Option<String>,
        column: String,
    },
    /// Classify a stage column into `won`, `lost` or `open`
    StageOutcome { table: Option<String>, column: String },
    /// `value * weight / 100`, weight being a percentage
    Weighted {
        table: Option<String>,
        value: String,
        weight: String,
    },
}

impl PlanExpression {
    pub fn table(&self) -> Option<&str> {
        match self {
            PlanExpression::DateBucket { table, .. }
            | PlanExpression::StageOutcome { table, .. }
            | PlanExpression::Weighted { table, .. } => table.as_deref(),
        }
    }

    pub fn table_mut(&mut self) -> &mut Option<String> {
        match self {
            PlanExpression::DateBucket { table, .. }
            | PlanExpression::StageOutcome { table, .. }
            | PlanExpression::Weighted { table, .. } => table,
        }
    }

    /// Referenced column names; every expression reads from a single table
    pub fn columns_mut(&mut self) -> Vec<&mut String> {
        match self {
            PlanExpression::DateBucket { column, .. } | PlanExpression::StageOutcome { column, .. } => vec![column],
            PlanExpression::Weighted { value, weight, .. } => vec![value, weight],
        }
    }
}

/// A selected column. For expression columns `column` is the output name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanColumn {
    pub table: Option<String>,
    pub column: String,
    pub aggregation: Option<Aggregation>,
    pub alias: Option<String>,
    pub expression: Option<PlanExpression>,
}

impl PlanColumn {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
            aggregation: None,
            alias: None,
            expression: None,
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::new(column)
        }
    }

    /// `COUNT(*)`
    pub fn count_all(alias: impl Into<String>) -> Self {
        Self::new("*").aggregate(Aggregation::Count).alias(alias)
    }

    pub fn expression(alias: impl Into<String>, expression: PlanExpression) -> Self {
        let alias = alias.into();
        Self {
            expression: Some(expression),
            alias: Some(alias.clone()),
            ..Self::new(alias)
        }
    }

    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name the column is reachable by in ORDER BY
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }

    pub fn is_star(&self) -> bool {
        self.column == "*" && self.expression.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOn {
    pub left_table: String,
    pub left_column: String,
    /// Column of the joined table
    pub right_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinClause {
    pub table: String,
    pub join_type: JoinType,
    pub on: JoinOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    NotLike,
    /// Case-insensitive substring match
    #[serde(rename = "CONTAINS")]
    Contains,
    #[serde(rename = "NOT CONTAINS")]
    NotContains,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::Contains => "CONTAINS",
            Operator::NotContains => "NOT CONTAINS",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    pub fn takes_value(&self) -> bool {
        !matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub table: Option<String>,
    pub column: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<serde_json::Value>) -> Self {
        Self {
            table: None,
            column: column.into(),
            operator,
            value: value.into(),
        }
    }
}

/// A grouping key. Expression entries carry the select alias in `column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    pub table: Option<String>,
    pub column: String,
    pub expression: Option<PlanExpression>,
}

impl GroupBy {
    pub fn column(table: Option<String>, column: impl Into<String>) -> Self {
        Self {
            table,
            column: column.into(),
            expression: None,
        }
    }

    pub fn expression(alias: impl Into<String>, expression: PlanExpression) -> Self {
        Self {
            table: None,
            column: alias.into(),
            expression: Some(expression),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub table: Option<String>,
    pub column: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            direction: SortDirection::Asc,
            ..Self::desc(column)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub primary_table: String,
    /// Empty selects every column
    #[serde(default)]
    pub columns: Vec<PlanColumn>,
    #[serde(default)]
    pub joins: Vec<JoinClause>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub group_by: Vec<GroupBy>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
}

impl QueryPlan {
    pub fn new(primary_table: impl Into<String>) -> Self {
        Self {
            primary_table: primary_table.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn has_aggregation(&self) -> bool {
        self.columns.iter().any(|c| c.aggregation.is_some())
    }

    /// Whether the plan references `table` as primary or joined table
    pub fn includes_table(&self, table: &str) -> bool {
        self.primary_table.eq_ignore_ascii_case(table) || self.joins.iter().any(|j| j.table.eq_ignore_ascii_case(table))
    }
}
