//! Query Planner
//!
//! Turns an analysis into an engine-agnostic `QueryPlan` using schema
//! metadata only. Concepts (amount, stage, close date, owner) are resolved
//! through the metadata service; a concept that cannot be resolved is
//! emitted verbatim so the validator can correct or reject it.

pub mod plan;
pub mod timeframe;

use crate::analyzer::{ChartType, QueryAnalysis, QueryIntent};
use crate::schema::DataCategory;
use crate::vocabulary::SchemaMetadataService;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use plan::{
    Aggregation, Condition, GroupBy, JoinClause, JoinOn, JoinType, Operator, OrderBy, PlanColumn, PlanExpression,
    QueryPlan, SortDirection,
};
pub use timeframe::{date_range, DateRange};

/// Chart hint for the caller's renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    pub chart_type: ChartType,
    /// Output column for the category/time axis
    pub x_axis: Option<String>,
    /// Output column for the value axis
    pub y_axis: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedQuery {
    pub plan: QueryPlan,
    pub visualization: Visualization,
}

/// A grouping dimension resolved to a column, possibly across a join
struct Dimension {
    table: Option<String>,
    column: String,
    join: Option<JoinClause>,
}

pub struct QueryPlanner {
    top_n: u64,
}

impl QueryPlanner {
    pub fn new(top_n: u64) -> Self {
        Self { top_n }
    }

    pub fn plan(&self, analysis: &QueryAnalysis, metadata: &SchemaMetadataService) -> PlannedQuery {
        self.plan_at(analysis, metadata, Utc::now().naive_utc())
    }

    /// Plan with an explicit clock for timeframe resolution
    pub fn plan_at(&self, analysis: &QueryAnalysis, metadata: &SchemaMetadataService, now: NaiveDateTime) -> PlannedQuery {
        let ctx = Planning { metadata, analysis };
        let deals = ctx.table("deals");

        let mut plan = match analysis.intent {
            QueryIntent::GetTopDeals => ctx.top_deals(&deals, self.top_n),
            QueryIntent::AnalyzeWinLoss => ctx.win_loss(&deals),
            QueryIntent::ForecastRevenue => ctx.forecast(&deals),
            QueryIntent::RevenueAnalysis => ctx.revenue(&deals),
            QueryIntent::PipelineOverview => ctx.pipeline(&deals),
            QueryIntent::TeamPerformance => ctx.team(&deals),
            QueryIntent::CustomerInsights => ctx.customers(&deals, self.top_n),
            QueryIntent::ListRecords => ctx.list_records(&deals),
            QueryIntent::GeneralQuery => ctx.listing(&deals),
        };

        if analysis.intent != QueryIntent::AnalyzeWinLoss {
            ctx.apply_stage_filter(&mut plan);
        }
        ctx.apply_timeframe(&mut plan, now);

        if analysis.intent != QueryIntent::GetTopDeals && plan.limit.is_none() {
            plan.limit = analysis.entities.top_n;
        }

        let visualization = visualization_for(&plan, analysis.entities.chart_type);
        debug!(
            intent = %analysis.intent,
            table = %plan.primary_table,
            columns = plan.columns.len(),
            chart = ?visualization.chart_type,
            "Planned query"
        );
        PlannedQuery { plan, visualization }
    }
}

struct Planning<'a> {
    metadata: &'a SchemaMetadataService,
    analysis: &'a QueryAnalysis,
}

impl<'a> Planning<'a> {
    /// Resolve a table concept, falling back to the term itself
    fn table(&self, term: &str) -> String {
        self.metadata
            .find_table_by_business_name(term)
            .unwrap_or_else(|| term.to_string())
    }

    fn try_column(&self, table: &str, term: &str) -> Option<String> {
        self.metadata.find_column_by_synonym(table, term)
    }

    /// Resolve a column concept, falling back to the term itself
    fn column(&self, table: &str, term: &str) -> String {
        self.try_column(table, term).unwrap_or_else(|| term.to_string())
    }

    fn amount(&self, table: &str) -> String {
        self.try_column(table, "amount")
            .or_else(|| self.metadata.first_column_in_category(table, DataCategory::Measure))
            .unwrap_or_else(|| "amount".to_string())
    }

    fn close_date(&self, table: &str) -> String {
        self.try_column(table, "close_date")
            .or_else(|| self.metadata.first_column_in_category(table, DataCategory::Date))
            .unwrap_or_else(|| "close_date".to_string())
    }

    /// Date column timeframes filter on for `table`
    fn date_column(&self, table: &str) -> Option<String> {
        self.try_column(table, "close_date")
            .or_else(|| self.metadata.first_column_in_category(table, DataCategory::Date))
    }

    fn won_filter(&self, table: &str) -> Condition {
        Condition::new(self.column(table, "stage"), Operator::Contains, "won")
    }

    fn listing(&self, table: &str) -> QueryPlan {
        QueryPlan::new(table)
    }

    fn top_deals(&self, deals: &str, default_top_n: u64) -> QueryPlan {
        let mut plan = QueryPlan::new(deals);
        let amount = self.amount(deals);

        let display = self.metadata.display_column(deals);
        let extras = [self.try_column(deals, "stage"), self.try_column(deals, "close_date")];
        for column in display.into_iter().chain(std::iter::once(amount.clone())).chain(extras.into_iter().flatten()) {
            if !plan.columns.iter().any(|c| c.column == column) {
                plan.columns.push(PlanColumn::new(column));
            }
        }

        plan.order_by.push(OrderBy::desc(amount));
        plan.limit = Some(self.analysis.entities.top_n.unwrap_or(default_top_n));
        plan
    }

    fn win_loss(&self, deals: &str) -> QueryPlan {
        let mut plan = QueryPlan::new(deals);
        let outcome = PlanExpression::StageOutcome {
            table: None,
            column: self.column(deals, "stage"),
        };
        plan.columns.push(PlanColumn::expression("outcome", outcome.clone()));
        plan.columns.push(PlanColumn::count_all("deal_count"));
        plan.columns
            .push(PlanColumn::new(self.amount(deals)).aggregate(Aggregation::Sum).alias("total_amount"));
        plan.group_by.push(GroupBy::expression("outcome", outcome));
        plan.order_by.push(OrderBy::desc("deal_count"));
        plan
    }

    fn forecast(&self, deals: &str) -> QueryPlan {
        let mut plan = QueryPlan::new(deals);
        let amount = self.amount(deals);
        let bucket = PlanExpression::DateBucket {
            grain: self.analysis.entities.time_grain.unwrap_or(crate::analyzer::TimeGrain::Month),
            table: None,
            column: self.close_date(deals),
        };
        let bucket_alias = bucket_alias(&bucket);

        plan.columns.push(PlanColumn::expression(bucket_alias.clone(), bucket.clone()));
        plan.columns
            .push(PlanColumn::new(amount.clone()).aggregate(Aggregation::Sum).alias("pipeline_amount"));
        if let Some(probability) = self.try_column(deals, "probability") {
            let weighted = PlanExpression::Weighted {
                table: None,
                value: amount,
                weight: probability,
            };
            plan.columns.push(
                PlanColumn::expression("weighted_amount", weighted).aggregate(Aggregation::Sum),
            );
        }
        plan.conditions
            .push(Condition::new(self.column(deals, "stage"), Operator::NotContains, "closed"));
        plan.group_by.push(GroupBy::expression(bucket_alias.clone(), bucket));
        plan.order_by.push(OrderBy::asc(bucket_alias));
        plan
    }

    fn revenue(&self, deals: &str) -> QueryPlan {
        let mut plan = QueryPlan::new(deals);
        let entities = &self.analysis.entities;

        if let Some(grain) = entities.time_grain {
            let bucket = PlanExpression::DateBucket {
                grain,
                table: None,
                column: self.close_date(deals),
            };
            let alias = bucket_alias(&bucket);
            plan.columns.push(PlanColumn::expression(alias.clone(), bucket.clone()));
            plan.group_by.push(GroupBy::expression(alias.clone(), bucket));
            plan.order_by.push(OrderBy::asc(alias));
        } else if let Some(dimension) = entities.group_by.as_deref() {
            let dim = self.dimension(deals, dimension);
            push_dimension(&mut plan, dim, dimension);
            plan.order_by.push(OrderBy::desc("total_revenue"));
        }

        plan.columns
            .push(PlanColumn::new(self.amount(deals)).aggregate(Aggregation::Sum).alias("total_revenue"));
        if entities.stages.is_empty() {
            plan.conditions.push(self.won_filter(deals));
        }
        plan
    }

    fn pipeline(&self, deals: &str) -> QueryPlan {
        let mut plan = QueryPlan::new(deals);
        let stage = self.column(deals, "stage");
        plan.columns.push(PlanColumn::new(stage.clone()));
        plan.columns.push(PlanColumn::count_all("deal_count"));
        plan.columns
            .push(PlanColumn::new(self.amount(deals)).aggregate(Aggregation::Sum).alias("total_amount"));
        plan.group_by.push(GroupBy::column(None, stage));
        plan.order_by.push(OrderBy::desc("total_amount"));
        plan
    }

    fn team(&self, deals: &str) -> QueryPlan {
        let mut plan = QueryPlan::new(deals);
        let dim = self.dimension(deals, "owner");
        push_dimension(&mut plan, dim, "owner");
        plan.columns.push(PlanColumn::count_all("deal_count"));
        plan.columns
            .push(PlanColumn::new(self.amount(deals)).aggregate(Aggregation::Sum).alias("total_amount"));
        plan.order_by.push(OrderBy::desc("total_amount"));
        plan
    }

    fn customers(&self, deals: &str, default_top_n: u64) -> QueryPlan {
        let customers = self.table("customers");
        let schema = self.metadata.schema();
        let relationship = schema
            .relationships_from(deals)
            .find(|r| r.to_table.eq_ignore_ascii_case(&customers))
            .cloned();

        let Some(rel) = relationship else {
            debug!(table = %customers, "No deals relationship, listing customers");
            let mut plan = QueryPlan::new(customers.clone());
            if let Some(display) = self.metadata.display_column(&customers) {
                plan.columns.push(PlanColumn::new(display));
            }
            return plan;
        };

        let mut plan = QueryPlan::new(deals);
        let display = self
            .metadata
            .display_column(&rel.to_table)
            .unwrap_or_else(|| rel.to_column.clone());
        plan.joins.push(JoinClause {
            table: rel.to_table.clone(),
            join_type: JoinType::Inner,
            on: JoinOn {
                left_table: deals.to_string(),
                left_column: rel.from_column.clone(),
                right_column: rel.to_column.clone(),
            },
        });
        plan.columns
            .push(PlanColumn::qualified(rel.to_table.clone(), display.clone()).alias("customer"));
        plan.columns.push(PlanColumn::count_all("deal_count"));
        plan.columns.push(
            PlanColumn::qualified(deals, self.amount(deals))
                .aggregate(Aggregation::Sum)
                .alias("total_revenue"),
        );
        if self.analysis.entities.stages.is_empty() {
            let mut won = self.won_filter(deals);
            won.table = Some(deals.to_string());
            plan.conditions.push(won);
        }
        plan.group_by.push(GroupBy::column(Some(rel.to_table), display));
        plan.order_by.push(OrderBy::desc("total_revenue"));
        plan.limit = Some(self.analysis.entities.top_n.unwrap_or(default_top_n));
        plan
    }

    fn list_records(&self, deals: &str) -> QueryPlan {
        match self.analysis.entities.target.as_deref() {
            Some(target) => QueryPlan::new(self.table(target)),
            None => self.listing(deals),
        }
    }

    /// Resolve a grouping dimension on `table`, following a foreign key to a
    /// display column when the dimension is a reference.
    fn dimension(&self, table: &str, dimension: &str) -> Dimension {
        let schema = self.metadata.schema();
        let term = match dimension {
            "owner" => "owner_id",
            "customer" => "account_id",
            other => other,
        };

        if let Some(column) = self.try_column(table, term) {
            let fk = schema.table(table).and_then(|t| t.foreign_key_for(&column)).cloned();
            if let Some(fk) = fk {
                if let Some(display) = self.metadata.display_column(&fk.referenced_table) {
                    return Dimension {
                        table: Some(fk.referenced_table.clone()),
                        column: display,
                        join: Some(JoinClause {
                            table: fk.referenced_table,
                            join_type: JoinType::Left,
                            on: JoinOn {
                                left_table: table.to_string(),
                                left_column: fk.column,
                                right_column: fk.referenced_column,
                            },
                        }),
                    };
                }
            }
            return Dimension {
                table: None,
                column,
                join: None,
            };
        }

        // Attribute of a referenced table, e.g. an account's industry
        for rel in schema.relationships_from(table) {
            if let Some(column) = self.try_column(&rel.to_table, dimension) {
                return Dimension {
                    table: Some(rel.to_table.clone()),
                    column,
                    join: Some(JoinClause {
                        table: rel.to_table.clone(),
                        join_type: JoinType::Left,
                        on: JoinOn {
                            left_table: table.to_string(),
                            left_column: rel.from_column.clone(),
                            right_column: rel.to_column.clone(),
                        },
                    }),
                };
            }
        }

        Dimension {
            table: None,
            column: dimension.to_string(),
            join: None,
        }
    }

    /// A single stage narrows the query; several stages are a comparison
    /// and leave the rows unfiltered.
    fn apply_stage_filter(&self, plan: &mut QueryPlan) {
        let stages = &self.analysis.entities.stages;
        if stages.len() != 1 {
            return;
        }
        let Some(stage) = self.try_column(&plan.primary_table, "stage") else {
            return;
        };
        let mut condition = Condition::new(stage, Operator::Contains, stages[0].clone());
        if !plan.joins.is_empty() {
            condition.table = Some(plan.primary_table.clone());
        }
        plan.conditions.push(condition);
    }

    fn apply_timeframe(&self, plan: &mut QueryPlan, now: NaiveDateTime) {
        let Some(timeframe) = self.analysis.entities.timeframe else {
            return;
        };
        let Some(column) = self.date_column(&plan.primary_table) else {
            debug!(table = %plan.primary_table, "No date column for timeframe");
            return;
        };
        let Some(range) = date_range(timeframe, now) else {
            return;
        };
        let table = (!plan.joins.is_empty()).then(|| plan.primary_table.clone());
        for (operator, ts) in [(Operator::GtEq, range.start), (Operator::LtEq, range.end)] {
            let mut condition = Condition::new(column.clone(), operator, DateRange::format(ts));
            condition.table = table.clone();
            plan.conditions.push(condition);
        }
    }
}

fn bucket_alias(expression: &PlanExpression) -> String {
    match expression {
        PlanExpression::DateBucket { grain, .. } => grain.as_str().to_string(),
        PlanExpression::StageOutcome { .. } => "outcome".to_string(),
        PlanExpression::Weighted { .. } => "weighted".to_string(),
    }
}

fn push_dimension(plan: &mut QueryPlan, dim: Dimension, alias: &str) {
    if let Some(join) = dim.join {
        plan.joins.push(join);
    }
    let mut column = PlanColumn::new(dim.column.clone()).alias(alias);
    column.table = dim.table.clone();
    plan.columns.push(column);
    plan.group_by.push(GroupBy::column(dim.table, dim.column));
}

fn visualization_for(plan: &QueryPlan, requested: Option<ChartType>) -> Visualization {
    let time_bucket = plan
        .group_by
        .iter()
        .find(|g| matches!(g.expression, Some(PlanExpression::DateBucket { .. })));

    let chart_type = requested.unwrap_or(if time_bucket.is_some() {
        ChartType::Line
    } else if !plan.group_by.is_empty() {
        ChartType::Bar
    } else {
        ChartType::Table
    });

    let x_axis = plan
        .columns
        .iter()
        .find(|c| c.aggregation.is_none())
        .map(|c| c.output_name().to_string());
    let y_axis = plan
        .columns
        .iter()
        .rev()
        .find(|c| c.aggregation.is_some())
        .map(|c| c.output_name().to_string());

    Visualization {
        chart_type,
        x_axis: if plan.group_by.is_empty() { None } else { x_axis },
        y_axis,
    }
}
