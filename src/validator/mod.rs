//! Query Validator
//!
//! Checks a plan against the live schema and repairs what it can. Every
//! repair is recorded as a `Correction` and logged; anything it cannot
//! repair is an error that blocks SQL generation. Validating an already
//! corrected plan yields no further corrections.

use crate::planner::{Aggregation, Condition, GroupBy, Operator, PlanColumn, PlanExpression, QueryPlan};
use crate::schema::TableSchema;
use crate::vocabulary::{canonical, SchemaMetadataService};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionType {
    TableResolved,
    ColumnResolved,
    ColumnRemoved,
    AggregationRemoved,
    GroupByAdded,
    GroupByDeduplicated,
    TenantFilterAdded,
    TenantFilterReplaced,
    LimitAdded,
    LimitClamped,
    OrderByRemoved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    #[serde(rename = "type")]
    pub correction_type: CorrectionType,
    pub description: String,
    pub applied: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub corrections: Vec<Correction>,
}

impl ValidationResult {
    fn correct(&mut self, correction_type: CorrectionType, description: String) {
        info!(correction = ?correction_type, "{}", description);
        self.corrections.push(Correction {
            correction_type,
            description,
            applied: true,
        });
    }

    fn warn(&mut self, message: String) {
        debug!(warning = %message, "Validation warning");
        self.warnings.push(message);
    }

    fn error(&mut self, message: String) {
        debug!(error = %message, "Validation error");
        self.errors.push(message);
    }
}

pub struct QueryValidator {
    default_limit: u64,
    max_limit: u64,
    tenant_column: String,
}

impl QueryValidator {
    pub fn new(default_limit: u64, max_limit: u64, tenant_column: impl Into<String>) -> Self {
        Self {
            default_limit,
            max_limit,
            tenant_column: tenant_column.into(),
        }
    }

    pub fn validate_and_correct(
        &self,
        plan: &QueryPlan,
        metadata: &SchemaMetadataService,
        tenant_id: Option<&str>,
    ) -> (QueryPlan, ValidationResult) {
        let mut plan = plan.clone();
        let mut result = ValidationResult::default();
        let mut pass = Pass {
            metadata,
            result: &mut result,
        };

        if pass.resolve_tables(&mut plan) {
            pass.resolve_columns(&mut plan);
            pass.complete_group_by(&mut plan);
            pass.check_joins(&plan);
            if let Some(tenant_id) = tenant_id {
                pass.enforce_tenant(&mut plan, &self.tenant_column, tenant_id);
            }
            pass.check_aggregations(&plan);
            self.apply_limit(&mut plan, pass.result);
            pass.check_order_by(&mut plan);
        }

        result.is_valid = result.errors.is_empty();
        if result.is_valid {
            debug!(
                table = %plan.primary_table,
                corrections = result.corrections.len(),
                warnings = result.warnings.len(),
                "Plan validated"
            );
        } else {
            info!(table = %plan.primary_table, errors = ?result.errors, "Plan rejected");
        }
        (plan, result)
    }

    fn apply_limit(&self, plan: &mut QueryPlan, result: &mut ValidationResult) {
        match plan.limit {
            None if !plan.has_aggregation() => {
                plan.limit = Some(self.default_limit);
                result.correct(
                    CorrectionType::LimitAdded,
                    format!("Added safety limit of {} rows", self.default_limit),
                );
            }
            Some(limit) if limit > self.max_limit => {
                plan.limit = Some(self.max_limit);
                result.correct(
                    CorrectionType::LimitClamped,
                    format!("Clamped limit {} to maximum {}", limit, self.max_limit),
                );
            }
            _ => {}
        }
    }
}

/// State for a single validation run
struct Pass<'a> {
    metadata: &'a SchemaMetadataService,
    result: &'a mut ValidationResult,
}

impl<'a> Pass<'a> {
    fn table(&self, name: &str) -> Option<&'a TableSchema> {
        self.metadata.schema().table(name)
    }

    /// Canonical name of a table term: identifier first, then vocabulary
    fn resolve_table_name(&mut self, term: &str) -> Option<String> {
        if let Some(table) = self.table(term) {
            if table.name != term {
                self.result.correct(
                    CorrectionType::TableResolved,
                    format!("Resolved table '{}' to '{}'", term, table.name),
                );
            }
            return Some(table.name.clone());
        }
        let resolved = self.metadata.find_table_by_business_name(term)?;
        self.result.correct(
            CorrectionType::TableResolved,
            format!("Resolved table '{}' to '{}'", term, resolved),
        );
        Some(resolved)
    }

    /// Step 1 plus join targets. Returns false when the primary table is unknown.
    fn resolve_tables(&mut self, plan: &mut QueryPlan) -> bool {
        match self.resolve_table_name(&plan.primary_table) {
            Some(name) => plan.primary_table = name,
            None => {
                self.result.error(format!("Table '{}' does not exist", plan.primary_table));
                return false;
            }
        }

        for join in plan.joins.iter_mut() {
            match self.resolve_table_name(&join.table) {
                Some(name) => join.table = name,
                None => self.result.error(format!("Join table '{}' does not exist", join.table)),
            }
            if let Some(left) = self.table(&join.on.left_table) {
                if left.name != join.on.left_table {
                    self.result.correct(
                        CorrectionType::TableResolved,
                        format!("Resolved join source '{}' to '{}'", join.on.left_table, left.name),
                    );
                    join.on.left_table = left.name.clone();
                }
            }
        }
        true
    }

    /// Table a column reference reads from; `None` when it names a table
    /// outside the query.
    fn scope(&mut self, plan: &QueryPlan, table: &mut Option<String>) -> Option<String> {
        let Some(term) = table.clone() else {
            return Some(plan.primary_table.clone());
        };
        let resolved = self.resolve_table_name(&term)?;
        if !plan.includes_table(&resolved) {
            return None;
        }
        *table = Some(resolved.clone());
        Some(resolved)
    }

    /// Resolve a column term on `table`, recording a correction when the
    /// canonical name differs.
    fn resolve_column(&mut self, table: &str, term: &str) -> Option<String> {
        let resolved = self.metadata.find_column_by_synonym(table, term)?;
        if resolved != term {
            self.result.correct(
                CorrectionType::ColumnResolved,
                format!("Resolved column '{}' to '{}.{}'", term, table, resolved),
            );
        }
        Some(resolved)
    }

    fn resolve_expression(&mut self, plan: &QueryPlan, expression: &mut PlanExpression) -> Result<(), String> {
        let Some(table) = self.scope(plan, expression.table_mut()) else {
            return Err(format!("Expression references table '{}' outside the query", expression.table().unwrap_or("")));
        };
        for column in expression.columns_mut() {
            match self.resolve_column(&table, column) {
                Some(resolved) => *column = resolved,
                None => return Err(format!("Column '{}' does not exist on '{}'", column, table)),
            }
        }
        Ok(())
    }

    /// Resolve one select column in place; `Err` carries the reason to drop it
    fn resolve_select(&mut self, plan: &QueryPlan, column: &mut PlanColumn) -> Result<(), String> {
        if let Some(expression) = column.expression.as_mut() {
            return self.resolve_expression(plan, expression);
        }
        if column.is_star() {
            return Ok(());
        }
        let Some(table) = self.scope(plan, &mut column.table) else {
            return Err(format!("Column '{}' references a table outside the query", column.column));
        };
        match self.resolve_column(&table, &column.column) {
            Some(resolved) => {
                column.column = resolved;
                Ok(())
            }
            None => Err(format!("Column '{}' does not exist on '{}'", column.column, table)),
        }
    }

    /// Step 2
    fn resolve_columns(&mut self, plan: &mut QueryPlan) {
        let mut columns = std::mem::take(&mut plan.columns);
        columns.retain_mut(|column| {
            if let Some(Aggregation::Unknown(name)) = &column.aggregation {
                self.result.warn(format!("Unknown aggregation '{}' on '{}'", name, column.column));
                self.result.correct(
                    CorrectionType::AggregationRemoved,
                    format!("Removed unknown aggregation '{}' from '{}'", name, column.column),
                );
                column.aggregation = None;
                if column.is_star() {
                    return false;
                }
            }
            match self.resolve_select(plan, column) {
                Ok(()) => true,
                Err(reason) => {
                    self.result.warn(reason.clone());
                    self.result.correct(
                        CorrectionType::ColumnRemoved,
                        format!("Removed select column '{}': {}", column.output_name(), reason),
                    );
                    false
                }
            }
        });
        plan.columns = columns;
        self.strip_star_columns(plan);

        let mut conditions = std::mem::take(&mut plan.conditions);
        for condition in conditions.iter_mut() {
            if let Err(reason) = self.resolve_condition(plan, condition) {
                // Dropping a filter would widen the result set
                self.result.error(reason);
            }
        }
        plan.conditions = conditions;

        let mut group_by = std::mem::take(&mut plan.group_by);
        group_by.retain_mut(|entry| {
            let outcome = if entry.expression.is_none() && self.bind_group_alias(plan, entry) {
                Ok(())
            } else {
                match entry.expression.as_mut() {
                    Some(expression) => self.resolve_expression(plan, expression),
                    None => self.resolve_group_column(plan, entry),
                }
            };
            match outcome {
                Ok(()) => true,
                Err(reason) => {
                    self.result.warn(reason.clone());
                    self.result.correct(
                        CorrectionType::ColumnRemoved,
                        format!("Removed group-by '{}': {}", entry.column, reason),
                    );
                    false
                }
            }
        });
        plan.group_by = group_by;
    }

    fn resolve_condition(&mut self, plan: &QueryPlan, condition: &mut Condition) -> Result<(), String> {
        let Some(table) = self.scope(plan, &mut condition.table) else {
            return Err(format!("Filter on '{}' references a table outside the query", condition.column));
        };
        match self.resolve_column(&table, &condition.column) {
            Some(resolved) => {
                condition.column = resolved;
                Ok(())
            }
            None => Err(format!("Filter column '{}' does not exist on '{}'", condition.column, table)),
        }
    }

    /// `*` only survives as `COUNT(*)`, or bare in an unaggregated select
    fn strip_star_columns(&mut self, plan: &mut QueryPlan) {
        let mut columns = std::mem::take(&mut plan.columns);
        columns.retain(|column| match &column.aggregation {
            Some(aggregation) if column.is_star() && *aggregation != Aggregation::Count => {
                let reason = format!("{}(*) is not a valid aggregation", aggregation);
                self.result.warn(reason.clone());
                self.result.correct(
                    CorrectionType::ColumnRemoved,
                    format!("Removed select column '{}': {}", column.output_name(), reason),
                );
                false
            }
            _ => true,
        });

        if columns.iter().any(|c| c.aggregation.is_some()) {
            columns.retain(|column| {
                if column.is_star() && column.aggregation.is_none() {
                    self.result.warn("Bare '*' cannot be selected alongside aggregates".to_string());
                    self.result.correct(
                        CorrectionType::ColumnRemoved,
                        "Removed select column '*' from an aggregated select".to_string(),
                    );
                    return false;
                }
                true
            });
        }
        plan.columns = columns;
    }

    /// Point an unqualified group-by that names a select alias at the
    /// aliased column or expression. Returns true when bound.
    fn bind_group_alias(&mut self, plan: &QueryPlan, entry: &mut GroupBy) -> bool {
        if entry.table.is_some() {
            return false;
        }
        let Some(column) = plan.columns.iter().find(|c| {
            c.aggregation.is_none()
                && !c.is_star()
                && c.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&entry.column))
        }) else {
            return false;
        };

        let alias = entry.column.clone();
        match &column.expression {
            Some(expression) => {
                entry.expression = Some(expression.clone());
                entry.column = column.output_name().to_string();
            }
            None if column.table.is_none() && column.column == entry.column => return true,
            None => {
                entry.table = column.table.clone();
                entry.column = column.column.clone();
            }
        }
        self.result.correct(
            CorrectionType::ColumnResolved,
            format!("Bound group-by '{}' to the selected column it aliases", alias),
        );
        true
    }

    fn resolve_group_column(&mut self, plan: &QueryPlan, entry: &mut GroupBy) -> Result<(), String> {
        let Some(table) = self.scope(plan, &mut entry.table) else {
            return Err(format!("Group-by '{}' references a table outside the query", entry.column));
        };
        match self.resolve_column(&table, &entry.column) {
            Some(resolved) => {
                entry.column = resolved;
                Ok(())
            }
            None => Err(format!("Group-by column '{}' does not exist on '{}'", entry.column, table)),
        }
    }

    /// Step 3: every plain selected column is grouped once aggregation is in play
    fn complete_group_by(&mut self, plan: &mut QueryPlan) {
        let primary = plan.primary_table.clone();
        let same_table = |a: &Option<String>, b: &Option<String>| {
            a.as_deref().unwrap_or(&primary).eq_ignore_ascii_case(b.as_deref().unwrap_or(&primary))
        };

        let mut deduped: Vec<GroupBy> = Vec::with_capacity(plan.group_by.len());
        for entry in plan.group_by.drain(..) {
            let duplicate = deduped.iter().any(|existing| match (&existing.expression, &entry.expression) {
                (Some(a), Some(b)) => a == b || existing.column.eq_ignore_ascii_case(&entry.column),
                (None, None) => {
                    same_table(&existing.table, &entry.table) && existing.column.eq_ignore_ascii_case(&entry.column)
                }
                _ => false,
            });
            if duplicate {
                self.result.correct(
                    CorrectionType::GroupByDeduplicated,
                    format!("Removed duplicate group-by '{}'", entry.column),
                );
            } else {
                deduped.push(entry);
            }
        }
        plan.group_by = deduped;

        if !plan.has_aggregation() {
            return;
        }

        for column in plan.columns.iter().filter(|c| c.aggregation.is_none() && !c.is_star()) {
            let covered = plan.group_by.iter().any(|g| match (&column.expression, &g.expression) {
                (Some(expression), Some(grouped)) => {
                    expression == grouped || g.column.eq_ignore_ascii_case(column.output_name())
                }
                (None, None) => same_table(&g.table, &column.table) && g.column.eq_ignore_ascii_case(&column.column),
                _ => false,
            });
            if covered {
                continue;
            }
            let entry = match &column.expression {
                Some(expression) => GroupBy::expression(column.output_name(), expression.clone()),
                None => GroupBy::column(column.table.clone(), column.column.clone()),
            };
            self.result.correct(
                CorrectionType::GroupByAdded,
                format!("Added missing group-by '{}'", entry.column),
            );
            plan.group_by.push(entry);
        }
    }

    /// Step 4
    fn check_joins(&mut self, plan: &QueryPlan) {
        for (i, join) in plan.joins.iter().enumerate() {
            let Some(right) = self.table(&join.table) else {
                continue;
            };
            let left_known = plan.primary_table.eq_ignore_ascii_case(&join.on.left_table)
                || plan.joins[..i].iter().any(|j| j.table.eq_ignore_ascii_case(&join.on.left_table));
            match self.table(&join.on.left_table) {
                Some(left) if left_known => {
                    if !left.has_column(&join.on.left_column) {
                        self.result.error(format!(
                            "Join column '{}.{}' does not exist",
                            left.name, join.on.left_column
                        ));
                    }
                }
                _ => self.result.error(format!(
                    "Join to '{}' starts from '{}', which is not joined earlier",
                    join.table, join.on.left_table
                )),
            }
            if !right.has_column(&join.on.right_column) {
                self.result.error(format!(
                    "Join column '{}.{}' does not exist",
                    right.name, join.on.right_column
                ));
            }
        }
    }

    /// Step 5: exactly one `tenant = ?` filter on the primary table
    fn enforce_tenant(&mut self, plan: &mut QueryPlan, tenant_column: &str, tenant_id: &str) {
        let Some(table) = self.table(&plan.primary_table) else {
            return;
        };
        let key = canonical(tenant_column);
        let Some(column) = table.columns.values().find(|c| canonical(&c.name) == key) else {
            self.result.error(format!(
                "Table '{}' has no tenant column '{}'; refusing to query it without isolation",
                table.name, tenant_column
            ));
            return;
        };
        let column = column.name.clone();

        let primary = plan.primary_table.clone();
        let is_tenant = |c: &Condition| {
            c.column.eq_ignore_ascii_case(&column)
                && c.table.as_deref().map_or(true, |t| t.eq_ignore_ascii_case(&primary))
        };
        let existing: Vec<&Condition> = plan.conditions.iter().filter(|c| is_tenant(*c)).collect();
        let exact = existing.len() == 1
            && existing[0].operator == Operator::Eq
            && existing[0].value.as_str() == Some(tenant_id);
        if exact {
            return;
        }

        let found = existing.len();
        plan.conditions.retain(|c| !is_tenant(c));
        let mut condition = Condition::new(column.clone(), Operator::Eq, tenant_id);
        if !plan.joins.is_empty() {
            condition.table = Some(primary);
        }
        plan.conditions.insert(0, condition);

        if found == 0 {
            self.result.correct(
                CorrectionType::TenantFilterAdded,
                format!("Added tenant filter on '{}'", column),
            );
        } else {
            self.result.correct(
                CorrectionType::TenantFilterReplaced,
                format!("Replaced {} tenant filter(s) on '{}' with the request tenant", found, column),
            );
        }
    }

    /// Step 6
    fn check_aggregations(&mut self, plan: &QueryPlan) {
        for column in &plan.columns {
            let Some(aggregation) = &column.aggregation else {
                continue;
            };
            if !aggregation.needs_measure() || column.expression.is_some() {
                continue;
            }
            let table = column.table.as_deref().unwrap_or(&plan.primary_table);
            let meta = self.metadata.get_column_metadata(table, &column.column);
            if let Some(meta) = meta.filter(|m| !m.aggregatable) {
                self.result.warn(format!(
                    "{} over '{}.{}' which is not marked aggregatable",
                    aggregation, meta.table, meta.column
                ));
            }
        }
    }

    /// Step 8: order keys must be a select alias or a schema column
    fn check_order_by(&mut self, plan: &mut QueryPlan) {
        let mut order_by = std::mem::take(&mut plan.order_by);
        order_by.retain_mut(|order| {
            if order.table.is_none()
                && plan
                    .columns
                    .iter()
                    .any(|c| c.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&order.column)))
            {
                return true;
            }
            let resolved = self
                .scope(plan, &mut order.table)
                .and_then(|table| self.resolve_column(&table, &order.column));
            match resolved {
                Some(column) => {
                    order.column = column;
                    true
                }
                None => {
                    self.result.warn(format!("Order key '{}' matches no column or alias", order.column));
                    self.result.correct(
                        CorrectionType::OrderByRemoved,
                        format!("Removed order key '{}'", order.column),
                    );
                    false
                }
            }
        });
        plan.order_by = order_by;
    }
}
