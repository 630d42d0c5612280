use super::*;
use crate::analyzer::QueryAnalyzer;
use crate::fixtures;
use crate::planner::{GroupBy, OrderBy, QueryPlanner};
use crate::validator::QueryValidator;
use serde_json::json;

/// Analyze, plan, validate and render a question against the fixture schema
fn render(question: &str, engine: EngineType, tenant: &str) -> BuiltQuery {
    let metadata = fixtures::metadata(engine);
    let analysis = QueryAnalyzer::new().analyze(question);
    let planned = QueryPlanner::new(10).plan(&analysis, &metadata);
    let (plan, result) =
        QueryValidator::new(1000, 10000, "tenantId").validate_and_correct(&planned.plan, &metadata, Some(tenant));
    assert!(result.is_valid, "{:?}", result.errors);
    build(&plan, engine).unwrap()
}

#[test]
fn test_top_deals_postgres() {
    let built = render("top 5 deals", EngineType::Postgres, "t1");
    assert_eq!(
        built.sql,
        "SELECT \"name\", \"amount\", \"stage\", \"closeDate\" FROM \"deals\" WHERE \"tenantId\" = $1 ORDER BY \"amount\" DESC LIMIT 5"
    );
    assert_eq!(built.params, vec![json!("t1")]);
}

#[test]
fn test_revenue_by_month_postgres() {
    let built = render("revenue by month", EngineType::Postgres, "acme");
    assert_eq!(
        built.sql,
        "SELECT DATE_TRUNC('month', \"closeDate\") AS \"month\", SUM(\"amount\") AS \"total_revenue\" \
         FROM \"deals\" WHERE \"tenantId\" = $1 AND \"stage\" ILIKE $2 ESCAPE '!' \
         GROUP BY DATE_TRUNC('month', \"closeDate\") ORDER BY \"month\" ASC"
    );
    assert_eq!(built.params, vec![json!("acme"), json!("%won%")]);
}

#[test]
fn test_team_performance_mysql_qualifies_columns() {
    let built = render("show sales by owner", EngineType::MySql, "acme");
    assert_eq!(
        built.sql,
        "SELECT `users`.`name` AS `owner`, COUNT(*) AS `deal_count`, SUM(`deals`.`amount`) AS `total_amount` \
         FROM `deals` LEFT JOIN `users` ON `deals`.`ownerId` = `users`.`id` \
         WHERE `deals`.`tenantId` = ? GROUP BY `users`.`name` ORDER BY `total_amount` DESC"
    );
    assert_eq!(built.params.len(), 1);
}

#[test]
fn test_win_loss_sqlite() {
    let built = render("win rate", EngineType::Sqlite, "acme");
    assert!(built.sql.starts_with(
        "SELECT CASE WHEN LOWER(\"stage\") LIKE '%won%' THEN 'won' WHEN LOWER(\"stage\") LIKE '%lost%' THEN 'lost' ELSE 'open' END AS \"outcome\""
    ));
    assert!(built.sql.contains("GROUP BY CASE WHEN"));
    assert_eq!(built.params, vec![json!("acme")]);
}

#[test]
fn test_in_list_and_null_checks() {
    let mut plan = QueryPlan::new("deals");
    plan.conditions.push(Condition::new("stage", Operator::In, json!(["won", "lost"])));
    plan.conditions.push(Condition::new("closeDate", Operator::IsNotNull, Value::Null));
    plan.conditions.push(Condition::new("amount", Operator::NotEq, 0));
    plan.limit = Some(10);

    let built = build(&plan, EngineType::Sqlite).unwrap();
    assert_eq!(
        built.sql,
        "SELECT * FROM \"deals\" WHERE \"stage\" IN (?, ?) AND \"closeDate\" IS NOT NULL AND \"amount\" <> ? LIMIT 10"
    );
    assert_eq!(built.params, vec![json!("won"), json!("lost"), json!(0)]);

    let pg = build(&plan, EngineType::Postgres).unwrap();
    assert!(pg.sql.contains("IN ($1, $2)"));
    assert!(pg.sql.contains("<> $3"));
}

#[test]
fn test_empty_in_list_matches_nothing() {
    let mut plan = QueryPlan::new("deals");
    plan.conditions.push(Condition::new("stage", Operator::In, json!([])));
    let built = build(&plan, EngineType::Postgres).unwrap();
    assert_eq!(built.sql, "SELECT * FROM \"deals\" WHERE 1 = 0");
    assert!(built.params.is_empty());
}

#[test]
fn test_contains_on_mysql() {
    let mut plan = QueryPlan::new("deals");
    plan.conditions.push(Condition::new("stage", Operator::NotContains, "closed"));
    let built = build(&plan, EngineType::MySql).unwrap();
    assert_eq!(
        built.sql,
        "SELECT * FROM `deals` WHERE LOWER(`stage`) NOT LIKE LOWER(?) ESCAPE '!'"
    );
    assert_eq!(built.params, vec![json!("%closed%")]);
}

#[test]
fn test_values_never_inlined() {
    let mut plan = QueryPlan::new("deals");
    plan.conditions.push(Condition::new("name", Operator::Eq, "x'; DROP TABLE deals; --"));
    let built = build(&plan, EngineType::Postgres).unwrap();
    assert!(!built.sql.contains("DROP"));
    assert_eq!(built.params.len(), 1);
}

#[test]
fn test_group_concat_per_engine() {
    let mut plan = QueryPlan::new("deals");
    plan.columns.push(PlanColumn::new("stage"));
    plan.columns.push(PlanColumn::new("name").aggregate(Aggregation::GroupConcat).alias("names"));
    plan.group_by.push(GroupBy::column(None, "stage"));
    plan.order_by.push(OrderBy::asc("stage"));

    let pg = build(&plan, EngineType::Postgres).unwrap();
    assert!(pg.sql.contains("STRING_AGG(CAST(\"name\" AS TEXT), ',') AS \"names\""));
    let lite = build(&plan, EngineType::Sqlite).unwrap();
    assert!(lite.sql.contains("GROUP_CONCAT(\"name\") AS \"names\""));
}

#[test]
fn test_rejects_unusable_plans() {
    let mut plan = QueryPlan::new("deals");
    plan.columns
        .push(PlanColumn::new("amount").aggregate(Aggregation::Unknown("MEDIAN".to_string())));
    assert!(build(&plan, EngineType::Postgres).is_err());

    let mut plan = QueryPlan::new("deals");
    plan.conditions.push(Condition::new("stage", Operator::Eq, Value::Null));
    assert!(build(&plan, EngineType::Postgres).is_err());
}
