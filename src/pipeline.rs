//! Query Pipeline
//!
//! The entry point for callers: question in, validated plan and parameterized
//! SQL out. Also hosts the admin operations over the schema cache and the
//! learned synonym store.

use crate::analyzer::{QueryAnalysis, QueryAnalyzer};
use crate::config::InsightConfig;
use crate::db::init_pool;
use crate::error::{InsightError, Result};
use crate::introspect::{create_introspector, ModelRegistry};
use crate::planner::{QueryPlan, QueryPlanner, Visualization};
use crate::schema::{DatabaseSchema, TableSchema};
use crate::schema_cache::{CacheStats, SchemaCacheService};
use crate::sql::{BuiltQuery, SqlBuilder};
use crate::validator::{QueryValidator, ValidationResult};
use crate::vocabulary::{BusinessVocabulary, LearnedSynonym, LearnedSynonymStore, SchemaMetadataService};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<QueryPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<BuiltQuery>,
    pub validation: ValidationResult,
    pub analysis: QueryAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Visualization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    fn failed(request_id: String, analysis: QueryAnalysis, validation: ValidationResult, error: InsightError) -> Self {
        Self {
            success: false,
            request_id,
            plan: None,
            sql: None,
            validation,
            analysis,
            visualization: None,
            error: Some(error.to_string()),
        }
    }
}

pub struct QueryPipeline {
    config: InsightConfig,
    cache: Arc<SchemaCacheService>,
    learned: Option<Arc<LearnedSynonymStore>>,
    analyzer: QueryAnalyzer,
    planner: QueryPlanner,
    validator: QueryValidator,
}

impl QueryPipeline {
    pub fn new(config: InsightConfig, cache: Arc<SchemaCacheService>, learned: Option<Arc<LearnedSynonymStore>>) -> Self {
        Self {
            planner: QueryPlanner::new(config.top_n),
            validator: QueryValidator::new(config.default_limit, config.max_limit, config.tenant_column.clone()),
            analyzer: QueryAnalyzer::new(),
            config,
            cache,
            learned,
        }
    }

    /// Wire up pools, introspector, vocabulary and fallback models from config
    pub async fn from_config(config: InsightConfig) -> Result<Self> {
        config.validate()?;

        let pool = init_pool(config.engine, &config.database_url).await?;
        let introspector = create_introspector(&pool, config.db_schema.clone());

        let mut vocabulary = BusinessVocabulary::crm_defaults();
        if let Some(path) = &config.vocabulary_path {
            vocabulary.merge(BusinessVocabulary::load(path)?);
            info!(path = %path.display(), "Loaded business vocabulary");
        }

        let learned = match &config.learned_store_path {
            Some(path) => {
                let store = LearnedSynonymStore::open(path)?;
                let applied = store.apply_to(&mut vocabulary)?;
                info!(path = %path.display(), applied, "Applied learned synonyms");
                Some(Arc::new(store))
            }
            None => None,
        };

        let registry = match &config.model_registry_path {
            Some(path) => ModelRegistry::load(path)?,
            None => ModelRegistry::crm_defaults(config.engine, &config.tenant_column),
        };

        let cache = Arc::new(SchemaCacheService::new(
            introspector,
            Arc::new(registry),
            Arc::new(vocabulary),
            config.schema_ttl(),
            config.refresh_timeout(),
        ));
        Ok(Self::new(config, cache, learned))
    }

    pub fn config(&self) -> &InsightConfig {
        &self.config
    }

    async fn metadata(&self) -> Result<SchemaMetadataService> {
        let schema = self.cache.get_schema(false).await?;
        Ok(SchemaMetadataService::new(
            schema,
            self.cache.vocabulary(),
            self.config.fuzzy_threshold,
        ))
    }

    /// Analyze, plan, validate and render one question for one tenant.
    ///
    /// Rejected questions come back with `success == false` and the reasons in
    /// `validation.errors`; only infrastructure failures are returned as `Err`.
    pub async fn plan_and_validate_query(
        &self,
        question: &str,
        tenant_id: &str,
        last_topic: Option<&str>,
    ) -> Result<QueryResponse> {
        let request_id = Uuid::new_v4().to_string();
        let analysis = self.analyzer.analyze(question);
        let analysis = self.analyzer.refine_with_context(analysis, last_topic);
        info!(
            request_id = %request_id,
            intent = %analysis.intent,
            confidence = analysis.confidence,
            "Analyzed question"
        );

        let mut validation = ValidationResult::default();
        if question.trim().is_empty() {
            validation.errors.push("Question is empty".to_string());
        }
        if tenant_id.trim().is_empty() {
            validation.errors.push("A tenant id is required".to_string());
        }
        if !validation.errors.is_empty() {
            let error = InsightError::Validation(validation.errors.clone());
            return Ok(QueryResponse::failed(request_id, analysis, validation, error));
        }

        let metadata = self.metadata().await?;
        let planned = self.planner.plan(&analysis, &metadata);
        let (plan, validation) = self
            .validator
            .validate_and_correct(&planned.plan, &metadata, Some(tenant_id));

        if !validation.is_valid {
            warn!(
                request_id = %request_id,
                errors = %validation.errors.iter().join("; "),
                "Plan rejected"
            );
            let error = InsightError::Validation(validation.errors.clone());
            return Ok(QueryResponse::failed(request_id, analysis, validation, error));
        }

        let sql = match SqlBuilder::new(metadata.schema().engine_type).build(&plan) {
            Ok(sql) => sql,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "SQL generation failed");
                return Ok(QueryResponse::failed(request_id, analysis, validation, e));
            }
        };

        info!(
            request_id = %request_id,
            table = %plan.primary_table,
            params = sql.params.len(),
            corrections = validation.corrections.len(),
            "Query ready"
        );
        Ok(QueryResponse {
            success: true,
            request_id,
            plan: Some(plan),
            sql: Some(sql),
            validation,
            analysis,
            visualization: Some(planned.visualization),
            error: None,
        })
    }

    pub async fn get_schema(&self) -> Result<Arc<DatabaseSchema>> {
        self.cache.get_schema(false).await
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.cache.get_schema(false).await?.table_names())
    }

    pub async fn get_table_schema(&self, name: &str) -> Result<TableSchema> {
        let schema = self.cache.get_schema(false).await?;
        schema
            .table(name)
            .cloned()
            .ok_or_else(|| InsightError::NotFound(format!("Table '{}' does not exist", name)))
    }

    pub async fn refresh_schema(&self) -> Result<Arc<DatabaseSchema>> {
        self.cache.refresh_schema().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Persist an approved term for a table (or one of its columns).
    /// Learned terms are merged into the vocabulary on the next startup.
    pub async fn learn_synonym(
        &self,
        term: &str,
        table: &str,
        column: Option<&str>,
        approved_by: Option<&str>,
    ) -> Result<LearnedSynonym> {
        let store = self
            .learned
            .as_ref()
            .ok_or_else(|| InsightError::Config("INSIGHT_LEARNED_STORE_PATH is not set".to_string()))?;

        let target = self.get_table_schema(table).await?;
        let column = match column {
            Some(column) => Some(
                target
                    .column(column)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| {
                        InsightError::NotFound(format!("Column '{}' does not exist on '{}'", column, target.name))
                    })?,
            ),
            None => None,
        };

        store.learn(term, &target.name, column.as_deref(), approved_by)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::QueryIntent;
    use crate::schema::{EngineType, SchemaSource};
    use std::time::Duration;

    fn pipeline(learned: Option<Arc<LearnedSynonymStore>>) -> QueryPipeline {
        let config = InsightConfig::for_url("postgres://localhost/crm").unwrap();
        let registry = Arc::new(ModelRegistry::crm_defaults(EngineType::Postgres, &config.tenant_column));
        let cache = Arc::new(SchemaCacheService::new(
            Arc::clone(&registry) as Arc<dyn crate::introspect::SchemaIntrospector>,
            registry,
            Arc::new(BusinessVocabulary::crm_defaults()),
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));
        QueryPipeline::new(config, cache, learned)
    }

    #[tokio::test]
    async fn test_top_deals_end_to_end() {
        let response = pipeline(None)
            .plan_and_validate_query("top 5 deals", "acme", None)
            .await
            .unwrap();

        assert!(response.success, "{:?}", response.error);
        assert_eq!(response.analysis.intent, QueryIntent::GetTopDeals);
        let sql = response.sql.unwrap();
        assert!(sql.sql.starts_with("SELECT "));
        assert!(sql.sql.contains("FROM \"deals\" WHERE \"tenant_id\" = $1"));
        assert!(sql.sql.ends_with("ORDER BY \"amount\" DESC LIMIT 5"));
        assert_eq!(sql.params, vec![serde_json::json!("acme")]);
        assert!(response.visualization.is_some());
    }

    #[tokio::test]
    async fn test_blank_tenant_is_rejected_before_planning() {
        let response = pipeline(None)
            .plan_and_validate_query("top 5 deals", "  ", None)
            .await
            .unwrap();

        assert!(!response.success);
        assert!(response.sql.is_none());
        assert!(response.plan.is_none());
        assert!(!response.validation.errors.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_table_returns_errors_without_sql() {
        let response = pipeline(None)
            .plan_and_validate_query("list all invoices", "acme", None)
            .await
            .unwrap();

        assert!(!response.success);
        assert!(response.sql.is_none());
        assert!(!response.validation.is_valid);
        assert!(response.error.unwrap().starts_with("Validation failed"));
    }

    #[tokio::test]
    async fn test_follow_up_inherits_last_topic() {
        let response = pipeline(None)
            .plan_and_validate_query("and last month?", "acme", Some("revenue"))
            .await
            .unwrap();

        assert!(response.analysis.requires_context);
        assert_eq!(response.analysis.intent, QueryIntent::RevenueAnalysis);
        assert!(response.success, "{:?}", response.error);
    }

    #[tokio::test]
    async fn test_admin_operations() {
        let pipeline = pipeline(None);

        let tables = pipeline.list_tables().await.unwrap();
        assert!(tables.contains(&"deals".to_string()));

        let deals = pipeline.get_table_schema("DEALS").await.unwrap();
        assert_eq!(deals.name, "deals");
        assert!(matches!(
            pipeline.get_table_schema("invoices").await,
            Err(InsightError::NotFound(_))
        ));

        let schema = pipeline.refresh_schema().await.unwrap();
        assert_eq!(schema.metadata.source, SchemaSource::ModelRegistry);
        assert!(pipeline.cache_stats().await.introspections >= 1);
    }

    #[tokio::test]
    async fn test_learn_synonym_checks_targets() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LearnedSynonymStore::open(dir.path().join("learned.db")).unwrap());
        let pipeline = pipeline(Some(Arc::clone(&store)));

        let learned = pipeline
            .learn_synonym("Rep", "deals", Some("OWNER_ID"), Some("admin"))
            .await
            .unwrap();
        assert_eq!(learned.term, "rep");
        assert_eq!(learned.column_name.as_deref(), Some("owner_id"));

        assert!(matches!(
            pipeline.learn_synonym("rep", "deals", Some("nope"), None).await,
            Err(InsightError::NotFound(_))
        ));
        assert!(matches!(
            pipeline.learn_synonym("rep", "invoices", None, None).await,
            Err(InsightError::NotFound(_))
        ));
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_learn_synonym_without_store() {
        let result = pipeline(None).learn_synonym("rep", "deals", None, None).await;
        assert!(matches!(result, Err(InsightError::Config(_))));
    }
}
