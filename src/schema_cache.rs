//! Schema Cache Service
//!
//! Owns the process-wide enriched schema. Reads within the TTL never touch
//! the database; refreshes are single-flighted so concurrent callers share
//! one catalog scan. A failed refresh keeps the stale schema, or falls back
//! to the model registry when nothing has been cached yet.

use crate::error::{InsightError, Result};
use crate::introspect::{ModelRegistry, SchemaIntrospector};
use crate::schema::DatabaseSchema;
use crate::vocabulary::BusinessVocabulary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

struct CachedSchema {
    schema: Arc<DatabaseSchema>,
    fetched_at: Instant,
    fetched_at_utc: DateTime<Utc>,
}

/// Cache counters
#[derive(Debug, Default)]
struct CacheMetrics {
    hits: AtomicU64,
    introspections: AtomicU64,
    failures: AtomicU64,
    fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub introspections: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub generation: u64,
    pub cached_at: Option<DateTime<Utc>>,
}

pub struct SchemaCacheService {
    introspector: Arc<dyn SchemaIntrospector>,
    fallback: Arc<ModelRegistry>,
    vocabulary: Arc<BusinessVocabulary>,
    ttl: Duration,
    refresh_timeout: Duration,
    state: RwLock<Option<CachedSchema>>,
    refresh_lock: Mutex<()>,
    /// Bumped after every completed refresh attempt
    generation: AtomicU64,
    metrics: CacheMetrics,
}

impl SchemaCacheService {
    pub fn new(
        introspector: Arc<dyn SchemaIntrospector>,
        fallback: Arc<ModelRegistry>,
        vocabulary: Arc<BusinessVocabulary>,
        ttl: Duration,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            introspector,
            fallback,
            vocabulary,
            ttl,
            refresh_timeout,
            state: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            metrics: CacheMetrics::default(),
        }
    }

    pub fn vocabulary(&self) -> Arc<BusinessVocabulary> {
        Arc::clone(&self.vocabulary)
    }

    /// Cached schema if present and within TTL
    async fn fresh(&self) -> Option<Arc<DatabaseSchema>> {
        let state = self.state.read().await;
        state
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.schema))
    }

    /// Return the enriched schema, introspecting when the cache is empty,
    /// expired, or `force_refresh` is set.
    pub async fn get_schema(&self, force_refresh: bool) -> Result<Arc<DatabaseSchema>> {
        if !force_refresh {
            if let Some(schema) = self.fresh().await {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(schema);
            }
        }

        let observed = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        // A refresh may have stored a schema before we read `observed`
        if !force_refresh {
            if let Some(schema) = self.fresh().await {
                debug!("Schema became fresh while waiting for refresh");
                return Ok(schema);
            }
        }

        // Another caller finished a refresh while we waited for the lock
        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(cached) = self.state.read().await.as_ref() {
                debug!("Joined in-flight schema refresh");
                return Ok(Arc::clone(&cached.schema));
            }
        }

        let result = self.refresh_locked().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    pub async fn refresh_schema(&self) -> Result<Arc<DatabaseSchema>> {
        self.get_schema(true).await
    }

    /// Must be called with `refresh_lock` held
    async fn refresh_locked(&self) -> Result<Arc<DatabaseSchema>> {
        let started = Instant::now();
        self.metrics.introspections.fetch_add(1, Ordering::Relaxed);

        let outcome = match tokio::time::timeout(self.refresh_timeout, self.introspector.get_schema()).await {
            Ok(result) => result,
            Err(_) => Err(InsightError::Timeout(format!(
                "Schema introspection exceeded {:?}",
                self.refresh_timeout
            ))),
        };

        match outcome {
            Ok(schema) => {
                let enriched = Arc::new(self.vocabulary.enrich(&schema));
                self.store(Arc::clone(&enriched)).await;
                info!(
                    engine = %enriched.engine_type,
                    tables = enriched.metadata.table_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Schema cache refreshed"
                );
                Ok(enriched)
            }
            Err(e) => {
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                if let Some(cached) = self.state.read().await.as_ref() {
                    warn!(error = %e, "Schema introspection failed; serving stale schema");
                    return Ok(Arc::clone(&cached.schema));
                }

                warn!(error = %e, "Schema introspection failed; using model registry");
                self.metrics.fallbacks.fetch_add(1, Ordering::Relaxed);
                let enriched = Arc::new(self.vocabulary.enrich(&self.fallback.to_schema()));
                self.store(Arc::clone(&enriched)).await;
                Ok(enriched)
            }
        }
    }

    async fn store(&self, schema: Arc<DatabaseSchema>) {
        let mut state = self.state.write().await;
        *state = Some(CachedSchema {
            schema,
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
        });
    }

    pub async fn cached_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.as_ref().map(|c| c.fetched_at_utc)
    }

    pub async fn is_stale(&self) -> bool {
        self.fresh().await.is_none()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            introspections: self.metrics.introspections.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            fallbacks: self.metrics.fallbacks.load(Ordering::Relaxed),
            generation: self.generation.load(Ordering::Acquire),
            cached_at: self.cached_at().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        ColumnSchema, EngineType, ForeignKeyInfo, IndexInfo, SchemaSource, TableSchema,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct CountingIntrospector {
        calls: AtomicUsize,
        failing: AtomicBool,
        delay: Duration,
    }

    impl CountingIntrospector {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                delay,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SchemaIntrospector for CountingIntrospector {
        fn engine(&self) -> EngineType {
            EngineType::Postgres
        }

        async fn get_tables(&self) -> Result<Vec<String>> {
            Ok(vec!["deals".to_string()])
        }

        async fn get_columns(&self, _table: &str) -> Result<Vec<ColumnSchema>> {
            Ok(vec![ColumnSchema::from_catalog(EngineType::Postgres, "amount", "numeric", true, None, false)])
        }

        async fn get_primary_keys(&self, _table: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn get_foreign_keys(&self, _table: &str) -> Result<Vec<ForeignKeyInfo>> {
            Ok(Vec::new())
        }

        async fn get_indexes(&self, _table: &str) -> Result<Vec<IndexInfo>> {
            Ok(Vec::new())
        }

        async fn get_schema(&self) -> Result<DatabaseSchema> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.failing.load(Ordering::SeqCst) {
                return Err(InsightError::Database("connection refused".to_string()));
            }
            let mut deals = TableSchema::new("deals");
            for column in self.get_columns("deals").await? {
                deals.columns.insert(column.name.clone(), column);
            }
            Ok(DatabaseSchema::assemble(EngineType::Postgres, vec![deals], SchemaSource::Catalog, None, None))
        }
    }

    fn service(introspector: Arc<CountingIntrospector>, ttl: Duration, timeout: Duration) -> SchemaCacheService {
        SchemaCacheService::new(
            introspector,
            Arc::new(ModelRegistry::crm_defaults(EngineType::Postgres, "tenant_id")),
            Arc::new(BusinessVocabulary::crm_defaults()),
            ttl,
            timeout,
        )
    }

    #[tokio::test]
    async fn test_ttl_hit_skips_introspection() {
        let introspector = Arc::new(CountingIntrospector::new(Duration::ZERO));
        let cache = service(Arc::clone(&introspector), Duration::from_secs(60), Duration::from_secs(5));

        let first = cache.get_schema(false).await.unwrap();
        let second = cache.get_schema(false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(introspector.calls(), 1);
        assert_eq!(cache.stats().await.hits, 1);
        assert!(!cache.is_stale().await);
    }

    #[tokio::test]
    async fn test_cached_schema_is_enriched() {
        let introspector = Arc::new(CountingIntrospector::new(Duration::ZERO));
        let cache = service(introspector, Duration::from_secs(60), Duration::from_secs(5));
        let schema = cache.get_schema(false).await.unwrap();
        let amount = schema.table("deals").unwrap().column("amount").unwrap();
        assert_eq!(amount.business_name.as_deref(), Some("Deal Amount"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_introspection() {
        let introspector = Arc::new(CountingIntrospector::new(Duration::from_millis(50)));
        let cache = Arc::new(service(Arc::clone(&introspector), Duration::from_secs(60), Duration::from_secs(5)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_schema(false).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(introspector.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_stale_schema() {
        let introspector = Arc::new(CountingIntrospector::new(Duration::ZERO));
        let cache = service(Arc::clone(&introspector), Duration::from_secs(60), Duration::from_secs(5));

        let first = cache.get_schema(false).await.unwrap();
        introspector.failing.store(true, Ordering::SeqCst);
        let after_failure = cache.refresh_schema().await.unwrap();

        assert!(Arc::ptr_eq(&first, &after_failure));
        assert_eq!(after_failure.metadata.source, SchemaSource::Catalog);
        assert_eq!(cache.stats().await.failures, 1);
    }

    #[tokio::test]
    async fn test_failure_with_empty_cache_uses_model_registry() {
        let introspector = Arc::new(CountingIntrospector::new(Duration::ZERO));
        introspector.failing.store(true, Ordering::SeqCst);
        let cache = service(Arc::clone(&introspector), Duration::from_secs(60), Duration::from_secs(5));

        let schema = cache.get_schema(false).await.unwrap();
        assert_eq!(schema.metadata.source, SchemaSource::ModelRegistry);
        assert!(schema.has_table("accounts"));
        assert_eq!(cache.stats().await.fallbacks, 1);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_without_corrupting_cache() {
        let introspector = Arc::new(CountingIntrospector::new(Duration::from_millis(200)));
        let cache = service(Arc::clone(&introspector), Duration::from_secs(60), Duration::from_millis(20));

        let schema = cache.get_schema(false).await.unwrap();
        assert_eq!(schema.metadata.source, SchemaSource::ModelRegistry);
        assert!(cache.cached_at().await.is_some());
    }

    #[tokio::test]
    async fn test_waiter_reuses_schema_stored_under_lock() {
        let introspector = Arc::new(CountingIntrospector::new(Duration::ZERO));
        let cache = Arc::new(service(Arc::clone(&introspector), Duration::from_secs(60), Duration::from_secs(5)));

        let guard = cache.refresh_lock.lock().await;
        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_schema(false).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Stored without a generation bump, as seen by a caller that read
        // the counter after the other refresher finished
        let stored = Arc::new(cache.fallback.to_schema());
        cache.store(Arc::clone(&stored)).await;
        drop(guard);

        let schema = waiter.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&schema, &stored));
        assert_eq!(introspector.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_ttl_reintrospects() {
        let introspector = Arc::new(CountingIntrospector::new(Duration::ZERO));
        let cache = service(Arc::clone(&introspector), Duration::ZERO, Duration::from_secs(5));

        cache.get_schema(false).await.unwrap();
        assert!(cache.is_stale().await);
        cache.get_schema(false).await.unwrap();
        assert_eq!(introspector.calls(), 2);
    }
}
