//! Schema Metadata Service
//!
//! Resolves free-text terms to schema identifiers against an enriched
//! schema. Never touches live data, so results depend only on the schema
//! snapshot and the vocabulary.

use super::{canonical, BusinessVocabulary};
use crate::schema::{ColumnSchema, DataCategory, DatabaseSchema, NormalizedType, TableSchema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strsim::jaro_winkler;

/// How a term matched, strongest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Identifier,
    BusinessName,
    Synonym,
    BusinessNameSubstring,
    SynonymSubstring,
    Fuzzy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub table: String,
    pub column: String,
    pub business_name: Option<String>,
    pub normalized_type: NormalizedType,
    pub data_category: DataCategory,
    pub aggregatable: bool,
    pub groupable: bool,
    pub synonyms: Vec<String>,
}

impl ColumnMetadata {
    fn from_column(table: &str, column: &ColumnSchema) -> Self {
        Self {
            table: table.to_string(),
            column: column.name.clone(),
            business_name: column.business_name.clone(),
            normalized_type: column.normalized_type,
            data_category: column.data_category,
            aggregatable: column.aggregatable,
            groupable: column.groupable,
            synonyms: column.synonyms.clone(),
        }
    }
}

/// Substring tiers ignore fragments shorter than this
const MIN_SUBSTRING_LEN: usize = 3;

#[derive(Clone)]
pub struct SchemaMetadataService {
    schema: Arc<DatabaseSchema>,
    vocabulary: Arc<BusinessVocabulary>,
    fuzzy_threshold: f64,
}

/// Candidate identifier with the names it can be matched by
struct Candidate<'a> {
    identifier: &'a str,
    business_name: Option<&'a str>,
    synonyms: &'a [String],
}

fn substring_match(haystack: &str, needle: &str) -> bool {
    let (h, n) = (haystack.to_lowercase(), needle.to_lowercase());
    let shorter = h.len().min(n.len());
    shorter >= MIN_SUBSTRING_LEN && (h.contains(&n) || n.contains(&h))
}

/// Run the tiered resolution over candidates. Within a tier the first
/// candidate wins; the fuzzy tier takes the best score.
fn resolve<'a>(candidates: &[Candidate<'a>], term: &str, fuzzy_threshold: f64) -> Option<(&'a str, MatchTier)> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    let key = canonical(term);

    let tiers: [(MatchTier, &dyn Fn(&Candidate<'a>) -> bool); 5] = [
        (MatchTier::Identifier, &|c: &Candidate<'a>| canonical(c.identifier) == key),
        (MatchTier::BusinessName, &|c: &Candidate<'a>| c.business_name.map_or(false, |b| canonical(b) == key)),
        (MatchTier::Synonym, &|c: &Candidate<'a>| c.synonyms.iter().any(|s| canonical(s) == key)),
        (MatchTier::BusinessNameSubstring, &|c: &Candidate<'a>| c.business_name.map_or(false, |b| substring_match(b, term))),
        (MatchTier::SynonymSubstring, &|c: &Candidate<'a>| c.synonyms.iter().any(|s| substring_match(s, term))),
    ];
    for (tier, matches) in tiers.iter() {
        if let Some(c) = candidates.iter().find(|c| matches(*c)) {
            return Some((c.identifier, *tier));
        }
    }

    let mut best: Option<(&'a str, f64)> = None;
    for c in candidates {
        let score = std::iter::once(c.identifier)
            .chain(c.business_name)
            .map(|name| jaro_winkler(&canonical(name), &key))
            .fold(0.0_f64, f64::max);
        if score >= fuzzy_threshold && best.map_or(true, |(_, s)| score > s) {
            best = Some((c.identifier, score));
        }
    }
    best.map(|(identifier, _)| (identifier, MatchTier::Fuzzy))
}

impl SchemaMetadataService {
    pub fn new(schema: Arc<DatabaseSchema>, vocabulary: Arc<BusinessVocabulary>, fuzzy_threshold: f64) -> Self {
        Self {
            schema,
            vocabulary,
            fuzzy_threshold,
        }
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    /// Apply the vocabulary overlay to a freshly introspected schema
    pub fn enrich(&self, schema: &DatabaseSchema) -> DatabaseSchema {
        self.vocabulary.enrich(schema)
    }

    /// Resolve a term to a table, reporting how it matched
    pub fn resolve_table(&self, term: &str) -> Option<(&TableSchema, MatchTier)> {
        let candidates: Vec<Candidate<'_>> = self
            .schema
            .tables
            .values()
            .map(|t| Candidate {
                identifier: &t.name,
                business_name: t.business_name.as_deref(),
                synonyms: &t.synonyms,
            })
            .collect();
        let (name, tier) = resolve(&candidates, term, self.fuzzy_threshold)?;
        self.schema.table(name).map(|t| (t, tier))
    }

    pub fn find_table_by_business_name(&self, term: &str) -> Option<String> {
        self.resolve_table(term).map(|(t, _)| t.name.clone())
    }

    /// Resolve a term to a column of `table`, reporting how it matched
    pub fn resolve_column(&self, table: &str, term: &str) -> Option<(&ColumnSchema, MatchTier)> {
        let table = self.schema.table(table)?;
        let candidates: Vec<Candidate<'_>> = table
            .columns
            .values()
            .map(|c| Candidate {
                identifier: &c.name,
                business_name: c.business_name.as_deref(),
                synonyms: &c.synonyms,
            })
            .collect();
        let (name, tier) = resolve(&candidates, term, self.fuzzy_threshold)?;
        table.column(name).map(|c| (c, tier))
    }

    pub fn find_column_by_synonym(&self, table: &str, term: &str) -> Option<String> {
        self.resolve_column(table, term).map(|(c, _)| c.name.clone())
    }

    pub fn get_column_metadata(&self, table: &str, column: &str) -> Option<ColumnMetadata> {
        let t = self.schema.table(table)?;
        let c = t.column(column)?;
        Some(ColumnMetadata::from_column(&t.name, c))
    }

    /// First column of `table` in the given category, in ordinal order
    pub fn first_column_in_category(&self, table: &str, category: DataCategory) -> Option<String> {
        self.schema
            .table(table)?
            .columns
            .values()
            .find(|c| c.data_category == category)
            .map(|c| c.name.clone())
    }

    /// Best display column: a `name`/`title` column, else the first plain dimension
    pub fn display_column(&self, table: &str) -> Option<String> {
        let t = self.schema.table(table)?;
        ["name", "title", "full_name", "display_name", "email"]
            .iter()
            .find_map(|n| t.column(n).map(|c| c.name.clone()))
            .or_else(|| {
                t.columns
                    .values()
                    .find(|c| c.data_category == DataCategory::Dimension && !c.is_numeric())
                    .map(|c| c.name.clone())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EngineType, SchemaSource};

    fn service() -> SchemaMetadataService {
        let mut deals = TableSchema::new("deals");
        for (name, ty) in [
            ("id", "int4"),
            ("tenantId", "varchar"),
            ("name", "varchar"),
            ("amount", "numeric"),
            ("stage", "varchar"),
            ("closeDate", "date"),
            ("ownerId", "int4"),
        ] {
            deals.columns.insert(
                name.to_string(),
                ColumnSchema::from_catalog(EngineType::Postgres, name, ty, true, None, name == "id"),
            );
        }
        let mut accounts = TableSchema::new("accounts");
        accounts.columns.insert(
            "name".to_string(),
            ColumnSchema::from_catalog(EngineType::Postgres, "name", "varchar", true, None, false),
        );
        let raw = DatabaseSchema::assemble(EngineType::Postgres, vec![deals, accounts], SchemaSource::Catalog, None, None);

        let vocabulary = Arc::new(BusinessVocabulary::crm_defaults());
        let enriched = vocabulary.enrich(&raw);
        SchemaMetadataService::new(Arc::new(enriched), vocabulary, 0.92)
    }

    #[test]
    fn test_table_resolution_tiers() {
        let svc = service();
        assert_eq!(svc.resolve_table("DEALS").map(|(t, tier)| (t.name.as_str(), tier)), Some(("deals", MatchTier::Identifier)));
        assert_eq!(svc.resolve_table("customers").unwrap().1, MatchTier::BusinessName);
        assert_eq!(svc.find_table_by_business_name("clients").as_deref(), Some("accounts"));
        assert_eq!(svc.find_table_by_business_name("opportunities").as_deref(), Some("deals"));
        assert_eq!(svc.find_table_by_business_name("invoices"), None);
    }

    #[test]
    fn test_column_resolution() {
        let svc = service();
        assert_eq!(svc.find_column_by_synonym("deals", "close_date").as_deref(), Some("closeDate"));
        assert_eq!(svc.find_column_by_synonym("deals", "reveneu").as_deref(), Some("amount"));
        assert_eq!(svc.find_column_by_synonym("deals", "owner").as_deref(), Some("ownerId"));
        assert_eq!(svc.resolve_column("deals", "Deal Amount").unwrap().1, MatchTier::BusinessName);
        assert_eq!(svc.find_column_by_synonym("deals", "colour"), None);
        assert_eq!(svc.find_column_by_synonym("nope", "amount"), None);
    }

    #[test]
    fn test_business_name_beats_synonym() {
        let mut metrics = TableSchema::new("metrics");
        let mut booked = ColumnSchema::from_catalog(EngineType::Postgres, "booked", "numeric", true, None, false);
        booked.synonyms = vec!["revenue".to_string()];
        let mut recognized = ColumnSchema::from_catalog(EngineType::Postgres, "recognized", "numeric", true, None, false);
        recognized.business_name = Some("Revenue".to_string());
        metrics.columns.insert("booked".to_string(), booked);
        metrics.columns.insert("recognized".to_string(), recognized);
        let schema = DatabaseSchema::assemble(EngineType::Postgres, vec![metrics], SchemaSource::Catalog, None, None);
        let svc = SchemaMetadataService::new(Arc::new(schema), Arc::new(BusinessVocabulary::new()), 0.92);

        let (col, tier) = svc.resolve_column("metrics", "revenue").unwrap();
        assert_eq!(col.name, "recognized");
        assert_eq!(tier, MatchTier::BusinessName);
        assert_eq!(service().resolve_column("deals", "status").unwrap().1, MatchTier::Synonym);
    }

    #[test]
    fn test_fuzzy_fallback() {
        let svc = service();
        let (col, tier) = svc.resolve_column("deals", "amonut").unwrap();
        assert_eq!(col.name, "amount");
        assert_eq!(tier, MatchTier::Fuzzy);
    }

    #[test]
    fn test_column_metadata_and_display() {
        let svc = service();
        let meta = svc.get_column_metadata("deals", "AMOUNT").unwrap();
        assert_eq!(meta.column, "amount");
        assert!(meta.aggregatable);
        assert_eq!(meta.data_category, DataCategory::Measure);
        assert_eq!(svc.display_column("accounts").as_deref(), Some("name"));
        assert_eq!(svc.first_column_in_category("deals", DataCategory::Date).as_deref(), Some("closeDate"));
    }
}
