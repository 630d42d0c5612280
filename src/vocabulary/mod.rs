//! Business vocabulary
//!
//! Curated business names, synonyms and category overrides layered onto the
//! introspected schema. Entries are keyed by identifier and matched ignoring
//! case and underscores, so `close_date` also covers a `closeDate` column.

pub mod learned;
pub mod service;

use crate::error::{InsightError, Result};
use crate::schema::{DataCategory, DatabaseSchema};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub use learned::{LearnedKind, LearnedSynonym, LearnedSynonymStore};
pub use service::{ColumnMetadata, MatchTier, SchemaMetadataService};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnVocabulary {
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub data_category: Option<DataCategory>,
    #[serde(default)]
    pub aggregatable: Option<bool>,
    #[serde(default)]
    pub groupable: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableVocabulary {
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub columns: IndexMap<String, ColumnVocabulary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessVocabulary {
    #[serde(default)]
    pub tables: IndexMap<String, TableVocabulary>,
}

/// Lowercase and drop separators: `Close Date`, `close_date`, `closeDate` all agree
pub fn canonical(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn push_unique(list: &mut Vec<String>, term: &str) {
    let term = term.trim();
    if term.is_empty() {
        return;
    }
    if !list.iter().any(|existing| existing.eq_ignore_ascii_case(term)) {
        list.push(term.to_string());
    }
}

fn column(
    business_name: &str,
    synonyms: &[&str],
    data_category: Option<DataCategory>,
    aggregatable: Option<bool>,
    groupable: Option<bool>,
) -> ColumnVocabulary {
    ColumnVocabulary {
        business_name: Some(business_name.to_string()),
        synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        data_category,
        aggregatable,
        groupable,
    }
}

fn deal_columns() -> IndexMap<String, ColumnVocabulary> {
    use DataCategory::*;
    let mut columns = IndexMap::new();
    columns.insert(
        "amount".to_string(),
        column(
            "Deal Amount",
            &["revenue", "reveneu", "revenu", "revnue", "value", "deal value", "deal size", "sales", "amt"],
            Some(Measure),
            Some(true),
            Some(false),
        ),
    );
    columns.insert(
        "value".to_string(),
        column("Deal Value", &["amount", "revenue", "reveneu", "deal size"], Some(Measure), Some(true), Some(false)),
    );
    columns.insert(
        "stage".to_string(),
        column("Stage", &["status", "deal stage", "phase", "pipeline stage"], Some(Dimension), Some(false), Some(true)),
    );
    columns.insert(
        "close_date".to_string(),
        column(
            "Close Date",
            &["closed date", "closing date", "expected close", "close", "closed on"],
            Some(Date),
            Some(false),
            Some(true),
        ),
    );
    columns.insert(
        "owner_id".to_string(),
        column(
            "Owner",
            &["owner", "rep", "sales rep", "salesperson", "assigned to", "user"],
            None,
            Some(false),
            Some(true),
        ),
    );
    columns.insert(
        "probability".to_string(),
        column("Win Probability", &["likelihood", "chance", "win chance"], Some(Measure), Some(true), Some(false)),
    );
    columns.insert(
        "name".to_string(),
        column("Deal Name", &["title", "deal", "opportunity name"], Some(Dimension), None, None),
    );
    columns.insert(
        "account_id".to_string(),
        column("Customer", &["customer", "account", "company", "client"], None, Some(false), Some(true)),
    );
    columns.insert(
        "created_at".to_string(),
        column("Created", &["created", "created date", "opened", "created on"], Some(Date), None, None),
    );
    columns
}

impl BusinessVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in CRM vocabulary covering the usual deal, customer and user tables
    pub fn crm_defaults() -> Self {
        let mut vocabulary = Self::new();

        let deals = TableVocabulary {
            business_name: Some("Deals".to_string()),
            synonyms: ["deal", "opportunities", "opportunity", "sales", "pipeline"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            description: Some("Sales opportunities and their value".to_string()),
            category: Some("sales".to_string()),
            columns: deal_columns(),
        };
        vocabulary.tables.insert("deals".to_string(), deals.clone());
        vocabulary.tables.insert(
            "opportunities".to_string(),
            TableVocabulary {
                business_name: Some("Opportunities".to_string()),
                synonyms: vec!["deals".to_string(), "deal".to_string(), "opportunity".to_string()],
                ..deals
            },
        );

        let mut customer_columns = IndexMap::new();
        customer_columns.insert(
            "name".to_string(),
            column("Customer Name", &["customer name", "company name", "account name"], Some(DataCategory::Dimension), None, None),
        );
        customer_columns.insert(
            "industry".to_string(),
            column("Industry", &["sector", "vertical"], Some(DataCategory::Dimension), None, Some(true)),
        );
        let customers = TableVocabulary {
            business_name: Some("Customers".to_string()),
            synonyms: ["customer", "clients", "client", "companies", "company", "accounts", "account"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            description: Some("Customer companies".to_string()),
            category: Some("customers".to_string()),
            columns: customer_columns,
        };
        vocabulary.tables.insert("accounts".to_string(), customers.clone());
        vocabulary.tables.insert("customers".to_string(), customers.clone());
        vocabulary.tables.insert("companies".to_string(), customers);

        let mut user_columns = IndexMap::new();
        user_columns.insert(
            "name".to_string(),
            column("Owner Name", &["owner name", "rep name", "full name"], Some(DataCategory::Dimension), None, Some(true)),
        );
        user_columns.insert(
            "department".to_string(),
            column("Department", &["team", "division"], Some(DataCategory::Dimension), None, Some(true)),
        );
        let users = TableVocabulary {
            business_name: Some("Sales Reps".to_string()),
            synonyms: ["user", "owners", "owner", "reps", "sales reps", "salespeople", "team", "employees"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            description: Some("People who own deals".to_string()),
            category: Some("team".to_string()),
            columns: user_columns,
        };
        vocabulary.tables.insert("users".to_string(), users);

        vocabulary
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| InsightError::Vocabulary(format!("Invalid vocabulary: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let vocabulary = Self::from_json(&content)?;
        info!(path = %path.display(), tables = vocabulary.tables.len(), "Loaded business vocabulary");
        Ok(vocabulary)
    }

    /// Overlay another vocabulary. Scalar fields from `other` win; synonym
    /// lists are unioned.
    pub fn merge(&mut self, other: BusinessVocabulary) {
        for (table, incoming) in other.tables {
            let entry = self.table_entry(&table);
            if incoming.business_name.is_some() {
                entry.business_name = incoming.business_name;
            }
            if incoming.description.is_some() {
                entry.description = incoming.description;
            }
            if incoming.category.is_some() {
                entry.category = incoming.category;
            }
            for synonym in &incoming.synonyms {
                push_unique(&mut entry.synonyms, synonym);
            }
            for (column, col_in) in incoming.columns {
                let col = Self::column_entry(entry, &column);
                if col_in.business_name.is_some() {
                    col.business_name = col_in.business_name;
                }
                if col_in.data_category.is_some() {
                    col.data_category = col_in.data_category;
                }
                if col_in.aggregatable.is_some() {
                    col.aggregatable = col_in.aggregatable;
                }
                if col_in.groupable.is_some() {
                    col.groupable = col_in.groupable;
                }
                for synonym in &col_in.synonyms {
                    push_unique(&mut col.synonyms, synonym);
                }
            }
        }
    }

    pub fn add_table_synonym(&mut self, table: &str, term: &str) {
        push_unique(&mut self.table_entry(table).synonyms, term);
    }

    pub fn add_column_synonym(&mut self, table: &str, column: &str, term: &str) {
        let entry = self.table_entry(table);
        push_unique(&mut Self::column_entry(entry, column).synonyms, term);
    }

    fn table_entry(&mut self, table: &str) -> &mut TableVocabulary {
        let key = canonical(table);
        let existing = self.tables.keys().position(|k| canonical(k) == key);
        match existing {
            Some(idx) => &mut self.tables[idx],
            None => self.tables.entry(table.to_string()).or_default(),
        }
    }

    fn column_entry<'a>(table: &'a mut TableVocabulary, column: &str) -> &'a mut ColumnVocabulary {
        let key = canonical(column);
        let existing = table.columns.keys().position(|k| canonical(k) == key);
        match existing {
            Some(idx) => &mut table.columns[idx],
            None => table.columns.entry(column.to_string()).or_default(),
        }
    }

    pub fn table(&self, table: &str) -> Option<&TableVocabulary> {
        let key = canonical(table);
        self.tables.iter().find(|(k, _)| canonical(k) == key).map(|(_, v)| v)
    }

    /// Apply the overlay to a schema. Pure: returns a new schema.
    pub fn enrich(&self, schema: &DatabaseSchema) -> DatabaseSchema {
        let mut enriched = schema.clone();
        let mut applied = 0usize;

        for table in enriched.tables.values_mut() {
            let Some(vocab) = self.table(&table.name) else {
                continue;
            };
            applied += 1;
            if vocab.business_name.is_some() {
                table.business_name = vocab.business_name.clone();
            }
            if vocab.description.is_some() {
                table.description = vocab.description.clone();
            }
            if vocab.category.is_some() {
                table.category = vocab.category.clone();
            }
            for synonym in &vocab.synonyms {
                push_unique(&mut table.synonyms, synonym);
            }

            for col in table.columns.values_mut() {
                let key = canonical(&col.name);
                let Some((_, col_vocab)) = vocab.columns.iter().find(|(k, _)| canonical(k) == key) else {
                    continue;
                };
                if col_vocab.business_name.is_some() {
                    col.business_name = col_vocab.business_name.clone();
                }
                for synonym in &col_vocab.synonyms {
                    // a synonym naming another real column would shadow it
                    if synonym.eq_ignore_ascii_case(&col.name) {
                        continue;
                    }
                    push_unique(&mut col.synonyms, synonym);
                }
                // System columns (tenant, audit, secrets) keep their category
                if col.data_category != DataCategory::System {
                    if let Some(category) = col_vocab.data_category {
                        col.data_category = category;
                        col.aggregatable = category == DataCategory::Measure;
                        col.groupable = matches!(category, DataCategory::Dimension | DataCategory::Date);
                    }
                    if let Some(aggregatable) = col_vocab.aggregatable {
                        col.aggregatable = aggregatable;
                    }
                    if let Some(groupable) = col_vocab.groupable {
                        col.groupable = groupable;
                    }
                }
            }
        }

        drop_shadowing_synonyms(&mut enriched);
        debug!(tables = applied, "Applied business vocabulary");
        enriched
    }
}

/// Remove column synonyms that equal a sibling column's identifier
fn drop_shadowing_synonyms(schema: &mut DatabaseSchema) {
    for table in schema.tables.values_mut() {
        let names: Vec<String> = table.columns.keys().map(|k| canonical(k)).collect();
        for col in table.columns.values_mut() {
            col.synonyms.retain(|s| !names.contains(&canonical(s)));
        }
    }
}
