//! Learned synonym store
//!
//! When a user approves a correction ("by rep" means `owner_id`), the term is
//! persisted here and merged into the vocabulary on the next load. Backed by
//! a local SQLite file.

use super::BusinessVocabulary;
use crate::error::{InsightError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearnedKind {
    Table,
    Column,
}

impl LearnedKind {
    fn as_str(&self) -> &'static str {
        match self {
            LearnedKind::Table => "table",
            LearnedKind::Column => "column",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "table" => Ok(LearnedKind::Table),
            "column" => Ok(LearnedKind::Column),
            other => Err(InsightError::Vocabulary(format!("Unknown learned synonym kind '{}'", other))),
        }
    }
}

/// A user-approved term mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedSynonym {
    /// Free-text term as the user wrote it
    pub term: String,
    pub kind: LearnedKind,
    pub table_name: String,
    /// Target column for column synonyms
    pub column_name: Option<String>,
    pub learned_at: String,
    pub usage_count: u32,
    pub approved_by: Option<String>,
}

pub struct LearnedSynonymStore {
    path: PathBuf,
    db: Mutex<Connection>,
}

impl LearnedSynonymStore {
    /// Open (or create) the store at the given file path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Connection::open(&path)?;
        let store = Self {
            path,
            db: Mutex::new(db),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| InsightError::Vocabulary("Learned synonym store lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.conn()?;
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS learned_synonyms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                term TEXT NOT NULL,
                kind TEXT NOT NULL,
                table_name TEXT NOT NULL,
                column_name TEXT,
                learned_at TEXT NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 1,
                approved_by TEXT,
                UNIQUE(term, kind, table_name)
            );
            CREATE INDEX IF NOT EXISTS idx_learned_term ON learned_synonyms(term, kind);
            "#,
        )?;
        Ok(())
    }

    /// Record an approved synonym. Re-learning the same term retargets it
    /// and bumps its usage count.
    pub fn learn(
        &self,
        term: &str,
        table_name: &str,
        column_name: Option<&str>,
        approved_by: Option<&str>,
    ) -> Result<LearnedSynonym> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Err(InsightError::Vocabulary("Cannot learn an empty term".to_string()));
        }
        let kind = if column_name.is_some() {
            LearnedKind::Column
        } else {
            LearnedKind::Table
        };

        let db = self.conn()?;
        let updated = db.execute(
            r#"
            UPDATE learned_synonyms
            SET usage_count = usage_count + 1, column_name = ?4
            WHERE term = ?1 AND kind = ?2 AND table_name = ?3
            "#,
            params![term, kind.as_str(), table_name, column_name],
        )?;

        if updated == 0 {
            db.execute(
                r#"
                INSERT INTO learned_synonyms (term, kind, table_name, column_name, learned_at, usage_count, approved_by)
                VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
                "#,
                params![term, kind.as_str(), table_name, column_name, Utc::now().to_rfc3339(), approved_by],
            )?;
            info!(term = %term, table = table_name, column = ?column_name, "Learned new synonym");
        } else {
            info!(term = %term, table = table_name, column = ?column_name, "Reinforced learned synonym");
        }
        drop(db);

        self.get(&term, kind, table_name)?
            .ok_or_else(|| InsightError::Vocabulary(format!("Learned synonym '{}' vanished after write", term)))
    }

    pub fn get(&self, term: &str, kind: LearnedKind, table_name: &str) -> Result<Option<LearnedSynonym>> {
        let db = self.conn()?;
        let row = db
            .query_row(
                r#"
                SELECT term, kind, table_name, column_name, learned_at, usage_count, approved_by
                FROM learned_synonyms
                WHERE term = ?1 AND kind = ?2 AND table_name = ?3
                "#,
                params![term.trim().to_lowercase(), kind.as_str(), table_name],
                row_to_tuple,
            )
            .optional()?;
        row.map(into_synonym).transpose()
    }

    pub fn forget(&self, term: &str, kind: LearnedKind, table_name: &str) -> Result<bool> {
        let db = self.conn()?;
        let removed = db.execute(
            "DELETE FROM learned_synonyms WHERE term = ?1 AND kind = ?2 AND table_name = ?3",
            params![term.trim().to_lowercase(), kind.as_str(), table_name],
        )?;
        Ok(removed > 0)
    }

    /// Every learned synonym, most used first
    pub fn all(&self) -> Result<Vec<LearnedSynonym>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT term, kind, table_name, column_name, learned_at, usage_count, approved_by
            FROM learned_synonyms
            ORDER BY usage_count DESC, term ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], row_to_tuple)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_synonym).collect()
    }

    /// Merge every learned synonym into the vocabulary
    pub fn apply_to(&self, vocabulary: &mut BusinessVocabulary) -> Result<usize> {
        let learned = self.all()?;
        for synonym in &learned {
            match (&synonym.kind, &synonym.column_name) {
                (LearnedKind::Column, Some(column)) => {
                    vocabulary.add_column_synonym(&synonym.table_name, column, &synonym.term)
                }
                _ => vocabulary.add_table_synonym(&synonym.table_name, &synonym.term),
            }
        }
        Ok(learned.len())
    }
}

type SynonymRow = (String, String, String, Option<String>, String, u32, Option<String>);

fn row_to_tuple(row: &rusqlite::Row<'_>) -> rusqlite::Result<SynonymRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_synonym(row: SynonymRow) -> Result<LearnedSynonym> {
    let (term, kind, table_name, column_name, learned_at, usage_count, approved_by) = row;
    Ok(LearnedSynonym {
        term,
        kind: LearnedKind::parse(&kind)?,
        table_name,
        column_name,
        learned_at,
        usage_count,
        approved_by,
    })
}
