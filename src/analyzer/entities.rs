//! Entity extraction
//!
//! Runs independently of intent classification. Every extractor is a small
//! pattern table so new phrasings are data changes.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "days")]
pub enum Timeframe {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisQuarter,
    LastQuarter,
    ThisYear,
    LastYear,
    LastNDays(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Table,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    /// Canonical metric names (`revenue`, `count`, `win_rate`, ...)
    pub metrics: Vec<String>,
    pub timeframe: Option<Timeframe>,
    /// Canonical stage names (`won`, `negotiation`, ...)
    pub stages: Vec<String>,
    pub departments: Vec<String>,
    pub comparison: bool,
    pub anaphora: bool,
    pub top_n: Option<u64>,
    /// Canonical grouping dimension (`owner`, `stage`, `customer`, ...)
    pub group_by: Option<String>,
    pub time_grain: Option<TimeGrain>,
    pub chart_type: Option<ChartType>,
    /// Free-text noun for list questions ("list contacts" -> `contacts`)
    pub target: Option<String>,
}

fn re(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){}", pattern)).expect("entity pattern must compile")
}

lazy_static! {
    static ref METRIC_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("revenue", re(r"\b(?:revenue|reveneu|revenu|revnue|sales|income|earnings|bookings)\b")),
        ("amount", re(r"\b(?:amount|deal\s+value|deal\s+size|value)\b")),
        ("count", re(r"\b(?:count|number\s+of|how\s+many)\b")),
        ("average", re(r"\b(?:average|avg|mean)\b")),
        ("win_rate", re(r"\b(?:win\s*rate|close\s+rate|conversion\s+rate)\b")),
    ];

    static ref STAGE_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("prospecting", re(r"\bprospect(?:ing|s)?\b")),
        ("qualification", re(r"\bqualif(?:ication|ied|ying)\b")),
        ("proposal", re(r"\bproposals?\b")),
        ("negotiation", re(r"\bnegotiat(?:ion|ing)\b")),
        ("won", re(r"\b(?:closed[\s_-]+)?won\b")),
        ("lost", re(r"\b(?:closed[\s_-]+)?lost\b")),
    ];

    static ref DEPARTMENT_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("sales", re(r"\bsales\s+(?:team|department|org)\b")),
        ("marketing", re(r"\bmarketing\b")),
        ("engineering", re(r"\bengineering\b")),
        ("support", re(r"\b(?:support|customer\s+success)\b")),
        ("finance", re(r"\bfinance\b")),
        ("operations", re(r"\b(?:operations|ops)\b")),
    ];

    static ref TIMEFRAME_PATTERNS: Vec<(Timeframe, Regex)> = vec![
        (Timeframe::Today, re(r"\btoday\b")),
        (Timeframe::Yesterday, re(r"\byesterday\b")),
        (Timeframe::ThisWeek, re(r"\bthis\s+week\b")),
        (Timeframe::LastWeek, re(r"\b(?:last|previous|past)\s+week\b")),
        (Timeframe::ThisMonth, re(r"\b(?:this\s+month|month\s+to\s+date|mtd)\b")),
        (Timeframe::LastMonth, re(r"\b(?:last|previous|past)\s+month\b")),
        (Timeframe::ThisQuarter, re(r"\b(?:this\s+quarter|quarter\s+to\s+date|qtd)\b")),
        (Timeframe::LastQuarter, re(r"\b(?:last|previous|past)\s+quarter\b")),
        (Timeframe::ThisYear, re(r"\b(?:this\s+year|year\s+to\s+date|ytd)\b")),
        (Timeframe::LastYear, re(r"\b(?:last|previous|past)\s+year\b")),
    ];

    static ref LAST_N_DAYS: Regex = re(r"\b(?:last|past|previous)\s+(\d{1,4})\s+days?\b");

    static ref TOP_N: Regex = re(r"\b(?:top|first|best|biggest|largest|highest|bottom)\s+(\d{1,5}|[a-z]+)\b");

    static ref GROUP_BY: Regex = re(
        r"\b(?:by|per|for\s+each|grouped\s+by|broken\s+down\s+by|split\s+by)\s+(owner|rep|salesperson|seller|user|stage|status|customer|client|account|company|industry|source|region|department|team|product)s?\b"
    );

    static ref TIME_GRAIN: Regex = re(r"\b(?:by|per|each|every|grouped\s+by)\s+(day|week|month|quarter|year)\b");

    static ref TIME_GRAIN_ADVERB: Regex = re(r"\b(daily|weekly|monthly|quarterly|yearly|annually|annual)\b");

    static ref OVER_TIME: Regex = re(r"\b(?:over\s+time|trend(?:s|ing)?)\b");

    static ref CHART: Regex = re(r"\b(bar|line|pie|table)\s*(?:chart|graph|view)?\b|\b(tabular)\b");

    static ref COMPARISON: Regex = re(r"\b(?:compare|comparison|vs\.?|versus|compared\s+(?:to|with))\b");

    static ref ANAPHORA: Regex = re(r"\b(?:it|them|those|these|same|that\s+one|the\s+previous)\b");

    /// `this`/`that` plus the word after it, if any
    static ref DEMONSTRATIVE: Regex = re(r"\b(?:this|that)\b(?:\s+([a-z_]+))?");

    static ref LIST_TARGET: Regex = re(
        r"^\s*(?:list|show|display|get|give\s+me|find)(?:\s+me)?\s+(?:all\s+)?(?:of\s+)?(?:the\s+|our\s+|my\s+)?([a-z_]+)"
    );

    static ref TOKEN: Regex = Regex::new(r"[a-z0-9_]+").unwrap();
}

const NUMBER_WORDS: &[(&str, u64)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("fifteen", 15),
    ("twenty", 20),
    ("fifty", 50),
    ("hundred", 100),
];

/// Words that may follow a standalone `this`/`that` pronoun
const PRONOUN_FOLLOWERS: &[&str] = &[
    "as", "by", "down", "for", "in", "into", "over", "per", "with", "to", "again", "up", "out", "and", "or",
    "but", "please", "instead", "is", "was", "were", "look", "looks", "mean", "means",
];

/// A `this`/`that` used as a pronoun: at the end of the question or before a
/// function word, never as a determiner ("this month", "that deal").
fn refers_back(lowered: &str) -> bool {
    DEMONSTRATIVE.captures_iter(lowered).any(|c| match c.get(1) {
        None => true,
        Some(next) => PRONOUN_FOLLOWERS.contains(&next.as_str()),
    })
}

/// Words that never name a list target or carry meaning as keywords
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "for", "to", "in", "on", "by", "per", "and", "or", "me", "my", "our", "we", "us", "is",
    "are", "was", "were", "what", "which", "how", "show", "list", "give", "get", "display", "find", "all", "as",
    "with", "from", "this", "that", "it", "do", "did", "have", "has", "top", "chart", "graph", "please", "each",
];

fn canonical_dimension(word: &str) -> &'static str {
    match word {
        "owner" | "rep" | "salesperson" | "seller" | "user" => "owner",
        "stage" | "status" => "stage",
        "customer" | "client" | "account" | "company" => "customer",
        "industry" => "industry",
        "source" => "source",
        "region" => "region",
        "department" | "team" => "department",
        _ => "product",
    }
}

fn parse_count(token: &str) -> Option<u64> {
    token
        .parse::<u64>()
        .ok()
        .or_else(|| NUMBER_WORDS.iter().find(|(w, _)| *w == token).map(|(_, n)| *n))
        .filter(|n| *n > 0)
}

/// Pull every entity out of a question
pub fn extract_entities(question: &str) -> Entities {
    let lowered = question.to_lowercase();
    let mut entities = Entities {
        metrics: METRIC_PATTERNS
            .iter()
            .filter(|(_, p)| p.is_match(&lowered))
            .map(|(name, _)| name.to_string())
            .collect(),
        stages: STAGE_PATTERNS
            .iter()
            .filter(|(_, p)| p.is_match(&lowered))
            .map(|(name, _)| name.to_string())
            .collect(),
        departments: DEPARTMENT_PATTERNS
            .iter()
            .filter(|(_, p)| p.is_match(&lowered))
            .map(|(name, _)| name.to_string())
            .collect(),
        comparison: COMPARISON.is_match(&lowered),
        anaphora: ANAPHORA.is_match(&lowered) || refers_back(&lowered),
        ..Entities::default()
    };

    entities.timeframe = LAST_N_DAYS
        .captures(&lowered)
        .and_then(|c| c[1].parse::<u32>().ok())
        .map(Timeframe::LastNDays)
        .or_else(|| {
            TIMEFRAME_PATTERNS
                .iter()
                .find(|(_, p)| p.is_match(&lowered))
                .map(|(tf, _)| *tf)
        });

    entities.top_n = TOP_N.captures_iter(&lowered).find_map(|c| parse_count(&c[1]));

    entities.group_by = GROUP_BY
        .captures(&lowered)
        .map(|c| canonical_dimension(&c[1]).to_string());

    entities.time_grain = TIME_GRAIN
        .captures(&lowered)
        .map(|c| c[1].to_string())
        .or_else(|| TIME_GRAIN_ADVERB.captures(&lowered).map(|c| c[1].to_string()))
        .map(|g| match g.as_str() {
            "day" | "daily" => TimeGrain::Day,
            "week" | "weekly" => TimeGrain::Week,
            "quarter" | "quarterly" => TimeGrain::Quarter,
            "year" | "yearly" | "annually" | "annual" => TimeGrain::Year,
            _ => TimeGrain::Month,
        })
        .or_else(|| OVER_TIME.is_match(&lowered).then_some(TimeGrain::Month));

    entities.chart_type = CHART.captures(&lowered).map(|c| {
        match c.get(1).map(|m| m.as_str()).unwrap_or("table") {
            "bar" => ChartType::Bar,
            "line" => ChartType::Line,
            "pie" => ChartType::Pie,
            _ => ChartType::Table,
        }
    });

    entities.target = LIST_TARGET
        .captures(&lowered)
        .map(|c| c[1].to_string())
        .filter(|t| !STOPWORDS.contains(&t.as_str()) && parse_count(t).is_none());

    entities
}

/// Meaningful lowercase tokens of the question, de-duplicated in order
pub fn extract_keywords(question: &str) -> Vec<String> {
    let lowered = question.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();
    for token in TOKEN.find_iter(&lowered).map(|m| m.as_str()) {
        if token.len() < 2 || STOPWORDS.contains(&token) {
            continue;
        }
        if !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_n_digits_and_words() {
        assert_eq!(extract_entities("top 5 deals").top_n, Some(5));
        assert_eq!(extract_entities("Top ten opportunities").top_n, Some(10));
        assert_eq!(extract_entities("show all deals").top_n, None);
    }

    #[test]
    fn test_timeframes() {
        assert_eq!(extract_entities("revenue this month").timeframe, Some(Timeframe::ThisMonth));
        assert_eq!(extract_entities("deals won last quarter").timeframe, Some(Timeframe::LastQuarter));
        assert_eq!(extract_entities("sales in the last 30 days").timeframe, Some(Timeframe::LastNDays(30)));
        assert_eq!(extract_entities("top 5 deals").timeframe, None);
    }

    #[test]
    fn test_metrics_with_misspellings() {
        let e = extract_entities("reveneu by month");
        assert_eq!(e.metrics, vec!["revenue"]);
        assert_eq!(e.time_grain, Some(TimeGrain::Month));
        assert_eq!(e.group_by, None);
    }

    #[test]
    fn test_group_by_and_chart() {
        let e = extract_entities("show sales by owner as a bar chart");
        assert_eq!(e.group_by.as_deref(), Some("owner"));
        assert_eq!(e.chart_type, Some(ChartType::Bar));
        assert_eq!(extract_entities("pipeline by stage").group_by.as_deref(), Some("stage"));
        assert_eq!(extract_entities("monthly revenue trend").time_grain, Some(TimeGrain::Month));
    }

    #[test]
    fn test_stages_departments_flags() {
        let e = extract_entities("compare closed won vs lost deals for the marketing team");
        assert_eq!(e.stages, vec!["won", "lost"]);
        assert_eq!(e.departments, vec!["marketing"]);
        assert!(e.comparison);
        assert!(extract_entities("break it down").anaphora);
        assert!(extract_entities("same for last quarter").anaphora);
    }

    #[test]
    fn test_demonstrative_pronouns_refer_back() {
        assert!(extract_entities("what drove that").anaphora);
        assert!(extract_entities("what drove that?").anaphora);
        assert!(extract_entities("show this as a pie chart").anaphora);
        assert!(extract_entities("break that down by owner").anaphora);

        assert!(!extract_entities("revenue this month").anaphora);
        assert!(!extract_entities("how did that quarter go").anaphora);
        assert!(!extract_entities("deals that closed last week").anaphora);
    }

    #[test]
    fn test_list_target() {
        assert_eq!(extract_entities("list contacts").target.as_deref(), Some("contacts"));
        assert_eq!(extract_entities("show me all the invoices").target.as_deref(), Some("invoices"));
        assert_eq!(extract_entities("show all").target, None);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(extract_keywords("Show me the top 5 deals!"), vec!["deals"]);
    }
}
