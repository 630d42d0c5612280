//! Intent pattern table
//!
//! Data-driven: each intent owns an ordered list of case-insensitive
//! regexes. Scan order is fixed and doubles as the tie-breaker.

use super::QueryIntent;
use lazy_static::lazy_static;
use regex::Regex;

/// Shared noun alternations
const DEALS: &str = r"(?:deals?|opportunit(?:y|ies))";
const CUSTOMERS: &str = r"(?:customers?|clients?|accounts?|compan(?:y|ies))";

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("intent pattern must compile"))
        .collect()
}

lazy_static! {
    /// Intent patterns in scan order
    pub static ref INTENT_PATTERNS: Vec<(QueryIntent, Vec<Regex>)> = vec![
        (
            QueryIntent::GetTopDeals,
            compile(&[
                format!(r"\b(?:top|biggest|largest|highest|best)\s+(?:\d+\s+|[a-z]+\s+)?{}\b", DEALS),
                format!(r"\b{}\s+by\s+(?:size|amount|value)\b", DEALS),
                format!(r"\b(?:most\s+valuable|high[- ]value)\s+{}\b", DEALS),
            ]),
        ),
        (
            QueryIntent::AnalyzeWinLoss,
            compile(&[
                r"\bwin\s*rate\b".to_string(),
                r"\bwin\s*[/-]?\s*loss\b".to_string(),
                r"\b(?:won|lost)\s+(?:vs\.?|versus|and|or)\s+(?:won|lost)\b".to_string(),
                r"\bwhy\s+(?:did\s+)?(?:we\s+)?(?:lose|lost|win|won)\b".to_string(),
                r"\b(?:close|closing|conversion)\s+rate\b".to_string(),
            ]),
        ),
        (
            QueryIntent::ForecastRevenue,
            compile(&[
                r"\bforecast(?:s|ed|ing)?\b".to_string(),
                r"\bproject(?:ed|ion|ions)\b".to_string(),
                r"\bexpected\s+(?:revenue|sales|closes?)\b".to_string(),
                r"\bweighted\s+pipeline\b".to_string(),
                r"\bnext\s+(?:month|quarter|year)\b".to_string(),
            ]),
        ),
        (
            QueryIntent::RevenueAnalysis,
            compile(&[
                r"\b(?:revenue|reveneu|revenu|revnue|sales|income|earnings|bookings)\b".to_string(),
                r"\bhow\s+much\s+(?:did\s+we\s+|have\s+we\s+)?(?:make|made|earn|earned|sell|sold|close|closed)\b".to_string(),
                r"\b(?:total|sum\s+of)\s+(?:amount|value|deal\s+value)\b".to_string(),
            ]),
        ),
        (
            QueryIntent::PipelineOverview,
            compile(&[
                r"\bpipeline\b".to_string(),
                format!(r"\b{}\s+(?:by|per|in\s+each)\s+stage\b", DEALS),
                r"\bstages?\b".to_string(),
                r"\bfunnel\b".to_string(),
                format!(r"\bopen\s+{}\b", DEALS),
            ]),
        ),
        (
            QueryIntent::TeamPerformance,
            compile(&[
                r"\b(?:team|reps?|salesperson|salespeople|owners?)\b".to_string(),
                r"\b(?:by|per)\s+(?:owner|rep|salesperson|user|seller)\b".to_string(),
                r"\b(?:performance|leaderboard|quota)\b".to_string(),
                r"\bwho\s+(?:closed|sold|won)\b".to_string(),
            ]),
        ),
        (
            QueryIntent::CustomerInsights,
            compile(&[
                format!(r"\b{}\b", CUSTOMERS),
                format!(r"\b(?:top|best|biggest|largest)\s+(?:\d+\s+)?{}\b", CUSTOMERS),
                r"\b(?:churn|retention|lifetime\s+value)\b".to_string(),
            ]),
        ),
        (
            QueryIntent::ListRecords,
            compile(&[
                r"^\s*(?:list|show|display|get|give\s+me|find)\b".to_string(),
                r"\ball\s+(?:the\s+|our\s+|my\s+)?[a-z_]+s\b".to_string(),
            ]),
        ),
    ];

    /// Bare follow-ups that only make sense with conversational context
    pub static ref FOLLOW_UP: Regex =
        Regex::new(r"(?i)^\s*(?:why\b|how\s+come\b|what\s+about\b|how\s+about\b|and\b|also\b|what\s+if\b)").unwrap();

    pub static ref WHY: Regex = Regex::new(r"(?i)^\s*(?:why|how\s+come)\b").unwrap();
}

/// Count matching patterns per intent, in scan order
pub fn score_intents(question: &str) -> Vec<(QueryIntent, usize)> {
    INTENT_PATTERNS
        .iter()
        .map(|(intent, patterns)| (*intent, patterns.iter().filter(|p| p.is_match(question)).count()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_intent_has_patterns() {
        assert_eq!(INTENT_PATTERNS.len(), 8);
        assert!(INTENT_PATTERNS.iter().all(|(_, p)| !p.is_empty()));
        assert!(!INTENT_PATTERNS.iter().any(|(i, _)| *i == QueryIntent::GeneralQuery));
    }

    #[test]
    fn test_scores_follow_scan_order() {
        let scores = score_intents("top 5 deals");
        assert_eq!(scores[0], (QueryIntent::GetTopDeals, 1));
        assert!(scores[1..].iter().all(|(_, s)| *s == 0));
    }

    #[test]
    fn test_follow_up_detection() {
        assert!(FOLLOW_UP.is_match("why?"));
        assert!(FOLLOW_UP.is_match("and last month"));
        assert!(FOLLOW_UP.is_match("What about Q3"));
        assert!(!FOLLOW_UP.is_match("revenue by month"));
    }
}
