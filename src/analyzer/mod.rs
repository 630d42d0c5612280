//! Query Analyzer
//!
//! Classifies a free-text question into an intent and extracts entities.
//! Deterministic: same question, same analysis.

pub mod entities;
pub mod patterns;

use crate::error::InsightError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

pub use entities::{extract_entities, extract_keywords, ChartType, Entities, TimeGrain, Timeframe};

/// Confidence assigned when nothing matched
pub const GENERAL_CONFIDENCE: f64 = 0.3;
/// Confidence assigned when an intent was inherited from context
pub const CONTEXT_CONFIDENCE: f64 = 0.6;
const MAX_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryIntent {
    GetTopDeals,
    AnalyzeWinLoss,
    ForecastRevenue,
    RevenueAnalysis,
    PipelineOverview,
    TeamPerformance,
    CustomerInsights,
    ListRecords,
    GeneralQuery,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::GetTopDeals => "GET_TOP_DEALS",
            QueryIntent::AnalyzeWinLoss => "ANALYZE_WIN_LOSS",
            QueryIntent::ForecastRevenue => "FORECAST_REVENUE",
            QueryIntent::RevenueAnalysis => "REVENUE_ANALYSIS",
            QueryIntent::PipelineOverview => "PIPELINE_OVERVIEW",
            QueryIntent::TeamPerformance => "TEAM_PERFORMANCE",
            QueryIntent::CustomerInsights => "CUSTOMER_INSIGHTS",
            QueryIntent::ListRecords => "LIST_RECORDS",
            QueryIntent::GeneralQuery => "GENERAL_QUERY",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryIntent {
    type Err = InsightError;

    /// Accepts intent names in any case plus a few topic aliases, so a
    /// last-topic hint like `win_rate` maps onto an intent.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        let intent = match key.as_str() {
            "GET_TOP_DEALS" | "TOP_DEALS" => QueryIntent::GetTopDeals,
            "ANALYZE_WIN_LOSS" | "WIN_LOSS" | "WIN_RATE" | "WINLOSS" => QueryIntent::AnalyzeWinLoss,
            "FORECAST_REVENUE" | "FORECAST" => QueryIntent::ForecastRevenue,
            "REVENUE_ANALYSIS" | "REVENUE" | "SALES" => QueryIntent::RevenueAnalysis,
            "PIPELINE_OVERVIEW" | "PIPELINE" => QueryIntent::PipelineOverview,
            "TEAM_PERFORMANCE" | "TEAM" => QueryIntent::TeamPerformance,
            "CUSTOMER_INSIGHTS" | "CUSTOMERS" => QueryIntent::CustomerInsights,
            "LIST_RECORDS" | "LIST" => QueryIntent::ListRecords,
            "GENERAL_QUERY" | "GENERAL" => QueryIntent::GeneralQuery,
            _ => return Err(InsightError::Config(format!("Unknown query intent '{}'", s))),
        };
        Ok(intent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub question: String,
    pub intent: QueryIntent,
    pub entities: Entities,
    pub confidence: f64,
    pub keywords: Vec<String>,
    pub requires_context: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, question: &str) -> QueryAnalysis {
        let scores = patterns::score_intents(question);

        // Strictly greater keeps the earlier intent on ties
        let mut best: Option<(QueryIntent, usize)> = None;
        for (intent, score) in scores {
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((intent, score));
            }
        }

        let (intent, confidence) = match best {
            Some((intent, score)) => (intent, (0.5 + 0.15 * score as f64).min(MAX_CONFIDENCE)),
            None => (QueryIntent::GeneralQuery, GENERAL_CONFIDENCE),
        };

        let entities = extract_entities(question);
        let requires_context = entities.anaphora || (best.is_none() && patterns::FOLLOW_UP.is_match(question));

        debug!(
            intent = %intent,
            confidence,
            requires_context,
            "Analyzed question"
        );

        QueryAnalysis {
            question: question.to_string(),
            intent,
            entities,
            confidence,
            keywords: extract_keywords(question),
            requires_context,
        }
    }

    /// Resolve a context-dependent question against the previous topic
    pub fn refine_with_context(&self, mut analysis: QueryAnalysis, last_topic: Option<&str>) -> QueryAnalysis {
        if !analysis.requires_context || analysis.intent != QueryIntent::GeneralQuery {
            return analysis;
        }
        let Some(last) = last_topic.and_then(|t| t.parse::<QueryIntent>().ok()) else {
            return analysis;
        };

        let refined = if patterns::WHY.is_match(&analysis.question) && last == QueryIntent::AnalyzeWinLoss {
            QueryIntent::AnalyzeWinLoss
        } else {
            last
        };
        if refined == QueryIntent::GeneralQuery {
            return analysis;
        }

        debug!(from = %analysis.intent, to = %refined, "Refined intent from conversation context");
        analysis.intent = refined;
        analysis.confidence = CONTEXT_CONFIDENCE;
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_deals() {
        let analysis = QueryAnalyzer::new().analyze("top 5 deals");
        assert_eq!(analysis.intent, QueryIntent::GetTopDeals);
        assert_eq!(analysis.entities.top_n, Some(5));
        assert_eq!(analysis.entities.timeframe, None);
        assert!((analysis.confidence - 0.65).abs() < 1e-9);
        assert!(!analysis.requires_context);
    }

    #[test]
    fn test_general_fallback() {
        let analysis = QueryAnalyzer::new().analyze("hello there");
        assert_eq!(analysis.intent, QueryIntent::GeneralQuery);
        assert!((analysis.confidence - GENERAL_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_highest_score_wins() {
        let analysis = QueryAnalyzer::new().analyze("show sales by owner as a bar chart");
        assert_eq!(analysis.intent, QueryIntent::TeamPerformance);
        assert_eq!(QueryAnalyzer::new().analyze("revenue by month").intent, QueryIntent::RevenueAnalysis);
        assert_eq!(QueryAnalyzer::new().analyze("what is our win rate").intent, QueryIntent::AnalyzeWinLoss);
    }

    #[test]
    fn test_confidence_is_capped() {
        let analysis = QueryAnalyzer::new().analyze("pipeline overview: open deals by stage in the funnel");
        assert_eq!(analysis.intent, QueryIntent::PipelineOverview);
        assert!((analysis.confidence - MAX_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_why_after_win_rate() {
        let analyzer = QueryAnalyzer::new();
        let analysis = analyzer.analyze("why?");
        assert!(analysis.requires_context);
        let refined = analyzer.refine_with_context(analysis, Some("win_rate"));
        assert_eq!(refined.intent, QueryIntent::AnalyzeWinLoss);
        assert!((refined.confidence - CONTEXT_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_follow_up_inherits_last_topic() {
        let analyzer = QueryAnalyzer::new();
        let refined = analyzer.refine_with_context(analyzer.analyze("and last month?"), Some("PIPELINE_OVERVIEW"));
        assert_eq!(refined.intent, QueryIntent::PipelineOverview);
        assert_eq!(refined.entities.timeframe, Some(Timeframe::LastMonth));

        let untouched = analyzer.refine_with_context(analyzer.analyze("top 5 deals"), Some("pipeline"));
        assert_eq!(untouched.intent, QueryIntent::GetTopDeals);
    }

    #[test]
    fn test_pronoun_follow_up_uses_last_topic() {
        let analyzer = QueryAnalyzer::new();
        let analysis = analyzer.analyze("what drove that");
        assert!(analysis.requires_context);
        let refined = analyzer.refine_with_context(analysis, Some("forecast"));
        assert_eq!(refined.intent, QueryIntent::ForecastRevenue);

        assert!(analyzer.analyze("break that down by owner").requires_context);
    }

    #[test]
    fn test_intent_parsing() {
        assert_eq!("win-loss".parse::<QueryIntent>().unwrap(), QueryIntent::AnalyzeWinLoss);
        assert_eq!("get_top_deals".parse::<QueryIntent>().unwrap(), QueryIntent::GetTopDeals);
        assert!("astrology".parse::<QueryIntent>().is_err());
        assert_eq!(serde_json::to_string(&QueryIntent::GetTopDeals).unwrap(), "\"GET_TOP_DEALS\"");
    }
}
