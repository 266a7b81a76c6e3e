//! Retrieval strategy selection
//!
//! The planner asks the completion service which sources suit a query and
//! parses the JSON it answers with. Any failure (call, parse, nonsense values)
//! falls back to semantic retrieval only; [`StrategyPlanner::analyze`] never
//! fails.

use std::sync::Arc;

use datalive_kg::graph::neo4j::MAX_DEPTH;
use datalive_kg::TimeRange;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::services::CompletionService;

pub const DEFAULT_RAG_LIMIT: usize = 10;
pub const MAX_RAG_LIMIT: usize = 50;
pub const DEFAULT_KG_DEPTH: u32 = 2;

pub const FALLBACK_REASONING: &str = "Default strategy due to analysis error";

const SYSTEM_PROMPT: &str = r#"You are an intelligent query orchestrator for the DataLive knowledge system.

Your role is to analyze user queries and determine the optimal strategy for answering them.

Available strategies:
1. RAG (Vector Search): For semantic search and general questions about documents
2. KAG (Knowledge Graph): For questions about relationships, connections, and entities
3. Temporal Analysis: For questions about time, changes, evolution, or history

Decision criteria:
- Use RAG for: factual questions, document search, general information
- Use KAG for: relationship queries, entity connections, organizational structure
- Use Temporal for: timeline questions, historical changes, date-specific queries
- Use multiple strategies for: complex analytical questions

Always explain your reasoning for the chosen strategy.

Output format:
{
    "use_rag": true/false,
    "use_kag": true/false,
    "use_temporal": true/false,
    "rag_limit": 10,
    "kg_depth": 2,
    "time_range": "last_month" | "last_6_months" | "last_year",
    "reasoning": "Explanation of why this strategy was chosen"
}"#;

/// Which retrieval sources to run for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStrategy {
    pub use_rag: bool,
    pub use_kag: bool,
    pub use_temporal: bool,
    pub rag_limit: usize,
    pub kg_depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    pub reasoning: String,
}

impl Default for QueryStrategy {
    fn default() -> Self {
        Self::fallback(DEFAULT_RAG_LIMIT)
    }
}

impl QueryStrategy {
    /// Semantic retrieval only
    pub fn fallback(rag_limit: usize) -> Self {
        Self {
            use_rag: true,
            use_kag: false,
            use_temporal: false,
            rag_limit,
            kg_depth: DEFAULT_KG_DEPTH,
            time_range: None,
            reasoning: FALLBACK_REASONING.to_string(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.reasoning == FALLBACK_REASONING
    }

    /// Number of enabled sources, at least one for a valid strategy
    pub fn source_count(&self) -> usize {
        [self.use_rag, self.use_kag, self.use_temporal]
            .iter()
            .filter(|enabled| **enabled)
            .count()
    }

    pub fn effective_time_range(&self) -> TimeRange {
        self.time_range.unwrap_or_default()
    }
}

/// Planner output as the model writes it; everything optional
#[derive(Debug, Default, Deserialize)]
struct RawStrategy {
    use_rag: Option<bool>,
    use_kag: Option<bool>,
    use_temporal: Option<bool>,
    rag_limit: Option<u64>,
    kg_depth: Option<u64>,
    time_range: Option<String>,
    reasoning: Option<String>,
}

impl RawStrategy {
    fn into_strategy(self, default_rag_limit: usize) -> QueryStrategy {
        let use_kag = self.use_kag.unwrap_or(false);
        let use_temporal = self.use_temporal.unwrap_or(false);
        let mut use_rag = self.use_rag.unwrap_or(true);
        if !(use_rag || use_kag || use_temporal) {
            use_rag = true;
        }

        let rag_limit = self
            .rag_limit
            .map(|n| (n as usize).clamp(1, MAX_RAG_LIMIT))
            .unwrap_or(default_rag_limit);
        let kg_depth = self
            .kg_depth
            .map(|d| d.clamp(1, MAX_DEPTH as u64) as u32)
            .unwrap_or(DEFAULT_KG_DEPTH);

        let time_range = match self.time_range.as_deref() {
            Some(raw) => Some(TimeRange::parse_or_default(Some(raw))),
            None if use_temporal => Some(TimeRange::default()),
            None => None,
        };

        QueryStrategy {
            use_rag,
            use_kag,
            use_temporal,
            rag_limit,
            kg_depth,
            time_range,
            reasoning: self
                .reasoning
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "No reasoning provided".to_string()),
        }
    }
}

/// The outermost `{...}` span of a model answer
fn extract_json_object(response: &str) -> &str {
    match (response.find('{'), response.rfind('}')) {
        (Some(start), Some(end)) if end > start => &response[start..=end],
        _ => response,
    }
}

pub fn parse_strategy(response: &str, default_rag_limit: usize) -> serde_json::Result<QueryStrategy> {
    let raw: RawStrategy = serde_json::from_str(extract_json_object(response))?;
    Ok(raw.into_strategy(default_rag_limit))
}

pub fn analysis_prompt(query: &str, context: Option<&serde_json::Value>) -> String {
    let context = context
        .map(|c| c.to_string())
        .unwrap_or_else(|| "No additional context".to_string());

    format!(
        "{}\n\nAnalyze this query and determine the optimal strategy:\n\n\
         Query: {}\n\n\
         Context: {}\n\n\
         Consider:\n\
         1. What type of information is being requested?\n\
         2. What data sources would be most relevant?\n\
         3. Is temporal information important?\n\
         4. Are entity relationships relevant?\n\
         5. Would multiple strategies improve the answer?\n\n\
         Provide your analysis in the specified JSON format.",
        SYSTEM_PROMPT, query, context
    )
}

pub struct StrategyPlanner {
    completion: Arc<dyn CompletionService>,
    default_rag_limit: usize,
}

impl StrategyPlanner {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            completion,
            default_rag_limit: DEFAULT_RAG_LIMIT,
        }
    }

    pub fn with_default_rag_limit(mut self, limit: usize) -> Self {
        self.default_rag_limit = limit.clamp(1, MAX_RAG_LIMIT);
        self
    }

    /// Choose the sources for a query
    pub async fn analyze(&self, query: &str, context: Option<&serde_json::Value>) -> QueryStrategy {
        let prompt = analysis_prompt(query, context);

        let response = match self.completion.complete(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Strategy analysis failed, using default strategy: {}", e);
                return QueryStrategy::fallback(self.default_rag_limit);
            }
        };

        match parse_strategy(&response, self.default_rag_limit) {
            Ok(strategy) => {
                info!("Query strategy: {}", strategy.reasoning);
                strategy
            }
            Err(e) => {
                warn!("Unparseable strategy output, using default strategy: {}", e);
                QueryStrategy::fallback(self.default_rag_limit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use datalive_kg::KgError;

    struct Scripted(std::result::Result<&'static str, &'static str>);

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, _prompt: &str) -> datalive_kg::Result<String> {
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(e) => Err(KgError::CompletionError(e.to_string())),
            }
        }
    }

    fn planner(reply: std::result::Result<&'static str, &'static str>) -> StrategyPlanner {
        StrategyPlanner::new(Arc::new(Scripted(reply)))
    }

    #[tokio::test]
    async fn test_parses_fenced_json() {
        let reply = "Here you go:\n```json\n{\"use_rag\": true, \"use_kag\": true, \"use_temporal\": false, \
                     \"rag_limit\": 5, \"kg_depth\": 3, \"reasoning\": \"relationships matter\"}\n```";
        let strategy = planner(Ok(reply)).analyze("Who works with Alice?", None).await;

        assert!(strategy.use_rag && strategy.use_kag && !strategy.use_temporal);
        assert_eq!(strategy.rag_limit, 5);
        assert_eq!(strategy.kg_depth, 3);
        assert_eq!(strategy.time_range, None);
        assert_eq!(strategy.reasoning, "relationships matter");
    }

    #[tokio::test]
    async fn test_completion_failure_gives_default() {
        let strategy = planner(Err("offline")).analyze("What is DataLive?", None).await;
        assert_eq!(strategy, QueryStrategy::default());
        assert!(strategy.use_rag);
        assert_eq!(strategy.reasoning, "Default strategy due to analysis error");
    }

    #[tokio::test]
    async fn test_garbage_gives_default() {
        let strategy = planner(Ok("I think RAG is best")).analyze("q", None).await;
        assert!(strategy.is_fallback());

        let strategy = planner(Ok("} nonsense {")).analyze("q", None).await;
        assert!(strategy.is_fallback());
    }

    #[tokio::test]
    async fn test_all_flags_false_forces_rag() {
        let reply = r#"{"use_rag": false, "use_kag": false, "use_temporal": false, "reasoning": "none"}"#;
        let strategy = planner(Ok(reply)).analyze("q", None).await;
        assert!(strategy.use_rag);
        assert_eq!(strategy.source_count(), 1);
    }

    #[tokio::test]
    async fn test_values_are_clamped_and_time_range_defaulted() {
        let reply = r#"{"use_rag": false, "use_temporal": true, "rag_limit": 500, "kg_depth": 40}"#;
        let strategy = planner(Ok(reply)).analyze("What changed?", None).await;

        assert!(!strategy.use_rag && strategy.use_temporal);
        assert_eq!(strategy.rag_limit, MAX_RAG_LIMIT);
        assert_eq!(strategy.kg_depth, MAX_DEPTH);
        assert_eq!(strategy.time_range, Some(TimeRange::LastSixMonths));
        assert_eq!(strategy.reasoning, "No reasoning provided");
    }

    #[tokio::test]
    async fn test_unknown_time_range_falls_back() {
        let reply = r#"{"use_temporal": true, "time_range": "last_decade"}"#;
        let strategy = planner(Ok(reply)).analyze("q", None).await;
        assert_eq!(strategy.effective_time_range(), TimeRange::LastSixMonths);

        let reply = r#"{"use_temporal": true, "time_range": "last_year"}"#;
        let strategy = planner(Ok(reply)).analyze("q", None).await;
        assert_eq!(strategy.time_range, Some(TimeRange::LastYear));
    }

    #[test]
    fn test_prompt_mentions_query_and_context() {
        let context = serde_json::json!({"team": "platform"});
        let prompt = analysis_prompt("What is DataLive?", Some(&context));
        assert!(prompt.contains("Query: What is DataLive?"));
        assert!(prompt.contains("\"team\":\"platform\""));
        assert!(analysis_prompt("q", None).contains("Context: No additional context"));
    }
}
