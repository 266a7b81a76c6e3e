//! Neo4j-backed relationship and temporal search
//!
//! Expected graph shape:
//! - `(:Entity {name, aliases})`, identified by `elementId`
//! - relationships between entities, optionally carrying `confidence` and `description`
//! - `(:Entity)-[:OCCURRED_AT|CREATED_AT|MODIFIED_AT]-(:Event {date, description, type})`

use crate::connection::Neo4jClient;
use crate::error::{KgError, Result};
use crate::graph::{
    insights::{relationship_insights, timeline_trends},
    types::{
        Entity, GraphAnalysis, Relationship, TemporalAnalysis, TimeRange, TimelineEvent,
    },
    GraphSearch, TemporalSearch,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use neo4rs::query;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entities matched per query
const ENTITY_LIMIT: i64 = 10;

/// Deepest relationship expansion accepted
pub const MAX_DEPTH: u32 = 5;

const ENTITY_CYPHER: &str = "MATCH (e:Entity)
     WHERE toLower(e.name) CONTAINS toLower($query_text)
        OR any(alias IN coalesce(e.aliases, []) WHERE toLower(alias) CONTAINS toLower($query_text))
     RETURN elementId(e) AS entity_id,
            e.name AS name,
            labels(e)[0] AS entity_type
     LIMIT $limit";

const EVENT_CYPHER: &str = "MATCH (e:Entity)-[:OCCURRED_AT|CREATED_AT|MODIFIED_AT]-(event:Event)
     WHERE e.name IN $entity_names
       AND datetime(event.date) >= datetime($start_date)
       AND datetime(event.date) <= datetime($end_date)
     RETURN toString(event.date) AS date,
            coalesce(event.description, '') AS description,
            coalesce(event.type, 'unknown') AS event_type,
            collect(DISTINCT e.name) AS entities
     ORDER BY date DESC";

/// Variable-length expansion; the depth cannot be a query parameter
fn relationship_cypher(max_depth: u32) -> String {
    let depth = max_depth.clamp(1, MAX_DEPTH);
    format!(
        "MATCH (source:Entity)-[r*1..{depth}]-(target:Entity)
         WHERE elementId(source) IN $entity_ids OR elementId(target) IN $entity_ids
         UNWIND r AS rel
         WITH DISTINCT startNode(rel) AS from_node, endNode(rel) AS to_node, rel
         RETURN from_node.name AS source_name,
                to_node.name AS target_name,
                type(rel) AS rel_type,
                toFloat(coalesce(rel.confidence, 1.0)) AS confidence,
                rel.description AS description
         ORDER BY confidence DESC
         LIMIT $limit"
    )
}

/// Event dates may be stored as datetimes, local datetimes or plain dates
fn parse_event_date(raw: &str) -> Option<DateTime<Utc>> {
    // Zoned datetimes can carry a trailing `[Region/City]`
    let trimmed = raw.split('[').next().unwrap_or(raw).trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub struct Neo4jKnowledgeGraph {
    client: Arc<Neo4jClient>,
}

impl Neo4jKnowledgeGraph {
    pub fn new(client: Arc<Neo4jClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<Neo4jClient> {
        &self.client
    }

    async fn find_entities(&self, query_text: &str) -> Result<Vec<Entity>> {
        let cypher = query(ENTITY_CYPHER)
            .param("query_text", query_text.to_string())
            .param("limit", ENTITY_LIMIT);

        let mut result = self.client.graph().execute(cypher).await.map_err(|e| {
            KgError::QueryError(format!("Failed to match entities: {}", e))
        })?;

        let mut entities = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| KgError::QueryError(format!("Failed to read entity row: {}", e)))?
        {
            let id: String = row.get("entity_id").map_err(|e| {
                KgError::QueryError(format!("Failed to extract entity id: {}", e))
            })?;
            let name: String = row.get("name").map_err(|e| {
                KgError::QueryError(format!("Failed to extract entity name: {}", e))
            })?;
            let entity_type: String = row
                .get("entity_type")
                .unwrap_or_else(|_| "Entity".to_string());

            entities.push(Entity {
                id,
                name,
                entity_type,
            });
        }

        debug!("Matched {} entities for query", entities.len());
        Ok(entities)
    }

    async fn find_relationships(
        &self,
        entity_ids: Vec<String>,
        max_depth: u32,
        limit: usize,
    ) -> Result<Vec<Relationship>> {
        let cypher = query(&relationship_cypher(max_depth))
            .param("entity_ids", entity_ids)
            .param("limit", limit as i64);

        let mut result = self.client.graph().execute(cypher).await.map_err(|e| {
            KgError::QueryError(format!("Failed to expand relationships: {}", e))
        })?;

        let mut relationships = Vec::new();
        while let Some(row) = result.next().await.map_err(|e| {
            KgError::QueryError(format!("Failed to read relationship row: {}", e))
        })? {
            let source: String = row.get("source_name").map_err(|e| {
                KgError::QueryError(format!("Failed to extract source name: {}", e))
            })?;
            let target: String = row.get("target_name").map_err(|e| {
                KgError::QueryError(format!("Failed to extract target name: {}", e))
            })?;
            let relationship_type: String = row.get("rel_type").map_err(|e| {
                KgError::QueryError(format!("Failed to extract relationship type: {}", e))
            })?;
            let confidence: f64 = row.get("confidence").unwrap_or(1.0);

            let mut properties = BTreeMap::new();
            let description: Option<String> = row.get("description").ok();
            if let Some(description) = description {
                properties.insert("description".to_string(), description);
            }

            relationships.push(Relationship {
                source,
                target,
                relationship_type,
                confidence,
                properties,
            });
        }

        Ok(relationships)
    }

    async fn find_events(
        &self,
        entity_names: Vec<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimelineEvent>> {
        let cypher = query(EVENT_CYPHER)
            .param("entity_names", entity_names)
            .param("start_date", start.to_rfc3339())
            .param("end_date", end.to_rfc3339());

        let mut result = self.client.graph().execute(cypher).await.map_err(|e| {
            KgError::QueryError(format!("Failed to query events: {}", e))
        })?;

        let mut timeline = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| KgError::QueryError(format!("Failed to read event row: {}", e)))?
        {
            let raw_date: Option<String> = row.get("date").ok();
            let date = raw_date.as_deref().and_then(parse_event_date);
            if raw_date.is_some() && date.is_none() {
                warn!("Unparseable event date: {:?}", raw_date);
            }

            timeline.push(TimelineEvent {
                date,
                description: row.get("description").unwrap_or_default(),
                event_type: row
                    .get("event_type")
                    .unwrap_or_else(|_| "unknown".to_string()),
                entities: row.get("entities").unwrap_or_default(),
            });
        }

        Ok(timeline)
    }
}

#[async_trait]
impl GraphSearch for Neo4jKnowledgeGraph {
    async fn analyze_relationships(
        &self,
        query_text: &str,
        max_depth: u32,
        limit: usize,
    ) -> Result<GraphAnalysis> {
        let entities = self.find_entities(query_text).await?;
        if entities.is_empty() {
            warn!("No entities found in query");
            return Ok(GraphAnalysis {
                query: query_text.to_string(),
                ..Default::default()
            });
        }

        let ids = entities.iter().map(|e| e.id.clone()).collect();
        let relationships = self.find_relationships(ids, max_depth, limit).await?;
        let insights = relationship_insights(&relationships);

        info!(
            "Graph analysis found {} relationships around {} entities",
            relationships.len(),
            entities.len()
        );

        Ok(GraphAnalysis {
            query: query_text.to_string(),
            entities,
            relationships,
            insights,
        })
    }
}

#[async_trait]
impl TemporalSearch for Neo4jKnowledgeGraph {
    async fn search(&self, query_text: &str, time_range: TimeRange) -> Result<TemporalAnalysis> {
        let (start, end) = time_range.bounds(Utc::now());
        let entities = self.find_entities(query_text).await?;
        let names: Vec<String> = entities.into_iter().map(|e| e.name).collect();

        let timeline = if names.is_empty() {
            Vec::new()
        } else {
            self.find_events(names.clone(), start, end).await?
        };
        let trends = timeline_trends(&timeline);

        info!(
            "Temporal search found {} events ({})",
            timeline.len(),
            time_range
        );

        Ok(TemporalAnalysis {
            query: query_text.to_string(),
            time_range,
            start,
            end,
            timeline,
            trends,
            entities: names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_relationship_depth_is_clamped() {
        assert!(relationship_cypher(0).contains("[r*1..1]"));
        assert!(relationship_cypher(2).contains("[r*1..2]"));
        assert!(relationship_cypher(50).contains("[r*1..5]"));
    }

    #[test]
    fn test_entity_identity_matches_relationship_filter() {
        assert!(ENTITY_CYPHER.contains("elementId(e) AS entity_id"));
        let cypher = relationship_cypher(2);
        assert!(cypher.contains("elementId(source) IN $entity_ids"));
        assert!(cypher.contains("elementId(target) IN $entity_ids"));
        assert!(!cypher.contains(".id IN"));
    }

    #[test]
    fn test_parse_event_date_formats() {
        let zoned = parse_event_date("2024-03-05T10:30:00Z").unwrap();
        assert_eq!((zoned.month(), zoned.day(), zoned.hour()), (3, 5, 10));

        let with_region = parse_event_date("2024-03-05T10:30:00+01:00[Europe/Paris]").unwrap();
        assert_eq!(with_region.hour(), 9);

        let local = parse_event_date("2024-03-05T10:30:00.123").unwrap();
        assert_eq!(local.minute(), 30);

        let date_only = parse_event_date("2024-03-05").unwrap();
        assert_eq!(date_only.hour(), 0);

        assert!(parse_event_date("yesterday").is_none());
    }
}
