//! Derived observations over retrieved relationships and events

use crate::graph::types::{Relationship, TimelineEvent, Trend, TrendKind};
use std::collections::{BTreeMap, HashMap};

/// Relationships above this confidence count as high-confidence
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Highest count in a tally; ties resolve to the key seen first
fn top<'a>(counts: &HashMap<&'a str, usize>, order: &[&'a str]) -> Option<(&'a str, usize)> {
    let mut best: Option<(&str, usize)> = None;
    for &key in order {
        let count = counts.get(key).copied().unwrap_or(0);
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((key, count));
        }
    }
    best
}

/// Most connected entity, most common relationship type, and the number of
/// high-confidence relationships
pub fn relationship_insights(relationships: &[Relationship]) -> Vec<String> {
    let mut insights = Vec::new();
    if relationships.is_empty() {
        return insights;
    }

    let mut connections: HashMap<&str, usize> = HashMap::new();
    let mut entity_order = Vec::new();
    let mut types: HashMap<&str, usize> = HashMap::new();
    let mut type_order = Vec::new();

    for rel in relationships {
        for name in [rel.source.as_str(), rel.target.as_str()] {
            let count = connections.entry(name).or_insert(0);
            if *count == 0 {
                entity_order.push(name);
            }
            *count += 1;
        }

        let count = types.entry(rel.relationship_type.as_str()).or_insert(0);
        if *count == 0 {
            type_order.push(rel.relationship_type.as_str());
        }
        *count += 1;
    }

    if let Some((entity, count)) = top(&connections, &entity_order) {
        insights.push(format!(
            "'{}' is the most connected entity with {} relationships",
            entity, count
        ));
    }

    if let Some((rel_type, count)) = top(&types, &type_order) {
        insights.push(format!(
            "Most common relationship type is '{}' ({} occurrences)",
            rel_type, count
        ));
    }

    let high_confidence = relationships
        .iter()
        .filter(|r| r.confidence > HIGH_CONFIDENCE)
        .count();
    if high_confidence > 0 {
        insights.push(format!(
            "Found {} high-confidence relationships (confidence > {})",
            high_confidence, HIGH_CONFIDENCE
        ));
    }

    insights
}

/// Month-over-month activity and the dominant event type
///
/// Needs at least two events.
pub fn timeline_trends(timeline: &[TimelineEvent]) -> Vec<Trend> {
    let mut trends = Vec::new();
    if timeline.len() < 2 {
        return trends;
    }

    let mut monthly: BTreeMap<String, usize> = BTreeMap::new();
    for event in timeline {
        if let Some(date) = event.date {
            *monthly.entry(date.format("%Y-%m").to_string()).or_insert(0) += 1;
        }
    }

    if monthly.len() > 1 {
        let mut recent_months = monthly.values().rev();
        let recent = recent_months.next().copied().unwrap_or(0);
        let previous = recent_months.next().copied().unwrap_or(0);

        if recent > previous {
            trends.push(Trend {
                kind: TrendKind::IncreasingActivity,
                description: format!(
                    "Activity increased from {} to {} events",
                    previous, recent
                ),
                distribution: BTreeMap::new(),
            });
        } else if recent < previous {
            trends.push(Trend {
                kind: TrendKind::DecreasingActivity,
                description: format!(
                    "Activity decreased from {} to {} events",
                    previous, recent
                ),
                distribution: BTreeMap::new(),
            });
        }
    }

    let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut type_order = Vec::new();
    for event in timeline {
        let count = distribution.entry(event.event_type.clone()).or_insert(0);
        if *count == 0 {
            type_order.push(event.event_type.as_str());
        }
        *count += 1;
    }

    let counts: HashMap<&str, usize> = distribution
        .iter()
        .map(|(k, v)| (k.as_str(), *v))
        .collect();
    if let Some((dominant, count)) = top(&counts, &type_order) {
        trends.push(Trend {
            kind: TrendKind::DominantEventType,
            description: format!("Most frequent event type: {} ({} events)", dominant, count),
            distribution: distribution.clone(),
        });
    }

    trends
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rel(source: &str, target: &str, kind: &str, confidence: f64) -> Relationship {
        Relationship {
            source: source.to_string(),
            target: target.to_string(),
            relationship_type: kind.to_string(),
            confidence,
            properties: BTreeMap::new(),
        }
    }

    fn event(year: i32, month: u32, kind: &str) -> TimelineEvent {
        TimelineEvent {
            date: Some(Utc.with_ymd_and_hms(year, month, 10, 12, 0, 0).unwrap()),
            description: format!("{} event", kind),
            event_type: kind.to_string(),
            entities: vec!["DataLive".to_string()],
        }
    }

    #[test]
    fn test_relationship_insights() {
        let rels = vec![
            rel("DataLive", "Neo4j", "USES", 0.95),
            rel("DataLive", "Qdrant", "USES", 0.9),
            rel("Alice", "DataLive", "MAINTAINS", 0.5),
        ];

        let insights = relationship_insights(&rels);
        assert_eq!(insights.len(), 3);
        assert_eq!(
            insights[0],
            "'DataLive' is the most connected entity with 3 relationships"
        );
        assert_eq!(
            insights[1],
            "Most common relationship type is 'USES' (2 occurrences)"
        );
        assert!(insights[2].starts_with("Found 2 high-confidence relationships"));
    }

    #[test]
    fn test_no_insights_without_relationships() {
        assert!(relationship_insights(&[]).is_empty());
    }

    #[test]
    fn test_low_confidence_only_skips_third_insight() {
        let insights = relationship_insights(&[rel("A", "B", "KNOWS", 0.3)]);
        assert_eq!(insights.len(), 2);
    }

    #[test]
    fn test_increasing_activity_trend() {
        let timeline = vec![
            event(2024, 1, "release"),
            event(2024, 2, "release"),
            event(2024, 2, "incident"),
            event(2024, 2, "release"),
        ];

        let trends = timeline_trends(&timeline);
        assert_eq!(trends[0].kind, TrendKind::IncreasingActivity);
        assert_eq!(trends[0].description, "Activity increased from 1 to 3 events");
        assert_eq!(trends[1].kind, TrendKind::DominantEventType);
        assert_eq!(trends[1].distribution.get("release"), Some(&3));
    }

    #[test]
    fn test_decreasing_activity_trend() {
        let timeline = vec![
            event(2024, 3, "meeting"),
            event(2024, 3, "meeting"),
            event(2024, 4, "meeting"),
        ];
        let trends = timeline_trends(&timeline);
        assert_eq!(trends[0].kind, TrendKind::DecreasingActivity);
    }

    #[test]
    fn test_single_event_has_no_trends() {
        assert!(timeline_trends(&[event(2024, 1, "release")]).is_empty());
    }
}
