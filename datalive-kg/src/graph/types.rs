//! Result shapes of graph and temporal retrieval

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Entity node matched from the query text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
}

/// Edge between two named entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub relationship_type: String,
    /// Defaults to 1.0 when the edge carries no confidence
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// Output of a relationship analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphAnalysis {
    pub query: String,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub insights: Vec<String>,
}

/// Dated event linked to one or more entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub date: Option<DateTime<Utc>>,
    pub description: String,
    pub event_type: String,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendKind {
    IncreasingActivity,
    DecreasingActivity,
    DominantEventType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub kind: TrendKind,
    pub description: String,
    /// Event counts per type, only for [`TrendKind::DominantEventType`]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub distribution: BTreeMap<String, usize>,
}

/// Window of a temporal search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TimeRange {
    #[serde(rename = "last_month")]
    LastMonth,
    #[default]
    #[serde(rename = "last_6_months")]
    LastSixMonths,
    #[serde(rename = "last_year")]
    LastYear,
}

impl TimeRange {
    pub fn days(&self) -> i64 {
        match self {
            TimeRange::LastMonth => 30,
            TimeRange::LastSixMonths => 180,
            TimeRange::LastYear => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::LastMonth => "last_month",
            TimeRange::LastSixMonths => "last_6_months",
            TimeRange::LastYear => "last_year",
        }
    }

    /// `(start, end)` ending at `now`
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - Duration::days(self.days()), now)
    }

    /// Unknown or missing labels fall back to the six-month window
    pub fn parse_or_default(label: Option<&str>) -> Self {
        label.and_then(|l| l.parse().ok()).unwrap_or_default()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "last_month" => Ok(TimeRange::LastMonth),
            "last_6_months" | "last_six_months" => Ok(TimeRange::LastSixMonths),
            "last_year" => Ok(TimeRange::LastYear),
            other => Err(format!("unknown time range: {}", other)),
        }
    }
}

/// Output of a temporal search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalAnalysis {
    pub query: String,
    pub time_range: TimeRange,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timeline: Vec<TimelineEvent>,
    pub trends: Vec<Trend>,
    pub entities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_parsing() {
        assert_eq!("last_month".parse::<TimeRange>().unwrap(), TimeRange::LastMonth);
        assert_eq!("last_year".parse::<TimeRange>().unwrap(), TimeRange::LastYear);
        assert_eq!(TimeRange::parse_or_default(Some("next_decade")), TimeRange::LastSixMonths);
        assert_eq!(TimeRange::parse_or_default(None), TimeRange::LastSixMonths);
    }

    #[test]
    fn test_time_range_bounds() {
        let now = Utc::now();
        let (start, end) = TimeRange::LastMonth.bounds(now);
        assert_eq!(end, now);
        assert_eq!((end - start).num_days(), 30);
        assert_eq!(TimeRange::LastSixMonths.days(), 180);
    }

    #[test]
    fn test_time_range_serde_label() {
        assert_eq!(
            serde_json::to_string(&TimeRange::LastSixMonths).unwrap(),
            "\"last_6_months\""
        );
        assert_eq!(TimeRange::LastSixMonths.to_string(), "last_6_months");
    }
}
