//! Common types for search module

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::DocumentHit;

/// Document to be indexed for semantic retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDocument {
    /// Unique document ID
    pub id: String,
    pub title: String,
    /// Main content body
    pub content: String,
    /// Origin of the document (path or URL)
    pub source: String,
    pub document_type: DocumentType,
    pub created_at: DateTime<Utc>,
    /// Additional metadata as JSON
    pub metadata: Option<serde_json::Value>,
}

impl SearchDocument {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
        document_type: DocumentType,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            source: source.into(),
            document_type,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    pub fn into_hit(self, score: f32) -> DocumentHit {
        DocumentHit {
            id: self.id,
            title: self.title,
            content: self.content,
            score,
            source: self.source,
            document_type: self.document_type.as_str().to_string(),
        }
    }
}

/// Kinds of indexed documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Text,
    Markdown,
    Pdf,
    Word,
    Spreadsheet,
    Csv,
    Confluence,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Spreadsheet => "spreadsheet",
            Self::Csv => "csv",
            Self::Confluence => "confluence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Some(Self::Text),
            "markdown" | "md" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "word" | "docx" | "doc" => Some(Self::Word),
            "spreadsheet" | "xlsx" | "xls" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            "confluence" => Some(Self::Confluence),
            _ => None,
        }
    }

    /// Guess from a file extension, plain text otherwise
    pub fn from_path(path: &std::path::Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::parse)
            .unwrap_or(Self::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_document_type_from_path() {
        assert_eq!(DocumentType::from_path(Path::new("notes.md")), DocumentType::Markdown);
        assert_eq!(DocumentType::from_path(Path::new("report.PDF")), DocumentType::Pdf);
        assert_eq!(DocumentType::from_path(Path::new("README")), DocumentType::Text);
    }

    #[test]
    fn test_into_hit_keeps_fields() {
        let doc = SearchDocument::new("Intro", "DataLive is...", "docs/intro.md", DocumentType::Markdown);
        let id = doc.id.clone();
        let hit = doc.into_hit(0.8);
        assert_eq!(hit.id, id);
        assert_eq!(hit.document_type, "markdown");
        assert_eq!(hit.score, 0.8);
    }
}
