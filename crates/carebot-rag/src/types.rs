use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A unit of text pushed into (or returned from) the vector store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").map(|s| s.as_str())
    }
}

/// A document returned by a similarity query, with the store's similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// File formats accepted by the upload surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentFormat {
    Csv,
    Pdf,
    Json,
    Html,
    Markdown,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "pdf" => Some(Self::Pdf),
            "json" => Some(Self::Json),
            "html" => Some(Self::Html),
            "md" => Some(Self::Markdown),
            _ => None,
        }
    }

    /// Resolve the format from a file name such as `notes.md`.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    /// Name of the loader that handles this format, used in error messages.
    pub fn loader_name(&self) -> &'static str {
        match self {
            Self::Csv => "CsvLoader",
            Self::Pdf => "PdfLoader",
            Self::Json => "JsonLoader",
            Self::Html => "HtmlLoader",
            Self::Markdown => "MarkdownLoader",
        }
    }

    pub const ACCEPTED_EXTENSIONS: [&'static str; 5] = ["csv", "pdf", "json", "html", "md"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_file_name() {
        assert_eq!(DocumentFormat::from_file_name("report.PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_file_name("notes.md"), Some(DocumentFormat::Markdown));
        assert_eq!(DocumentFormat::from_file_name("archive.tar.json"), Some(DocumentFormat::Json));
        assert_eq!(DocumentFormat::from_file_name("slides.pptx"), None);
        assert_eq!(DocumentFormat::from_file_name("README"), None);
    }

    #[test]
    fn test_document_source() {
        let doc = Document::new("flu symptoms").with_metadata("source", "https://example.org/flu");
        assert_eq!(doc.source(), Some("https://example.org/flu"));
        assert_eq!(Document::new("x").source(), None);
    }
}
