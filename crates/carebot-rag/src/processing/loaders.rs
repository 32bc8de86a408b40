//! Format-specific document loaders.
//!
//! Every loader takes the raw bytes of an upload plus the name used as
//! the `source` metadata, and yields one or more [`Document`]s.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::ingest::IngestError;
use crate::processing::html;
use crate::types::{Document, DocumentFormat};

/// Hook that lets callers derive metadata from each JSON record.
pub type MetadataFn = fn(&Value, &mut HashMap<String, String>);

/// Load an upload, dispatching on the extension of `name`.
pub fn load_bytes(name: &str, bytes: &[u8]) -> Result<Vec<Document>, IngestError> {
    let format = DocumentFormat::from_file_name(name).ok_or_else(|| {
        IngestError::UnsupportedFileType(
            name.rsplit_once('.')
                .map(|(_, ext)| format!(".{}", ext))
                .unwrap_or_else(|| name.to_string()),
        )
    })?;

    let docs = match format {
        DocumentFormat::Csv => load_csv(name, bytes),
        DocumentFormat::Pdf => load_pdf(name, bytes),
        DocumentFormat::Json => load_json(name, bytes, None),
        DocumentFormat::Html => load_html(name, bytes),
        DocumentFormat::Markdown => load_markdown(name, bytes),
    }
    .map_err(|message| IngestError::Load {
        loader: format.loader_name(),
        message,
    })?;

    tracing::debug!(file = name, documents = docs.len(), "Loaded upload");
    Ok(docs)
}

/// One document per row, rendered as `header: value` lines.
pub fn load_csv(source: &str, bytes: &[u8]) -> Result<Vec<Document>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| format!("Failed to read CSV header: {}", e))?
        .clone();

    let mut docs = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| format!("Failed to read CSV row {}: {}", row, e))?;
        let content = headers
            .iter()
            .zip(record.iter())
            .map(|(key, value)| format!("{}: {}", key.trim(), value.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        docs.push(
            Document::new(content)
                .with_metadata("source", source)
                .with_metadata("row", row.to_string()),
        );
    }

    Ok(docs)
}

/// One document per page via lopdf, falling back to pdf-extract for the
/// whole file when no page yields text.
pub fn load_pdf(source: &str, bytes: &[u8]) -> Result<Vec<Document>, String> {
    let mut docs = Vec::new();

    match lopdf::Document::load_mem(bytes) {
        Ok(pdf) => {
            for (index, page_number) in pdf.get_pages().keys().enumerate() {
                let text = match pdf.extract_text(&[*page_number]) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::debug!("lopdf failed on page {} of {}: {}", page_number, source, e);
                        continue;
                    }
                };
                if text.trim().is_empty() {
                    continue;
                }
                docs.push(
                    Document::new(text.trim().to_string())
                        .with_metadata("source", source)
                        .with_metadata("page", index.to_string()),
                );
            }
        }
        Err(e) => {
            tracing::debug!("lopdf could not load {}: {}", source, e);
        }
    }

    if docs.is_empty() {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| format!("Failed to extract PDF text: {}", e))?;
        if text.trim().is_empty() {
            return Err("PDF contains no extractable text".to_string());
        }
        docs.push(
            Document::new(text.trim().to_string())
                .with_metadata("source", source)
                .with_metadata("page", "0"),
        );
    }

    Ok(docs)
}

/// Each element of the top-level array becomes one document.
pub fn load_json(
    source: &str,
    bytes: &[u8],
    metadata_fn: Option<MetadataFn>,
) -> Result<Vec<Document>, String> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| format!("Invalid JSON: {}", e))?;

    let Value::Array(records) = value else {
        return Err("Expected a top-level JSON array".to_string());
    };

    let mut docs = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let content = match record {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => serde_json::to_string(other).map_err(|e| e.to_string())?,
        };

        let mut metadata = HashMap::from([
            ("source".to_string(), source.to_string()),
            ("seq_num".to_string(), (i + 1).to_string()),
        ]);
        if let Some(hook) = metadata_fn {
            hook(record, &mut metadata);
        }

        docs.push(Document {
            page_content: content,
            metadata,
        });
    }

    Ok(docs)
}

/// Uses a record's `link` field as its `source`.
pub fn link_as_source(record: &Value, metadata: &mut HashMap<String, String>) {
    if let Some(link) = record.get("link").and_then(Value::as_str) {
        metadata.insert("source".to_string(), link.to_string());
    }
}

pub fn load_html(source: &str, bytes: &[u8]) -> Result<Vec<Document>, String> {
    let raw = String::from_utf8_lossy(bytes);
    let text = html::body_text(&raw);
    Ok(vec![Document::new(text).with_metadata("source", source)])
}

static FENCE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?m)^[ \t]*(```|~~~).*$\n?").expect("fence regex is valid")
});
static HEADING_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]*").expect("heading regex is valid")
});
static IMAGE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("image regex is valid")
});
static LINK_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("link regex is valid")
});
static STRONG_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(\*\*|__)([^*_]+)(\*\*|__)").expect("strong regex is valid")
});
static EMPHASIS_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(^|[^\w*])[*_]([^*_\n]+)[*_]").expect("emphasis regex is valid")
});
static INLINE_CODE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"`([^`]+)`").expect("inline code regex is valid")
});
static LIST_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?m)^[ \t]*(?:[-*+]|\d+\.)[ \t]+").expect("list regex is valid")
});
static QUOTE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?m)^[ \t]*>[ \t]?").expect("quote regex is valid")
});
static RULE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?m)^[ \t]*([-*_][ \t]*){3,}$").expect("rule regex is valid")
});

/// Markdown with markup removed, as a single document.
pub fn load_markdown(source: &str, bytes: &[u8]) -> Result<Vec<Document>, String> {
    let raw = std::str::from_utf8(bytes).map_err(|e| format!("Markdown is not UTF-8: {}", e))?;
    Ok(vec![
        Document::new(strip_markdown(raw)).with_metadata("source", source)
    ])
}

pub fn strip_markdown(markdown: &str) -> String {
    let text = FENCE_RE.replace_all(markdown, "");
    let text = RULE_RE.replace_all(&text, "");
    let text = HEADING_RE.replace_all(&text, "");
    let text = IMAGE_RE.replace_all(&text, "$1");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = STRONG_RE.replace_all(&text, "$2");
    let text = EMPHASIS_RE.replace_all(&text, "$1$2");
    let text = INLINE_CODE_RE.replace_all(&text, "$1");
    let text = LIST_RE.replace_all(&text, "");
    let text = QUOTE_RE.replace_all(&text, "");

    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_rows_become_documents() {
        let csv = b"disease,symptom\nFlu, fever \nCold,sneezing\n";
        let docs = load_csv("symptoms.csv", csv).unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].page_content, "disease: Flu\nsymptom: fever");
        assert_eq!(docs[1].metadata.get("row").map(String::as_str), Some("1"));
        assert_eq!(docs[1].source(), Some("symptoms.csv"));
    }

    #[test]
    fn test_json_array_elements() {
        let json = br#"[{"title": "Asthma", "link": "https://example.org/asthma"}, "plain text"]"#;
        let docs = load_json("data.json", json, None).unwrap();

        assert_eq!(docs.len(), 2);
        assert!(docs[0].page_content.contains("\"title\":\"Asthma\""));
        assert_eq!(docs[1].page_content, "plain text");
        assert_eq!(docs[0].metadata.get("seq_num").map(String::as_str), Some("1"));
        assert_eq!(docs[0].source(), Some("data.json"));
    }

    #[test]
    fn test_json_link_hook_sets_source() {
        let json = br#"[{"title": "Asthma", "link": "https://example.org/asthma"}]"#;
        let docs = load_json("data.json", json, Some(link_as_source)).unwrap();
        assert_eq!(docs[0].source(), Some("https://example.org/asthma"));
    }

    #[test]
    fn test_json_requires_array() {
        assert!(load_json("data.json", br#"{"a": 1}"#, None).is_err());
    }

    #[test]
    fn test_markdown_markup_is_removed() {
        let md = "# Diabetes\n\n**Type 2** is the *most* common form. See [CDC](https://cdc.gov).\n\n- thirst\n- fatigue\n\n```\ncode\n```";
        let text = strip_markdown(md);
        assert_eq!(
            text,
            "Diabetes\n\nType 2 is the most common form. See CDC.\n\nthirst\nfatigue\n\ncode"
        );
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_bytes("slides.pptx", b"").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFileType(_)));
        assert!(err.to_string().starts_with("Unsupported file type"));
    }

    #[test]
    fn test_loader_failure_names_loader() {
        let err = load_bytes("broken.json", b"not json").unwrap_err();
        match err {
            IngestError::Load { loader, .. } => assert_eq!(loader, "JsonLoader"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_pdf_is_a_load_error() {
        let err = load_bytes("scan.pdf", b"%PDF-garbage").unwrap_err();
        assert!(matches!(err, IngestError::Load { loader: "PdfLoader", .. }));
    }
}
