use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::types::Document;

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits text on a ladder of separators, falling through to finer ones
/// only for pieces that are still too large. Lengths are in characters.
#[derive(Debug, Clone)]
pub struct RecursiveTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Default for RecursiveTextSplitter {
    fn default() -> Self {
        Self::new(800, 200)
    }
}

impl RecursiveTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split every document, copying its metadata onto each chunk.
    pub fn split_documents(&self, docs: &[Document]) -> Vec<Document> {
        docs.iter()
            .flat_map(|doc| {
                self.split_text(&doc.page_content)
                    .into_iter()
                    .map(move |chunk| Document {
                        page_content: chunk,
                        metadata: doc.metadata.clone(),
                    })
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        // First separator present in the text wins; "" always matches.
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let splits: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut good_splits: Vec<String> = Vec::new();

        for piece in splits {
            if char_len(&piece) < self.chunk_size {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                chunks.extend(self.merge_splits(&good_splits, separator));
                good_splits.clear();
            }

            if remaining.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !good_splits.is_empty() {
            chunks.extend(self.merge_splits(&good_splits, separator));
        }

        chunks
    }

    /// Greedily join small pieces up to `chunk_size`, carrying up to
    /// `chunk_overlap` characters of trailing pieces into the next chunk.
    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in splits {
            let len = char_len(piece);
            let joiner = if current.is_empty() { 0 } else { sep_len };

            if total + len + joiner > self.chunk_size && !current.is_empty() {
                push_joined(&mut docs, &current, separator);

                while total > self.chunk_overlap
                    || (total > 0
                        && total + len + if current.is_empty() { 0 } else { sep_len }
                            > self.chunk_size)
                {
                    let Some(front) = current.pop_front() else {
                        break;
                    };
                    let dropped_sep = if current.is_empty() { 0 } else { sep_len };
                    total = total.saturating_sub(char_len(front) + dropped_sep);
                }
            }

            current.push_back(piece);
            total += len + if current.len() > 1 { sep_len } else { 0 };
        }

        push_joined(&mut docs, &current, separator);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, current: &VecDeque<&str>, separator: &str) {
    let joined = current.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_merge_with_overlap() {
        let splitter = RecursiveTextSplitter::new(10, 4);
        let chunks = splitter.split_text("one two three four five six");
        assert_eq!(chunks, vec!["one two", "two three", "four five", "five six"]);
    }

    #[test]
    fn test_falls_through_to_characters() {
        let splitter = RecursiveTextSplitter::new(10, 0);
        let chunks = splitter.split_text("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(chunks, vec!["abcdefghij", "klmnopqrst", "uvwxyz"]);
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let splitter = RecursiveTextSplitter::new(40, 0);
        let text = "Asthma affects the airways.\n\nDiabetes affects blood sugar.";
        let chunks = splitter.split_text(text);
        assert_eq!(
            chunks,
            vec!["Asthma affects the airways.", "Diabetes affects blood sugar."]
        );
    }

    #[test]
    fn test_chunks_respect_size_bound() {
        let splitter = RecursiveTextSplitter::default();
        let paragraph = "Hypertension is a common condition in which the long-term force \
                         of the blood against your artery walls is high enough that it may \
                         eventually cause health problems, such as heart disease. ";
        let text = (0..40)
            .map(|i| format!("{} Section {}.", paragraph, i))
            .collect::<Vec<_>>()
            .join("\n");

        let chunks = splitter.split_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 800, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn test_multibyte_text_is_measured_in_chars() {
        let splitter = RecursiveTextSplitter::new(5, 0);
        let chunks = splitter.split_text("ééééééééé");
        assert_eq!(chunks, vec!["ééééé", "éééé"]);
    }

    #[test]
    fn test_split_documents_copies_metadata() {
        let splitter = RecursiveTextSplitter::new(10, 0);
        let doc = Document::new("alpha beta gamma delta").with_metadata("source", "notes.md");
        let chunks = splitter.split_documents(&[doc]);

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.source() == Some("notes.md")));
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        let splitter = RecursiveTextSplitter::default();
        assert!(splitter.split_text("").is_empty());
        assert!(splitter.split_text("   \n\n  ").is_empty());
    }
}
