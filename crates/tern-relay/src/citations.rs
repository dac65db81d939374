//! Per-request file-search quote index
//!
//! The upstream may report file-search hits before the message whose
//! citations refer to them. The index remembers the first retrieved excerpt
//! (and file name) per file id so those citations can carry a quote. It lives
//! for one request only.

use std::collections::HashMap;

use tern_ai::stream::{FileSearchResult, UpstreamAnnotation};
use tern_ai::{Annotation, AnnotationKind, Span};

#[derive(Debug, Default)]
struct SourceEntry {
    filename: Option<String>,
    quote: Option<String>,
}

/// Lookup table from upstream file id to retrieved excerpt
#[derive(Debug, Default)]
pub struct QuoteIndex {
    sources: HashMap<String, SourceEntry>,
}

impl QuoteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record file-search hits. The first non-empty excerpt per file wins.
    pub fn record(&mut self, results: &[FileSearchResult]) {
        for result in results {
            let entry = self.sources.entry(result.file_id.clone()).or_default();
            if entry.filename.is_none() {
                entry.filename = result.filename.clone();
            }
            if entry.quote.is_none() {
                entry.quote = result
                    .text
                    .as_ref()
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .map(str::to_string);
            }
        }
    }

    pub fn quote(&self, file_id: &str) -> Option<&str> {
        self.sources.get(file_id)?.quote.as_deref()
    }

    pub fn filename(&self, file_id: &str) -> Option<&str> {
        self.sources.get(file_id)?.filename.as_deref()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Turn an upstream citation into a wire annotation, filling in the
    /// quote and label from earlier file-search results.
    pub fn resolve(&self, annotation: UpstreamAnnotation) -> Annotation {
        match annotation {
            UpstreamAnnotation::UrlCitation {
                url,
                title,
                start,
                end,
            } => Annotation {
                kind: AnnotationKind::UrlCitation,
                label: title.filter(|t| !t.is_empty()).unwrap_or_else(|| url.clone()),
                locator: url,
                span: Span::new(start, end),
                quote: None,
            },
            UpstreamAnnotation::FileCitation {
                file_id,
                filename,
                start,
                end,
            } => Annotation {
                kind: AnnotationKind::FileCitation,
                label: self.label_for(&file_id, filename),
                quote: self.quote(&file_id).map(str::to_string),
                locator: file_id,
                span: Span::new(start, end),
            },
            UpstreamAnnotation::FilePath {
                file_id,
                filename,
                start,
                end,
            } => Annotation {
                kind: AnnotationKind::FilePath,
                label: self.label_for(&file_id, filename),
                quote: None,
                locator: file_id,
                span: Span::new(start, end),
            },
        }
    }

    fn label_for(&self, file_id: &str, filename: Option<String>) -> String {
        filename
            .filter(|f| !f.is_empty())
            .or_else(|| self.filename(file_id).map(str::to_string))
            .unwrap_or_else(|| file_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(file_id: &str, filename: Option<&str>, text: Option<&str>) -> FileSearchResult {
        FileSearchResult {
            file_id: file_id.into(),
            filename: filename.map(Into::into),
            text: text.map(Into::into),
        }
    }

    #[test]
    fn test_first_quote_wins() {
        let mut index = QuoteIndex::new();
        index.record(&[hit("file-1", None, Some("  "))]);
        index.record(&[
            hit("file-1", Some("handbook.pdf"), Some("first excerpt")),
            hit("file-1", None, Some("second excerpt")),
        ]);
        assert_eq!(index.quote("file-1"), Some("first excerpt"));
        assert_eq!(index.filename("file-1"), Some("handbook.pdf"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_file_citation_gets_quote_and_label() {
        let mut index = QuoteIndex::new();
        index.record(&[hit("file-1", Some("handbook.pdf"), Some("Vacation accrues monthly."))]);

        let annotation = index.resolve(UpstreamAnnotation::FileCitation {
            file_id: "file-1".into(),
            filename: None,
            start: 10,
            end: 20,
        });
        assert_eq!(annotation.kind, AnnotationKind::FileCitation);
        assert_eq!(annotation.label, "handbook.pdf");
        assert_eq!(annotation.locator, "file-1");
        assert_eq!(annotation.quote.as_deref(), Some("Vacation accrues monthly."));
        assert_eq!(annotation.span, Span::new(10, 20));
    }

    #[test]
    fn test_unknown_file_falls_back_to_id() {
        let index = QuoteIndex::new();
        let annotation = index.resolve(UpstreamAnnotation::FileCitation {
            file_id: "file-9".into(),
            filename: None,
            start: 0,
            end: 0,
        });
        assert_eq!(annotation.label, "file-9");
        assert!(annotation.quote.is_none());
    }

    #[test]
    fn test_url_citation_label() {
        let index = QuoteIndex::new();
        let titled = index.resolve(UpstreamAnnotation::UrlCitation {
            url: "https://example.com".into(),
            title: Some("Example".into()),
            start: 1,
            end: 2,
        });
        assert_eq!(titled.label, "Example");
        assert_eq!(titled.locator, "https://example.com");

        let untitled = index.resolve(UpstreamAnnotation::UrlCitation {
            url: "https://example.com".into(),
            title: None,
            start: 1,
            end: 2,
        });
        assert_eq!(untitled.label, "https://example.com");
    }
}
