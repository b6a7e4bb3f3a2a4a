// SPDX-License-Identifier: MIT OR Apache-2.0

//! Page-by-page text extraction for policy documents.

use lopdf::Document;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{IndexError, Result};

/// Page separator used by plain-text documents.
const FORM_FEED: char = '\u{000C}';

/// Raw text of one page of a source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Source document filename.
    pub source: String,
    /// Page number (1-indexed).
    pub page: u32,
    /// Extracted text, empty when the page has no text layer.
    pub text: String,
}

/// Extracts pages from one document format.
pub trait TextExtractor {
    /// Reads `path` and returns its pages in order.
    fn extract(&self, path: &Path) -> Result<Vec<Page>>;
}

/// PDF text extraction using lopdf.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<Page>> {
        let source = file_name(path);
        let document = Document::load(path).map_err(|err| IndexError::Extraction {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let mut pages = Vec::with_capacity(page_numbers.len());

        for page in page_numbers {
            // A page without a decodable text layer keeps its number with empty text.
            let text = match document.extract_text(&[page]) {
                Ok(text) => text,
                Err(err) => {
                    debug!("No text on {} page {}: {}", source, page, err);
                    String::new()
                }
            };
            pages.push(Page {
                source: source.clone(),
                page,
                text,
            });
        }

        Ok(pages)
    }
}

/// Plain-text documents; form feeds separate pages.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<Page>> {
        let source = file_name(path);
        let content = std::fs::read_to_string(path).map_err(|err| IndexError::Extraction {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        Ok(content
            .split(FORM_FEED)
            .enumerate()
            .map(|(idx, text)| Page {
                source: source.clone(),
                page: idx as u32 + 1,
                text: text.to_string(),
            })
            .collect())
    }
}

/// A document that could not be extracted, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Pages from one successfully read document.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub filename: String,
    pub pages: Vec<Page>,
}

/// Result of extracting a batch of documents.
#[derive(Debug, Default)]
pub struct ExtractionBatch {
    pub documents: Vec<ExtractedDocument>,
    pub failures: Vec<ExtractionFailure>,
}

/// Picks an extractor by lowercase file extension.
pub fn extractor_for(path: &Path) -> Result<Box<dyn TextExtractor>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => Ok(Box::new(PdfExtractor)),
        "txt" => Ok(Box::new(PlainTextExtractor)),
        _ => Err(IndexError::UnsupportedDocument {
            path: path.to_path_buf(),
        }),
    }
}

/// Extracts a single document with the extractor matching its extension.
pub fn extract_document(path: &Path) -> Result<Vec<Page>> {
    extractor_for(path)?.extract(path)
}

/// Extracts every path in order. A failing document is logged and recorded
/// without stopping the rest of the batch.
pub fn extract_documents(paths: &[PathBuf]) -> ExtractionBatch {
    let mut batch = ExtractionBatch::default();

    for path in paths {
        match extract_document(path) {
            Ok(pages) => {
                debug!("Extracted {} page(s) from {}", pages.len(), path.display());
                batch.documents.push(ExtractedDocument {
                    filename: file_name(path),
                    pages,
                });
            }
            Err(err) => {
                warn!("Could not read {}: {}", path.display(), err);
                batch.failures.push(ExtractionFailure {
                    path: path.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    batch
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use tempfile::TempDir;

    fn write_pdf(path: &Path, page_texts: &[&str]) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in page_texts {
            let mut operations = Vec::new();
            if !text.is_empty() {
                operations = vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ];
            }
            let content = Content { operations };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn pdf_pages_are_numbered_from_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.pdf");
        write_pdf(&path, &["Hello coverage", "Second page"]);

        let pages = PdfExtractor.extract(&path).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, 1);
        assert_eq!(pages[1].page, 2);
        assert_eq!(pages[0].source, "policy.pdf");
        assert!(pages[0].text.contains("Hello"));
    }

    #[test]
    fn pdf_empty_page_keeps_its_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scanned.pdf");
        write_pdf(&path, &["Schedule of benefits", "", "Exclusions apply"]);

        let pages = PdfExtractor.extract(&path).unwrap();
        let numbers: Vec<u32> = pages.iter().map(|p| p.page).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(pages[0].text.contains("Schedule"));
        assert!(pages[1].text.trim().is_empty());
        assert!(pages[2].text.contains("Exclusions"));
    }

    #[test]
    fn unreadable_pdf_is_an_extraction_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"definitely not a pdf").unwrap();

        let err = PdfExtractor.extract(&path).unwrap_err();
        assert!(matches!(err, IndexError::Extraction { .. }));
    }

    #[test]
    fn plain_text_splits_on_form_feed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terms.txt");
        std::fs::write(&path, "page one\u{000C}\u{000C}page three").unwrap();

        let pages = extract_document(&path).unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].text, "page one");
        assert_eq!(pages[1].text, "");
        assert_eq!(pages[2].page, 3);
        assert_eq!(pages[2].source, "terms.txt");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = extract_document(Path::new("notes.docx")).err().unwrap();
        assert!(matches!(err, IndexError::UnsupportedDocument { .. }));
    }

    #[test]
    fn batch_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("a.txt");
        let bad = dir.path().join("b.pdf");
        let also_good = dir.path().join("c.txt");
        std::fs::write(&good, "alpha").unwrap();
        std::fs::write(&bad, b"garbage").unwrap();
        std::fs::write(&also_good, "gamma").unwrap();

        let batch = extract_documents(&[good, bad.clone(), also_good]);
        assert_eq!(batch.documents.len(), 2);
        assert_eq!(batch.documents[0].filename, "a.txt");
        assert_eq!(batch.documents[1].filename, "c.txt");
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].path, bad);
    }
}
