use anyhow::{Context, Result};
use lopdf::Document as PdfDocument;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DocumentPage {
    pub page: usize,
    pub content: String,
}

/// Extract text from an ingested document, one entry per page for PDFs,
/// a single page for plain text and markdown.
pub fn load_document(path: &Path) -> Result<Vec<DocumentPage>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    debug!("Loading document {:?} (type: {})", path, extension);

    match extension.as_str() {
        "pdf" => load_pdf(path),
        _ => load_text(path),
    }
}

fn load_pdf(path: &Path) -> Result<Vec<DocumentPage>> {
    let doc = PdfDocument::load(path).context("Failed to load PDF file")?;
    let mut pages = Vec::new();

    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(text) => {
                if !text.trim().is_empty() {
                    pages.push(DocumentPage {
                        page: page_num as usize,
                        content: text,
                    });
                }
            }
            Err(err) => {
                warn!("Failed to extract text from page {}: {}", page_num, err);
            }
        }
    }

    debug!("Extracted text from {} PDF pages", pages.len());
    Ok(pages)
}

fn load_text(path: &Path) -> Result<Vec<DocumentPage>> {
    let content = fs::read_to_string(path).context("Failed to read document as UTF-8 text")?;
    Ok(vec![DocumentPage { page: 1, content }])
}
