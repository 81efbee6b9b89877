//! PDF text extraction.
//!
//! Pulls per-page text out of the source document. Pages that contain no
//! extractable text (cover images, separators) are skipped so they never
//! reach the chunker.

use std::path::Path;

use crate::error::{DocentError, Result};

/// Text extracted from a single page, 1-based page number.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: usize,
    pub text: String,
}

/// Extract per-page text from a PDF.
///
/// Returns `NotFound` when the file does not exist and `Build` when the
/// file cannot be parsed as a PDF.
pub fn extract_pages(path: &Path) -> Result<Vec<PageText>> {
    if !path.exists() {
        return Err(DocentError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let raw_pages = pdf_extract::extract_text_by_pages(path).map_err(|e| DocentError::Build {
        message: format!("PDF extraction failed for {}: {}", path.display(), e),
    })?;

    let mut pages = Vec::new();
    for (i, text) in raw_pages.into_iter().enumerate() {
        let number = i + 1;
        if text.trim().is_empty() {
            tracing::debug!("Skipping page {} with no extractable text", number);
            continue;
        }
        pages.push(PageText { number, text });
    }

    tracing::debug!("Extracted {} non-empty pages from {}", pages.len(), path.display());
    Ok(pages)
}
