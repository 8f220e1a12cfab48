//! PDF text extraction, page by page.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::error::ExtractionError;

pub fn extract_pdf(path: &Path) -> Result<String, ExtractionError> {
    let bytes = super::read_source(path)?;
    let locator = path.display().to_string();

    // pdf-extract panics on some malformed files instead of returning an error.
    let pages = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
    }))
    .map_err(|_| ExtractionError::CorruptSource {
        locator: locator.clone(),
        reason: "PDF parser aborted".to_string(),
    })?
    .map_err(|e| ExtractionError::CorruptSource {
        locator: locator.clone(),
        reason: e.to_string(),
    })?;

    if pages.is_empty() {
        return Err(ExtractionError::EmptySource(locator));
    }
    tracing::debug!(source = %locator, pages = pages.len(), "Extracted PDF text");
    Ok(pages.join("\n"))
}
