use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::document::{ParseError, ParsedDocument, PAGE_BREAK};

/// Extracts the text layer of a digital PDF, one segment per page.
///
/// Scanned PDFs without a text layer come back empty; OCR is out of scope.
pub fn extract(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    // pdf_extract panics on some malformed inputs
    let pages = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }))
    .map_err(|_| ParseError::CorruptDocument("PDF parser aborted on malformed input".to_string()))?
    .map_err(|e| ParseError::CorruptDocument(format!("failed to read PDF: {e}")))?;

    let separator = PAGE_BREAK.to_string();
    Ok(ParsedDocument {
        text: pages.join(separator.as_str()),
        image_count: 0,
    })
}
