//! Document parsing: raw upload bytes → plain text ready for normalization.
//!
//! Parsing is CPU-bound and synchronous. Async callers run it through
//! `tokio::task::spawn_blocking`.

pub mod docx;
pub mod hashing;
pub mod normalize;
pub mod pdf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separates pages in parser output. The normalizer splits on it to find
/// repeated headers and footers.
pub const PAGE_BREAK: char = '\x0c';

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseErrorKind {
    UnsupportedFormat,
    CorruptDocument,
    EmptyDocument,
}

/// Per-document failure. Terminal for that document only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt document: {0}")]
    CorruptDocument(String),

    #[error("document contains no extractable text")]
    EmptyDocument,
}

impl ParseError {
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            ParseError::UnsupportedFormat(_) => ParseErrorKind::UnsupportedFormat,
            ParseError::CorruptDocument(_) => ParseErrorKind::CorruptDocument,
            ParseError::EmptyDocument => ParseErrorKind::EmptyDocument,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let essence = mime_type.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            PDF_MIME => Some(DocumentKind::Pdf),
            DOCX_MIME => Some(DocumentKind::Docx),
            _ => None,
        }
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = filename.rsplit_once('.')?.1.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => PDF_MIME,
            DocumentKind::Docx => DOCX_MIME,
        }
    }
}

/// Picks the MIME type for an upload: a recognised declared type wins,
/// otherwise the filename extension decides. Browsers often send
/// `application/octet-stream` for DOCX.
pub fn resolve_mime(declared: Option<&str>, filename: &str) -> String {
    declared
        .and_then(DocumentKind::from_mime)
        .or_else(|| DocumentKind::from_filename(filename))
        .map(|kind| kind.mime().to_string())
        .or_else(|| declared.map(str::to_string))
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Parser output before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    /// Page texts joined with `PAGE_BREAK`.
    pub text: String,
    /// Embedded images found in the file (DOCX only; PDFs report 0).
    pub image_count: usize,
}

/// Parser interface: `parse(file_bytes, mime_type)`.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, bytes: &[u8], mime_type: &str) -> Result<ParsedDocument, ParseError>;
}

/// Dispatches PDF and DOCX uploads to their extractors.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileParser;

impl DocumentParser for FileParser {
    fn parse(&self, bytes: &[u8], mime_type: &str) -> Result<ParsedDocument, ParseError> {
        let kind = DocumentKind::from_mime(mime_type)
            .ok_or_else(|| ParseError::UnsupportedFormat(mime_type.to_string()))?;

        let parsed = match kind {
            DocumentKind::Pdf => pdf::extract(bytes)?,
            DocumentKind::Docx => docx::extract(bytes)?,
        };

        if parsed.text.trim().is_empty() {
            return Err(ParseError::EmptyDocument);
        }
        Ok(parsed)
    }
}
