//! DOCX text extraction: ZIP container + `word/document.xml` walked with quick-xml.
//!
//! Paragraphs become lines, numbered/bulleted paragraphs get a `• ` marker, and
//! explicit page breaks become `PAGE_BREAK`. Embedded images are counted from
//! `word/media/` so the prompt can tell the model a photo is present.

use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::ZipArchive;

use crate::document::{ParseError, ParsedDocument, PAGE_BREAK};

const DOCUMENT_XML: &str = "word/document.xml";
const MEDIA_PREFIX: &str = "word/media/";

pub fn extract(bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ParseError::CorruptDocument(format!("not a DOCX archive: {e}")))?;

    let image_count = archive
        .file_names()
        .filter(|name| name.starts_with(MEDIA_PREFIX))
        .count();

    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_XML)
        .map_err(|e| ParseError::CorruptDocument(format!("missing {DOCUMENT_XML}: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| ParseError::CorruptDocument(format!("unreadable {DOCUMENT_XML}: {e}")))?;

    Ok(ParsedDocument {
        text: document_text(&xml)?,
        image_count,
    })
}

fn document_text(xml: &str) -> Result<String, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut buf = Vec::new();
    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut list_item = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:p" => {
                    paragraph.clear();
                    list_item = false;
                }
                b"w:t" => in_text = true,
                b"w:numPr" => list_item = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => paragraph.push('\t'),
                b"w:br" if is_page_break(&e) => paragraph.push(PAGE_BREAK),
                b"w:br" | b"w:cr" => paragraph.push('\n'),
                b"w:numPr" => list_item = true,
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                let text = e
                    .unescape()
                    .map_err(|err| ParseError::CorruptDocument(format!("bad XML text: {err}")))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    if list_item && !paragraph.trim().is_empty() {
                        out.push_str("• ");
                    }
                    out.push_str(&paragraph);
                    out.push('\n');
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::CorruptDocument(format!(
                    "malformed {DOCUMENT_XML} at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn is_page_break(e: &BytesStart) -> bool {
    e.attributes()
        .flatten()
        .any(|attr| attr.key.as_ref() == b"w:type" && attr.value.as_ref() == b"page")
}
