//! Text normalizer.
//!
//! Pure and deterministic: the same input always produces the same output.
//!
//! 1. Strip characters outside a printable-text allowlist.
//! 2. Split on `PAGE_BREAK` and drop lines that repeat on more than
//!    `repeat_threshold` of the pages (running headers and footers).
//! 3. Collapse whitespace runs inside lines and blank-line runs between them.
//!
//! Lines starting with a bullet or list number are never dropped and keep
//! their marker as written.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::document::PAGE_BREAK;

static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,3}|[a-zA-Z])[.)](\s|$)").unwrap());

const BULLETS: &[char] = &['-', '•', '*', '·', '○', '▪', '◦', '–'];

/// Non-ASCII punctuation kept by the allowlist.
const EXTRA_PUNCTUATION: &[char] = &[
    '•', '·', '○', '▪', '◦', '–', '—', '“', '”', '‘', '’', '«', '»', '¿', '¡', '°', 'º', 'ª',
    '€', '…', '´',
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeOptions {
    /// A line is a header/footer when it appears on more than this fraction of pages.
    pub repeat_threshold: f64,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            repeat_threshold: 0.5,
        }
    }
}

pub fn normalize(raw: &str) -> String {
    normalize_with(raw, &NormalizeOptions::default())
}

pub fn normalize_with(raw: &str, options: &NormalizeOptions) -> String {
    let pages: Vec<Vec<String>> = raw
        .split(PAGE_BREAK)
        .map(|page| page.lines().map(clean_line).collect())
        .collect();

    let repeated = repeated_lines(&pages, options.repeat_threshold);

    let mut out = String::with_capacity(raw.len());
    let mut pending_blank = false;

    for line in pages.iter().flatten() {
        if line.is_empty() {
            pending_blank = true;
            continue;
        }
        if repeated.contains(line.as_str()) && !is_structural(line) {
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        pending_blank = false;
    }

    out
}

/// Lines present on more than `threshold` of the pages. Single-page input
/// has no page boundaries to compare, so nothing is repeated.
fn repeated_lines(pages: &[Vec<String>], threshold: f64) -> HashSet<&str> {
    if pages.len() < 2 {
        return HashSet::new();
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for page in pages {
        let unique: HashSet<&str> = page
            .iter()
            .map(String::as_str)
            .filter(|l| !l.is_empty())
            .collect();
        for line in unique {
            *counts.entry(line).or_default() += 1;
        }
    }

    let total = pages.len() as f64;
    counts
        .into_iter()
        .filter(|(_, count)| *count as f64 / total > threshold)
        .map(|(line, _)| line)
        .collect()
}

fn is_structural(line: &str) -> bool {
    line.starts_with(BULLETS) || NUMBERED_ITEM.is_match(line)
}

fn is_allowed(c: char) -> bool {
    c.is_alphanumeric()
        || c.is_whitespace()
        || c.is_ascii_punctuation()
        || EXTRA_PUNCTUATION.contains(&c)
}

/// Filters one line through the allowlist and collapses its whitespace.
fn clean_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut prev_space = false;

    for c in line.chars().filter(|c| is_allowed(*c)) {
        if c.is_whitespace() {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }

    if out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(pages: &[&str]) -> String {
        pages.join(&PAGE_BREAK.to_string()[..])
    }

    #[test]
    fn test_collapses_whitespace_and_blank_runs() {
        let raw = "  Juan   Pérez \t Electricista \n\n\n\nTel:  1234   ";
        assert_eq!(normalize(raw), "Juan Pérez Electricista\n\nTel: 1234");
    }

    #[test]
    fn test_strips_characters_outside_allowlist() {
        let raw = "Nombre:\u{0007} Ana\u{200b} 🔧 García\u{e000}";
        assert_eq!(normalize(raw), "Nombre: Ana García");
    }

    #[test]
    fn test_removes_headers_and_footers_repeated_across_pages() {
        let raw = pages(&[
            "CURRICULUM VITAE\nJuan Pérez\nExperiencia en planta\nPágina",
            "CURRICULUM VITAE\nMantenimiento eléctrico\nPágina",
            "CURRICULUM VITAE\nReferencias\nPágina",
        ]);
        let clean = normalize(&raw);

        assert!(!clean.contains("CURRICULUM VITAE"));
        assert!(!clean.contains("Página"));
        assert!(clean.contains("Juan Pérez"));
        assert!(clean.contains("Mantenimiento eléctrico"));
        assert!(clean.contains("Referencias"));
    }

    #[test]
    fn test_line_on_half_of_pages_is_kept() {
        let raw = pages(&["Ana\nPLC", "Ana\nNeumática", "Soldadura", "Hidráulica"]);
        assert!(normalize(&raw).contains("Ana"));
    }

    #[test]
    fn test_structural_markers_survive_repetition() {
        let raw = pages(&["- PLC\n1. Técnico\nHeader", "- PLC\n1. Técnico\nHeader"]);
        let clean = normalize(&raw);

        assert_eq!(clean.matches("- PLC").count(), 2);
        assert_eq!(clean.matches("1. Técnico").count(), 2);
        assert!(!clean.contains("Header"));
    }

    #[test]
    fn test_single_page_keeps_repeated_lines() {
        assert_eq!(normalize("Ana\nAna"), "Ana\nAna");
    }

    #[test]
    fn test_is_deterministic() {
        let raw = pages(&["A\nB\nC", "A\nD", "A\nE\n\n\nF"]);
        assert_eq!(normalize(&raw), normalize(&raw));
    }

    #[test]
    fn test_custom_threshold() {
        let raw = pages(&["Ana\nPLC", "Ana\nNeumática", "Soldadura", "Hidráulica"]);
        let clean = normalize_with(&raw, &NormalizeOptions { repeat_threshold: 0.4 });
        assert!(!clean.contains("Ana"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("\x0c \x0c\n"), "");
    }
}
