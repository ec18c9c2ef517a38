//! PDF text extraction and cleanup

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::{LitukError, Result};

static INLINE_SPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("valid inline space regex"));
static SPACE_AROUND_NEWLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" *\n *").expect("valid newline regex"));
static BLANK_LINES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank line regex"));

pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

/// Extract the text layer of a PDF held in memory
pub fn extract_text(bytes: &[u8]) -> Result<String> {
    if !looks_like_pdf(bytes) {
        return Err(LitukError::Pdf {
            message: "input is not a PDF (missing %PDF header)".to_string(),
        });
    }
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| LitukError::Pdf {
        message: format!("text extraction failed: {e}"),
    })
}

/// NFKC-normalize and tidy whitespace in extracted text
pub fn normalize_text(raw: &str) -> String {
    let text: String = raw
        .nfkc()
        .map(|c| match c {
            '\r' => '\n',
            '\u{00a0}' => ' ',
            other => other,
        })
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .collect();
    let text = INLINE_SPACE_RE.replace_all(&text, " ");
    let text = SPACE_AROUND_NEWLINE_RE.replace_all(&text, "\n");
    let text = BLANK_LINES_RE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = extract_text(b"hello world").unwrap_err();
        assert!(matches!(err, LitukError::Pdf { .. }));
    }

    #[test]
    fn normalizes_ligatures_and_whitespace() {
        let raw = "  The \u{fb01}rst  Parliament\t\tmet\r\n\n\n\n\nin 1265.\u{0007}  ";
        assert_eq!(normalize_text(raw), "The first Parliament met\n\nin 1265.");
    }
}
