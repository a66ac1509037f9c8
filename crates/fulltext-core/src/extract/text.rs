//! Plain-text (including OCR output) extraction.

use std::path::Path;

use super::{ExtractError, ExtractedText};

/// Read the file as UTF-8 (lossy) and return it unchanged.
pub fn extract_text(path: &Path) -> Result<ExtractedText, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::unreadable(path, e))?;
    Ok(ExtractedText {
        fulltext: String::from_utf8_lossy(&bytes).into_owned(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ocr.txt");
        std::fs::write(&path, b"caf\xe9 au lait\n").unwrap();
        let out = extract_text(&path).unwrap();
        assert_eq!(out.fulltext, "caf\u{FFFD} au lait\n");
        assert!(out.sections.is_empty());
    }
}
