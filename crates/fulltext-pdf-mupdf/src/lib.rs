use std::path::Path;

use mupdf::{Document, TextPageFlags};

use fulltext_core::{BackendError, BinaryBackend};

/// MuPDF-based implementation of [`BinaryBackend`].
///
/// This crate is the sole AGPL island: it isolates the mupdf dependency
/// (AGPL-3.0) so that builds without the `pdf` feature never link it.
///
/// Text is emitted line by line in block order. Each page ends with a form
/// feed, the same page delimiter `pdftotext` writes, so downstream consumers
/// see one convention whichever backend produced the text.
pub struct MupdfBackend {
    /// Stop after this many pages. `None` reads the whole document.
    max_pages: Option<usize>,
}

impl Default for MupdfBackend {
    fn default() -> Self {
        Self { max_pages: None }
    }
}

impl MupdfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only extract the first `pages` pages. Pass `0` for no limit.
    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = if pages > 0 { Some(pages) } else { None };
        self
    }
}

fn extraction_error(e: mupdf::Error) -> BackendError {
    BackendError::ExtractionError(e.to_string())
}

impl BinaryBackend for MupdfBackend {
    fn name(&self) -> &str {
        "mupdf"
    }

    fn extract_text(&self, path: &Path) -> Result<String, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;

        let document =
            Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))?;
        if document.needs_password().map_err(extraction_error)? {
            return Err(BackendError::OpenError("document is encrypted".into()));
        }

        let mut text = String::new();
        let mut pages = 0usize;
        for page_result in document.pages().map_err(extraction_error)? {
            if self.max_pages.is_some_and(|max| pages >= max) {
                break;
            }
            let page = page_result.map_err(extraction_error)?;
            let text_page = page
                .to_text_page(TextPageFlags::empty())
                .map_err(extraction_error)?;

            for block in text_page.blocks() {
                for line in block.lines() {
                    text.extend(line.chars().map(|c| c.char().unwrap_or('\u{FFFD}')));
                    text.push('\n');
                }
            }
            text.push('\x0c');
            pages += 1;
        }

        tracing::debug!(path = %path.display(), pages, chars = text.len(), "mupdf extraction finished");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_name() {
        assert_eq!(MupdfBackend::new().name(), "mupdf");
    }

    #[test]
    fn page_limit_zero_means_unlimited() {
        assert_eq!(MupdfBackend::new().with_max_pages(0).max_pages, None);
        assert_eq!(MupdfBackend::new().with_max_pages(3).max_pages, Some(3));
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MupdfBackend::new()
            .extract_text(&dir.path().join("missing.pdf"))
            .unwrap_err();
        assert!(matches!(err, BackendError::OpenError(_)), "got {err:?}");
    }
}
