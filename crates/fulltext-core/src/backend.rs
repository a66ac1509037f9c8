use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open document: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A text extractor for binary documents (PDF).
///
/// Implementations are blocking; callers run them on a blocking thread.
/// Returned text is used verbatim.
pub trait BinaryBackend: Send + Sync {
    /// Short name recorded as `backend_used`.
    fn name(&self) -> &str;

    fn extract_text(&self, path: &Path) -> Result<String, BackendError>;
}

/// Backend that shells out to poppler's `pdftotext`.
#[derive(Debug, Clone)]
pub struct Pdftotext {
    program: PathBuf,
}

impl Pdftotext {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("pdftotext"),
        }
    }

    /// Use a specific executable instead of looking up `pdftotext` on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Pdftotext {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryBackend for Pdftotext {
    fn name(&self) -> &str {
        "pdftotext"
    }

    fn extract_text(&self, path: &Path) -> Result<String, BackendError> {
        let output = Command::new(&self.program)
            .args(["-enc", "UTF-8"])
            .arg(path)
            .arg("-")
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => BackendError::Unavailable(format!(
                    "{} not found",
                    self.program.display()
                )),
                _ => BackendError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::ExtractionError(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
