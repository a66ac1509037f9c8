use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use fulltext_core::{BackendChain, BinaryBackend, Config, Pdftotext};

pub mod manifest;

// Re-export domain types for convenience
pub use fulltext_core::{DeclaredFormat, DocumentDescriptor};
pub use manifest::{Batch, ManifestSkip, parse_manifest, read_manifest};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("cannot read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown binary backend {0:?} (known: pdftotext, mupdf)")]
    UnknownBackend(String),
    #[cfg(not(feature = "pdf"))]
    #[error("MuPDF support not compiled in (enable the `pdf` feature of fulltext-ingest)")]
    NoPdfSupport,
}

/// Backends tried for binary documents when nothing else is configured.
pub const DEFAULT_BACKENDS: &[&str] = &["pdftotext", "mupdf"];

/// Build one binary backend by name.
pub fn backend_by_name(name: &str) -> Result<Arc<dyn BinaryBackend>, IngestError> {
    match name.trim().to_ascii_lowercase().as_str() {
        "pdftotext" => Ok(Arc::new(Pdftotext::new())),
        "mupdf" => mupdf_backend(),
        other => Err(IngestError::UnknownBackend(other.to_string())),
    }
}

#[cfg(feature = "pdf")]
fn mupdf_backend() -> Result<Arc<dyn BinaryBackend>, IngestError> {
    Ok(Arc::new(fulltext_pdf_mupdf::MupdfBackend::new()))
}

#[cfg(not(feature = "pdf"))]
fn mupdf_backend() -> Result<Arc<dyn BinaryBackend>, IngestError> {
    Err(IngestError::NoPdfSupport)
}

/// Assemble the binary-document fallback chain in the given order.
///
/// An empty `names` slice selects [`DEFAULT_BACKENDS`]. Backends that are
/// not compiled in are left out with a warning; a name nobody knows is an error.
pub fn backend_chain<S: AsRef<str>>(
    config: &Config,
    names: &[S],
) -> Result<BackendChain, IngestError> {
    let names: Vec<&str> = if names.is_empty() {
        DEFAULT_BACKENDS.to_vec()
    } else {
        names.iter().map(AsRef::as_ref).collect()
    };

    let mut backends = Vec::with_capacity(names.len());
    for name in names {
        match backend_by_name(name) {
            Ok(backend) => backends.push(backend),
            Err(IngestError::UnknownBackend(n)) => return Err(IngestError::UnknownBackend(n)),
            Err(e) => tracing::warn!(backend = name, error = %e, "skipping binary backend"),
        }
    }

    Ok(BackendChain::new(
        backends,
        Duration::from_secs(config.backend_timeout_secs),
        config.max_chain_len,
    ))
}
