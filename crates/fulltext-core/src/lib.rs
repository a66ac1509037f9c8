use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod backend;
pub mod config_file;
pub mod decision;
pub mod extract;
pub mod message;
pub mod output;
pub mod pipeline;
pub mod store;
pub mod version;

// Re-export for convenience
pub use backend::{BackendError, BinaryBackend, Pdftotext};
pub use decision::DecisionEngine;
pub use extract::binary::BackendChain;
pub use extract::remote::{RemoteError, RemoteService};
pub use extract::{ExtractError, Extraction, Extractor, StrategyRegistry};
pub use message::{ExtractedMessage, StageMessage};
pub use output::{MetaRecord, OutputWriter, WriteError, WriteOutcome};
pub use pipeline::{
    BatchReport, DocumentOutcome, DocumentReport, Pipeline, PipelineEvent, ProgressFn, RunStats,
};
pub use store::{MemoryStatusStore, SqliteStatusStore, StatusStore, StoreError};
pub use version::{ContentChecksum, ModifiedTime, SourceVersioner, VersionStrategy};

/// Dialect of a structured-markup (XML) source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupDialect {
    /// JATS / NLM article markup.
    Jats,
    /// Elsevier `ce:` namespaced article markup.
    Elsevier,
}

/// Format a document was declared as in the manifest.
///
/// Serialized as its manifest token, so a [`StageMessage`] carries the same
/// string a manifest line would.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum DeclaredFormat {
    StructuredMarkup(MarkupDialect),
    Html,
    PlainText,
    BinaryDocument,
    /// A token no strategy handles. Kept so extraction can report it.
    Unknown(String),
}

impl DeclaredFormat {
    /// Parse a manifest format token (case-insensitive).
    pub fn parse(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "xml" | "jats" => Self::StructuredMarkup(MarkupDialect::Jats),
            "xmlelsevier" | "elsevier" => Self::StructuredMarkup(MarkupDialect::Elsevier),
            "html" | "htm" => Self::Html,
            "txt" | "text" | "ocr" => Self::PlainText,
            "pdf" => Self::BinaryDocument,
            _ => Self::Unknown(token.trim().to_string()),
        }
    }

    /// Infer the format from a source path's extension.
    pub fn from_extension(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::parse(ext)
    }

    pub fn as_token(&self) -> &str {
        match self {
            Self::StructuredMarkup(MarkupDialect::Jats) => "xml",
            Self::StructuredMarkup(MarkupDialect::Elsevier) => "xmlelsevier",
            Self::Html => "html",
            Self::PlainText => "txt",
            Self::BinaryDocument => "pdf",
            Self::Unknown(token) => token,
        }
    }
}

impl From<String> for DeclaredFormat {
    fn from(token: String) -> Self {
        Self::parse(&token)
    }
}

impl From<DeclaredFormat> for String {
    fn from(format: DeclaredFormat) -> Self {
        format.as_token().to_string()
    }
}

impl fmt::Display for DeclaredFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// One unit of work: a document to (maybe) extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub identifier: String,
    pub source_path: PathBuf,
    pub declared_format: DeclaredFormat,
    pub provider: String,
}

impl DocumentDescriptor {
    pub fn new(
        identifier: impl Into<String>,
        source_path: impl Into<PathBuf>,
        declared_format: DeclaredFormat,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            source_path: source_path.into(),
            declared_format,
            provider: provider.into(),
        }
    }
}

/// Why a document is (or is not) being extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateReason {
    NotExtractedBefore,
    SourceUpdated,
    ForcedReextract,
    /// Terminal: the document is skipped.
    AlreadyExtracted,
}

impl UpdateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotExtractedBefore => "NOT_EXTRACTED_BEFORE",
            Self::SourceUpdated => "SOURCE_UPDATED",
            Self::ForcedReextract => "FORCED_REEXTRACT",
            Self::AlreadyExtracted => "ALREADY_EXTRACTED",
        }
    }

    /// Whether this reason means the document needs extracting.
    pub fn needs_extraction(&self) -> bool {
        !matches!(self, Self::AlreadyExtracted)
    }
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_EXTRACTED_BEFORE" => Ok(Self::NotExtractedBefore),
            "SOURCE_UPDATED" => Ok(Self::SourceUpdated),
            "FORCED_REEXTRACT" => Ok(Self::ForcedReextract),
            "ALREADY_EXTRACTED" => Ok(Self::AlreadyExtracted),
            other => Err(format!("unknown update reason: {other}")),
        }
    }
}

/// Persisted record of the last successful extraction of an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStatus {
    pub identifier: String,
    pub source_path: PathBuf,
    pub provider: String,
    pub last_extracted_at: DateTime<Utc>,
    pub source_version: String,
    pub last_update_reason: UpdateReason,
}

/// Output of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Always non-empty once produced by an extractor.
    pub fulltext: String,
    /// Named sections (`title`, `abstract`, `acknowledgements`, `references`).
    #[serde(default)]
    pub structured_metadata: BTreeMap<String, String>,
    /// Name of the strategy or binary backend that produced the text.
    pub backend_used: String,
    /// Raw response body of the remote extraction service, stored verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_service_payload: Option<Vec<u8>>,
}

/// Pipeline stage names, used in failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Check,
    Extract,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Check => "check",
            Self::Extract => "extract",
            Self::Output => "output",
        })
    }
}

/// Failure of a single document inside the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),
    #[error(transparent)]
    Extraction(#[from] ExtractError),
    #[error("write failure: {0}")]
    WriteFailure(String),
    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Transient failures are redelivered; the rest fail the document.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) | Self::WriteFailure(_) => true,
            Self::Extraction(e) => e.is_retryable(),
            Self::Cancelled => false,
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

impl From<WriteError> for PipelineError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::Store(store) => Self::StoreUnavailable(store.to_string()),
            other => Self::WriteFailure(other.to_string()),
        }
    }
}

/// Configuration shared by every pipeline component.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_dir: PathBuf,
    /// Worker tasks per stage.
    pub num_workers: usize,
    pub store_timeout_secs: u64,
    /// Bound on a single strategy or binary backend attempt.
    pub backend_timeout_secs: u64,
    pub remote_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// Maximum number of binary backends tried per document.
    pub max_chain_len: usize,
    pub max_redeliveries: u32,
    pub redelivery_backoff_ms: u64,
    /// Structured-extraction service endpoint (e.g. a GROBID `processFulltextDocument` URL).
    /// Binary documents are enriched only when this is set.
    pub remote_service_url: Option<String>,
    pub remote_requests_per_sec: u32,
    pub version_strategy: VersionStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("fulltext-output"),
            num_workers: 4,
            store_timeout_secs: 5,
            backend_timeout_secs: 60,
            remote_timeout_secs: 30,
            write_timeout_secs: 30,
            max_chain_len: 4,
            max_redeliveries: 2,
            redelivery_backoff_ms: 250,
            remote_service_url: None,
            remote_requests_per_sec: 2,
            version_strategy: VersionStrategy::default(),
        }
    }
}

/// Open the status store.
///
/// With a path, opens (or creates) a SQLite store, creating the parent directory.
/// Without one, returns an in-memory store that forgets everything on exit.
pub fn open_status_store(path: Option<&Path>) -> Result<Arc<dyn StatusStore>, StoreError> {
    let Some(path) = path else {
        return Ok(Arc::new(MemoryStatusStore::new()));
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
    }
    let store = SqliteStatusStore::open(path)?;
    tracing::info!(path = %path.display(), "opened status store");
    Ok(Arc::new(store))
}
