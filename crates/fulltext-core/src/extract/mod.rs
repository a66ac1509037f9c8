//! Extraction strategies keyed by declared format.
//!
//! [`StrategyRegistry`] selects a [`Strategy`] for a descriptor's format and
//! runs it. Markup, HTML and plain-text strategies run on a blocking thread;
//! binary documents go through a [`BackendChain`]. Binary documents may be
//! enriched by a [`RemoteService`] after the textual extraction succeeded.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::{Config, DeclaredFormat, DocumentDescriptor, ExtractionResult, MarkupDialect};

pub mod binary;
pub mod html;
pub mod markup;
pub mod mock;
pub mod remote;
pub mod text;

use binary::BackendChain;
use remote::{RemoteError, RemoteService};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("unsupported format: {0:?}")]
    UnsupportedFormat(String),
    #[error("all backends failed: {}", .attempts.join("; "))]
    AllBackendsFailed { attempts: Vec<String> },
    #[error("cannot read {}: {reason}", .path.display())]
    Source { path: PathBuf, reason: String },
    #[error("malformed source: {0}")]
    Parse(String),
    #[error("extraction produced no text")]
    EmptyContent,
    #[error("extraction timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("extraction task failed: {0}")]
    Task(String),
}

impl ExtractError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Task(_))
    }

    pub(crate) fn unreadable(path: &Path, e: std::io::Error) -> Self {
        Self::Source {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    }
}

/// Text plus named sections produced by a textual strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    pub fulltext: String,
    pub sections: BTreeMap<String, String>,
}

impl ExtractedText {
    /// Record a section, skipping it if it is blank.
    pub(crate) fn insert_section(&mut self, name: &str, value: &str) {
        let value = value.trim();
        if !value.is_empty() {
            self.sections.insert(name.to_string(), value.to_string());
        }
    }
}

/// A successful extraction, plus the soft failure of the remote service if it
/// was attempted and failed.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub result: ExtractionResult,
    pub remote_failure: Option<RemoteError>,
}

/// Anything that can turn a descriptor into an [`Extraction`].
///
/// The pipeline only sees this trait, so tests can substitute a mock.
pub trait Extractor: Send + Sync {
    fn extract<'a>(
        &'a self,
        descriptor: &'a DocumentDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, ExtractError>> + Send + 'a>>;
}

/// The strategy chosen for one declared format.
#[derive(Clone, Copy)]
pub enum Strategy<'a> {
    Markup(MarkupDialect),
    Html,
    PlainText,
    Binary(&'a BackendChain),
}

impl Strategy<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Markup(MarkupDialect::Jats) => "markup:jats",
            Self::Markup(MarkupDialect::Elsevier) => "markup:elsevier",
            Self::Html => "html",
            Self::PlainText => "text",
            Self::Binary(_) => "binary",
        }
    }

    /// Run the strategy. Returns the text and the name of whatever produced it.
    async fn run(
        &self,
        path: &Path,
        timeout: Duration,
    ) -> Result<(ExtractedText, String), ExtractError> {
        let path_buf = path.to_path_buf();
        let extracted = match *self {
            Self::Markup(dialect) => {
                run_blocking(timeout, move || markup::extract_markup(&path_buf, dialect)).await?
            }
            Self::Html => run_blocking(timeout, move || html::extract_html(&path_buf)).await?,
            Self::PlainText => run_blocking(timeout, move || text::extract_text(&path_buf)).await?,
            Self::Binary(chain) => {
                let binary = chain.extract(path).await?;
                return Ok((
                    ExtractedText {
                        fulltext: binary.text,
                        sections: BTreeMap::new(),
                    },
                    binary.backend,
                ));
            }
        };
        Ok((extracted, self.name().to_string()))
    }
}

/// Run blocking extraction work off the async runtime, bounded by `timeout`.
async fn run_blocking<T, F>(timeout: Duration, f: F) -> Result<T, ExtractError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExtractError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(ExtractError::Task(join.to_string())),
        Err(_) => Err(ExtractError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}

/// Maps declared formats to strategies and runs them.
pub struct StrategyRegistry {
    binary: BackendChain,
    remote: Option<RemoteService>,
    timeout: Duration,
}

impl StrategyRegistry {
    /// Build the registry. The remote service is enabled when
    /// `config.remote_service_url` is set.
    pub fn new(config: &Config, binary: BackendChain) -> Self {
        let remote = config.remote_service_url.as_ref().map(|url| {
            RemoteService::new(
                url.clone(),
                Duration::from_secs(config.remote_timeout_secs),
                config.remote_requests_per_sec,
            )
        });
        Self {
            binary,
            remote,
            timeout: Duration::from_secs(config.backend_timeout_secs),
        }
    }

    pub fn select(&self, format: &DeclaredFormat) -> Result<Strategy<'_>, ExtractError> {
        match format {
            DeclaredFormat::StructuredMarkup(dialect) => Ok(Strategy::Markup(*dialect)),
            DeclaredFormat::Html => Ok(Strategy::Html),
            DeclaredFormat::PlainText => Ok(Strategy::PlainText),
            DeclaredFormat::BinaryDocument => Ok(Strategy::Binary(&self.binary)),
            DeclaredFormat::Unknown(token) => Err(ExtractError::UnsupportedFormat(token.clone())),
        }
    }

    async fn extract_descriptor(
        &self,
        descriptor: &DocumentDescriptor,
    ) -> Result<Extraction, ExtractError> {
        let strategy = self.select(&descriptor.declared_format)?;
        let (text, backend_used) = strategy.run(&descriptor.source_path, self.timeout).await?;
        if text.fulltext.trim().is_empty() {
            return Err(ExtractError::EmptyContent);
        }

        let mut raw_service_payload = None;
        let mut remote_failure = None;
        if let (Some(remote), Strategy::Binary(_)) = (&self.remote, strategy) {
            match remote.process(&descriptor.source_path).await {
                Ok(body) => raw_service_payload = Some(body),
                Err(e) => {
                    tracing::warn!(
                        identifier = %descriptor.identifier,
                        url = remote.url(),
                        error = %e,
                        "remote extraction service failed, continuing without it"
                    );
                    remote_failure = Some(e);
                }
            }
        }

        Ok(Extraction {
            result: ExtractionResult {
                fulltext: text.fulltext,
                structured_metadata: text.sections,
                backend_used,
                raw_service_payload,
            },
            remote_failure,
        })
    }
}

impl Extractor for StrategyRegistry {
    fn extract<'a>(
        &'a self,
        descriptor: &'a DocumentDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, ExtractError>> + Send + 'a>> {
        Box::pin(self.extract_descriptor(descriptor))
    }
}
