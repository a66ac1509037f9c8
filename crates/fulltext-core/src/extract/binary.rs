//! Ordered fallback chain of binary-document backends.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ExtractError;
use crate::backend::BinaryBackend;

/// Text produced by one backend of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryText {
    pub text: String,
    pub backend: String,
}

/// Tries backends in order until one yields non-blank text.
///
/// Each attempt runs on a blocking thread under its own timeout. A backend
/// that errors, panics, times out or returns only whitespace hands over to the
/// next one. The first usable output is returned untouched.
#[derive(Clone)]
pub struct BackendChain {
    backends: Vec<Arc<dyn BinaryBackend>>,
    timeout: Duration,
    max_len: usize,
}

impl std::fmt::Debug for BackendChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendChain")
            .field("backends", &self.names())
            .field("timeout", &self.timeout)
            .field("max_len", &self.max_len)
            .finish()
    }
}

impl BackendChain {
    pub fn new(backends: Vec<Arc<dyn BinaryBackend>>, timeout: Duration, max_len: usize) -> Self {
        Self {
            backends,
            timeout,
            max_len,
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len().min(self.max_len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn extract(&self, path: &Path) -> Result<BinaryText, ExtractError> {
        let mut attempts = Vec::new();

        for backend in self.backends.iter().take(self.max_len) {
            let name = backend.name().to_string();
            let task = {
                let backend = Arc::clone(backend);
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || backend.extract_text(&path))
            };
            let started = Instant::now();

            let failure = match tokio::time::timeout(self.timeout, task).await {
                Ok(Ok(Ok(text))) if !text.trim().is_empty() => {
                    tracing::debug!(
                        backend = %name,
                        path = %path.display(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "backend produced text"
                    );
                    return Ok(BinaryText {
                        text,
                        backend: name,
                    });
                }
                Ok(Ok(Ok(_))) => "empty output".to_string(),
                Ok(Ok(Err(e))) => e.to_string(),
                Ok(Err(join)) => format!("task failed: {join}"),
                Err(_) => format!("timed out after {}s", self.timeout.as_secs()),
            };

            tracing::debug!(
                backend = %name,
                path = %path.display(),
                reason = %failure,
                "backend failed, trying next"
            );
            attempts.push(format!("{name}: {failure}"));
        }

        if attempts.is_empty() {
            attempts.push("no binary backends configured".to_string());
        }
        Err(ExtractError::AllBackendsFailed { attempts })
    }
}
