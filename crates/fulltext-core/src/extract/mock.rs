//! Hand-rolled mocks for the extraction seams, for tests.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ExtractError, Extraction, Extractor};
use crate::backend::{BackendError, BinaryBackend};
use crate::{DocumentDescriptor, ExtractionResult};

#[derive(Clone, Debug)]
enum BackendResponse {
    Text(String),
    Error(String),
}

/// A [`BinaryBackend`] returning a fixed response, with call counting and
/// optional latency (the backend blocks its thread for the delay).
pub struct MockBackend {
    name: String,
    response: BackendResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl MockBackend {
    /// A backend that returns empty text until configured otherwise.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: BackendResponse::Text(String::new()),
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.response = BackendResponse::Text(text.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.response = BackendResponse::Error(message.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl BinaryBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract_text(&self, _path: &Path) -> Result<String, BackendError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        match &self.response {
            BackendResponse::Text(text) => Ok(text.clone()),
            BackendResponse::Error(msg) => Err(BackendError::ExtractionError(msg.clone())),
        }
    }
}

/// An [`Extractor`] that never touches the filesystem.
///
/// Returns responses in order, repeating the last one once the sequence is
/// exhausted.
pub struct MockExtractor {
    responses: Mutex<Vec<Result<ExtractionResult, ExtractError>>>,
    fallback: Result<ExtractionResult, ExtractError>,
    delay: Option<Duration>,
    call_count: AtomicUsize,
}

impl MockExtractor {
    /// Always succeed with `fulltext`.
    pub fn with_text(fulltext: impl Into<String>) -> Self {
        Self::new(Ok(ExtractionResult {
            fulltext: fulltext.into(),
            backend_used: "mock".to_string(),
            ..Default::default()
        }))
    }

    /// Always fail with `error`.
    pub fn failing(error: ExtractError) -> Self {
        Self::new(Err(error))
    }

    pub fn new(response: Result<ExtractionResult, ExtractError>) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Return `responses` in order, then keep repeating the last.
    pub fn with_sequence(responses: Vec<Result<ExtractionResult, ExtractError>>) -> Self {
        let mut responses = responses;
        let fallback = responses
            .last()
            .cloned()
            .unwrap_or(Err(ExtractError::EmptyContent));
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `extract()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Result<ExtractionResult, ExtractError> {
        let mut seq = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

impl Extractor for MockExtractor {
    fn extract<'a>(
        &'a self,
        _descriptor: &'a DocumentDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<Extraction, ExtractError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            response.map(|result| Extraction {
                result,
                remote_failure: None,
            })
        })
    }
}
