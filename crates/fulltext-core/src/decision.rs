//! Decides whether a document needs (re)extraction.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::store::{self, StatusStore};
use crate::version::SourceVersioner;
use crate::{DocumentDescriptor, ExtractionStatus, PipelineError, UpdateReason};

/// Compares a descriptor against the stored status of its identifier.
///
/// Performs no writes. Store errors surface as
/// [`PipelineError::StoreUnavailable`]; they never become `ALREADY_EXTRACTED`.
pub struct DecisionEngine {
    store: Arc<dyn StatusStore>,
    versioner: Arc<dyn SourceVersioner>,
    store_timeout: Duration,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<dyn StatusStore>,
        versioner: Arc<dyn SourceVersioner>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            versioner,
            store_timeout,
        }
    }

    pub async fn decide(
        &self,
        descriptor: &DocumentDescriptor,
        force_extract: bool,
    ) -> Result<UpdateReason, PipelineError> {
        if force_extract {
            return Ok(UpdateReason::ForcedReextract);
        }

        let prior =
            store::get_status_bounded(&self.store, &descriptor.identifier, self.store_timeout)
                .await?;
        let Some(prior) = prior else {
            return Ok(UpdateReason::NotExtractedBefore);
        };

        Ok(self.compare(descriptor, &prior).await)
    }

    /// Compare against an existing status.
    async fn compare(&self, descriptor: &DocumentDescriptor, prior: &ExtractionStatus) -> UpdateReason {
        if prior.source_path != descriptor.source_path {
            tracing::debug!(
                identifier = %descriptor.identifier,
                previous = %prior.source_path.display(),
                current = %descriptor.source_path.display(),
                "source path changed"
            );
            return UpdateReason::SourceUpdated;
        }

        match self.current_version(&descriptor.source_path).await {
            Ok(version) if version == prior.source_version => UpdateReason::AlreadyExtracted,
            Ok(_) => UpdateReason::SourceUpdated,
            Err(e) => {
                tracing::warn!(
                    identifier = %descriptor.identifier,
                    path = %descriptor.source_path.display(),
                    error = %e,
                    "cannot version source, treating it as updated"
                );
                UpdateReason::SourceUpdated
            }
        }
    }

    /// Version of the source as it is right now.
    pub async fn current_version(&self, path: &Path) -> io::Result<String> {
        let versioner = Arc::clone(&self.versioner);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || versioner.version(&path))
            .await
            .map_err(io::Error::other)?
    }

    /// Decide every descriptor without extracting anything.
    pub async fn decide_all(
        &self,
        descriptors: &[DocumentDescriptor],
        force_extract: bool,
    ) -> Vec<(String, Result<UpdateReason, PipelineError>)> {
        let mut decisions = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let decision = self.decide(descriptor, force_extract).await;
            decisions.push((descriptor.identifier.clone(), decision));
        }
        decisions
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use super::*;
    use crate::store::{MemoryStatusStore, StoreError};
    use crate::version::ContentChecksum;
    use crate::DeclaredFormat;

    struct DownStore;

    impl StatusStore for DownStore {
        fn get_status(&self, _: &str) -> Result<Option<ExtractionStatus>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn set_status(&self, _: &ExtractionStatus) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    struct SlowStore;

    impl StatusStore for SlowStore {
        fn get_status(&self, _: &str) -> Result<Option<ExtractionStatus>, StoreError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(None)
        }
        fn set_status(&self, _: &ExtractionStatus) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn engine(store: Arc<dyn StatusStore>) -> DecisionEngine {
        DecisionEngine::new(store, Arc::new(ContentChecksum), Duration::from_secs(1))
    }

    fn descriptor(path: PathBuf) -> DocumentDescriptor {
        DocumentDescriptor::new("2020ApJ...900..001A", path, DeclaredFormat::PlainText, "Arxiv")
    }

    fn record(store: &MemoryStatusStore, descriptor: &DocumentDescriptor, version: String) {
        store
            .set_status(&ExtractionStatus {
                identifier: descriptor.identifier.clone(),
                source_path: descriptor.source_path.clone(),
                provider: descriptor.provider.clone(),
                last_extracted_at: Utc::now(),
                source_version: version,
                last_update_reason: UpdateReason::NotExtractedBefore,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_identifier_is_new() {
        let e = engine(Arc::new(MemoryStatusStore::new()));
        let d = descriptor(PathBuf::from("/nonexistent/doc.txt"));
        assert_eq!(e.decide(&d, false).await, Ok(UpdateReason::NotExtractedBefore));
    }

    #[tokio::test]
    async fn force_wins_over_everything() {
        // Even an unreachable store does not matter when forcing.
        let e = engine(Arc::new(DownStore));
        let d = descriptor(PathBuf::from("/nonexistent/doc.txt"));
        assert_eq!(e.decide(&d, true).await, Ok(UpdateReason::ForcedReextract));
    }

    #[tokio::test]
    async fn unchanged_source_is_already_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "body").unwrap();
        let store = Arc::new(MemoryStatusStore::new());
        let d = descriptor(path.clone());
        record(&store, &d, ContentChecksum.version(&path).unwrap());

        let e = engine(store);
        assert_eq!(e.decide(&d, false).await, Ok(UpdateReason::AlreadyExtracted));
    }

    #[tokio::test]
    async fn changed_content_is_source_updated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "body").unwrap();
        let store = Arc::new(MemoryStatusStore::new());
        let d = descriptor(path.clone());
        record(&store, &d, ContentChecksum.version(&path).unwrap());
        std::fs::write(&path, "new body").unwrap();

        let e = engine(store);
        assert_eq!(e.decide(&d, false).await, Ok(UpdateReason::SourceUpdated));
    }

    #[tokio::test]
    async fn moved_source_is_source_updated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "body").unwrap();
        let store = Arc::new(MemoryStatusStore::new());
        let old = descriptor(dir.path().join("old.txt"));
        record(&store, &old, ContentChecksum.version(&path).unwrap());

        let e = engine(store);
        assert_eq!(
            e.decide(&descriptor(path), false).await,
            Ok(UpdateReason::SourceUpdated)
        );
    }

    #[tokio::test]
    async fn vanished_source_with_prior_status_is_source_updated() {
        let store = Arc::new(MemoryStatusStore::new());
        let d = descriptor(PathBuf::from("/nonexistent/fulltext/doc.txt"));
        record(&store, &d, "blake3:00".into());

        let e = engine(store);
        assert_eq!(e.decide(&d, false).await, Ok(UpdateReason::SourceUpdated));
    }

    #[tokio::test]
    async fn store_failure_is_an_error_not_a_skip() {
        let e = engine(Arc::new(DownStore));
        let d = descriptor(PathBuf::from("/nonexistent/doc.txt"));
        let err = e.decide(&d, false).await.unwrap_err();
        assert!(matches!(err, PipelineError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let e = DecisionEngine::new(
            Arc::new(SlowStore),
            Arc::new(ContentChecksum),
            Duration::from_millis(50),
        );
        let d = descriptor(PathBuf::from("/nonexistent/doc.txt"));
        let err = e.decide(&d, false).await.unwrap_err();
        assert!(matches!(err, PipelineError::StoreUnavailable(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn decide_all_reports_each_descriptor() {
        let e = engine(Arc::new(MemoryStatusStore::new()));
        let a = descriptor(PathBuf::from("/nonexistent/a.txt"));
        let mut b = descriptor(PathBuf::from("/nonexistent/b.txt"));
        b.identifier = "other".into();

        let decisions = e.decide_all(&[a, b], false).await;
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[1].0, "other");
        assert!(decisions
            .iter()
            .all(|(_, d)| *d == Ok(UpdateReason::NotExtractedBefore)));
    }
}
