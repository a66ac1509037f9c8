//! Three-stage extraction pipeline: check → extract → output.
//!
//! Each stage is a pool of `num_workers` tasks reading from its own queue.
//! Closing the check queue drains the stages in order: check workers exit,
//! dropping the last extract-queue senders, which lets extract workers drain
//! and exit, and so on down to output.
//!
//! Every submitted document produces exactly one [`DocumentReport`].

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::decision::DecisionEngine;
use crate::extract::remote::RemoteError;
use crate::extract::{ExtractError, Extraction, Extractor};
use crate::message::{ExtractedMessage, StageMessage};
use crate::output::{LeafState, OutputWriter, WriteOutcome};
use crate::store::StatusStore;
use crate::{Config, DocumentDescriptor, PipelineError, Stage, UpdateReason};

/// Progress events emitted while documents move through the stages.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Checked {
        identifier: String,
        reason: UpdateReason,
    },
    Skipped {
        identifier: String,
    },
    Extracted {
        identifier: String,
        backend: String,
        elapsed: Duration,
    },
    /// The remote service failed; the document continues without its payload.
    RemoteServiceFailed {
        identifier: String,
        error: RemoteError,
    },
    Written {
        identifier: String,
        location: PathBuf,
    },
    /// A retryable failure; the stage is trying the document again.
    Redelivered {
        identifier: String,
        stage: Stage,
        attempt: u32,
        error: PipelineError,
    },
    Failed {
        identifier: String,
        stage: Stage,
        error: PipelineError,
    },
}

pub type ProgressFn = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Final outcome for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Done {
        update_reason: UpdateReason,
        location: PathBuf,
        remote_enriched: bool,
    },
    Skipped,
    Failed {
        stage: Stage,
        error: PipelineError,
    },
}

impl DocumentOutcome {
    /// A failed document that a later run might get through.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { error, .. } if error.is_retryable())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReport {
    pub identifier: String,
    pub outcome: DocumentOutcome,
}

/// Outcome counts for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub retryable_failures: usize,
    pub remote_enriched: usize,
}

impl RunStats {
    pub fn record(&mut self, outcome: &DocumentOutcome) {
        self.total += 1;
        match outcome {
            DocumentOutcome::Done {
                remote_enriched, ..
            } => {
                self.done += 1;
                if *remote_enriched {
                    self.remote_enriched += 1;
                }
            }
            DocumentOutcome::Skipped => self.skipped += 1,
            DocumentOutcome::Failed { error, .. } => {
                self.failed += 1;
                if error.is_retryable() {
                    self.retryable_failures += 1;
                }
            }
        }
    }

    pub fn from_reports(reports: &[DocumentReport]) -> Self {
        let mut stats = Self::default();
        for report in reports {
            stats.record(&report.outcome);
        }
        stats
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    /// One entry per submitted document, in completion order.
    pub reports: Vec<DocumentReport>,
    pub stats: RunStats,
}

type Reports = mpsc::UnboundedSender<DocumentReport>;

/// Components shared by every worker.
struct Stages {
    config: Arc<Config>,
    decision: DecisionEngine,
    extractor: Arc<dyn Extractor>,
    writer: OutputWriter,
    progress: ProgressFn,
    cancel: CancellationToken,
}

pub struct Pipeline {
    check_tx: async_channel::Sender<StageMessage>,
    reports: mpsc::UnboundedReceiver<DocumentReport>,
    handle: JoinHandle<()>,
    stages: Arc<Stages>,
}

impl Pipeline {
    /// Spawn the stage workers. Must be called inside a Tokio runtime.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn StatusStore>,
        extractor: Arc<dyn Extractor>,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Self {
        let store_timeout = Duration::from_secs(config.store_timeout_secs);
        let stages = Arc::new(Stages {
            decision: DecisionEngine::new(
                Arc::clone(&store),
                config.version_strategy.versioner(),
                store_timeout,
            ),
            writer: OutputWriter::new(
                config.output_dir.clone(),
                store,
                Duration::from_secs(config.write_timeout_secs),
                store_timeout,
            ),
            extractor,
            progress,
            cancel,
            config,
        });

        let (check_tx, check_rx) = async_channel::unbounded::<StageMessage>();
        let (extract_tx, extract_rx) = async_channel::unbounded::<StageMessage>();
        let (output_tx, output_rx) = async_channel::unbounded::<ExtractedMessage>();
        let (report_tx, report_rx) = mpsc::unbounded_channel::<DocumentReport>();
        let workers = stages.config.num_workers.max(1);

        let shared = Arc::clone(&stages);
        let handle = tokio::spawn(async move {
            let check_handles: Vec<JoinHandle<()>> = (0..workers)
                .map(|_| {
                    tokio::spawn(check_loop(
                        check_rx.clone(),
                        extract_tx.clone(),
                        Arc::clone(&shared),
                        report_tx.clone(),
                    ))
                })
                .collect();
            let extract_handles: Vec<JoinHandle<()>> = (0..workers)
                .map(|_| {
                    tokio::spawn(extract_loop(
                        extract_rx.clone(),
                        output_tx.clone(),
                        Arc::clone(&shared),
                        report_tx.clone(),
                    ))
                })
                .collect();
            let output_handles: Vec<JoinHandle<()>> = (0..workers)
                .map(|_| {
                    tokio::spawn(output_loop(
                        output_rx.clone(),
                        Arc::clone(&shared),
                        report_tx.clone(),
                    ))
                })
                .collect();

            // Workers hold the only remaining clones, so each queue closes
            // once the stage feeding it has finished.
            drop(check_rx);
            drop(extract_tx);
            drop(extract_rx);
            drop(output_tx);
            drop(output_rx);
            drop(report_tx);
            drop(shared);

            for h in check_handles {
                let _ = h.await;
            }
            for h in extract_handles {
                let _ = h.await;
            }
            for h in output_handles {
                let _ = h.await;
            }
        });

        Self {
            check_tx,
            reports: report_rx,
            handle,
            stages,
        }
    }

    pub async fn submit(&self, descriptor: &DocumentDescriptor, force_extract: bool) {
        let _ = self
            .check_tx
            .send(StageMessage::new(descriptor, force_extract))
            .await;
    }

    /// Close intake, wait for every stage to drain, and return all reports.
    pub async fn shutdown(mut self) -> Vec<DocumentReport> {
        self.check_tx.close();
        let _ = self.handle.await;

        let mut reports = Vec::new();
        while let Some(report) = self.reports.recv().await {
            reports.push(report);
        }
        reports
    }

    /// Submit a whole batch and wait for it to finish.
    pub async fn run_batch(
        self,
        descriptors: &[DocumentDescriptor],
        force_extract: bool,
    ) -> BatchReport {
        for descriptor in descriptors {
            self.submit(descriptor, force_extract).await;
        }
        let reports = self.shutdown().await;
        let stats = RunStats::from_reports(&reports);
        tracing::info!(
            total = stats.total,
            done = stats.done,
            skipped = stats.skipped,
            failed = stats.failed,
            "batch finished"
        );
        BatchReport { reports, stats }
    }

    /// Run only the decision for each descriptor; nothing is extracted or written.
    pub async fn decide_batch(
        &self,
        descriptors: &[DocumentDescriptor],
        force_extract: bool,
    ) -> Vec<(String, Result<UpdateReason, PipelineError>)> {
        self.stages
            .decision
            .decide_all(descriptors, force_extract)
            .await
    }
}

impl Stages {
    fn emit(&self, event: PipelineEvent) {
        (self.progress)(event);
    }

    fn finish(&self, reports: &Reports, identifier: &str, outcome: DocumentOutcome) {
        match &outcome {
            DocumentOutcome::Done {
                update_reason,
                location,
                ..
            } => {
                tracing::info!(
                    identifier,
                    reason = %update_reason,
                    location = %location.display(),
                    "document extracted"
                );
            }
            DocumentOutcome::Skipped => {
                tracing::debug!(identifier, "document already extracted");
            }
            DocumentOutcome::Failed { stage, error } => {
                tracing::info!(
                    identifier,
                    stage = %stage,
                    error = %error,
                    retryable = error.is_retryable(),
                    "document failed"
                );
                self.emit(PipelineEvent::Failed {
                    identifier: identifier.to_string(),
                    stage: *stage,
                    error: error.clone(),
                });
            }
        }
        let _ = reports.send(DocumentReport {
            identifier: identifier.to_string(),
            outcome,
        });
    }

    fn fail(&self, reports: &Reports, identifier: &str, stage: Stage, error: PipelineError) {
        self.finish(reports, identifier, DocumentOutcome::Failed { stage, error });
    }

    /// Run `op`, redelivering retryable failures with linear backoff.
    async fn with_redelivery<T, F, Fut>(
        &self,
        stage: Stage,
        identifier: &str,
        mut attempt: u32,
        mut op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.config.max_redeliveries => {
                    attempt += 1;
                    tracing::warn!(
                        identifier,
                        stage = %stage,
                        attempt,
                        error = %error,
                        "retryable failure, redelivering"
                    );
                    self.emit(PipelineEvent::Redelivered {
                        identifier: identifier.to_string(),
                        stage,
                        attempt,
                        error,
                    });
                    let backoff =
                        Duration::from_millis(self.config.redelivery_backoff_ms * attempt as u64);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Repair the identifier's leaf before deciding. An unreadable output
    /// tree is left for the write stage to report.
    async fn recover(&self, identifier: &str) -> LeafState {
        match self.writer.recover(identifier).await {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!(identifier, error = %error, "cannot inspect committed artifacts");
                LeafState::Committed
            }
        }
    }

    async fn extract(
        &self,
        descriptor: &DocumentDescriptor,
    ) -> Result<(Extraction, String), PipelineError> {
        // Observe the version before reading the content, so a change made
        // during extraction is picked up by the next run.
        let version = self.decision.current_version(&descriptor.source_path).await;
        let extraction = self.extractor.extract(descriptor).await?;
        if extraction.result.fulltext.trim().is_empty() {
            return Err(ExtractError::EmptyContent.into());
        }
        let version =
            version.map_err(|e| ExtractError::unreadable(&descriptor.source_path, e))?;
        Ok((extraction, version))
    }

    async fn write(&self, message: &ExtractedMessage) -> Result<WriteOutcome, PipelineError> {
        let descriptor = message.message.descriptor();
        let reason = message
            .message
            .update_reason
            .unwrap_or(UpdateReason::NotExtractedBefore);
        let outcome = self
            .writer
            .write(&descriptor, &message.result, reason, &message.source_version)
            .await?;
        Ok(outcome)
    }
}

async fn check_loop(
    rx: async_channel::Receiver<StageMessage>,
    next: async_channel::Sender<StageMessage>,
    stages: Arc<Stages>,
    reports: Reports,
) {
    while let Ok(message) = rx.recv().await {
        let identifier = message.identifier.clone();
        if stages.cancel.is_cancelled() {
            stages.fail(&reports, &identifier, Stage::Check, PipelineError::Cancelled);
            continue;
        }

        let descriptor = message.descriptor();
        let leaf = stages.recover(&identifier).await;
        let decision = {
            let engine = &stages.decision;
            let descriptor = &descriptor;
            let force = message.force_extract;
            stages
                .with_redelivery(Stage::Check, &identifier, message.attempt, move || {
                    engine.decide(descriptor, force)
                })
                .await
        };

        let reason = match decision {
            Ok(UpdateReason::AlreadyExtracted) if leaf == LeafState::Missing => {
                tracing::warn!(
                    identifier,
                    "status says extracted but artifacts are missing, re-extracting"
                );
                UpdateReason::SourceUpdated
            }
            Ok(reason) => reason,
            Err(error) => {
                stages.fail(&reports, &identifier, Stage::Check, error);
                continue;
            }
        };
        stages.emit(PipelineEvent::Checked {
            identifier: identifier.clone(),
            reason,
        });

        if !reason.needs_extraction() {
            stages.emit(PipelineEvent::Skipped {
                identifier: identifier.clone(),
            });
            stages.finish(&reports, &identifier, DocumentOutcome::Skipped);
            continue;
        }

        if next.send(message.advance(reason)).await.is_err() {
            stages.fail(&reports, &identifier, Stage::Check, PipelineError::Cancelled);
        }
    }
}

async fn extract_loop(
    rx: async_channel::Receiver<StageMessage>,
    next: async_channel::Sender<ExtractedMessage>,
    stages: Arc<Stages>,
    reports: Reports,
) {
    while let Ok(message) = rx.recv().await {
        let identifier = message.identifier.clone();
        if stages.cancel.is_cancelled() {
            stages.fail(&reports, &identifier, Stage::Extract, PipelineError::Cancelled);
            continue;
        }

        let descriptor = message.descriptor();
        let started = Instant::now();
        let extracted = {
            let shared = &*stages;
            let descriptor = &descriptor;
            stages
                .with_redelivery(Stage::Extract, &identifier, message.attempt, move || {
                    shared.extract(descriptor)
                })
                .await
        };

        let (extraction, source_version) = match extracted {
            Ok(extracted) => extracted,
            Err(error) => {
                stages.fail(&reports, &identifier, Stage::Extract, error);
                continue;
            }
        };
        stages.emit(PipelineEvent::Extracted {
            identifier: identifier.clone(),
            backend: extraction.result.backend_used.clone(),
            elapsed: started.elapsed(),
        });
        if let Some(error) = extraction.remote_failure {
            stages.emit(PipelineEvent::RemoteServiceFailed {
                identifier: identifier.clone(),
                error,
            });
        }

        let reason = message
            .update_reason
            .unwrap_or(UpdateReason::NotExtractedBefore);
        let forward = ExtractedMessage {
            message: message.advance(reason),
            source_version,
            result: extraction.result,
        };
        if next.send(forward).await.is_err() {
            stages.fail(&reports, &identifier, Stage::Extract, PipelineError::Cancelled);
        }
    }
}

async fn output_loop(
    rx: async_channel::Receiver<ExtractedMessage>,
    stages: Arc<Stages>,
    reports: Reports,
) {
    while let Ok(message) = rx.recv().await {
        let identifier = message.message.identifier.clone();
        if stages.cancel.is_cancelled() {
            stages.fail(&reports, &identifier, Stage::Output, PipelineError::Cancelled);
            continue;
        }

        let written = {
            let shared = &*stages;
            let message = &message;
            stages
                .with_redelivery(
                    Stage::Output,
                    &identifier,
                    message.message.attempt,
                    move || shared.write(message),
                )
                .await
        };

        match written {
            Ok(outcome) => {
                stages.emit(PipelineEvent::Written {
                    identifier: identifier.clone(),
                    location: outcome.location.clone(),
                });
                stages.finish(
                    &reports,
                    &identifier,
                    DocumentOutcome::Done {
                        update_reason: outcome.status.last_update_reason,
                        location: outcome.location,
                        remote_enriched: outcome.remote_payload_written,
                    },
                );
            }
            Err(error) => stages.fail(&reports, &identifier, Stage::Output, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_outcomes() {
        let reports = vec![
            DocumentReport {
                identifier: "a".into(),
                outcome: DocumentOutcome::Done {
                    update_reason: UpdateReason::NotExtractedBefore,
                    location: PathBuf::from("/out/a"),
                    remote_enriched: true,
                },
            },
            DocumentReport {
                identifier: "b".into(),
                outcome: DocumentOutcome::Skipped,
            },
            DocumentReport {
                identifier: "c".into(),
                outcome: DocumentOutcome::Failed {
                    stage: Stage::Check,
                    error: PipelineError::StoreUnavailable("down".into()),
                },
            },
            DocumentReport {
                identifier: "d".into(),
                outcome: DocumentOutcome::Failed {
                    stage: Stage::Extract,
                    error: PipelineError::Extraction(ExtractError::EmptyContent),
                },
            },
        ];
        let stats = RunStats::from_reports(&reports);
        assert_eq!(
            stats,
            RunStats {
                total: 4,
                done: 1,
                skipped: 1,
                failed: 2,
                retryable_failures: 1,
                remote_enriched: 1,
            }
        );
        assert!(reports[2].outcome.is_retryable());
        assert!(!reports[3].outcome.is_retryable());
    }
}
