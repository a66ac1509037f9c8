use std::io::Write;
use std::path::Path;

use fulltext_core::{
    DocumentOutcome, DocumentReport, ExtractionStatus, MetaRecord, PipelineError, PipelineEvent,
    RunStats, UpdateReason,
};
use fulltext_ingest::ManifestSkip;
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print what was read from the manifest, including rejected lines.
pub fn print_intake(
    w: &mut dyn Write,
    manifest_name: &str,
    documents: usize,
    skipped: &[ManifestSkip],
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w, "Reading manifest {}...", manifest_name)?;
    writeln!(w, "Found {} documents", documents)?;
    for skip in skipped {
        let msg = format!("  line {}: {} (skipped)", skip.line, skip.reason);
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    writeln!(w)?;
    Ok(())
}

/// One-line rendering of the events worth showing above the progress bar.
pub fn format_event(event: &PipelineEvent, color: ColorMode) -> Option<String> {
    match event {
        PipelineEvent::RemoteServiceFailed { identifier, error } => {
            let label = "REMOTE SERVICE FAILED";
            Some(if color.enabled() {
                format!("{} {}: {}", label.yellow(), identifier, error)
            } else {
                format!("{} {}: {}", label, identifier, error)
            })
        }
        PipelineEvent::Redelivered {
            identifier,
            stage,
            attempt,
            error,
        } => {
            let msg = format!("retrying {} in {} (attempt {}): {}", identifier, stage, attempt, error);
            Some(if color.enabled() {
                msg.dimmed().to_string()
            } else {
                msg
            })
        }
        _ => None,
    }
}

/// Print every failed document with its stage and error.
pub fn print_failures(
    w: &mut dyn Write,
    reports: &[DocumentReport],
    color: ColorMode,
) -> std::io::Result<()> {
    let failed: Vec<(&str, &PipelineError, String)> = reports
        .iter()
        .filter_map(|r| match &r.outcome {
            DocumentOutcome::Failed { stage, error } => {
                Some((r.identifier.as_str(), error, stage.to_string()))
            }
            _ => None,
        })
        .collect();
    if failed.is_empty() {
        return Ok(());
    }

    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "FAILED DOCUMENTS".bold().red())?;
    } else {
        writeln!(w, "FAILED DOCUMENTS")?;
    }
    for (identifier, error, stage) in failed {
        let hint = if error.is_retryable() { " [retryable]" } else { "" };
        if color.enabled() {
            writeln!(
                w,
                "  {} ({}): {}{}",
                identifier.bold(),
                stage,
                error,
                hint.dimmed()
            )?;
        } else {
            writeln!(w, "  {} ({}): {}{}", identifier, stage, error, hint)?;
        }
    }
    Ok(())
}

/// Print the final run summary.
pub fn print_summary(
    w: &mut dyn Write,
    stats: &RunStats,
    manifest_skipped: usize,
    output_dir: &Path,
    cancelled: bool,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", "SUMMARY".bold())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "SUMMARY")?;
        writeln!(w, "{}", sep)?;
    }

    writeln!(w, "  Documents processed: {}", stats.total)?;
    if manifest_skipped > 0 {
        let msg = format!("Malformed manifest lines: {}", manifest_skipped);
        if color.enabled() {
            writeln!(w, "  {}", msg.dimmed())?;
        } else {
            writeln!(w, "  {}", msg)?;
        }
    }
    writeln!(w, "  Output directory: {}", output_dir.display())?;
    writeln!(w)?;

    if color.enabled() {
        writeln!(w, "  {} {}", "Extracted:".green(), stats.done)?;
        writeln!(w, "  {} {}", "Up to date:".cyan(), stats.skipped)?;
    } else {
        writeln!(w, "  Extracted: {}", stats.done)?;
        writeln!(w, "  Up to date: {}", stats.skipped)?;
    }
    if stats.remote_enriched > 0 {
        writeln!(w, "  With remote-service payload: {}", stats.remote_enriched)?;
    }
    if stats.failed > 0 {
        let msg = format!(
            "{} ({} retryable)",
            stats.failed, stats.retryable_failures
        );
        if color.enabled() {
            writeln!(w, "  {} {}", "Failed:".red(), msg)?;
        } else {
            writeln!(w, "  Failed: {}", msg)?;
        }
    }
    if cancelled {
        if color.enabled() {
            writeln!(w, "\n  {}", "Run was cancelled before completion.".yellow())?;
        } else {
            writeln!(w, "\n  Run was cancelled before completion.")?;
        }
    }
    writeln!(w)?;
    Ok(())
}

/// Print the decide-only report of the `check` subcommand.
pub fn print_decisions(
    w: &mut dyn Write,
    decisions: &[(String, Result<UpdateReason, PipelineError>)],
    color: ColorMode,
) -> std::io::Result<()> {
    let mut pending = 0usize;
    let mut errors = 0usize;
    for (identifier, decision) in decisions {
        match decision {
            Ok(reason) => {
                if reason.needs_extraction() {
                    pending += 1;
                }
                if !color.enabled() {
                    writeln!(w, "{:<20} {}", reason.as_str(), identifier)?;
                } else if reason.needs_extraction() {
                    writeln!(w, "{:<20} {}", reason.as_str().yellow(), identifier)?;
                } else {
                    writeln!(w, "{:<20} {}", reason.as_str().green(), identifier)?;
                }
            }
            Err(e) => {
                errors += 1;
                if color.enabled() {
                    writeln!(w, "{:<20} {}: {}", "ERROR".red(), identifier, e)?;
                } else {
                    writeln!(w, "{:<20} {}: {}", "ERROR", identifier, e)?;
                }
            }
        }
    }
    writeln!(w)?;
    writeln!(
        w,
        "{} documents, {} need extraction, {} up to date, {} errors",
        decisions.len(),
        pending,
        decisions.len() - pending - errors,
        errors
    )?;
    Ok(())
}

/// Print the stored status of one identifier and, when present, its metadata.
pub fn print_status(
    w: &mut dyn Write,
    status: &ExtractionStatus,
    location: &Path,
    meta: Option<&MetaRecord>,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{}", status.identifier.bold())?;
    } else {
        writeln!(w, "{}", status.identifier)?;
    }
    writeln!(w, "  Source:         {}", status.source_path.display())?;
    writeln!(w, "  Provider:       {}", status.provider)?;
    writeln!(w, "  Extracted at:   {}", status.last_extracted_at.to_rfc3339())?;
    writeln!(w, "  Reason:         {}", status.last_update_reason)?;
    writeln!(w, "  Source version: {}", status.source_version)?;
    writeln!(w, "  Location:       {}", location.display())?;

    match meta {
        Some(meta) => {
            writeln!(w, "  Backend:        {}", meta.backend_used)?;
            writeln!(w, "  Format:         {}", meta.declared_format)?;
            if !meta.structured_metadata.is_empty() {
                let sections: Vec<&str> =
                    meta.structured_metadata.keys().map(String::as_str).collect();
                writeln!(w, "  Sections:       {}", sections.join(", "))?;
            }
            if meta.has_remote_payload {
                writeln!(w, "  Remote payload: yes")?;
            }
        }
        None => {
            let msg = "  (artifacts missing from the output directory)";
            if color.enabled() {
                writeln!(w, "{}", msg.red())?;
            } else {
                writeln!(w, "{}", msg)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use fulltext_core::{ExtractError, Stage};

    use super::*;

    const PLAIN: ColorMode = ColorMode(false);

    fn render(f: impl FnOnce(&mut dyn Write) -> std::io::Result<()>) -> String {
        let mut buf: Vec<u8> = Vec::new();
        f(&mut buf as &mut dyn Write).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn intake_lists_skipped_lines() {
        let skipped = vec![ManifestSkip {
            line: 7,
            reason: "expected 3 or 4 fields, found 1".into(),
        }];
        let out = render(|w| print_intake(w, "batch.links", 6, &skipped, PLAIN));
        assert!(out.contains("Found 6 documents"));
        assert!(out.contains("line 7: expected 3 or 4 fields, found 1 (skipped)"));
    }

    #[test]
    fn failures_mark_retryable_errors() {
        let reports = vec![
            DocumentReport {
                identifier: "ok".into(),
                outcome: DocumentOutcome::Skipped,
            },
            DocumentReport {
                identifier: "store-down".into(),
                outcome: DocumentOutcome::Failed {
                    stage: Stage::Check,
                    error: PipelineError::StoreUnavailable("timed out".into()),
                },
            },
            DocumentReport {
                identifier: "docx".into(),
                outcome: DocumentOutcome::Failed {
                    stage: Stage::Extract,
                    error: PipelineError::Extraction(ExtractError::UnsupportedFormat(
                        "docx".into(),
                    )),
                },
            },
        ];
        let out = render(|w| print_failures(w, &reports, PLAIN));
        assert!(out.contains("store-down (check): record store unavailable: timed out [retryable]"));
        let docx = out.lines().find(|l| l.contains("docx (extract)")).unwrap();
        assert!(!docx.contains("[retryable]"));
        assert!(!out.contains("  ok"));
    }

    #[test]
    fn no_failures_prints_nothing() {
        let reports = vec![DocumentReport {
            identifier: "ok".into(),
            outcome: DocumentOutcome::Skipped,
        }];
        assert_eq!(render(|w| print_failures(w, &reports, PLAIN)), "");
    }

    #[test]
    fn summary_counts() {
        let stats = RunStats {
            total: 5,
            done: 3,
            skipped: 1,
            failed: 1,
            retryable_failures: 1,
            remote_enriched: 2,
        };
        let out = render(|w| print_summary(w, &stats, 1, &PathBuf::from("/out"), false, PLAIN));
        assert!(out.contains("Documents processed: 5"));
        assert!(out.contains("Malformed manifest lines: 1"));
        assert!(out.contains("Extracted: 3"));
        assert!(out.contains("Up to date: 1"));
        assert!(out.contains("With remote-service payload: 2"));
        assert!(out.contains("Failed: 1 (1 retryable)"));
        assert!(!out.contains("cancelled"));
    }

    #[test]
    fn decisions_report() {
        let decisions = vec![
            ("a".to_string(), Ok(UpdateReason::NotExtractedBefore)),
            ("b".to_string(), Ok(UpdateReason::AlreadyExtracted)),
            (
                "c".to_string(),
                Err(PipelineError::StoreUnavailable("locked".into())),
            ),
        ];
        let out = render(|w| print_decisions(w, &decisions, PLAIN));
        assert!(out.contains("NOT_EXTRACTED_BEFORE"));
        assert!(out.contains("ALREADY_EXTRACTED"));
        assert!(out.contains("3 documents, 1 need extraction, 1 up to date, 1 errors"));
    }

    #[test]
    fn only_notable_events_are_rendered() {
        let event = PipelineEvent::Skipped {
            identifier: "x".into(),
        };
        assert!(format_event(&event, PLAIN).is_none());

        let event = PipelineEvent::Redelivered {
            identifier: "x".into(),
            stage: Stage::Output,
            attempt: 1,
            error: PipelineError::WriteFailure("disk full".into()),
        };
        assert_eq!(
            format_event(&event, PLAIN).unwrap(),
            "retrying x in output (attempt 1): write failure: disk full"
        );
    }
}
