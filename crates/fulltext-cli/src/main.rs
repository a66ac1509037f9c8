use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use fulltext_core::config_file::{self, ConfigFile};
use fulltext_core::output::location_for;
use fulltext_core::{
    DecisionEngine, OutputWriter, Pipeline, PipelineEvent, ProgressFn, SqliteStatusStore,
    StatusStore, StrategyRegistry,
};

mod output;
mod settings;

use output::ColorMode;
use settings::{Overrides, Settings, env_var};

/// Incremental full-text extraction for scholarly documents
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
struct StoreArgs {
    /// Root directory for extraction artifacts
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// SQLite status store (default: <output-dir>/status.db)
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract every document in a manifest that is new or has changed
    Run {
        /// Manifest with one document per line: identifier, path, [format], provider
        manifest: PathBuf,

        /// Re-extract even when the source is unchanged
        #[arg(long)]
        force_extract: bool,

        #[command(flatten)]
        store: StoreArgs,

        /// Worker tasks per pipeline stage
        #[arg(long)]
        workers: Option<usize>,

        /// Structured-extraction service URL (GROBID processFulltextDocument)
        #[arg(long)]
        grobid_url: Option<String>,

        /// Comma-separated binary backends in fallback order
        #[arg(long, value_delimiter = ',')]
        backends: Vec<String>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Report what a run would do without extracting anything
    Check {
        /// Manifest with one document per line: identifier, path, [format], provider
        manifest: PathBuf,

        /// Report every document as forced
        #[arg(long)]
        force_extract: bool,

        #[command(flatten)]
        store: StoreArgs,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Show the stored extraction status of one document
    Status {
        identifier: String,

        #[command(flatten)]
        store: StoreArgs,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_file.as_deref())?;
    let file = config_file::load_config();

    match cli.command {
        Command::Run {
            manifest,
            force_extract,
            store,
            workers,
            grobid_url,
            backends,
            no_color,
        } => {
            let overrides = Overrides {
                output_dir: store.output_dir,
                store: store.store,
                workers,
                grobid_url,
                backends,
            };
            run(&file, manifest, force_extract, overrides, no_color).await
        }
        Command::Check {
            manifest,
            force_extract,
            store,
            no_color,
        } => check(&file, manifest, force_extract, store, no_color).await,
        Command::Status {
            identifier,
            store,
            no_color,
        } => status(&file, &identifier, store, no_color),
    }
}

/// Install the tracing subscriber. Logs go to stderr at `warn` unless
/// `RUST_LOG` says otherwise; a log file defaults to `info`.
fn init_logging(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if log_file.is_some() { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn resolve_settings(file: &ConfigFile, overrides: Overrides) -> Settings {
    settings::resolve(file, env_var, overrides)
}

fn read_manifest(path: &Path) -> anyhow::Result<fulltext_ingest::Batch> {
    if !path.exists() {
        anyhow::bail!("Manifest not found: {}", path.display());
    }
    Ok(fulltext_ingest::read_manifest(path)?)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

async fn run(
    file: &ConfigFile,
    manifest: PathBuf,
    force_extract: bool,
    overrides: Overrides,
    no_color: bool,
) -> anyhow::Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    let color = ColorMode(!no_color);
    let mut out = std::io::stdout();

    let settings = resolve_settings(file, overrides);
    let batch = read_manifest(&manifest)?;
    output::print_intake(
        &mut out,
        &display_name(&manifest),
        batch.len(),
        &batch.skipped,
        color,
    )?;
    if batch.is_empty() {
        writeln!(out, "No documents to process.")?;
        return Ok(());
    }

    let store = fulltext_core::open_status_store(Some(&settings.store_path)).with_context(
        || format!("cannot open status store {}", settings.store_path.display()),
    )?;
    let chain = fulltext_ingest::backend_chain(&settings.config, &settings.backends)?;
    if chain.is_empty() {
        anyhow::bail!("No binary backends available; check --backends");
    }
    let config = Arc::new(settings.config);
    let registry = Arc::new(StrategyRegistry::new(&config, chain));

    let bar = ProgressBar::new(batch.len() as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.green/dim}] {pos}/{len} {msg} (eta {eta})",
        )
        .unwrap()
        .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let progress: ProgressFn = {
        let bar = bar.clone();
        Arc::new(move |event: PipelineEvent| {
            if let Some(line) = output::format_event(&event, color) {
                bar.println(line);
            }
            match event {
                PipelineEvent::Written { .. }
                | PipelineEvent::Skipped { .. }
                | PipelineEvent::Failed { .. } => bar.inc(1),
                PipelineEvent::Extracted { identifier, .. } => bar.set_message(identifier),
                _ => {}
            }
        })
    };

    let cancel = CancellationToken::new();

    // Set up Ctrl+C handler
    let cancel_clone = cancel.clone();
    let bar_clone = bar.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            bar_clone.println("Cancelling; documents still queued will be reported as failed...");
            cancel_clone.cancel();
        }
    });

    let pipeline = Pipeline::new(
        Arc::clone(&config),
        store,
        registry,
        progress,
        cancel.clone(),
    );
    let report = pipeline.run_batch(&batch.descriptors, force_extract).await;
    bar.finish_and_clear();

    output::print_failures(&mut out, &report.reports, color)?;
    output::print_summary(
        &mut out,
        &report.stats,
        batch.skipped.len(),
        &config.output_dir,
        cancel.is_cancelled(),
        color,
    )?;

    Ok(())
}

async fn check(
    file: &ConfigFile,
    manifest: PathBuf,
    force_extract: bool,
    store: StoreArgs,
    no_color: bool,
) -> anyhow::Result<()> {
    let color = ColorMode(!no_color);
    let mut out = std::io::stdout();

    let settings = resolve_settings(
        file,
        Overrides {
            output_dir: store.output_dir,
            store: store.store,
            ..Default::default()
        },
    );
    let batch = read_manifest(&manifest)?;
    output::print_intake(
        &mut out,
        &display_name(&manifest),
        batch.len(),
        &batch.skipped,
        color,
    )?;

    // A missing store means nothing was extracted yet; don't create one just to look.
    let store_path = settings.store_path.exists().then_some(settings.store_path.as_path());
    let status_store = fulltext_core::open_status_store(store_path).with_context(|| {
        format!("cannot open status store {}", settings.store_path.display())
    })?;

    let engine = DecisionEngine::new(
        status_store,
        settings.config.version_strategy.versioner(),
        Duration::from_secs(settings.config.store_timeout_secs),
    );
    let decisions = engine.decide_all(&batch.descriptors, force_extract).await;
    output::print_decisions(&mut out, &decisions, color)?;

    Ok(())
}

fn status(
    file: &ConfigFile,
    identifier: &str,
    store: StoreArgs,
    no_color: bool,
) -> anyhow::Result<()> {
    let color = ColorMode(!no_color);
    let mut out = std::io::stdout();

    let settings = resolve_settings(
        file,
        Overrides {
            output_dir: store.output_dir,
            store: store.store,
            ..Default::default()
        },
    );
    if !settings.store_path.exists() {
        anyhow::bail!("No status store at {}", settings.store_path.display());
    }
    let status_store: Arc<dyn StatusStore> = Arc::new(
        SqliteStatusStore::open(&settings.store_path).with_context(|| {
            format!("cannot open status store {}", settings.store_path.display())
        })?,
    );

    let Some(status) = status_store.get_status(identifier)? else {
        writeln!(out, "{} has not been extracted", identifier)?;
        return Ok(());
    };

    let config = &settings.config;
    let location = location_for(&config.output_dir, identifier)?;
    let writer = OutputWriter::new(
        config.output_dir.clone(),
        Arc::clone(&status_store),
        Duration::from_secs(config.write_timeout_secs),
        Duration::from_secs(config.store_timeout_secs),
    );
    let meta = writer.read_meta(identifier)?;
    output::print_status(&mut out, &status, &location, meta.as_ref(), color)?;

    Ok(())
}
