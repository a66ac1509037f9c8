//! Layered configuration: flags > environment > config file > defaults.

use std::path::PathBuf;

use fulltext_core::Config;
use fulltext_core::config_file::{self, ConfigFile};

/// Store file name used when no store path is configured.
pub const DEFAULT_STORE_FILE: &str = "status.db";

/// Values given on the command line. `None` / empty means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub output_dir: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub workers: Option<usize>,
    pub grobid_url: Option<String>,
    pub backends: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub config: Config,
    pub store_path: PathBuf,
    /// Binary backend order. Empty selects the default chain.
    pub backends: Vec<String>,
}

/// Read a non-empty environment variable.
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn resolve(
    file: &ConfigFile,
    env: impl Fn(&str) -> Option<String>,
    overrides: Overrides,
) -> Settings {
    let mut config = config_file::apply_to(file, Config::default());

    if let Some(dir) = env("FULLTEXT_OUTPUT_DIR") {
        config.output_dir = PathBuf::from(dir);
    }
    if let Some(url) = env("GROBID_URL") {
        config.remote_service_url = Some(url);
    }
    if let Some(workers) = env("FULLTEXT_WORKERS").and_then(|v| v.trim().parse().ok()) {
        config.num_workers = workers;
    }

    if let Some(dir) = overrides.output_dir {
        config.output_dir = dir;
    }
    if let Some(workers) = overrides.workers {
        config.num_workers = workers;
    }
    if overrides.grobid_url.is_some() {
        config.remote_service_url = overrides.grobid_url;
    }

    let store_path = overrides
        .store
        .or_else(|| env("FULLTEXT_STORE").map(PathBuf::from))
        .or_else(|| {
            file.paths
                .as_ref()
                .and_then(|p| p.store_path.as_ref())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| config.output_dir.join(DEFAULT_STORE_FILE));

    let backends = if overrides.backends.is_empty() {
        file.extraction
            .as_ref()
            .and_then(|e| e.backends.clone())
            .unwrap_or_default()
    } else {
        overrides.backends
    };

    Settings {
        config,
        store_path,
        backends,
    }
}
