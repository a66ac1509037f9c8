use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::version::VersionStrategy;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub paths: Option<PathsConfig>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub remote: Option<RemoteConfig>,
    pub extraction: Option<ExtractionConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub output_dir: Option<String>,
    /// SQLite status store. Defaults to `<output_dir>/status.db`.
    pub store_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub num_workers: Option<usize>,
    pub store_timeout_secs: Option<u64>,
    pub write_timeout_secs: Option<u64>,
    pub max_redeliveries: Option<u32>,
    pub redelivery_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub requests_per_sec: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Binary backend names in the order they are tried.
    pub backends: Option<Vec<String>>,
    pub backend_timeout_secs: Option<u64>,
    pub max_chain_len: Option<usize>,
    pub version_strategy: Option<VersionStrategy>,
}

/// Platform config directory path: `<config_dir>/fulltext/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fulltext").join("config.toml"))
}

/// Load config by cascading CWD `.fulltext.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".fulltext.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

/// First `Some` of `overlay` then `base` for one field of an optional section.
fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        paths: Some(PathsConfig {
            output_dir: pick(&overlay.paths, &base.paths, |p| p.output_dir.clone()),
            store_path: pick(&overlay.paths, &base.paths, |p| p.store_path.clone()),
        }),
        concurrency: Some(ConcurrencyConfig {
            num_workers: pick(&overlay.concurrency, &base.concurrency, |c| c.num_workers),
            store_timeout_secs: pick(&overlay.concurrency, &base.concurrency, |c| {
                c.store_timeout_secs
            }),
            write_timeout_secs: pick(&overlay.concurrency, &base.concurrency, |c| {
                c.write_timeout_secs
            }),
            max_redeliveries: pick(&overlay.concurrency, &base.concurrency, |c| {
                c.max_redeliveries
            }),
            redelivery_backoff_ms: pick(&overlay.concurrency, &base.concurrency, |c| {
                c.redelivery_backoff_ms
            }),
        }),
        remote: Some(RemoteConfig {
            url: pick(&overlay.remote, &base.remote, |r| r.url.clone()),
            timeout_secs: pick(&overlay.remote, &base.remote, |r| r.timeout_secs),
            requests_per_sec: pick(&overlay.remote, &base.remote, |r| r.requests_per_sec),
        }),
        extraction: Some(ExtractionConfig {
            backends: pick(&overlay.extraction, &base.extraction, |e| e.backends.clone()),
            backend_timeout_secs: pick(&overlay.extraction, &base.extraction, |e| {
                e.backend_timeout_secs
            }),
            max_chain_len: pick(&overlay.extraction, &base.extraction, |e| e.max_chain_len),
            version_strategy: pick(&overlay.extraction, &base.extraction, |e| {
                e.version_strategy
            }),
        }),
    }
}

/// Apply file settings on top of `config`. Unset fields keep their value.
pub fn apply_to(file: &ConfigFile, mut config: Config) -> Config {
    if let Some(paths) = &file.paths
        && let Some(dir) = &paths.output_dir
    {
        config.output_dir = PathBuf::from(dir);
    }
    if let Some(c) = &file.concurrency {
        if let Some(v) = c.num_workers {
            config.num_workers = v;
        }
        if let Some(v) = c.store_timeout_secs {
            config.store_timeout_secs = v;
        }
        if let Some(v) = c.write_timeout_secs {
            config.write_timeout_secs = v;
        }
        if let Some(v) = c.max_redeliveries {
            config.max_redeliveries = v;
        }
        if let Some(v) = c.redelivery_backoff_ms {
            config.redelivery_backoff_ms = v;
        }
    }
    if let Some(r) = &file.remote {
        if r.url.is_some() {
            config.remote_service_url = r.url.clone();
        }
        if let Some(v) = r.timeout_secs {
            config.remote_timeout_secs = v;
        }
        if let Some(v) = r.requests_per_sec {
            config.remote_requests_per_sec = v;
        }
    }
    if let Some(e) = &file.extraction {
        if let Some(v) = e.backend_timeout_secs {
            config.backend_timeout_secs = v;
        }
        if let Some(v) = e.max_chain_len {
            config.max_chain_len = v;
        }
        if let Some(v) = e.version_strategy {
            config.version_strategy = v;
        }
    }
    config
}
