//! Source version strings used to detect changed sources.
//!
//! Versions are prefixed with the strategy name, so switching strategies makes
//! every stored version compare unequal instead of silently matching.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

pub trait SourceVersioner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compute the current version of the source at `path`. Blocking.
    fn version(&self, path: &Path) -> io::Result<String>;
}

/// blake3 of the file contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentChecksum;

impl SourceVersioner for ContentChecksum {
    fn name(&self) -> &'static str {
        "blake3"
    }

    fn version(&self, path: &Path) -> io::Result<String> {
        let content = std::fs::read(path)?;
        Ok(format!("blake3:{}", blake3::hash(&content).to_hex()))
    }
}

/// Last-modified time of the file, to nanosecond precision where the
/// filesystem provides it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifiedTime;

impl SourceVersioner for ModifiedTime {
    fn name(&self) -> &'static str {
        "mtime"
    }

    fn version(&self, path: &Path) -> io::Result<String> {
        let modified = std::fs::metadata(path)?.modified()?;
        let since_epoch = modified
            .duration_since(UNIX_EPOCH)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(format!(
            "mtime:{}.{:09}",
            since_epoch.as_secs(),
            since_epoch.subsec_nanos()
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStrategy {
    #[default]
    Checksum,
    Mtime,
}

impl VersionStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "checksum" | "blake3" => Some(Self::Checksum),
            "mtime" => Some(Self::Mtime),
            _ => None,
        }
    }

    pub fn versioner(self) -> Arc<dyn SourceVersioner> {
        match self {
            Self::Checksum => Arc::new(ContentChecksum),
            Self::Mtime => Arc::new(ModifiedTime),
        }
    }
}
