//! Manifest reader: one document descriptor per line.
//!
//! ```text
//! # identifier    source_path                 [format]    provider
//! 2019A&A...621A..26X  /data/aa/fulltext.pdf  pdf         A&A
//! 2015MNRAS.446..999X  /data/mnras/a.xml                  OUP
//! ```
//!
//! Fields are tab-separated when the line contains a tab, otherwise split on
//! whitespace. With three fields the format is inferred from the source
//! path's extension.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use fulltext_core::{DeclaredFormat, DocumentDescriptor};

use crate::IngestError;

/// A single printable token with no whitespace or control characters.
static IDENTIFIER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s\p{Cc}]+$").unwrap());

/// A manifest line that was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSkip {
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

/// Descriptors read from a manifest, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub descriptors: Vec<DocumentDescriptor>,
    pub skipped: Vec<ManifestSkip>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Read and parse a manifest file. Only an unreadable file is an error.
pub fn read_manifest(path: &Path) -> Result<Batch, IngestError> {
    let content = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let batch = parse_manifest(&content);
    tracing::info!(
        manifest = %path.display(),
        descriptors = batch.descriptors.len(),
        skipped = batch.skipped.len(),
        "read manifest"
    );
    Ok(batch)
}

pub fn parse_manifest(content: &str) -> Batch {
    let mut batch = Batch::default();
    for (idx, raw) in content.lines().enumerate() {
        let line = idx + 1;
        match parse_line(raw) {
            Ok(Some(descriptor)) => batch.descriptors.push(descriptor),
            Ok(None) => {}
            Err(reason) => {
                tracing::warn!(line, reason = %reason, "skipping malformed manifest line");
                batch.skipped.push(ManifestSkip { line, reason });
            }
        }
    }
    batch
}

fn parse_line(raw: &str) -> Result<Option<DocumentDescriptor>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = if trimmed.contains('\t') {
        trimmed.split('\t').map(str::trim).collect()
    } else {
        trimmed.split_whitespace().collect()
    };

    let (identifier, source_path, format, provider) = match fields.as_slice() {
        [id, path, format, provider] => (*id, *path, Some(*format), *provider),
        [id, path, provider] => (*id, *path, None, *provider),
        other => return Err(format!("expected 3 or 4 fields, found {}", other.len())),
    };

    if identifier == "." || identifier == ".." || !IDENTIFIER_RE.is_match(identifier) {
        return Err(format!("invalid identifier {identifier:?}"));
    }
    if source_path.is_empty() {
        return Err("empty source path".to_string());
    }
    if provider.is_empty() {
        return Err("empty provider".to_string());
    }

    let declared_format = match format {
        Some(token) if !token.is_empty() => DeclaredFormat::parse(token),
        _ => DeclaredFormat::from_extension(Path::new(source_path)),
    };

    Ok(Some(DocumentDescriptor::new(
        identifier,
        source_path,
        declared_format,
        provider,
    )))
}
