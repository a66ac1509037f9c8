//! Queue payloads passed between pipeline stages.
//!
//! Both are plain serde structs so they can cross a process boundary as JSON;
//! the in-process pipeline passes them as values.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{DeclaredFormat, DocumentDescriptor, ExtractionResult, UpdateReason};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMessage {
    pub identifier: String,
    pub source_path: PathBuf,
    pub declared_format: DeclaredFormat,
    pub provider: String,
    #[serde(default)]
    pub force_extract: bool,
    /// Set by the check stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_reason: Option<UpdateReason>,
    /// Redeliveries already spent in the current stage.
    #[serde(default)]
    pub attempt: u32,
}

impl StageMessage {
    pub fn new(descriptor: &DocumentDescriptor, force_extract: bool) -> Self {
        Self {
            identifier: descriptor.identifier.clone(),
            source_path: descriptor.source_path.clone(),
            declared_format: descriptor.declared_format.clone(),
            provider: descriptor.provider.clone(),
            force_extract,
            update_reason: None,
            attempt: 0,
        }
    }

    pub fn descriptor(&self) -> DocumentDescriptor {
        DocumentDescriptor {
            identifier: self.identifier.clone(),
            source_path: self.source_path.clone(),
            declared_format: self.declared_format.clone(),
            provider: self.provider.clone(),
        }
    }

    /// Hand the message to the next stage.
    pub fn advance(mut self, update_reason: UpdateReason) -> Self {
        self.update_reason = Some(update_reason);
        self.attempt = 0;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMessage {
    #[serde(flatten)]
    pub message: StageMessage,
    /// Source version observed just before extraction.
    pub source_version: String,
    pub result: ExtractionResult,
}
