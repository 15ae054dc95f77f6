//! Detached wire forms of files and run contexts
//!
//! A value never crosses a worker boundary live: it is detached into a
//! snapshot first. Detaching decides, per field, between cloning and
//! transferring ownership — exclusively owned file contents move without a
//! copy and the source is neutered, while shared views are copied and left
//! intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use gristmill_core::{BuildScope, ChangedFile, File, FileContents, FileInfo, Run, RunLogger};

/// A file detached from its owner for a boundary crossing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<u8>>,
}

impl FileSnapshot {
    /// Detach a file for transport.
    ///
    /// Exclusively owned contents are moved into the snapshot, leaving the
    /// source neutered at length 0; shared views are copied and survive.
    pub fn detach(file: &mut File) -> Self {
        Self {
            path: file.path.clone(),
            source: file.source.clone(),
            created_at: file.created_at,
            modified_at: file.modified_at,
            metadata: file.metadata.clone(),
            contents: file.contents.as_mut().map(FileContents::detach),
        }
    }

    /// Detach a processor output for the return trip. Same transfer rule
    /// as [`FileSnapshot::detach`].
    pub fn detach_info(info: &mut FileInfo) -> Self {
        Self {
            path: info.path.clone(),
            source: info.source.clone(),
            created_at: info.created_at,
            modified_at: info.modified_at,
            metadata: info.metadata.clone(),
            contents: info.contents.as_mut().map(FileContents::detach),
        }
    }

    /// Rebuild a file on the receiving side. Contents become owned storage.
    pub fn into_file(self) -> File {
        File {
            path: self.path,
            source: self.source,
            created_at: self.created_at,
            modified_at: self.modified_at,
            metadata: self.metadata,
            contents: self.contents.map(FileContents::Owned),
        }
    }

    /// Rebuild a processor output on the receiving side.
    pub fn into_file_info(self) -> FileInfo {
        FileInfo {
            path: self.path,
            source: self.source,
            created_at: self.created_at,
            modified_at: self.modified_at,
            metadata: self.metadata,
            contents: self.contents.map(FileContents::Owned),
        }
    }
}

/// Run context on the wire: primitive fields and change records, never the
/// logger capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub cwd: String,
    pub concurrency: usize,
    pub dev: bool,
    pub debug: bool,
    pub scope: BuildScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_files: Vec<ChangedFile>,
}

impl RunSnapshot {
    /// Capture a run for transport, stripping the logger capability.
    pub fn capture(run: &Run) -> Self {
        Self {
            cwd: run.cwd.clone(),
            concurrency: run.concurrency,
            dev: run.dev,
            debug: run.debug,
            scope: run.scope,
            changed_files: run.changed_files.clone(),
        }
    }

    /// Rebuild a run on the executor side with a fresh logger capability.
    pub fn materialize(self, logger: Arc<dyn RunLogger>) -> Run {
        Run {
            cwd: self.cwd,
            concurrency: self.concurrency,
            dev: self.dev,
            debug: self.debug,
            scope: self.scope,
            changed_files: self.changed_files,
            logger,
        }
    }
}
