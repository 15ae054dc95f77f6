//! File objects moved through the pool

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, CoreResult};

/// Contents of a file.
///
/// The variant records how the storage is held, which decides how the bytes
/// cross a worker boundary: `Owned` buffers move by ownership handoff, while
/// `Shared` views are copied and the backing storage is left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContents {
    /// Exclusively owned storage, eligible for zero-copy transfer.
    Owned(Vec<u8>),
    /// A view of shared (possibly sliced) storage. Copied on transport.
    Shared(Bytes),
}

impl FileContents {
    /// Length of the contents in bytes.
    pub fn len(&self) -> usize {
        match self {
            FileContents::Owned(buf) => buf.len(),
            FileContents::Shared(bytes) => bytes.len(),
        }
    }

    /// Whether the contents are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View the contents as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            FileContents::Owned(buf) => buf.as_slice(),
            FileContents::Shared(bytes) => bytes.as_ref(),
        }
    }

    /// Detach the bytes for a boundary crossing.
    ///
    /// `Owned` storage is moved out and this value is left empty (length 0).
    /// `Shared` views are copied; the view and its backing buffer survive
    /// intact, and the receiver's copy is independent of them.
    pub fn detach(&mut self) -> Vec<u8> {
        match self {
            FileContents::Owned(buf) => std::mem::take(buf),
            FileContents::Shared(bytes) => bytes.to_vec(),
        }
    }
}

impl From<Vec<u8>> for FileContents {
    fn from(buf: Vec<u8>) -> Self {
        FileContents::Owned(buf)
    }
}

impl From<Bytes> for FileContents {
    fn from(bytes: Bytes) -> Self {
        FileContents::Shared(bytes)
    }
}

impl From<&str> for FileContents {
    fn from(text: &str) -> Self {
        FileContents::Owned(text.as_bytes().to_vec())
    }
}

/// An addressable content unit flowing through the build.
///
/// Files are immutable-by-convention across the worker boundary: a worker
/// always receives a detached copy and mutations never reach back except
/// through the files it yields.
#[derive(Debug, Clone, Default)]
pub struct File {
    /// Build-relative path naming the file.
    pub path: String,
    /// Where the file came from, if it has an external origin.
    pub source: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    /// Recursively clonable metadata attached by processors.
    pub metadata: Option<JsonValue>,
    pub contents: Option<FileContents>,
}

impl File {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_contents(mut self, contents: impl Into<FileContents>) -> Self {
        self.contents = Some(contents.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// The file-shaped value a processor yields.
///
/// Only `path` is required; everything else is optional and normalized on
/// the controller side.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    pub path: String,
    pub source: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub metadata: Option<JsonValue>,
    pub contents: Option<FileContents>,
}

impl FileInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_contents(mut self, contents: impl Into<FileContents>) -> Self {
        self.contents = Some(contents.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Validate that this output names a usable file.
    ///
    /// A blank path means the processor produced something that is not a
    /// file; the error message carries a rendering of the offending value.
    pub fn validate(&self) -> CoreResult<()> {
        if self.path.trim().is_empty() {
            return Err(CoreError::InvalidFile(format!("{:?}", self.path)));
        }
        Ok(())
    }
}

impl From<File> for FileInfo {
    fn from(file: File) -> Self {
        Self {
            path: file.path,
            source: file.source,
            created_at: file.created_at,
            modified_at: file.modified_at,
            metadata: file.metadata,
            contents: file.contents,
        }
    }
}

impl From<FileInfo> for File {
    fn from(info: FileInfo) -> Self {
        Self {
            path: info.path,
            source: info.source,
            created_at: info.created_at,
            modified_at: info.modified_at,
            metadata: info.metadata,
            contents: info.contents,
        }
    }
}

/// How a file changed since the previous build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// A file-shaped change record handed to partial builds.
///
/// Change records never carry contents; they describe what happened to a
/// path, not what is in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub source: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub metadata: Option<JsonValue>,
    pub change: ChangeKind,
}

impl ChangedFile {
    pub fn new(path: impl Into<String>, change: ChangeKind) -> Self {
        Self {
            path: path.into(),
            source: None,
            created_at: None,
            modified_at: None,
            metadata: None,
            change,
        }
    }
}
