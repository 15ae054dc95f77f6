//! Per-build invocation context

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::CoreResult;
use crate::file::ChangedFile;
use crate::logger::{NullRunLogger, RunLogger};
use crate::validation::{validate_positive, validate_required_string, Validatable};

/// Whether a build covers the whole project or only what changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildScope {
    Full,
    Partial,
}

impl BuildScope {
    pub fn is_full(&self) -> bool {
        matches!(self, BuildScope::Full)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, BuildScope::Partial)
    }
}

/// Per-build invocation data handed to every processor call.
///
/// The logger capability is controller-local: it is stripped before the run
/// crosses a worker boundary and reinstalled on the other side as a channel
/// logger bound to the originating request.
#[derive(Clone)]
pub struct Run {
    /// Directory module ids are resolved from. Never blank.
    pub cwd: String,
    /// Number of workers available to this build. Positive.
    pub concurrency: usize,
    pub dev: bool,
    pub debug: bool,
    pub scope: BuildScope,
    /// Ordered change records for partial builds.
    pub changed_files: Vec<ChangedFile>,
    pub logger: Arc<dyn RunLogger>,
}

impl Run {
    pub fn new(cwd: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            concurrency: 1,
            dev: false,
            debug: false,
            scope: BuildScope::Full,
            changed_files: Vec::new(),
            logger: Arc::new(NullRunLogger),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_scope(mut self, scope: BuildScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_changed_files(mut self, changed_files: Vec<ChangedFile>) -> Self {
        self.changed_files = changed_files;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn RunLogger>) -> Self {
        self.logger = logger;
        self
    }
}

impl fmt::Debug for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Run")
            .field("cwd", &self.cwd)
            .field("concurrency", &self.concurrency)
            .field("dev", &self.dev)
            .field("debug", &self.debug)
            .field("scope", &self.scope)
            .field("changed_files", &self.changed_files.len())
            .finish_non_exhaustive()
    }
}

impl Validatable for Run {
    fn validate(&self) -> CoreResult<()> {
        validate_required_string(&self.cwd, "cwd", self.domain_name())?;
        validate_positive(self.concurrency, "concurrency", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::ChangeKind;

    #[test]
    fn test_run_defaults() {
        let run = Run::new("/build");
        assert_eq!(run.cwd, "/build");
        assert_eq!(run.concurrency, 1);
        assert!(!run.dev);
        assert!(!run.debug);
        assert!(run.scope.is_full());
        assert!(run.changed_files.is_empty());
    }

    #[test]
    fn test_run_validation() {
        assert!(Run::new("/build").validate().is_ok());
        assert!(Run::new("  ").validate().is_err());
        assert!(Run::new("/build").with_concurrency(0).validate().is_err());
    }

    #[test]
    fn test_partial_run_carries_changes() {
        let run = Run::new("/build")
            .with_scope(BuildScope::Partial)
            .with_changed_files(vec![ChangedFile::new("a.txt", ChangeKind::Created)]);

        assert!(run.scope.is_partial());
        assert_eq!(run.changed_files.len(), 1);
    }
}
