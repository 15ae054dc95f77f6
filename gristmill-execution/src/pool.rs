//! Fixed-size pool of worker threads with round-robin dispatch

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::future;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, info};

use gristmill_core::{
    validate_positive, validate_required_string, CoreResult, File, Run, RunLogger,
    TracingRunLogger, Validatable,
};
use gristmill_ipc::Request;
use gristmill_plugin::ModuleResolver;

use crate::error::{ExecutionError, ExecutionResult};
use crate::worker::{FileStream, WorkerHandle};

/// Configuration for a worker pool.
#[derive(Clone)]
pub struct PoolOptions {
    /// Directory module ids are resolved from. Never blank.
    pub cwd: String,
    /// Number of worker threads. Positive.
    pub concurrency: usize,
    pub dev: bool,
    pub debug: bool,
    /// Logger handed to runs that do not bring their own.
    pub logger: Arc<dyn RunLogger>,
}

impl PoolOptions {
    pub fn new(cwd: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            ..Default::default()
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

    pub fn with_logger(mut self, logger: Arc<dyn RunLogger>) -> Self {
        self.logger = logger;
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            cwd: ".".to_string(),
            concurrency: num_cpus::get(),
            dev: false,
            debug: false,
            logger: Arc::new(TracingRunLogger),
        }
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("cwd", &self.cwd)
            .field("concurrency", &self.concurrency)
            .field("dev", &self.dev)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl Validatable for PoolOptions {
    fn validate(&self) -> CoreResult<()> {
        validate_required_string(&self.cwd, "cwd", self.domain_name())?;
        validate_positive(self.concurrency, "concurrency", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pool"
    }
}

/// A module to import, optionally with factory configuration data.
#[derive(Debug, Clone)]
pub struct ModuleRequest {
    pub module_id: String,
    pub data: Option<JsonValue>,
}

impl ModuleRequest {
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&str> for ModuleRequest {
    fn from(module_id: &str) -> Self {
        Self::new(module_id)
    }
}

impl From<String> for ModuleRequest {
    fn from(module_id: String) -> Self {
        Self::new(module_id)
    }
}

struct PoolInner {
    options: PoolOptions,
    workers: Mutex<Vec<Arc<WorkerHandle>>>,
    cursor: AtomicUsize,
    module_counter: AtomicU64,
    disposed: AtomicBool,
}

impl PoolInner {
    fn ensure_live(&self) -> ExecutionResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ExecutionError::PoolDisposed);
        }
        Ok(())
    }

    fn snapshot_workers(&self) -> Vec<Arc<WorkerHandle>> {
        self.workers.lock().expect("worker list poisoned").clone()
    }

    /// Select the next worker by strict round-robin.
    fn select_worker(&self) -> ExecutionResult<Arc<WorkerHandle>> {
        let workers = self.workers.lock().expect("worker list poisoned");
        if workers.is_empty() {
            return Err(ExecutionError::PoolDisposed);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % workers.len();
        Ok(Arc::clone(&workers[index]))
    }
}

/// Fixed set of worker threads processing files in parallel.
///
/// The pool exclusively owns its workers: `dispose` detaches and terminates
/// them, and every pending request across the pool is rejected with a
/// terminating error.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool with `options.concurrency` workers.
    ///
    /// Worker-level errors that belong to no specific request (unexpected
    /// exits, protocol faults) are forwarded to `error_sink`. Must be
    /// called from within a Tokio runtime; the reply routers live there.
    pub fn new(
        options: PoolOptions,
        resolver: Arc<dyn ModuleResolver>,
        error_sink: mpsc::UnboundedSender<ExecutionError>,
    ) -> ExecutionResult<Self> {
        options.validate()?;
        info!(
            concurrency = options.concurrency,
            cwd = %options.cwd,
            "Starting worker pool"
        );

        let mut workers = Vec::with_capacity(options.concurrency);
        for worker_id in 0..options.concurrency {
            let worker =
                WorkerHandle::spawn(worker_id, Arc::clone(&resolver), error_sink.clone())?;
            workers.push(Arc::new(worker));
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                options,
                workers: Mutex::new(workers),
                cursor: AtomicUsize::new(0),
                module_counter: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Number of live workers. Zero after dispose.
    pub fn size(&self) -> usize {
        self.inner.workers.lock().expect("worker list poisoned").len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Import a processor module into every worker and return its proxy.
    ///
    /// All workers are expected to report the same processor name; the
    /// first worker's reply names the proxy.
    pub async fn import_file_processor(
        &self,
        module: impl Into<ModuleRequest>,
    ) -> ExecutionResult<ProcessorProxy> {
        let module = module.into();
        self.inner.ensure_live()?;
        let module_uid = self.inner.module_counter.fetch_add(1, Ordering::SeqCst) + 1;

        let workers = self.inner.snapshot_workers();
        let imports = workers.iter().map(|worker| {
            let request = Request::ImportFileProcessor {
                module_uid,
                module_id: module.module_id.clone(),
                cwd: self.inner.options.cwd.clone(),
                data: module.data.clone(),
            };
            let worker = Arc::clone(worker);
            async move { worker.import_file_processor(request).await }
        });
        let names = future::try_join_all(imports).await?;

        let name = names.into_iter().next().unwrap_or_default();
        debug!(
            module_uid,
            module_id = %module.module_id,
            name = %name,
            "File processor imported on all workers"
        );
        Ok(ProcessorProxy {
            name,
            module_uid,
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Import a module on every worker for its side effects.
    pub async fn import_module(&self, module: impl Into<ModuleRequest>) -> ExecutionResult<()> {
        let module = module.into();
        self.inner.ensure_live()?;

        let workers = self.inner.snapshot_workers();
        let imports = workers.iter().map(|worker| {
            let request = Request::ImportModule {
                module_id: module.module_id.clone(),
                cwd: self.inner.options.cwd.clone(),
                data: module.data.clone(),
            };
            let worker = Arc::clone(worker);
            async move { worker.import_module(request).await }
        });
        future::try_join_all(imports).await?;

        debug!(module_id = %module.module_id, "Module imported on all workers");
        Ok(())
    }

    /// Terminate all workers in parallel and release them. Idempotent.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let workers: Vec<Arc<WorkerHandle>> = {
            let mut guard = self.inner.workers.lock().expect("worker list poisoned");
            guard.drain(..).collect()
        };
        info!(workers = workers.len(), "Disposing worker pool");
        future::join_all(workers.iter().map(|worker| worker.terminate())).await;
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Named proxy for a processor registered across all workers.
///
/// Each call selects a worker by strict round-robin and delegates to it.
/// Calls made after the pool is disposed fail with `PoolDisposed`; a
/// failing call is never retried on another worker, because plugin code may
/// have side effects.
#[derive(Clone)]
pub struct ProcessorProxy {
    name: String,
    module_uid: u64,
    pool: Weak<PoolInner>,
}

impl ProcessorProxy {
    /// The processor's declarative name, as reported by the first worker.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool-scoped uid naming this processor inside every worker.
    pub fn module_uid(&self) -> u64 {
        self.module_uid
    }

    /// Process one file on the next worker in round-robin order.
    pub async fn process(&self, file: &mut File, run: &Run) -> ExecutionResult<FileStream> {
        let pool = self.pool.upgrade().ok_or(ExecutionError::PoolDisposed)?;
        pool.ensure_live()?;
        let worker = pool.select_worker()?;
        worker.process_file(self.module_uid, file, run).await
    }
}

impl fmt::Debug for ProcessorProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorProxy")
            .field("name", &self.name)
            .field("module_uid", &self.module_uid)
            .finish()
    }
}
