//! Controller-side handle for one worker thread
//!
//! A handle spawns its executor thread, owns the message channel to it, and
//! gates every request on the executor's readiness notification. Worker
//! exits that were not requested reject all pending requests with an
//! unexpected-exit error and are reported to the pool's error sink.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use gristmill_core::{File, FileInfo, Run, RunLogger};
use gristmill_ipc::{
    ChannelEvent, FileSnapshot, IpcError, MessageChannel, Reply, ReplyStream, Request, RunSnapshot,
};
use gristmill_plugin::ModuleResolver;

use crate::error::{ExecutionError, ExecutionResult};
use crate::executor::run_executor;

/// Exit code reported for an orderly thread join.
const EXIT_OK: i32 = 0;
/// Exit code reported when the worker thread died panicking.
const EXIT_PANIC: i32 = 101;

/// Lifecycle of a worker, as observed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Online,
    /// Terminated; carries the exit code when the exit was unexpected.
    Terminated(Option<i32>),
}

type ThreadSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Controller-side proxy for one worker executor thread.
pub struct WorkerHandle {
    worker_id: usize,
    channel: MessageChannel,
    state: Arc<watch::Sender<WorkerState>>,
    state_rx: watch::Receiver<WorkerState>,
    terminating: Arc<AtomicBool>,
    thread: ThreadSlot,
}

impl WorkerHandle {
    /// Spawn the executor thread and its lifecycle monitor.
    pub(crate) fn spawn(
        worker_id: usize,
        resolver: Arc<dyn ModuleResolver>,
        errors: mpsc::UnboundedSender<ExecutionError>,
    ) -> ExecutionResult<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (channel, endpoint) = MessageChannel::new(event_tx);
        let (state_tx, state_rx) = watch::channel(WorkerState::Starting);
        let state = Arc::new(state_tx);

        let thread = std::thread::Builder::new()
            .name(format!("gristmill-worker-{}", worker_id))
            .spawn(move || run_executor(worker_id, endpoint, resolver))
            .map_err(|error| {
                ExecutionError::Worker(format!("Failed to spawn worker thread: {}", error))
            })?;
        let thread: ThreadSlot = Arc::new(Mutex::new(Some(thread)));

        let terminating = Arc::new(AtomicBool::new(false));
        tokio::spawn(monitor_lifecycle(
            worker_id,
            event_rx,
            Arc::clone(&state),
            channel.clone(),
            Arc::clone(&terminating),
            Arc::clone(&thread),
            errors,
        ));

        Ok(Self {
            worker_id,
            channel,
            state,
            state_rx,
            terminating,
            thread,
        })
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn is_terminated(&self) -> bool {
        matches!(*self.state_rx.borrow(), WorkerState::Terminated(_))
    }

    /// Wait until the executor is online. Fails if it terminated first.
    async fn await_online(&self) -> ExecutionResult<()> {
        let mut state = self.state_rx.clone();
        loop {
            let current = *state.borrow_and_update();
            match current {
                WorkerState::Online => return Ok(()),
                WorkerState::Terminated(Some(code)) => {
                    return Err(IpcError::UnexpectedExit {
                        worker_id: self.worker_id,
                        code,
                    }
                    .into())
                }
                WorkerState::Terminated(None) => return Err(IpcError::Terminating.into()),
                WorkerState::Starting => {}
            }
            if state.changed().await.is_err() {
                return Err(IpcError::Terminating.into());
            }
        }
    }

    /// Register a processor module on this worker and return its name.
    pub async fn import_file_processor(&self, request: Request) -> ExecutionResult<String> {
        self.await_online().await?;
        match self.channel.send_await(request).await? {
            Reply::FileProcessorImported { name } => Ok(name),
            Reply::Error { error } => Err(ExecutionError::from_record(error)),
            other => Err(ExecutionError::Worker(format!(
                "Unexpected reply to processor import: {:?}",
                other
            ))),
        }
    }

    /// Import a module for its side effects on this worker.
    pub async fn import_module(&self, request: Request) -> ExecutionResult<()> {
        self.await_online().await?;
        match self.channel.send_await(request).await? {
            Reply::Finished => Ok(()),
            Reply::Error { error } => Err(ExecutionError::from_record(error)),
            other => Err(ExecutionError::Worker(format!(
                "Unexpected reply to module import: {:?}",
                other
            ))),
        }
    }

    /// Run a registered processor over one file.
    ///
    /// The file is detached at the send: exclusively owned contents move to
    /// the worker and the caller's buffer is left neutered, while shared
    /// views are copied. Output files are yielded in production order; log
    /// records are dispatched into the run's logger as they arrive.
    pub async fn process_file(
        &self,
        module_uid: u64,
        file: &mut File,
        run: &Run,
    ) -> ExecutionResult<FileStream> {
        self.await_online().await?;
        let request = Request::ProcessFile {
            module_uid,
            file: FileSnapshot::detach(file),
            run: RunSnapshot::capture(run),
        };
        let replies = self.channel.send_stream(request)?;
        Ok(FileStream::new(replies, Arc::clone(&run.logger)))
    }

    /// Terminate the worker and return its exit code. Idempotent: repeated
    /// calls return 0 without doing anything.
    pub async fn terminate(&self) -> i32 {
        if self.terminating.swap(true, Ordering::SeqCst) {
            return EXIT_OK;
        }

        debug!(worker_id = self.worker_id, "Terminating worker");
        self.state.send_if_modified(|state| {
            if matches!(state, WorkerState::Terminated(_)) {
                false
            } else {
                *state = WorkerState::Terminated(None);
                true
            }
        });
        self.channel.reject_all_pending(IpcError::Terminating);
        self.channel.close();

        let code = join_exit_code(&self.thread).await;
        debug!(worker_id = self.worker_id, code, "Worker terminated");
        code
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Dropping the handle ends the worker; the monitor must not read
        // this closure as a crash.
        self.terminating.store(true, Ordering::SeqCst);
        self.channel.close();
    }
}

async fn monitor_lifecycle(
    worker_id: usize,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    state: Arc<watch::Sender<WorkerState>>,
    channel: MessageChannel,
    terminating: Arc<AtomicBool>,
    thread: ThreadSlot,
    errors: mpsc::UnboundedSender<ExecutionError>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Online => {
                debug!(worker_id, "Worker online");
                state.send_if_modified(|current| {
                    if matches!(current, WorkerState::Starting) {
                        *current = WorkerState::Online;
                        true
                    } else {
                        false
                    }
                });
            }
            ChannelEvent::Protocol(error) => {
                warn!(worker_id, %error, "Protocol error on worker channel");
                let _ = errors.send(ExecutionError::Ipc(error));
            }
            ChannelEvent::Closed => {
                if terminating.load(Ordering::SeqCst) {
                    debug!(worker_id, "Worker channel closed during termination");
                } else {
                    let code = join_exit_code(&thread).await;
                    let error = IpcError::UnexpectedExit { worker_id, code };
                    warn!(worker_id, code, "Worker exited unexpectedly");
                    state.send_replace(WorkerState::Terminated(Some(code)));
                    channel.reject_all_pending(error.clone());
                    channel.close();
                    let _ = errors.send(ExecutionError::Ipc(error));
                }
                break;
            }
        }
    }
}

/// Join the worker thread off the async runtime and map the result to an
/// exit code.
async fn join_exit_code(slot: &ThreadSlot) -> i32 {
    let handle = slot.lock().expect("worker thread slot poisoned").take();
    match handle {
        Some(handle) => tokio::task::spawn_blocking(move || match handle.join() {
            Ok(()) => EXIT_OK,
            Err(_) => EXIT_PANIC,
        })
        .await
        .unwrap_or(EXIT_PANIC),
        None => EXIT_OK,
    }
}

struct StreamState {
    replies: ReplyStream,
    logger: Arc<dyn RunLogger>,
    done: bool,
}

/// Lazy sequence of output files produced by one `process_file` call.
///
/// Ends after the worker's terminal reply; an error reply (or a forced
/// rejection) is yielded as the final item.
pub struct FileStream {
    inner: BoxStream<'static, ExecutionResult<FileInfo>>,
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream").finish_non_exhaustive()
    }
}

impl FileStream {
    fn new(replies: ReplyStream, logger: Arc<dyn RunLogger>) -> Self {
        let state = StreamState {
            replies,
            logger,
            done: false,
        };
        let inner = stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                match state.replies.recv().await {
                    Some(Ok(Reply::Log {
                        level,
                        message,
                        data,
                    })) => {
                        state.logger.log(level, message, data);
                    }
                    Some(Ok(Reply::File { file })) => {
                        return Some((Ok(file.into_file_info()), state));
                    }
                    Some(Ok(Reply::Finished)) | None => {
                        state.done = true;
                        return None;
                    }
                    Some(Ok(Reply::Error { error })) => {
                        state.done = true;
                        return Some((Err(ExecutionError::from_record(error)), state));
                    }
                    Some(Ok(other)) => {
                        state.done = true;
                        return Some((
                            Err(ExecutionError::Worker(format!(
                                "Unexpected reply in file stream: {:?}",
                                other
                            ))),
                            state,
                        ));
                    }
                    Some(Err(error)) => {
                        state.done = true;
                        return Some((Err(error.into()), state));
                    }
                }
            }
        })
        .boxed();
        Self { inner }
    }

    /// Next output file, or `None` at the end of the stream.
    pub async fn next(&mut self) -> Option<ExecutionResult<FileInfo>> {
        self.inner.next().await
    }

    /// Drain the stream, collecting every output file.
    pub async fn collect_files(mut self) -> ExecutionResult<Vec<FileInfo>> {
        let mut files = Vec::new();
        while let Some(item) = self.next().await {
            files.push(item?);
        }
        Ok(files)
    }
}

impl Stream for FileStream {
    type Item = ExecutionResult<FileInfo>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
