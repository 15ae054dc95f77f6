//! Worker-side runtime: dispatches requests to imported processors
//!
//! Each worker thread drives a current-thread Tokio runtime over its
//! request channel. Requests are handled in arrival order; the replies for
//! one request are posted in order. When the request channel closes the
//! loop exits and in-flight state is dropped without cleanup.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use gristmill_core::{FileInfo, LogLevel, LogMessage, RunLogger};
use gristmill_ipc::{
    ExecutorEndpoint, FileSnapshot, MessageId, Reply, ReplyEnvelope, Request, RequestEnvelope,
    RunSnapshot,
};
use gristmill_plugin::{
    import, FileProcessor, ModuleExport, ModuleResolver, PluginError, ProcessorOutput,
};

use crate::error::{ExecutionError, ExecutionResult};

/// Thread main for one worker executor.
pub(crate) fn run_executor(
    worker_id: usize,
    endpoint: ExecutorEndpoint,
    resolver: Arc<dyn ModuleResolver>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            warn!(worker_id, %error, "Failed to build worker runtime");
            return;
        }
    };

    let ExecutorEndpoint {
        mut requests,
        replies,
    } = endpoint;

    runtime.block_on(async move {
        let mut executor = Executor {
            worker_id,
            replies,
            resolver,
            processors: HashMap::new(),
        };
        executor.announce_online();
        while let Some(envelope) = requests.recv().await {
            executor.dispatch(envelope).await;
        }
        debug!(worker_id, "Request channel closed, executor exiting");
    });
}

struct Executor {
    worker_id: usize,
    replies: mpsc::UnboundedSender<ReplyEnvelope>,
    resolver: Arc<dyn ModuleResolver>,
    processors: HashMap<u64, Arc<dyn FileProcessor>>,
}

impl Executor {
    fn announce_online(&self) {
        debug!(worker_id = self.worker_id, "Worker executor online");
        self.post(None, Reply::Online);
    }

    fn post(&self, to: Option<MessageId>, reply: Reply) {
        if self.replies.send(ReplyEnvelope { to, reply }).is_err() {
            debug!(worker_id = self.worker_id, "Controller gone, reply dropped");
        }
    }

    fn post_error(&self, to: MessageId, error: &ExecutionError) {
        warn!(
            worker_id = self.worker_id,
            message_id = to,
            %error,
            "Request failed"
        );
        self.post(
            Some(to),
            Reply::Error {
                error: error.to_record(self.worker_id),
            },
        );
    }

    async fn dispatch(&mut self, envelope: RequestEnvelope) {
        let id = envelope.id;
        match envelope.request {
            Request::ImportFileProcessor {
                module_uid,
                module_id,
                cwd,
                data,
            } => match self
                .import_file_processor(module_uid, &module_id, &cwd, data)
                .await
            {
                Ok(name) => self.post(Some(id), Reply::FileProcessorImported { name }),
                Err(error) => self.post_error(id, &error),
            },
            Request::ImportModule {
                module_id,
                cwd,
                data,
            } => match self.import_module(&module_id, &cwd, data).await {
                Ok(()) => self.post(Some(id), Reply::Finished),
                Err(error) => self.post_error(id, &error),
            },
            Request::ProcessFile {
                module_uid,
                file,
                run,
            } => {
                if let Err(error) = self.process_file(id, module_uid, file, run).await {
                    self.post_error(id, &error);
                }
            }
        }
    }

    async fn import_file_processor(
        &mut self,
        module_uid: u64,
        module_id: &str,
        cwd: &str,
        data: Option<JsonValue>,
    ) -> ExecutionResult<String> {
        let export = import(self.resolver.as_ref(), module_id, cwd).await?;
        let processor = match export {
            ModuleExport::Processor(processor) => {
                if data.is_some() {
                    return Err(PluginError::invalid_processor(format!(
                        "Module '{}' does not take configuration data",
                        module_id
                    ))
                    .into());
                }
                processor
            }
            ModuleExport::Factory(factory) => {
                factory.create(data.unwrap_or(JsonValue::Null)).await?
            }
            ModuleExport::Value(value) => {
                return Err(
                    PluginError::invalid_processor(format!("The module exported {}", value))
                        .into(),
                );
            }
        };

        let name = processor.name().to_string();
        self.processors.insert(module_uid, processor);
        debug!(
            worker_id = self.worker_id,
            module_uid,
            module_id,
            name = %name,
            "File processor imported"
        );
        Ok(name)
    }

    async fn import_module(
        &mut self,
        module_id: &str,
        cwd: &str,
        data: Option<JsonValue>,
    ) -> ExecutionResult<()> {
        let export = import(self.resolver.as_ref(), module_id, cwd).await?;
        // Only callable exports are invoked; loading a plain module is a
        // side effect in itself.
        if let ModuleExport::Factory(factory) = export {
            factory.create(data.unwrap_or(JsonValue::Null)).await?;
        }
        debug!(worker_id = self.worker_id, module_id, "Module imported");
        Ok(())
    }

    async fn process_file(
        &mut self,
        id: MessageId,
        module_uid: u64,
        file: FileSnapshot,
        run: RunSnapshot,
    ) -> ExecutionResult<()> {
        let processor = self.processors.get(&module_uid).cloned().ok_or_else(|| {
            PluginError::invalid_processor(format!(
                "No file processor registered for module uid {}",
                module_uid
            ))
        })?;

        // The run's logger is rebuilt here, bound to this request's id, so
        // log records land back at the exact originating call.
        let logger: Arc<dyn RunLogger> = Arc::new(ChannelRunLogger {
            replies: self.replies.clone(),
            to: id,
            debug: run.debug,
        });
        let run = run.materialize(logger);
        let file = file.into_file();

        let output = processor.process(file, run).await?;
        self.forward_outputs(id, output).await?;
        self.post(Some(id), Reply::Finished);
        Ok(())
    }

    async fn forward_outputs(&self, id: MessageId, output: ProcessorOutput) -> ExecutionResult<()> {
        match output {
            ProcessorOutput::None => {}
            ProcessorOutput::Single(info) => self.forward_file(id, info)?,
            ProcessorOutput::Many(infos) => {
                for info in infos {
                    self.forward_file(id, info)?;
                }
            }
            ProcessorOutput::Stream(mut stream) => {
                while let Some(item) = stream.next().await {
                    self.forward_file(id, item?)?;
                }
            }
        }
        Ok(())
    }

    fn forward_file(&self, id: MessageId, mut info: FileInfo) -> ExecutionResult<()> {
        info.validate()?;
        let file = FileSnapshot::detach_info(&mut info);
        self.post(Some(id), Reply::File { file });
        Ok(())
    }
}

/// Run logger that tunnels records back to the originating request.
struct ChannelRunLogger {
    replies: mpsc::UnboundedSender<ReplyEnvelope>,
    to: MessageId,
    debug: bool,
}

impl RunLogger for ChannelRunLogger {
    fn log(&self, level: LogLevel, message: LogMessage, data: Option<JsonValue>) {
        if level == LogLevel::Debug && !self.debug {
            return;
        }
        let _ = self.replies.send(ReplyEnvelope {
            to: Some(self.to),
            reply: Reply::Log {
                level,
                message,
                data,
            },
        });
    }
}
