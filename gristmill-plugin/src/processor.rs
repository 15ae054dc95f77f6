//! Processor and factory contracts

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use gristmill_core::{File, FileInfo, Run};

use crate::error::PluginResult;

/// A plugin function that transforms one file into zero or more outputs.
///
/// Processors run inside worker executors. The file they receive is a
/// detached copy; anything they want to publish goes into the outputs.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    /// Declarative name reported when the processor is imported.
    fn name(&self) -> &str {
        ""
    }

    /// Transform `file` within `run`.
    async fn process(&self, file: File, run: Run) -> PluginResult<ProcessorOutput>;
}

/// What a processor produced for one input file.
pub enum ProcessorOutput {
    /// No outputs.
    None,
    /// A single output file.
    Single(FileInfo),
    /// A batch of output files, forwarded in order.
    Many(Vec<FileInfo>),
    /// Outputs produced lazily; each is forwarded as it arrives.
    Stream(BoxStream<'static, PluginResult<FileInfo>>),
}

impl fmt::Debug for ProcessorOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorOutput::None => write!(f, "None"),
            ProcessorOutput::Single(info) => f.debug_tuple("Single").field(&info.path).finish(),
            ProcessorOutput::Many(infos) => f.debug_tuple("Many").field(&infos.len()).finish(),
            ProcessorOutput::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

impl From<FileInfo> for ProcessorOutput {
    fn from(info: FileInfo) -> Self {
        ProcessorOutput::Single(info)
    }
}

impl From<Vec<FileInfo>> for ProcessorOutput {
    fn from(infos: Vec<FileInfo>) -> Self {
        ProcessorOutput::Many(infos)
    }
}

impl From<Option<FileInfo>> for ProcessorOutput {
    fn from(info: Option<FileInfo>) -> Self {
        match info {
            Some(info) => ProcessorOutput::Single(info),
            None => ProcessorOutput::None,
        }
    }
}

/// Builds a processor from configuration data at import time.
#[async_trait]
pub trait ProcessorFactory: Send + Sync {
    async fn create(&self, data: JsonValue) -> PluginResult<Arc<dyn FileProcessor>>;
}

/// The default export of a plugin module.
pub enum ModuleExport {
    /// A ready-to-use processor.
    Processor(Arc<dyn FileProcessor>),
    /// A factory invoked with the import-time data.
    Factory(Arc<dyn ProcessorFactory>),
    /// A plain value; cannot act as a processor.
    Value(JsonValue),
}

impl fmt::Debug for ModuleExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleExport::Processor(processor) => {
                f.debug_tuple("Processor").field(&processor.name()).finish()
            }
            ModuleExport::Factory(_) => write!(f, "Factory(..)"),
            ModuleExport::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

struct FnProcessor<F> {
    name: String,
    process: F,
}

#[async_trait]
impl<F, Fut> FileProcessor for FnProcessor<F>
where
    F: Fn(File, Run) -> Fut + Send + Sync,
    Fut: Future<Output = PluginResult<ProcessorOutput>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, file: File, run: Run) -> PluginResult<ProcessorOutput> {
        (self.process)(file, run).await
    }
}

/// Wrap an async closure as a named processor.
pub fn processor_fn<F, Fut>(name: impl Into<String>, process: F) -> Arc<dyn FileProcessor>
where
    F: Fn(File, Run) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult<ProcessorOutput>> + Send + 'static,
{
    Arc::new(FnProcessor {
        name: name.into(),
        process,
    })
}

struct FnFactory<F> {
    create: F,
}

#[async_trait]
impl<F, Fut> ProcessorFactory for FnFactory<F>
where
    F: Fn(JsonValue) -> Fut + Send + Sync,
    Fut: Future<Output = PluginResult<Arc<dyn FileProcessor>>> + Send + 'static,
{
    async fn create(&self, data: JsonValue) -> PluginResult<Arc<dyn FileProcessor>> {
        (self.create)(data).await
    }
}

/// Wrap an async closure as a processor factory.
pub fn factory_fn<F, Fut>(create: F) -> Arc<dyn ProcessorFactory>
where
    F: Fn(JsonValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PluginResult<Arc<dyn FileProcessor>>> + Send + 'static,
{
    Arc::new(FnFactory { create })
}
