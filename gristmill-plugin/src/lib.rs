//! Processor contracts and module resolution for Gristmill plugins
//!
//! A plugin module exports either a ready-to-use [`FileProcessor`], a
//! [`ProcessorFactory`] invoked with import-time data, or a plain value.
//! Module ids are turned into exports by a [`ModuleResolver`]; resolvers
//! can be composed so an in-process registry is consulted before dynamic
//! libraries are searched.

pub mod error;
pub mod processor;
pub mod resolver;

// Re-export commonly used types
pub use error::{PluginError, PluginResult};
pub use processor::{
    factory_fn, processor_fn, FileProcessor, ModuleExport, ProcessorFactory, ProcessorOutput,
};
pub use resolver::{
    import, CompositeResolver, LibraryResolver, ModuleConstructor, ModuleEntry, ModuleResolver,
    StaticModuleResolver,
};
