//! # bolt-hessian
//!
//! Hessian 1.0 / 2.0 object graph serialization for the Bolt RPC protocol.
//!
//! This crate provides:
//! - A dynamic [`Value`] graph with `Arc` identity for reference sharing
//! - Declarative [`TypeDescriptor`]s and a [`SchemaRegistry`] of class layouts
//! - A [`SchemaCompiler`] that turns descriptors into cached encode procedures
//! - Wire-level [`HessianWriter`] / [`HessianReader`] for both versions

pub mod compiler;
pub mod descriptor;
pub mod error;
pub mod reader;
pub mod registry;
pub mod value;
pub mod writer;

pub use compiler::{CompiledProcedure, SchemaCompiler};
pub use descriptor::{TypeDescriptor, Version};
pub use error::HessianError;
pub use reader::HessianReader;
pub use registry::{ClassSchema, FieldSchema, SchemaRegistry};
pub use value::{List, Map, Object, Typed, Value};
pub use writer::HessianWriter;

use bytes::{Bytes, BytesMut};
use std::sync::Arc;

/// Shared handle to a compiler and its registry.
///
/// Cloning is cheap; all clones share one compile cache.
#[derive(Clone)]
pub struct HessianCodec {
    compiler: Arc<SchemaCompiler>,
}

impl HessianCodec {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self::with_compiler(Arc::new(SchemaCompiler::new(registry)))
    }

    pub fn with_compiler(compiler: Arc<SchemaCompiler>) -> Self {
        Self { compiler }
    }

    pub fn compiler(&self) -> &Arc<SchemaCompiler> {
        &self.compiler
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        self.compiler.registry()
    }

    /// Starts a serialization call appending to `buf`. Values written
    /// through the same writer share reference and class tables.
    pub fn writer<'a>(&'a self, buf: &'a mut BytesMut, version: Version) -> HessianWriter<'a> {
        HessianWriter::new(buf, version, &self.compiler)
    }

    pub fn reader<'a>(&self, bytes: &'a [u8], version: Version) -> HessianReader<'a> {
        HessianReader::new(bytes, version)
    }

    /// Encodes a single value, typed by `descriptor` when given.
    pub fn encode(
        &self,
        value: &Value,
        descriptor: Option<&TypeDescriptor>,
        version: Version,
    ) -> Result<Bytes, HessianError> {
        let mut buf = BytesMut::new();
        let mut writer = self.writer(&mut buf, version);
        match descriptor {
            Some(desc) => writer.write_with(desc, value)?,
            None => writer.write_value(value)?,
        }
        Ok(buf.freeze())
    }

    /// Decodes a single value.
    pub fn decode(&self, bytes: &[u8], version: Version) -> Result<Value, HessianError> {
        self.reader(bytes, version).read_value()
    }
}

impl Default for HessianCodec {
    fn default() -> Self {
        Self::new(Arc::new(SchemaRegistry::with_builtins()))
    }
}

impl std::fmt::Debug for HessianCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HessianCodec")
            .field("classes", &self.registry().len())
            .field("cached", &self.compiler.cached())
            .finish()
    }
}
