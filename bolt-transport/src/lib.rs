//! # bolt-transport
//!
//! Tokio glue for the Bolt RPC protocol: a [`FramedReader`] and a
//! [`FramedWriter`] over any async byte stream, YAML and environment
//! configuration, and the logging bootstrap.

pub mod config;
pub mod error;
pub mod logging;
pub mod reader;
pub mod writer;

pub use config::{Config, ConfigError};
pub use error::TransportError;
pub use reader::FramedReader;
pub use writer::FramedWriter;
