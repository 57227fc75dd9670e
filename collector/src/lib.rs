//! Activity-log collection and fan-out.
//!
//! Many in-process activity monitors emit entries concurrently; a single
//! [`GrandOutput`] funnels them through a bounded channel into one consumer
//! task that delivers every entry, in order, to a dynamically-configured set
//! of handlers. Handlers are isolated from each other and from producers: a
//! failing handler is evicted with a diagnostic, and nothing that happens
//! below the handler boundary ever propagates back into the application.
//!
//! The crate provides:
//!
//! - [`GrandOutput`]: the pump owner — producer entry points, hot
//!   reconfiguration, lifecycle and the per-monitor client bindings.
//! - [`Handler`]: the contract every sink implements, plus the explicit
//!   [`HandlerRegistry`] mapping configurations to instances.
//! - [`BufferingSink`]: a template for handlers whose transport can be
//!   transiently unavailable.
//! - [`BinaryFileHandler`]: the built-in handler persisting the stream
//!   format.

pub mod buffering;
pub mod client;
pub mod config;
mod dispatcher;
pub mod error;
pub mod grand_output;
pub mod handler;
pub mod handlers;
pub mod registry;

pub use buffering::{BufferingSink, BufferingSinkConfig, Sender, SenderProvider};
pub use client::GrandOutputClient;
pub use config::{HandlerConfig, SinkConfig};
pub use error::SinkError;
pub use grand_output::{DisposingToken, GrandOutput, SinkState, EXTERNAL_MONITOR_ID};
pub use handler::{Handler, HandlerError, SinkContext};
pub use handlers::binary_file::{BinaryFileHandler, BinaryFileHandlerConfig};
pub use registry::HandlerRegistry;
