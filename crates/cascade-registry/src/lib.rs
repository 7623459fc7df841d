//! Cascade Registry
//!
//! The capability contract between the execution engine and node
//! implementations. A node handler is an opaque implementation of
//! [`NodeHandler`]: it receives resolved inputs and parameters, runs
//! under a cancellation token, reports progress, and returns an
//! execution result. The engine neither knows nor cares whether the
//! handler shells out to FFmpeg, calls a hosted model, or runs locally.
//!
//! [`NodeRegistry`] maps node-type tags to a handler plus its
//! [`NodeTypeDef`] (declared ports and parameters). An unknown tag at
//! dispatch time is a programming error, not a runtime condition.

mod definition;
mod handler;
mod registry;

pub use definition::{DataType, NodeTypeDef, ParamDef, PortDef};
pub use handler::{
  HandlerContext, HandlerResult, HandlerStatus, NodeHandler, ProgressFn, Validation,
};
pub use registry::{NodeRegistry, RegisteredNodeType};

/// Errors a handler can surface to the engine.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
  /// The handler observed the cancellation signal and stopped. The
  /// engine treats this differently from a failure: the node keeps the
  /// idle status that cancellation already emitted.
  #[error("execution aborted")]
  Aborted,

  /// The handler failed with a message.
  #[error("{0}")]
  Failed(String),
}
