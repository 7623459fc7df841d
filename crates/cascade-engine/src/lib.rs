//! Cascade Engine
//!
//! The execution subsystem of Cascade: given a workflow's DAG, it runs
//! node handlers in topological level batches with bounded concurrency,
//! reuses prior results through a content-addressed cache, tracks spend,
//! bounds user retries with a circuit breaker, and streams status to
//! subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ExecutionEngine                         │
//! │  - run_all / run_node / continue_from / retry / cancel      │
//! │  - level batches, failure propagation, cancellation         │
//! └─────────────────────────────────────────────────────────────┘
//!        │               │                │              │
//!        ▼               ▼                ▼              ▼
//!   ResultCache      CostGuard      CircuitBreaker   StatusNotifier
//!   (store lookup)   (spend/limits) (retry counts)   (fan-out events)
//!        │
//!        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      NodeRegistry                           │
//! │  - handler.execute(ctx) under a CancellationToken           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inputs are assembled by the resolver ([`resolve_inputs`]) from
//! upstream nodes' current outputs; cache keys are canonical content
//! hashes ([`hash_map`]) of the resolved inputs and the node's params.

mod breaker;
mod cache;
mod cost;
mod engine;
mod error;
mod events;
mod hash;
mod input;

pub use breaker::{CircuitBreaker, RETRY_THRESHOLD};
pub use cache::ResultCache;
pub use cost::{CostEstimate, CostEstimateItem, CostGuard, today};
pub use engine::{
  EngineConfig, ExecutionEngine, MAX_PARALLEL_EXECUTIONS, RunReport, SKIPPED_UPSTREAM_FAILED,
};
pub use error::EngineError;
pub use events::{
  BroadcastNotifier, EdgeStatus, EngineEvent, NodeStatus, NoopNotifier, StatusNotifier,
};
pub use hash::{hash_map, hash_value};
pub use input::resolve_inputs;
