//! Cascade Artifact
//!
//! On-disk artifact storage for Cascade. Execution results, their
//! input/param/metadata snapshots, user uploads, and the asset library
//! all live under one managed root:
//!
//! ```text
//! {root}/
//! ├── executions/{workflow_id}/{execution_id}/
//! │   ├── inputs.json
//! │   ├── params.json
//! │   ├── metadata.json
//! │   └── <downloaded results>
//! ├── uploads/
//! └── library/
//! ```
//!
//! Everything here is best-effort from the engine's point of view:
//! a failed download or snapshot write is logged by the caller, never
//! rolled into an execution failure.

mod fs;

pub use fs::FsStore;

/// Error type for artifact storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested artifact was not found.
  #[error("artifact not found: {0}")]
  NotFound(String),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A result download failed.
  #[error("download failed: {0}")]
  Download(#[from] reqwest::Error),

  /// A snapshot did not contain valid JSON.
  #[error("invalid snapshot: {0}")]
  InvalidSnapshot(#[from] serde_json::Error),
}
