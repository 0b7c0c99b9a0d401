//! # Render Error Types
//!
//! All errors the mesh pipeline can surface to its caller.
//! Cancellation and missing world data are not errors and never appear here.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a GPU backend.
///
/// Both are fatal for the frame renderer: the device cannot hold the data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The buffer exceeds the device limit.
    #[error("buffer of {requested} bytes exceeds device limit of {max} bytes")]
    BufferTooLarge {
        /// Bytes requested.
        requested: u64,
        /// Largest buffer the device allows.
        max: u64,
    },

    /// The device ran out of memory.
    #[error("out of device memory allocating {requested} bytes")]
    OutOfMemory {
        /// Bytes requested.
        requested: u64,
    },
}

/// Errors that can occur in the mesh pipeline.
#[derive(Error, Debug)]
pub enum MeshError {
    /// The dispatcher was shut down.
    #[error("dispatcher is shut down")]
    Closed,

    /// A GPU object could not be created. Treat as fatal.
    #[error("gpu allocation failed: {0}")]
    Gpu(#[from] GpuError),

    /// GPU work was attempted off the render thread.
    #[error("gpu access from a thread other than the render thread")]
    WrongThread,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("cannot read configuration {path}: {source}")]
    ConfigIo {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for the pipeline.
    #[error("cannot parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The worker runtime could not be started.
    #[error("cannot start worker pool: {0}")]
    WorkerPool(std::io::Error),

    /// The mailbox thread could not be spawned.
    #[error("cannot spawn dispatcher mailbox: {0}")]
    MailboxSpawn(std::io::Error),
}

/// Result type for pipeline operations.
pub type MeshResult<T> = Result<T, MeshError>;
