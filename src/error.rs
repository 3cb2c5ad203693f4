//! Error types for bspsync
//!
//! Centralized error handling using thiserror. Each pipeline stage has its
//! own variant so a task's failure names the stage that stopped it.

use std::path::PathBuf;

use thiserror::Error;

/// All error types that can occur in bspsync
#[derive(Debug, Error)]
pub enum BspsyncError {
    /// Listing the output directory failed
    #[error("Failed to read directory {}: {source}", path.display())]
    DirectoryReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not determine the next map version
    #[error("Version resolution failed: {0}")]
    VersionResolutionFailed(String),

    /// Moving the map into the output directory failed
    #[error("Relocation failed: {0}")]
    RelocationFailed(String),

    /// The resource packer exited unsuccessfully
    #[error("Packing failed: {0}")]
    PackingFailed(String),

    /// The compressor exited unsuccessfully
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    /// Secure copy to the fast-download directory failed
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Remote decompression into the live map directory failed
    #[error("Remote extraction failed: {0}")]
    RemoteExtractionFailed(String),

    /// The changelevel over the remote console failed
    #[error("Reload failed: {0}")]
    ReloadFailed(String),

    /// One or more external tool binaries could not be found
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// Transport parameters rejected by the command builder
    #[error("Invalid transport parameters: {0}")]
    InvalidTransport(String),

    /// Remote console protocol error
    #[error("RCON error: {0}")]
    Rcon(String),

    /// Filesystem watcher error
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// The task queue worker is no longer accepting tasks
    #[error("Task queue is closed")]
    QueueClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for bspsync operations
pub type Result<T> = std::result::Result<T, BspsyncError>;
