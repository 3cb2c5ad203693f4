//! bspsync - versioned map build and deploy pipeline
//!
//! Watches a map compiler's output directory. Every save of a tracked map is
//! renamed to the next `<name>_devN.bsp`, optionally packed, compressed,
//! uploaded to the fast-download directory, extracted into the live map
//! directory and, if configured, loaded on the game server over RCON.

pub mod config;
pub mod daemon;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod queue;
pub mod rcon;
pub mod toolchain;
pub mod tracked;
pub mod transport;
pub mod version;
pub mod watcher;

pub use error::{BspsyncError, Result};
