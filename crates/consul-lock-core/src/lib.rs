//! Consul Lock Core - Platform-independent lock protocol and child supervision
//!
//! This crate provides the lock coordinator, the backend and process traits,
//! configuration and error types shared by the platform-specific crates.

pub mod config;
pub mod error;
pub mod lock;
pub mod process;
pub mod stdio;
mod supervisor;

pub use config::*;
pub use error::*;
pub use lock::*;
pub use process::*;
pub use stdio::{RelayStdErr, RelayStdOut, RelayStdio};
pub use supervisor::ProcessSupervisor;
