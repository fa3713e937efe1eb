//! Run a program while holding a Consul session lock.
//!
//! [`LockedRunner`] ties a [`LockCoordinator`] talking to Consul through
//! [`ConsulBackend`] to a [`ProcessSupervisor`] for the current platform.

mod consul;
mod factory;
mod runner;

pub use consul::ConsulBackend;
pub use factory::{PlatformProcessManager, PlatformProcessManagerFactory};
pub use runner::LockedRunner;

// Re-export core functionality
pub use consul_lock_core::*;
