mod backend;
mod coordinator;
#[cfg(any(test, feature = "test-support"))]
mod memory;
mod model;

pub use backend::KvBackend;
pub use coordinator::{HeldLock, LockCoordinator};
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryBackend;
pub use model::{KvEntry, KvRead, SessionCreated, SessionId, SessionRequest, WatchIndex};
