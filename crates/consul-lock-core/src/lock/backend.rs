use crate::error::LockError;
use crate::lock::model::{KvRead, SessionId, SessionRequest, WatchIndex};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Key-value plus session operations the lock protocol is built on.
///
/// Implementations report protocol and transport failures as errors and
/// leave every decision about contention to the caller.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Read a key. With an index this is a long-poll that returns once the
    /// key changed past that index or `wait` elapsed.
    async fn read(&self, key: &str, index: WatchIndex, wait: Duration)
    -> Result<KvRead, LockError>;

    /// Create a session, with or without a structured request body
    async fn create_session(
        &self,
        request: Option<&SessionRequest>,
    ) -> Result<SessionId, LockError>;

    /// Conditional write: true only if the key was unheld at the instant of the write
    async fn acquire(&self, key: &str, session: &SessionId) -> Result<bool, LockError>;

    async fn destroy_session(&self, session: &SessionId) -> Result<bool, LockError>;

    async fn delete(&self, key: &str) -> Result<bool, LockError>;
}

#[async_trait]
impl<B: KvBackend + ?Sized> KvBackend for Arc<B> {
    async fn read(
        &self,
        key: &str,
        index: WatchIndex,
        wait: Duration,
    ) -> Result<KvRead, LockError> {
        (**self).read(key, index, wait).await
    }

    async fn create_session(
        &self,
        request: Option<&SessionRequest>,
    ) -> Result<SessionId, LockError> {
        (**self).create_session(request).await
    }

    async fn acquire(&self, key: &str, session: &SessionId) -> Result<bool, LockError> {
        (**self).acquire(key, session).await
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<bool, LockError> {
        (**self).destroy_session(session).await
    }

    async fn delete(&self, key: &str) -> Result<bool, LockError> {
        (**self).delete(key).await
    }
}
