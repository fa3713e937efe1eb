use crate::config::{LockOptions, RetryConfig, SessionPayload};
use crate::error::LockError;
use crate::lock::backend::KvBackend;
use crate::lock::model::{SessionId, SessionRequest, WatchIndex};
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A lock currently owned through a backend session.
///
/// Hand it back to [`LockCoordinator::release`]; dropping it unreleased only
/// logs, and the key stays held until the backend expires the session.
#[derive(Debug)]
pub struct HeldLock {
    key: String,
    session: SessionId,
    released: bool,
}

impl HeldLock {
    fn new(key: &str, session: SessionId) -> Self {
        Self {
            key: key.to_string(),
            session,
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    fn disarm(mut self) -> (String, SessionId) {
        self.released = true;
        (
            std::mem::take(&mut self.key),
            std::mem::replace(&mut self.session, SessionId::new("")),
        )
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                key = %self.key,
                session = %self.session,
                "Lock dropped without release; it stays held until the session expires"
            );
        }
    }
}

/// Acquire/release protocol over a [`KvBackend`].
///
/// The backend's conditional write is the only synchronization point; nothing
/// here locks locally.
pub struct LockCoordinator<B> {
    backend: B,
    options: LockOptions,
    retry_config: RetryConfig,
}

impl<B: KvBackend> LockCoordinator<B> {
    pub fn new(backend: B, options: LockOptions) -> Self {
        Self {
            backend,
            options,
            retry_config: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Take the lock on `key`.
    ///
    /// In blocking mode contention is retried behind long-poll reads until the
    /// lock is won. Without blocking, a held key (or a lost race) returns
    /// [`LockError::Contended`] at once. Transport and protocol failures always
    /// abort.
    pub async fn acquire(&self, key: &str) -> Result<HeldLock, LockError> {
        let mut index = WatchIndex::NONE;

        loop {
            let read = self
                .backend
                .read(key, index, self.options.wait_timeout)
                .await?;
            if index.observe(read.index) {
                debug!(key, index = ?index.get(), "new index");
            }

            if !read.is_eligible() {
                debug!(key, holder = ?read.holder(), "key is held");
                if !self.options.blocking {
                    return Err(LockError::contended(key));
                }
                if read.index.is_none() {
                    // nothing to long-poll on next time
                    tokio::time::sleep(self.options.contention_backoff).await;
                }
                continue;
            }

            let request = self.session_request(key);
            debug!(key, ?request, "creating session");
            let session = self.backend.create_session(request.as_ref()).await?;
            debug!(key, %session, "session created");

            match self.backend.acquire(key, &session).await {
                Ok(true) => {
                    info!(key, %session, "Lock acquired");
                    return Ok(HeldLock::new(key, session));
                }
                Ok(false) => {
                    debug!(key, %session, "lost the race for the key");
                    self.discard_session(&session).await;
                    if !self.options.blocking {
                        return Err(LockError::contended(key));
                    }
                }
                Err(e) => {
                    self.discard_session(&session).await;
                    return Err(e);
                }
            }
        }
    }

    /// Give the lock back: clear the key, then destroy the session.
    ///
    /// Both steps are attempted; transport failures are retried with backoff.
    /// Failures are logged and the first one is returned for the caller to log.
    pub async fn release(&self, lock: HeldLock) -> Result<(), LockError> {
        let (key, session) = lock.disarm();
        let mut first_error = None;

        match self
            .with_retry(|| self.backend.delete(&key), "delete key")
            .await
        {
            Ok(true) => debug!(%key, "key deleted"),
            Ok(false) => warn!(%key, "Backend refused to delete lock key"),
            Err(e) => {
                warn!(%key, "Failed to delete lock key: {e}");
                first_error.get_or_insert(e);
            }
        }

        match self
            .with_retry(|| self.backend.destroy_session(&session), "destroy session")
            .await
        {
            Ok(true) => debug!(%key, %session, "session destroyed"),
            Ok(false) => warn!(%key, %session, "Backend refused to destroy session"),
            Err(e) => {
                warn!(%key, %session, "Failed to destroy session: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => {
                info!(%key, "Lock released");
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    /// Run `work` while holding the lock on `key`; release happens whatever
    /// `work` returns.
    pub async fn run_locked<F, Fut, T>(&self, key: &str, work: F) -> Result<T, LockError>
    where
        F: FnOnce(SessionId) -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.acquire(key).await?;
        let output = work(lock.session().clone()).await;
        // release failures are already logged and must not change the outcome
        let _ = self.release(lock).await;
        Ok(output)
    }

    fn session_request(&self, key: &str) -> Option<SessionRequest> {
        match self.options.session_payload {
            SessionPayload::Structured => {
                Some(SessionRequest::for_key(key, self.options.lock_delay_secs))
            }
            SessionPayload::Empty => None,
        }
    }

    /// Best-effort removal of a session that never became a lock owner
    async fn discard_session(&self, session: &SessionId) {
        if let Err(e) = self.backend.destroy_session(session).await {
            warn!(%session, "Failed to destroy unused session: {e}");
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: F, what: &str) -> Result<T, LockError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LockError>>,
    {
        let mut backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry_config.min_delay())
            .with_max_delay(self.retry_config.max_delay())
            .with_max_times(self.retry_config.retries());
        if self.retry_config.jitter {
            backoff = backoff.with_jitter();
        }

        operation
            .retry(backoff)
            .when(|e: &LockError| e.is_retryable())
            .notify(|e: &LockError, delay: Duration| {
                warn!("Retrying {what} in {delay:?} after error: {e}");
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::memory::MemoryBackend;
    use std::sync::Arc;

    fn options(blocking: bool) -> LockOptions {
        LockOptions::builder()
            .blocking(blocking)
            .wait_timeout(Duration::from_millis(500))
            .contention_backoff(Duration::from_millis(20))
            .build()
            .unwrap()
    }

    fn coordinator(
        backend: &Arc<MemoryBackend>,
        blocking: bool,
    ) -> LockCoordinator<Arc<MemoryBackend>> {
        LockCoordinator::new(backend.clone(), options(blocking))
            .with_retry_config(RetryConfig::no_retry())
    }

    #[tokio::test]
    async fn test_acquire_sets_session_on_entry() {
        let backend = Arc::new(MemoryBackend::new());
        let coordinator = coordinator(&backend, true);

        let lock = coordinator.acquire("deploy").await.unwrap();
        assert_eq!(backend.holder("deploy").as_deref(), Some(lock.session().as_str()));

        coordinator.release(lock).await.unwrap();
        assert_eq!(backend.holder("deploy"), None);
        assert_eq!(backend.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_held_key_rejects_non_blocking_contender() {
        let backend = Arc::new(MemoryBackend::new());
        let first = coordinator(&backend, true);
        let second = coordinator(&backend, false);

        let lock = first.acquire("deploy").await.unwrap();
        for _ in 0..3 {
            let err = second.acquire("deploy").await.unwrap_err();
            assert!(err.is_contention(), "unexpected error: {err}");
        }

        first.release(lock).await.unwrap();
        let lock = second.acquire("deploy").await.unwrap();
        second.release(lock).await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_release_repeats_without_leaks() {
        let backend = Arc::new(MemoryBackend::new());
        let coordinator = coordinator(&backend, false);

        for _ in 0..5 {
            let lock = coordinator.acquire("deploy").await.unwrap();
            coordinator.release(lock).await.unwrap();
        }
        assert_eq!(backend.sessions_created(), 5);
        assert_eq!(backend.sessions_destroyed(), 5);
        assert_eq!(backend.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_blocking_contenders_never_overlap() {
        let backend = Arc::new(MemoryBackend::new());
        let first = Arc::new(coordinator(&backend, true));
        let second = Arc::new(coordinator(&backend, true));

        let lock = first.acquire("deploy").await.unwrap();
        let first_session = lock.session().clone();

        let waiter = {
            let second = second.clone();
            tokio::spawn(async move { second.acquire("deploy").await })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiter.is_finished(), "second contender got a held lock");
        assert_eq!(backend.holder("deploy").as_deref(), Some(first_session.as_str()));

        first.release(lock).await.unwrap();

        let second_lock = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("second contender never woke up")
            .unwrap()
            .unwrap();
        assert_ne!(second_lock.session(), &first_session);
        assert_eq!(
            backend.holder("deploy").as_deref(),
            Some(second_lock.session().as_str())
        );
        second.release(second_lock).await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_race_destroys_session_non_blocking() {
        let backend = Arc::new(MemoryBackend::new());
        backend.inject_race_losses(1);
        let coordinator = coordinator(&backend, false);

        let err = coordinator.acquire("deploy").await.unwrap_err();
        assert!(err.is_contention());
        assert_eq!(backend.sessions_created(), 1);
        assert_eq!(backend.sessions_destroyed(), 1);
        assert_eq!(backend.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_lost_races_are_retried_when_blocking() {
        let backend = Arc::new(MemoryBackend::new());
        backend.inject_race_losses(3);
        let coordinator = coordinator(&backend, true);

        let lock = tokio::time::timeout(Duration::from_secs(5), coordinator.acquire("deploy"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(backend.sessions_created(), 4);
        assert_eq!(backend.sessions_destroyed(), 3);
        assert_eq!(backend.live_sessions(), 1);

        coordinator.release(lock).await.unwrap();
        assert_eq!(backend.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_first_read_has_no_index_then_follows_responses() {
        let backend = Arc::new(MemoryBackend::new());
        let holder = coordinator(&backend, true);
        let waiter = Arc::new(coordinator(&backend, true));

        let lock = holder.acquire("deploy").await.unwrap();
        let index_while_held = backend.current_index();
        backend.clear_read_log();

        let task = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.acquire("deploy").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        holder.release(lock).await.unwrap();
        let lock = task.await.unwrap().unwrap();

        let reads = backend.read_log();
        assert!(reads.len() >= 2, "expected a long-poll, got {reads:?}");
        assert_eq!(reads[0], WatchIndex::NONE);
        assert_eq!(reads[1], WatchIndex::at(index_while_held));
        assert!(reads.windows(2).all(|w| w[0].get() <= w[1].get()));

        waiter.release(lock).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_index_header_keeps_polling_without_index() {
        let backend = Arc::new(MemoryBackend::new().without_index_header());
        let holder = coordinator(&backend, true);
        let waiter = Arc::new(coordinator(&backend, true));

        let lock = holder.acquire("deploy").await.unwrap();
        backend.clear_read_log();
        let task = {
            let waiter = waiter.clone();
            tokio::spawn(async move { waiter.acquire("deploy").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        holder.release(lock).await.unwrap();
        let lock = task.await.unwrap().unwrap();

        let reads = backend.read_log();
        assert!(reads.iter().all(WatchIndex::is_none));
        // the backoff keeps this far below a spin
        assert!(reads.len() < 50, "polled {} times", reads.len());

        waiter.release(lock).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_payload_strategies() {
        let backend = Arc::new(MemoryBackend::new());
        let structured = LockCoordinator::new(
            backend.clone(),
            LockOptions::builder().lock_delay_secs(7u64).build().unwrap(),
        );
        let lock = structured.acquire("deploy").await.unwrap();
        structured.release(lock).await.unwrap();

        let empty = LockCoordinator::new(
            backend.clone(),
            LockOptions::builder()
                .session_payload(SessionPayload::Empty)
                .build()
                .unwrap(),
        );
        let lock = empty.acquire("deploy").await.unwrap();
        empty.release(lock).await.unwrap();

        assert_eq!(
            backend.session_requests(),
            vec![Some(SessionRequest::for_key("deploy", 7)), None]
        );
    }

    #[tokio::test]
    async fn test_protocol_error_aborts() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_reads(500);
        let coordinator = coordinator(&backend, true);

        let err = coordinator.acquire("deploy").await.unwrap_err();
        assert!(matches!(err, LockError::UnexpectedStatus { status: 500, .. }));
        assert_eq!(backend.sessions_created(), 0);
    }

    #[tokio::test]
    async fn test_run_locked_releases_after_work() {
        let backend = Arc::new(MemoryBackend::new());
        let coordinator = coordinator(&backend, false);

        let held_during = coordinator
            .run_locked("deploy", |session| {
                let backend = backend.clone();
                async move { backend.holder("deploy") == Some(session.to_string()) }
            })
            .await
            .unwrap();
        assert!(held_during);
        assert_eq!(backend.holder("deploy"), None);
        assert_eq!(backend.live_sessions(), 0);
    }
}
