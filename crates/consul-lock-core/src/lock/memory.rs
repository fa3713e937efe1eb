//! In-process backend with the same lock semantics as a Consul agent.
//!
//! Compiled for tests and behind the `test-support` feature.

use crate::error::LockError;
use crate::lock::backend::KvBackend;
use crate::lock::model::{KvEntry, KvRead, SessionId, SessionRequest, WatchIndex};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Default)]
struct MemoryState {
    index: u64,
    entries: HashMap<String, KvEntry>,
    sessions: HashSet<String>,
    /// Sessions opened through [`MemoryBackend::hold`], outside the counters
    external: HashSet<String>,
    next_session: u64,
    created: usize,
    destroyed: usize,
    session_requests: Vec<Option<SessionRequest>>,
    reads: Vec<WatchIndex>,
    pending_race_losses: usize,
    read_failure: Option<u16>,
}

impl MemoryState {
    fn bump(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn new_session_id(&mut self) -> String {
        self.next_session += 1;
        format!("session-{:04}", self.next_session)
    }

    fn set_holder(&mut self, key: &str, session: Option<String>) -> u64 {
        let index = self.bump();
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| KvEntry {
            create_index: index,
            key: key.to_string(),
            ..Default::default()
        });
        if session.is_some() {
            entry.lock_index += 1;
        }
        entry.modify_index = index;
        entry.session = session;
        index
    }
}

pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    changes: watch::Sender<u64>,
    index_header: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let state = MemoryState {
            index: 1,
            ..Default::default()
        };
        let (changes, _) = watch::channel(state.index);
        Self {
            state: Mutex::new(state),
            changes,
            index_header: true,
        }
    }

    /// Answer reads without an index, like a proxy that strips the header
    pub fn without_index_header(mut self) -> Self {
        self.index_header = false;
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, index: u64) {
        self.changes.send_replace(index);
    }

    /// Take `key` under a session owned by somebody else
    pub fn hold(&self, key: &str) -> SessionId {
        let (id, index) = {
            let mut state = self.state();
            let id = state.new_session_id();
            state.sessions.insert(id.clone());
            state.external.insert(id.clone());
            let index = state.set_holder(key, Some(id.clone()));
            (id, index)
        };
        self.publish(index);
        SessionId::new(id)
    }

    /// The next `count` conditional writes lose to a contender that grabs the
    /// key just before and lets it go right after.
    pub fn inject_race_losses(&self, count: usize) {
        self.state().pending_race_losses = count;
    }

    /// Every read fails with this HTTP status from now on
    pub fn fail_reads(&self, status: u16) {
        self.state().read_failure = Some(status);
    }

    pub fn holder(&self, key: &str) -> Option<String> {
        self.state()
            .entries
            .get(key)
            .and_then(|entry| entry.holder().map(str::to_string))
    }

    pub fn entry(&self, key: &str) -> Option<KvEntry> {
        self.state().entries.get(key).cloned()
    }

    pub fn current_index(&self) -> u64 {
        self.state().index
    }

    pub fn sessions_created(&self) -> usize {
        self.state().created
    }

    pub fn sessions_destroyed(&self) -> usize {
        self.state().destroyed
    }

    /// Sessions created through the backend API that are still alive
    pub fn live_sessions(&self) -> usize {
        let state = self.state();
        state
            .sessions
            .iter()
            .filter(|id| !state.external.contains(*id))
            .count()
    }

    pub fn session_requests(&self) -> Vec<Option<SessionRequest>> {
        self.state().session_requests.clone()
    }

    /// Indexes passed to every read so far
    pub fn read_log(&self) -> Vec<WatchIndex> {
        self.state().reads.clone()
    }

    pub fn clear_read_log(&self) {
        self.state().reads.clear();
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn read(
        &self,
        key: &str,
        index: WatchIndex,
        wait: Duration,
    ) -> Result<KvRead, LockError> {
        {
            let mut state = self.state();
            state.reads.push(index);
            if let Some(status) = state.read_failure {
                return Err(LockError::unexpected_status(status, format!("GET {key}")));
            }
        }

        if let Some(since) = index.get() {
            let mut changes = self.changes.subscribe();
            // a timeout simply answers with the current state
            let _ = tokio::time::timeout(wait, changes.wait_for(|current| *current > since)).await;
        }

        let state = self.state();
        Ok(KvRead {
            entry: state.entries.get(key).cloned(),
            index: self.index_header.then_some(state.index),
        })
    }

    async fn create_session(
        &self,
        request: Option<&SessionRequest>,
    ) -> Result<SessionId, LockError> {
        let mut state = self.state();
        let id = state.new_session_id();
        state.sessions.insert(id.clone());
        state.created += 1;
        state.session_requests.push(request.cloned());
        Ok(SessionId::new(id))
    }

    async fn acquire(&self, key: &str, session: &SessionId) -> Result<bool, LockError> {
        let (acquired, index) = {
            let mut state = self.state();
            if !state.sessions.contains(session.as_str()) {
                return Err(LockError::unexpected_status(
                    500,
                    format!("invalid session {session}"),
                ));
            }

            if state.pending_race_losses > 0 {
                state.pending_race_losses -= 1;
                state.set_holder(key, Some("intruder".to_string()));
                let index = state.set_holder(key, None);
                (false, index)
            } else {
                let holder = state
                    .entries
                    .get(key)
                    .and_then(KvEntry::holder)
                    .map(str::to_string);
                match holder {
                    Some(holder) if holder == session.as_str() => return Ok(true),
                    Some(_) => return Ok(false),
                    None => {
                        let index = state.set_holder(key, Some(session.to_string()));
                        (true, index)
                    }
                }
            }
        };
        self.publish(index);
        Ok(acquired)
    }

    async fn destroy_session(&self, session: &SessionId) -> Result<bool, LockError> {
        let index = {
            let mut state = self.state();
            if !state.sessions.remove(session.as_str()) {
                return Ok(true);
            }
            if !state.external.remove(session.as_str()) {
                state.destroyed += 1;
            }

            let held: Vec<String> = state
                .entries
                .values()
                .filter(|entry| entry.holder() == Some(session.as_str()))
                .map(|entry| entry.key.clone())
                .collect();
            let mut index = None;
            for key in held {
                index = Some(state.set_holder(&key, None));
            }
            index
        };
        if let Some(index) = index {
            self.publish(index);
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, LockError> {
        let index = {
            let mut state = self.state();
            match state.entries.remove(key) {
                Some(_) => Some(state.bump()),
                None => None,
            }
        };
        if let Some(index) = index {
            self.publish(index);
        }
        Ok(true)
    }
}
