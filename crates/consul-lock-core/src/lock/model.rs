use serde::{Deserialize, Serialize};
use std::fmt;

/// A key-value record as the backend reports it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KvEntry {
    pub create_index: u64,
    pub modify_index: u64,
    pub lock_index: u64,
    pub key: String,
    pub flags: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl KvEntry {
    /// Owning session, if any. An empty session string counts as unheld.
    pub fn holder(&self) -> Option<&str> {
        self.session.as_deref().filter(|s| !s.is_empty())
    }

    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }
}

/// Body of `PUT /v1/session/create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionRequest {
    pub lock_delay: String,
    pub name: String,
}

impl SessionRequest {
    pub fn for_key(key: &str, lock_delay_secs: u64) -> Self {
        Self {
            lock_delay: format!("{lock_delay_secs}s"),
            name: format!("lock-for-{key}"),
        }
    }
}

/// Reply of `PUT /v1/session/create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreated {
    #[serde(rename = "ID")]
    pub id: String,
}

/// Identity of a backend session; doubles as the lock ownership token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last `ModifyIndex` observed for a key, driving long-poll reads.
///
/// The empty state means "nothing observed yet"; it is never turned into a
/// query parameter, and it is distinct from every index the backend can report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchIndex(Option<u64>);

impl WatchIndex {
    pub const NONE: WatchIndex = WatchIndex(None);

    pub fn at(index: u64) -> Self {
        Self(Some(index))
    }

    pub fn get(&self) -> Option<u64> {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Fold in the index from a response. A missing header leaves the cursor
    /// alone and an older index never moves it backwards.
    /// Returns whether the cursor advanced.
    pub fn observe(&mut self, reported: Option<u64>) -> bool {
        match (self.0, reported) {
            (_, None) => false,
            (Some(current), Some(next)) if next <= current => false,
            (_, Some(next)) => {
                self.0 = Some(next);
                true
            }
        }
    }
}

impl From<Option<u64>> for WatchIndex {
    fn from(index: Option<u64>) -> Self {
        Self(index)
    }
}

/// Outcome of reading a lock key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvRead {
    /// `None` when the key does not exist
    pub entry: Option<KvEntry>,
    /// Value of the index header, when the response carried one
    pub index: Option<u64>,
}

impl KvRead {
    /// A missing key or an entry without an owner may be acquired
    pub fn is_eligible(&self) -> bool {
        self.entry.as_ref().is_none_or(|entry| !entry.is_held())
    }

    pub fn holder(&self) -> Option<&str> {
        self.entry.as_ref().and_then(KvEntry::holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_decodes_backend_json() {
        let json = r#"[{"CreateIndex":100,"ModifyIndex":200,"LockIndex":1,"Key":"locks/deploy","Flags":0,"Value":null,"Session":"adf4238a-882b-9ddc-4a9d-5b6758e4159e"}]"#;
        let entries: Vec<KvEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].modify_index, 200);
        assert_eq!(entries[0].holder(), Some("adf4238a-882b-9ddc-4a9d-5b6758e4159e"));
    }

    #[test]
    fn test_entry_without_session_is_free() {
        let json = r#"{"CreateIndex":1,"ModifyIndex":2,"LockIndex":0,"Key":"locks/a","Flags":0,"Value":"aGk="}"#;
        let entry: KvEntry = serde_json::from_str(json).unwrap();
        assert!(!entry.is_held());

        let entry = KvEntry {
            session: Some(String::new()),
            ..entry
        };
        assert!(!entry.is_held());
    }

    #[test]
    fn test_session_request_shape() {
        let request = SessionRequest::for_key("deploy", 15);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["LockDelay"], "15s");
        assert_eq!(json["Name"], "lock-for-deploy");
    }

    #[test]
    fn test_watch_index_observe() {
        let mut index = WatchIndex::NONE;
        assert!(!index.observe(None));
        assert!(index.is_none());

        assert!(index.observe(Some(42)));
        assert_eq!(index.get(), Some(42));

        // missing header keeps the cursor
        assert!(!index.observe(None));
        assert_eq!(index.get(), Some(42));

        // never moves backwards
        assert!(!index.observe(Some(7)));
        assert_eq!(index.get(), Some(42));

        assert!(index.observe(Some(43)));
        assert_eq!(index.get(), Some(43));
    }

    #[test]
    fn test_read_eligibility() {
        assert!(KvRead::default().is_eligible());

        let held = KvRead {
            entry: Some(KvEntry {
                session: Some("s1".to_string()),
                ..Default::default()
            }),
            index: Some(3),
        };
        assert!(!held.is_eligible());
        assert_eq!(held.holder(), Some("s1"));

        let released = KvRead {
            entry: Some(KvEntry::default()),
            index: Some(4),
        };
        assert!(released.is_eligible());
    }
}
