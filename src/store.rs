//! In-memory response template store.
//!
//! Maps (protocol, operation) pairs to canned response templates.
//! The store is shared by every dispatcher and by the management API;
//! lookups are protocol-scoped and a `put` is visible to all
//! subsequent `get` calls on any thread. Last writer wins, there is
//! no versioning.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Wire/data protocol tag used as the first half of a response key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Json,
    Xml,
    Soap,
    KeyValue,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::Json,
        Protocol::Xml,
        Protocol::Soap,
        Protocol::KeyValue,
    ];

    /// Canonical tag string, also the directory name in the template tree.
    pub fn tag(&self) -> &'static str {
        match self {
            Protocol::Json => "json",
            Protocol::Xml => "xml",
            Protocol::Soap => "soap",
            Protocol::KeyValue => "keyValue",
        }
    }

    /// Parse a tag string; unknown tags yield `None` so callers can
    /// answer "absent" instead of failing.
    pub fn from_tag(tag: &str) -> Option<Protocol> {
        match tag {
            "json" => Some(Protocol::Json),
            "xml" => Some(Protocol::Xml),
            "soap" => Some(Protocol::Soap),
            "keyValue" => Some(Protocol::KeyValue),
            _ => None,
        }
    }

    /// Template file extension for this protocol. SOAP payloads are
    /// XML files.
    pub fn file_extension(&self) -> &'static str {
        match self {
            Protocol::Json => ".json",
            Protocol::Xml | Protocol::Soap => ".xml",
            Protocol::KeyValue => ".txt",
        }
    }

    /// Content-Type header value used when replying over HTTP.
    pub fn content_type(&self) -> &'static str {
        match self {
            Protocol::Json => "application/json",
            Protocol::Xml => "application/xml",
            Protocol::Soap => "text/xml",
            Protocol::KeyValue => "text/plain",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Thread-safe response template store.
///
/// One lock per protocol keeps writers on unrelated protocols from
/// serializing each other; within a protocol, readers share the lock.
pub struct ResponseStore {
    json: RwLock<HashMap<String, String>>,
    xml: RwLock<HashMap<String, String>>,
    soap: RwLock<HashMap<String, String>>,
    key_value: RwLock<HashMap<String, String>>,
}

impl ResponseStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        info!("Initializing response store");
        Arc::new(Self {
            json: RwLock::new(HashMap::new()),
            xml: RwLock::new(HashMap::new()),
            soap: RwLock::new(HashMap::new()),
            key_value: RwLock::new(HashMap::new()),
        })
    }

    fn map(&self, protocol: Protocol) -> &RwLock<HashMap<String, String>> {
        match protocol {
            Protocol::Json => &self.json,
            Protocol::Xml => &self.xml,
            Protocol::Soap => &self.soap,
            Protocol::KeyValue => &self.key_value,
        }
    }

    /// Look up the template registered for an operation.
    pub fn get(&self, protocol: Protocol, operation: &str) -> Option<String> {
        let map = self.map(protocol).read().ok()?;
        let entry = map.get(operation).cloned();
        match entry {
            Some(_) => debug!(%protocol, operation, "Template found"),
            None => debug!(%protocol, operation, "Template missing"),
        }
        entry
    }

    /// Register or overwrite the template for an operation.
    pub fn put(&self, protocol: Protocol, operation: &str, content: String) {
        if let Ok(mut map) = self.map(protocol).write() {
            map.insert(operation.to_string(), content);
            debug!(%protocol, operation, "Template registered");
        }
    }

    /// Copy of all entries for one protocol.
    pub fn snapshot(&self, protocol: Protocol) -> HashMap<String, String> {
        self.map(protocol)
            .read()
            .map(|map| map.clone())
            .unwrap_or_default()
    }

    /// Entry counts per protocol plus the overall total.
    pub fn stats(&self) -> StoreStats {
        let mut per_protocol = Vec::with_capacity(Protocol::ALL.len());
        let mut total = 0;
        for protocol in Protocol::ALL {
            let count = self
                .map(protocol)
                .read()
                .map(|map| map.len())
                .unwrap_or(0);
            total += count;
            per_protocol.push((protocol, count));
        }
        StoreStats {
            total,
            per_protocol,
        }
    }
}

/// Store statistics as reported by the management API.
#[derive(Debug)]
pub struct StoreStats {
    pub total: usize,
    pub per_protocol: Vec<(Protocol, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_put_then_get() {
        let store = ResponseStore::new();
        for protocol in Protocol::ALL {
            store.put(protocol, "getUserInfo", format!("body-{protocol}"));
            assert_eq!(
                store.get(protocol, "getUserInfo").as_deref(),
                Some(format!("body-{protocol}").as_str())
            );
        }
    }

    #[test]
    fn test_get_missing() {
        let store = ResponseStore::new();
        assert!(store.get(Protocol::Json, "nope").is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let store = ResponseStore::new();
        store.put(Protocol::Xml, "getVas", "stage1".to_string());
        store.put(Protocol::Xml, "getVas", "stage2".to_string());
        assert_eq!(store.get(Protocol::Xml, "getVas").as_deref(), Some("stage2"));
    }

    #[test]
    fn test_lookup_is_protocol_scoped() {
        let store = ResponseStore::new();
        store.put(Protocol::Json, "ping", "{}".to_string());
        assert!(store.get(Protocol::Xml, "ping").is_none());
        assert!(store.get(Protocol::Json, "ping").is_some());
    }

    #[test]
    fn test_keys_are_case_sensitive() {
        let store = ResponseStore::new();
        store.put(Protocol::Json, "GetUser", "{}".to_string());
        assert!(store.get(Protocol::Json, "getuser").is_none());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = ResponseStore::new();
        store.put(Protocol::Soap, "op1", "a".to_string());
        let snap = store.snapshot(Protocol::Soap);
        store.put(Protocol::Soap, "op2", "b".to_string());
        assert_eq!(snap.len(), 1);
        assert_eq!(store.snapshot(Protocol::Soap).len(), 2);
    }

    #[test]
    fn test_stats_counts() {
        let store = ResponseStore::new();
        store.put(Protocol::Json, "a", "1".to_string());
        store.put(Protocol::Json, "b", "2".to_string());
        store.put(Protocol::KeyValue, "OPCODE_406", "r".to_string());

        let stats = store.stats();
        assert_eq!(stats.total, 3);
        let json_count = stats
            .per_protocol
            .iter()
            .find(|(p, _)| *p == Protocol::Json)
            .map(|(_, c)| *c);
        assert_eq!(json_count, Some(2));
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let store = ResponseStore::new();
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..100 {
                    store.put(Protocol::Json, "hot", format!("v{i}"));
                }
            })
        };
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..100 {
                    let _ = store.get(Protocol::Json, "hot");
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(store.get(Protocol::Json, "hot").as_deref(), Some("v99"));
    }

    #[test]
    fn test_unknown_tag_parses_to_none() {
        assert!(Protocol::from_tag("grpc").is_none());
        assert_eq!(Protocol::from_tag("keyValue"), Some(Protocol::KeyValue));
        // tag matching is exact, not case-folded
        assert!(Protocol::from_tag("keyvalue").is_none());
    }
}
