//! Endpoint name resolution, backed by a request to the built-in registry
//! service (endpoint 0) and a local cache of names already resolved.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::message::{EndpointId, NO_ENDPOINT};

/// Caches `name -> endpoint id` lookups so each name is only ever resolved
/// once per [`crate::comms::Comms`] instance.
#[derive(Debug, Default)]
pub(crate) struct EndpointRegistry {
    cache: Mutex<HashMap<String, EndpointId>>,
}

impl EndpointRegistry {
    pub(crate) fn new() -> Self {
        Self { cache: Mutex::new(HashMap::new()) }
    }

    /// Look up a previously-cached endpoint id by name.
    pub(crate) fn cached(&self, name: &str) -> Option<EndpointId> {
        self.cache.lock().expect("registry cache lock poisoned").get(name).copied()
    }

    /// Record a resolved endpoint id for `name`.
    pub(crate) fn insert(&self, name: &str, id: EndpointId) {
        self.cache.lock().expect("registry cache lock poisoned").insert(name.to_string(), id);
    }
}

/// Parse the registry service's response into a `name -> id` table.
///
/// The response is a concatenation of variable-length records:
/// `{u8 id}{u32 name_len, little-endian}{name_len bytes of name}`. A
/// truncated trailing record stops the walk but keeps every record
/// already decoded, matching the host's own registry walk, which inserts
/// into the live registry as it goes and simply breaks on the first
/// short record.
pub(crate) fn parse_registry_records(buf: &[u8]) -> HashMap<String, EndpointId> {
    let mut records = HashMap::new();
    let mut offset = 0;

    while offset < buf.len() {
        if offset + 5 > buf.len() {
            log::warn!("comms: truncated registry record header at offset {offset}, keeping {} decoded record(s)", records.len());
            break;
        }
        let id = buf[offset];
        let name_len = u32::from_le_bytes(
            buf[offset + 1..offset + 5].try_into().expect("4-byte slice"),
        ) as usize;
        offset += 5;

        if offset + name_len > buf.len() {
            log::warn!("comms: truncated registry record name at offset {offset} (expected {name_len} bytes), keeping {} decoded record(s)", records.len());
            break;
        }
        let name = String::from_utf8_lossy(&buf[offset..offset + name_len]).into_owned();
        offset += name_len;

        records.insert(name, id);
    }

    records
}

/// Look up `name` in a freshly parsed registry response, returning
/// [`NO_ENDPOINT`] if it isn't present.
pub(crate) fn resolve(records: &HashMap<String, EndpointId>, name: &str) -> EndpointId {
    records.get(name).copied().unwrap_or(NO_ENDPOINT)
}
