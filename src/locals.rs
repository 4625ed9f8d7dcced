//! The `locals` bag.
//!
//! Mixes a local in-memory map with a remotely-delivered JSON object,
//! represented as an arena of decoded slots keyed by string with a
//! one-shot "decoded" flag per slot, so a value delivered over the wire
//! is parsed out of the JSON object at most once regardless of how many
//! times it is read.

use parking_lot::Mutex;
use std::collections::HashMap;

enum Slot {
    /// Present only in the JSON the caller sent; not yet materialised.
    RawJson(serde_json::Value),
    /// Already decoded (either originally local, or materialised from
    /// `RawJson` on first scan).
    Decoded(serde_json::Value),
}

#[derive(Default)]
pub struct LocalsBag {
    slots: Mutex<HashMap<String, Slot>>,
}

impl LocalsBag {
    /// Builds a bag from a remotely-delivered JSON object; every key starts
    /// out undecoded.
    pub fn from_remote(value: serde_json::Value) -> Self {
        let mut slots = HashMap::new();
        if let serde_json::Value::Object(map) = value {
            for (key, value) in map {
                slots.insert(key, Slot::RawJson(value));
            }
        }
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Inserts or overwrites a locally-originated value.
    pub fn put(&self, key: impl Into<String>, value: serde_json::Value) {
        self.slots.lock().insert(key.into(), Slot::Decoded(value));
    }

    pub fn remove(&self, key: &str) {
        self.slots.lock().remove(key);
    }

    /// Reads a key, materialising it from its raw JSON form on first
    /// access and caching the decoded slot for subsequent reads.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(key)?;
        match slot {
            Slot::Decoded(value) => Some(value.clone()),
            Slot::RawJson(raw) => {
                let value = raw.clone();
                *slot = Slot::Decoded(value.clone());
                Some(value)
            }
        }
    }

    /// Scans every slot, decoding any still-raw entries, and returns the
    /// merged view as a JSON object — what gets re-serialised into an
    /// outgoing `RequestEnvelope.locals`.
    pub fn scan(&self) -> serde_json::Value {
        let mut slots = self.slots.lock();
        let mut out = serde_json::Map::with_capacity(slots.len());
        for (key, slot) in slots.iter_mut() {
            let value = match slot {
                Slot::Decoded(value) => value.clone(),
                Slot::RawJson(raw) => {
                    let value = raw.clone();
                    *slot = Slot::Decoded(value.clone());
                    value
                }
            };
            out.insert(key.clone(), value);
        }
        serde_json::Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_values_materialise_on_first_access() {
        let bag = LocalsBag::from_remote(serde_json::json!({"a": 1, "b": "two"}));
        assert_eq!(bag.get("a"), Some(serde_json::json!(1)));
        assert_eq!(bag.get("b"), Some(serde_json::json!("two")));
        assert_eq!(bag.get("missing"), None);
    }

    #[test]
    fn put_overrides_remote_value() {
        let bag = LocalsBag::from_remote(serde_json::json!({"a": 1}));
        bag.put("a", serde_json::json!(2));
        assert_eq!(bag.get("a"), Some(serde_json::json!(2)));
    }

    #[test]
    fn scan_merges_all_slots() {
        let bag = LocalsBag::from_remote(serde_json::json!({"a": 1}));
        bag.put("b", serde_json::json!(2));
        let merged = bag.scan();
        assert_eq!(merged["a"], serde_json::json!(1));
        assert_eq!(merged["b"], serde_json::json!(2));
    }

    #[test]
    fn remove_deletes_slot() {
        let bag = LocalsBag::from_remote(serde_json::json!({"a": 1}));
        bag.remove("a");
        assert_eq!(bag.get("a"), None);
    }
}
