//! Round-robin ring over keyed values.
//!
//! A cyclic ordered set, safe for concurrent traversal and mutation. We
//! take the strict round-robin option over a snapshot-replace scheme: a
//! single `parking_lot::RwLock` guards a `Vec` plus a cursor, so `Next`
//! always advances exactly one slot relative to the last call, with no
//! guarantee of disjointness between concurrent callers.

use parking_lot::RwLock;

/// Values stored in a [`Ring`] must expose a stable string key so the ring
/// can enforce "no two values with the same key coexist" without relying on
/// `Eq`/`Hash` on the value itself.
pub trait RingKey {
    fn ring_key(&self) -> &str;
}

struct Inner<T> {
    items: Vec<T>,
    cursor: usize,
}

/// A cyclic ordered list of `RingKey` values.
///
/// `Append`/`Remove` take the write lock; `Next`/`Get`/`Size` take the read
/// lock (`Next` needs to mutate the cursor, so it briefly upgrades to a
/// write lock internally). No lock is ever held across I/O — callers must
/// copy what they need out of the ring before making a network call.
pub struct Ring<T> {
    inner: RwLock<Inner<T>>,
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RingKey + Clone> Ring<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                items: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Appends `value`. Caller (membership) is responsible for ensuring no
    /// existing item shares `value`'s key; a duplicate is rejected silently.
    pub fn append(&self, value: T) {
        let key = value.ring_key().to_string();
        let mut guard = self.inner.write();
        if guard.items.iter().any(|v| v.ring_key() == key) {
            return;
        }
        guard.items.push(value);
    }

    /// Removes the item with the given key, if present. When the last
    /// element is removed the cursor resets to 0 so a later `Next` returns
    /// nothing until `Append` is called again.
    pub fn remove(&self, key: &str) {
        let mut guard = self.inner.write();
        if let Some(pos) = guard.items.iter().position(|v| v.ring_key() == key) {
            guard.items.remove(pos);
            if guard.items.is_empty() {
                guard.cursor = 0;
            } else if guard.cursor > pos {
                guard.cursor -= 1;
            } else {
                guard.cursor %= guard.items.len();
            }
        }
    }

    /// Returns the current value and advances the shared cursor. Returns
    /// `None` on an empty ring ("none").
    pub fn next(&self) -> Option<T> {
        let mut guard = self.inner.write();
        if guard.items.is_empty() {
            return None;
        }
        let idx = guard.cursor % guard.items.len();
        let value = guard.items[idx].clone();
        guard.cursor = (idx + 1) % guard.items.len();
        Some(value)
    }

    /// Looks up by key without moving the traversal pointer.
    pub fn get(&self, key: &str) -> Option<T> {
        let guard = self.inner.read();
        guard.items.iter().find(|v| v.ring_key() == key).cloned()
    }

    pub fn size(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Item(String);

    impl RingKey for Item {
        fn ring_key(&self) -> &str {
            &self.0
        }
    }

    #[test]
    fn append_then_remove_restores_pre_append_state() {
        let ring: Ring<Item> = Ring::new();
        ring.append(Item("a".into()));
        let size_before = ring.size();
        ring.append(Item("b".into()));
        ring.remove("b");
        assert_eq!(ring.get("b"), None);
        assert_eq!(ring.size(), size_before);
    }

    #[test]
    fn duplicate_keys_never_coexist() {
        let ring: Ring<Item> = Ring::new();
        ring.append(Item("a".into()));
        ring.append(Item("a".into()));
        assert_eq!(ring.size(), 1);
    }

    #[test]
    fn next_cycles_and_is_well_formed_on_empty_ring() {
        let ring: Ring<Item> = Ring::new();
        assert_eq!(ring.next(), None);
        ring.append(Item("a".into()));
        ring.append(Item("b".into()));
        let first = ring.next().unwrap();
        let second = ring.next().unwrap();
        let third = ring.next().unwrap();
        assert_ne!(first.0, second.0);
        assert_eq!(first, third);
    }

    #[test]
    fn removing_last_element_resets_cursor() {
        let ring: Ring<Item> = Ring::new();
        ring.append(Item("only".into()));
        ring.next();
        ring.remove("only");
        assert_eq!(ring.next(), None);
        ring.append(Item("only".into()));
        assert_eq!(ring.next(), Some(Item("only".into())));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn append_remove_is_size_neutral_for_any_key_set(
            keys in prop::collection::vec("[a-z]{1,8}", 1..16),
            extra in "[a-z]{1,8}",
        ) {
            prop_assume!(!keys.contains(&extra));
            let ring: Ring<Item> = Ring::new();
            for k in &keys {
                ring.append(Item(k.clone()));
            }
            let size_before = ring.size();
            ring.append(Item(extra.clone()));
            ring.remove(&extra);
            prop_assert_eq!(ring.get(&extra), None);
            prop_assert_eq!(ring.size(), size_before);
        }
    }

    #[test]
    fn concurrent_next_never_panics() {
        use std::sync::Arc;
        let ring: Arc<Ring<Item>> = Arc::new(Ring::new());
        for i in 0..8 {
            ring.append(Item(format!("n{i}")));
        }
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ring = ring.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    ring.next();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ring.size(), 8);
    }
}
