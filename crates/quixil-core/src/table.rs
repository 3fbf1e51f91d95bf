//! Open-addressed hash table keyed by interned string identity.
//!
//! The same table shape backs both the VM's `globals` map and the string
//! interner's membership set: a slot's value is either a real [`Value`] (for
//! globals) or the `Nil`/`Bool(true)` presence markers described below (for
//! interning). Keeping one implementation mirrors how the original design
//! reuses a single hash-table type for both roles.

use crate::object::{QString, StringRef};
use crate::value::Value;

const MAX_LOAD: f64 = 0.75;

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: Option<StringRef>,
    hash: u32,
    value: Value,
}

impl Slot {
    const EMPTY: Slot = Slot {
        key: None,
        hash: 0,
        value: Value::Nil,
    };
}

/// An empty slot is `key=None, value=Nil`; a tombstone left behind by
/// [`Table::remove`] is `key=None, value=Bool(true)` so linear probing can
/// tell "never occupied" apart from "occupied, then removed".
#[derive(Debug, Clone, Default)]
pub struct Table {
    slots: Vec<Slot>,
    count: usize,
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            count: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn find_entry(slots: &[Slot], key: StringRef, hash: u32) -> usize {
        let cap = slots.len();
        let mut index = (hash as usize) % cap;
        let mut tombstone: Option<usize> = None;
        loop {
            let slot = slots[index];
            match slot.key {
                None if matches!(slot.value, Value::Nil) => {
                    return tombstone.unwrap_or(index);
                }
                None => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) % cap;
        }
    }

    fn grow(&mut self, new_cap: usize) {
        let mut new_slots = vec![Slot::EMPTY; new_cap];
        let mut new_count = 0;
        for slot in self.slots.drain(..) {
            if let Some(key) = slot.key {
                let idx = Self::find_entry(&new_slots, key, slot.hash);
                new_slots[idx] = slot;
                new_count += 1;
            }
        }
        self.slots = new_slots;
        self.count = new_count;
    }

    /// Inserts or overwrites `key`, returning `true` if `key` was not already present.
    pub fn insert(&mut self, key: StringRef, hash: u32, value: Value) -> bool {
        if self.slots.is_empty()
            || (self.count + 1) as f64 > self.slots.len() as f64 * MAX_LOAD
        {
            let new_cap = if self.slots.len() < 8 {
                8
            } else {
                self.slots.len() * 2
            };
            self.grow(new_cap);
        }

        let idx = Self::find_entry(&self.slots, key, hash);
        let slot = &mut self.slots[idx];
        let is_new_key = slot.key.is_none();
        if is_new_key && matches!(slot.value, Value::Nil) {
            self.count += 1;
        }
        slot.key = Some(key);
        slot.hash = hash;
        slot.value = value;
        is_new_key
    }

    #[must_use]
    pub fn get(&self, key: StringRef, hash: u32) -> Option<Value> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = Self::find_entry(&self.slots, key, hash);
        self.slots[idx].key.map(|_| self.slots[idx].value)
    }

    /// Removes `key`, leaving a tombstone behind. Returns `true` if it was present.
    pub fn remove(&mut self, key: StringRef, hash: u32) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        let idx = Self::find_entry(&self.slots, key, hash);
        if self.slots[idx].key.is_none() {
            return false;
        }
        self.slots[idx] = Slot {
            key: None,
            hash: 0,
            value: Value::Bool(true),
        };
        true
    }

    /// Looks up a not-yet-interned byte sequence by content rather than by
    /// [`StringRef`], comparing against the backing `strings` arena. Used
    /// exclusively by the interner to decide whether a candidate literal
    /// already has a canonical string object.
    #[must_use]
    pub fn find_by_bytes(&self, strings: &[QString], bytes: &[u8], hash: u32) -> Option<StringRef> {
        if self.slots.is_empty() {
            return None;
        }
        let cap = self.slots.len();
        let mut index = (hash as usize) % cap;
        loop {
            let slot = self.slots[index];
            match slot.key {
                None if matches!(slot.value, Value::Nil) => return None,
                None => {}
                Some(k) => {
                    let candidate = &strings[k.0 as usize];
                    if candidate.hash == hash && candidate.bytes.as_bytes() == bytes {
                        return Some(k);
                    }
                }
            }
            index = (index + 1) % cap;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::fnv1a;

    fn strings_with(names: &[&str]) -> Vec<QString> {
        names
            .iter()
            .map(|s| QString {
                bytes: Box::from(*s),
                hash: fnv1a(s.as_bytes()),
            })
            .collect()
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let mut t = Table::new();
        let key = StringRef(0);
        let hash = fnv1a(b"x");
        assert!(t.insert(key, hash, Value::Number(42.0)));
        assert_eq!(t.get(key, hash), Some(Value::Number(42.0)));
    }

    #[test]
    fn reinsert_reports_not_new() {
        let mut t = Table::new();
        let key = StringRef(0);
        let hash = fnv1a(b"x");
        assert!(t.insert(key, hash, Value::Bool(true)));
        assert!(!t.insert(key, hash, Value::Bool(false)));
        assert_eq!(t.get(key, hash), Some(Value::Bool(false)));
    }

    #[test]
    fn remove_then_lookup_misses_but_probe_continues_past_tombstone() {
        let strings = strings_with(&["a", "b"]);
        let mut t = Table::new();
        let a = StringRef(0);
        let b = StringRef(1);
        t.insert(a, strings[0].hash, Value::Nil);
        t.insert(b, strings[1].hash, Value::Nil);
        assert!(t.remove(a, strings[0].hash));
        assert_eq!(t.get(a, strings[0].hash), None);
        // b must still be reachable even though probing may have crossed a's tombstone.
        assert_eq!(t.get(b, strings[1].hash), Some(Value::Nil));
    }

    #[test]
    fn grows_past_load_factor_and_preserves_membership() {
        let names: Vec<String> = (0..64).map(|i| format!("ident{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let strings = strings_with(&refs);
        let mut t = Table::new();
        for (i, s) in strings.iter().enumerate() {
            t.insert(StringRef(i as u32), s.hash, Value::Number(i as f64));
        }
        for (i, s) in strings.iter().enumerate() {
            assert_eq!(t.get(StringRef(i as u32), s.hash), Some(Value::Number(i as f64)));
        }
    }

    #[test]
    fn find_by_bytes_locates_existing_content() {
        let strings = strings_with(&["hello", "world"]);
        let mut t = Table::new();
        t.insert(StringRef(0), strings[0].hash, Value::Nil);
        t.insert(StringRef(1), strings[1].hash, Value::Nil);
        let found = t.find_by_bytes(&strings, b"world", strings[1].hash);
        assert_eq!(found, Some(StringRef(1)));
        assert_eq!(t.find_by_bytes(&strings, b"nope", fnv1a(b"nope")), None);
    }
}
