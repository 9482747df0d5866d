//! Keyspace — the top-level key → value mapping for one database.
//!
//! A thin, single-threaded wrapper over `Dict<Value>`. There is no
//! locking here: the event loop owns the keyspace exclusively and every
//! command runs to completion before the next one starts.

use bytes::Bytes;

use crate::dict::Dict;
use crate::value::{Encoding, Value};

pub struct Keyspace {
    dict: Dict<Value>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self { dict: Dict::new() }
    }

    pub fn lookup(&self, key: &[u8]) -> Option<&Value> {
        self.dict.get(key)
    }

    pub fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.dict.get_mut(key)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.dict.contains(key)
    }

    pub fn store(&mut self, key: Bytes, value: Value) {
        self.dict.set(key, value);
    }

    /// Fetches the existing value for `key`, or inserts `default()` and
    /// returns a handle to it. Used by mutating commands (`HSET`,
    /// `LPUSH`, ...) that implicitly create the key.
    pub fn get_or_insert_with(
        &mut self,
        key: &[u8],
        default: impl FnOnce() -> Value,
    ) -> &mut Value {
        if !self.dict.contains(key) {
            self.dict.set(Bytes::copy_from_slice(key), default());
        }
        self.dict.get_mut(key).expect("just inserted")
    }

    /// Deletes each of `keys`. Returns the count actually removed.
    pub fn delete_many(&mut self, keys: &[Bytes]) -> usize {
        keys.iter().filter(|k| self.dict.del(k)).count()
    }

    /// Counts how many of `keys` currently exist, duplicates counted
    /// once per occurrence in `keys` (matching EXISTS's multi-key form).
    pub fn exists_many(&self, keys: &[Bytes]) -> usize {
        keys.iter().filter(|k| self.dict.contains(k)).count()
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Keys matching `pattern`. Only the single wildcard `*` (match
    /// everything) is supported; any other pattern returns an empty
    /// sequence rather than attempting glob matching.
    pub fn all_keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        if pattern == b"*" {
            self.dict.iter().map(|(k, _)| k.clone()).collect()
        } else {
            Vec::new()
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Value)> {
        self.dict.iter()
    }

    /// Keys of promoted Hash values, i.e. those with their own
    /// internally-rehashing Dict, as of the last call. Used by the cron
    /// tick to find nested dicts to drive without needing a safe mutable
    /// iterator over the keyspace's own Dict.
    fn promoted_hash_keys(&self) -> Vec<Bytes> {
        self.dict
            .iter()
            .filter(|(_, v)| v.encoding() == Encoding::HashTable)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drives the top-level dict's rehash, then every promoted Hash's
    /// internal dict, all against the same deadline.
    pub fn drive(&mut self, deadline: std::time::Instant) {
        self.dict.drive(deadline);
        for key in self.promoted_hash_keys() {
            if std::time::Instant::now() >= deadline {
                break;
            }
            if let Some(Value::Hash(h)) = self.dict.get_mut(&key) {
                if let Some(d) = h.dict_mut() {
                    d.drive(deadline);
                }
            }
        }
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_lookup_roundtrip() {
        let mut ks = Keyspace::new();
        ks.store(Bytes::from("k"), Value::String(Bytes::from("v")));
        assert!(ks.exists(b"k"));
        assert_eq!(ks.lookup(b"k").unwrap().as_string().unwrap(), &Bytes::from("v"));
    }

    #[test]
    fn delete_many_counts_removed() {
        let mut ks = Keyspace::new();
        ks.store(Bytes::from("a"), Value::String(Bytes::from("1")));
        ks.store(Bytes::from("b"), Value::String(Bytes::from("2")));
        let removed = ks.delete_many(&[Bytes::from("a"), Bytes::from("missing")]);
        assert_eq!(removed, 1);
        assert!(!ks.exists(b"a"));
        assert!(ks.exists(b"b"));
    }

    #[test]
    fn all_keys_only_supports_star_wildcard() {
        let mut ks = Keyspace::new();
        ks.store(Bytes::from("a"), Value::String(Bytes::from("1")));
        ks.store(Bytes::from("b"), Value::String(Bytes::from("2")));
        assert_eq!(ks.all_keys(b"*").len(), 2);
        assert!(ks.all_keys(b"a*").is_empty());
    }

    #[test]
    fn get_or_insert_with_creates_once() {
        let mut ks = Keyspace::new();
        {
            let v = ks.get_or_insert_with(b"h", || Value::Hash(Default::default()));
            v.as_hash_mut().unwrap().hset(Bytes::from("f"), Bytes::from("v"));
        }
        assert_eq!(ks.len(), 1);
        let v = ks.lookup(b"h").unwrap();
        assert_eq!(v.as_hash().unwrap().hlen(), 1);
    }
}
