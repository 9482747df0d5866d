//! Dict — a chained hash table with progressive rehashing.
//!
//! Two tables are kept: `tables[0]` is always live; `tables[1]` only
//! exists while a rehash is in flight. `rehash_idx` is -1 outside a
//! rehash, otherwise the next bucket of `tables[0]` due to migrate.
//! Every mutating operation (`set`, `del`) advances the rehash by one
//! bucket before doing its own work; `drive` advances it in batches from
//! the event loop's cron tick. See SPEC_FULL.md §4.1 for the exact
//! trigger thresholds this module implements.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use bytes::Bytes;

const INIT_SIZE: usize = 4;
const SHRINK_MIN_FILL_PCT: u64 = 10;
const DRIVE_BATCH: usize = 100;

struct Entry<V> {
    key: Bytes,
    value: V,
    next: Option<Box<Entry<V>>>,
}

/// A chained hash table keyed by raw bytes, with progressive rehashing.
pub struct Dict<V> {
    tables: [Vec<Option<Box<Entry<V>>>>; 2],
    used: usize,
    rehash_idx: i64,
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Dict<V> {
    pub fn new() -> Self {
        let mut ht0 = Vec::with_capacity(INIT_SIZE);
        ht0.resize_with(INIT_SIZE, || None);
        Self {
            tables: [ht0, Vec::new()],
            used: 0,
            rehash_idx: -1,
        }
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx != -1
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Table 0's bucket count — the size the rehashing invariants are
    /// stated in terms of.
    pub fn primary_capacity(&self) -> usize {
        self.tables[0].len()
    }

    fn hash_index(key: &[u8], modulus: usize) -> usize {
        debug_assert!(modulus > 0);
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % modulus
    }

    fn find<'a>(table: &'a [Option<Box<Entry<V>>>], key: &[u8]) -> Option<&'a Entry<V>> {
        if table.is_empty() {
            return None;
        }
        let idx = Self::hash_index(key, table.len());
        let mut cur = table[idx].as_deref();
        while let Some(entry) = cur {
            if entry.key.as_ref() == key {
                return Some(entry);
            }
            cur = entry.next.as_deref();
        }
        None
    }

    fn find_mut<'a>(table: &'a mut [Option<Box<Entry<V>>>], key: &[u8]) -> Option<&'a mut V> {
        if table.is_empty() {
            return None;
        }
        let idx = Self::hash_index(key, table.len());
        let mut cur = table[idx].as_deref_mut();
        while let Some(entry) = cur {
            if entry.key.as_ref() == key {
                return Some(&mut entry.value);
            }
            cur = entry.next.as_deref_mut();
        }
        None
    }

    /// Looks up `key`, probing `tables[0]` then, while rehashing,
    /// `tables[1]`.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        if let Some(entry) = Self::find(&self.tables[0], key) {
            return Some(&entry.value);
        }
        if self.is_rehashing() {
            if let Some(entry) = Self::find(&self.tables[1], key) {
                return Some(&entry.value);
            }
        }
        None
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let rehashing = self.is_rehashing();
        if Self::find(&self.tables[0], key).is_some() {
            return Self::find_mut(&mut self.tables[0], key);
        }
        if rehashing && Self::find(&self.tables[1], key).is_some() {
            return Self::find_mut(&mut self.tables[1], key);
        }
        None
    }

    /// Inserts or updates `key`. Returns `true` if this created a new
    /// entry (as opposed to overwriting an existing one).
    pub fn set(&mut self, key: Bytes, value: V) -> bool {
        if self.is_rehashing() {
            self.rehash_step(1);
        }

        if self.is_rehashing() {
            if let Some(slot) = Self::find_mut(&mut self.tables[0], &key) {
                *slot = value;
                return false;
            }
            self.insert_into(1, key, value);
            self.used += 1;
            return true;
        }

        if let Some(slot) = Self::find_mut(&mut self.tables[0], &key) {
            *slot = value;
            return false;
        }
        self.insert_into(0, key, value);
        self.used += 1;
        self.maybe_expand();
        true
    }

    fn insert_into(&mut self, table: usize, key: Bytes, value: V) {
        let idx = Self::hash_index(&key, self.tables[table].len());
        let next = self.tables[table][idx].take();
        self.tables[table][idx] = Some(Box::new(Entry { key, value, next }));
    }

    /// Removes `key` if present. Returns whether it was present.
    pub fn del(&mut self, key: &[u8]) -> bool {
        if self.is_rehashing() {
            self.rehash_step(1);
        }

        if self.remove_from(0, key) {
            self.used -= 1;
            if !self.is_rehashing() {
                self.maybe_shrink();
            }
            return true;
        }
        if self.is_rehashing() && self.remove_from(1, key) {
            self.used -= 1;
            return true;
        }
        false
    }

    fn remove_from(&mut self, table: usize, key: &[u8]) -> bool {
        if self.tables[table].is_empty() {
            return false;
        }
        let idx = Self::hash_index(key, self.tables[table].len());
        let mut slot = &mut self.tables[table][idx];
        loop {
            match slot {
                None => return false,
                Some(entry) if entry.key.as_ref() == key => {
                    let next = entry.next.take();
                    *slot = next;
                    return true;
                }
                Some(entry) => {
                    slot = &mut entry.next;
                }
            }
        }
    }

    fn maybe_expand(&mut self) {
        if self.is_rehashing() {
            return;
        }
        if self.used >= self.tables[0].len() {
            let new_size = next_power_of_two(2 * self.used.max(1));
            self.begin_rehash(new_size);
        }
    }

    fn maybe_shrink(&mut self) {
        if self.is_rehashing() {
            return;
        }
        let size = self.tables[0].len();
        if size > INIT_SIZE && (self.used as u64 * 100) / (size as u64) < SHRINK_MIN_FILL_PCT {
            let new_size = (size / 2).max(INIT_SIZE);
            self.begin_rehash(new_size);
        }
    }

    fn begin_rehash(&mut self, new_size: usize) {
        let mut ht1 = Vec::with_capacity(new_size);
        ht1.resize_with(new_size, || None);
        self.tables[1] = ht1;
        self.rehash_idx = 0;
    }

    /// Advances the rehash by up to `n` bucket migrations. Returns
    /// whether rehashing is still in progress afterward.
    pub fn rehash_step(&mut self, n: usize) -> bool {
        if !self.is_rehashing() {
            return false;
        }
        let size0 = self.tables[0].len();
        if size0 == 0 {
            self.rehash_idx = -1;
            return false;
        }

        let mut steps = n;
        let mut empty_visits = 0usize;
        while steps > 0 && self.used > 0 {
            while (self.rehash_idx as usize) < size0
                && self.tables[0][self.rehash_idx as usize].is_none()
            {
                self.rehash_idx += 1;
                empty_visits += 1;
                if empty_visits > 10 * n {
                    return true;
                }
            }

            if self.rehash_idx as usize >= size0 {
                self.finish_rehash();
                return false;
            }

            let mut chain = self.tables[0][self.rehash_idx as usize].take();
            let ht1_len = self.tables[1].len();
            while let Some(mut entry) = chain {
                chain = entry.next.take();
                let idx1 = Self::hash_index(&entry.key, ht1_len);
                entry.next = self.tables[1][idx1].take();
                self.tables[1][idx1] = Some(entry);
            }
            self.rehash_idx += 1;
            steps -= 1;
        }

        true
    }

    fn finish_rehash(&mut self) {
        self.tables[0] = std::mem::take(&mut self.tables[1]);
        self.tables[1] = Vec::new();
        self.rehash_idx = -1;
    }

    /// Drives the rehash in 100-bucket batches until either it finishes
    /// or the monotonic clock passes `deadline`.
    pub fn drive(&mut self, deadline: Instant) {
        while self.is_rehashing() {
            self.rehash_step(DRIVE_BATCH);
            if Instant::now() >= deadline {
                break;
            }
        }
    }

    /// Iterates every (key, value) across both tables. Order is
    /// unspecified and may change across a rehash.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &V)> {
        self.tables.iter().flat_map(|table| {
            table.iter().flat_map(|head| {
                let mut cur = head.as_deref();
                std::iter::from_fn(move || {
                    let entry = cur?;
                    cur = entry.next.as_deref();
                    Some((&entry.key, &entry.value))
                })
            })
        })
    }
}

fn next_power_of_two(mut n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    n -= 1;
    let mut p = 1usize;
    while p <= n {
        p <<= 1;
    }
    p
}
