//! Value objects — the tagged union of types a key can hold, each with
//! one or more internal encodings.
//!
//! Every mutating operation on a compact encoding checks, before it
//! writes anything, whether the write would cross a promotion
//! threshold; if so it promotes first and then applies the write to the
//! promoted representation. Promotion is one-way and must never be
//! observable except through `encoding()`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use crate::dict::Dict;

pub const HASH_MAX_COMPACT_ENTRIES: usize = 512;
pub const HASH_MAX_COMPACT_FIELD_LEN: usize = 64;
pub const LIST_MAX_COMPACT_ENTRIES: usize = 512;
pub const LIST_MAX_COMPACT_VALUE_LEN: usize = 64;
pub const SET_MAX_INTSET_ENTRIES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    String,
    Hash,
    List,
    Set,
    ZSet,
}

impl ObjectType {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectType::String => "string",
            ObjectType::Hash => "hash",
            ObjectType::List => "list",
            ObjectType::Set => "set",
            ObjectType::ZSet => "zset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    HashCompact,
    HashTable,
    ListCompact,
    ListQueue,
    SetIntset,
    SetHashTable,
    ZSetSkiplist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
}

/// The logical value stored for one key.
pub enum Value {
    String(Bytes),
    Hash(HashValue),
    List(ListValue),
    Set(SetValue),
    ZSet(ZSetValue),
}

impl Value {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Value::String(_) => ObjectType::String,
            Value::Hash(_) => ObjectType::Hash,
            Value::List(_) => ObjectType::List,
            Value::Set(_) => ObjectType::Set,
            Value::ZSet(_) => ObjectType::ZSet,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Value::String(_) => Encoding::Raw,
            Value::Hash(h) => h.encoding(),
            Value::List(l) => l.encoding(),
            Value::Set(s) => s.encoding(),
            Value::ZSet(_) => Encoding::ZSetSkiplist,
        }
    }

    pub fn as_string(&self) -> Result<&Bytes, ValueError> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(ValueError::WrongType),
        }
    }

    pub fn as_hash(&self) -> Result<&HashValue, ValueError> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(ValueError::WrongType),
        }
    }

    pub fn as_hash_mut(&mut self) -> Result<&mut HashValue, ValueError> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(ValueError::WrongType),
        }
    }

    pub fn as_list(&self) -> Result<&ListValue, ValueError> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(ValueError::WrongType),
        }
    }

    pub fn as_list_mut(&mut self) -> Result<&mut ListValue, ValueError> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(ValueError::WrongType),
        }
    }

    pub fn as_set(&self) -> Result<&SetValue, ValueError> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(ValueError::WrongType),
        }
    }

    pub fn as_set_mut(&mut self) -> Result<&mut SetValue, ValueError> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(ValueError::WrongType),
        }
    }

    pub fn as_zset(&self) -> Result<&ZSetValue, ValueError> {
        match self {
            Value::ZSet(z) => Ok(z),
            _ => Err(ValueError::WrongType),
        }
    }

    pub fn as_zset_mut(&mut self) -> Result<&mut ZSetValue, ValueError> {
        match self {
            Value::ZSet(z) => Ok(z),
            _ => Err(ValueError::WrongType),
        }
    }
}

// ── Hash ──────────────────────────────────────────────────────────────────

pub enum HashValue {
    Compact(Vec<(Bytes, Bytes)>),
    Table(Dict<Bytes>),
}

impl HashValue {
    pub fn new() -> Self {
        HashValue::Compact(Vec::new())
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            HashValue::Compact(_) => Encoding::HashCompact,
            HashValue::Table(_) => Encoding::HashTable,
        }
    }

    fn would_exceed_threshold(entries: usize, field: &[u8], value: &[u8]) -> bool {
        entries >= HASH_MAX_COMPACT_ENTRIES
            || field.len() > HASH_MAX_COMPACT_FIELD_LEN
            || value.len() > HASH_MAX_COMPACT_FIELD_LEN
    }

    fn promote(entries: Vec<(Bytes, Bytes)>) -> Dict<Bytes> {
        let mut dict = Dict::new();
        for (field, value) in entries {
            dict.set(field, value);
        }
        dict
    }

    /// Sets `field` to `value`. Returns whether `field` was newly
    /// inserted.
    pub fn hset(&mut self, field: Bytes, value: Bytes) -> bool {
        if let HashValue::Compact(entries) = self {
            let existing = entries.iter().position(|(f, _)| f == &field);
            let next_count = if existing.is_some() {
                entries.len()
            } else {
                entries.len() + 1
            };
            if Self::would_exceed_threshold(next_count, &field, &value) {
                let mut dict = Self::promote(std::mem::take(entries));
                let inserted = dict.set(field, value);
                *self = HashValue::Table(dict);
                return inserted;
            }
            if let Some(idx) = existing {
                entries[idx].1 = value;
                return false;
            }
            entries.push((field, value));
            return true;
        }
        match self {
            HashValue::Table(dict) => dict.set(field, value),
            HashValue::Compact(_) => unreachable!(),
        }
    }

    pub fn hget(&self, field: &[u8]) -> Option<Bytes> {
        match self {
            HashValue::Compact(entries) => entries
                .iter()
                .find(|(f, _)| f.as_ref() == field)
                .map(|(_, v)| v.clone()),
            HashValue::Table(dict) => dict.get(field).cloned(),
        }
    }

    pub fn hdel(&mut self, field: &[u8]) -> bool {
        match self {
            HashValue::Compact(entries) => {
                if let Some(idx) = entries.iter().position(|(f, _)| f.as_ref() == field) {
                    entries.remove(idx);
                    true
                } else {
                    false
                }
            }
            HashValue::Table(dict) => dict.del(field),
        }
    }

    pub fn hexists(&self, field: &[u8]) -> bool {
        match self {
            HashValue::Compact(entries) => entries.iter().any(|(f, _)| f.as_ref() == field),
            HashValue::Table(dict) => dict.contains(field),
        }
    }

    pub fn hlen(&self) -> usize {
        match self {
            HashValue::Compact(entries) => entries.len(),
            HashValue::Table(dict) => dict.len(),
        }
    }

    pub fn entries(&self) -> Vec<(Bytes, Bytes)> {
        match self {
            HashValue::Compact(entries) => entries.clone(),
            HashValue::Table(dict) => dict.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    /// The Dict backing this hash if it has been promoted, for the
    /// keyspace's `rehashing_dicts()` enumeration.
    pub fn dict_mut(&mut self) -> Option<&mut Dict<Bytes>> {
        match self {
            HashValue::Table(dict) => Some(dict),
            HashValue::Compact(_) => None,
        }
    }
}

impl Default for HashValue {
    fn default() -> Self {
        Self::new()
    }
}

// ── List ──────────────────────────────────────────────────────────────────

use std::collections::VecDeque;

pub enum ListValue {
    Compact(Vec<Bytes>),
    Queue(VecDeque<Bytes>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Before,
    After,
}

impl ListValue {
    pub fn new() -> Self {
        ListValue::Compact(Vec::new())
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            ListValue::Compact(_) => Encoding::ListCompact,
            ListValue::Queue(_) => Encoding::ListQueue,
        }
    }

    fn would_exceed_threshold(len_after: usize, value: &[u8]) -> bool {
        len_after >= LIST_MAX_COMPACT_ENTRIES || value.len() > LIST_MAX_COMPACT_VALUE_LEN
    }

    fn promote(&mut self) -> &mut VecDeque<Bytes> {
        if let ListValue::Compact(items) = self {
            let queue: VecDeque<Bytes> = std::mem::take(items).into();
            *self = ListValue::Queue(queue);
        }
        match self {
            ListValue::Queue(q) => q,
            ListValue::Compact(_) => unreachable!(),
        }
    }

    fn ensure_capacity_for_push(&mut self, value: &Bytes) {
        if let ListValue::Compact(items) = self {
            if Self::would_exceed_threshold(items.len() + 1, value) {
                self.promote();
            }
        }
    }

    pub fn lpush(&mut self, value: Bytes) -> usize {
        self.ensure_capacity_for_push(&value);
        match self {
            ListValue::Compact(items) => {
                items.insert(0, value);
                items.len()
            }
            ListValue::Queue(q) => {
                q.push_front(value);
                q.len()
            }
        }
    }

    pub fn rpush(&mut self, value: Bytes) -> usize {
        self.ensure_capacity_for_push(&value);
        match self {
            ListValue::Compact(items) => {
                items.push(value);
                items.len()
            }
            ListValue::Queue(q) => {
                q.push_back(value);
                q.len()
            }
        }
    }

    pub fn lpop(&mut self) -> Option<Bytes> {
        match self {
            ListValue::Compact(items) => {
                if items.is_empty() {
                    None
                } else {
                    Some(items.remove(0))
                }
            }
            ListValue::Queue(q) => q.pop_front(),
        }
    }

    pub fn rpop(&mut self) -> Option<Bytes> {
        match self {
            ListValue::Compact(items) => items.pop(),
            ListValue::Queue(q) => q.pop_back(),
        }
    }

    fn normalize_index(index: i64, len: usize) -> Option<usize> {
        let len = len as i64;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            None
        } else {
            Some(idx as usize)
        }
    }

    pub fn lindex(&self, index: i64) -> Option<Bytes> {
        match self {
            ListValue::Compact(items) => {
                Self::normalize_index(index, items.len()).map(|i| items[i].clone())
            }
            ListValue::Queue(q) => Self::normalize_index(index, q.len()).map(|i| q[i].clone()),
        }
    }

    pub fn llen(&self) -> usize {
        match self {
            ListValue::Compact(items) => items.len(),
            ListValue::Queue(q) => q.len(),
        }
    }

    fn as_vec(&self) -> Vec<Bytes> {
        match self {
            ListValue::Compact(items) => items.clone(),
            ListValue::Queue(q) => q.iter().cloned().collect(),
        }
    }

    /// All elements in order, head to tail — for snapshotting.
    pub fn items(&self) -> Vec<Bytes> {
        self.as_vec()
    }

    fn replace_with(&mut self, items: Vec<Bytes>) {
        match self {
            ListValue::Compact(slot) => *slot = items,
            ListValue::Queue(slot) => *slot = items.into(),
        }
    }

    pub fn lrange(&self, start: i64, stop: i64) -> Vec<Bytes> {
        let items = self.as_vec();
        match normalize_range(start, stop, items.len()) {
            Some((s, e)) => items[s..=e].to_vec(),
            None => Vec::new(),
        }
    }

    /// Removes up to `count` occurrences of `value`: positive scans
    /// head-to-tail, negative tail-to-head, zero removes all.
    pub fn lrem(&mut self, count: i64, value: &[u8]) -> i64 {
        let mut items = self.as_vec();
        let mut removed = 0i64;
        if count >= 0 {
            let limit = if count == 0 { usize::MAX } else { count as usize };
            let mut kept = Vec::with_capacity(items.len());
            for item in items.drain(..) {
                if (removed as usize) < limit && item.as_ref() == value {
                    removed += 1;
                } else {
                    kept.push(item);
                }
            }
            items = kept;
        } else {
            let limit = (-count) as usize;
            let mut kept = Vec::with_capacity(items.len());
            for item in items.into_iter().rev() {
                if (removed as usize) < limit && item.as_ref() == value {
                    removed += 1;
                } else {
                    kept.push(item);
                }
            }
            kept.reverse();
            items = kept;
        }
        self.replace_with(items);
        removed
    }

    /// Trims the list to the inclusive, clamped `[start, stop]` range.
    pub fn ltrim(&mut self, start: i64, stop: i64) {
        let items = self.as_vec();
        let trimmed = match normalize_range(start, stop, items.len()) {
            Some((s, e)) => items[s..=e].to_vec(),
            None => Vec::new(),
        };
        self.replace_with(trimmed);
    }

    /// Inserts `value` before or after the first occurrence of `pivot`.
    /// Returns the new length, or `None` if `pivot` was not found.
    pub fn linsert(&mut self, pivot: &[u8], value: Bytes, pos: InsertPosition) -> Option<usize> {
        let mut items = self.as_vec();
        let at = items.iter().position(|v| v.as_ref() == pivot)?;
        let insert_at = match pos {
            InsertPosition::Before => at,
            InsertPosition::After => at + 1,
        };
        items.insert(insert_at, value);
        let len = items.len();
        self.replace_with(items);
        Some(len)
    }
}

impl Default for ListValue {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let norm = |i: i64| -> i64 {
        let v = if i < 0 { len_i + i } else { i };
        v.clamp(0, len_i - 1)
    };
    let mut s = if start < -len_i { 0 } else { norm(start) };
    let e = if stop < -len_i { return None } else { norm(stop) };
    if start >= len_i {
        return None;
    }
    if s > e {
        return None;
    }
    if s < 0 {
        s = 0;
    }
    Some((s as usize, e as usize))
}

// ── Set ───────────────────────────────────────────────────────────────────

use crate::intset::IntSet;

pub enum SetValue {
    Intset(IntSet),
    Table(HashSet<Bytes>),
}

impl SetValue {
    pub fn new() -> Self {
        SetValue::Intset(IntSet::new())
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            SetValue::Intset(_) => Encoding::SetIntset,
            SetValue::Table(_) => Encoding::SetHashTable,
        }
    }

    fn parse_int(member: &[u8]) -> Option<i64> {
        std::str::from_utf8(member).ok()?.parse().ok()
    }

    fn promote(intset: &IntSet) -> HashSet<Bytes> {
        intset
            .data()
            .iter()
            .map(|n| Bytes::from(n.to_string()))
            .collect()
    }

    /// Adds `member`. Returns whether it was newly inserted.
    pub fn sadd(&mut self, member: Bytes) -> bool {
        if let SetValue::Intset(intset) = self {
            match Self::parse_int(&member) {
                Some(n) if intset.contains(n) => return false,
                Some(n) if intset.len() + 1 <= SET_MAX_INTSET_ENTRIES => {
                    return intset.insert(n);
                }
                _ => {
                    let mut table = Self::promote(intset);
                    let inserted = table.insert(member);
                    *self = SetValue::Table(table);
                    return inserted;
                }
            }
        }
        match self {
            SetValue::Table(table) => table.insert(member),
            SetValue::Intset(_) => unreachable!(),
        }
    }

    pub fn srem(&mut self, member: &[u8]) -> bool {
        match self {
            SetValue::Intset(intset) => match Self::parse_int(member) {
                Some(n) => intset.erase(n),
                None => false,
            },
            SetValue::Table(table) => table.remove(member),
        }
    }

    pub fn sismember(&self, member: &[u8]) -> bool {
        match self {
            SetValue::Intset(intset) => match Self::parse_int(member) {
                Some(n) => intset.contains(n),
                None => false,
            },
            SetValue::Table(table) => table.contains(member),
        }
    }

    pub fn scard(&self) -> usize {
        match self {
            SetValue::Intset(intset) => intset.len(),
            SetValue::Table(table) => table.len(),
        }
    }

    pub fn smembers(&self) -> Vec<Bytes> {
        match self {
            SetValue::Intset(intset) => intset
                .data()
                .iter()
                .map(|n| Bytes::from(n.to_string()))
                .collect(),
            SetValue::Table(table) => table.iter().cloned().collect(),
        }
    }
}

impl Default for SetValue {
    fn default() -> Self {
        Self::new()
    }
}

// ── ZSet ──────────────────────────────────────────────────────────────────

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoreKey(f64);

impl Eq for ScoreKey {}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct ZSetValue {
    scores: HashMap<Bytes, f64>,
    ordered: BTreeSet<(ScoreKey, Bytes)>,
}

impl ZSetValue {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            ordered: BTreeSet::new(),
        }
    }

    /// Sets `member`'s score. Returns whether `member` was newly added.
    pub fn zadd(&mut self, score: f64, member: Bytes) -> bool {
        if let Some(&old) = self.scores.get(&member) {
            self.ordered.remove(&(ScoreKey(old), member.clone()));
            self.ordered.insert((ScoreKey(score), member.clone()));
            self.scores.insert(member, score);
            false
        } else {
            self.ordered.insert((ScoreKey(score), member.clone()));
            self.scores.insert(member, score);
            true
        }
    }

    pub fn zrem(&mut self, member: &[u8]) -> bool {
        if let Some((key, score)) = self.scores.remove_entry(member) {
            self.ordered.remove(&(ScoreKey(score), key));
            true
        } else {
            false
        }
    }

    pub fn zscore(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Members with `min <= score <= max`, ordered by score ascending
    /// then member lexicographically ascending.
    pub fn zrangebyscore(&self, min: f64, max: f64) -> Vec<(Bytes, f64)> {
        self.ordered
            .iter()
            .filter(|(ScoreKey(score), _)| *score >= min && *score <= max)
            .map(|(ScoreKey(score), member)| (member.clone(), *score))
            .collect()
    }

    /// Zero-based rank of `member` in score-ascending order.
    pub fn zrank(&self, member: &[u8]) -> Option<usize> {
        let score = self.zscore(member)?;
        self.ordered
            .iter()
            .position(|(ScoreKey(s), m)| *s == score && m.as_ref() == member)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// All (member, score) pairs in score-ascending order — for
    /// snapshotting.
    pub fn entries(&self) -> Vec<(Bytes, f64)> {
        self.ordered
            .iter()
            .map(|(ScoreKey(score), member)| (member.clone(), *score))
            .collect()
    }
}

impl Default for ZSetValue {
    fn default() -> Self {
        Self::new()
    }
}
