//! On-disk snapshot codec: an RDB-style dump format for the keyspace.
//!
//! Layout: `"REDIS" "0009"` magic, an optional `0xFE`-tagged database
//! selector, then `(type-byte, key, value)*`, an `0xFF` terminator, and
//! an 8-byte checksum trailer (always zero — checksums are not
//! implemented). Lengths use a two-byte varint: the top two bits of the
//! first byte select 6-bit-immediate (`00`) or 14-bit-spanning-two-bytes
//! (`01`) encoding; larger lengths are rejected.
//!
//! `load` builds a whole new keyspace and only ever hands back a fully
//! parsed one — a truncated or corrupt file never partially overwrites
//! the caller's keyspace. `save` is not atomic: it writes `path`
//! directly rather than via a temp-file rename, so a crash mid-write can
//! leave a half-written snapshot on disk (see `DESIGN.md`).

use std::path::Path;

use bytes::Bytes;
use emberkv_core::value::{HashValue, ListValue, SetValue, Value, ZSetValue};
use emberkv_core::Keyspace;

const MAGIC: &[u8; 5] = b"REDIS";
const VERSION: &[u8; 4] = b"0009";

const TYPE_STRING: u8 = 0;
const TYPE_LIST: u8 = 1;
const TYPE_HASH: u8 = 2;
const TYPE_SET: u8 = 3;
const TYPE_ZSET: u8 = 4;

const OPCODE_DB: u8 = 0xFE;
const OPCODE_EOF: u8 = 0xFF;

const MAX_LEN: u64 = (1 << 14) - 1;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad magic bytes, not an emberkv snapshot")]
    InvalidMagic,
    #[error("unsupported snapshot version {0:?}")]
    UnsupportedVersion([u8; 4]),
    #[error("length {0} exceeds the 14-bit encoding this format supports")]
    LengthTooLarge(u64),
    #[error("unexpected end of snapshot data")]
    UnexpectedEof,
    #[error("unsupported value type byte {0}")]
    UnsupportedType(u8),
}

/// Writes `keyspace` to `path`. Not atomic — see the module docs.
pub fn save(path: &Path, keyspace: &Keyspace) -> Result<(), SnapshotError> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(VERSION);

    out.push(OPCODE_DB);
    write_len(&mut out, 0)?;

    for (key, value) in keyspace.iter() {
        write_key_value(&mut out, key, value)?;
    }

    out.push(OPCODE_EOF);
    out.extend_from_slice(&[0u8; 8]);

    std::fs::write(path, out)?;
    Ok(())
}

/// Loads a keyspace from `path`. On any error the caller's existing
/// keyspace is left untouched, since this builds a fresh one and only
/// returns it once parsing has fully succeeded.
pub fn load(path: &Path) -> Result<Keyspace, SnapshotError> {
    let buf = std::fs::read(path)?;
    let mut cursor = Cursor::new(&buf);

    let magic: [u8; 5] = cursor.read_exact(5)?.try_into().unwrap();
    if &magic != MAGIC {
        return Err(SnapshotError::InvalidMagic);
    }
    let version: [u8; 4] = cursor.read_exact(4)?.try_into().unwrap();
    if &version != VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    if cursor.peek_u8() == Some(OPCODE_DB) {
        cursor.read_u8()?;
        let _db_number = cursor.read_len()?;
    }

    let mut keyspace = Keyspace::new();
    loop {
        let type_byte = cursor.read_u8()?;
        if type_byte == OPCODE_EOF {
            break;
        }
        let key = cursor.read_string()?;
        let value = read_value(&mut cursor, type_byte)?;
        keyspace.store(key, value);
    }

    // Checksum trailer: present but never verified (always zero).
    let _ = cursor.read_exact(8);

    Ok(keyspace)
}

fn write_key_value(out: &mut Vec<u8>, key: &Bytes, value: &Value) -> Result<(), SnapshotError> {
    match value {
        Value::String(s) => {
            out.push(TYPE_STRING);
            write_string(out, key)?;
            write_string(out, s)?;
        }
        Value::Hash(h) => {
            out.push(TYPE_HASH);
            write_string(out, key)?;
            let entries = h.entries();
            write_len(out, entries.len() as u64)?;
            for (field, value) in entries {
                write_string(out, &field)?;
                write_string(out, &value)?;
            }
        }
        Value::List(l) => {
            out.push(TYPE_LIST);
            write_string(out, key)?;
            let items = l.items();
            write_len(out, items.len() as u64)?;
            for item in items {
                write_string(out, &item)?;
            }
        }
        Value::Set(s) => {
            out.push(TYPE_SET);
            write_string(out, key)?;
            let members = s.smembers();
            write_len(out, members.len() as u64)?;
            for member in members {
                write_string(out, &member)?;
            }
        }
        Value::ZSet(z) => {
            out.push(TYPE_ZSET);
            write_string(out, key)?;
            let entries = z.entries();
            write_len(out, entries.len() as u64)?;
            for (member, score) in entries {
                write_string(out, &member)?;
                out.extend_from_slice(&score.to_bits().to_be_bytes());
            }
        }
    }
    Ok(())
}

fn read_value(cursor: &mut Cursor, type_byte: u8) -> Result<Value, SnapshotError> {
    match type_byte {
        TYPE_STRING => Ok(Value::String(cursor.read_string()?)),
        TYPE_HASH => {
            let field_count = cursor.read_len()?;
            let mut hash = HashValue::new();
            for _ in 0..field_count {
                let field = cursor.read_string()?;
                let value = cursor.read_string()?;
                hash.hset(field, value);
            }
            Ok(Value::Hash(hash))
        }
        TYPE_LIST => {
            let count = cursor.read_len()?;
            let mut list = ListValue::new();
            for _ in 0..count {
                list.rpush(cursor.read_string()?);
            }
            Ok(Value::List(list))
        }
        TYPE_SET => {
            let count = cursor.read_len()?;
            let mut set = SetValue::new();
            for _ in 0..count {
                set.sadd(cursor.read_string()?);
            }
            Ok(Value::Set(set))
        }
        TYPE_ZSET => {
            let count = cursor.read_len()?;
            let mut zset = ZSetValue::new();
            for _ in 0..count {
                let member = cursor.read_string()?;
                let score = cursor.read_f64()?;
                zset.zadd(score, member);
            }
            Ok(Value::ZSet(zset))
        }
        other => Err(SnapshotError::UnsupportedType(other)),
    }
}

fn write_len(out: &mut Vec<u8>, len: u64) -> Result<(), SnapshotError> {
    if len < 64 {
        out.push(len as u8);
    } else if len <= MAX_LEN {
        let hi = ((len >> 8) & 0x3F) as u8;
        let lo = (len & 0xFF) as u8;
        out.push(0x40 | hi);
        out.push(lo);
    } else {
        return Err(SnapshotError::LengthTooLarge(len));
    }
    Ok(())
}

fn write_string(out: &mut Vec<u8>, s: &[u8]) -> Result<(), SnapshotError> {
    write_len(out, s.len() as u64)?;
    out.extend_from_slice(s);
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn read_u8(&mut self) -> Result<u8, SnapshotError> {
        let byte = *self.buf.get(self.pos).ok_or(SnapshotError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self.pos + n;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(SnapshotError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_len(&mut self) -> Result<u64, SnapshotError> {
        let byte0 = self.read_u8()?;
        match byte0 & 0xC0 {
            0x00 => Ok((byte0 & 0x3F) as u64),
            0x40 => {
                let byte1 = self.read_u8()?;
                Ok((((byte0 & 0x3F) as u64) << 8) | byte1 as u64)
            }
            _ => Err(SnapshotError::LengthTooLarge(byte0 as u64)),
        }
    }

    fn read_string(&mut self) -> Result<Bytes, SnapshotError> {
        let len = self.read_len()? as usize;
        Ok(Bytes::copy_from_slice(self.read_exact(len)?))
    }

    fn read_f64(&mut self) -> Result<f64, SnapshotError> {
        let bytes: [u8; 8] = self.read_exact(8)?.try_into().unwrap();
        Ok(f64::from_bits(u64::from_be_bytes(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("emberkv-snapshot-test-{}-{name}", std::process::id()))
    }

    #[test]
    fn round_trips_strings_and_hashes() {
        let mut ks = Keyspace::new();
        ks.store(Bytes::from("greeting"), Value::String(Bytes::from("hello")));
        let mut h = HashValue::new();
        h.hset(Bytes::from("f1"), Bytes::from("v1"));
        h.hset(Bytes::from("f2"), Bytes::from("v2"));
        ks.store(Bytes::from("profile"), Value::Hash(h));

        let path = temp_path("roundtrip.rdb");
        save(&path, &ks).expect("save");
        let loaded = load(&path).expect("load");
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.lookup(b"greeting").unwrap().as_string().unwrap(),
            &Bytes::from("hello")
        );
        let hash = loaded.lookup(b"profile").unwrap().as_hash().unwrap();
        assert_eq!(hash.hget(b"f1"), Some(Bytes::from("v1")));
        assert_eq!(hash.hget(b"f2"), Some(Bytes::from("v2")));
    }

    #[test]
    fn round_trips_lists_sets_and_zsets() {
        let mut ks = Keyspace::new();

        let mut list = ListValue::new();
        list.rpush(Bytes::from("a"));
        list.rpush(Bytes::from("b"));
        ks.store(Bytes::from("mylist"), Value::List(list));

        let mut set = SetValue::new();
        set.sadd(Bytes::from("1"));
        set.sadd(Bytes::from("not-a-number"));
        ks.store(Bytes::from("myset"), Value::Set(set));

        let mut zset = ZSetValue::new();
        zset.zadd(1.5, Bytes::from("x"));
        zset.zadd(-2.0, Bytes::from("y"));
        ks.store(Bytes::from("myzset"), Value::ZSet(zset));

        let path = temp_path("collections.rdb");
        save(&path, &ks).expect("save");
        let loaded = load(&path).expect("load");
        std::fs::remove_file(&path).ok();

        assert_eq!(
            loaded.lookup(b"mylist").unwrap().as_list().unwrap().items(),
            vec![Bytes::from("a"), Bytes::from("b")]
        );
        let set = loaded.lookup(b"myset").unwrap().as_set().unwrap();
        assert!(set.sismember(b"1"));
        assert!(set.sismember(b"not-a-number"));
        let zset = loaded.lookup(b"myzset").unwrap().as_zset().unwrap();
        assert_eq!(zset.zscore(b"x"), Some(1.5));
        assert_eq!(zset.zscore(b"y"), Some(-2.0));
    }

    #[test]
    fn empty_keyspace_round_trips() {
        let ks = Keyspace::new();
        let path = temp_path("empty.rdb");
        save(&path, &ks).expect("save");
        let loaded = load(&path).expect("load");
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.len(), 0);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let path = temp_path("badmagic.rdb");
        std::fs::write(&path, b"NOTRDB0009\xFF").unwrap();
        let result = load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(SnapshotError::InvalidMagic)));
    }

    #[test]
    fn load_missing_file_errors_without_touching_keyspace() {
        let path = temp_path("does-not-exist.rdb");
        assert!(load(&path).is_err());
    }

    #[test]
    fn length_varint_round_trips_across_both_encodings() {
        for len in [0u64, 1, 63, 64, 200, 16383] {
            let mut out = Vec::new();
            write_len(&mut out, len).unwrap();
            let mut cursor = Cursor::new(&out);
            assert_eq!(cursor.read_len().unwrap(), len);
        }
    }

    #[test]
    fn length_over_max_is_rejected() {
        let mut out = Vec::new();
        assert!(matches!(
            write_len(&mut out, 16384),
            Err(SnapshotError::LengthTooLarge(_))
        ));
    }
}
