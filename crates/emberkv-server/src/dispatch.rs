//! Command dispatch — a case-insensitive name → handler table.
//!
//! Every handler takes the raw argument vector (including the command
//! name at index 0) and returns the reply to send back. Arity and type
//! are validated before any mutation; a rejected command leaves the
//! keyspace untouched.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use emberkv_core::error::CommandError;
use emberkv_core::value::{HashValue, ListValue, SetValue, Value, ZSetValue};
use emberkv_core::Keyspace;
use emberkv_proto::Reply;

pub struct Dispatcher {
    snapshot_path: PathBuf,
}

impl Dispatcher {
    pub fn new(snapshot_path: PathBuf) -> Self {
        Self { snapshot_path }
    }

    pub fn dispatch(&self, keyspace: &mut Keyspace, args: &[Bytes]) -> Reply {
        let Some(name) = args.first() else {
            return Reply::Error(CommandError::UnknownCommand(String::new()).to_string());
        };
        let upper = name.to_ascii_uppercase();

        match upper.as_slice() {
            b"PING" => cmd_ping(args),
            b"SET" => cmd_set(keyspace, args),
            b"GET" => cmd_get(keyspace, args),
            b"HSET" => cmd_hset(keyspace, args),
            b"HGET" => cmd_hget(keyspace, args),
            b"HDEL" => cmd_hdel(keyspace, args),
            b"HEXISTS" => cmd_hexists(keyspace, args),
            b"HLEN" => cmd_hlen(keyspace, args),
            b"HGETALL" => cmd_hgetall(keyspace, args),
            b"DEL" => cmd_del(keyspace, args),
            b"EXISTS" => cmd_exists(keyspace, args),
            b"KEYS" => cmd_keys(keyspace, args),
            b"SAVE" => cmd_save(keyspace, args, &self.snapshot_path),
            b"TYPE" => cmd_type(keyspace, args),
            b"LPUSH" => cmd_push(keyspace, args, Push::Left),
            b"RPUSH" => cmd_push(keyspace, args, Push::Right),
            b"LPOP" => cmd_pop(keyspace, args, Push::Left),
            b"RPOP" => cmd_pop(keyspace, args, Push::Right),
            b"LINDEX" => cmd_lindex(keyspace, args),
            b"LLEN" => cmd_llen(keyspace, args),
            b"LRANGE" => cmd_lrange(keyspace, args),
            b"LTRIM" => cmd_ltrim(keyspace, args),
            b"LREM" => cmd_lrem(keyspace, args),
            b"SADD" => cmd_sadd(keyspace, args),
            b"SREM" => cmd_srem(keyspace, args),
            b"SISMEMBER" => cmd_sismember(keyspace, args),
            b"SCARD" => cmd_scard(keyspace, args),
            b"SMEMBERS" => cmd_smembers(keyspace, args),
            b"ZADD" => cmd_zadd(keyspace, args),
            b"ZSCORE" => cmd_zscore(keyspace, args),
            b"ZRANK" => cmd_zrank(keyspace, args),
            b"ZRANGEBYSCORE" => cmd_zrangebyscore(keyspace, args),
            _ => err(CommandError::UnknownCommand(
                String::from_utf8_lossy(name).to_string(),
            )),
        }
    }
}

fn err(e: CommandError) -> Reply {
    Reply::Error(e.to_string())
}

fn arity_exact(args: &[Bytes], n: usize, name: &str) -> Result<(), CommandError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(CommandError::WrongArity(name.to_string()))
    }
}

fn arity_at_least(args: &[Bytes], n: usize, name: &str) -> Result<(), CommandError> {
    if args.len() >= n {
        Ok(())
    } else {
        Err(CommandError::WrongArity(name.to_string()))
    }
}

fn parse_i64(b: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}

fn parse_f64(b: &[u8]) -> Result<f64, CommandError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAFloat)
}

fn run(f: impl FnOnce() -> Result<Reply, CommandError>) -> Reply {
    match f() {
        Ok(reply) => reply,
        Err(e) => err(e),
    }
}

// ── String / generic ────────────────────────────────────────────────────────

fn cmd_ping(args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 1, "ping")?;
        Ok(Reply::SimpleString("PONG".to_string()))
    })
}

fn cmd_set(keyspace: &mut Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_at_least(args, 3, "set")?;
        keyspace.store(args[1].clone(), Value::String(args[2].clone()));
        Ok(Reply::ok())
    })
}

fn cmd_get(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 2, "get")?;
        match keyspace.lookup(&args[1]) {
            None => Ok(Reply::nil()),
            Some(value) => Ok(Reply::bulk(value.as_string()?.clone())),
        }
    })
}

fn cmd_del(keyspace: &mut Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_at_least(args, 2, "del")?;
        let removed = keyspace.delete_many(&args[1..]);
        Ok(Reply::Integer(removed as i64))
    })
}

fn cmd_exists(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_at_least(args, 2, "exists")?;
        let found = keyspace.exists_many(&args[1..]);
        Ok(Reply::Integer(found as i64))
    })
}

fn cmd_keys(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 2, "keys")?;
        let keys = keyspace.all_keys(&args[1]);
        Ok(Reply::array(keys.into_iter().map(Reply::bulk).collect()))
    })
}

fn cmd_save(keyspace: &Keyspace, args: &[Bytes], path: &Path) -> Reply {
    run(|| {
        arity_exact(args, 1, "save")?;
        match emberkv_snapshot::save(path, keyspace) {
            Ok(()) => Ok(Reply::ok()),
            Err(e) => {
                tracing::error!(error = %e, "snapshot save failed");
                Ok(Reply::Error("ERR Failed to save RDB".to_string()))
            }
        }
    })
}

fn cmd_type(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 2, "type")?;
        let name = match keyspace.lookup(&args[1]) {
            None => "none",
            Some(value) => value.object_type().name(),
        };
        Ok(Reply::SimpleString(name.to_string()))
    })
}

// ── Hash ──────────────────────────────────────────────────────────────────

fn cmd_hset(keyspace: &mut Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        if args.len() < 4 || args.len() % 2 != 0 {
            return Err(CommandError::WrongArity("hset".to_string()));
        }
        let value = keyspace.get_or_insert_with(&args[1], || Value::Hash(HashValue::new()));
        let hash = value.as_hash_mut()?;
        let mut created = 0i64;
        for pair in args[2..].chunks_exact(2) {
            if hash.hset(pair[0].clone(), pair[1].clone()) {
                created += 1;
            }
        }
        Ok(Reply::Integer(created))
    })
}

fn cmd_hget(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 3, "hget")?;
        match keyspace.lookup(&args[1]) {
            None => Ok(Reply::nil()),
            Some(value) => match value.as_hash()?.hget(&args[2]) {
                Some(v) => Ok(Reply::bulk(v)),
                None => Ok(Reply::nil()),
            },
        }
    })
}

fn cmd_hdel(keyspace: &mut Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_at_least(args, 3, "hdel")?;
        let Some(value) = keyspace.lookup_mut(&args[1]) else {
            return Ok(Reply::Integer(0));
        };
        let hash = value.as_hash_mut()?;
        let removed = args[2..].iter().filter(|f| hash.hdel(f)).count();
        Ok(Reply::Integer(removed as i64))
    })
}

fn cmd_hexists(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 3, "hexists")?;
        let exists = match keyspace.lookup(&args[1]) {
            None => false,
            Some(value) => value.as_hash()?.hexists(&args[2]),
        };
        Ok(Reply::Integer(exists as i64))
    })
}

fn cmd_hlen(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 2, "hlen")?;
        let len = match keyspace.lookup(&args[1]) {
            None => 0,
            Some(value) => value.as_hash()?.hlen(),
        };
        Ok(Reply::Integer(len as i64))
    })
}

fn cmd_hgetall(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 2, "hgetall")?;
        let entries = match keyspace.lookup(&args[1]) {
            None => Vec::new(),
            Some(value) => value.as_hash()?.entries(),
        };
        let mut flattened = Vec::with_capacity(entries.len() * 2);
        for (field, value) in entries {
            flattened.push(Reply::bulk(field));
            flattened.push(Reply::bulk(value));
        }
        Ok(Reply::array(flattened))
    })
}

// ── List ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Push {
    Left,
    Right,
}

fn cmd_push(keyspace: &mut Keyspace, args: &[Bytes], side: Push) -> Reply {
    let name = match side {
        Push::Left => "lpush",
        Push::Right => "rpush",
    };
    run(|| {
        arity_at_least(args, 3, name)?;
        let value = keyspace.get_or_insert_with(&args[1], || Value::List(ListValue::new()));
        let list = value.as_list_mut()?;
        let mut len = 0usize;
        for item in &args[2..] {
            len = match side {
                Push::Left => list.lpush(item.clone()),
                Push::Right => list.rpush(item.clone()),
            };
        }
        Ok(Reply::Integer(len as i64))
    })
}

fn cmd_pop(keyspace: &mut Keyspace, args: &[Bytes], side: Push) -> Reply {
    let name = match side {
        Push::Left => "lpop",
        Push::Right => "rpop",
    };
    run(|| {
        arity_exact(args, 2, name)?;
        let Some(value) = keyspace.lookup_mut(&args[1]) else {
            return Ok(Reply::nil());
        };
        let list = value.as_list_mut()?;
        let popped = match side {
            Push::Left => list.lpop(),
            Push::Right => list.rpop(),
        };
        Ok(match popped {
            Some(v) => Reply::bulk(v),
            None => Reply::nil(),
        })
    })
}

fn cmd_lindex(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 3, "lindex")?;
        let index = parse_i64(&args[2])?;
        match keyspace.lookup(&args[1]) {
            None => Ok(Reply::nil()),
            Some(value) => Ok(match value.as_list()?.lindex(index) {
                Some(v) => Reply::bulk(v),
                None => Reply::nil(),
            }),
        }
    })
}

fn cmd_llen(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 2, "llen")?;
        let len = match keyspace.lookup(&args[1]) {
            None => 0,
            Some(value) => value.as_list()?.llen(),
        };
        Ok(Reply::Integer(len as i64))
    })
}

fn cmd_lrange(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 4, "lrange")?;
        let start = parse_i64(&args[2])?;
        let stop = parse_i64(&args[3])?;
        let items = match keyspace.lookup(&args[1]) {
            None => Vec::new(),
            Some(value) => value.as_list()?.lrange(start, stop),
        };
        Ok(Reply::array(items.into_iter().map(Reply::bulk).collect()))
    })
}

fn cmd_ltrim(keyspace: &mut Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 4, "ltrim")?;
        let start = parse_i64(&args[2])?;
        let stop = parse_i64(&args[3])?;
        if let Some(value) = keyspace.lookup_mut(&args[1]) {
            value.as_list_mut()?.ltrim(start, stop);
        }
        Ok(Reply::ok())
    })
}

fn cmd_lrem(keyspace: &mut Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 4, "lrem")?;
        let count = parse_i64(&args[2])?;
        let removed = match keyspace.lookup_mut(&args[1]) {
            None => 0,
            Some(value) => value.as_list_mut()?.lrem(count, &args[3]),
        };
        Ok(Reply::Integer(removed))
    })
}

// ── Set ───────────────────────────────────────────────────────────────────

fn cmd_sadd(keyspace: &mut Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_at_least(args, 3, "sadd")?;
        let value = keyspace.get_or_insert_with(&args[1], || Value::Set(SetValue::new()));
        let set = value.as_set_mut()?;
        let added = args[2..].iter().filter(|m| set.sadd((*m).clone())).count();
        Ok(Reply::Integer(added as i64))
    })
}

fn cmd_srem(keyspace: &mut Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_at_least(args, 3, "srem")?;
        let Some(value) = keyspace.lookup_mut(&args[1]) else {
            return Ok(Reply::Integer(0));
        };
        let set = value.as_set_mut()?;
        let removed = args[2..].iter().filter(|m| set.srem(m)).count();
        Ok(Reply::Integer(removed as i64))
    })
}

fn cmd_sismember(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 3, "sismember")?;
        let is_member = match keyspace.lookup(&args[1]) {
            None => false,
            Some(value) => value.as_set()?.sismember(&args[2]),
        };
        Ok(Reply::Integer(is_member as i64))
    })
}

fn cmd_scard(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 2, "scard")?;
        let card = match keyspace.lookup(&args[1]) {
            None => 0,
            Some(value) => value.as_set()?.scard(),
        };
        Ok(Reply::Integer(card as i64))
    })
}

fn cmd_smembers(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 2, "smembers")?;
        let members = match keyspace.lookup(&args[1]) {
            None => Vec::new(),
            Some(value) => value.as_set()?.smembers(),
        };
        Ok(Reply::array(members.into_iter().map(Reply::bulk).collect()))
    })
}

// ── ZSet ──────────────────────────────────────────────────────────────────

fn cmd_zadd(keyspace: &mut Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 4, "zadd")?;
        let score = parse_f64(&args[2])?;
        let value = keyspace.get_or_insert_with(&args[1], || Value::ZSet(ZSetValue::new()));
        let added = value.as_zset_mut()?.zadd(score, args[3].clone());
        Ok(Reply::Integer(added as i64))
    })
}

fn cmd_zscore(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 3, "zscore")?;
        match keyspace.lookup(&args[1]) {
            None => Ok(Reply::nil()),
            Some(value) => match value.as_zset()?.zscore(&args[2]) {
                Some(score) => Ok(Reply::bulk(score.to_string())),
                None => Ok(Reply::nil()),
            },
        }
    })
}

fn cmd_zrank(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 3, "zrank")?;
        match keyspace.lookup(&args[1]) {
            None => Ok(Reply::nil()),
            Some(value) => match value.as_zset()?.zrank(&args[2]) {
                Some(rank) => Ok(Reply::Integer(rank as i64)),
                None => Ok(Reply::nil()),
            },
        }
    })
}

fn cmd_zrangebyscore(keyspace: &Keyspace, args: &[Bytes]) -> Reply {
    run(|| {
        arity_exact(args, 4, "zrangebyscore")?;
        let min = parse_f64(&args[2])?;
        let max = parse_f64(&args[3])?;
        let members = match keyspace.lookup(&args[1]) {
            None => Vec::new(),
            Some(value) => value.as_zset()?.zrangebyscore(min, max),
        };
        let mut flattened = Vec::with_capacity(members.len() * 2);
        for (member, score) in members {
            flattened.push(Reply::bulk(member));
            flattened.push(Reply::bulk(score.to_string()));
        }
        Ok(Reply::array(flattened))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<Bytes> {
        words.iter().map(|w| Bytes::from(w.to_string())).collect()
    }

    #[test]
    fn ping_replies_pong() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        assert_eq!(
            d.dispatch(&mut ks, &args(&["PING"])),
            Reply::SimpleString("PONG".to_string())
        );
    }

    #[test]
    fn set_then_get_roundtrips() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        d.dispatch(&mut ks, &args(&["SET", "k", "v"]));
        assert_eq!(
            d.dispatch(&mut ks, &args(&["GET", "k"])),
            Reply::bulk("v")
        );
    }

    #[test]
    fn get_on_missing_key_is_nil() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        assert_eq!(d.dispatch(&mut ks, &args(&["GET", "missing"])), Reply::nil());
    }

    #[test]
    fn get_on_hash_is_wrongtype() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        d.dispatch(&mut ks, &args(&["HSET", "h", "f", "v"]));
        assert_eq!(
            d.dispatch(&mut ks, &args(&["GET", "h"])),
            Reply::Error(CommandError::WrongType.to_string())
        );
    }

    #[test]
    fn unknown_command_errors() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        assert_eq!(
            d.dispatch(&mut ks, &args(&["FROBNICATE"])),
            Reply::Error("ERR unknown command 'FROBNICATE'".to_string())
        );
    }

    #[test]
    fn del_counts_only_existing_keys() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        d.dispatch(&mut ks, &args(&["SET", "a", "1"]));
        assert_eq!(
            d.dispatch(&mut ks, &args(&["DEL", "a", "missing"])),
            Reply::Integer(1)
        );
    }

    #[test]
    fn lpush_rpush_and_lrange() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        d.dispatch(&mut ks, &args(&["RPUSH", "l", "a", "b", "c"]));
        assert_eq!(
            d.dispatch(&mut ks, &args(&["LRANGE", "l", "0", "-1"])),
            Reply::array(vec![Reply::bulk("a"), Reply::bulk("b"), Reply::bulk("c")])
        );
    }

    #[test]
    fn sadd_sismember_scard() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        d.dispatch(&mut ks, &args(&["SADD", "s", "1", "2", "2"]));
        assert_eq!(
            d.dispatch(&mut ks, &args(&["SCARD", "s"])),
            Reply::Integer(2)
        );
        assert_eq!(
            d.dispatch(&mut ks, &args(&["SISMEMBER", "s", "1"])),
            Reply::Integer(1)
        );
        assert_eq!(
            d.dispatch(&mut ks, &args(&["SISMEMBER", "s", "9"])),
            Reply::Integer(0)
        );
    }

    #[test]
    fn zadd_zscore_zrank() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        d.dispatch(&mut ks, &args(&["ZADD", "z", "1.5", "a"]));
        d.dispatch(&mut ks, &args(&["ZADD", "z", "0.5", "b"]));
        assert_eq!(
            d.dispatch(&mut ks, &args(&["ZSCORE", "z", "a"])),
            Reply::bulk("1.5")
        );
        assert_eq!(
            d.dispatch(&mut ks, &args(&["ZRANK", "z", "b"])),
            Reply::Integer(0)
        );
    }

    #[test]
    fn hset_wrong_arity_is_rejected() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        assert_eq!(
            d.dispatch(&mut ks, &args(&["HSET", "h", "f"])),
            Reply::Error(CommandError::WrongArity("hset".to_string()).to_string())
        );
    }

    #[test]
    fn type_reports_none_for_missing_key() {
        let d = Dispatcher::new(PathBuf::from("unused.rdb"));
        let mut ks = Keyspace::new();
        assert_eq!(
            d.dispatch(&mut ks, &args(&["TYPE", "missing"])),
            Reply::SimpleString("none".to_string())
        );
    }
}
