//! Core data structures: the hash table, value objects, and keyspace
//! that back the emberkv server, plus its configuration and command
//! error types. Protocol parsing and the snapshot codec live in their
//! own crates.

pub mod config;
pub mod dict;
pub mod error;
pub mod intset;
pub mod keyspace;
pub mod value;

pub use config::{ConfigError, ServerConfig};
pub use dict::Dict;
pub use error::CommandError;
pub use keyspace::Keyspace;
pub use value::{Encoding, ObjectType, Value, ValueError};
