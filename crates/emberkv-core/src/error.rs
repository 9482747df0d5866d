//! Errors produced while executing a command against the keyspace.
//!
//! `CommandError`'s `Display` impl is the literal text sent back to the
//! client as a RESP error reply's message (after the leading `-`), so its
//! wording follows the "reply vocabulary" in `SPEC_FULL.md` §7.

use crate::value::ValueError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is not a valid float")]
    NotAFloat,

    #[error("ERR syntax error")]
    Syntax,
}

impl From<ValueError> for CommandError {
    fn from(_: ValueError) -> Self {
        CommandError::WrongType
    }
}
