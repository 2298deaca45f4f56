//! Command registry and dispatch plumbing.
//!
//! Every command is registered as `{executor, prepare, arity}` under its
//! lowercase name. The per-database dispatcher looks the name up, validates
//! arity, runs `prepare` over the arguments to learn which keys will be
//! written and which will only be read, takes the corresponding striped
//! locks, and executes.
//!
//! Arity counts the command name itself: a positive value demands an exact
//! argument count, a negative value `n` demands at least `-n`.

pub mod keys;
pub mod pattern;
pub mod strings;

pub use pattern::{Pattern, PatternError};

use crate::db::KeySpace;
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Command arguments, excluding the command name.
pub type CmdArgs = [Bytes];

/// Executes a command against one database.
pub type ExecFn = fn(&KeySpace, &CmdArgs) -> RespValue;

/// Derives `(writer_keys, reader_keys)` from the arguments, ahead of lock
/// acquisition.
pub type PrepareFn = fn(&CmdArgs) -> (Vec<String>, Vec<String>);

/// A registered command.
pub struct Command {
    pub executor: ExecFn,
    pub prepare: PrepareFn,
    pub arity: i32,
}

/// The process-wide command table, built on first use and immutable after.
pub fn command_table() -> &'static HashMap<&'static str, Command> {
    static TABLE: OnceLock<HashMap<&'static str, Command>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = HashMap::new();
        strings::register(&mut table);
        keys::register(&mut table);
        table
    })
}

/// Checks an argument count (including the command name) against a recorded
/// arity.
pub fn validate_arity(arity: i32, argc: usize) -> bool {
    if arity >= 0 {
        argc == arity as usize
    } else {
        argc >= arity.unsigned_abs() as usize
    }
}

/// Decodes an argument into a key string.
pub(crate) fn arg_str(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

/// Parses an argument as a signed integer.
pub(crate) fn arg_i64(arg: &Bytes) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.trim().parse().ok()
}

/* ---- prepare helpers ---- */

pub fn no_prepare(_args: &CmdArgs) -> (Vec<String>, Vec<String>) {
    (Vec::new(), Vec::new())
}

pub fn read_first_key(args: &CmdArgs) -> (Vec<String>, Vec<String>) {
    (Vec::new(), vec![arg_str(&args[0])])
}

pub fn write_first_key(args: &CmdArgs) -> (Vec<String>, Vec<String>) {
    (vec![arg_str(&args[0])], Vec::new())
}

pub fn read_all_keys(args: &CmdArgs) -> (Vec<String>, Vec<String>) {
    (Vec::new(), args.iter().map(arg_str).collect())
}

pub fn write_all_keys(args: &CmdArgs) -> (Vec<String>, Vec<String>) {
    (args.iter().map(arg_str).collect(), Vec::new())
}
