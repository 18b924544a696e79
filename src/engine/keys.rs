// src/engine/keys.rs

//! Commands that act on keys regardless of the value type.

use crate::engine::{Keyspace, Reply};
use crate::error::{CommandError, CommandResult};
use crate::glob::glob_match;

/// DEL key [key ...], returns how many existed.
pub fn del(ks: &mut Keyspace, keys: &[Vec<u8>]) -> CommandResult<Reply> {
    let removed = keys.iter().filter(|k| ks.delete(k)).count();
    Ok(Reply::Integer(removed as i64))
}

/// EXISTS key [key ...]; a key named twice counts twice.
pub fn exists(ks: &mut Keyspace, keys: &[Vec<u8>]) -> CommandResult<Reply> {
    let found = keys.iter().filter(|k| ks.exists(k)).count();
    Ok(Reply::Integer(found as i64))
}

pub fn type_of(ks: &mut Keyspace, key: &[u8]) -> CommandResult<Reply> {
    let name = ks.kind(key).map(|k| k.name()).unwrap_or("none");
    Ok(Reply::Status(name.to_string()))
}

/// KEYS pattern, sorted.
pub fn keys(ks: &mut Keyspace, pattern: &[u8]) -> CommandResult<Reply> {
    let matched = ks.keys().into_iter().filter(|k| glob_match(pattern, k));
    Ok(Reply::from_bulks(matched))
}

/// RENAME key newkey，源 key 不存在时报错
pub fn rename(ks: &mut Keyspace, from: &[u8], to: &[u8]) -> CommandResult<Reply> {
    if !ks.rename(from, to) {
        return Err(CommandError::NoSuchKey);
    }
    Ok(Reply::ok())
}

/// FLUSHDB / FLUSHALL [ASYNC|SYNC]. Both modes flush immediately.
pub fn flush(ks: &mut Keyspace, args: &[Vec<u8>]) -> CommandResult<Reply> {
    match args {
        [] => {}
        [mode] if mode.eq_ignore_ascii_case(b"ASYNC") || mode.eq_ignore_ascii_case(b"SYNC") => {}
        _ => return Err(CommandError::Syntax),
    }
    ks.flush();
    Ok(Reply::ok())
}
