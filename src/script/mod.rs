// src/script/mod.rs

//! # Scripting
//!
//! `EVAL` / `EVALSHA` / `SCRIPT`. A script runs while the caller holds the
//! keyspace lock, so nothing else can observe its intermediate states.
//!
//! Scripts are compiled once and cached by the hex SHA-256 of their source.
//! Every run is journalled: a script that blows its step or memory budget is
//! rolled back, while one that ends in an error keeps whatever it already wrote.

pub mod interp;
pub mod parser;

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::engine::command::{Command, NOSCRIPT};
use crate::engine::{Keyspace, Reply, Shared, execute_non_txn_command};
use crate::error::{CommandError, CommandResult};

pub use interp::{Interpreter, ScriptHost, ScriptValue};
pub use parser::{Program, parse_program};

/// Hex SHA-256 of a script's source.
pub fn digest(src: &[u8]) -> String {
    hex::encode(Sha256::digest(src))
}

#[derive(Debug, Default)]
pub struct ScriptCache {
    scripts: DashMap<String, Arc<Program>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and cache, returning the digest. Compiling a known script is a no-op.
    pub fn load(&self, src: &[u8]) -> CommandResult<(String, Arc<Program>)> {
        let sha = digest(src);
        if let Some(program) = self.scripts.get(&sha) {
            return Ok((sha, program.clone()));
        }
        let text = std::str::from_utf8(src)
            .map_err(|_| CommandError::Script("Error compiling script: source is not valid UTF-8".into()))?;
        let program = Arc::new(parse_program(text)?);
        self.scripts.insert(sha.clone(), program.clone());
        info!(sha = %sha, "script loaded");
        Ok((sha, program))
    }

    pub fn get(&self, sha: &str) -> Option<Arc<Program>> {
        self.scripts.get(&sha.to_ascii_lowercase()).map(|p| p.clone())
    }

    pub fn exists(&self, sha: &str) -> bool {
        self.scripts.contains_key(&sha.to_ascii_lowercase())
    }

    pub fn flush(&self) -> usize {
        let n = self.scripts.len();
        self.scripts.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Bridges `call(...)` inside a script to the command dispatcher.
struct KeyspaceHost<'a> {
    shared: &'a Shared,
    ks: &'a mut Keyspace,
    declared: HashSet<Vec<u8>>,
}

impl ScriptHost for KeyspaceHost<'_> {
    fn call(&mut self, args: Vec<Vec<u8>>) -> CommandResult<Reply> {
        let cmd = Command::parse(args)?;
        let spec = cmd.validate()?;
        if spec.has(NOSCRIPT) {
            return Err(CommandError::NotAllowedInScript(cmd.display_name()));
        }
        if let Some(key) = cmd.keys(spec).into_iter().find(|k| !self.declared.contains(*k)) {
            return Err(CommandError::UndeclaredKey(String::from_utf8_lossy(key).into_owned()));
        }
        execute_non_txn_command(self.shared, self.ks, &cmd)
    }
}

/// Run a compiled script against the locked keyspace.
pub fn run(
    shared: &Shared,
    ks: &mut Keyspace,
    program: &Program,
    keys: &[Vec<u8>],
    argv: &[Vec<u8>],
) -> CommandResult<Reply> {
    let max_ops = shared.config.script_max_ops;
    let max_bytes = shared.config.script_max_bytes;
    ks.begin_journal();
    let mut host = KeyspaceHost {
        shared,
        ks,
        declared: keys.iter().cloned().collect(),
    };
    let (result, steps) = {
        let mut interp = Interpreter::new(&mut host, max_ops).with_max_bytes(max_bytes);
        let result = interp.run(program, keys, argv);
        (result, interp.steps())
    };
    let ks = host.ks;
    match result {
        Err(CommandError::ScriptTimeout(limit)) => {
            let restored = ks.rollback_journal();
            warn!(limit, restored, "script exceeded its budget, changes rolled back");
            Err(CommandError::ScriptTimeout(limit))
        }
        Err(CommandError::ScriptMemory(limit)) => {
            let restored = ks.rollback_journal();
            warn!(limit, restored, "script exceeded its memory budget, changes rolled back");
            Err(CommandError::ScriptMemory(limit))
        }
        other => {
            ks.commit_journal();
            debug!(steps, "script finished");
            other.and_then(ScriptValue::into_reply)
        }
    }
}

/// Split `numkeys key... arg...` into keys and args.
pub fn split_keys(args: &[Vec<u8>]) -> CommandResult<(Vec<Vec<u8>>, Vec<Vec<u8>>)> {
    let raw = args.first().ok_or(CommandError::Syntax)?;
    let n = crate::types::parse_i64(raw)?;
    if n < 0 {
        return Err(CommandError::Script("Number of keys can't be negative".into()));
    }
    let n = n as usize;
    if n > args.len() - 1 {
        return Err(CommandError::Script(
            "Number of keys can't be greater than number of args".into(),
        ));
    }
    Ok((args[1..=n].to_vec(), args[n + 1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_sha256_hex() {
        assert_eq!(
            digest(b"return 1"),
            "486d9affb60dbb0063b03d8e23a6ccf6364ce203dc3a9f56f20e750eb41ecade"
        );
        assert_ne!(digest(b"return 1"), digest(b"return 2"));
    }

    #[test]
    fn test_cache_load_exists_flush() {
        let cache = ScriptCache::new();
        let (sha, _) = cache.load(b"return 1").unwrap();
        assert!(cache.exists(&sha));
        assert!(cache.exists(&sha.to_ascii_uppercase()));
        assert!(cache.get(&sha).is_some());
        let (again, _) = cache.load(b"return 1").unwrap();
        assert_eq!(sha, again);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.flush(), 1);
        assert!(!cache.exists(&sha));
    }

    #[test]
    fn test_bad_source_is_not_cached() {
        let cache = ScriptCache::new();
        assert!(matches!(cache.load(b"if then"), Err(CommandError::Script(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_split_keys() {
        let args: Vec<Vec<u8>> = ["2", "k1", "k2", "a"].iter().map(|s| s.as_bytes().to_vec()).collect();
        let (keys, argv) = split_keys(&args).unwrap();
        assert_eq!(keys, vec![b"k1".to_vec(), b"k2".to_vec()]);
        assert_eq!(argv, vec![b"a".to_vec()]);

        let bad: Vec<Vec<u8>> = ["3", "k1"].iter().map(|s| s.as_bytes().to_vec()).collect();
        assert!(matches!(split_keys(&bad), Err(CommandError::Script(_))));
        let neg: Vec<Vec<u8>> = ["-1"].iter().map(|s| s.as_bytes().to_vec()).collect();
        assert!(matches!(split_keys(&neg), Err(CommandError::Script(_))));
    }
}
