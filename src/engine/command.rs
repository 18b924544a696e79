// src/engine/command.rs

//! # Command table
//!
//! A `Command` is a name plus byte-string arguments. Before anything touches
//! the keyspace it is checked against the static table below: unknown names
//! and wrong argument counts are rejected here.
//!
//! Arity counts the command name itself. A positive arity is an exact count,
//! a negative one a minimum (`-3` means "at least 3").

use crate::error::{CommandError, CommandResult};

pub const WRITE: u32 = 1 << 0;
pub const READONLY: u32 = 1 << 1;
pub const ADMIN: u32 = 1 << 2;
/// Refused when called from a script.
pub const NOSCRIPT: u32 = 1 << 3;
pub const PUBSUB: u32 = 1 << 4;
/// Acts on the calling session rather than the keyspace; never queued.
pub const SESSION: u32 = 1 << 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: i32,
    pub flags: u32,
    /// Index of the first key argument (0 = no keys).
    pub first_key: i32,
    /// Index of the last key argument, negative counts from the end.
    pub last_key: i32,
    pub step: usize,
}

impl CommandSpec {
    const fn new(name: &'static str, arity: i32, flags: u32, first_key: i32, last_key: i32, step: usize) -> Self {
        Self { name, arity, flags, first_key, last_key, step }
    }

    pub fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn is_write(&self) -> bool {
        self.has(WRITE)
    }

    fn arity_ok(&self, argc: usize) -> bool {
        let argc = argc as i32;
        if self.arity >= 0 { argc == self.arity } else { argc >= -self.arity }
    }
}

const NONE: u32 = 0;

#[rustfmt::skip]
static COMMANDS: &[CommandSpec] = &[
    // keys & server
    CommandSpec::new("PING", -1, NONE, 0, 0, 0),
    CommandSpec::new("ECHO", 2, NONE, 0, 0, 0),
    CommandSpec::new("DEL", -2, WRITE, 1, -1, 1),
    CommandSpec::new("EXISTS", -2, READONLY, 1, -1, 1),
    CommandSpec::new("TYPE", 2, READONLY, 1, 1, 1),
    CommandSpec::new("KEYS", 2, READONLY, 0, 0, 0),
    CommandSpec::new("DBSIZE", 1, READONLY, 0, 0, 0),
    CommandSpec::new("EXPIRE", 3, WRITE, 1, 1, 1),
    CommandSpec::new("PEXPIRE", 3, WRITE, 1, 1, 1),
    CommandSpec::new("TTL", 2, READONLY, 1, 1, 1),
    CommandSpec::new("PTTL", 2, READONLY, 1, 1, 1),
    CommandSpec::new("PERSIST", 2, WRITE, 1, 1, 1),
    CommandSpec::new("EXPIREAT", 3, WRITE, 1, 1, 1),
    CommandSpec::new("PEXPIREAT", 3, WRITE, 1, 1, 1),
    CommandSpec::new("RENAME", 3, WRITE, 1, 2, 1),
    CommandSpec::new("FLUSHDB", -1, WRITE | NOSCRIPT, 0, 0, 0),
    CommandSpec::new("FLUSHALL", -1, WRITE | NOSCRIPT, 0, 0, 0),
    CommandSpec::new("INFO", -1, ADMIN | NOSCRIPT, 0, 0, 0),
    // strings
    CommandSpec::new("SET", -3, WRITE, 1, 1, 1),
    CommandSpec::new("GET", 2, READONLY, 1, 1, 1),
    CommandSpec::new("SETNX", 3, WRITE, 1, 1, 1),
    CommandSpec::new("SETEX", 4, WRITE, 1, 1, 1),
    CommandSpec::new("GETSET", 3, WRITE, 1, 1, 1),
    CommandSpec::new("GETDEL", 2, WRITE, 1, 1, 1),
    CommandSpec::new("MSET", -3, WRITE, 1, -1, 2),
    CommandSpec::new("MGET", -2, READONLY, 1, -1, 1),
    CommandSpec::new("INCR", 2, WRITE, 1, 1, 1),
    CommandSpec::new("DECR", 2, WRITE, 1, 1, 1),
    CommandSpec::new("INCRBY", 3, WRITE, 1, 1, 1),
    CommandSpec::new("DECRBY", 3, WRITE, 1, 1, 1),
    CommandSpec::new("INCRBYFLOAT", 3, WRITE, 1, 1, 1),
    CommandSpec::new("APPEND", 3, WRITE, 1, 1, 1),
    CommandSpec::new("STRLEN", 2, READONLY, 1, 1, 1),
    // hashes
    CommandSpec::new("HSET", -4, WRITE, 1, 1, 1),
    CommandSpec::new("HGET", 3, READONLY, 1, 1, 1),
    CommandSpec::new("HMGET", -3, READONLY, 1, 1, 1),
    CommandSpec::new("HDEL", -3, WRITE, 1, 1, 1),
    CommandSpec::new("HEXISTS", 3, READONLY, 1, 1, 1),
    CommandSpec::new("HLEN", 2, READONLY, 1, 1, 1),
    CommandSpec::new("HKEYS", 2, READONLY, 1, 1, 1),
    CommandSpec::new("HVALS", 2, READONLY, 1, 1, 1),
    CommandSpec::new("HGETALL", 2, READONLY, 1, 1, 1),
    CommandSpec::new("HINCRBY", 4, WRITE, 1, 1, 1),
    CommandSpec::new("HINCRBYFLOAT", 4, WRITE, 1, 1, 1),
    CommandSpec::new("HSETNX", 4, WRITE, 1, 1, 1),
    // lists
    CommandSpec::new("LPUSH", -3, WRITE, 1, 1, 1),
    CommandSpec::new("RPUSH", -3, WRITE, 1, 1, 1),
    CommandSpec::new("LPOP", 2, WRITE, 1, 1, 1),
    CommandSpec::new("RPOP", 2, WRITE, 1, 1, 1),
    CommandSpec::new("LRANGE", 4, READONLY, 1, 1, 1),
    CommandSpec::new("LLEN", 2, READONLY, 1, 1, 1),
    CommandSpec::new("LINDEX", 3, READONLY, 1, 1, 1),
    CommandSpec::new("LSET", 4, WRITE, 1, 1, 1),
    CommandSpec::new("LREM", 4, WRITE, 1, 1, 1),
    CommandSpec::new("LTRIM", 4, WRITE, 1, 1, 1),
    // sets
    CommandSpec::new("SADD", -3, WRITE, 1, 1, 1),
    CommandSpec::new("SREM", -3, WRITE, 1, 1, 1),
    CommandSpec::new("SMEMBERS", 2, READONLY, 1, 1, 1),
    CommandSpec::new("SISMEMBER", 3, READONLY, 1, 1, 1),
    CommandSpec::new("SCARD", 2, READONLY, 1, 1, 1),
    CommandSpec::new("SINTER", -2, READONLY, 1, -1, 1),
    CommandSpec::new("SUNION", -2, READONLY, 1, -1, 1),
    CommandSpec::new("SDIFF", -2, READONLY, 1, -1, 1),
    // sorted sets
    CommandSpec::new("ZADD", -4, WRITE, 1, 1, 1),
    CommandSpec::new("ZRANGE", -4, READONLY, 1, 1, 1),
    CommandSpec::new("ZREVRANGE", -4, READONLY, 1, 1, 1),
    CommandSpec::new("ZSCORE", 3, READONLY, 1, 1, 1),
    CommandSpec::new("ZRANK", 3, READONLY, 1, 1, 1),
    CommandSpec::new("ZREVRANK", 3, READONLY, 1, 1, 1),
    CommandSpec::new("ZCARD", 2, READONLY, 1, 1, 1),
    CommandSpec::new("ZREM", -3, WRITE, 1, 1, 1),
    CommandSpec::new("ZINCRBY", 4, WRITE, 1, 1, 1),
    CommandSpec::new("ZRANGEBYSCORE", -4, READONLY, 1, 1, 1),
    CommandSpec::new("ZCOUNT", 4, READONLY, 1, 1, 1),
    // transactions
    CommandSpec::new("MULTI", 1, NOSCRIPT, 0, 0, 0),
    CommandSpec::new("EXEC", 1, NOSCRIPT, 0, 0, 0),
    CommandSpec::new("DISCARD", 1, NOSCRIPT, 0, 0, 0),
    CommandSpec::new("WATCH", -2, NOSCRIPT, 1, -1, 1),
    CommandSpec::new("UNWATCH", 1, NOSCRIPT, 0, 0, 0),
    // scripting; keys are taken from numkeys
    CommandSpec::new("EVAL", -3, NOSCRIPT, 0, 0, 0),
    CommandSpec::new("EVALSHA", -3, NOSCRIPT, 0, 0, 0),
    CommandSpec::new("SCRIPT", -2, NOSCRIPT, 0, 0, 0),
    // pub/sub; everything here reaches outside the keyspace, so none of it runs in scripts
    CommandSpec::new("SUBSCRIBE", -2, PUBSUB | SESSION | NOSCRIPT, 0, 0, 0),
    CommandSpec::new("UNSUBSCRIBE", -1, PUBSUB | SESSION | NOSCRIPT, 0, 0, 0),
    CommandSpec::new("PSUBSCRIBE", -2, PUBSUB | SESSION | NOSCRIPT, 0, 0, 0),
    CommandSpec::new("PUNSUBSCRIBE", -1, PUBSUB | SESSION | NOSCRIPT, 0, 0, 0),
    CommandSpec::new("PUBLISH", 3, PUBSUB | NOSCRIPT, 0, 0, 0),
    CommandSpec::new("PUBSUB", -2, PUBSUB | NOSCRIPT, 0, 0, 0),
    // admin
    CommandSpec::new("SLOWLOG", -2, ADMIN | NOSCRIPT, 0, 0, 0),
    CommandSpec::new("CLIENT", -2, ADMIN | SESSION | NOSCRIPT, 0, 0, 0),
];

/// Look a command up by its upper-case name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.name == name)
}

pub fn all() -> &'static [CommandSpec] {
    COMMANDS
}

/// One command request: upper-cased name plus raw arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<Vec<u8>>,
}

impl Command {
    pub fn new<I, A>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        Command {
            name: name.to_ascii_uppercase(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a command from its tokens, the first one being the name.
    pub fn parse<I, A>(parts: I) -> CommandResult<Self>
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        let mut parts = parts.into_iter().map(Into::into);
        let name = parts.next().ok_or(CommandError::EmptyCommand)?;
        if name.is_empty() {
            return Err(CommandError::EmptyCommand);
        }
        Ok(Command {
            name: String::from_utf8_lossy(&name).to_ascii_uppercase(),
            args: parts.collect(),
        })
    }

    /// Lower-case name, as it appears in error messages.
    pub fn display_name(&self) -> String {
        self.name.to_ascii_lowercase()
    }

    pub fn arg_str(&self, idx: usize) -> Option<String> {
        self.args.get(idx).map(|a| String::from_utf8_lossy(a).into_owned())
    }

    /// Resolve against the command table and check the argument count.
    pub fn validate(&self) -> CommandResult<&'static CommandSpec> {
        let spec = lookup(&self.name).ok_or_else(|| CommandError::UnknownCommand(self.display_name()))?;
        if !spec.arity_ok(self.args.len() + 1) {
            return Err(CommandError::WrongArity(self.display_name()));
        }
        Ok(spec)
    }

    /// The key arguments this command addresses.
    pub fn keys(&self, spec: &CommandSpec) -> Vec<&[u8]> {
        if matches!(spec.name, "EVAL" | "EVALSHA") {
            let n = self
                .args
                .get(1)
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(0);
            return self.args.iter().skip(2).take(n).map(Vec::as_slice).collect();
        }
        if spec.first_key <= 0 {
            return Vec::new();
        }
        // Positions in the table count the name, `args` does not.
        let argc = self.args.len() as i32 + 1;
        let last = if spec.last_key < 0 { argc + spec.last_key } else { spec.last_key };
        let mut out = Vec::new();
        let mut i = spec.first_key;
        while i <= last && i < argc {
            out.push(self.args[(i - 1) as usize].as_slice());
            i += spec.step.max(1) as i32;
        }
        out
    }
}
