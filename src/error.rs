// src/error.rs

//! 命令级错误分类
//!
//! Every failure a command can report. None of them is fatal to the engine:
//! the caller gets the error, the keyspace stays serviceable.

use thiserror::Error;

use crate::engine::Reply;

pub type CommandResult<T> = std::result::Result<T, CommandError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR value is not a valid float")]
    NotAFloat,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR increment would produce NaN or Infinity")]
    NanOrInfinity,

    #[error("ERR min or max is not a float")]
    BadScoreRange,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR index out of range")]
    IndexOutOfRange,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR empty command")]
    EmptyCommand,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    #[error("BUSY script exceeded its budget of {0} operations and was rolled back")]
    ScriptTimeout(u64),

    #[error("BUSY script exceeded its memory budget of {0} bytes and was rolled back")]
    ScriptMemory(u64),

    #[error("{0}")]
    Application(ApplicationError),

    #[error("ERR {0}")]
    Script(String),

    #[error("NOSCRIPT No matching script. Please use EVAL.")]
    NoScript,

    #[error("ERR script tried accessing undeclared key '{0}'")]
    UndeclaredKey(String),

    #[error("ERR this command is not allowed from scripts: '{0}'")]
    NotAllowedInScript(String),

    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("ERR WATCH inside MULTI is not allowed")]
    WatchInsideMulti,

    #[error("ERR '{0}' is not allowed inside a transaction")]
    NotAllowedInMulti(String),

    #[error("EXECABORT Transaction discarded because of previous errors.")]
    ExecAbort,
}

impl CommandError {
    /// Rejected before the keyspace was touched: the request itself was bad.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            CommandError::Syntax
                | CommandError::EmptyCommand
                | CommandError::UnknownCommand(_)
                | CommandError::WrongArity(_)
        )
    }
}

/// A semantic error raised by a script (or its caller), e.g. a rate limit.
///
/// `code` is the error string, `payload` any extra fields the script attached
/// alongside it, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationError {
    pub code: String,
    pub payload: Vec<(String, Reply)>,
}

impl ApplicationError {
    pub fn new(code: impl Into<String>) -> Self {
        ApplicationError { code: code.into(), payload: Vec::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Reply) -> Self {
        self.payload.push((name.into(), value));
        self
    }

    pub fn field(&self, name: &str) -> Option<&Reply> {
        self.payload.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

impl std::fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CommandError::WrongArity("get".into()).to_string(),
            "ERR wrong number of arguments for 'get' command"
        );
        assert!(CommandError::WrongType.to_string().starts_with("WRONGTYPE"));
        assert!(CommandError::UnknownCommand("FOO".into()).is_malformed());
        assert!(!CommandError::NotAnInteger.is_malformed());
    }

    #[test]
    fn test_application_error_payload() {
        let err = ApplicationError::new("LIMIT_EXCEEDED").with_field("current", Reply::Integer(10));
        assert_eq!(err.to_string(), "LIMIT_EXCEEDED");
        assert_eq!(err.field("current"), Some(&Reply::Integer(10)));
        assert_eq!(err.field("missing"), None);
        assert_eq!(CommandError::Application(err).to_string(), "LIMIT_EXCEEDED");
    }
}
