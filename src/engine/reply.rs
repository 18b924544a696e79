// src/engine/reply.rs

use crate::error::CommandError;

/// The typed answer to one command.
///
/// `Error` only ever appears nested inside an `Array`: a transaction or
/// pipeline records a failed slot without failing its siblings. A top-level
/// failure is the `Err` side of `CommandResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Reply>),
    /// Structured record, e.g. a script returning `{ok = "OK", current = 3}`.
    Map(Vec<(Vec<u8>, Reply)>),
    Error(CommandError),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn bulk(v: impl Into<Vec<u8>>) -> Self {
        Reply::Bulk(v.into())
    }

    pub fn from_bulks<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Vec<u8>>,
    {
        Reply::Array(items.into_iter().map(|i| Reply::Bulk(i.into())).collect())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Bulk payload as UTF-8, if this is a bulk reply.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Bulk(b) => std::str::from_utf8(b).ok(),
            Reply::Status(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<CommandError> for Reply {
    fn from(e: CommandError) -> Self {
        Reply::Error(e)
    }
}
