//! Errors raised around the invoker: interpreter setup and typed calls.
//!
//! Invocation failures themselves are data ([`CallError`]), never these.

use crate::core::CallError;
use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum InterpreterError {
    /// The allocator refused to create a new state.
    Alloc,
    /// A chunk failed to compile.
    Syntax { chunk: String, message: String },
    /// A chunk compiled but raised while running.
    Runtime { chunk: String, message: String },
    Io { path: PathBuf, source: io::Error },
    /// A script glob pattern was malformed.
    Pattern { pattern: String, message: String },
}

impl InterpreterError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc => write!(f, "failed to allocate interpreter state"),
            Self::Syntax { chunk, message } => {
                write!(f, "failed to compile {}: {}", chunk, message)
            }
            Self::Runtime { chunk, message } => {
                write!(f, "failed to run {}: {}", chunk, message)
            }
            Self::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            Self::Pattern { pattern, message } => {
                write!(f, "invalid script pattern '{}': {}", pattern, message)
            }
        }
    }
}

impl std::error::Error for InterpreterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Failure of a JSON-in, JSON-out call.
#[derive(Debug)]
pub enum BridgeError {
    Call(CallError),
    Encode(serde_json::Error),
    Decode(serde_json::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call(err) => write!(f, "{}", err),
            Self::Encode(err) => write!(f, "failed to encode payload: {}", err),
            Self::Decode(err) => write!(f, "failed to decode result: {}", err),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Call(err) => Some(err),
            Self::Encode(err) | Self::Decode(err) => Some(err),
        }
    }
}

impl From<CallError> for BridgeError {
    fn from(err: CallError) -> Self {
        Self::Call(err)
    }
}
