use std::borrow::Cow;
use std::fmt;

/// Message returned when the named global is missing or not a function.
pub const FUNCTION_NOT_FOUND: &str = "Function not found";

/// Message returned when the function returned something other than a string.
pub const INVALID_RETURN_VALUE: &str = "Invalid return value";

/// Flat failure taxonomy of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The global does not exist or is not callable.
    Lookup,
    /// The function raised while running.
    Runtime,
    /// The function returned a non-string value.
    Type,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Runtime => "runtime",
            Self::Type => "type",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an invocation did not produce a string.
///
/// The message is kept as the exact bytes the interpreter produced; Lua error
/// text need not be UTF-8. `Display` renders it lossily, so hosts can still
/// match on [`FUNCTION_NOT_FOUND`] and [`INVALID_RETURN_VALUE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    kind: ErrorKind,
    message: Vec<u8>,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::Lookup, FUNCTION_NOT_FOUND)
    }

    pub fn invalid_return() -> Self {
        Self::new(ErrorKind::Type, INVALID_RETURN_VALUE)
    }

    pub fn runtime(message: impl Into<Vec<u8>>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Message as text; invalid UTF-8 is replaced.
    pub fn message(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }

    /// Message exactly as raised.
    pub fn message_bytes(&self) -> &[u8] {
        &self.message
    }

    pub fn into_message(self) -> String {
        match String::from_utf8(self.message) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.message
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for CallError {}

/// Outcome of one call into the interpreter.
///
/// Owns its data outright; nothing here points into interpreter memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult {
    /// Bytes of the returned Lua string, exact length preserved.
    Success(Vec<u8>),
    Failure(CallError),
}

impl CallResult {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Success(bytes) => Some(bytes),
            Self::Failure(_) => None,
        }
    }

    /// The value as UTF-8 text, if it is a success and valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.value().and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn error(&self) -> Option<&CallError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err),
        }
    }

    pub fn failure_message(&self) -> Option<Cow<'_, str>> {
        self.error().map(CallError::message)
    }

    pub fn into_result(self) -> Result<Vec<u8>, CallError> {
        self.into()
    }
}

impl From<CallResult> for Result<Vec<u8>, CallError> {
    fn from(result: CallResult) -> Self {
        match result {
            CallResult::Success(bytes) => Ok(bytes),
            CallResult::Failure(err) => Err(err),
        }
    }
}

impl From<CallError> for CallResult {
    fn from(err: CallError) -> Self {
        Self::Failure(err)
    }
}
