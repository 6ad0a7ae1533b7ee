//! Core result types shared by every call path.

pub mod result;

pub use result::{CallError, CallResult, ErrorKind, FUNCTION_NOT_FOUND, INVALID_RETURN_VALUE};
