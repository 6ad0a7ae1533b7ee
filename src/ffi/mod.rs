//! Foreign Function Interface
//!
//! C-compatible entry points for hosts that embed the invoker without Rust.
//! The matching declarations live in `include/luacall.h`.

pub mod c_api;

pub use c_api::{
    luacall_free_string, luacall_init_logging, luacall_invoke, luacall_load, luacall_result_free, luacall_state_close,
    luacall_state_new, LuacallResult, INVALID_ARGUMENT,
};
