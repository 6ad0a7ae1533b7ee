//! C API for embedding hosts
//!
//! Design: a lua_State pointer is the handle; every buffer handed out is owned
//! by Rust and must come back through `luacall_result_free` or
//! `luacall_free_string`.

use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;

use mlua::ffi::lua_State;
use parking_lot::Mutex;
use tracing_appender::non_blocking::WorkerGuard;

use crate::core::CallResult;
use crate::interop::Interpreter;
use crate::logging;

/// Flushes buffered log lines; held for the life of the process.
static LOG_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

/// Returned for NULL handles, NULL names and NULL payloads with a length.
pub const INVALID_ARGUMENT: &str = "Invalid argument";

/// Outcome of `luacall_invoke`. Exactly one of `result` and `error` is non-NULL.
#[repr(C)]
#[derive(Debug)]
pub struct LuacallResult {
    /// Result bytes followed by a NUL; `result_len` excludes the NUL.
    pub result: *mut c_char,
    pub result_len: usize,
    pub error: *mut c_char,
}

impl LuacallResult {
    fn success(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        let mut buf = bytes;
        buf.push(0);
        let raw = Box::into_raw(buf.into_boxed_slice()) as *mut u8;
        Self {
            result: raw.cast(),
            result_len: len,
            error: ptr::null_mut(),
        }
    }

    fn failure(message: &[u8]) -> Self {
        Self {
            result: ptr::null_mut(),
            result_len: 0,
            error: owned_string(message),
        }
    }
}

impl From<CallResult> for LuacallResult {
    fn from(result: CallResult) -> Self {
        match result {
            CallResult::Success(bytes) => Self::success(bytes),
            CallResult::Failure(err) => Self::failure(err.message_bytes()),
        }
    }
}

/// Error text as a C string; the bytes pass through unchanged except NUL,
/// which is escaped as `\0`.
fn owned_string(message: &[u8]) -> *mut c_char {
    let mut bytes = Vec::with_capacity(message.len());
    for &b in message {
        if b == 0 {
            bytes.extend_from_slice(b"\\0");
        } else {
            bytes.push(b);
        }
    }
    CString::new(bytes).unwrap_or_default().into_raw()
}

/// Install logging configured from `LUACALL_LOG_*`. Returns 1 if this call
/// installed it, 0 if logging was already set up.
#[no_mangle]
pub extern "C" fn luacall_init_logging() -> c_int {
    match logging::init() {
        Some(guard) => {
            *LOG_GUARD.lock() = Some(guard);
            1
        }
        None => 0,
    }
}

/// Create a state with the standard libraries opened. NULL on allocation failure.
#[no_mangle]
pub extern "C" fn luacall_state_new() -> *mut lua_State {
    match Interpreter::new() {
        Ok(interp) => interp.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Close a state created by `luacall_state_new`. NULL is ignored.
///
/// # Safety
/// `state` must come from `luacall_state_new` and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn luacall_state_close(state: *mut lua_State) {
    if !state.is_null() {
        mlua::ffi::lua_close(state);
    }
}

/// Compile and run a chunk. Returns 0 on success.
///
/// On failure, if `out_error` is non-NULL it receives a string to release with
/// `luacall_free_string`.
///
/// # Safety
/// `source` must point to `len` readable bytes; `chunk_name` must be NULL or a
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn luacall_load(
    state: *mut lua_State,
    source: *const c_char,
    len: usize,
    chunk_name: *const c_char,
    out_error: *mut *mut c_char,
) -> c_int {
    let fail = |message: &str, code: c_int| {
        if !out_error.is_null() {
            *out_error = owned_string(message.as_bytes());
        }
        code
    };

    if source.is_null() && len > 0 {
        return fail(INVALID_ARGUMENT, -1);
    }
    let Some(mut interp) = Interpreter::from_raw(state) else {
        return fail(INVALID_ARGUMENT, -1);
    };

    let name = if chunk_name.is_null() {
        Cow::Borrowed("chunk")
    } else {
        CStr::from_ptr(chunk_name).to_string_lossy()
    };
    let source = bytes_from(source, len);

    match interp.load(&name, source) {
        Ok(()) => 0,
        Err(e) => fail(&e.to_string(), 1),
    }
}

/// Call global `name` with the payload as its single string argument.
///
/// # Safety
/// `state` must be a live state not in use elsewhere; `name` must be a
/// NUL-terminated string; `payload` must point to `payload_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn luacall_invoke(
    state: *mut lua_State,
    name: *const c_char,
    payload: *const c_char,
    payload_len: usize,
) -> LuacallResult {
    if name.is_null() || (payload.is_null() && payload_len > 0) {
        return LuacallResult::failure(INVALID_ARGUMENT.as_bytes());
    }
    let Some(mut interp) = Interpreter::from_raw(state) else {
        return LuacallResult::failure(INVALID_ARGUMENT.as_bytes());
    };
    let Ok(name) = CStr::from_ptr(name).to_str() else {
        return LuacallResult::failure(INVALID_ARGUMENT.as_bytes());
    };

    interp.invoke(name, bytes_from(payload, payload_len)).into()
}

/// Release both buffers of a result and reset its fields. NULL is ignored.
///
/// # Safety
/// `result` must come from `luacall_invoke` and not have been freed already.
#[no_mangle]
pub unsafe extern "C" fn luacall_result_free(result: *mut LuacallResult) {
    let Some(result) = result.as_mut() else {
        return;
    };

    if !result.result.is_null() {
        let buf = ptr::slice_from_raw_parts_mut(result.result as *mut u8, result.result_len + 1);
        drop(Box::from_raw(buf));
        result.result = ptr::null_mut();
        result.result_len = 0;
    }
    luacall_free_string(result.error);
    result.error = ptr::null_mut();
}

/// Free a string returned by the API
///
/// # Safety
/// `s` must be NULL or a string handed out by this API.
#[no_mangle]
pub unsafe extern "C" fn luacall_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

unsafe fn bytes_from<'a>(data: *const c_char, len: usize) -> &'a [u8] {
    if len == 0 {
        &[]
    } else {
        slice::from_raw_parts(data as *const u8, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take(result: &mut LuacallResult) -> Result<Vec<u8>, String> {
        let out = unsafe {
            if result.error.is_null() {
                assert!(!result.result.is_null());
                let bytes = slice::from_raw_parts(result.result as *const u8, result.result_len);
                assert_eq!(*result.result.add(result.result_len), 0);
                Ok(bytes.to_vec())
            } else {
                assert!(result.result.is_null());
                Err(CStr::from_ptr(result.error).to_string_lossy().into_owned())
            }
        };
        unsafe { luacall_result_free(result) };
        assert!(result.result.is_null() && result.error.is_null());
        out
    }

    #[test]
    fn test_invoke_through_c_api() {
        let state = luacall_state_new();
        assert!(!state.is_null());

        let source = b"function echo(s) return s end\nfunction boom(s) error('bad', 0) end";
        let rc = unsafe {
            luacall_load(state, source.as_ptr().cast(), source.len(), b"api\0".as_ptr().cast(), ptr::null_mut())
        };
        assert_eq!(rc, 0);

        let payload = b"a\0b";
        let mut result =
            unsafe { luacall_invoke(state, b"echo\0".as_ptr().cast(), payload.as_ptr().cast(), payload.len()) };
        assert_eq!(take(&mut result), Ok(payload.to_vec()));

        let mut result = unsafe { luacall_invoke(state, b"boom\0".as_ptr().cast(), ptr::null(), 0) };
        assert_eq!(take(&mut result), Err("bad".to_string()));

        let mut result = unsafe { luacall_invoke(state, b"nope\0".as_ptr().cast(), ptr::null(), 0) };
        assert_eq!(take(&mut result), Err("Function not found".to_string()));

        unsafe { luacall_state_close(state) };
    }

    #[test]
    fn test_error_bytes_pass_through() {
        let state = luacall_state_new();
        let source = b"function raw(s) error('bad\\255byte', 0) end";
        let rc = unsafe { luacall_load(state, source.as_ptr().cast(), source.len(), ptr::null(), ptr::null_mut()) };
        assert_eq!(rc, 0);

        let mut result = unsafe { luacall_invoke(state, b"raw\0".as_ptr().cast(), ptr::null(), 0) };
        let message = unsafe { CStr::from_ptr(result.error) }.to_bytes().to_vec();
        assert_eq!(message, b"bad\xffbyte");
        unsafe {
            luacall_result_free(&mut result);
            luacall_state_close(state);
        }
    }

    #[test]
    fn test_init_logging_once() {
        let first = luacall_init_logging();
        assert!(logging::is_initialized());
        // a second call never installs another subscriber
        assert_eq!(luacall_init_logging(), 0);
        assert!(first == 0 || first == 1);
    }

    #[test]
    fn test_invalid_arguments() {
        let mut result = unsafe { luacall_invoke(ptr::null_mut(), b"f\0".as_ptr().cast(), ptr::null(), 0) };
        assert_eq!(take(&mut result), Err(INVALID_ARGUMENT.to_string()));

        let state = luacall_state_new();
        let mut result = unsafe { luacall_invoke(state, ptr::null(), ptr::null(), 0) };
        assert_eq!(take(&mut result), Err(INVALID_ARGUMENT.to_string()));

        let mut result = unsafe { luacall_invoke(state, b"f\0".as_ptr().cast(), ptr::null(), 3) };
        assert_eq!(take(&mut result), Err(INVALID_ARGUMENT.to_string()));
        unsafe { luacall_state_close(state) };
    }

    #[test]
    fn test_load_error_reported() {
        let state = luacall_state_new();
        let source = b"function (";
        let mut error = ptr::null_mut();
        let rc = unsafe { luacall_load(state, source.as_ptr().cast(), source.len(), ptr::null(), &mut error) };
        assert_ne!(rc, 0);
        assert!(!error.is_null());
        let message = unsafe { CStr::from_ptr(error) }.to_string_lossy().into_owned();
        assert!(message.contains("chunk"), "{}", message);
        unsafe {
            luacall_free_string(error);
            luacall_state_close(state);
        }
    }
}
