//! The function invoker
//!
//! Lookup, type check, argument push, protected call and result extraction in
//! one native-side operation.

use std::ffi::{c_char, c_int};
use mlua::ffi::{self, lua_State};

use super::marshal::push_globals;
use super::stack::{ReturnSlot, StackGuard};
use crate::core::{CallError, CallResult};
use crate::logging::{log_call, log_call_failure, log_call_success};

/// Slots needed on top of the caller's stack: message handler, lookup
/// function, name, then the callee and its argument.
const STACK_SLOTS: c_int = 4;

/// Invoke global function `name` with `payload` as its only argument.
///
/// The stack depth on return equals the depth on entry for every outcome.
///
/// # Safety
/// `state` must point to a live Lua state, and no other call may be using it
/// concurrently.
pub unsafe fn invoke_raw(state: *mut lua_State, name: &str, payload: &[u8]) -> CallResult {
    log_call(name, payload.len());

    let result = invoke_guarded(state, name, payload);
    super::record(&result);

    match &result {
        CallResult::Success(value) => log_call_success(name, value.len()),
        CallResult::Failure(err) => log_call_failure(name, err),
    }
    result
}

unsafe fn invoke_guarded(state: *mut lua_State, name: &str, payload: &[u8]) -> CallResult {
    let guard = StackGuard::new(state);

    if ffi::lua_checkstack(state, STACK_SLOTS) == 0 {
        return CallError::runtime("stack overflow").into();
    }

    ffi::lua_pushcfunction(state, message_handler);
    let handler = ffi::lua_gettop(state);

    // The lookup honours metamethods on the globals table, so it runs
    // protected. A lookup that raises counts as not found.
    ffi::lua_pushcfunction(state, lookup_global);
    push_bytes(state, name.as_bytes());
    if ffi::lua_pcall(state, 1, 1, 0) != ffi::LUA_OK {
        return CallError::not_found().into();
    }

    if ffi::lua_type(state, -1) != ffi::LUA_TFUNCTION {
        return CallError::not_found().into();
    }

    push_bytes(state, payload);
    if ffi::lua_pcall(state, 1, 1, handler) != ffi::LUA_OK {
        return CallError::runtime(error_bytes(state, -1)).into();
    }

    let slot = guard.slot(-1);
    match slot {
        ReturnSlot::Str(bytes) => CallResult::Success(bytes.to_vec()),
        ReturnSlot::Other(_) => CallError::invalid_return().into(),
    }
}

/// `_G[name]` with metamethods; the name is the only argument.
unsafe extern "C-unwind" fn lookup_global(state: *mut lua_State) -> c_int {
    push_globals(state);
    ffi::lua_pushvalue(state, 1);
    ffi::lua_gettable(state, -2);
    1
}

/// Error handler run inside the protected call: turns any error object into
/// a string, using `__tostring` when present.
pub(crate) unsafe extern "C-unwind" fn message_handler(state: *mut lua_State) -> c_int {
    let ty = ffi::lua_type(state, 1);
    if ty == ffi::LUA_TSTRING || ty == ffi::LUA_TNUMBER {
        ffi::lua_tolstring(state, 1, std::ptr::null_mut());
        return 1;
    }

    if ffi::luaL_callmeta(state, 1, b"__tostring\0".as_ptr() as *const c_char) != 0
        && ffi::lua_type(state, -1) == ffi::LUA_TSTRING
    {
        return 1;
    }

    push_bytes(state, describe(ty).as_bytes());
    1
}

#[inline]
pub(crate) unsafe fn push_bytes(state: *mut lua_State, bytes: &[u8]) {
    ffi::lua_pushlstring(state, bytes.as_ptr() as *const c_char, bytes.len());
}

/// Stand-in text for an error object that cannot be shown as a string.
const fn describe(ty: c_int) -> &'static str {
    match ty {
        ffi::LUA_TNIL => "(error object is a nil value)",
        ffi::LUA_TBOOLEAN => "(error object is a boolean value)",
        ffi::LUA_TTABLE => "(error object is a table value)",
        ffi::LUA_TFUNCTION => "(error object is a function value)",
        ffi::LUA_TLIGHTUSERDATA | ffi::LUA_TUSERDATA => "(error object is a userdata value)",
        ffi::LUA_TTHREAD => "(error object is a thread value)",
        _ => "(error object is a unknown value)",
    }
}

/// Bytes of the error object at `idx`, exactly as raised.
///
/// After [`message_handler`] this is always a string. Anything else is
/// described by type.
pub(crate) unsafe fn error_bytes(state: *mut lua_State, idx: c_int) -> Vec<u8> {
    let ty = ffi::lua_type(state, idx);
    if ty != ffi::LUA_TSTRING {
        return describe(ty).as_bytes().to_vec();
    }

    let mut len = 0usize;
    let ptr = ffi::lua_tolstring(state, idx, &mut len);
    if ptr.is_null() {
        return describe(ty).as_bytes().to_vec();
    }
    std::slice::from_raw_parts(ptr as *const u8, len).to_vec()
}

/// [`error_bytes`] as text, for load errors.
pub(crate) unsafe fn error_message(state: *mut lua_State, idx: c_int) -> String {
    String::from_utf8_lossy(&error_bytes(state, idx)).into_owned()
}
