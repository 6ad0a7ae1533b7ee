//! Host functions callable from Lua
//!
//! A host function takes one string and returns a string or an error message.
//! It lives in a userdata upvalue of a C closure; `__gc` drops it when Lua
//! collects the closure. Errors and panics surface as Lua errors at the call
//! site, so scripts can `pcall` them.

use std::any::Any;
use std::ffi::{c_char, c_int};
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use mlua::ffi::{self, lua_State};

use super::call::push_bytes;
use super::marshal::push_globals;
use super::stack::{type_name, StackGuard};

/// A Rust function exposed to scripts.
pub type HostFn = dyn FnMut(&[u8]) -> Result<Vec<u8>, String> + Send;

const METATABLE: &[u8] = b"luacall.HostFunction\0";

struct HostFunction {
    name: String,
    func: Box<HostFn>,
}

/// Userdata payload; `None` once collected.
type Slot = Option<HostFunction>;

/// Raw-assign `globals[name]` to a closure over `func`.
///
/// # Safety
/// `state` must be a live Lua state owned by the caller.
pub unsafe fn register(state: *mut lua_State, name: &str, func: Box<HostFn>) {
    let _guard = StackGuard::new(state);
    ffi::lua_checkstack(state, 5);
    push_globals(state);
    push_bytes(state, name.as_bytes());
    push_host_function(state, name, func);
    ffi::lua_rawset(state, -3);
}

/// Push a C closure that calls `func`. Net effect: one new slot.
///
/// # Safety
/// `state` must be a live Lua state with three free stack slots.
pub unsafe fn push_host_function(state: *mut lua_State, name: &str, func: Box<HostFn>) {
    let slot = ffi::lua_newuserdatauv(state, mem::size_of::<Slot>(), 0) as *mut Slot;
    ptr::write(
        slot,
        Some(HostFunction {
            name: name.to_string(),
            func,
        }),
    );

    if ffi::luaL_newmetatable(state, METATABLE.as_ptr() as *const c_char) != 0 {
        ffi::lua_pushcfunction(state, drop_host_function);
        ffi::lua_setfield(state, -2, b"__gc\0".as_ptr() as *const c_char);
    }
    ffi::lua_setmetatable(state, -2);
    ffi::lua_pushcclosure(state, call_host_function, 1);
}

unsafe extern "C-unwind" fn call_host_function(state: *mut lua_State) -> c_int {
    // No owned values live in this frame, so raising here is sound.
    if dispatch(state) {
        1
    } else {
        ffi::lua_error(state)
    }
}

/// Run the host function and push its result, or its error text prefixed
/// with the caller's position. Returns `false` for an error.
unsafe fn dispatch(state: *mut lua_State) -> bool {
    let slot = ffi::lua_touserdata(state, ffi::lua_upvalueindex(1)) as *mut Slot;
    let Some(host) = slot.as_mut().and_then(Option::as_mut) else {
        push_bytes(state, b"host function is no longer available");
        return false;
    };

    let outcome = match argument(state) {
        Ok(arg) => run(host, arg),
        Err(ty) => Err(format!(
            "bad argument #1 to '{}' (string expected, got {})",
            host.name,
            type_name(ty)
        )),
    };

    match outcome {
        Ok(bytes) => {
            push_bytes(state, &bytes);
            true
        }
        Err(message) => {
            ffi::luaL_where(state, 1);
            push_bytes(state, message.as_bytes());
            ffi::lua_concat(state, 2);
            false
        }
    }
}

/// The first argument as bytes. Numbers are accepted and converted.
unsafe fn argument<'a>(state: *mut lua_State) -> Result<&'a [u8], c_int> {
    let ty = ffi::lua_type(state, 1);
    if ty != ffi::LUA_TSTRING && ty != ffi::LUA_TNUMBER {
        return Err(ty);
    }

    let mut len = 0usize;
    let ptr = ffi::lua_tolstring(state, 1, &mut len);
    if ptr.is_null() {
        return Err(ty);
    }
    Ok(if len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr as *const u8, len)
    })
}

fn run(host: &mut HostFunction, arg: &[u8]) -> Result<Vec<u8>, String> {
    match catch_unwind(AssertUnwindSafe(|| (host.func)(arg))) {
        Ok(result) => result,
        Err(panic) => Err(format!(
            "host function '{}' panicked: {}",
            host.name,
            panic_message(panic.as_ref())
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

unsafe extern "C-unwind" fn drop_host_function(state: *mut lua_State) -> c_int {
    let slot = ffi::lua_touserdata(state, 1) as *mut Slot;
    if let Some(slot) = slot.as_mut() {
        let host = slot.take();
        let _ = catch_unwind(AssertUnwindSafe(move || drop(host)));
    }
    0
}
