//! Value marshaling - JSON ↔ Lua conversions
//!
//! Design: tables with a positive raw length read back as arrays, everything
//! else as objects. A table holding only `__emptyarray` forces an empty array.

use std::ffi::c_int;
use mlua::ffi::{self, lua_State};
use serde_json::{Map, Number, Value};

use super::call::push_bytes;
use super::stack::StackGuard;
use crate::logging::log_type_conversion;

/// Marker key that reads back as `[]`.
pub const EMPTY_ARRAY_MARKER: &str = "__emptyarray";

/// Nesting limit when reading tables; deeper values (and cycles) read as null.
pub const MAX_DEPTH: usize = 128;

/// Push `value` onto the stack. Net effect: exactly one new slot.
///
/// # Safety
/// `state` must be a live Lua state owned by the caller.
pub unsafe fn push_value(state: *mut lua_State, value: &Value) {
    // value + key + table per nesting level
    ffi::lua_checkstack(state, 3);

    match value {
        Value::Null => ffi::lua_pushnil(state),
        Value::Bool(b) => ffi::lua_pushboolean(state, *b as c_int),
        Value::Number(n) => push_number(state, n),
        Value::String(s) => push_bytes(state, s.as_bytes()),
        Value::Array(items) => {
            ffi::lua_createtable(state, clamp(items.len()), 0);
            for (i, item) in items.iter().enumerate() {
                push_value(state, item);
                ffi::lua_rawseti(state, -2, (i + 1) as ffi::lua_Integer);
            }
        }
        Value::Object(map) => {
            ffi::lua_createtable(state, 0, clamp(map.len()));
            for (key, item) in map {
                push_bytes(state, key.as_bytes());
                push_value(state, item);
                ffi::lua_rawset(state, -3);
            }
        }
    }
}

unsafe fn push_number(state: *mut lua_State, n: &Number) {
    if let Some(i) = n.as_i64() {
        ffi::lua_pushinteger(state, i as ffi::lua_Integer);
    } else if let Some(f) = n.as_f64() {
        ffi::lua_pushnumber(state, f as ffi::lua_Number);
    } else {
        ffi::lua_pushnil(state);
    }
}

#[inline]
fn clamp(len: usize) -> c_int {
    len.min(c_int::MAX as usize) as c_int
}

/// Read the value at `idx` without changing the stack.
///
/// # Safety
/// `idx` must be a valid index into a live Lua state.
pub unsafe fn read_value(state: *mut lua_State, idx: c_int) -> Value {
    let idx = ffi::lua_absindex(state, idx);
    read_at(state, idx, 0)
}

unsafe fn read_at(state: *mut lua_State, idx: c_int, depth: usize) -> Value {
    match ffi::lua_type(state, idx) {
        ffi::LUA_TNIL | ffi::LUA_TNONE => Value::Null,
        ffi::LUA_TBOOLEAN => Value::Bool(ffi::lua_toboolean(state, idx) != 0),
        ffi::LUA_TNUMBER => read_number(state, idx),
        ffi::LUA_TSTRING => Value::String(read_string(state, idx)),
        ffi::LUA_TTABLE if depth < MAX_DEPTH => read_table(state, idx, depth),
        ffi::LUA_TTABLE => {
            log_type_conversion("table", "null");
            Value::Null
        }
        _ => Value::Null,
    }
}

unsafe fn read_number(state: *mut lua_State, idx: c_int) -> Value {
    if ffi::lua_isinteger(state, idx) != 0 {
        let i = ffi::lua_tointegerx(state, idx, std::ptr::null_mut());
        return Value::Number(Number::from(i as i64));
    }
    let f = ffi::lua_tonumberx(state, idx, std::ptr::null_mut());
    Number::from_f64(f as f64).map_or(Value::Null, Value::Number)
}

/// Caller must have checked the slot holds a string.
unsafe fn read_string(state: *mut lua_State, idx: c_int) -> String {
    let mut len = 0usize;
    let ptr = ffi::lua_tolstring(state, idx, &mut len);
    if ptr.is_null() {
        return String::new();
    }
    let bytes = std::slice::from_raw_parts(ptr as *const u8, len);
    String::from_utf8_lossy(bytes).into_owned()
}

unsafe fn read_table(state: *mut lua_State, idx: c_int, depth: usize) -> Value {
    let _guard = StackGuard::new(state);
    ffi::lua_checkstack(state, 3);

    let len = ffi::lua_rawlen(state, idx) as usize;
    if len > 0 {
        let mut items = Vec::with_capacity(len);
        for i in 1..=len {
            ffi::lua_rawgeti(state, idx, i as ffi::lua_Integer);
            items.push(read_at(state, ffi::lua_gettop(state), depth + 1));
            ffi::lua_settop(state, -2);
        }
        return Value::Array(items);
    }

    let mut map = Map::new();
    ffi::lua_pushnil(state);
    while ffi::lua_next(state, idx) != 0 {
        let top = ffi::lua_gettop(state);
        if let Some(key) = read_key(state, top - 1) {
            map.insert(key, read_at(state, top, depth + 1));
        }
        // keep the key for the next iteration
        ffi::lua_settop(state, -2);
    }

    if map.len() == 1 && map.contains_key(EMPTY_ARRAY_MARKER) {
        return Value::Array(Vec::new());
    }
    Value::Object(map)
}

/// Stringify a table key without converting it in place (that would break
/// `lua_next`).
unsafe fn read_key(state: *mut lua_State, idx: c_int) -> Option<String> {
    match ffi::lua_type(state, idx) {
        ffi::LUA_TSTRING => Some(read_string(state, idx)),
        ffi::LUA_TNUMBER => match read_number(state, idx) {
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        },
        ffi::LUA_TBOOLEAN => Some((ffi::lua_toboolean(state, idx) != 0).to_string()),
        _ => None,
    }
}

/// Push the globals table.
///
/// # Safety
/// `state` must be a live Lua state with one free stack slot.
pub unsafe fn push_globals(state: *mut lua_State) {
    ffi::lua_rawgeti(
        state,
        ffi::LUA_REGISTRYINDEX,
        ffi::LUA_RIDX_GLOBALS as ffi::lua_Integer,
    );
}

/// Raw-assign `globals[name] = value`.
///
/// # Safety
/// `state` must be a live Lua state owned by the caller.
pub unsafe fn set_global(state: *mut lua_State, name: &str, value: &Value) {
    let _guard = StackGuard::new(state);
    ffi::lua_checkstack(state, 3);
    push_globals(state);
    push_bytes(state, name.as_bytes());
    push_value(state, value);
    ffi::lua_rawset(state, -3);
}

/// Raw-read `globals[name]`.
///
/// # Safety
/// `state` must be a live Lua state owned by the caller.
pub unsafe fn get_global(state: *mut lua_State, name: &str) -> Value {
    let _guard = StackGuard::new(state);
    ffi::lua_checkstack(state, 2);
    push_globals(state);
    push_bytes(state, name.as_bytes());
    ffi::lua_rawget(state, -2);
    read_value(state, -1)
}

/// Every slot of the stack, bottom first.
///
/// # Safety
/// `state` must be a live Lua state owned by the caller.
pub unsafe fn read_stack(state: *mut lua_State) -> Vec<Value> {
    let top = ffi::lua_gettop(state);
    (1..=top).map(|i| read_value(state, i)).collect()
}
