//! Evaluation stack bookkeeping
//!
//! Every path that touches the Lua stack holds a [`StackGuard`]; the depth seen
//! on entry is restored when the guard drops, whichever way the caller exits.

use std::ffi::c_int;
use std::marker::PhantomData;
use mlua::ffi::{self, lua_State};

/// Restores the stack top recorded at construction.
pub struct StackGuard {
    state: *mut lua_State,
    top: c_int,
}

impl StackGuard {
    /// Snapshot the current stack depth.
    ///
    /// # Safety
    /// `state` must be a live Lua state not in use by anyone else for the
    /// lifetime of the guard.
    #[inline]
    pub unsafe fn new(state: *mut lua_State) -> Self {
        Self {
            state,
            top: ffi::lua_gettop(state),
        }
    }

    /// Depth recorded on entry.
    #[inline]
    pub fn entry_depth(&self) -> c_int {
        self.top
    }

    /// Current depth relative to entry.
    #[inline]
    pub fn pushed(&self) -> c_int {
        unsafe { ffi::lua_gettop(self.state) - self.top }
    }

    /// Read the value at `idx` as a return slot.
    ///
    /// The borrowed bytes live no longer than the guard, so they cannot be
    /// observed after the value is popped.
    ///
    /// # Safety
    /// `idx` must be a valid stack index.
    pub unsafe fn slot(&self, idx: c_int) -> ReturnSlot<'_> {
        ReturnSlot::read(self.state, idx)
    }
}

impl Drop for StackGuard {
    #[inline]
    fn drop(&mut self) {
        unsafe { ffi::lua_settop(self.state, self.top) }
    }
}

/// A dynamically typed Lua value narrowed to what the bridge accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnSlot<'g> {
    Str(&'g [u8]),
    /// Anything else, by Lua type name.
    Other(&'static str),
}

impl<'g> ReturnSlot<'g> {
    unsafe fn read(state: *mut lua_State, idx: c_int) -> Self {
        let ty = ffi::lua_type(state, idx);
        if ty != ffi::LUA_TSTRING {
            return Self::Other(type_name(ty));
        }

        // Only strings reach here, so lua_tolstring does not convert in place.
        let mut len = 0usize;
        let ptr = ffi::lua_tolstring(state, idx, &mut len);
        if ptr.is_null() {
            return Self::Other(type_name(ty));
        }
        Self::Str(borrow_bytes(ptr, len, PhantomData))
    }

    pub fn to_owned_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Str(bytes) => Some(bytes.to_vec()),
            Self::Other(_) => None,
        }
    }
}

#[inline]
unsafe fn borrow_bytes<'g>(
    ptr: *const std::ffi::c_char,
    len: usize,
    _lifetime: PhantomData<&'g ()>,
) -> &'g [u8] {
    if len == 0 {
        return &[];
    }
    std::slice::from_raw_parts(ptr as *const u8, len)
}

/// Static name of a Lua type tag.
pub const fn type_name(ty: c_int) -> &'static str {
    match ty {
        ffi::LUA_TNONE => "no value",
        ffi::LUA_TNIL => "nil",
        ffi::LUA_TBOOLEAN => "boolean",
        ffi::LUA_TLIGHTUSERDATA | ffi::LUA_TUSERDATA => "userdata",
        ffi::LUA_TNUMBER => "number",
        ffi::LUA_TSTRING => "string",
        ffi::LUA_TTABLE => "table",
        ffi::LUA_TFUNCTION => "function",
        ffi::LUA_TTHREAD => "thread",
        _ => "unknown",
    }
}
