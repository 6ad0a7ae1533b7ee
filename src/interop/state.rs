//! Interpreter ownership
//!
//! The host owns an [`Interpreter`]; the invoker only borrows it for one call.

use std::ffi::c_char;
use std::ptr::NonNull;
use std::ffi::CString;
use std::path::Path;

use mlua::ffi::{self, lua_State};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::call::{error_message, invoke_raw, message_handler};
use super::host;
use super::marshal;
use super::stack::StackGuard;
use crate::core::CallResult;
use crate::errors::{BridgeError, InterpreterError};

/// A Lua 5.4 state, either owned (closed on drop) or borrowed from a host.
pub struct Interpreter {
    state: NonNull<lua_State>,
    owned: bool,
}

// A state has no thread affinity; exclusivity is enforced through `&mut self`.
unsafe impl Send for Interpreter {}

impl Interpreter {
    /// New state with the standard libraries opened.
    pub fn new() -> Result<Self, InterpreterError> {
        let interp = Self::bare()?;
        unsafe { ffi::luaL_openlibs(interp.as_ptr()) };
        debug!(target: "luacall::state", "interpreter created with stdlib");
        Ok(interp)
    }

    /// New state without any library.
    pub fn bare() -> Result<Self, InterpreterError> {
        let state = unsafe { ffi::luaL_newstate() };
        NonNull::new(state)
            .map(|state| Self { state, owned: true })
            .ok_or(InterpreterError::Alloc)
    }

    /// Borrow a state created elsewhere. It is not closed on drop.
    ///
    /// # Safety
    /// `state` must stay live for the lifetime of the returned value and must
    /// not be used by anyone else while it is borrowed.
    pub unsafe fn from_raw(state: *mut lua_State) -> Option<Self> {
        NonNull::new(state).map(|state| Self {
            state,
            owned: false,
        })
    }

    /// Hand the state over to the caller, who becomes responsible for closing it.
    pub fn into_raw(self) -> *mut lua_State {
        let state = self.state.as_ptr();
        std::mem::forget(self);
        state
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut lua_State {
        self.state.as_ptr()
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Compile and run a chunk of Lua source.
    pub fn load(&mut self, chunk_name: &str, source: impl AsRef<[u8]>) -> Result<(), InterpreterError> {
        let source = source.as_ref();
        let state = self.as_ptr();
        let display_name = format!("={}", chunk_name.replace('\0', ""));
        let cname = CString::new(display_name).map_err(|_| InterpreterError::Syntax {
            chunk: chunk_name.to_string(),
            message: "invalid chunk name".to_string(),
        })?;

        unsafe {
            let _guard = StackGuard::new(state);
            ffi::lua_checkstack(state, 2);

            let status = ffi::luaL_loadbufferx(
                state,
                source.as_ptr() as *const c_char,
                source.len(),
                cname.as_ptr(),
                b"t\0".as_ptr() as *const c_char,
            );
            if status != ffi::LUA_OK {
                return Err(InterpreterError::Syntax {
                    chunk: chunk_name.to_string(),
                    message: error_message(state, -1),
                });
            }

            ffi::lua_pushcfunction(state, message_handler);
            ffi::lua_insert(state, -2);
            let handler = ffi::lua_gettop(state) - 1;
            if ffi::lua_pcall(state, 0, 0, handler) != ffi::LUA_OK {
                return Err(InterpreterError::Runtime {
                    chunk: chunk_name.to_string(),
                    message: error_message(state, -1),
                });
            }
        }

        info!(target: "luacall::state", chunk = chunk_name, bytes = source.len(), "chunk loaded");
        Ok(())
    }

    /// Read a script from disk and run it.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), InterpreterError> {
        let path = path.as_ref();
        let source = std::fs::read(path).map_err(|e| InterpreterError::io(path, e))?;
        self.load(&path.display().to_string(), source)
    }

    /// Call global `name` with `payload` as the single argument.
    pub fn invoke(&mut self, name: &str, payload: impl AsRef<[u8]>) -> CallResult {
        unsafe { invoke_raw(self.as_ptr(), name, payload.as_ref()) }
    }

    /// Call with a JSON-encoded payload and decode the JSON string result.
    pub fn call_json<T, R>(&mut self, name: &str, payload: &T) -> Result<R, BridgeError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let encoded = serde_json::to_vec(payload).map_err(BridgeError::Encode)?;
        let bytes = self.invoke(name, &encoded).into_result()?;
        serde_json::from_slice(&bytes).map_err(BridgeError::Decode)
    }

    /// Expose `func` to scripts as global function `name`.
    ///
    /// Scripts call it with one string (numbers are converted). An `Err` or a
    /// panic becomes a Lua error raised at the call site. The closure is
    /// dropped when Lua collects it or the interpreter closes.
    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: FnMut(&[u8]) -> Result<Vec<u8>, String> + Send + 'static,
    {
        unsafe { host::register(self.as_ptr(), name, Box::new(func)) };
        debug!(target: "luacall::state", function = name, "host function registered");
    }

    pub fn set_global(&mut self, name: &str, value: &Value) {
        unsafe { marshal::set_global(self.as_ptr(), name, value) }
    }

    pub fn set_globals(&mut self, globals: &Map<String, Value>) {
        for (name, value) in globals {
            self.set_global(name, value);
        }
    }

    pub fn get_global(&mut self, name: &str) -> Value {
        unsafe { marshal::get_global(self.as_ptr(), name) }
    }

    pub fn get_globals(&mut self, names: &[&str]) -> Map<String, Value> {
        names
            .iter()
            .map(|name| (name.to_string(), self.get_global(name)))
            .collect()
    }

    /// Number of slots on the evaluation stack.
    pub fn stack_depth(&self) -> i32 {
        unsafe { ffi::lua_gettop(self.as_ptr()) }
    }

    /// Every stack slot as a JSON value, bottom first.
    pub fn stack_snapshot(&mut self) -> Vec<Value> {
        unsafe { marshal::read_stack(self.as_ptr()) }
    }

    /// Bytes currently allocated by the interpreter.
    pub fn memory_bytes(&self) -> usize {
        unsafe {
            let kb = ffi::lua_gc(self.as_ptr(), ffi::LUA_GCCOUNT) as usize;
            let rem = ffi::lua_gc(self.as_ptr(), ffi::LUA_GCCOUNTB) as usize;
            kb * 1024 + rem
        }
    }

    /// Run a full collection cycle.
    pub fn collect_garbage(&mut self) {
        unsafe {
            ffi::lua_gc(self.as_ptr(), ffi::LUA_GCCOLLECT);
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        if self.owned {
            unsafe { ffi::lua_close(self.as_ptr()) };
            debug!(target: "luacall::state", "interpreter closed");
        }
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("state", &self.state)
            .field("owned", &self.owned)
            .finish()
    }
}
