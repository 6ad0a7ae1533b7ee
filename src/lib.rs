//! Call global Lua functions with a string payload and get a string back.
//!
//! The invoker crosses into the interpreter once per call, leaves the stack
//! exactly as it found it, and reports failures as values:
//!
//! ```no_run
//! use luacall::Interpreter;
//!
//! let mut lua = Interpreter::new()?;
//! lua.load("main.lua", "function greet(s) return 'hello ' .. s end")?;
//! assert_eq!(lua.invoke("greet", "world").as_str(), Some("hello world"));
//! # Ok::<(), luacall::InterpreterError>(())
//! ```

// Core modules
pub mod core;
pub mod concurrency;
pub mod errors;
pub mod ffi;
pub mod frontend;
pub mod interop;
pub mod logging;
pub mod metrics;

#[cfg(feature = "python")]
mod python;

// Re-export commonly used items
pub use self::core::{CallError, CallResult, ErrorKind, FUNCTION_NOT_FOUND, INVALID_RETURN_VALUE};
pub use concurrency::{InterpreterWorker, SharedInterpreter, WorkerError, WorkerId, WorkerPool};
pub use errors::{BridgeError, InterpreterError};
pub use frontend::{cli_main, Config, ConfigError};
pub use interop::{invoke_raw, stats, Interpreter, InteropStats};
pub use logging::{init_logging, LogConfig, LogFormat, LogOutput};
pub use metrics::{CallMetrics, TimingStats};
