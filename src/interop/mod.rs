//! Interoperability - call into the embedded Lua interpreter
//!
//! Design: one native-side crossing per logical call, stack balanced by RAII.
//!
//! Architecture:
//! - `stack.rs` - stack guard and the `String | Other` return slot
//! - `call.rs` - the function invoker
//! - `marshal.rs` - JSON ↔ Lua value conversions
//! - `host.rs` - Rust functions callable from Lua
//! - `state.rs` - interpreter ownership, script loading, globals

mod call;
mod host;
mod marshal;
mod stack;
mod state;

pub use call::invoke_raw;
pub use host::HostFn;
pub use marshal::{push_value, read_value, EMPTY_ARRAY_MARKER, MAX_DEPTH};
pub use stack::{type_name, ReturnSlot, StackGuard};
pub use state::Interpreter;

use crate::core::{CallResult, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};

static CALLS_MADE: AtomicU64 = AtomicU64::new(0);
static LOOKUP_FAILURES: AtomicU64 = AtomicU64::new(0);
static RUNTIME_FAILURES: AtomicU64 = AtomicU64::new(0);
static TYPE_FAILURES: AtomicU64 = AtomicU64::new(0);

pub(crate) fn record(result: &CallResult) {
    CALLS_MADE.fetch_add(1, Ordering::Relaxed);
    if let Some(err) = result.error() {
        let counter = match err.kind() {
            ErrorKind::Lookup => &LOOKUP_FAILURES,
            ErrorKind::Runtime => &RUNTIME_FAILURES,
            ErrorKind::Type => &TYPE_FAILURES,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Process-wide invocation counters.
pub fn stats() -> InteropStats {
    InteropStats {
        calls_made: CALLS_MADE.load(Ordering::Relaxed),
        lookup_failures: LOOKUP_FAILURES.load(Ordering::Relaxed),
        runtime_failures: RUNTIME_FAILURES.load(Ordering::Relaxed),
        type_failures: TYPE_FAILURES.load(Ordering::Relaxed),
    }
}

/// Interop statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteropStats {
    pub calls_made: u64,
    pub lookup_failures: u64,
    pub runtime_failures: u64,
    pub type_failures: u64,
}

impl InteropStats {
    pub fn failures(&self) -> u64 {
        self.lookup_failures + self.runtime_failures + self.type_failures
    }

    pub fn successes(&self) -> u64 {
        self.calls_made.saturating_sub(self.failures())
    }
}
