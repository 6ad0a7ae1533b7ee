//! Exclusive access to interpreters
//!
//! A Lua state admits one call at a time. These wrappers provide that
//! guarantee for multi-threaded hosts:
//! - `worker` - one interpreter owned by a dedicated thread, fed by a mailbox
//! - `pool` - round-robin over several workers
//! - `shared` - an interpreter behind a mutex

pub mod pool;
pub mod shared;
pub mod worker;

pub use pool::WorkerPool;
pub use shared::SharedInterpreter;
pub use worker::{InterpreterWorker, WorkerError, WorkerId};
