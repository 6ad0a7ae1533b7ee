//! Mutex-guarded interpreter handle

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::CallResult;
use crate::interop::Interpreter;

/// A cloneable handle; the lock admits one call at a time.
#[derive(Debug, Clone)]
pub struct SharedInterpreter {
    inner: Arc<Mutex<Interpreter>>,
}

impl SharedInterpreter {
    pub fn new(interp: Interpreter) -> Self {
        Self {
            inner: Arc::new(Mutex::new(interp)),
        }
    }

    /// Block until the lock is free, then invoke.
    pub fn invoke(&self, function: &str, payload: impl AsRef<[u8]>) -> CallResult {
        self.inner.lock().invoke(function, payload)
    }

    /// Invoke if the lock frees up within `timeout`.
    pub fn try_invoke_for(
        &self,
        function: &str,
        payload: impl AsRef<[u8]>,
        timeout: Duration,
    ) -> Option<CallResult> {
        self.inner
            .try_lock_for(timeout)
            .map(|mut interp| interp.invoke(function, payload))
    }

    /// Run `f` with exclusive access, e.g. to load scripts or set globals.
    pub fn with<R>(&self, f: impl FnOnce(&mut Interpreter) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_shared_across_threads() {
        let mut interp = Interpreter::new().unwrap();
        interp
            .load("shared.lua", "n = 0\nfunction bump(s) n = n + 1; return tostring(n) end")
            .unwrap();
        let shared = SharedInterpreter::new(interp);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        assert!(shared.invoke("bump", "").is_success());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(shared.invoke("bump", "").as_str(), Some("1001"));
        assert_eq!(shared.with(|interp| interp.stack_depth()), 0);
    }

    #[test]
    fn test_try_invoke_for() {
        let shared = SharedInterpreter::new(Interpreter::new().unwrap());
        shared.with(|interp| interp.load("e.lua", "function e(s) return s end")).unwrap();
        let result = shared.try_invoke_for("e", "x", Duration::from_millis(50));
        assert_eq!(result.unwrap().as_str(), Some("x"));
    }
}
