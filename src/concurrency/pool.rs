//! Round-robin pool of interpreter workers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use super::worker::{InterpreterWorker, WorkerError, WorkerId};
use crate::core::CallResult;
use crate::errors::InterpreterError;
use crate::frontend::Config;
use crate::interop::Interpreter;
use crate::metrics::CallMetrics;

/// N workers, each with its own interpreter built by the same factory.
///
/// Interpreters do not share globals: a script that mutates global state
/// only affects the worker that ran it.
pub struct WorkerPool {
    workers: Vec<InterpreterWorker>,
    next: AtomicUsize,
    timeout: Option<Duration>,
    metrics: CallMetrics,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new<F>(size: usize, mailbox: usize, factory: F) -> Result<Self, WorkerError>
    where
        F: Fn() -> Result<Interpreter, InterpreterError> + Send + Sync + 'static,
    {
        let factory = Arc::new(factory);
        let workers = (0..size.max(1))
            .map(|i| {
                let factory = Arc::clone(&factory);
                InterpreterWorker::spawn(WorkerId(i), mailbox, move || factory())
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(target: "luacall::worker", workers = workers.len(), "worker pool started");
        Ok(Self {
            workers,
            next: AtomicUsize::new(0),
            timeout: None,
            metrics: CallMetrics::new(),
        })
    }

    /// Build the pool described by the `[workers]` and `[runtime]` sections.
    pub fn from_config(config: &Config) -> Result<Self, WorkerError> {
        let runtime = config.runtime.clone();
        let pool = Self::new(config.workers.count, config.workers.mailbox, move || runtime.build())?;
        Ok(match config.workers.timeout() {
            Some(timeout) => pool.with_timeout(timeout),
            None => pool,
        })
    }

    /// Give up on calls that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn metrics(&self) -> &CallMetrics {
        &self.metrics
    }

    pub fn call(&self, function: &str, payload: impl Into<Vec<u8>>) -> Result<CallResult, WorkerError> {
        let worker = self.pick();
        let start = Instant::now();
        let result = match self.timeout {
            Some(timeout) => worker.call_timeout(function, payload, timeout),
            None => worker.call(function, payload),
        };

        match &result {
            Ok(result) => self.metrics.record(function, start.elapsed(), result),
            Err(WorkerError::Timeout) => self.metrics.increment(format!("{}.timeout", function)),
            Err(_) => {}
        }
        result
    }

    pub async fn call_async(
        &self,
        function: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<CallResult, WorkerError> {
        let start = Instant::now();
        let result = self.pick().call_async(function, payload).await?;
        self.metrics.record(function, start.elapsed(), &result);
        Ok(result)
    }

    fn pick(&self) -> &InterpreterWorker {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(size: usize) -> WorkerPool {
        WorkerPool::new(size, 8, || {
            let mut interp = Interpreter::new()?;
            interp.load(
                "pool.lua",
                r#"
                hits = 0
                function hit(s) hits = hits + 1; return tostring(hits) end
                "#,
            )?;
            Ok(interp)
        })
        .unwrap()
    }

    #[test]
    fn test_round_robin() {
        let pool = pool(3);
        assert_eq!(pool.size(), 3);

        // each worker has its own counter, so the first three calls all see 1
        let firsts: Vec<_> = (0..3)
            .map(|_| pool.call("hit", "").unwrap().as_str().map(str::to_string))
            .collect();
        assert!(firsts.iter().all(|v| v.as_deref() == Some("1")));
        assert_eq!(pool.call("hit", "").unwrap().as_str(), Some("2"));
    }

    #[test]
    fn test_metrics_recorded() {
        let pool = pool(2);
        pool.call("hit", "").unwrap();
        pool.call("missing", "").unwrap();
        assert_eq!(pool.metrics().get_counter("hit.success"), 1);
        assert_eq!(pool.metrics().get_counter("missing.lookup"), 1);
        assert_eq!(pool.metrics().get_timing_stats("hit").unwrap().count, 1);
    }

    #[test]
    fn test_zero_size_gets_one_worker() {
        assert_eq!(pool(0).size(), 1);
    }
}
