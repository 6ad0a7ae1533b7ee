//! One interpreter per thread
//!
//! An [`InterpreterWorker`] owns its interpreter on a dedicated OS thread and
//! serves requests from a bounded mailbox, so at most one call is ever in
//! flight against that state.

use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::core::CallResult;
use crate::errors::InterpreterError;
use crate::interop::Interpreter;

/// Worker identifier, used in thread names and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "luacall-worker-{}", self.0)
    }
}

struct Request {
    function: String,
    payload: Vec<u8>,
    reply: Sender<CallResult>,
}

pub struct InterpreterWorker {
    id: WorkerId,
    sender: Option<Sender<Request>>,
    handle: Option<JoinHandle<()>>,
}

impl InterpreterWorker {
    /// Start a worker whose interpreter is built by `factory` on the worker
    /// thread. Returns once the interpreter is ready, or with the factory's
    /// error.
    ///
    /// A `mailbox` of 0 means unbounded.
    pub fn spawn<F>(id: WorkerId, mailbox: usize, factory: F) -> Result<Self, WorkerError>
    where
        F: FnOnce() -> Result<Interpreter, InterpreterError> + Send + 'static,
    {
        let (tx, rx) = if mailbox > 0 {
            bounded(mailbox)
        } else {
            unbounded()
        };
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let handle = thread::Builder::new()
            .name(id.to_string())
            .spawn(move || {
                let interp = match factory() {
                    Ok(interp) => {
                        let _ = ready_tx.send(Ok(()));
                        interp
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                serve(id, interp, rx);
            })
            .map_err(|e| WorkerError::Startup(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!(target: "luacall::worker", worker = %id, "worker started");
                Ok(Self {
                    id,
                    sender: Some(tx),
                    handle: Some(handle),
                })
            }
            Ok(Err(message)) => {
                let _ = handle.join();
                Err(WorkerError::Startup(message))
            }
            Err(_) => {
                let _ = handle.join();
                Err(WorkerError::Startup("worker exited during startup".to_string()))
            }
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Invoke and wait for the result.
    pub fn call(&self, function: &str, payload: impl Into<Vec<u8>>) -> Result<CallResult, WorkerError> {
        let (request, reply) = self.request(function, payload);
        self.sender()?
            .send(request)
            .map_err(|_| WorkerError::Disconnected)?;
        reply.recv().map_err(|_| WorkerError::Disconnected)
    }

    /// Invoke, giving up after `timeout`.
    ///
    /// The call itself is not interrupted: it runs to completion on the worker
    /// and its result is dropped. Later calls queue behind it.
    pub fn call_timeout(
        &self,
        function: &str,
        payload: impl Into<Vec<u8>>,
        timeout: Duration,
    ) -> Result<CallResult, WorkerError> {
        let deadline = Instant::now() + timeout;
        let (request, reply) = self.request(function, payload);
        self.sender()?
            .send_deadline(request, deadline)
            .map_err(|e| match e {
                flume::SendTimeoutError::Timeout(_) => WorkerError::Timeout,
                flume::SendTimeoutError::Disconnected(_) => WorkerError::Disconnected,
            })?;
        reply.recv_deadline(deadline).map_err(|e| match e {
            flume::RecvTimeoutError::Timeout => {
                warn!(target: "luacall::worker", worker = %self.id, function, "call timed out");
                WorkerError::Timeout
            }
            flume::RecvTimeoutError::Disconnected => WorkerError::Disconnected,
        })
    }

    /// Like [`call`](Self::call) but fails fast when the mailbox is full.
    pub fn try_call(&self, function: &str, payload: impl Into<Vec<u8>>) -> Result<CallResult, WorkerError> {
        let (request, reply) = self.request(function, payload);
        self.sender()?.try_send(request).map_err(|e| match e {
            flume::TrySendError::Full(_) => WorkerError::MailboxFull,
            flume::TrySendError::Disconnected(_) => WorkerError::Disconnected,
        })?;
        reply.recv().map_err(|_| WorkerError::Disconnected)
    }

    pub async fn call_async(
        &self,
        function: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<CallResult, WorkerError> {
        let (request, reply) = self.request(function, payload);
        self.sender()?
            .send_async(request)
            .await
            .map_err(|_| WorkerError::Disconnected)?;
        reply.recv_async().await.map_err(|_| WorkerError::Disconnected)
    }

    /// Requests waiting in the mailbox.
    pub fn pending(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    fn sender(&self) -> Result<&Sender<Request>, WorkerError> {
        self.sender.as_ref().ok_or(WorkerError::Disconnected)
    }

    fn request(&self, function: &str, payload: impl Into<Vec<u8>>) -> (Request, Receiver<CallResult>) {
        let (reply, rx) = bounded(1);
        let request = Request {
            function: function.to_string(),
            payload: payload.into(),
            reply,
        };
        (request, rx)
    }
}

impl fmt::Debug for InterpreterWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterWorker")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .field("running", &self.sender.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for InterpreterWorker {
    fn drop(&mut self) {
        // Closing the mailbox ends the serve loop once queued calls finish.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(id: WorkerId, mut interp: Interpreter, rx: Receiver<Request>) {
    while let Ok(request) = rx.recv() {
        let result = interp.invoke(&request.function, &request.payload);
        // The caller may have timed out and gone away.
        let _ = request.reply.send(result);
    }
    debug!(target: "luacall::worker", worker = %id, "worker stopped");
}

/// Worker errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    Disconnected,
    MailboxFull,
    Timeout,
    Startup(String),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "worker disconnected"),
            Self::MailboxFull => write!(f, "worker mailbox full"),
            Self::Timeout => write!(f, "worker call timed out"),
            Self::Startup(msg) => write!(f, "worker failed to start: {}", msg),
        }
    }
}

impl std::error::Error for WorkerError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_worker(mailbox: usize) -> InterpreterWorker {
        InterpreterWorker::spawn(WorkerId(0), mailbox, || {
            let mut interp = Interpreter::new()?;
            interp.load(
                "worker.lua",
                r#"
                calls = 0
                function echo(s) calls = calls + 1; return s end
                function count(s) return tostring(calls) end
                function spin(s)
                    local deadline = os.clock() + tonumber(s)
                    while os.clock() < deadline do end
                    return "done"
                end
                "#,
            )?;
            Ok(interp)
        })
        .unwrap()
    }

    #[test]
    fn test_worker_call() {
        let worker = echo_worker(4);
        assert_eq!(worker.call("echo", "hi").unwrap().as_str(), Some("hi"));
        assert_eq!(
            worker.call("missing", "").unwrap().failure_message().as_deref(),
            Some("Function not found")
        );
    }

    #[test]
    fn test_worker_keeps_state_between_calls() {
        let worker = echo_worker(4);
        for _ in 0..5 {
            worker.call("echo", "x").unwrap();
        }
        assert_eq!(worker.call("count", "").unwrap().as_str(), Some("5"));
    }

    #[test]
    fn test_worker_startup_error() {
        let err = InterpreterWorker::spawn(WorkerId(1), 1, || {
            let mut interp = Interpreter::new()?;
            interp.load("bad.lua", "this is not lua")?;
            Ok(interp)
        })
        .unwrap_err();
        assert!(matches!(err, WorkerError::Startup(_)));
    }

    #[test]
    fn test_worker_debug() {
        let worker = echo_worker(4);
        let text = format!("{:?}", worker);
        assert!(text.starts_with("InterpreterWorker"), "{}", text);
        assert!(text.contains("WorkerId(0)"), "{}", text);
    }

    #[test]
    fn test_worker_timeout_does_not_poison() {
        let worker = echo_worker(4);
        let err = worker
            .call_timeout("spin", "0.3", Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err, WorkerError::Timeout);

        let result = worker
            .call_timeout("echo", "after", Duration::from_secs(5))
            .unwrap();
        assert_eq!(result.as_str(), Some("after"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(WorkerError::Timeout.to_string(), "worker call timed out");
        assert_eq!(WorkerId(3).to_string(), "luacall-worker-3");
    }
}
