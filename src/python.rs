//! Python bindings (`python` feature)

use std::path::PathBuf;

use pyo3::exceptions::{PyIOError, PyLookupError, PyRuntimeError, PySyntaxError, PyTypeError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;

use crate::core::{CallError, CallResult, ErrorKind};
use crate::errors::InterpreterError;
use crate::interop::Interpreter;

#[derive(FromPyObject)]
enum Payload<'a> {
    Bytes(&'a [u8]),
    Text(String),
}

impl Payload<'_> {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Bytes(b) => b,
            Self::Text(s) => s.as_bytes(),
        }
    }
}

fn call_error(err: CallError) -> PyErr {
    let kind = err.kind();
    let message = err.into_message();
    match kind {
        ErrorKind::Lookup => PyErr::new::<PyLookupError, _>(message),
        ErrorKind::Runtime => PyErr::new::<PyRuntimeError, _>(message),
        ErrorKind::Type => PyErr::new::<PyTypeError, _>(message),
    }
}

fn interpreter_error(err: InterpreterError) -> PyErr {
    match err {
        InterpreterError::Syntax { .. } => PyErr::new::<PySyntaxError, _>(err.to_string()),
        InterpreterError::Io { .. } => PyErr::new::<PyIOError, _>(err.to_string()),
        _ => PyErr::new::<PyRuntimeError, _>(err.to_string()),
    }
}

/// One interpreter, usable only from the Python thread that created it.
#[pyclass(unsendable)]
struct LuaBridge {
    interp: Interpreter,
}

#[pymethods]
impl LuaBridge {
    #[new]
    #[pyo3(signature = (stdlib = true))]
    fn new(stdlib: bool) -> PyResult<Self> {
        let interp = if stdlib { Interpreter::new() } else { Interpreter::bare() };
        Ok(Self {
            interp: interp.map_err(interpreter_error)?,
        })
    }

    #[pyo3(signature = (source, chunk_name = "chunk"))]
    fn load(&mut self, source: &str, chunk_name: &str) -> PyResult<()> {
        self.interp.load(chunk_name, source).map_err(interpreter_error)
    }

    fn load_file(&mut self, path: PathBuf) -> PyResult<()> {
        self.interp.load_file(path).map_err(interpreter_error)
    }

    /// Call a global function; returns its string result as bytes.
    #[pyo3(signature = (name, payload = None))]
    fn invoke<'py>(
        &mut self,
        py: Python<'py>,
        name: &str,
        payload: Option<Payload<'_>>,
    ) -> PyResult<&'py PyBytes> {
        let payload = payload.as_ref().map(Payload::as_bytes).unwrap_or_default();
        match self.interp.invoke(name, payload) {
            CallResult::Success(bytes) => Ok(PyBytes::new(py, &bytes)),
            CallResult::Failure(err) => Err(call_error(err)),
        }
    }

    fn stack_depth(&self) -> i32 {
        self.interp.stack_depth()
    }

    fn memory_bytes(&self) -> usize {
        self.interp.memory_bytes()
    }

    fn __repr__(&self) -> String {
        format!("LuaBridge(stack_depth={})", self.interp.stack_depth())
    }
}

#[pymodule]
fn luacall(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<LuaBridge>()?;
    m.add("FUNCTION_NOT_FOUND", crate::core::FUNCTION_NOT_FOUND)?;
    m.add("INVALID_RETURN_VALUE", crate::core::INVALID_RETURN_VALUE)?;
    Ok(())
}
