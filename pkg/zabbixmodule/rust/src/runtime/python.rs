// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Embedded CPython through PyO3. Every operation holds the GIL only for
//! its own duration.
//!
//! Between operations no host thread holds the GIL, so a script thread may
//! own it when the host forks. The fork handlers registered at start take
//! the GIL before `fork()` and hand it back on both sides afterwards.

use std::ffi::c_int;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use log::{error, warn};
use pyo3::exceptions::PyTypeError;
use pyo3::prelude::*;
use pyo3::types::{PyIterator, PyLong, PyString, PyTuple, PyType};
use pyo3::{PyErr, ffi};

use super::{Fault, FaultPending, RawFault, RtResult, Runtime};

#[derive(Debug, Default)]
pub struct PythonRuntime;

impl PythonRuntime {
    pub fn new() -> Self {
        Self
    }
}

const NOT_RUNNING: u8 = 0;
const HELD_LOCKED: u8 = 1;
const HELD_UNLOCKED: u8 = 2;
/// `os.fork()` from the script, which does its own bookkeeping.
const SCRIPT_FORK: u8 = 3;

/// What `before_fork` did, consumed by the parent and child handlers.
static FORK_GIL: AtomicU8 = AtomicU8::new(NOT_RUNNING);
/// Set in a child whose interpreter was already reinitialized at fork time.
static CHILD_REINITIALIZED: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn before_fork() {
    // SAFETY: `Py_IsInitialized` and `PyGILState_Check` need no GIL. The GIL
    // is taken before `PyOS_BeforeFork`, which requires it.
    let held = unsafe {
        if ffi::Py_IsInitialized() == 0 {
            NOT_RUNNING
        } else if ffi::PyGILState_Check() == 1 {
            SCRIPT_FORK
        } else {
            let state = ffi::PyGILState_Ensure();
            ffi::PyOS_BeforeFork();
            match state {
                ffi::PyGILState_STATE::PyGILState_LOCKED => HELD_LOCKED,
                ffi::PyGILState_STATE::PyGILState_UNLOCKED => HELD_UNLOCKED,
            }
        }
    };
    FORK_GIL.store(held, Ordering::SeqCst);
}

fn taken_gil() -> (u8, Option<ffi::PyGILState_STATE>) {
    let held = FORK_GIL.swap(NOT_RUNNING, Ordering::SeqCst);
    let state = match held {
        HELD_LOCKED => Some(ffi::PyGILState_STATE::PyGILState_LOCKED),
        HELD_UNLOCKED => Some(ffi::PyGILState_STATE::PyGILState_UNLOCKED),
        _ => None,
    };
    (held, state)
}

unsafe extern "C" fn after_fork_parent() {
    if let (_, Some(state)) = taken_gil() {
        // SAFETY: `before_fork` left this thread holding the GIL with `state`.
        unsafe {
            ffi::PyOS_AfterFork_Parent();
            ffi::PyGILState_Release(state);
        }
    }
}

unsafe extern "C" fn after_fork_child() {
    match taken_gil() {
        (_, Some(state)) => {
            // SAFETY: the forking thread is the only one left and holds the
            // GIL taken in `before_fork`.
            unsafe {
                ffi::PyOS_AfterFork_Child();
                ffi::PyGILState_Release(state);
            }
            CHILD_REINITIALIZED.store(true, Ordering::SeqCst);
        }
        (SCRIPT_FORK, None) => CHILD_REINITIALIZED.store(true, Ordering::SeqCst),
        _ => {}
    }
}

fn install_fork_handlers() {
    static RESULT: OnceLock<c_int> = OnceLock::new();
    let rc = *RESULT.get_or_init(|| {
        // SAFETY: the handlers only run interpreter fork bookkeeping and
        // touch atomics.
        unsafe {
            libc::pthread_atfork(
                Some(before_fork),
                Some(after_fork_parent),
                Some(after_fork_child),
            )
        }
    });
    if rc != 0 {
        error!("Unable to register interpreter fork handlers: pthread_atfork() returned {rc}");
    }
}

/// Put the error back into the interpreter's fault slot.
fn pending<T>(py: Python<'_>, result: PyResult<T>) -> RtResult<T> {
    result.map_err(|e| {
        e.restore(py);
        FaultPending
    })
}

impl Runtime for PythonRuntime {
    type Object = PyObject;

    fn initialize(&self) {
        pyo3::prepare_freethreaded_python();
        install_fork_handlers();
    }

    fn is_initialized(&self) -> bool {
        // SAFETY: callable at any time, with or without the GIL.
        unsafe { ffi::Py_IsInitialized() != 0 }
    }

    fn finalize(&self) {
        // SAFETY: the interpreter is running and no Python object is used
        // afterwards. The GIL state is not released again because it does not
        // survive finalization.
        let rc = unsafe {
            ffi::PyGILState_Ensure();
            ffi::Py_FinalizeEx()
        };
        if rc != 0 {
            warn!("Py_FinalizeEx() failed with code {rc}");
        }
    }

    fn reinit_after_fork(&self) {
        if CHILD_REINITIALIZED.swap(false, Ordering::SeqCst) {
            return;
        }
        Python::with_gil(|_| {
            // SAFETY: called in the child right after fork, holding the GIL.
            unsafe { ffi::PyOS_AfterFork_Child() }
        });
    }

    fn import(&self, name: &str) -> RtResult<PyObject> {
        Python::with_gil(|py| pending(py, py.import_bound(name).map(|m| m.into_any().unbind())))
    }

    fn getattr(&self, obj: &PyObject, name: &str) -> RtResult<PyObject> {
        Python::with_gil(|py| pending(py, obj.bind(py).getattr(name).map(Bound::unbind)))
    }

    fn setattr(&self, obj: &PyObject, name: &str, value: PyObject) -> RtResult<()> {
        Python::with_gil(|py| pending(py, obj.bind(py).setattr(name, value)))
    }

    fn call(&self, callable: &PyObject, args: &[&PyObject]) -> RtResult<PyObject> {
        Python::with_gil(|py| {
            let args = PyTuple::new_bound(py, args.iter().map(|a| a.clone_ref(py)));
            pending(py, callable.bind(py).call1(args).map(Bound::unbind))
        })
    }

    fn iter(&self, obj: &PyObject) -> RtResult<PyObject> {
        Python::with_gil(|py| pending(py, obj.bind(py).iter().map(|i| i.into_any().unbind())))
    }

    fn next(&self, iterator: &PyObject) -> RtResult<Option<PyObject>> {
        Python::with_gil(|py| {
            let mut iterator = match iterator.bind(py).downcast::<PyIterator>() {
                Ok(iterator) => iterator.clone(),
                Err(_) => {
                    PyTypeError::new_err("object is not an iterator").restore(py);
                    return Err(FaultPending);
                }
            };
            pending(py, iterator.next().transpose().map(|o| o.map(Bound::unbind)))
        })
    }

    fn is_none(&self, obj: &PyObject) -> bool {
        Python::with_gil(|py| obj.is_none(py))
    }

    fn is_type(&self, obj: &PyObject) -> bool {
        Python::with_gil(|py| obj.bind(py).is_instance_of::<PyType>())
    }

    fn is_callable(&self, obj: &PyObject) -> bool {
        Python::with_gil(|py| obj.bind(py).is_callable())
    }

    fn is_int(&self, obj: &PyObject) -> bool {
        Python::with_gil(|py| obj.bind(py).is_instance_of::<PyLong>())
    }

    fn is_str(&self, obj: &PyObject) -> bool {
        Python::with_gil(|py| obj.bind(py).is_instance_of::<PyString>())
    }

    fn none(&self) -> PyObject {
        Python::with_gil(|py| py.None())
    }

    fn new_bool(&self, value: bool) -> PyObject {
        Python::with_gil(|py| value.into_py(py))
    }

    fn new_int(&self, value: i64) -> RtResult<PyObject> {
        Ok(Python::with_gil(|py| value.into_py(py)))
    }

    fn new_str(&self, value: &str) -> RtResult<PyObject> {
        Ok(Python::with_gil(|py| PyString::new_bound(py, value).into_any().unbind()))
    }

    fn new_tuple(&self, items: Vec<PyObject>) -> RtResult<PyObject> {
        Ok(Python::with_gil(|py| PyTuple::new_bound(py, items).into_any().unbind()))
    }

    fn int_value(&self, obj: &PyObject) -> RtResult<i64> {
        Python::with_gil(|py| pending(py, obj.bind(py).extract::<i64>()))
    }

    fn uint64_value(&self, obj: &PyObject) -> RtResult<u64> {
        Python::with_gil(|py| pending(py, obj.bind(py).extract::<u64>()))
    }

    fn float_value(&self, obj: &PyObject) -> RtResult<f64> {
        Python::with_gil(|py| pending(py, obj.bind(py).extract::<f64>()))
    }

    fn utf8_value(&self, obj: &PyObject) -> RtResult<String> {
        Python::with_gil(|py| pending(py, obj.bind(py).extract::<String>()))
    }

    fn join(&self, separator: &str, items: &PyObject) -> RtResult<PyObject> {
        Python::with_gil(|py| {
            let separator = PyString::new_bound(py, separator);
            pending(
                py,
                separator
                    .call_method1("join", (items.bind(py),))
                    .map(Bound::unbind),
            )
        })
    }

    fn fetch_fault(&self) -> Option<RawFault<PyObject>> {
        if !self.is_initialized() {
            return None;
        }
        Python::with_gil(|py| {
            PyErr::take(py).map(|err| RawFault {
                kind: err.get_type_bound(py).into_any().unbind(),
                value: Some(err.value_bound(py).clone().into_any().unbind()),
                traceback: err.traceback_bound(py).map(|tb| tb.into_any().unbind()),
            })
        })
    }

    fn normalize_fault(&self, raw: RawFault<PyObject>) -> Fault<PyObject> {
        Python::with_gil(|py| Fault {
            kind: raw.kind,
            value: raw.value.unwrap_or_else(|| py.None()),
            traceback: raw.traceback.unwrap_or_else(|| py.None()),
        })
    }

    fn clear_fault(&self) {
        if !self.is_initialized() {
            return;
        }
        Python::with_gil(|py| drop(PyErr::take(py)));
    }

    fn release(&self, obj: PyObject) {
        Python::with_gil(|_| drop(obj));
    }
}
