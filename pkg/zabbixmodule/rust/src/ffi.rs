// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! C ABI of a loadable host module.
//!
//! Exports:
//! - `zbx_module_api_version`: always available.
//! - `zbx_module_init`, `zbx_module_uninit`, `zbx_module_item_list`: with the
//!   `python` feature, bound to the embedded CPython runtime.
//!
//! The per-metric handler is not exported; its address is stored in every
//! descriptor returned by `zbx_module_item_list`. No panic crosses the
//! boundary: a panic is logged and reported as a failure.

use std::any::Any;
use std::ffi::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::error;

use crate::abi::{
    AGENT_REQUEST, AGENT_RESULT, MetricHandler, SYSINFO_RET_FAIL, ZBX_METRIC,
    ZBX_MODULE_API_VERSION_ONE, ZBX_MODULE_FAIL,
};
use crate::bridge::Bridge;
use crate::registry::empty_list;
use crate::runtime::Runtime;

#[unsafe(no_mangle)]
pub extern "C" fn zbx_module_api_version() -> c_int {
    ZBX_MODULE_API_VERSION_ONE
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Run `f`, turning a panic into `on_panic`.
fn guarded<T>(call: &str, on_panic: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            error!("{call} panicked: {}", panic_message(payload.as_ref()));
            on_panic
        }
    }
}

/// Process-wide home of the bridge behind the exported functions.
pub struct ModuleCell<R: Runtime> {
    bridge: Mutex<Option<Bridge<R>>>,
}

impl<R: Runtime> Default for ModuleCell<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runtime> ModuleCell<R> {
    pub const fn new() -> Self {
        Self {
            bridge: Mutex::new(None),
        }
    }

    /// A panic while the lock was held must not disable the module for good.
    fn lock(&self) -> MutexGuard<'_, Option<Bridge<R>>> {
        self.bridge.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build the bridge with `make` and initialize it. A bridge that already
    /// exists refuses a second init itself.
    pub fn init<F>(&self, make: F) -> c_int
    where
        F: FnOnce() -> anyhow::Result<Bridge<R>>,
    {
        guarded("zbx_module_init", ZBX_MODULE_FAIL, || {
            let mut slot = self.lock();
            if let Some(bridge) = slot.as_mut() {
                return bridge.init();
            }
            match make() {
                Ok(bridge) => slot.insert(bridge).init(),
                Err(e) => {
                    error!("Initialization failed: {e:#}");
                    ZBX_MODULE_FAIL
                }
            }
        })
    }

    pub fn uninit(&self) -> c_int {
        guarded("zbx_module_uninit", ZBX_MODULE_FAIL, || match self.lock().as_mut() {
            Some(bridge) => bridge.uninit(),
            None => {
                error!("Uninitialization failed: module was never initialized");
                ZBX_MODULE_FAIL
            }
        })
    }

    pub fn item_list(&self, handler: MetricHandler) -> *mut ZBX_METRIC {
        guarded("zbx_module_item_list", empty_list(), || match self.lock().as_mut() {
            Some(bridge) => bridge.item_list(handler),
            None => {
                error!("Unable to get item list: module was never initialized");
                empty_list()
            }
        })
    }

    /// # Safety
    /// `request` and `result` must be NULL or point to valid host records
    /// for the duration of the call.
    pub unsafe fn get_value(&self, request: *mut AGENT_REQUEST, result: *mut AGENT_RESULT) -> c_int {
        if result.is_null() {
            error!("Unable to get value: NULL result");
            return SYSINFO_RET_FAIL;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: `result` is non-NULL and valid per the caller.
            let result = unsafe { &mut *result };
            // SAFETY: `request` is NULL or valid per the caller.
            let Some(request) = (unsafe { request.as_ref() }) else {
                error!("Unable to get value: NULL request");
                result.set_failure();
                return SYSINFO_RET_FAIL;
            };
            match self.lock().as_ref() {
                // SAFETY: both records are valid per the caller.
                Some(bridge) => unsafe { bridge.get_value(request, result) },
                None => {
                    error!("Unable to get value: module was never initialized");
                    result.set_failure();
                    SYSINFO_RET_FAIL
                }
            }
        }));
        outcome.unwrap_or_else(|payload| {
            error!("get_value panicked: {}", panic_message(payload.as_ref()));
            // SAFETY: `result` is still valid; the unwound closure dropped its borrow.
            unsafe { (*result).set_failure() };
            SYSINFO_RET_FAIL
        })
    }
}

#[cfg(feature = "python")]
mod exports {
    use std::ffi::c_int;

    use crate::abi::{AGENT_REQUEST, AGENT_RESULT, ZBX_METRIC};
    use crate::bridge::Bridge;
    use crate::config::BridgeConfig;
    use crate::fork::{self, FORK_SIGNAL};
    use crate::logger;
    use crate::runtime::python::PythonRuntime;

    use super::ModuleCell;

    static MODULE: ModuleCell<PythonRuntime> = ModuleCell::new();

    #[unsafe(no_mangle)]
    pub extern "C" fn zbx_module_init() -> c_int {
        MODULE.init(|| {
            let config = BridgeConfig::load();
            logger::init(config.as_ref().map_or(log::Level::Info, BridgeConfig::log_level));
            let config = config?;
            fork::install_hook()?;
            Ok(Bridge::new(PythonRuntime::new(), config, &FORK_SIGNAL))
        })
    }

    #[unsafe(no_mangle)]
    pub extern "C" fn zbx_module_uninit() -> c_int {
        MODULE.uninit()
    }

    #[unsafe(no_mangle)]
    pub extern "C" fn zbx_module_item_list() -> *mut ZBX_METRIC {
        MODULE.item_list(get_value)
    }

    /// Handler stored in every descriptor.
    ///
    /// # Safety
    /// Called by the host with its own request and result records.
    unsafe extern "C" fn get_value(request: *mut AGENT_REQUEST, result: *mut AGENT_RESULT) -> c_int {
        // SAFETY: the host passes valid records.
        unsafe { MODULE.get_value(request, result) }
    }
}
