// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The module lifecycle: init, item list, per-metric fetch, uninit.
//!
//! Every entry point turns errors into the host's status codes itself;
//! nothing here returns a `Result` to the export layer.

use std::ffi::c_int;

use log::{error, info, warn};

use crate::abi::{
    AGENT_REQUEST, AGENT_RESULT, CF_HAVEPARAMS, MetricHandler, Request, SYSINFO_RET_FAIL,
    SYSINFO_RET_OK, ZBX_METRIC, ZBX_MODULE_FAIL, ZBX_MODULE_OK,
};
use crate::config::BridgeConfig;
use crate::errors::Error;
use crate::fault::FaultTranslator;
use crate::fork::ForkSignal;
use crate::marshal::{ToScript, required};
use crate::registry::{self, MetricList, empty_list};
use crate::request;
use crate::runtime::{PreloadedLibrary, Runtime};
use crate::state::BridgeState;
use crate::symbols::{Slot, Symbols, symbol_table};

/// Host constants mirrored onto the script module.
const SCRIPT_CONSTANTS: [(&str, i64); 5] = [
    ("ZBX_MODULE_OK", ZBX_MODULE_OK as i64),
    ("ZBX_MODULE_FAIL", ZBX_MODULE_FAIL as i64),
    ("CF_HAVEPARAMS", CF_HAVEPARAMS as i64),
    ("SYSINFO_RET_OK", SYSINFO_RET_OK as i64),
    ("SYSINFO_RET_FAIL", SYSINFO_RET_FAIL as i64),
];

pub struct Bridge<R: Runtime> {
    runtime: R,
    config: BridgeConfig,
    state: BridgeState,
    symbols: Symbols<R::Object>,
    faults: FaultTranslator,
    fork: &'static ForkSignal,
    registry: Option<MetricList>,
    preload: Option<PreloadedLibrary>,
}

impl<R: Runtime> Bridge<R> {
    pub fn new(runtime: R, config: BridgeConfig, fork: &'static ForkSignal) -> Self {
        Self {
            runtime,
            config,
            state: BridgeState::Uninitialized,
            symbols: Symbols::new(),
            faults: FaultTranslator::new(),
            fork,
            registry: None,
            preload: None,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    fn transition(&mut self, next: BridgeState) -> Result<(), Error> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Log and clear whatever fault the runtime has pending. A runtime that
    /// is not running has no fault slot to look at.
    fn report(&self) {
        if !self.runtime.is_initialized() {
            return;
        }
        self.faults
            .report(&self.runtime, self.symbols.get_opt(Slot::FormatException));
    }

    /// `report` for an entry point that failed with `e`. Refusals made
    /// before touching the runtime leave nothing to report.
    fn report_failure(&self, e: &Error) {
        if !matches!(e, Error::NotReady(_)) {
            self.report();
        }
    }

    /// Start the runtime and the script. Any failure tears everything down
    /// again and the module stays unusable.
    pub fn init(&mut self) -> c_int {
        if self.state != BridgeState::Uninitialized {
            error!("Module init called while {}", self.state);
            return ZBX_MODULE_FAIL;
        }
        info!("Initializing (zabbix_{})...", self.config.module_type);

        match self.try_init() {
            Ok(()) => {
                info!("Initialization finished successfully");
                ZBX_MODULE_OK
            }
            Err(e) => {
                error!("Initialization failed: {e}");
                self.report();
                self.teardown();
                ZBX_MODULE_FAIL
            }
        }
    }

    fn try_init(&mut self) -> Result<(), Error> {
        if let Some(library) = &self.config.python_library {
            self.preload = Some(PreloadedLibrary::open(library)?);
        }

        self.runtime.initialize();
        self.symbols
            .bind(&self.runtime, &symbol_table(&self.config.script_module))?;
        self.transition(BridgeState::Bound)?;

        self.install_constants()?;

        let module_type = self
            .config
            .module_type
            .as_str()
            .to_script(&self.runtime)
            .map_err(|_| Error::fault("module type"))?;
        let status = self.call_status(Slot::Init, &[&module_type], "init()");
        self.runtime.release(module_type);
        match status? {
            ZBX_MODULE_OK => self.transition(BridgeState::Ready),
            status => Err(Error::ScriptStatus {
                call: "init()",
                status,
            }),
        }
    }

    fn install_constants(&self) -> Result<(), Error> {
        let script = self.symbols.get(Slot::Script)?;
        for (name, value) in SCRIPT_CONSTANTS {
            let value = self
                .runtime
                .new_int(value)
                .map_err(|_| Error::fault(format!("creating constant {name}")))?;
            self.runtime
                .setattr(script, name, value)
                .map_err(|_| Error::fault(format!("setting constant {name}")))?;
        }
        Ok(())
    }

    /// Call a script function that answers with an integer status.
    fn call_status(&self, slot: Slot, args: &[&R::Object], call: &'static str) -> Result<c_int, Error> {
        let function = self.symbols.get(slot)?;
        let ret = self
            .runtime
            .call(function, args)
            .map_err(|_| Error::fault(call))?;
        let status = required(&self.runtime, &ret)
            .map_err(|e| Error::conversion(format!("{call} return value"), e));
        self.runtime.release(ret);
        status
    }

    /// Replay fork events recorded since the last call into the script.
    fn drain_fork_events(&self) -> Result<(), Error> {
        if self.fork.take_child() {
            info!("Fork detected (child {})", std::process::id());
            if self.runtime.is_initialized() {
                self.runtime.reinit_after_fork();
            }
            self.notify_fork(false)?;
        }
        // Parents fork all the time; no logging here.
        if self.fork.take_parent() {
            self.notify_fork(true)?;
        }
        Ok(())
    }

    fn notify_fork(&self, parent: bool) -> Result<(), Error> {
        let after_fork = self.symbols.get(Slot::AfterFork)?;
        let arg = parent
            .to_script(&self.runtime)
            .map_err(|_| Error::ForkNotification { parent })?;
        let ret = self.runtime.call(after_fork, &[&arg]);
        self.runtime.release(arg);
        let ret = ret.map_err(|_| Error::ForkNotification { parent })?;
        self.runtime.release(ret);
        Ok(())
    }

    /// Serve one host request.
    ///
    /// # Safety
    /// `request` must be a valid host request: `key` a C string and `params`
    /// `nparam` C strings. `result` may only carry strings allocated with
    /// `malloc`.
    pub unsafe fn get_value(&self, request: &AGENT_REQUEST, result: &mut AGENT_RESULT) -> c_int {
        // SAFETY: forwarded from the caller.
        match unsafe { self.try_get_value(request, result) } {
            Ok(status) => status,
            Err(e) => {
                error!("Unable to get value: {e}");
                self.report_failure(&e);
                result.set_failure();
                SYSINFO_RET_FAIL
            }
        }
    }

    unsafe fn try_get_value(&self, request: &AGENT_REQUEST, result: &mut AGENT_RESULT) -> Result<c_int, Error> {
        if !self.state.is_ready() {
            return Err(Error::NotReady(self.state));
        }
        self.drain_fork_events()?;
        // SAFETY: forwarded from the caller.
        let request = unsafe { Request::from_raw(request) }
            .map_err(|(what, e)| Error::conversion(format!("request {what}"), e))?;
        request::get_value(&self.runtime, &self.symbols, &request, result)
    }

    /// Descriptor array for the host, built on first success and kept until
    /// uninit. Failures hand out the empty list and are retried next time.
    pub fn item_list(&mut self, handler: MetricHandler) -> *mut ZBX_METRIC {
        self.item_list_with(handler, registry::grow_by_one)
    }

    pub(crate) fn item_list_with<G>(&mut self, handler: MetricHandler, grow: G) -> *mut ZBX_METRIC
    where
        G: FnMut(&mut Vec<ZBX_METRIC>) -> Result<(), Error>,
    {
        if let Some(list) = &self.registry {
            return list.as_ptr();
        }
        if !self.state.is_ready() {
            error!("Unable to get item list: module is {}", self.state);
            return empty_list();
        }

        info!("Creating list of supported items...");
        match self.build_item_list(handler, grow) {
            Ok(list) => {
                info!("Found {} supported items", list.len());
                let list = self.registry.insert(list);
                list.as_ptr()
            }
            Err(e) => {
                error!("Unable to get item list: {e}");
                self.report();
                empty_list()
            }
        }
    }

    fn build_item_list<G>(&self, handler: MetricHandler, grow: G) -> Result<MetricList, Error>
    where
        G: FnMut(&mut Vec<ZBX_METRIC>) -> Result<(), Error>,
    {
        self.drain_fork_events()?;
        let item_list = self.symbols.get(Slot::ItemList)?;
        registry::build_with(&self.runtime, item_list, handler, || self.report(), grow)
    }

    /// Stop the script and the runtime. The teardown runs whatever the
    /// script reports.
    pub fn uninit(&mut self) -> c_int {
        info!("Uninitializing...");
        let status = match self.try_uninit() {
            Ok(()) => {
                info!("Uninitialization finished successfully");
                ZBX_MODULE_OK
            }
            Err(e) => {
                error!("Uninitialization failed: {e}");
                self.report_failure(&e);
                ZBX_MODULE_FAIL
            }
        };
        self.teardown();
        status
    }

    fn try_uninit(&mut self) -> Result<(), Error> {
        if !self.state.is_ready() {
            return Err(Error::NotReady(self.state));
        }
        self.drain_fork_events()?;
        self.registry = None;
        match self.call_status(Slot::Uninit, &[], "uninit()")? {
            ZBX_MODULE_OK => Ok(()),
            status => Err(Error::ScriptStatus {
                call: "uninit()",
                status,
            }),
        }
    }

    fn teardown(&mut self) {
        if self.state == BridgeState::Unbound {
            return;
        }
        self.registry = None;
        self.symbols.release(&self.runtime);
        if self.runtime.is_initialized() {
            self.runtime.finalize();
        }
        if let Some(mut library) = self.preload.take() {
            library.close();
        }
        if let Err(e) = self.transition(BridgeState::Unbound) {
            warn!("{e}");
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::abi::{AR_MESSAGE, AR_STRING, AR_UINT64, FAILURE_MESSAGE};
    use crate::config::DEFAULT_SCRIPT_MODULE;
    use crate::cstring::str_from_ptr;
    use crate::test_utils::{
        MockRuntime, Obj, ScriptCalls, capture_logs, count_logs_containing, install_script,
    };
    use std::ffi::{CString, c_char};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "C" fn handler(_: *mut AGENT_REQUEST, _: *mut AGENT_RESULT) -> c_int {
        SYSINFO_RET_OK
    }

    fn signal() -> &'static ForkSignal {
        Box::leak(Box::new(ForkSignal::new()))
    }

    fn script() -> (MockRuntime, Arc<ScriptCalls>) {
        let rt = MockRuntime::new();
        let calls = install_script(&rt, DEFAULT_SCRIPT_MODULE);
        (rt, calls)
    }

    fn start(rt: MockRuntime) -> Bridge<MockRuntime> {
        let mut bridge = Bridge::new(rt, BridgeConfig::default(), signal());
        assert_eq!(bridge.init(), ZBX_MODULE_OK);
        bridge
    }

    fn patch<F>(rt: &MockRuntime, name: &str, body: F)
    where
        F: Fn(&MockRuntime, &[&Obj]) -> crate::runtime::RtResult<Obj> + Send + Sync + 'static,
    {
        rt.patch(DEFAULT_SCRIPT_MODULE, name, rt.function(name, body));
    }

    fn fetch(bridge: &Bridge<MockRuntime>, key: &str, params: &[&str], mtime: c_int) -> (c_int, AGENT_RESULT) {
        let key = CString::new(key).unwrap();
        let params: Vec<CString> = params.iter().map(|p| CString::new(*p).unwrap()).collect();
        let mut ptrs: Vec<*mut c_char> = params.iter().map(|p| p.as_ptr().cast_mut()).collect();
        let request = AGENT_REQUEST {
            key: key.as_ptr().cast_mut(),
            nparam: c_int::try_from(ptrs.len()).unwrap(),
            params: ptrs.as_mut_ptr(),
            lastlogsize: 0,
            mtime,
        };
        let mut result = AGENT_RESULT::empty();
        let status = unsafe { bridge.get_value(&request, &mut result) };
        (status, result)
    }

    fn echo_handler(rt: &MockRuntime, args: &[&Obj]) -> crate::runtime::RtResult<Obj> {
        let result = args[1];
        rt.set(result, "ui64", rt.new_int(42)?);
        rt.set(result, "str", rt.new_str("ok")?);
        let module = rt.import(DEFAULT_SCRIPT_MODULE)?;
        rt.getattr(&module, "SYSINFO_RET_OK")
    }

    #[test]
    fn init_binds_installs_constants_and_starts_the_script() {
        let (rt, calls) = script();
        let bridge = start(rt);

        assert_eq!(bridge.state(), BridgeState::Ready);
        assert_eq!(*calls.init.lock().unwrap(), vec!["agentd".to_string()]);
        let rt = bridge.runtime();
        let module = rt.module(DEFAULT_SCRIPT_MODULE);
        assert_eq!(rt.int_value(&rt.attr(&module, "CF_HAVEPARAMS")).unwrap(), 1);
        assert_eq!(rt.int_value(&rt.attr(&module, "ZBX_MODULE_FAIL")).unwrap(), -1);
        assert_eq!(rt.int_value(&rt.attr(&module, "SYSINFO_RET_FAIL")).unwrap(), 1);
        assert_eq!(rt.events(), vec!["initialize"]);
    }

    #[test]
    fn end_to_end_echo() {
        let (rt, _) = script();
        patch(&rt, "get_value", echo_handler);
        let bridge = start(rt);

        let (status, mut result) = fetch(&bridge, "test.echo", &["a", "b"], 1000);

        assert_eq!(status, SYSINFO_RET_OK);
        assert_eq!(result.type_, AR_UINT64 | AR_STRING);
        assert_eq!(result.ui64, 42);
        assert_eq!(unsafe { str_from_ptr(result.str_) }.unwrap(), "ok");
        result.clear_values();
    }

    #[test]
    fn raising_handler_fails_with_one_traceback() {
        capture_logs();
        let (rt, _) = script();
        patch(&rt, "get_value", |rt, args| {
            rt.set(args[1], "ui64", rt.new_int(1)?);
            Err(rt.raise("ZeroDivisionError", "division by zero"))
        });
        let bridge = start(rt);

        let (status, mut result) = fetch(&bridge, "test.echo", &["a", "b"], 1000);

        assert_eq!(status, SYSINFO_RET_FAIL);
        assert_eq!(result.type_, AR_MESSAGE);
        assert_eq!(unsafe { str_from_ptr(result.msg) }.unwrap(), FAILURE_MESSAGE);
        assert_eq!(count_logs_containing("Last python exception:"), 1);
        assert_eq!(count_logs_containing("ZeroDivisionError: division by zero"), 1);
        assert!(!bridge.runtime().has_fault());
        result.clear_values();
    }

    #[test]
    fn nested_fault_while_formatting_logs_one_degraded_line() {
        capture_logs();
        let (rt, _) = script();
        patch(&rt, "get_value", |rt, _| Err(rt.raise("ValueError", "bad")));
        let broken = rt.function("format_exception", |rt, _| Err(rt.raise("MemoryError", "")));
        rt.patch("traceback", "format_exception", broken);
        let bridge = start(rt);

        let (status, mut result) = fetch(&bridge, "test.echo", &[], 0);

        assert_eq!(status, SYSINFO_RET_FAIL);
        assert_eq!(count_logs_containing("another python exception occurred"), 1);
        assert_eq!(count_logs_containing("Last python exception:"), 0);
        assert!(!bridge.runtime().has_fault());
        result.clear_values();
    }

    #[test]
    fn child_fork_is_delivered_exactly_once() {
        capture_logs();
        let (rt, calls) = script();
        let bridge = start(rt);

        bridge.fork.mark_child();
        let (status, _) = fetch(&bridge, "test.echo", &[], 0);
        assert_eq!(status, SYSINFO_RET_OK);
        assert_eq!(*calls.after_fork.lock().unwrap(), vec![false]);
        assert!(bridge.runtime().events().contains(&"reinit_after_fork"));
        assert_eq!(count_logs_containing("Fork detected"), 1);

        fetch(&bridge, "test.echo", &[], 0);
        assert_eq!(*calls.after_fork.lock().unwrap(), vec![false]);
    }

    #[test]
    fn parent_fork_is_delivered_silently() {
        capture_logs();
        let (rt, calls) = script();
        let bridge = start(rt);

        bridge.fork.mark_parent();
        bridge.fork.mark_parent();
        fetch(&bridge, "test.echo", &[], 0);

        assert_eq!(*calls.after_fork.lock().unwrap(), vec![true]);
        assert_eq!(count_logs_containing("Fork detected"), 0);
    }

    #[test]
    fn failed_fork_notification_fails_the_call() {
        capture_logs();
        let (rt, calls) = script();
        patch(&rt, "after_fork", |rt, _| Err(rt.raise("OSError", "reconnect failed")));
        let bridge = start(rt);

        bridge.fork.mark_child();
        let (status, mut result) = fetch(&bridge, "test.echo", &[], 0);

        assert_eq!(status, SYSINFO_RET_FAIL);
        assert_eq!(unsafe { str_from_ptr(result.msg) }.unwrap(), FAILURE_MESSAGE);
        assert_eq!(calls.get_value.load(Ordering::SeqCst), 0);
        assert_eq!(count_logs_containing("after_fork(parent=false)"), 1);
        result.clear_values();

        // The event was consumed; the next call goes through.
        assert_eq!(fetch(&bridge, "test.echo", &[], 0).0, SYSINFO_RET_OK);
    }

    #[test]
    fn item_list_is_memoized() {
        let (rt, calls) = script();
        let mut bridge = start(rt);

        let first = bridge.item_list(handler);
        let second = bridge.item_list(handler);

        assert_eq!(first, second);
        assert_ne!(first, empty_list());
        assert_eq!(calls.item_list.load(Ordering::SeqCst), 1);
        let key = unsafe { str_from_ptr((*first).key) }.unwrap();
        assert_eq!(key, "zpm.test.sine");
        assert!(unsafe { (*first.add(1)).key.is_null() });
    }

    #[test]
    fn allocation_failure_hands_out_the_empty_list() {
        let (rt, calls) = script();
        let mut bridge = start(rt);
        let out_of_memory = |_: &mut Vec<ZBX_METRIC>| {
            Err(Error::Allocation {
                context: "metric list".to_string(),
            })
        };

        let list = bridge.item_list_with(handler, out_of_memory);

        assert_eq!(list, empty_list());
        assert!(unsafe { (*list).key.is_null() });
        assert!(bridge.registry.is_none());
        assert_eq!(calls.item_list.load(Ordering::SeqCst), 1);

        // Nothing was memoized; a later call builds the real list.
        let list = bridge.item_list(handler);
        assert_ne!(list, empty_list());
        assert_eq!(calls.item_list.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_item_list_is_retried() {
        capture_logs();
        let (rt, _) = script();
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        patch(&rt, "item_list", move |rt, _| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(rt.raise("RuntimeError", "not yet"));
            }
            rt.new_tuple(vec![rt.item("zpm.late", None, None)])
        });
        let mut bridge = start(rt);

        assert_eq!(bridge.item_list(handler), empty_list());
        assert_eq!(count_logs_containing("RuntimeError: not yet"), 1);

        let list = bridge.item_list(handler);
        assert_ne!(list, empty_list());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn calls_before_init_do_not_touch_the_runtime() {
        let (rt, calls) = script();
        let mut bridge = Bridge::new(rt, BridgeConfig::default(), signal());

        let (status, mut result) = fetch(&bridge, "test.echo", &[], 0);
        assert_eq!(status, SYSINFO_RET_FAIL);
        assert_eq!(unsafe { str_from_ptr(result.msg) }.unwrap(), FAILURE_MESSAGE);
        result.clear_values();

        assert_eq!(bridge.item_list(handler), empty_list());
        assert!(bridge.runtime().events().is_empty());
        assert_eq!(bridge.runtime().stopped_fault_checks(), 0);
        assert_eq!(calls.get_value.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn binding_failure_tears_down() {
        capture_logs();
        let rt = MockRuntime::new();
        let mut bridge = Bridge::new(rt, BridgeConfig::default(), signal());

        assert_eq!(bridge.init(), ZBX_MODULE_FAIL);

        assert_eq!(bridge.state(), BridgeState::Unbound);
        assert!(bridge.symbols.is_empty());
        assert_eq!(bridge.runtime().events(), vec!["initialize", "finalize"]);
        assert_eq!(count_logs_containing("ModuleNotFoundError"), 1);
        assert!(!bridge.runtime().has_fault());
    }

    #[test]
    fn script_init_failure_tears_down() {
        let (rt, calls) = script();
        patch(&rt, "init", |rt, _| rt.new_int(i64::from(ZBX_MODULE_FAIL)));
        let mut bridge = Bridge::new(rt, BridgeConfig::default(), signal());

        assert_eq!(bridge.init(), ZBX_MODULE_FAIL);

        assert_eq!(bridge.state(), BridgeState::Unbound);
        assert!(bridge.symbols.is_empty());
        assert_eq!(calls.uninit.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn second_init_is_refused_without_teardown() {
        let (rt, _) = script();
        let mut bridge = start(rt);

        assert_eq!(bridge.init(), ZBX_MODULE_FAIL);
        assert_eq!(bridge.state(), BridgeState::Ready);
    }

    #[test]
    fn missing_interpreter_library_fails_before_start() {
        let (rt, _) = script();
        let config = BridgeConfig {
            python_library: Some("libpython-does-not-exist.so".to_string()),
            ..BridgeConfig::default()
        };
        let mut bridge = Bridge::new(rt, config, signal());

        assert_eq!(bridge.init(), ZBX_MODULE_FAIL);
        assert!(bridge.runtime().events().is_empty());
        assert_eq!(bridge.runtime().stopped_fault_checks(), 0);
        assert_eq!(bridge.state(), BridgeState::Unbound);
    }

    #[test]
    fn uninit_frees_everything_once() {
        let (rt, calls) = script();
        let mut bridge = start(rt);
        bridge.item_list(handler);

        assert_eq!(bridge.uninit(), ZBX_MODULE_OK);

        assert_eq!(calls.uninit.load(Ordering::SeqCst), 1);
        assert!(bridge.registry.is_none());
        assert!(bridge.symbols.is_empty());
        assert_eq!(bridge.state(), BridgeState::Unbound);
        assert_eq!(bridge.runtime().events(), vec!["initialize", "finalize"]);

        assert_eq!(bridge.uninit(), ZBX_MODULE_FAIL);
        assert_eq!(calls.uninit.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.runtime().events(), vec!["initialize", "finalize"]);
        assert_eq!(bridge.runtime().stopped_fault_checks(), 0);
    }

    #[test]
    fn calls_after_uninit_leave_the_finalized_runtime_alone() {
        let (rt, calls) = script();
        let mut bridge = start(rt);
        assert_eq!(bridge.uninit(), ZBX_MODULE_OK);

        let (status, mut result) = fetch(&bridge, "test.echo", &[], 0);
        assert_eq!(status, SYSINFO_RET_FAIL);
        assert_eq!(unsafe { str_from_ptr(result.msg) }.unwrap(), FAILURE_MESSAGE);
        result.clear_values();
        assert_eq!(bridge.item_list(handler), empty_list());

        assert_eq!(calls.get_value.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.runtime().stopped_fault_checks(), 0);
    }

    #[test]
    fn failing_script_uninit_is_reported_before_finalize() {
        capture_logs();
        let (rt, _) = script();
        patch(&rt, "uninit", |rt, _| Err(rt.raise("RuntimeError", "busy")));
        let mut bridge = start(rt);

        assert_eq!(bridge.uninit(), ZBX_MODULE_FAIL);

        assert_eq!(count_logs_containing("RuntimeError: busy"), 1);
        assert_eq!(bridge.runtime().stopped_fault_checks(), 0);
    }

    #[test]
    fn uninit_drains_fork_events_first() {
        let (rt, calls) = script();
        let mut bridge = start(rt);

        bridge.fork.mark_child();
        assert_eq!(bridge.uninit(), ZBX_MODULE_OK);

        assert_eq!(*calls.after_fork.lock().unwrap(), vec![false]);
        assert_eq!(calls.uninit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_script_uninit_still_tears_down() {
        let (rt, _) = script();
        patch(&rt, "uninit", |rt, _| Err(rt.raise("RuntimeError", "busy")));
        let mut bridge = start(rt);

        assert_eq!(bridge.uninit(), ZBX_MODULE_FAIL);
        assert_eq!(bridge.state(), BridgeState::Unbound);
        assert!(bridge.runtime().events().contains(&"finalize"));
    }
}
