// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! In-memory scripting runtime and log capture for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use crate::abi::ZBX_MODULE_OK;
use crate::runtime::{Fault, FaultPending, RawFault, RtResult, Runtime};

pub(crate) type NativeFn = Arc<dyn Fn(&MockRuntime, &[&Obj]) -> RtResult<Obj> + Send + Sync>;

pub(crate) enum Step {
    Item(Obj),
    Raise(&'static str, &'static str),
}

pub(crate) enum Value {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    Tuple(Vec<Obj>),
    /// Modules and plain instances.
    Namespace(Mutex<BTreeMap<String, Obj>>),
    Type(String, NativeFn),
    Function(String, NativeFn),
    Iterator(Mutex<VecDeque<Step>>),
    ExceptionType(String),
    Exception(String, String),
}

pub(crate) struct Object {
    value: Value,
    live: Arc<AtomicUsize>,
}

impl Drop for Object {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub(crate) struct Obj(Arc<Object>);

impl Obj {
    pub(crate) fn value(&self) -> &Value {
        &self.0.value
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value() {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Tuple(items) => f.debug_list().entries(items).finish(),
            Value::Namespace(_) => write!(f, "<namespace>"),
            Value::Type(name, _) => write!(f, "<class '{name}'>"),
            Value::Function(name, _) => write!(f, "<function {name}>"),
            Value::Iterator(_) => write!(f, "<iterator>"),
            Value::ExceptionType(name) => write!(f, "<class '{name}'>"),
            Value::Exception(kind, message) => write!(f, "{kind}({message:?})"),
        }
    }
}

/// Single-threaded stand-in for the embedded interpreter.
pub(crate) struct MockRuntime {
    live: Arc<AtomicUsize>,
    fault: Mutex<Option<RawFault<Obj>>>,
    modules: Mutex<HashMap<String, Obj>>,
    initialized: AtomicBool,
    events: Mutex<Vec<&'static str>>,
    failing_str: Mutex<Option<String>>,
    stopped_fault_checks: AtomicUsize,
}

impl MockRuntime {
    /// Runtime with only the `traceback` module available.
    pub(crate) fn new() -> Self {
        let rt = Self {
            live: Arc::new(AtomicUsize::new(0)),
            fault: Mutex::new(None),
            modules: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
            failing_str: Mutex::new(None),
            stopped_fault_checks: AtomicUsize::new(0),
        };
        let traceback = rt.namespace(vec![(
            "format_exception",
            rt.function("format_exception", format_exception),
        )]);
        rt.register_module("traceback", traceback);
        rt
    }

    pub(crate) fn object(&self, value: Value) -> Obj {
        self.live.fetch_add(1, Ordering::SeqCst);
        Obj(Arc::new(Object {
            value,
            live: Arc::clone(&self.live),
        }))
    }

    pub(crate) fn live_objects(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn raise(&self, kind: &str, message: &str) -> FaultPending {
        let raw = RawFault {
            kind: self.object(Value::ExceptionType(kind.to_string())),
            value: Some(self.object(Value::Exception(kind.to_string(), message.to_string()))),
            traceback: None,
        };
        *self.fault.lock().unwrap() = Some(raw);
        FaultPending
    }

    pub(crate) fn has_fault(&self) -> bool {
        self.fault.lock().unwrap().is_some()
    }

    pub(crate) fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    /// Fault slot accesses made while the interpreter was not running. A
    /// real interpreter aborts on those.
    pub(crate) fn stopped_fault_checks(&self) -> usize {
        self.stopped_fault_checks.load(Ordering::SeqCst)
    }

    fn check_running(&self) {
        if !self.is_initialized() {
            self.stopped_fault_checks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }

    /// Make `new_str(value)` raise.
    pub(crate) fn fail_new_str_on(&self, value: &str) {
        *self.failing_str.lock().unwrap() = Some(value.to_string());
    }

    pub(crate) fn function<F>(&self, name: &str, body: F) -> Obj
    where
        F: Fn(&MockRuntime, &[&Obj]) -> RtResult<Obj> + Send + Sync + 'static,
    {
        self.object(Value::Function(name.to_string(), Arc::new(body)))
    }

    pub(crate) fn class<F>(&self, name: &str, ctor: F) -> Obj
    where
        F: Fn(&MockRuntime, &[&Obj]) -> RtResult<Obj> + Send + Sync + 'static,
    {
        self.object(Value::Type(name.to_string(), Arc::new(ctor)))
    }

    pub(crate) fn namespace(&self, attrs: Vec<(&str, Obj)>) -> Obj {
        let attrs = attrs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        self.object(Value::Namespace(Mutex::new(attrs)))
    }

    pub(crate) fn iterator(&self, steps: Vec<Step>) -> Obj {
        self.object(Value::Iterator(Mutex::new(steps.into())))
    }

    pub(crate) fn register_module(&self, name: &str, module: Obj) {
        self.modules.lock().unwrap().insert(name.to_string(), module);
    }

    pub(crate) fn module(&self, name: &str) -> Obj {
        self.modules.lock().unwrap().get(name).cloned().unwrap()
    }

    /// Replace an attribute of a registered module.
    pub(crate) fn patch(&self, module: &str, name: &str, value: Obj) {
        let module = self.module(module);
        self.setattr(&module, name, value).unwrap();
    }

    pub(crate) fn attr(&self, obj: &Obj, name: &str) -> Obj {
        self.getattr(obj, name).unwrap()
    }

    pub(crate) fn set(&self, obj: &Obj, name: &str, value: Obj) {
        self.setattr(obj, name, value).unwrap();
    }

    pub(crate) fn strings(&self, obj: &Obj) -> Vec<String> {
        match obj.value() {
            Value::Tuple(items) => items.iter().map(|o| self.utf8_value(o).unwrap()).collect(),
            other => panic!("not a tuple: {:?}", Obj::debug_value(other)),
        }
    }

    pub(crate) fn exception_kind(&self, obj: &Obj) -> Option<String> {
        match obj.value() {
            Value::ExceptionType(kind) | Value::Exception(kind, _) => Some(kind.clone()),
            _ => None,
        }
    }

    /// A descriptor object as produced by the script's `item_list()`.
    pub(crate) fn item(&self, key: &str, flags: Option<i128>, test_param: Option<&str>) -> Obj {
        let flags = flags.map_or_else(|| self.none(), |f| self.object(Value::Int(f)));
        let test_param = test_param.map_or_else(|| self.none(), |p| self.new_str(p).unwrap());
        self.namespace(vec![
            ("key", self.new_str(key).unwrap()),
            ("flags", flags),
            ("test_param", test_param),
        ])
    }
}

impl Obj {
    fn debug_value(value: &Value) -> &'static str {
        match value {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::Namespace(_) => "namespace",
            Value::Type(..) | Value::ExceptionType(_) => "type",
            Value::Function(..) => "function",
            Value::Iterator(_) => "iterator",
            Value::Exception(..) => "exception",
        }
    }
}

fn format_exception(rt: &MockRuntime, args: &[&Obj]) -> RtResult<Obj> {
    let [_, value, _] = args else {
        return Err(rt.raise("TypeError", "format_exception() takes 3 arguments"));
    };
    let line = match value.value() {
        Value::Exception(kind, message) => format!("{kind}: {message}\n"),
        _ => "NoneType: None\n".to_string(),
    };
    let lines = vec![
        rt.new_str("Traceback (most recent call last):\n")?,
        rt.new_str("  File \"<script>\", line 1, in <module>\n")?,
        rt.new_str(&line)?,
    ];
    rt.new_tuple(lines)
}

impl Runtime for MockRuntime {
    type Object = Obj;

    fn initialize(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        self.record("initialize");
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn finalize(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.record("finalize");
    }

    fn reinit_after_fork(&self) {
        self.record("reinit_after_fork");
    }

    fn import(&self, name: &str) -> RtResult<Obj> {
        let module = self.modules.lock().unwrap().get(name).cloned();
        module.ok_or_else(|| self.raise("ModuleNotFoundError", &format!("No module named '{name}'")))
    }

    fn getattr(&self, obj: &Obj, name: &str) -> RtResult<Obj> {
        let found = match obj.value() {
            Value::Namespace(attrs) => attrs.lock().unwrap().get(name).cloned(),
            _ => None,
        };
        found.ok_or_else(|| self.raise("AttributeError", &format!("object has no attribute '{name}'")))
    }

    fn setattr(&self, obj: &Obj, name: &str, value: Obj) -> RtResult<()> {
        match obj.value() {
            Value::Namespace(attrs) => {
                attrs.lock().unwrap().insert(name.to_string(), value);
                Ok(())
            }
            _ => Err(self.raise("AttributeError", &format!("can't set attribute '{name}'"))),
        }
    }

    fn call(&self, callable: &Obj, args: &[&Obj]) -> RtResult<Obj> {
        let body = match callable.value() {
            Value::Type(_, body) | Value::Function(_, body) => Arc::clone(body),
            _ => return Err(self.raise("TypeError", "object is not callable")),
        };
        body(self, args)
    }

    fn iter(&self, obj: &Obj) -> RtResult<Obj> {
        match obj.value() {
            Value::Tuple(items) => Ok(self.iterator(items.iter().cloned().map(Step::Item).collect())),
            Value::Iterator(_) => Ok(obj.clone()),
            _ => Err(self.raise("TypeError", "object is not iterable")),
        }
    }

    fn next(&self, iterator: &Obj) -> RtResult<Option<Obj>> {
        let Value::Iterator(steps) = iterator.value() else {
            return Err(self.raise("TypeError", "object is not an iterator"));
        };
        let step = steps.lock().unwrap().pop_front();
        match step {
            None => Ok(None),
            Some(Step::Item(obj)) => Ok(Some(obj)),
            Some(Step::Raise(kind, message)) => Err(self.raise(kind, message)),
        }
    }

    fn is_none(&self, obj: &Obj) -> bool {
        matches!(obj.value(), Value::None)
    }

    fn is_type(&self, obj: &Obj) -> bool {
        matches!(obj.value(), Value::Type(..) | Value::ExceptionType(_))
    }

    fn is_callable(&self, obj: &Obj) -> bool {
        matches!(obj.value(), Value::Type(..) | Value::Function(..))
    }

    fn is_int(&self, obj: &Obj) -> bool {
        matches!(obj.value(), Value::Int(_) | Value::Bool(_))
    }

    fn is_str(&self, obj: &Obj) -> bool {
        matches!(obj.value(), Value::Str(_))
    }

    fn none(&self) -> Obj {
        self.object(Value::None)
    }

    fn new_bool(&self, value: bool) -> Obj {
        self.object(Value::Bool(value))
    }

    fn new_int(&self, value: i64) -> RtResult<Obj> {
        Ok(self.object(Value::Int(i128::from(value))))
    }

    fn new_str(&self, value: &str) -> RtResult<Obj> {
        if self.failing_str.lock().unwrap().as_deref() == Some(value) {
            return Err(self.raise("UnicodeError", "cannot create string"));
        }
        Ok(self.object(Value::Str(value.to_string())))
    }

    fn new_tuple(&self, items: Vec<Obj>) -> RtResult<Obj> {
        Ok(self.object(Value::Tuple(items)))
    }

    fn int_value(&self, obj: &Obj) -> RtResult<i64> {
        match obj.value() {
            Value::Int(i) => i64::try_from(*i)
                .map_err(|_| self.raise("OverflowError", "int too big to convert")),
            Value::Bool(b) => Ok(i64::from(*b)),
            _ => Err(self.raise("TypeError", "an integer is required")),
        }
    }

    fn uint64_value(&self, obj: &Obj) -> RtResult<u64> {
        match obj.value() {
            Value::Int(i) if *i < 0 => Err(self.raise(
                "OverflowError",
                "can't convert negative int to unsigned",
            )),
            Value::Int(i) => u64::try_from(*i)
                .map_err(|_| self.raise("OverflowError", "int too big to convert")),
            Value::Bool(b) => Ok(u64::from(*b)),
            _ => Err(self.raise("TypeError", "an integer is required")),
        }
    }

    fn float_value(&self, obj: &Obj) -> RtResult<f64> {
        match obj.value() {
            Value::Float(x) => Ok(*x),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Ok(*i as f64),
            Value::Bool(b) => Ok(f64::from(u8::from(*b))),
            _ => Err(self.raise("TypeError", "must be real number")),
        }
    }

    fn utf8_value(&self, obj: &Obj) -> RtResult<String> {
        match obj.value() {
            Value::Str(s) => Ok(s.clone()),
            _ => Err(self.raise("TypeError", "expected str")),
        }
    }

    fn join(&self, separator: &str, items: &Obj) -> RtResult<Obj> {
        let Value::Tuple(items) = items.value() else {
            return Err(self.raise("TypeError", "can only join an iterable"));
        };
        let parts = items
            .iter()
            .map(|item| self.utf8_value(item))
            .collect::<RtResult<Vec<_>>>()?;
        self.new_str(&parts.join(separator))
    }

    fn fetch_fault(&self) -> Option<RawFault<Obj>> {
        self.check_running();
        self.fault.lock().unwrap().take()
    }

    fn normalize_fault(&self, raw: RawFault<Obj>) -> Fault<Obj> {
        Fault {
            kind: raw.kind,
            value: raw.value.unwrap_or_else(|| self.none()),
            traceback: raw.traceback.unwrap_or_else(|| self.none()),
        }
    }

    fn clear_fault(&self) {
        self.check_running();
        *self.fault.lock().unwrap() = None;
    }
}

/// What the mock script module saw.
#[derive(Default)]
pub(crate) struct ScriptCalls {
    pub(crate) init: Mutex<Vec<String>>,
    pub(crate) after_fork: Mutex<Vec<bool>>,
    pub(crate) item_list: AtomicUsize,
    pub(crate) get_value: AtomicUsize,
    pub(crate) uninit: AtomicUsize,
}

/// Register a script module shaped like `zabbix_modules.wrapper` under `name`.
///
/// `init` answers with the installed `ZBX_MODULE_OK` constant, `item_list`
/// returns one parameterless item, `get_value` leaves the result untouched
/// and returns `SYSINFO_RET_OK`.
pub(crate) fn install_script(rt: &MockRuntime, name: &'static str) -> Arc<ScriptCalls> {
    let calls = Arc::new(ScriptCalls::default());

    let request_type = rt.class("AgentRequest", |rt, args| {
        let [key, params, mtime] = args else {
            return Err(rt.raise("TypeError", "AgentRequest takes 3 arguments"));
        };
        Ok(rt.namespace(vec![
            ("key", (*key).clone()),
            ("params", (*params).clone()),
            ("mtime", (*mtime).clone()),
        ]))
    });
    let result_type = rt.class("AgentResult", |rt, _| {
        Ok(rt.namespace(vec![
            ("ui64", rt.none()),
            ("dbl", rt.none()),
            ("str", rt.none()),
            ("text", rt.none()),
            ("msg", rt.none()),
        ]))
    });

    let init = {
        let calls = Arc::clone(&calls);
        rt.function("init", move |rt, args| {
            let module_type = args.first().map(|a| rt.utf8_value(a)).transpose()?;
            calls.init.lock().unwrap().push(module_type.unwrap_or_default());
            let module = rt.import(name)?;
            rt.getattr(&module, "ZBX_MODULE_OK")
        })
    };
    let after_fork = {
        let calls = Arc::clone(&calls);
        rt.function("after_fork", move |rt, args| {
            let parent = matches!(args.first().map(|a| a.value()), Some(Value::Bool(true)));
            calls.after_fork.lock().unwrap().push(parent);
            Ok(rt.none())
        })
    };
    let item_list = {
        let calls = Arc::clone(&calls);
        rt.function("item_list", move |rt, _| {
            calls.item_list.fetch_add(1, Ordering::SeqCst);
            rt.new_tuple(vec![rt.item("zpm.test.sine", None, None)])
        })
    };
    let get_value = {
        let calls = Arc::clone(&calls);
        rt.function("get_value", move |rt, _| {
            calls.get_value.fetch_add(1, Ordering::SeqCst);
            rt.new_int(0)
        })
    };
    let uninit = {
        let calls = Arc::clone(&calls);
        rt.function("uninit", move |rt, _| {
            calls.uninit.fetch_add(1, Ordering::SeqCst);
            rt.new_int(i64::from(ZBX_MODULE_OK))
        })
    };

    let module = rt.namespace(vec![
        ("AgentRequest", request_type),
        ("AgentResult", result_type),
        ("init", init),
        ("after_fork", after_fork),
        ("item_list", item_list),
        ("get_value", get_value),
        ("uninit", uninit),
    ]);
    rt.register_module(name, module);
    calls
}

thread_local! {
    static CAPTURED: RefCell<Vec<(log::Level, String)>> = const { RefCell::new(Vec::new()) };
}

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        CAPTURED.with(|c| c.borrow_mut().push((record.level(), record.args().to_string())));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INSTALL: Once = Once::new();

/// Start capturing log records emitted on the current thread.
pub(crate) fn capture_logs() {
    INSTALL.call_once(|| {
        log::set_logger(&LOGGER).expect("no other logger in tests");
        log::set_max_level(log::LevelFilter::Trace);
    });
    CAPTURED.with(|c| c.borrow_mut().clear());
}

pub(crate) fn captured_logs() -> Vec<(log::Level, String)> {
    CAPTURED.with(|c| c.borrow().clone())
}

pub(crate) fn count_logs_containing(needle: &str) -> usize {
    captured_logs()
        .iter()
        .filter(|(_, line)| line.contains(needle))
        .count()
}
