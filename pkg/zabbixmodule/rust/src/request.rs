// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::ffi::c_int;

use crate::abi::{AGENT_RESULT, Request};
use crate::cstring::HostString;
use crate::errors::Error;
use crate::marshal::{ToScript, optional_attr, required, tuple};
use crate::runtime::Runtime;
use crate::symbols::{Slot, Symbols};

/// Everything `get_value` may leave on the script-side result.
#[derive(Debug, Default)]
struct ResultValues {
    ui64: Option<u64>,
    dbl: Option<f64>,
    str_: Option<HostString>,
    text: Option<HostString>,
    msg: Option<HostString>,
}

impl ResultValues {
    fn read<R: Runtime>(rt: &R, result: &R::Object) -> Result<Self, Error> {
        let attr = |name: &str, e| Error::conversion(format!("AgentResult.{name}"), e);
        Ok(Self {
            ui64: optional_attr(rt, result, "ui64").map_err(|e| attr("ui64", e))?,
            dbl: optional_attr(rt, result, "dbl").map_err(|e| attr("dbl", e))?,
            str_: optional_attr(rt, result, "str").map_err(|e| attr("str", e))?,
            text: optional_attr(rt, result, "text").map_err(|e| attr("text", e))?,
            msg: optional_attr(rt, result, "msg").map_err(|e| attr("msg", e))?,
        })
    }

    /// Fields are applied in a fixed order and never clear each other.
    fn apply(self, result: &mut AGENT_RESULT) {
        if let Some(ui64) = self.ui64 {
            result.set_ui64(ui64);
        }
        if let Some(dbl) = self.dbl {
            result.set_dbl(dbl);
        }
        if let Some(s) = self.str_ {
            result.set_str(s);
        }
        if let Some(text) = self.text {
            result.set_text(text);
        }
        if let Some(msg) = self.msg {
            result.set_msg(msg);
        }
    }
}

/// Run the script's `get_value(request, result)` for one host request.
///
/// On success the host result carries what the script set and the script's
/// status is returned as is. On error the host result is left untouched and
/// a fault may be pending.
pub(crate) fn get_value<R: Runtime>(
    rt: &R,
    symbols: &Symbols<R::Object>,
    request: &Request<'_>,
    result: &mut AGENT_RESULT,
) -> Result<c_int, Error> {
    let guard = |obj| scopeguard::guard(obj, |obj| rt.release(obj));

    let key = guard(rt.new_str(request.key).map_err(|_| Error::fault("request key"))?);
    let params = guard(tuple(rt, request.params.as_slice()).map_err(|_| Error::fault("request parameters"))?);
    let mtime = guard(request.mtime.to_script(rt).map_err(|_| Error::fault("request mtime"))?);

    let script_request = guard(
        rt.call(symbols.get(Slot::RequestType)?, &[&*key, &*params, &*mtime])
            .map_err(|_| Error::fault("AgentRequest()"))?,
    );
    let script_result = guard(
        rt.call(symbols.get(Slot::ResultType)?, &[])
            .map_err(|_| Error::fault("AgentResult()"))?,
    );

    let status = guard(
        rt.call(symbols.get(Slot::GetValue)?, &[&*script_request, &*script_result])
            .map_err(|_| Error::fault(format!("get_value('{}')", request.key)))?,
    );
    let status: c_int =
        required(rt, &*status).map_err(|e| Error::conversion("get_value() return value", e))?;

    ResultValues::read(rt, &*script_result)?.apply(result);
    Ok(status)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::undocumented_unsafe_blocks)]
mod tests {
    use super::*;
    use crate::abi::{AR_DOUBLE, AR_MESSAGE, AR_STRING, AR_TEXT, AR_UINT64, SYSINFO_RET_FAIL};
    use crate::cstring::str_from_ptr;
    use crate::errors::ConversionError;
    use crate::symbols::symbol_table;
    use crate::test_utils::{MockRuntime, Obj, Value, install_script};

    const SCRIPT: &str = "zabbix_modules.wrapper";

    fn bound_with_handler<F>(handler: F) -> (MockRuntime, Symbols<Obj>)
    where
        F: Fn(&MockRuntime, &Obj, &Obj) -> crate::runtime::RtResult<Obj> + Send + Sync + 'static,
    {
        let rt = MockRuntime::new();
        install_script(&rt, SCRIPT);
        let get_value = rt.function("get_value", move |rt, args| match args {
            [request, result] => handler(rt, *request, *result),
            _ => Err(rt.raise("TypeError", "get_value takes 2 arguments")),
        });
        rt.patch(SCRIPT, "get_value", get_value);
        let mut symbols = Symbols::new();
        symbols.bind(&rt, &symbol_table(SCRIPT)).unwrap();
        (rt, symbols)
    }

    fn echo() -> Request<'static> {
        Request {
            key: "test.echo",
            params: vec!["a", "b"],
            mtime: 1000,
        }
    }

    #[test]
    fn request_reaches_the_handler_and_fields_come_back() {
        let (rt, symbols) = bound_with_handler(|rt, request, result| {
            assert_eq!(rt.utf8_value(&rt.attr(request, "key")).unwrap(), "test.echo");
            assert_eq!(rt.strings(&rt.attr(request, "params")), vec!["a", "b"]);
            assert_eq!(rt.int_value(&rt.attr(request, "mtime")).unwrap(), 1000);
            rt.set(result, "ui64", rt.new_int(42)?);
            rt.set(result, "str", rt.new_str("ok")?);
            rt.new_int(0)
        });
        let mut result = AGENT_RESULT::empty();

        let status = get_value(&rt, &symbols, &echo(), &mut result).unwrap();

        assert_eq!(status, 0);
        assert_eq!(result.type_, AR_UINT64 | AR_STRING);
        assert_eq!(result.ui64, 42);
        assert_eq!(unsafe { str_from_ptr(result.str_) }.unwrap(), "ok");
        result.clear_values();
    }

    #[test]
    fn all_five_fields_are_applied() {
        let (rt, symbols) = bound_with_handler(|rt, _, result| {
            rt.set(result, "ui64", rt.new_int(1)?);
            rt.set(result, "dbl", rt.object(Value::Float(0.25)));
            rt.set(result, "str", rt.new_str("s")?);
            rt.set(result, "text", rt.new_str("t")?);
            rt.set(result, "msg", rt.new_str("m")?);
            rt.new_int(0)
        });
        let mut result = AGENT_RESULT::empty();

        get_value(&rt, &symbols, &echo(), &mut result).unwrap();

        assert_eq!(
            result.type_,
            AR_UINT64 | AR_DOUBLE | AR_STRING | AR_TEXT | AR_MESSAGE
        );
        assert_eq!(result.dbl, 0.25);
        assert_eq!(unsafe { str_from_ptr(result.text) }.unwrap(), "t");
        assert_eq!(unsafe { str_from_ptr(result.msg) }.unwrap(), "m");
        result.clear_values();
    }

    #[test]
    fn untouched_result_sets_nothing() {
        let (rt, symbols) = bound_with_handler(|rt, _, _| rt.new_int(0));
        let mut result = AGENT_RESULT::empty();

        get_value(&rt, &symbols, &echo(), &mut result).unwrap();

        assert_eq!(result.type_, 0);
    }

    #[test]
    fn handler_status_is_returned_unchanged() {
        let (rt, symbols) = bound_with_handler(|rt, _, result| {
            rt.set(result, "msg", rt.new_str("no such disk")?);
            rt.new_int(i64::from(SYSINFO_RET_FAIL))
        });
        let mut result = AGENT_RESULT::empty();

        let status = get_value(&rt, &symbols, &echo(), &mut result).unwrap();

        assert_eq!(status, SYSINFO_RET_FAIL);
        assert_eq!(unsafe { str_from_ptr(result.msg) }.unwrap(), "no such disk");
        result.clear_values();
    }

    #[test]
    fn bad_field_discards_everything() {
        let (rt, symbols) = bound_with_handler(|rt, _, result| {
            rt.set(result, "ui64", rt.new_int(1)?);
            rt.set(result, "str", rt.new_int(2)?);
            rt.new_int(0)
        });
        let mut result = AGENT_RESULT::empty();

        let err = get_value(&rt, &symbols, &echo(), &mut result).unwrap_err();

        assert!(matches!(
            err,
            Error::Conversion { ref what, source: ConversionError::NotString } if what == "AgentResult.str"
        ));
        assert_eq!(result.type_, 0);
    }

    #[test]
    fn non_integer_status_is_a_conversion_error() {
        let (rt, symbols) = bound_with_handler(|rt, _, _| Ok(rt.none()));
        let mut result = AGENT_RESULT::empty();

        let err = get_value(&rt, &symbols, &echo(), &mut result).unwrap_err();

        assert!(matches!(err, Error::Conversion { source: ConversionError::Missing, .. }));
    }

    #[test]
    fn raising_handler_leaves_fault_pending() {
        let (rt, symbols) = bound_with_handler(|rt, _, _| Err(rt.raise("ZeroDivisionError", "x")));
        let mut result = AGENT_RESULT::empty();

        let err = get_value(&rt, &symbols, &echo(), &mut result).unwrap_err();

        assert!(matches!(err, Error::RuntimeFault { ref context } if context == "get_value('test.echo')"));
        assert!(rt.has_fault());
    }

    #[test]
    fn parameter_conversion_failure_aborts_before_the_call() {
        let (rt, symbols) = bound_with_handler(|_, _, _| panic!("must not be called"));
        rt.fail_new_str_on("b");
        let mut result = AGENT_RESULT::empty();

        let err = get_value(&rt, &symbols, &echo(), &mut result).unwrap_err();

        assert!(matches!(err, Error::RuntimeFault { ref context } if context == "request parameters"));
    }

    #[test]
    fn call_objects_are_released() {
        let (rt, symbols) = bound_with_handler(|rt, _, result| {
            rt.set(result, "ui64", rt.new_int(7)?);
            rt.new_int(0)
        });
        let before = rt.live_objects();
        let mut result = AGENT_RESULT::empty();

        get_value(&rt, &symbols, &echo(), &mut result).unwrap();

        assert_eq!(rt.live_objects(), before);
    }
}
