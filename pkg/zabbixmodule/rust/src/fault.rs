// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::cell::Cell;

use log::error;

use crate::runtime::{Fault, RawFault, RtResult, Runtime};

const BANNER: &str = "Last python exception:";
const NESTED_FAULT: &str =
    "Unable to format python exception with traceback: another python exception occurred";
const NO_FORMATTER: &str =
    "Unable to format python exception with traceback: traceback.format_exception is not bound";

/// Logs the pending runtime fault with its traceback and clears it.
///
/// A fault raised while formatting another one is logged as a single
/// degraded line instead of being formatted in turn.
#[derive(Debug, Default)]
pub(crate) struct FaultTranslator {
    formatting: Cell<bool>,
}

impl FaultTranslator {
    pub(crate) const fn new() -> Self {
        Self {
            formatting: Cell::new(false),
        }
    }

    pub(crate) fn report<R: Runtime>(&self, rt: &R, format_exception: Option<&R::Object>) {
        let Some(raw) = rt.fetch_fault() else {
            return;
        };

        if self.formatting.get() {
            error!("{NESTED_FAULT}");
            release_raw(rt, raw);
            rt.clear_fault();
            return;
        }

        self.formatting.set(true);
        let _reset = scopeguard::guard(&self.formatting, |formatting| formatting.set(false));

        let fault = rt.normalize_fault(raw);
        match format_exception {
            None => error!("{NO_FORMATTER}"),
            Some(format_exception) => match format(rt, format_exception, &fault) {
                Ok(text) => error!("{BANNER}\n{text}"),
                Err(_) => self.report(rt, Some(format_exception)),
            },
        }
        release(rt, fault);
        rt.clear_fault();
    }
}

fn format<R: Runtime>(rt: &R, format_exception: &R::Object, fault: &Fault<R::Object>) -> RtResult<String> {
    let lines = rt.call(format_exception, &[&fault.kind, &fault.value, &fault.traceback])?;
    let joined = rt.join("", &lines);
    rt.release(lines);
    let joined = joined?;
    let text = rt.utf8_value(&joined);
    rt.release(joined);
    text
}

fn release<R: Runtime>(rt: &R, fault: Fault<R::Object>) {
    rt.release(fault.kind);
    rt.release(fault.value);
    rt.release(fault.traceback);
}

fn release_raw<R: Runtime>(rt: &R, raw: RawFault<R::Object>) {
    rt.release(raw.kind);
    raw.value.into_iter().for_each(|v| rt.release(v));
    raw.traceback.into_iter().for_each(|t| rt.release(t));
}
