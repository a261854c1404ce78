// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Host records and constants of the loadable module API, version 1.
//!
//! Layouts mirror the host's `module.h`; the host owns requests and results,
//! the bridge only reads the former and fills the latter.

#![allow(non_camel_case_types)] // C ABI types use C naming conventions

use std::ffi::{c_char, c_int, c_uint, c_void};
use std::ptr;

use crate::cstring::{HostString, free_host_string};
use crate::errors::ConversionError;

pub const ZBX_MODULE_API_VERSION_ONE: c_int = 1;

pub const ZBX_MODULE_OK: c_int = 0;
pub const ZBX_MODULE_FAIL: c_int = -1;

pub const CF_HAVEPARAMS: c_uint = 0x01;

pub const SYSINFO_RET_OK: c_int = 0;
pub const SYSINFO_RET_FAIL: c_int = 1;

pub const AR_UINT64: c_int = 0x01;
pub const AR_DOUBLE: c_int = 0x02;
pub const AR_STRING: c_int = 0x04;
pub const AR_TEXT: c_int = 0x08;
pub const AR_LOG: c_int = 0x10;
pub const AR_MESSAGE: c_int = 0x20;

const AR_VALUES: c_int = AR_UINT64 | AR_DOUBLE | AR_STRING | AR_TEXT | AR_MESSAGE;

/// Message put into a result whenever a fetch fails. Details only go to the log.
pub const FAILURE_MESSAGE: &str =
    "python_zabbix_modules failed to return value: see syslog for details";

/// Signature of the per-metric handler stored in every descriptor.
pub type MetricHandler = unsafe extern "C" fn(*mut AGENT_REQUEST, *mut AGENT_RESULT) -> c_int;

#[repr(C)]
pub struct AGENT_REQUEST {
    pub key: *mut c_char,
    pub nparam: c_int,
    pub params: *mut *mut c_char,
    pub lastlogsize: u64,
    pub mtime: c_int,
}

#[repr(C)]
pub struct AGENT_RESULT {
    pub lastlogsize: u64,
    pub ui64: u64,
    pub dbl: f64,
    pub str_: *mut c_char,
    pub text: *mut c_char,
    pub msg: *mut c_char,
    pub log: *mut c_void,
    pub type_: c_int,
    pub mtime: c_int,
}

#[repr(C)]
pub struct ZBX_METRIC {
    pub key: *mut c_char,
    pub flags: c_uint,
    pub function: Option<MetricHandler>,
    pub test_param: *mut c_char,
}

impl ZBX_METRIC {
    /// All-zero record terminating a descriptor array.
    pub const SENTINEL: Self = Self {
        key: ptr::null_mut(),
        flags: 0,
        function: None,
        test_param: ptr::null_mut(),
    };
}

/// Borrowed view of a host request.
#[derive(Debug)]
pub struct Request<'a> {
    pub key: &'a str,
    pub params: Vec<&'a str>,
    pub mtime: c_int,
}

impl<'a> Request<'a> {
    /// Read a host request without taking ownership of anything.
    ///
    /// # Safety
    /// `raw.key` must be a valid C string and `raw.params` must point to
    /// `raw.nparam` valid C strings, all outliving `'a`.
    pub unsafe fn from_raw(raw: &'a AGENT_REQUEST) -> Result<Self, (String, ConversionError)> {
        // SAFETY: guaranteed by the caller.
        let key = unsafe { crate::cstring::str_from_ptr(raw.key) }
            .map_err(|e| ("key".to_string(), e))?;

        let nparam = usize::try_from(raw.nparam).unwrap_or(0);
        if nparam > 0 && raw.params.is_null() {
            return Err(("parameters".to_string(), ConversionError::Missing));
        }
        let mut params = Vec::with_capacity(nparam);
        if nparam > 0 {
            // SAFETY: the host guarantees `params` holds `nparam` entries.
            let raw_params = unsafe { std::slice::from_raw_parts(raw.params, nparam) };
            for (i, &param) in raw_params.iter().enumerate() {
                // SAFETY: every entry is a valid C string per the caller.
                let param = unsafe { crate::cstring::str_from_ptr(param) }
                    .map_err(|e| (format!("parameter {i}"), e))?;
                params.push(param);
            }
        }

        Ok(Self {
            key,
            params,
            mtime: raw.mtime,
        })
    }
}

impl AGENT_RESULT {
    pub fn empty() -> Self {
        Self {
            lastlogsize: 0,
            ui64: 0,
            dbl: 0.0,
            str_: ptr::null_mut(),
            text: ptr::null_mut(),
            msg: ptr::null_mut(),
            log: ptr::null_mut(),
            type_: 0,
            mtime: 0,
        }
    }

    pub fn set_ui64(&mut self, value: u64) {
        self.type_ |= AR_UINT64;
        self.ui64 = value;
    }

    pub fn set_dbl(&mut self, value: f64) {
        self.type_ |= AR_DOUBLE;
        self.dbl = value;
    }

    pub fn set_str(&mut self, value: HostString) {
        self.release(AR_STRING);
        self.type_ |= AR_STRING;
        self.str_ = value.into_raw();
    }

    pub fn set_text(&mut self, value: HostString) {
        self.release(AR_TEXT);
        self.type_ |= AR_TEXT;
        self.text = value.into_raw();
    }

    pub fn set_msg(&mut self, value: HostString) {
        self.release(AR_MESSAGE);
        self.type_ |= AR_MESSAGE;
        self.msg = value.into_raw();
    }

    /// Free the string behind `flag` if it is set. A slot is only trusted
    /// while its flag is set.
    fn release(&mut self, flag: c_int) {
        if self.type_ & flag == 0 {
            return;
        }
        let slot = match flag {
            AR_STRING => &mut self.str_,
            AR_TEXT => &mut self.text,
            AR_MESSAGE => &mut self.msg,
            _ => return,
        };
        // SAFETY: string slots only hold C heap strings owned by this result.
        unsafe { free_host_string(slot) };
        self.type_ &= !flag;
    }

    /// Drop every value this result carries, leaving log data untouched.
    pub fn clear_values(&mut self) {
        self.release(AR_STRING);
        self.release(AR_TEXT);
        self.release(AR_MESSAGE);
        self.type_ &= !AR_VALUES;
    }

    /// Replace whatever was set with the fixed failure message.
    pub fn set_failure(&mut self) {
        self.clear_values();
        match HostString::new(FAILURE_MESSAGE) {
            Ok(message) => self.set_msg(message),
            Err(e) => log::error!("Unable to allocate memory for error message: {e}"),
        }
    }

    pub fn has(&self, flag: c_int) -> bool {
        self.type_ & flag != 0
    }
}
