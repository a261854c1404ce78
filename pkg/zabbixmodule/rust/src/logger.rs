// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! `log` backend writing to syslog(3), where the host's own module
//! diagnostics end up as well.

use std::ffi::{CString, c_int};

use log::{Level, LevelFilter, Log, Metadata, Record};

const PREFIX: &str = "[python_zabbix_modules] ";

pub struct SyslogLogger {
    level: LevelFilter,
}

impl SyslogLogger {
    pub fn new(level: Level) -> Self {
        Self {
            level: level.to_level_filter(),
        }
    }
}

fn priority(level: Level) -> c_int {
    match level {
        Level::Error => libc::LOG_ERR,
        Level::Warn => libc::LOG_WARNING,
        Level::Info => libc::LOG_INFO,
        Level::Debug | Level::Trace => libc::LOG_DEBUG,
    }
}

fn line(message: &str) -> CString {
    let line = format!("{PREFIX}{message}").replace('\0', "\\0");
    // No NUL bytes are left in `line`.
    CString::new(line).unwrap_or_default()
}

impl Log for SyslogLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = line(&record.args().to_string());
        // SAFETY: both the format and the argument are NUL-terminated, and the
        // `%s` format consumes exactly one string argument.
        unsafe { libc::syslog(priority(record.level()), c"%s".as_ptr(), line.as_ptr()) };
    }

    fn flush(&self) {}
}

/// Route `log` records to syslog. Only the first call in a process installs
/// the logger; returns whether this call did.
pub fn init(level: Level) -> bool {
    let installed = log::set_boxed_logger(Box::new(SyslogLogger::new(level))).is_ok();
    if installed {
        log::set_max_level(level.to_level_filter());
    }
    installed
}
