// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Fork events recorded by `pthread_atfork` and drained before each call.

use std::ffi::c_int;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::Error;

/// Two coalescing flags: "we forked, this is the child" and "we forked,
/// this is the parent". Set from fork handlers, drained by the bridge.
#[derive(Debug)]
pub struct ForkSignal {
    parent: AtomicBool,
    child: AtomicBool,
}

impl ForkSignal {
    pub const fn new() -> Self {
        Self {
            parent: AtomicBool::new(false),
            child: AtomicBool::new(false),
        }
    }

    pub fn mark_parent(&self) {
        self.parent.store(true, Ordering::SeqCst);
    }

    /// A child inherits its parent's pending flags; only its own fork counts.
    pub fn mark_child(&self) {
        self.child.store(true, Ordering::SeqCst);
        self.parent.store(false, Ordering::SeqCst);
    }

    pub fn take_child(&self) -> bool {
        self.child.swap(false, Ordering::SeqCst)
    }

    pub fn take_parent(&self) -> bool {
        self.parent.swap(false, Ordering::SeqCst)
    }
}

impl Default for ForkSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide signal fed by [`install_hook`].
pub static FORK_SIGNAL: ForkSignal = ForkSignal::new();

unsafe extern "C" fn on_fork_parent() {
    FORK_SIGNAL.mark_parent();
}

unsafe extern "C" fn on_fork_child() {
    FORK_SIGNAL.mark_child();
}

/// Register the fork handlers feeding [`FORK_SIGNAL`]. Handlers cannot be
/// unregistered, so only the first call registers them; later calls report
/// the first outcome.
pub fn install_hook() -> Result<(), Error> {
    static RESULT: OnceLock<c_int> = OnceLock::new();
    let rc = *RESULT.get_or_init(|| {
        // SAFETY: both handlers only store to atomics, which is
        // async-signal-safe and valid in a freshly forked child.
        unsafe { libc::pthread_atfork(None, Some(on_fork_parent), Some(on_fork_child)) }
    });
    if rc == 0 { Ok(()) } else { Err(Error::ForkHook(rc)) }
}
