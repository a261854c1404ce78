// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! NUL-terminated strings shared with the host.
//!
//! The host releases every string it receives with `free()`, so strings
//! handed over must come from the C heap rather than the Rust allocator.

use std::ffi::{CStr, CString, c_char};
use std::fmt;
use std::ptr::NonNull;

use crate::errors::ConversionError;

/// Owned, `malloc`-backed C string. Freed on drop unless released with
/// [`HostString::into_raw`].
pub struct HostString(NonNull<c_char>);

// SAFETY: the buffer is exclusively owned and never aliased mutably.
unsafe impl Send for HostString {}

impl HostString {
    /// Copy `value` into a fresh C heap allocation.
    pub fn new(value: &str) -> Result<Self, ConversionError> {
        let cstr = CString::new(value).map_err(|_| ConversionError::InteriorNul)?;
        // SAFETY: `cstr` is a valid NUL-terminated string for the duration of the call.
        let ptr = unsafe { libc::strdup(cstr.as_ptr()) };
        NonNull::new(ptr)
            .map(HostString)
            .ok_or(ConversionError::Allocation)
    }

    pub fn as_c_str(&self) -> &CStr {
        // SAFETY: the pointer came from `strdup` and stays valid while `self` lives.
        unsafe { CStr::from_ptr(self.0.as_ptr()) }
    }

    /// Hand the allocation over; the receiver becomes responsible for `free()`.
    pub fn into_raw(self) -> *mut c_char {
        let ptr = self.0.as_ptr();
        std::mem::forget(self);
        ptr
    }
}

impl Drop for HostString {
    fn drop(&mut self) {
        // SAFETY: the pointer came from `strdup` and ownership was not released.
        unsafe { libc::free(self.0.as_ptr().cast()) };
    }
}

impl fmt::Debug for HostString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_c_str(), f)
    }
}

/// Free a host string and null the slot. NULL is a no-op.
///
/// # Safety
/// `*slot` must be NULL or a pointer obtained from the C heap that nothing
/// else will free.
pub unsafe fn free_host_string(slot: &mut *mut c_char) {
    if !slot.is_null() {
        // SAFETY: guaranteed by the caller.
        unsafe { libc::free(slot.cast()) };
    }
    *slot = std::ptr::null_mut();
}

/// Borrow a C string as UTF-8.
///
/// # Safety
/// `ptr` must be NULL or point to a NUL-terminated string valid for `'a`.
pub unsafe fn str_from_ptr<'a>(ptr: *const c_char) -> Result<&'a str, ConversionError> {
    if ptr.is_null() {
        return Err(ConversionError::Missing);
    }
    // SAFETY: guaranteed by the caller.
    let cstr = unsafe { CStr::from_ptr(ptr) };
    cstr.to_str().map_err(|_| ConversionError::NotString)
}
