// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The embedded scripting runtime as seen by the bridge.
//!
//! The runtime follows the CPython C-API fault model: a failing operation
//! leaves an exception in a single per-runtime slot and reports
//! [`FaultPending`]. The slot must be drained with [`Runtime::fetch_fault`]
//! before the runtime is used again.

mod preload;
#[cfg(feature = "python")]
pub mod python;

pub use preload::PreloadedLibrary;

/// A fault is pending in the runtime's fault slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultPending;

pub type RtResult<T> = Result<T, FaultPending>;

/// Fault as fetched from the slot. Value and traceback may be missing
/// until normalized.
pub struct RawFault<O> {
    pub kind: O,
    pub value: Option<O>,
    pub traceback: Option<O>,
}

/// Normalized `(type, value, traceback)` triple, ready for formatting.
pub struct Fault<O> {
    pub kind: O,
    pub value: O,
    pub traceback: O,
}

pub trait Runtime {
    type Object;

    /// Start the interpreter. Calling it on a running interpreter is a no-op.
    fn initialize(&self);
    fn is_initialized(&self) -> bool;
    fn finalize(&self);
    /// Interpreter bookkeeping required in a freshly forked child.
    fn reinit_after_fork(&self);

    fn import(&self, name: &str) -> RtResult<Self::Object>;
    fn getattr(&self, obj: &Self::Object, name: &str) -> RtResult<Self::Object>;
    fn setattr(&self, obj: &Self::Object, name: &str, value: Self::Object) -> RtResult<()>;
    fn call(&self, callable: &Self::Object, args: &[&Self::Object]) -> RtResult<Self::Object>;
    fn iter(&self, obj: &Self::Object) -> RtResult<Self::Object>;
    /// `Ok(None)` once the iterator is exhausted without raising.
    fn next(&self, iterator: &Self::Object) -> RtResult<Option<Self::Object>>;

    fn is_none(&self, obj: &Self::Object) -> bool;
    fn is_type(&self, obj: &Self::Object) -> bool;
    fn is_callable(&self, obj: &Self::Object) -> bool;
    fn is_int(&self, obj: &Self::Object) -> bool;
    fn is_str(&self, obj: &Self::Object) -> bool;

    fn none(&self) -> Self::Object;
    fn new_bool(&self, value: bool) -> Self::Object;
    fn new_int(&self, value: i64) -> RtResult<Self::Object>;
    fn new_str(&self, value: &str) -> RtResult<Self::Object>;
    fn new_tuple(&self, items: Vec<Self::Object>) -> RtResult<Self::Object>;

    fn int_value(&self, obj: &Self::Object) -> RtResult<i64>;
    /// Raises when the integer is negative or too large.
    fn uint64_value(&self, obj: &Self::Object) -> RtResult<u64>;
    /// The runtime's own float coercion.
    fn float_value(&self, obj: &Self::Object) -> RtResult<f64>;
    /// UTF-8 encoding of a string object.
    fn utf8_value(&self, obj: &Self::Object) -> RtResult<String>;
    fn join(&self, separator: &str, items: &Self::Object) -> RtResult<Self::Object>;

    /// Take the pending fault out of the slot, leaving it empty.
    fn fetch_fault(&self) -> Option<RawFault<Self::Object>>;
    fn normalize_fault(&self, raw: RawFault<Self::Object>) -> Fault<Self::Object>;
    fn clear_fault(&self);

    /// Give up a reference while the runtime is still alive.
    fn release(&self, obj: Self::Object) {
        drop(obj);
    }
}
