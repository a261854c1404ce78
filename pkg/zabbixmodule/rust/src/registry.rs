// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Sentinel-terminated metric descriptor array built from the script's
//! `item_list()`.
//!
//! A malformed entry is logged and skipped. Running out of memory or the
//! iterator itself raising discards everything built so far; the host then
//! gets [`empty_list`].

use std::ffi::c_uint;
use std::fmt;
use std::ptr;

use log::{debug, error};

use crate::abi::{MetricHandler, ZBX_METRIC};
use crate::cstring::{HostString, free_host_string};
use crate::errors::{ConversionError, Error};
use crate::marshal::{optional_attr, required_attr};
use crate::runtime::Runtime;

/// Descriptor array owned by the bridge until module teardown.
pub struct MetricList {
    entries: Vec<ZBX_METRIC>,
}

// SAFETY: the raw pointers are C heap strings exclusively owned by the list.
unsafe impl Send for MetricList {}

impl MetricList {
    /// Pointer handed to the host. Valid until the list is dropped.
    pub fn as_ptr(&self) -> *mut ZBX_METRIC {
        self.entries.as_ptr().cast_mut()
    }

    /// Descriptors, sentinel excluded.
    pub fn metrics(&self) -> &[ZBX_METRIC] {
        self.entries.split_last().map_or(&[], |(_, metrics)| metrics)
    }

    pub fn len(&self) -> usize {
        self.metrics().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics().is_empty()
    }
}

impl fmt::Debug for MetricList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricList").field("len", &self.len()).finish()
    }
}

impl Drop for MetricList {
    fn drop(&mut self) {
        for metric in &mut self.entries {
            // SAFETY: keys and test params were produced by `HostString::into_raw`.
            unsafe {
                free_host_string(&mut metric.key);
                free_host_string(&mut metric.test_param);
            }
        }
    }
}

struct EmptyList(ZBX_METRIC);

// SAFETY: the sentinel holds only null pointers and is never written.
unsafe impl Sync for EmptyList {}

static EMPTY: EmptyList = EmptyList(ZBX_METRIC::SENTINEL);

/// Single-sentinel list: "this module advertises no metrics".
pub fn empty_list() -> *mut ZBX_METRIC {
    ptr::addr_of!(EMPTY.0).cast_mut()
}

struct Descriptor {
    key: HostString,
    flags: c_uint,
    test_param: Option<HostString>,
}

impl Descriptor {
    fn into_metric(self, handler: MetricHandler) -> ZBX_METRIC {
        ZBX_METRIC {
            key: self.key.into_raw(),
            flags: self.flags,
            function: Some(handler),
            test_param: self.test_param.map_or(ptr::null_mut(), HostString::into_raw),
        }
    }
}

fn descriptor<R: Runtime>(rt: &R, item: &R::Object, index: usize) -> Result<Descriptor, Error> {
    let what = |attr: &str| format!("item {index} attribute '{attr}'");

    let key = required_attr(rt, item, "key").map_err(|e| Error::conversion(what("key"), e))?;
    let flags = optional_attr::<R, u64>(rt, item, "flags")
        .map_err(|e| Error::conversion(what("flags"), e))?
        .unwrap_or(0);
    let flags = c_uint::try_from(flags).map_err(|_| {
        Error::conversion(what("flags"), ConversionError::OutOfRange("unsigned int"))
    })?;
    let test_param = optional_attr(rt, item, "test_param")
        .map_err(|e| Error::conversion(what("test_param"), e))?;

    Ok(Descriptor {
        key,
        flags,
        test_param,
    })
}

pub(crate) fn grow_by_one(entries: &mut Vec<ZBX_METRIC>) -> Result<(), Error> {
    entries.try_reserve_exact(1).map_err(|_| Error::Allocation {
        context: "metric list".to_string(),
    })
}

/// Call `item_list()` and turn what it yields into a descriptor array.
///
/// `report` is invoked wherever a runtime fault may be pending, before the
/// build either moves on or gives up.
pub fn build<R, F>(rt: &R, item_list: &R::Object, handler: MetricHandler, report: F) -> Result<MetricList, Error>
where
    R: Runtime,
    F: Fn(),
{
    build_with(rt, item_list, handler, report, grow_by_one)
}

pub(crate) fn build_with<R, F, G>(
    rt: &R,
    item_list: &R::Object,
    handler: MetricHandler,
    report: F,
    mut grow: G,
) -> Result<MetricList, Error>
where
    R: Runtime,
    F: Fn(),
    G: FnMut(&mut Vec<ZBX_METRIC>) -> Result<(), Error>,
{
    let fail = |e: Error| {
        report();
        e
    };

    let items = rt
        .call(item_list, &[])
        .map_err(|_| fail(Error::fault("item_list()")))?;
    let iterator = rt.iter(&items);
    rt.release(items);
    let iterator = iterator.map_err(|_| fail(Error::fault("iterating item_list() result")))?;
    let iterator = scopeguard::guard(iterator, |iterator| rt.release(iterator));

    let mut list = MetricList {
        entries: Vec::new(),
    };
    let mut index = 0;
    while let Some(item) = rt
        .next(&iterator)
        .map_err(|_| fail(Error::fault("iterating item_list() result")))?
    {
        let parsed = descriptor(rt, &item, index);
        rt.release(item);
        match parsed {
            Ok(descriptor) => {
                grow(&mut list.entries)?;
                list.entries.push(descriptor.into_metric(handler));
            }
            Err(e) => {
                error!("Skipping malformed item_list() entry: {e}");
                report();
            }
        }
        index += 1;
    }

    grow(&mut list.entries)?;
    list.entries.push(ZBX_METRIC::SENTINEL);
    debug!("item_list() yielded {index} entries, {} usable", list.len());
    Ok(list)
}
