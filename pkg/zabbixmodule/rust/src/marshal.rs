// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Conversions between script objects and native values.
//!
//! `None` means "no value". [`optional`] turns it into `Ok(None)`,
//! [`required`] into [`ConversionError::Missing`]. A conversion that makes the
//! runtime raise returns [`ConversionError::Faulted`] and leaves the fault
//! pending for the caller to report.

use std::ffi::c_int;

use crate::cstring::HostString;
use crate::errors::ConversionError;
use crate::runtime::{RtResult, Runtime};

pub trait FromScript<R: Runtime>: Sized {
    /// Convert a value known not to be `None`.
    fn from_script(rt: &R, obj: &R::Object) -> Result<Self, ConversionError>;
}

pub trait ToScript<R: Runtime> {
    fn to_script(&self, rt: &R) -> RtResult<R::Object>;
}

pub fn optional<R, T>(rt: &R, obj: &R::Object) -> Result<Option<T>, ConversionError>
where
    R: Runtime,
    T: FromScript<R>,
{
    if rt.is_none(obj) {
        return Ok(None);
    }
    T::from_script(rt, obj).map(Some)
}

pub fn required<R, T>(rt: &R, obj: &R::Object) -> Result<T, ConversionError>
where
    R: Runtime,
    T: FromScript<R>,
{
    optional(rt, obj)?.ok_or(ConversionError::Missing)
}

/// Read attribute `name` of `obj`; a missing attribute is a fault, not `None`.
pub fn optional_attr<R, T>(rt: &R, obj: &R::Object, name: &str) -> Result<Option<T>, ConversionError>
where
    R: Runtime,
    T: FromScript<R>,
{
    let value = rt.getattr(obj, name).map_err(|_| ConversionError::Faulted)?;
    let converted = optional(rt, &value);
    rt.release(value);
    converted
}

pub fn required_attr<R, T>(rt: &R, obj: &R::Object, name: &str) -> Result<T, ConversionError>
where
    R: Runtime,
    T: FromScript<R>,
{
    optional_attr(rt, obj, name)?.ok_or(ConversionError::Missing)
}

impl<R: Runtime> FromScript<R> for c_int {
    fn from_script(rt: &R, obj: &R::Object) -> Result<Self, ConversionError> {
        if !rt.is_int(obj) {
            return Err(ConversionError::NotInteger);
        }
        let value = rt.int_value(obj).map_err(|_| ConversionError::Faulted)?;
        c_int::try_from(value).map_err(|_| ConversionError::OutOfRange("int"))
    }
}

impl<R: Runtime> FromScript<R> for u64 {
    fn from_script(rt: &R, obj: &R::Object) -> Result<Self, ConversionError> {
        if !rt.is_int(obj) {
            return Err(ConversionError::NotInteger);
        }
        rt.uint64_value(obj).map_err(|_| ConversionError::Faulted)
    }
}

impl<R: Runtime> FromScript<R> for f64 {
    fn from_script(rt: &R, obj: &R::Object) -> Result<Self, ConversionError> {
        rt.float_value(obj).map_err(|_| ConversionError::Faulted)
    }
}

impl<R: Runtime> FromScript<R> for HostString {
    fn from_script(rt: &R, obj: &R::Object) -> Result<Self, ConversionError> {
        if !rt.is_str(obj) {
            return Err(ConversionError::NotString);
        }
        let value = rt.utf8_value(obj).map_err(|_| ConversionError::Faulted)?;
        HostString::new(&value)
    }
}

impl<R: Runtime> ToScript<R> for str {
    fn to_script(&self, rt: &R) -> RtResult<R::Object> {
        rt.new_str(self)
    }
}

impl<R: Runtime> ToScript<R> for c_int {
    fn to_script(&self, rt: &R) -> RtResult<R::Object> {
        rt.new_int(i64::from(*self))
    }
}

impl<R: Runtime> ToScript<R> for bool {
    fn to_script(&self, rt: &R) -> RtResult<R::Object> {
        Ok(rt.new_bool(*self))
    }
}

/// Build a tuple from `items`, in order. Elements built before a failure
/// are released before the fault is returned.
pub fn tuple<R, T>(rt: &R, items: &[&T]) -> RtResult<R::Object>
where
    R: Runtime,
    T: ToScript<R> + ?Sized,
{
    let mut objects = Vec::with_capacity(items.len());
    for item in items {
        match item.to_script(rt) {
            Ok(obj) => objects.push(obj),
            Err(fault) => {
                for obj in objects {
                    rt.release(obj);
                }
                return Err(fault);
            }
        }
    }
    rt.new_tuple(objects)
}
