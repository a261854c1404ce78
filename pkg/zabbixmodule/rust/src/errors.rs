// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::ffi::c_int;

use thiserror::Error;

use crate::state::BridgeState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to bind '{name}': {reason}")]
    Binding { name: String, reason: String },

    #[error("unable to convert {what}: {source}")]
    Conversion {
        what: String,
        #[source]
        source: ConversionError,
    },

    #[error("{context}: script raised an exception")]
    RuntimeFault { context: String },

    #[error("{call} returned status {status}")]
    ScriptStatus { call: &'static str, status: c_int },

    #[error("{context}: memory allocation failed")]
    Allocation { context: String },

    #[error("after_fork(parent={parent}) notification failed")]
    ForkNotification { parent: bool },

    #[error("pthread_atfork() failed with code {0}")]
    ForkHook(i32),

    #[error("invalid module state transition: {from} -> {to}")]
    InvalidTransition { from: BridgeState, to: BridgeState },

    #[error("module is {0}, not ready")]
    NotReady(BridgeState),

    #[error("unable to load library '{name}': {source}")]
    Library {
        name: String,
        #[source]
        source: libloading::Error,
    },
}

/// A value could not be turned into its native representation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionError {
    #[error("value is None")]
    Missing,
    #[error("value is not an integer")]
    NotInteger,
    #[error("value is not a string")]
    NotString,
    #[error("value out of bounds of {0}")]
    OutOfRange(&'static str),
    #[error("string contains a NUL byte")]
    InteriorNul,
    #[error("script raised while converting the value")]
    Faulted,
    #[error("memory allocation failed")]
    Allocation,
}

impl Error {
    pub(crate) fn conversion(what: impl Into<String>, source: ConversionError) -> Self {
        Error::Conversion {
            what: what.into(),
            source,
        }
    }

    pub(crate) fn fault(context: impl Into<String>) -> Self {
        Error::RuntimeFault {
            context: context.into(),
        }
    }
}
