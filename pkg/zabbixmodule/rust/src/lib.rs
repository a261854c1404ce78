// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Loadable Zabbix module that hosts an embedded Python interpreter.
//!
//! The host calls the fixed `zbx_module_*` C ABI; every call is translated
//! into a call on the script module (`zabbix_modules.wrapper` by default)
//! and its result translated back into host records.

// Correctness
#![deny(clippy::indexing_slicing)]
#![deny(clippy::string_slice)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod abi;
pub mod bridge;
pub mod config;
pub mod cstring;
mod errors;
mod fault;
pub mod ffi;
pub mod fork;
pub mod logger;
pub mod marshal;
pub mod registry;
mod request;
pub mod runtime;
mod state;
pub mod symbols;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export the public API
pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use errors::{ConversionError, Error};
pub use fork::ForkSignal;
pub use runtime::{FaultPending, RtResult, Runtime};
pub use state::BridgeState;
