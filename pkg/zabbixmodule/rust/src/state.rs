// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Loaded by the host, interpreter not started.
    Uninitialized,
    /// Script symbols resolved, script `init` not run yet.
    Bound,
    /// Script initialized, requests are served.
    Ready,
    /// Torn down. Terminal.
    Unbound,
}

impl BridgeState {
    pub fn is_ready(self) -> bool {
        self == BridgeState::Ready
    }

    pub(crate) fn can_transition_to(self, next: BridgeState) -> bool {
        use BridgeState::*;
        matches!(
            (self, next),
            (Uninitialized, Bound)
                | (Uninitialized, Unbound)
                | (Bound, Ready)
                | (Bound, Unbound)
                | (Ready, Unbound)
        )
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Uninitialized => write!(f, "uninitialized"),
            BridgeState::Bound => write!(f, "bound"),
            BridgeState::Ready => write!(f, "ready"),
            BridgeState::Unbound => write!(f, "unbound"),
        }
    }
}
