// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Overrides the configuration file location.
pub const CONFIG_ENV: &str = "PYTHON_ZABBIX_MODULES_BRIDGE_CONF";

const SYSTEM_CONFIG: &str = "/etc/python_zabbix_modules/bridge.conf";
const USER_CONFIG: &str = ".config/python_zabbix_modules/bridge.conf";

pub const DEFAULT_SCRIPT_MODULE: &str = "zabbix_modules.wrapper";

fn default_module_type() -> String {
    "agentd".to_string()
}

fn default_script_module() -> String {
    DEFAULT_SCRIPT_MODULE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeConfig {
    /// Passed to the script's `init`, e.g. `agentd` or `server`.
    #[serde(default = "default_module_type")]
    pub module_type: String,
    #[serde(default = "default_script_module")]
    pub script_module: String,
    /// Interpreter shared library to promote to `RTLD_GLOBAL` before start.
    #[serde(default)]
    pub python_library: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            module_type: default_module_type(),
            script_module: default_script_module(),
            python_library: None,
            log_level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    pub fn log_level(&self) -> log::Level {
        parse_log_level(&self.log_level)
    }

    /// Parse a configuration file. An empty file means all defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bridge config: {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse bridge config: {}", path.display()))
    }

    /// Load the first configuration file found, or defaults when there is none.
    pub fn load() -> Result<Self> {
        match find_config() {
            Some(path) => {
                debug!("Loading bridge config from {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Lookup order: `$PYTHON_ZABBIX_MODULES_BRIDGE_CONF`, the system-wide file,
/// then the one under `$HOME`.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(path) = env::var(CONFIG_ENV) {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from(SYSTEM_CONFIG));
    if let Ok(home) = env::var("HOME") {
        paths.push(Path::new(&home).join(USER_CONFIG));
    }
    paths
}

pub fn find_config() -> Option<PathBuf> {
    candidate_paths().into_iter().find(|p| p.is_file())
}

pub fn parse_log_level(level: &str) -> log::Level {
    match level.to_lowercase().as_str() {
        "trace" => log::Level::Trace,
        "debug" => log::Level::Debug,
        "info" => log::Level::Info,
        "warn" | "warning" => log::Level::Warn,
        "error" | "critical" => log::Level::Error,
        "off" => log::Level::Error, // log has no "off" level, keep errors only
        _ => log::Level::Info,
    }
}
