// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
use log::{debug, error};

use crate::errors::Error;

/// Interpreter library re-opened with global symbol visibility.
///
/// The host loads modules with `RTLD_LOCAL`, so extension modules that are
/// not linked against the interpreter library cannot resolve its symbols
/// unless it is promoted to the global namespace first.
#[derive(Debug)]
pub struct PreloadedLibrary {
    name: String,
    library: Option<Library>,
}

impl PreloadedLibrary {
    pub fn open(name: &str) -> Result<Self, Error> {
        // SAFETY: loading the interpreter library runs its initializers, which
        // is exactly what linking against it would do.
        let library = unsafe { Library::open(Some(name), RTLD_NOW | RTLD_GLOBAL) }.map_err(
            |source| Error::Library {
                name: name.to_string(),
                source,
            },
        )?;
        debug!("Loaded '{name}' with RTLD_GLOBAL");
        Ok(Self {
            name: name.to_string(),
            library: Some(library),
        })
    }

    /// Close the handle. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(library) = self.library.take()
            && let Err(e) = library.close()
        {
            error!("Unable to close '{}': {e}", self.name);
        }
    }
}

impl Drop for PreloadedLibrary {
    fn drop(&mut self) {
        self.close();
    }
}
