//! Dynamic-library loading and symbol-address lookup
//!
//! A [`SharedLibrary`] wraps one loaded dynamic library. Symbols resolve to
//! raw addresses; attaching types to them happens one layer up, in
//! [`binding`](crate::binding). The library stays mapped until the handle
//! drops.
//!
//! Path discovery is deliberately not done here: the given name is handed
//! to the system loader verbatim, so callers pass either a full path or a
//! soname the loader can resolve on its own.

use std::os::raw::c_void;

use log::debug;

use crate::types::errors::Error;

/// One loaded dynamic library
#[derive(Debug)]
pub struct SharedLibrary {
    name: String,
    lib: libloading::Library,
}

impl SharedLibrary {
    /// Load a library by path or soname.
    pub fn open(name: &str) -> Result<Self, Error> {
        let lib = unsafe { libloading::Library::new(name) }.map_err(|e| {
            Error::LibraryNotFound {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;
        debug!("loaded library '{}'", name);
        Ok(SharedLibrary {
            name: name.to_string(),
            lib,
        })
    }

    /// Load the C runtime library.
    pub fn open_default() -> Result<Self, Error> {
        #[cfg(target_os = "linux")]
        let name = "libc.so.6";
        #[cfg(any(target_os = "macos", target_os = "ios"))]
        let name = "libc.dylib";
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
        let name = "libc.so";
        Self::open(name)
    }

    /// Resolve an exported symbol to its raw address.
    pub fn symbol(&self, symbol: &str) -> Result<u64, Error> {
        let mut owned = symbol.as_bytes().to_vec();
        owned.push(0);
        let sym = unsafe { self.lib.get::<*mut c_void>(&owned) }.map_err(|_| {
            Error::SymbolNotFound {
                library: self.name.clone(),
                symbol: symbol.to_string(),
            }
        })?;
        let address = *sym as u64;
        if address == 0 {
            return Err(Error::SymbolNotFound {
                library: self.name.clone(),
                symbol: symbol.to_string(),
            });
        }
        debug!("resolved '{}' in '{}' to {:#x}", symbol, self.name, address);
        Ok(address)
    }

    /// The name or path the library was opened with
    pub fn name(&self) -> &str {
        &self.name
    }
}
