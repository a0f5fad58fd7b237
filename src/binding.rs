//! Library binding
//!
//! A [`Library`] resolves the exported symbols of one loaded dynamic
//! library into typed handles: functions become callable function handles
//! (remembering their symbol name for diagnostics), global variables are
//! read and written through a requested type.
//!
//! The loaded library is shared (`Rc`) into every handle bound from it, so
//! a bound function outlives the binding object that produced it. Load and
//! lookup failures are fatal to the requested binding only; nothing
//! already bound is affected.

use std::rc::Rc;

use log::debug;

use crate::data::cdata::CData;
use crate::data::value::Value;
use crate::ffi::library::SharedLibrary;
use crate::ffi::memory::{self, MemBlock};
use crate::types::errors::Error;
use crate::types::{CType, TypeKind};

/// One loaded library exposing typed symbol lookup
#[derive(Debug)]
pub struct Library {
    lib: Rc<SharedLibrary>,
}

impl Library {
    /// Open a library by path or soname.
    pub fn open(name: &str) -> Result<Self, Error> {
        Ok(Library {
            lib: Rc::new(SharedLibrary::open(name)?),
        })
    }

    /// Open the C runtime library.
    pub fn open_default() -> Result<Self, Error> {
        Ok(Library {
            lib: Rc::new(SharedLibrary::open_default()?),
        })
    }

    pub fn name(&self) -> &str {
        self.lib.name()
    }

    /// Bind an exported function as a handle of the given function type.
    pub fn function(&self, btype: &CType, name: &str) -> Result<CData, Error> {
        if !matches!(btype.kind(), TypeKind::Function(_)) {
            return Err(Error::TypeMismatch {
                expected: "a function type".to_string(),
                got: format!("'{}'", btype.c_name()),
            });
        }
        let address = self.lib.symbol(name)?;
        debug!("bound function '{}' as '{}'", name, btype.c_name());
        Ok(CData::function_symbol(
            btype.clone(),
            address,
            name.to_string(),
            self.lib.clone(),
        ))
    }

    /// Decode a global variable's current native bytes through `btype`.
    pub fn read_variable(&self, btype: &CType, name: &str) -> Result<Value, Error> {
        let address = self.lib.symbol(name)?;
        btype.read_at(address)
    }

    /// Store a new value into a global variable. The symbol's address is
    /// fixed, so this is always a raw copy of exactly `btype.size()`
    /// bytes — never a pointer reassignment.
    pub fn write_variable(&self, btype: &CType, name: &str, value: &Value) -> Result<(), Error> {
        let address = self.lib.symbol(name)?;
        write_exact(btype, address, value)
    }
}

/// The global-variable store primitive: marshal `value` through `btype`
/// into scratch memory, then copy exactly `btype.size()` bytes to
/// `address`. Validation completes before the target is touched.
pub fn write_exact(btype: &CType, address: u64, value: &Value) -> Result<(), Error> {
    let scratch = MemBlock::zeroed(btype.size(), btype.align());
    btype.write_at(scratch.address(), value)?;
    unsafe { memory::copy(address, scratch.address(), btype.size()) };
    Ok(())
}
