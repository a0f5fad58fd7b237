//! Native callbacks backed by host callables
//!
//! A [`CallbackHandle`] turns a host-side handler into real native code:
//! libffi writes a small trampoline whose address can be handed to C as a
//! function pointer. The handler cell is boxed so the trampoline's
//! userdata pointer stays valid for the whole life of the handle; dropping
//! the handle frees the trampoline, after which the code address is dead.
//!
//! The handler works on raw marshalled memory (argument pointer array in,
//! result slot out); attaching C types to both ends happens in
//! [`types::function`](crate::types::function). No unwind may cross the
//! trampoline: panics are caught and the result slot is left zeroed.

use std::os::raw::c_void;

use libffi::low;
use libffi::middle::{Cif, Closure};
use log::error;

use super::NativeType;
use crate::types::errors::Error;

/// Raw callback handler: receives libffi's argument pointer array and the
/// result slot, both typed by the signature the handle was built with.
pub type RawHandler = Box<dyn Fn(*const *const c_void, *mut c_void)>;

struct CallbackCell {
    handler: RawHandler,
}

/// A live native trampoline bound to a host handler
pub struct CallbackHandle {
    // Declared before `cell` so the trampoline is destroyed first.
    _closure: Closure<'static>,
    _cell: Box<CallbackCell>,
    code: u64,
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CallbackHandle({:#x})", self.code)
    }
}

impl CallbackHandle {
    pub fn new(
        args: &[NativeType],
        result: &NativeType,
        handler: RawHandler,
    ) -> Result<Self, Error> {
        let cif = Cif::new(
            args.iter().map(NativeType::libffi_type),
            result.libffi_type(),
        );
        let cell = Box::new(CallbackCell { handler });
        // The box gives the cell a stable address for the closure's
        // lifetime, which matches the handle's lifetime by construction.
        let cell_ref: &'static CallbackCell =
            unsafe { &*(cell.as_ref() as *const CallbackCell) };
        let closure = Closure::new(cif, trampoline, cell_ref);
        let code = (*closure.code_ptr()) as usize as u64;
        if code == 0 {
            return Err(Error::ForeignCall {
                message: "closure allocation failed".to_string(),
            });
        }
        Ok(CallbackHandle {
            _closure: closure,
            _cell: cell,
            code,
        })
    }

    /// The native code address callable from C
    pub fn code(&self) -> u64 {
        self.code
    }
}

unsafe extern "C" fn trampoline(
    _cif: &low::ffi_cif,
    result: &mut u64,
    args: *const *const c_void,
    userdata: &CallbackCell,
) {
    // libffi does not pre-clear the result slot; zero the first word as a
    // backstop in case the handler bails before writing.
    *result = 0;
    let slot = result as *mut u64 as *mut c_void;
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        (userdata.handler)(args, slot)
    }));
    if outcome.is_err() {
        error!("host callback panicked; returning zeroed result");
    }
}
