//! The foreign call
//!
//! One entry point pair: [`call`] for fixed-arity functions and
//! [`call_variadic`] for variadic ones. Both take a function address, the
//! marshalled arguments paired with their call-level types, and the result
//! type, and return the marshalled result.
//!
//! The cif is prepared per call. Argument values are copied into pinned
//! slots first so that libffi receives a stable pointer per argument;
//! aggregate arguments travel as their padded byte image, aggregate
//! results land in an aligned scratch block.

use std::os::raw::c_void;

use libffi::low::{self, CodePtr};
use libffi::middle::Type;
use libffi::raw;

use super::memory::MemBlock;
use super::{NativeKind, NativeType, NativeValue};
use crate::types::errors::Error;

/// One marshalled call argument: its call-level type and value
#[derive(Debug, Clone)]
pub struct CallArg {
    pub ty: NativeType,
    pub value: NativeValue,
}

/// Pinned storage for one argument. Pointers are re-widened to the native
/// word so the slot has exactly the size libffi reads.
enum ArgSlot {
    Scalar(NativeValue),
    Addr(usize),
    Bytes(Vec<u8>),
}

impl ArgSlot {
    fn new(value: &NativeValue) -> Result<Self, Error> {
        match value {
            NativeValue::Void => Err(Error::ForeignCall {
                message: "void is not a valid argument".to_string(),
            }),
            NativeValue::Pointer(addr) => Ok(ArgSlot::Addr(*addr as usize)),
            NativeValue::Bytes(bytes) => Ok(ArgSlot::Bytes(bytes.clone())),
            other => Ok(ArgSlot::Scalar(other.clone())),
        }
    }

    fn as_raw(&self) -> *mut c_void {
        match self {
            ArgSlot::Addr(v) => v as *const usize as *mut c_void,
            ArgSlot::Bytes(b) => b.as_ptr() as *mut c_void,
            ArgSlot::Scalar(v) => match v {
                NativeValue::I8(x) => x as *const i8 as *mut c_void,
                NativeValue::U8(x) => x as *const u8 as *mut c_void,
                NativeValue::I16(x) => x as *const i16 as *mut c_void,
                NativeValue::U16(x) => x as *const u16 as *mut c_void,
                NativeValue::I32(x) => x as *const i32 as *mut c_void,
                NativeValue::U32(x) => x as *const u32 as *mut c_void,
                NativeValue::I64(x) => x as *const i64 as *mut c_void,
                NativeValue::U64(x) => x as *const u64 as *mut c_void,
                NativeValue::F32(x) => x as *const f32 as *mut c_void,
                NativeValue::F64(x) => x as *const f64 as *mut c_void,
                // Handled in `new`
                NativeValue::Void | NativeValue::Pointer(_) | NativeValue::Bytes(_) => {
                    unreachable!()
                }
            },
        }
    }
}

/// Invoke a fixed-arity native function.
pub fn call(address: u64, args: &[CallArg], result: &NativeType) -> Result<NativeValue, Error> {
    invoke(address, args, None, result)
}

/// Invoke a variadic native function; the first `fixed` arguments are the
/// declared ones. Trailing arguments must already be default-promoted
/// (no `float`, no sub-`int` integers).
pub fn call_variadic(
    address: u64,
    args: &[CallArg],
    fixed: usize,
    result: &NativeType,
) -> Result<NativeValue, Error> {
    invoke(address, args, Some(fixed), result)
}

fn invoke(
    address: u64,
    args: &[CallArg],
    fixed: Option<usize>,
    result: &NativeType,
) -> Result<NativeValue, Error> {
    if address == 0 {
        return Err(Error::ForeignCall {
            message: "null function pointer".to_string(),
        });
    }

    // The middle-level Type objects own the underlying ffi_type memory and
    // must outlive the call.
    let arg_types: Vec<Type> = args.iter().map(|a| a.ty.libffi_type()).collect();
    let ret_type = result.libffi_type();
    let mut raw_arg_types: Vec<*mut low::ffi_type> =
        arg_types.iter().map(|t| t.as_raw_ptr()).collect();

    let mut cif: low::ffi_cif = Default::default();
    let prepped = unsafe {
        match fixed {
            None => low::prep_cif(
                &mut cif,
                low::ffi_abi_FFI_DEFAULT_ABI,
                args.len(),
                ret_type.as_raw_ptr(),
                raw_arg_types.as_mut_ptr(),
            ),
            Some(nfixed) => low::prep_cif_var(
                &mut cif,
                low::ffi_abi_FFI_DEFAULT_ABI,
                nfixed,
                args.len(),
                ret_type.as_raw_ptr(),
                raw_arg_types.as_mut_ptr(),
            ),
        }
    };
    prepped.map_err(|e| Error::ForeignCall {
        message: format!("cif preparation failed: {:?}", e),
    })?;

    let slots: Vec<ArgSlot> = args
        .iter()
        .map(|a| ArgSlot::new(&a.value))
        .collect::<Result<_, _>>()?;
    let mut avalues: Vec<*mut c_void> = slots.iter().map(ArgSlot::as_raw).collect();

    let cif_ptr = &mut cif as *mut low::ffi_cif;
    let code = CodePtr(address as *mut c_void);

    let out = unsafe {
        match result {
            NativeType::Void => {
                low::call::<()>(cif_ptr, code, avalues.as_mut_ptr());
                NativeValue::Void
            }
            // Integral results come back widened to a full ffi_arg; read
            // the whole word and truncate into the declared kind. Floats
            // are written exactly.
            NativeType::Scalar(kind) => match kind {
                NativeKind::F32 => {
                    NativeValue::F32(low::call::<f32>(cif_ptr, code, avalues.as_mut_ptr()))
                }
                NativeKind::F64 => {
                    NativeValue::F64(low::call::<f64>(cif_ptr, code, avalues.as_mut_ptr()))
                }
                _ => {
                    let word = low::call::<u64>(cif_ptr, code, avalues.as_mut_ptr());
                    match kind {
                        NativeKind::I8 => NativeValue::I8(word as i8),
                        NativeKind::U8 => NativeValue::U8(word as u8),
                        NativeKind::I16 => NativeValue::I16(word as i16),
                        NativeKind::U16 => NativeValue::U16(word as u16),
                        NativeKind::I32 => NativeValue::I32(word as i32),
                        NativeKind::U32 => NativeValue::U32(word as u32),
                        NativeKind::I64 => NativeValue::I64(word as i64),
                        NativeKind::U64 => NativeValue::U64(word),
                        NativeKind::Pointer => NativeValue::Pointer(word as usize as u64),
                        NativeKind::F32 | NativeKind::F64 => unreachable!(),
                    }
                }
            },
            NativeType::Aggregate { size, align, .. } => {
                // libffi requires the return buffer to hold at least a
                // register-sized value.
                let word = std::mem::size_of::<usize>();
                let buf = MemBlock::zeroed((*size).max(word), (*align).max(word));
                raw::ffi_call(
                    cif_ptr,
                    Some(std::mem::transmute::<usize, unsafe extern "C" fn()>(
                        address as usize,
                    )),
                    buf.address() as *mut c_void,
                    avalues.as_mut_ptr(),
                );
                NativeValue::Bytes(buf.read_bytes(0, *size).map_err(|message| {
                    Error::ForeignCall { message }
                })?)
            }
        }
    };
    Ok(out)
}
