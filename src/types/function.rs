//! Function type constructor
//!
//! Builds handle types of the shape `Result (*)(Args..., ...)`. A function
//! handle is a native code address: obtained from a library symbol, aliased
//! from another handle, or manufactured from a host callable (in which case
//! the callable is pinned for the handle's lifetime and the handle presents
//! itself as "a callback to <name>").
//!
//! Calls marshal each declared argument through its declared type. Trailing
//! variadic arguments must already be typed handles — a bare host scalar
//! has no unambiguous native representation — and are default-promoted
//! (`float` → `double`, sub-`int` integers widen) before the foreign call.

use std::os::raw::c_void;
use std::rc::Rc;

use log::error;

use super::errors::Error;
use super::{CType, TypeKind};
use crate::data::cdata::CData;
use crate::data::value::{HostCallable, Value};
use crate::ffi::call::{self, CallArg};
use crate::ffi::closure::CallbackHandle;
use crate::ffi::{NativeKind, NativeType, NativeValue};

/// Payload of a function type object
#[derive(Debug)]
pub struct Function {
    pub args: Vec<CType>,
    pub result: CType,
    pub variadic: bool,
}

/// Build `result (*)(args...)`.
pub fn new_function_type(args: &[CType], result: &CType, variadic: bool) -> Result<CType, Error> {
    let mut nameargs: Vec<String> = args.iter().map(CType::c_name).collect();
    if variadic {
        nameargs.push("...".to_string());
    }
    let reftypename = result.c_name_with(&format!("(* &)({})", nameargs.join(", ")));
    Ok(CType::build(
        TypeKind::Function(Function {
            args: args.to_vec(),
            result: result.clone(),
            variadic,
        }),
        reftypename,
        NativeKind::Pointer.size(),
        NativeKind::Pointer.align(),
        false,
    ))
}

pub(crate) fn instantiate(
    ctype: &CType,
    f: &Function,
    init: Option<&Value>,
) -> Result<CData, Error> {
    match init {
        None | Some(Value::Null) => Ok(CData::function_at(ctype.clone(), 0)),
        Some(Value::Data(data)) if data.btype().same_type(ctype) => Ok(data.clone()),
        Some(Value::Callable(host)) => new_callback(ctype, f, host),
        Some(other) => Err(Error::TypeMismatch {
            expected: "a callable object".to_string(),
            got: other.kind_name().to_string(),
        }),
    }
}

/// Wrap a host callable as a native callback of this signature.
fn new_callback(ctype: &CType, f: &Function, host: &HostCallable) -> Result<CData, Error> {
    let arg_types: Vec<NativeType> = f
        .args
        .iter()
        .map(CType::native_type)
        .collect::<Result<_, _>>()?;
    let ret_type = f.result.native_type()?;

    let decl_args = f.args.clone();
    let decl_ret = f.result.clone();
    let host_fn = host.clone();
    let handler = Box::new(move |raw_args: *const *const c_void, slot: *mut c_void| {
        match relay(&decl_args, &decl_ret, &host_fn, raw_args, slot) {
            Ok(()) => {}
            Err(e) => error!("callback '{}' failed: {}", host_fn.name(), e),
        }
    });

    let handle = Rc::new(CallbackHandle::new(&arg_types, &ret_type, handler)?);
    Ok(CData::function_callback(
        ctype.clone(),
        handle,
        host.name().to_string(),
    ))
}

/// Decode the native arguments, run the host callable, encode its result
/// into the trampoline's slot.
fn relay(
    decl_args: &[CType],
    decl_ret: &CType,
    host: &HostCallable,
    raw_args: *const *const c_void,
    slot: *mut c_void,
) -> Result<(), Error> {
    let mut values = Vec::with_capacity(decl_args.len());
    for (i, btype) in decl_args.iter().enumerate() {
        let src = unsafe { *raw_args.add(i) } as u64;
        let native = match btype.native_type()? {
            NativeType::Scalar(kind) => unsafe { kind.read(src) },
            NativeType::Aggregate { size, .. } => {
                NativeValue::Bytes(unsafe { crate::ffi::memory::read_bytes(src, size) })
            }
            NativeType::Void => {
                return Err(Error::Unsupported {
                    message: "void argument in callback".to_string(),
                })
            }
        };
        values.push(btype.from_native(native)?);
    }

    let result = host.invoke(&values)?;
    write_result(decl_ret, &result, slot)
}

/// Encode a callback result into the libffi return slot. Integral results
/// are widened to a full register word, as the closure ABI requires.
fn write_result(decl_ret: &CType, result: &Value, slot: *mut c_void) -> Result<(), Error> {
    match decl_ret.native_type()? {
        NativeType::Void => Ok(()),
        NativeType::Scalar(kind) => {
            let native = match decl_ret.kind() {
                TypeKind::Primitive(p) => super::primitive::to_native(decl_ret, p, result)?,
                TypeKind::Enum(e) => super::enumeration::to_native(decl_ret, e, result)?,
                TypeKind::Pointer(_) | TypeKind::Function(_) => {
                    NativeValue::Pointer(super::pointer::address_for_store(decl_ret, result)?)
                }
                _ => {
                    return Err(Error::Unsupported {
                        message: format!("'{}' callback result", decl_ret.c_name()),
                    })
                }
            };
            unsafe {
                match native {
                    NativeValue::F32(x) => (slot as *mut f32).write(x),
                    NativeValue::F64(x) => (slot as *mut f64).write(x),
                    NativeValue::Pointer(x) => (slot as *mut usize).write(x as usize),
                    other => {
                        let wide = other.as_int().unwrap_or(0);
                        let signed_kinds = matches!(
                            kind,
                            NativeKind::I8 | NativeKind::I16 | NativeKind::I32 | NativeKind::I64
                        );
                        let word = if signed_kinds {
                            wide as i64 as u64
                        } else {
                            wide as u64
                        };
                        (slot as *mut u64).write(word);
                    }
                }
            }
            Ok(())
        }
        NativeType::Aggregate { size, .. } => match result {
            Value::Data(data) if data.btype().same_type(decl_ret) => {
                let src = data.aggregate_address()?;
                unsafe { crate::ffi::memory::copy(slot as u64, src, size) };
                Ok(())
            }
            other => Err(Error::TypeMismatch {
                expected: format!("'{}'", decl_ret.c_name()),
                got: other.kind_name().to_string(),
            }),
        },
    }
}

/// Default promotion for a variadic trailing argument.
fn promote(arg: CallArg) -> CallArg {
    let promoted = match (&arg.ty, &arg.value) {
        (NativeType::Scalar(NativeKind::F32), NativeValue::F32(x)) => Some(CallArg {
            ty: NativeType::Scalar(NativeKind::F64),
            value: NativeValue::F64(*x as f64),
        }),
        (NativeType::Scalar(NativeKind::I8), NativeValue::I8(x)) => Some(CallArg {
            ty: NativeType::Scalar(NativeKind::I32),
            value: NativeValue::I32(*x as i32),
        }),
        (NativeType::Scalar(NativeKind::I16), NativeValue::I16(x)) => Some(CallArg {
            ty: NativeType::Scalar(NativeKind::I32),
            value: NativeValue::I32(*x as i32),
        }),
        (NativeType::Scalar(NativeKind::U8), NativeValue::U8(x)) => Some(CallArg {
            ty: NativeType::Scalar(NativeKind::U32),
            value: NativeValue::U32(*x as u32),
        }),
        (NativeType::Scalar(NativeKind::U16), NativeValue::U16(x)) => Some(CallArg {
            ty: NativeType::Scalar(NativeKind::U32),
            value: NativeValue::U32(*x as u32),
        }),
        _ => None,
    };
    promoted.unwrap_or(arg)
}

/// Invoke a function handle.
pub(crate) fn invoke(fun: &CData, args: &[Value]) -> Result<Value, Error> {
    let f = match fun.btype().kind() {
        TypeKind::Function(f) => f,
        _ => {
            return Err(Error::Unsupported {
                message: format!("'{}' is not callable", fun.btype().c_name()),
            })
        }
    };
    let declared = f.args.len();
    if f.variadic {
        if args.len() < declared {
            return Err(Error::ArgumentCount {
                ctype: fun.btype().c_name(),
                expected: declared,
                got: args.len(),
            });
        }
    } else if args.len() != declared {
        return Err(Error::ArgumentCount {
            ctype: fun.btype().c_name(),
            expected: declared,
            got: args.len(),
        });
    }

    let mut call_args = Vec::with_capacity(args.len());
    // Temporaries backing marshalled pointers stay alive until the call
    // returns.
    let mut keepalives = Vec::new();
    for (btype, value) in f.args.iter().zip(args.iter()) {
        let marshalled = btype.arg_to_native(value)?;
        call_args.push(CallArg {
            ty: btype.native_type()?,
            value: marshalled.native,
        });
        if let Some(keep) = marshalled.keepalive {
            keepalives.push(keep);
        }
    }
    for (i, value) in args[declared..].iter().enumerate() {
        let data = match value {
            Value::Data(d) => d,
            other => {
                return Err(Error::TypeMismatch {
                    expected: format!("cdata for variadic argument {}", declared + i + 1),
                    got: other.kind_name().to_string(),
                })
            }
        };
        let marshalled = data.btype().arg_to_native(value)?;
        call_args.push(promote(CallArg {
            ty: data.btype().native_type()?,
            value: marshalled.native,
        }));
        if let Some(keep) = marshalled.keepalive {
            keepalives.push(keep);
        }
    }

    let address = fun.function_address()?;
    let ret_type = f.result.native_type()?;
    let native = if f.variadic {
        call::call_variadic(address, &call_args, declared, &ret_type)?
    } else {
        call::call(address, &call_args, &ret_type)?
    };
    drop(keepalives);
    f.result.from_native(native)
}
