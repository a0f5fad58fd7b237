//! Runtime type objects
//!
//! This module provides the type-emulation core: one [`CType`] per distinct
//! C type, constructed from already-resolved component types by the
//! per-category constructors:
//!
//! - [`primitive`]: integer, character, and floating-point types (+ `void`)
//! - [`pointer`]: `T*`, with `char*` and `const char*` specializations
//! - [`array`]: `T[N]` and `T[]`
//! - [`record`]: structs and unions, including bitfields and opaque types
//! - [`function`]: function-pointer types, calls, and callbacks
//! - [`enumeration`]: integer-backed enums with a symbol table
//! - [`registry`]: the descriptor-keyed cache guaranteeing one type object
//!   per distinct descriptor
//!
//! # Type identity
//!
//! A [`CType`] is a shared immutable object; the registry deduplicates
//! construction, so pointer identity ([`CType::same_type`]) is the "same C
//! type" test used by the casting rules. Two types built from structurally
//! identical descriptors outside the registry are layout-compatible but not
//! identical.
//!
//! # Name templates
//!
//! Every type carries a canonical reference-name template in which `" &"`
//! marks the spot a declarator would occupy: `"int &"`, `"int * &"`,
//! `"int(* &)(int, int)"`, `"char &[5]"`. [`CType::c_name`] collapses the
//! marker; composed types splice their own syntax into the component's
//! template.

pub mod array;
pub mod enumeration;
pub mod errors;
pub mod function;
pub mod pointer;
pub mod primitive;
pub mod record;
pub mod registry;

use std::rc::Rc;

use crate::data::cdata::{CData, Keepalive};
use crate::data::value::Value;
use crate::ffi::{NativeType, NativeValue};
use self::errors::Error;

/// Category-specific payload of a type object
#[derive(Debug)]
pub enum TypeKind {
    Void,
    Primitive(primitive::Primitive),
    Pointer(pointer::Pointer),
    Array(array::Array),
    Record(record::Record),
    Function(function::Function),
    Enum(enumeration::Enum),
}

#[derive(Debug)]
struct TypeInner {
    kind: TypeKind,
    reftypename: String,
    size: usize,
    align: usize,
    automatic_cast: bool,
}

/// A runtime-constructed C type object
#[derive(Debug, Clone)]
pub struct CType {
    inner: Rc<TypeInner>,
}

/// A call argument marshalled through its declared type, together with any
/// temporary the marshalled pointer depends on (kept alive for the call).
#[derive(Debug)]
pub struct MarshalledArg {
    pub native: NativeValue,
    pub keepalive: Option<Keepalive>,
}

impl MarshalledArg {
    pub(crate) fn plain(native: NativeValue) -> Self {
        MarshalledArg {
            native,
            keepalive: None,
        }
    }
}

impl CType {
    pub(crate) fn build(
        kind: TypeKind,
        reftypename: String,
        size: usize,
        align: usize,
        automatic_cast: bool,
    ) -> Self {
        CType {
            inner: Rc::new(TypeInner {
                kind,
                reftypename,
                size,
                align,
                automatic_cast,
            }),
        }
    }

    pub fn kind(&self) -> &TypeKind {
        &self.inner.kind
    }

    /// Size of one value of this type, in bytes
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Alignment requirement, in bytes
    pub fn align(&self) -> usize {
        self.inner.align
    }

    /// True exactly for `void*`- and `char*`-pointee pointer types, which
    /// convert to and from any other pointer type without an explicit cast.
    pub fn automatic_cast(&self) -> bool {
        self.inner.automatic_cast
    }

    /// The canonical C name, e.g. `"unsigned int"` or `"int(*)(int, int)"`
    pub fn c_name(&self) -> String {
        self.c_name_with("")
    }

    /// The name template with the declarator marker replaced by `insert`
    /// (used when composing pointer/array/function names).
    pub fn c_name_with(&self, insert: &str) -> String {
        self.inner.reftypename.replace(" &", insert)
    }

    pub(crate) fn reftypename(&self) -> &str {
        &self.inner.reftypename
    }

    /// Identity comparison: true when both handles refer to the same
    /// constructed type object.
    pub fn same_type(&self, other: &CType) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable identity token for hashing handles by type
    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    /// Create a new handle instance of this type, optionally initialized.
    pub fn new_data(&self, init: Option<&Value>) -> Result<CData, Error> {
        match &self.inner.kind {
            TypeKind::Void => Err(Error::Unsupported {
                message: format!("'{}' cannot be instantiated", self.c_name()),
            }),
            TypeKind::Primitive(p) => primitive::instantiate(self, p, init),
            TypeKind::Pointer(p) => pointer::instantiate(self, p, init),
            TypeKind::Array(a) => array::instantiate(self, a, init),
            TypeKind::Record(r) => record::instantiate(self, r, init),
            TypeKind::Function(f) => function::instantiate(self, f, init),
            TypeKind::Enum(e) => enumeration::instantiate(self, e, init),
        }
    }

    /// Explicitly cast a host value or handle to this type. Produces a new
    /// handle; the source is never mutated.
    pub fn cast_from(&self, source: &Value) -> Result<CData, Error> {
        match &self.inner.kind {
            TypeKind::Primitive(p) => primitive::cast_from(self, p, source),
            TypeKind::Enum(e) => enumeration::cast_from(self, e, source),
            TypeKind::Pointer(_) | TypeKind::Function(_) => pointer::cast_address(self, source),
            TypeKind::Void | TypeKind::Array(_) | TypeKind::Record(_) => {
                Err(Error::CastUnsupported {
                    ctype: self.c_name(),
                    source: source.kind_name().to_string(),
                })
            }
        }
    }

    /// Byte offset of a named field (structs and unions).
    pub fn offset_of(&self, field: &str) -> Result<usize, Error> {
        match &self.inner.kind {
            TypeKind::Record(r) => record::offset_of(self, r, field),
            _ => Err(Error::Unsupported {
                message: format!("'{}' has no fields", self.c_name()),
            }),
        }
    }

    /// Decode one value of this type from native memory.
    pub(crate) fn read_at(&self, addr: u64) -> Result<Value, Error> {
        match &self.inner.kind {
            TypeKind::Void => Err(Error::Unsupported {
                message: "cannot read a void value".to_string(),
            }),
            TypeKind::Primitive(p) => {
                let native = unsafe { p.native.read(addr) };
                primitive::from_native(self, p, native)
            }
            TypeKind::Enum(e) => {
                let native = unsafe { e.native.read(addr) };
                enumeration::from_native(e, native)
            }
            TypeKind::Pointer(_) => {
                let native = unsafe { crate::ffi::NativeKind::Pointer.read(addr) };
                self.from_native(native)
            }
            TypeKind::Function(_) => {
                let native = unsafe { crate::ffi::NativeKind::Pointer.read(addr) };
                self.from_native(native)
            }
            TypeKind::Array(a) => {
                if a.length.is_none() {
                    return Err(Error::Unsupported {
                        message: format!("cannot view unbounded '{}' in place", self.c_name()),
                    });
                }
                Ok(Value::Data(CData::borrowed(self.clone(), addr, self.size())))
            }
            TypeKind::Record(_) => {
                Ok(Value::Data(CData::borrowed(self.clone(), addr, self.size())))
            }
        }
    }

    /// Validate a host value against this type and encode it into native
    /// memory. Nothing is written when validation fails.
    pub(crate) fn write_at(&self, addr: u64, value: &Value) -> Result<(), Error> {
        match &self.inner.kind {
            TypeKind::Void => Err(Error::Unsupported {
                message: "cannot write a void value".to_string(),
            }),
            TypeKind::Primitive(p) => {
                let native = primitive::to_native(self, p, value)?;
                unsafe { p.native.write(addr, &native) };
                Ok(())
            }
            TypeKind::Enum(e) => {
                let native = enumeration::to_native(self, e, value)?;
                unsafe { e.native.write(addr, &native) };
                Ok(())
            }
            TypeKind::Pointer(_) | TypeKind::Function(_) => {
                let address = pointer::address_for_store(self, value)?;
                unsafe {
                    crate::ffi::NativeKind::Pointer.write(addr, &NativeValue::Pointer(address))
                };
                Ok(())
            }
            TypeKind::Array(_) | TypeKind::Record(_) => {
                // Aggregates are stored by fixed-size copy from a handle of
                // the identical type.
                match value {
                    Value::Data(data) if data.btype().same_type(self) => {
                        let src = data.aggregate_address()?;
                        unsafe { crate::ffi::memory::copy(addr, src, self.size()) };
                        Ok(())
                    }
                    other => Err(Error::TypeMismatch {
                        expected: format!("'{}'", self.c_name()),
                        got: other.kind_name().to_string(),
                    }),
                }
            }
        }
    }

    /// The call-level type description used by the foreign-call primitive.
    pub(crate) fn native_type(&self) -> Result<NativeType, Error> {
        match &self.inner.kind {
            TypeKind::Void => Ok(NativeType::Void),
            TypeKind::Primitive(p) => Ok(NativeType::Scalar(p.native)),
            TypeKind::Enum(e) => Ok(NativeType::Scalar(e.native)),
            TypeKind::Pointer(_) | TypeKind::Function(_) => {
                Ok(NativeType::Scalar(crate::ffi::NativeKind::Pointer))
            }
            TypeKind::Record(r) => record::native_type(self, r),
            TypeKind::Array(_) => Err(Error::Unsupported {
                message: format!("'{}' cannot travel by value", self.c_name()),
            }),
        }
    }

    /// Marshal a call argument through this declared parameter type.
    pub(crate) fn arg_to_native(&self, value: &Value) -> Result<MarshalledArg, Error> {
        match &self.inner.kind {
            TypeKind::Primitive(p) => {
                Ok(MarshalledArg::plain(primitive::to_native(self, p, value)?))
            }
            TypeKind::Enum(e) => {
                Ok(MarshalledArg::plain(enumeration::to_native(self, e, value)?))
            }
            TypeKind::Pointer(p) => pointer::arg_to_native(self, p, value),
            TypeKind::Function(_) => {
                let address = pointer::address_for_store(self, value)?;
                Ok(MarshalledArg::plain(NativeValue::Pointer(address)))
            }
            TypeKind::Record(_) => match value {
                Value::Data(data) if data.btype().same_type(self) => {
                    let src = data.aggregate_address()?;
                    let bytes = unsafe { crate::ffi::memory::read_bytes(src, self.size()) };
                    Ok(MarshalledArg::plain(NativeValue::Bytes(bytes)))
                }
                other => Err(Error::TypeMismatch {
                    expected: format!("'{}'", self.c_name()),
                    got: other.kind_name().to_string(),
                }),
            },
            TypeKind::Void | TypeKind::Array(_) => Err(Error::Unsupported {
                message: format!("'{}' is not a valid parameter type", self.c_name()),
            }),
        }
    }

    /// Convert a marshalled call result back into a host value.
    pub(crate) fn from_native(&self, native: NativeValue) -> Result<Value, Error> {
        match &self.inner.kind {
            TypeKind::Void => Ok(Value::Null),
            TypeKind::Primitive(p) => primitive::from_native(self, p, native),
            TypeKind::Enum(e) => enumeration::from_native(e, native),
            TypeKind::Pointer(_) => match native {
                NativeValue::Pointer(0) => Ok(Value::Null),
                NativeValue::Pointer(addr) => {
                    Ok(Value::Data(CData::pointer_at(self.clone(), addr, None)))
                }
                other => Err(Error::ForeignCall {
                    message: format!("pointer result expected, got {:?}", other),
                }),
            },
            TypeKind::Function(_) => match native {
                NativeValue::Pointer(0) => Ok(Value::Null),
                NativeValue::Pointer(addr) => {
                    Ok(Value::Data(CData::function_at(self.clone(), addr)))
                }
                other => Err(Error::ForeignCall {
                    message: format!("function pointer result expected, got {:?}", other),
                }),
            },
            TypeKind::Record(_) => match native {
                NativeValue::Bytes(bytes) => {
                    let block = crate::ffi::memory::MemBlock::from_bytes(&bytes, self.align());
                    Ok(Value::Data(CData::owned(self.clone(), Rc::new(block))))
                }
                other => Err(Error::ForeignCall {
                    message: format!("aggregate result expected, got {:?}", other),
                }),
            },
            TypeKind::Array(_) => Err(Error::Unsupported {
                message: format!("'{}' cannot travel by value", self.c_name()),
            }),
        }
    }
}
