//! Pointer type constructor
//!
//! Builds `T*` handle types, with two specializations sharing the base
//! capability: `char*` gains string conversion, and `const char*`
//! additionally initializes from a host string (retaining a NUL-terminated
//! copy for exactly as long as the handle lives).
//!
//! # Casting rule
//!
//! A pointer converts to the address space of another pointer type only
//! when the two types are identical or one of them is an automatic-cast
//! type (`void*`/`char*`-pointee). Everything else must go through an
//! explicit cast, which works from a raw address and therefore bypasses
//! the check — exactly C's escape hatch.

use super::errors::Error;
use super::{CType, MarshalledArg, TypeKind};
use crate::data::cdata::{CData, CStrBuf, Keepalive};
use crate::data::value::Value;
use crate::ffi::NativeKind;
use crate::ffi::NativeValue;
use std::rc::Rc;

/// Pointer specialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrKind {
    Generic,
    /// `char*`: generic behaviour plus string conversion
    Char,
    /// `const char*`: string-literal initialization, read-only indexing
    ConstChar,
}

/// Payload of a pointer type object
#[derive(Debug)]
pub struct Pointer {
    pub item: CType,
    pub kind: PtrKind,
}

fn is_char_primitive(item: &CType) -> bool {
    matches!(
        item.kind(),
        TypeKind::Primitive(p) if p.kind == super::primitive::PrimKind::Char
    )
}

/// Build `item*`.
///
/// Construction fails if the pointee is a struct/union whose field names
/// collide with a reserved pointer accessor (the names are forwarded as
/// the `p->field` shorthand).
pub fn new_pointer_type(item: &CType) -> Result<CType, Error> {
    let kind = if is_char_primitive(item) {
        PtrKind::Char
    } else {
        PtrKind::Generic
    };
    let automatic = matches!(item.kind(), TypeKind::Void) || kind == PtrKind::Char;
    let reftypename = item.c_name_with(" * &");
    if let TypeKind::Record(r) = item.kind() {
        if let Some(fields) = &r.fields {
            for field in fields {
                if super::record::RESERVED_ACCESSORS.contains(&field.name.as_str()) {
                    return Err(Error::FieldConflict {
                        field: field.name.clone(),
                        ctype: reftypename.replace(" &", ""),
                    });
                }
            }
        }
    }
    Ok(CType::build(
        TypeKind::Pointer(Pointer {
            item: item.clone(),
            kind,
        }),
        reftypename,
        NativeKind::Pointer.size(),
        NativeKind::Pointer.align(),
        automatic,
    ))
}

/// Build `const char*`. `item` must be the `char` primitive type.
pub fn new_constcharp_type(item: &CType) -> Result<CType, Error> {
    if !is_char_primitive(item) {
        return Err(Error::TypeMismatch {
            expected: "the 'char' type".to_string(),
            got: format!("'{}'", item.c_name()),
        });
    }
    Ok(CType::build(
        TypeKind::Pointer(Pointer {
            item: item.clone(),
            kind: PtrKind::ConstChar,
        }),
        "const char * &".to_string(),
        NativeKind::Pointer.size(),
        NativeKind::Pointer.align(),
        true,
    ))
}

/// The address-compat rule shared by stores, call arguments, and pointer
/// construction from another handle.
pub(crate) fn compatible(a: &CType, b: &CType) -> bool {
    a.same_type(b) || a.automatic_cast() || b.automatic_cast()
}

pub(crate) fn instantiate(ctype: &CType, p: &Pointer, init: Option<&Value>) -> Result<CData, Error> {
    match init {
        None | Some(Value::Null) => Ok(CData::pointer_at(ctype.clone(), 0, None)),
        Some(Value::Data(data)) => {
            let address = data.convert_to_address(Some(ctype))?;
            Ok(CData::pointer_at(
                ctype.clone(),
                address,
                data.backing_keepalive(),
            ))
        }
        Some(Value::Str(s)) if p.kind == PtrKind::ConstChar => {
            let buf = Rc::new(CStrBuf::new(s)?);
            let address = buf.address();
            Ok(CData::pointer_at(
                ctype.clone(),
                address,
                Some(Keepalive::CStr(buf)),
            ))
        }
        Some(other) => Err(Error::TypeMismatch {
            expected: format!("'{}'", ctype.c_name()),
            got: other.kind_name().to_string(),
        }),
    }
}

/// Explicit cast to a pointer or function type: works from `Null`, a raw
/// integer address, or any handle convertible to an integer.
pub(crate) fn cast_address(ctype: &CType, source: &Value) -> Result<CData, Error> {
    let (address, keepalive) = match source {
        Value::Null => (0u64, None),
        Value::Int(v) => (*v as u64, None),
        Value::Data(data) => (data.cast_to_integer()? as u64, data.backing_keepalive()),
        other => {
            return Err(Error::CastUnsupported {
                ctype: ctype.c_name(),
                source: other.kind_name().to_string(),
            })
        }
    };
    match ctype.kind() {
        TypeKind::Function(_) => Ok(CData::function_at(ctype.clone(), address)),
        _ => Ok(CData::pointer_at(ctype.clone(), address, keepalive)),
    }
}

/// Resolve a host value to the address stored for `target` (a pointer or
/// function type): `Null` is the null pointer, a handle converts subject
/// to the compat rule.
pub(crate) fn address_for_store(target: &CType, value: &Value) -> Result<u64, Error> {
    match value {
        Value::Null => Ok(0),
        Value::Data(data) => data.convert_to_address(Some(target)),
        other => Err(Error::TypeMismatch {
            expected: format!("'{}'", target.c_name()),
            got: other.kind_name().to_string(),
        }),
    }
}

/// Marshal a pointer-typed call argument. `const char*` additionally
/// accepts a host string; the temporary NUL-terminated copy is kept alive
/// until the call returns.
pub(crate) fn arg_to_native(
    ctype: &CType,
    p: &Pointer,
    value: &Value,
) -> Result<MarshalledArg, Error> {
    if p.kind == PtrKind::ConstChar {
        if let Value::Str(s) = value {
            let buf = Rc::new(CStrBuf::new(s)?);
            return Ok(MarshalledArg {
                native: NativeValue::Pointer(buf.address()),
                keepalive: Some(Keepalive::CStr(buf)),
            });
        }
    }
    let address = address_for_store(ctype, value)?;
    Ok(MarshalledArg::plain(NativeValue::Pointer(address)))
}
