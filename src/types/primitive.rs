//! Primitive type constructor
//!
//! Builds handle types for C's integer, character, and floating-point
//! types, plus the non-instantiable `void`. Widths come from the host C
//! ABI (`long` is 8 bytes on LP64, 4 on LLP64), and signedness is derived
//! once per type by round-tripping `-1` through the native width.
//!
//! Conversion contract:
//! - construction range-checks integers and names the failing type and
//!   direction ("negative integer" vs "integer out of bounds")
//! - explicit casts truncate silently into the native width, matching a C
//!   cast
//! - `char` converts to and from a single character, never an integer

use std::mem::size_of;
use std::os::raw::{c_char, c_int, c_long, c_longlong, c_short};

use rustc_hash::FxHashMap;

use super::errors::{Error, OverflowKind};
use super::{CType, TypeKind};
use crate::data::cdata::CData;
use crate::data::value::Value;
use crate::ffi::{NativeKind, NativeValue};

/// Conversion family of a primitive type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimKind {
    Int,
    Char,
    Float,
}

/// Payload of a primitive type object
#[derive(Debug)]
pub struct Primitive {
    pub name: String,
    pub kind: PrimKind,
    pub native: NativeKind,
    pub signed: bool,
}

fn int_kind(size: usize, signed: bool) -> NativeKind {
    match (size, signed) {
        (1, true) => NativeKind::I8,
        (1, false) => NativeKind::U8,
        (2, true) => NativeKind::I16,
        (2, false) => NativeKind::U16,
        (4, true) => NativeKind::I32,
        (4, false) => NativeKind::U32,
        (_, true) => NativeKind::I64,
        (_, false) => NativeKind::U64,
    }
}

fn resolve(name: &str) -> Option<(NativeKind, PrimKind)> {
    let kind = match name {
        "char" => {
            let native = if c_char::MIN == 0 {
                NativeKind::U8
            } else {
                NativeKind::I8
            };
            return Some((native, PrimKind::Char));
        }
        "signed char" => int_kind(1, true),
        "unsigned char" => int_kind(1, false),
        "short" => int_kind(size_of::<c_short>(), true),
        "unsigned short" => int_kind(size_of::<c_short>(), false),
        "int" => int_kind(size_of::<c_int>(), true),
        "unsigned int" => int_kind(size_of::<c_int>(), false),
        "long" => int_kind(size_of::<c_long>(), true),
        "unsigned long" => int_kind(size_of::<c_long>(), false),
        "long long" => int_kind(size_of::<c_longlong>(), true),
        "unsigned long long" => int_kind(size_of::<c_longlong>(), false),
        "float" => return Some((NativeKind::F32, PrimKind::Float)),
        "double" => return Some((NativeKind::F64, PrimKind::Float)),
        _ => return None,
    };
    Some((kind, PrimKind::Int))
}

/// Build the handle type for a named C primitive.
pub fn new_primitive_type(name: &str) -> Result<CType, Error> {
    let (native, kind) = resolve(name).ok_or_else(|| Error::Unsupported {
        message: format!("unknown primitive type '{}'", name),
    })?;
    // -1 round-trips as negative exactly for the signed representations.
    let signed = native.wrap(-1).as_int().map(|v| v < 0).unwrap_or(false);
    Ok(CType::build(
        TypeKind::Primitive(Primitive {
            name: name.to_string(),
            kind,
            native,
            signed,
        }),
        format!("{} &", name),
        native.size(),
        native.align(),
        false,
    ))
}

/// Build the `void` type. It sizes to zero and cannot be instantiated;
/// only pointers to it and function results of it exist.
pub fn new_void_type() -> CType {
    CType::build(TypeKind::Void, "void &".to_string(), 0, 1, false)
}

/// Names for the fixed-width and pointer-sized integer aliases on this
/// host, keyed by the alias (`"int32_t"` → `"signed int"`), for the
/// declaration-resolving layer to substitute before requesting types.
pub fn nonstandard_integer_types() -> FxHashMap<String, String> {
    let mut result = FxHashMap::default();
    let sizes = [
        ("long long", size_of::<c_longlong>()),
        ("long", size_of::<c_long>()),
        ("int", size_of::<c_int>()),
        ("short", size_of::<c_short>()),
        ("char", 1usize),
    ];
    for (name, size) in sizes {
        result.insert(format!("int{}_t", 8 * size), format!("signed {}", name));
        result.insert(format!("uint{}_t", 8 * size), format!("unsigned {}", name));
        if size == size_of::<*const u8>() {
            result.insert("intptr_t".to_string(), format!("signed {}", name));
            result.insert("uintptr_t".to_string(), format!("unsigned {}", name));
            result.insert("ptrdiff_t".to_string(), format!("signed {}", name));
        }
        if size == size_of::<usize>() {
            result.insert("size_t".to_string(), format!("unsigned {}", name));
            result.insert("ssize_t".to_string(), format!("signed {}", name));
        }
    }
    result
}

/// Convert and range-check a host value for storage as this primitive.
pub(crate) fn to_native(ctype: &CType, p: &Primitive, value: &Value) -> Result<NativeValue, Error> {
    match p.kind {
        PrimKind::Int => {
            let v = match value {
                Value::Int(v) => *v,
                Value::Data(d) => d.scalar_int()?,
                other => {
                    return Err(Error::TypeMismatch {
                        expected: "integer".to_string(),
                        got: other.kind_name().to_string(),
                    })
                }
            };
            p.native.checked(v).ok_or_else(|| Error::Overflow {
                ctype: ctype.c_name(),
                kind: if !p.signed && v < 0 {
                    OverflowKind::Negative
                } else {
                    OverflowKind::OutOfBounds
                },
            })
        }
        PrimKind::Char => {
            let byte = char_byte(value)?;
            Ok(p.native.wrap(byte as i128))
        }
        PrimKind::Float => {
            let v = match value {
                Value::Float(x) => *x,
                Value::Int(v) => *v as f64,
                Value::Data(d) => d.cast_to_float()?,
                other => {
                    return Err(Error::TypeMismatch {
                        expected: "float".to_string(),
                        got: other.kind_name().to_string(),
                    })
                }
            };
            Ok(match p.native {
                NativeKind::F32 => NativeValue::F32(v as f32),
                _ => NativeValue::F64(v),
            })
        }
    }
}

/// Decode a marshalled native value back into the host representation.
pub(crate) fn from_native(ctype: &CType, p: &Primitive, native: NativeValue) -> Result<Value, Error> {
    match p.kind {
        PrimKind::Int => native.as_int().map(Value::Int).ok_or_else(|| Error::ForeignCall {
            message: format!("integer result expected for '{}'", ctype.c_name()),
        }),
        PrimKind::Char => match native {
            NativeValue::I8(b) => Ok(Value::Char(b as u8)),
            NativeValue::U8(b) => Ok(Value::Char(b)),
            other => Err(Error::ForeignCall {
                message: format!("character result expected, got {:?}", other),
            }),
        },
        PrimKind::Float => native.as_float().map(Value::Float).ok_or_else(|| {
            Error::ForeignCall {
                message: format!("float result expected for '{}'", ctype.c_name()),
            }
        }),
    }
}

/// Explicit cast: accepts integers, handles (through their integer
/// conversion), and single characters; truncates into the native width
/// with C wraparound semantics.
pub(crate) fn cast_from(ctype: &CType, p: &Primitive, source: &Value) -> Result<CData, Error> {
    if p.kind == PrimKind::Float {
        if let Some(x) = source.as_float() {
            let native = match p.native {
                NativeKind::F32 => NativeValue::F32(x as f32),
                _ => NativeValue::F64(x),
            };
            return Ok(CData::from_scalar(ctype.clone(), native));
        }
    }
    let v = match source {
        Value::Int(v) => *v,
        Value::Data(d) => d.cast_to_integer()?,
        Value::Char(b) => *b as i128,
        Value::Str(_) => char_byte(source)? as i128,
        other => {
            return Err(Error::CastUnsupported {
                ctype: ctype.c_name(),
                source: other.kind_name().to_string(),
            })
        }
    };
    Ok(CData::from_scalar(ctype.clone(), p.native.wrap(v)))
}

pub(crate) fn instantiate(ctype: &CType, p: &Primitive, init: Option<&Value>) -> Result<CData, Error> {
    let native = match init {
        None => match p.kind {
            PrimKind::Float => match p.native {
                NativeKind::F32 => NativeValue::F32(0.0),
                _ => NativeValue::F64(0.0),
            },
            _ => p.native.wrap(0),
        },
        Some(value) => to_native(ctype, p, value)?,
    };
    Ok(CData::from_scalar(ctype.clone(), native))
}

/// A `char` value: a single character or an equivalent handle.
fn char_byte(value: &Value) -> Result<u8, Error> {
    match value {
        Value::Char(b) => Ok(*b),
        Value::Str(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if (c as u32) < 256 => Ok(c as u32 as u8),
                _ => Err(Error::TypeMismatch {
                    expected: "character".to_string(),
                    got: "string".to_string(),
                }),
            }
        }
        Value::Data(d) => d.char_value(),
        other => Err(Error::TypeMismatch {
            expected: "character".to_string(),
            got: other.kind_name().to_string(),
        }),
    }
}
