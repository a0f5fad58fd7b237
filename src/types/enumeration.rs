//! Enum type constructor
//!
//! An enum is an `int`-backed handle type carrying a bidirectional
//! enumerator table. Construction by name must hit the table; construction
//! by integer is accepted verbatim (C enums are open). Decoding yields the
//! symbolic name for declared values; an undeclared value passes through
//! as the raw integer.

use std::mem::size_of;
use std::os::raw::c_int;

use rustc_hash::FxHashMap;

use super::errors::{Error, OverflowKind};
use super::{CType, TypeKind};
use crate::data::cdata::CData;
use crate::data::value::Value;
use crate::ffi::{NativeKind, NativeValue};

/// Payload of an enum type object
#[derive(Debug)]
pub struct Enum {
    pub tag: String,
    pub native: NativeKind,
    pub signed: bool,
    by_name: FxHashMap<String, i64>,
    by_value: FxHashMap<i64, String>,
}

/// Build `enum tag` from parallel enumerator/value lists. When two
/// enumerators share a value, decoding favours the first declared name.
pub fn new_enum_type(tag: &str, enumerators: &[String], values: &[i64]) -> Result<CType, Error> {
    if enumerators.len() != values.len() {
        return Err(Error::Unsupported {
            message: format!(
                "enum '{}' declares {} names for {} values",
                tag,
                enumerators.len(),
                values.len()
            ),
        });
    }
    let mut by_name = FxHashMap::default();
    let mut by_value: FxHashMap<i64, String> = FxHashMap::default();
    for (name, &value) in enumerators.iter().zip(values.iter()) {
        by_name.insert(name.clone(), value);
        by_value.entry(value).or_insert_with(|| name.clone());
    }
    let native = match size_of::<c_int>() {
        2 => NativeKind::I16,
        8 => NativeKind::I64,
        _ => NativeKind::I32,
    };
    Ok(CType::build(
        TypeKind::Enum(Enum {
            tag: tag.to_string(),
            native,
            signed: true,
            by_name,
            by_value,
        }),
        format!("enum {} &", tag),
        native.size(),
        native.align(),
        false,
    ))
}

fn int_value(ctype: &CType, e: &Enum, value: &Value) -> Result<i128, Error> {
    match value {
        Value::Str(name) => e
            .by_name
            .get(name.as_str())
            .map(|&v| v as i128)
            .ok_or_else(|| Error::UnknownEnumerator {
                name: name.clone(),
                enum_name: ctype.c_name(),
            }),
        Value::Int(v) => Ok(*v),
        Value::Data(d) => d.scalar_int(),
        other => Err(Error::TypeMismatch {
            expected: "enumerator name or integer".to_string(),
            got: other.kind_name().to_string(),
        }),
    }
}

pub(crate) fn to_native(ctype: &CType, e: &Enum, value: &Value) -> Result<NativeValue, Error> {
    let v = int_value(ctype, e, value)?;
    e.native.checked(v).ok_or_else(|| Error::Overflow {
        ctype: ctype.c_name(),
        kind: if !e.signed && v < 0 {
            OverflowKind::Negative
        } else {
            OverflowKind::OutOfBounds
        },
    })
}

pub(crate) fn from_native(e: &Enum, native: NativeValue) -> Result<Value, Error> {
    let raw = native.as_int().ok_or_else(|| Error::ForeignCall {
        message: format!("integer result expected for 'enum {}'", e.tag),
    })?;
    match e.by_value.get(&(raw as i64)) {
        Some(name) => Ok(Value::Str(name.clone())),
        None => Ok(Value::Int(raw)),
    }
}

pub(crate) fn cast_from(ctype: &CType, e: &Enum, source: &Value) -> Result<CData, Error> {
    let v = match source {
        Value::Str(_) => int_value(ctype, e, source)?,
        Value::Int(v) => *v,
        Value::Data(d) => d.cast_to_integer()?,
        other => {
            return Err(Error::CastUnsupported {
                ctype: ctype.c_name(),
                source: other.kind_name().to_string(),
            })
        }
    };
    Ok(CData::from_scalar(ctype.clone(), e.native.wrap(v)))
}

pub(crate) fn instantiate(ctype: &CType, e: &Enum, init: Option<&Value>) -> Result<CData, Error> {
    let native = match init {
        None => e.native.wrap(0),
        Some(value) => to_native(ctype, e, value)?,
    };
    Ok(CData::from_scalar(ctype.clone(), native))
}
