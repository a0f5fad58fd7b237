//! Array type constructor
//!
//! Builds `T[N]` and `T[]` handle types from the already-constructed
//! `T*` type, so that decay (`array + n`, passing an array where a
//! pointer is expected) produces pointers of the one canonical `T*`
//! object rather than a private clone the casting rules would reject.
//!
//! A fixed-length type carries its length; an unbounded type's instances
//! fix theirs at construction, from an explicit element count or from the
//! initializer (plus one implicit NUL slot when the element is `char` and
//! the initializer is a host string).

use std::rc::Rc;

use super::errors::Error;
use super::{CType, TypeKind};
use crate::data::cdata::CData;
use crate::data::value::Value;
use crate::ffi::memory::MemBlock;

/// Payload of an array type object
#[derive(Debug)]
pub struct Array {
    /// Element type
    pub item: CType,
    /// The canonical `item*` type, used for decay
    pub item_ptr: CType,
    /// `Some(n)` for `T[n]`, `None` for `T[]`
    pub length: Option<usize>,
    /// Element is the `char` primitive (enables string semantics)
    pub is_char: bool,
}

/// Build `item[length]` from the resolved `item*` type.
pub fn new_array_type(item_ptr: &CType, length: Option<usize>) -> Result<CType, Error> {
    let pointer = match item_ptr.kind() {
        TypeKind::Pointer(p) => p,
        _ => {
            return Err(Error::TypeMismatch {
                expected: "a pointer type".to_string(),
                got: format!("'{}'", item_ptr.c_name()),
            })
        }
    };
    let item = pointer.item.clone();
    let is_char = matches!(
        item.kind(),
        TypeKind::Primitive(p) if p.kind == super::primitive::PrimKind::Char
    );
    let brackets = match length {
        Some(n) => format!(" &[{}]", n),
        None => " &[]".to_string(),
    };
    let reftypename = item.c_name_with(&brackets);
    let size = length.map(|n| n * item.size()).unwrap_or(0);
    let align = item.align();
    Ok(CType::build(
        TypeKind::Array(Array {
            item,
            item_ptr: item_ptr.clone(),
            length,
            is_char,
        }),
        reftypename,
        size,
        align,
        false,
    ))
}

/// Expand an initializer into element values. A host string initializes
/// element-wise as its bytes.
fn elements(init: &Value) -> Result<Vec<Value>, Error> {
    match init {
        Value::Array(items) => Ok(items.clone()),
        Value::Str(s) => Ok(s.bytes().map(Value::Char).collect()),
        other => Err(Error::TypeMismatch {
            expected: "initializer list".to_string(),
            got: other.kind_name().to_string(),
        }),
    }
}

pub(crate) fn instantiate(ctype: &CType, a: &Array, init: Option<&Value>) -> Result<CData, Error> {
    let item_size = a.item.size();
    let (len, items) = match (a.length, init) {
        (Some(n), None) => (n, Vec::new()),
        (Some(n), Some(value)) => (n, elements(value)?),
        (None, Some(Value::Int(n))) if *n >= 0 => (*n as usize, Vec::new()),
        (None, Some(value)) => {
            let items = elements(value)?;
            let extra_null = a.is_char && matches!(value, Value::Str(_));
            (items.len() + extra_null as usize, items)
        }
        (None, None) => {
            return Err(Error::TypeMismatch {
                expected: "array length or initializer".to_string(),
                got: "nothing".to_string(),
            })
        }
    };
    let block = Rc::new(MemBlock::zeroed(len * item_size, a.item.align()));
    let data = CData::owned(ctype.clone(), block);
    for (i, item) in items.iter().enumerate() {
        // Bounds-checked: an initializer longer than the array is an
        // index error here, never a silent truncation.
        data.set_index(i as i64, item)?;
    }
    Ok(data)
}
