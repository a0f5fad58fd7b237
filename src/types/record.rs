//! Struct and union type constructor
//!
//! Builds aggregate handle types from an ordered field list. Layout follows
//! the standard C rules: each field lands at the next offset aligned to its
//! alignment, the aggregate's alignment is the maximum field alignment, and
//! the total size rounds up to it. Union fields all start at offset zero.
//!
//! Bitfields pack left-to-right into storage units of their declared field
//! type; a field that does not fit the open unit's remaining bits starts a
//! fresh unit. A bitfield write stores the truncated representation, reads
//! it back, and restores the previous contents if the requested value did
//! not survive — the aggregate is unchanged when the overflow error
//! propagates.
//!
//! An omitted field list makes the type opaque: instances are refused, only
//! pointers and arrays of the type may exist (C's incomplete-type rule).
//!
//! Field access goes through a static (name → offset, type, bit spec)
//! table and a single generic accessor pair; nothing is generated per
//! field.

use std::rc::Rc;

use super::errors::Error;
use super::primitive::PrimKind;
use super::{CType, TypeKind};
use crate::data::cdata::CData;
use crate::data::value::Value;
use crate::ffi::memory::MemBlock;
use crate::ffi::{NativeKind, NativeType};

/// Accessor names every aggregate (and pointer-to-aggregate) handle
/// already exposes; a C field of the same name cannot be forwarded.
pub const RESERVED_ACCESSORS: &[&str] = &[
    "add", "address", "btype", "c_str", "call", "cast_to_integer", "diff", "field", "index",
    "len", "offset_of", "set_field", "set_index", "sub", "value",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Struct,
    Union,
}

/// Bit placement of a bitfield within its storage unit
#[derive(Debug, Clone, Copy)]
pub struct Bitfield {
    pub bit_offset: u32,
    pub bit_width: u32,
}

/// One entry of the static field table
#[derive(Debug)]
pub struct Field {
    pub name: String,
    pub btype: CType,
    pub offset: usize,
    pub bits: Option<Bitfield>,
}

/// Payload of a struct/union type object
#[derive(Debug)]
pub struct Record {
    pub kind: RecordKind,
    pub tag: String,
    /// `None` marks an opaque (incomplete) type
    pub fields: Option<Vec<Field>>,
}

/// Field description handed to the constructors: name, resolved type, and
/// an optional bit width.
pub type FieldDef = (String, CType, Option<u32>);

/// Build `struct tag { ... }`; `fields: None` builds the opaque type.
pub fn new_struct_type(tag: &str, fields: Option<&[FieldDef]>) -> Result<CType, Error> {
    build(RecordKind::Struct, tag, fields)
}

/// Build `union tag { ... }`; `fields: None` builds the opaque type.
pub fn new_union_type(tag: &str, fields: Option<&[FieldDef]>) -> Result<CType, Error> {
    build(RecordKind::Union, tag, fields)
}

fn round_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

struct OpenUnit {
    offset: usize,
    size: usize,
    bits_used: u32,
}

fn build(kind: RecordKind, tag: &str, fields: Option<&[FieldDef]>) -> Result<CType, Error> {
    let kind_str = match kind {
        RecordKind::Struct => "struct",
        RecordKind::Union => "union",
    };
    let reftypename = format!("{} {} &", kind_str, tag);
    let c_name = format!("{} {}", kind_str, tag);

    let Some(defs) = fields else {
        let record = Record {
            kind,
            tag: tag.to_string(),
            fields: None,
        };
        return Ok(CType::build(TypeKind::Record(record), reftypename, 0, 1, false));
    };

    let mut table: Vec<Field> = Vec::with_capacity(defs.len());
    let mut size = 0usize;
    let mut align = 1usize;
    let mut offset = 0usize;
    let mut unit: Option<OpenUnit> = None;

    for (name, btype, bit_width) in defs {
        if RESERVED_ACCESSORS.contains(&name.as_str())
            || table.iter().any(|f| &f.name == name)
        {
            return Err(Error::FieldConflict {
                field: name.clone(),
                ctype: c_name.clone(),
            });
        }
        if btype.size() == 0 {
            return Err(Error::Unsupported {
                message: format!("field '{}' has incomplete type '{}'", name, btype.c_name()),
            });
        }
        align = align.max(btype.align());

        let (field_offset, bits) = match bit_width {
            None => {
                unit = None;
                match kind {
                    RecordKind::Struct => {
                        let at = round_up(offset, btype.align());
                        offset = at + btype.size();
                        (at, None)
                    }
                    RecordKind::Union => {
                        size = size.max(btype.size());
                        (0, None)
                    }
                }
            }
            Some(width) => {
                if !bitfield_capable(btype) {
                    return Err(Error::Unsupported {
                        message: format!(
                            "bitfield '{}' must have an integer type, not '{}'",
                            name,
                            btype.c_name()
                        ),
                    });
                }
                let unit_size = btype.size();
                let unit_bits = unit_size as u32 * 8;
                if *width == 0 || *width > unit_bits {
                    return Err(Error::Unsupported {
                        message: format!(
                            "bitfield '{}' declares {} bits in a {}-bit unit",
                            name, width, unit_bits
                        ),
                    });
                }
                match kind {
                    RecordKind::Union => {
                        size = size.max(unit_size);
                        (
                            0,
                            Some(Bitfield {
                                bit_offset: 0,
                                bit_width: *width,
                            }),
                        )
                    }
                    RecordKind::Struct => {
                        let reuse = matches!(
                            &unit,
                            Some(u) if u.size == unit_size && u.bits_used + width <= unit_bits
                        );
                        if !reuse {
                            let at = round_up(offset, btype.align());
                            offset = at + unit_size;
                            unit = Some(OpenUnit {
                                offset: at,
                                size: unit_size,
                                bits_used: 0,
                            });
                        }
                        let u = unit.as_mut().unwrap();
                        let placed = Bitfield {
                            bit_offset: u.bits_used,
                            bit_width: *width,
                        };
                        u.bits_used += width;
                        (u.offset, Some(placed))
                    }
                }
            }
        };
        table.push(Field {
            name: name.clone(),
            btype: btype.clone(),
            offset: field_offset,
            bits,
        });
    }

    if kind == RecordKind::Struct {
        size = offset;
    }
    size = round_up(size, align);

    let record = Record {
        kind,
        tag: tag.to_string(),
        fields: Some(table),
    };
    Ok(CType::build(
        TypeKind::Record(record),
        reftypename,
        size,
        align,
        false,
    ))
}

fn bitfield_capable(btype: &CType) -> bool {
    match btype.kind() {
        TypeKind::Primitive(p) => p.kind == PrimKind::Int,
        TypeKind::Enum(_) => true,
        _ => false,
    }
}

pub(crate) fn offset_of(ctype: &CType, r: &Record, name: &str) -> Result<usize, Error> {
    lookup(ctype, r, name).map(|f| f.offset)
}

pub(crate) fn lookup<'a>(ctype: &CType, r: &'a Record, name: &str) -> Result<&'a Field, Error> {
    r.fields
        .as_deref()
        .and_then(|fields| fields.iter().find(|f| f.name == name))
        .ok_or_else(|| Error::Unsupported {
            message: format!("'{}' has no field '{}'", ctype.c_name(), name),
        })
}

pub(crate) fn instantiate(ctype: &CType, r: &Record, init: Option<&Value>) -> Result<CData, Error> {
    let Some(fields) = &r.fields else {
        return Err(Error::OpaqueInstantiation {
            ctype: ctype.c_name(),
        });
    };
    let block = Rc::new(MemBlock::zeroed(ctype.size(), ctype.align()));
    let data = CData::owned(ctype.clone(), block);
    match (init, r.kind) {
        (None, _) => {}
        (Some(value), RecordKind::Union) => {
            // A union initializer sets exactly the first field.
            if let Some(first) = fields.first() {
                data.set_field(&first.name, value)?;
            }
        }
        (Some(Value::Array(items)), RecordKind::Struct) => {
            if items.len() > fields.len() {
                return Err(Error::TooManyInitializers {
                    ctype: ctype.c_name(),
                    fields: fields.len(),
                });
            }
            for (item, field) in items.iter().zip(fields.iter()) {
                data.set_field(&field.name, item)?;
            }
        }
        (Some(other), RecordKind::Struct) => {
            return Err(Error::TypeMismatch {
                expected: "initializer list".to_string(),
                got: other.kind_name().to_string(),
            })
        }
    }
    Ok(data)
}

/// Decode one field from an aggregate at `base`.
pub(crate) fn read_field(base: u64, field: &Field) -> Result<Value, Error> {
    match &field.bits {
        None => field.btype.read_at(base + field.offset as u64),
        Some(bits) => {
            let (kind, signed) = storage_unit(&field.btype);
            let raw = unsafe { read_unit(kind, base + field.offset as u64) };
            Ok(Value::Int(extract_bits(raw, bits, signed)))
        }
    }
}

/// Encode one field into an aggregate at `base`. Bitfield writes are
/// verified by read-back and rolled back on overflow.
pub(crate) fn write_field(base: u64, field: &Field, value: &Value) -> Result<(), Error> {
    match &field.bits {
        None => field.btype.write_at(base + field.offset as u64, value),
        Some(bits) => {
            let (kind, signed) = storage_unit(&field.btype);
            // Conversion through the declared type first: wrong host kinds
            // and values outside the declared type fail before any write.
            let native = match field.btype.kind() {
                TypeKind::Enum(e) => super::enumeration::to_native(&field.btype, e, value)?,
                TypeKind::Primitive(p) => super::primitive::to_native(&field.btype, p, value)?,
                _ => unreachable!("bitfield storage is always integral"),
            };
            let requested = native.as_int().unwrap_or(0);

            let addr = base + field.offset as u64;
            let old = unsafe { read_unit(kind, addr) };
            let mask = bit_mask(bits.bit_width);
            let stored = (requested as u128) & mask;
            let new = (old & !(mask << bits.bit_offset)) | (stored << bits.bit_offset);
            unsafe { write_unit(kind, addr, new) };

            if extract_bits(new, bits, signed) != requested {
                unsafe { write_unit(kind, addr, old) };
                return Err(Error::BitfieldOverflow {
                    field: field.name.clone(),
                    width: bits.bit_width,
                });
            }
            Ok(())
        }
    }
}

fn storage_unit(btype: &CType) -> (NativeKind, bool) {
    match btype.kind() {
        TypeKind::Primitive(p) => (p.native, p.signed),
        TypeKind::Enum(e) => (e.native, e.signed),
        _ => unreachable!("bitfield storage is always integral"),
    }
}

fn bit_mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

/// Raw (unsigned) bits of a storage unit
unsafe fn read_unit(kind: NativeKind, addr: u64) -> u128 {
    let v = kind.read(addr).as_int().unwrap_or(0);
    let unit_bits = kind.size() as u32 * 8;
    (v as u128) & bit_mask(unit_bits)
}

unsafe fn write_unit(kind: NativeKind, addr: u64, raw: u128) {
    let unit_bits = kind.size() as u32 * 8;
    let masked = raw & bit_mask(unit_bits);
    // Reinterpret the raw bits through the unit's signed/unsigned kind.
    let value = if matches!(
        kind,
        NativeKind::I8 | NativeKind::I16 | NativeKind::I32 | NativeKind::I64
    ) && unit_bits < 128
        && masked >> (unit_bits - 1) & 1 == 1
    {
        (masked | !bit_mask(unit_bits)) as i128
    } else {
        masked as i128
    };
    kind.write(addr, &kind.wrap(value));
}

fn extract_bits(raw: u128, bits: &Bitfield, signed: bool) -> i128 {
    let x = (raw >> bits.bit_offset) & bit_mask(bits.bit_width);
    if signed && bits.bit_width < 128 && (x >> (bits.bit_width - 1)) & 1 == 1 {
        (x | !bit_mask(bits.bit_width)) as i128
    } else {
        x as i128
    }
}

/// Call-level description for aggregates passed or returned by value.
pub(crate) fn native_type(ctype: &CType, r: &Record) -> Result<NativeType, Error> {
    let Some(fields) = &r.fields else {
        return Err(Error::OpaqueInstantiation {
            ctype: ctype.c_name(),
        });
    };
    match r.kind {
        RecordKind::Struct => {
            if fields.iter().any(|f| f.bits.is_some()) {
                return Err(Error::Unsupported {
                    message: format!("'{}' with bitfields cannot travel by value", ctype.c_name()),
                });
            }
            let mut elements = Vec::new();
            for field in fields {
                flatten_native(&field.btype, &mut elements)?;
            }
            Ok(NativeType::Aggregate {
                size: ctype.size(),
                align: ctype.align(),
                elements,
            })
        }
        // libffi has no union element; describe the padded byte image in
        // alignment-sized chunks.
        RecordKind::Union => {
            let chunk = match ctype.align() {
                1 => NativeKind::U8,
                2 => NativeKind::U16,
                4 => NativeKind::U32,
                _ => NativeKind::U64,
            };
            let mut elements = Vec::new();
            let mut covered = 0usize;
            while covered + chunk.size() <= ctype.size() {
                elements.push(NativeType::Scalar(chunk));
                covered += chunk.size();
            }
            while covered < ctype.size() {
                elements.push(NativeType::Scalar(NativeKind::U8));
                covered += 1;
            }
            Ok(NativeType::Aggregate {
                size: ctype.size(),
                align: ctype.align(),
                elements,
            })
        }
    }
}

/// Expand a field type into call-level elements; fixed arrays repeat their
/// element in place.
fn flatten_native(btype: &CType, out: &mut Vec<NativeType>) -> Result<(), Error> {
    match btype.kind() {
        TypeKind::Array(a) => {
            let n = a.length.ok_or_else(|| Error::Unsupported {
                message: "unbounded array inside an aggregate".to_string(),
            })?;
            for _ in 0..n {
                flatten_native(&a.item, out)?;
            }
            Ok(())
        }
        _ => {
            out.push(btype.native_type()?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::primitive::new_primitive_type;

    fn f(name: &str, btype: &CType, bits: Option<u32>) -> FieldDef {
        (name.to_string(), btype.clone(), bits)
    }

    #[test]
    fn struct_layout_follows_c_rules() {
        let c_char = new_primitive_type("char").unwrap();
        let c_int = new_primitive_type("int").unwrap();
        let s = new_struct_type(
            "mixed",
            Some(&[f("tag", &c_char, None), f("value", &c_int, None)]),
        )
        .unwrap();
        // char at 0, int aligned to 4, total rounded to 8
        assert_eq!(s.offset_of("tag").unwrap(), 0);
        assert_eq!(s.offset_of("value").unwrap(), 4);
        assert_eq!(s.size(), 8);
        assert_eq!(s.align(), 4);
    }

    #[test]
    fn union_fields_share_offset_zero() {
        let c_int = new_primitive_type("int").unwrap();
        let c_double = new_primitive_type("double").unwrap();
        let u = new_union_type(
            "scalar",
            Some(&[f("i", &c_int, None), f("d", &c_double, None)]),
        )
        .unwrap();
        assert_eq!(u.offset_of("i").unwrap(), 0);
        assert_eq!(u.offset_of("d").unwrap(), 0);
        assert_eq!(u.size(), 8);
    }

    #[test]
    fn bitfields_pack_into_shared_units() {
        let c_uint = new_primitive_type("unsigned int").unwrap();
        let s = new_struct_type(
            "flags",
            Some(&[
                f("a", &c_uint, Some(3)),
                f("b", &c_uint, Some(5)),
                f("c", &c_uint, Some(30)),
            ]),
        )
        .unwrap();
        // a and b share the first unit; c needs a fresh one
        assert_eq!(s.offset_of("a").unwrap(), 0);
        assert_eq!(s.offset_of("b").unwrap(), 0);
        assert_eq!(s.offset_of("c").unwrap(), 4);
        assert_eq!(s.size(), 8);
    }

    #[test]
    fn reserved_and_duplicate_field_names_are_rejected() {
        let c_int = new_primitive_type("int").unwrap();
        let clash = new_struct_type("bad", Some(&[f("address", &c_int, None)]));
        assert!(matches!(clash, Err(Error::FieldConflict { .. })));
        let dup = new_struct_type(
            "dup",
            Some(&[f("x", &c_int, None), f("x", &c_int, None)]),
        );
        assert!(matches!(dup, Err(Error::FieldConflict { .. })));
    }

    #[test]
    fn opaque_records_have_no_offsets() {
        let s = new_struct_type("hidden", None).unwrap();
        assert!(s.offset_of("anything").is_err());
        assert_eq!(s.size(), 0);
    }
}
