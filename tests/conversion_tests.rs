// Conversion and casting semantics for primitive and enum types

use ceffigy::types::errors::{Error, OverflowKind};
use ceffigy::{
    get_errno, new_enum_type, new_primitive_type, nonstandard_integer_types, set_errno, Value,
};

#[test]
fn test_integer_roundtrip_within_range() {
    let cases: &[(&str, i128, i128)] = &[
        ("signed char", i8::MIN as i128, i8::MAX as i128),
        ("unsigned char", 0, u8::MAX as i128),
        ("short", i16::MIN as i128, i16::MAX as i128),
        ("unsigned short", 0, u16::MAX as i128),
        ("int", i32::MIN as i128, i32::MAX as i128),
        ("unsigned int", 0, u32::MAX as i128),
        ("long long", i64::MIN as i128, i64::MAX as i128),
        ("unsigned long long", 0, u64::MAX as i128),
    ];
    for &(name, min, max) in cases {
        let btype = new_primitive_type(name).expect(name);
        for v in [min, 0, 1, max] {
            let data = btype
                .new_data(Some(&Value::Int(v)))
                .unwrap_or_else(|e| panic!("{} from {}: {}", name, v, e));
            assert_eq!(data.value().unwrap(), Value::Int(v), "{} roundtrip", name);
        }
    }
}

#[test]
fn test_out_of_range_integers_overflow() {
    let c_uint = new_primitive_type("unsigned int").unwrap();
    let err = c_uint.new_data(Some(&Value::Int(-1))).unwrap_err();
    match &err {
        Error::Overflow { ctype, kind } => {
            assert_eq!(ctype, "unsigned int");
            assert_eq!(*kind, OverflowKind::Negative);
        }
        other => panic!("expected overflow, got {}", other),
    }
    assert_eq!(err.to_string(), "unsigned int: negative integer");

    let c_short = new_primitive_type("short").unwrap();
    let err = c_short.new_data(Some(&Value::Int(1 << 20))).unwrap_err();
    assert_eq!(err.to_string(), "short: integer out of bounds");
}

#[test]
fn test_wrong_host_kind_fails_before_any_conversion() {
    let c_int = new_primitive_type("int").unwrap();
    assert!(matches!(
        c_int.new_data(Some(&Value::Str("12".to_string()))),
        Err(Error::TypeMismatch { .. })
    ));
    assert!(matches!(
        c_int.new_data(Some(&Value::Float(1.5))),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn test_char_requires_single_character() {
    let c_char = new_primitive_type("char").unwrap();
    let a = c_char.new_data(Some(&Value::Str("A".to_string()))).unwrap();
    assert_eq!(a.value().unwrap(), Value::Char(b'A'));
    assert!(c_char.new_data(Some(&Value::Str("AB".to_string()))).is_err());
    assert!(c_char.new_data(Some(&Value::Int(65))).is_err());
}

#[test]
fn test_float_converts_by_truncation() {
    let c_float = new_primitive_type("float").unwrap();
    let c_double = new_primitive_type("double").unwrap();
    let f = c_float.new_data(Some(&Value::Float(1.5))).unwrap();
    assert_eq!(f.value().unwrap(), Value::Float(1.5));
    let d = c_double.new_data(Some(&Value::Int(3))).unwrap();
    assert_eq!(d.value().unwrap(), Value::Float(3.0));
    // f32 narrowing is the native conversion, not an error
    let narrowed = c_float.new_data(Some(&Value::Float(1e300))).unwrap();
    match narrowed.value().unwrap() {
        Value::Float(x) => assert!(x.is_infinite()),
        other => panic!("float expected, got {:?}", other),
    }
}

#[test]
fn test_equality_is_type_and_value() {
    let c_int = new_primitive_type("int").unwrap();
    let c_long = new_primitive_type("long").unwrap();
    let a = c_int.new_data(Some(&Value::Int(7))).unwrap();
    let b = c_int.new_data(Some(&Value::Int(7))).unwrap();
    let c = c_int.new_data(Some(&Value::Int(8))).unwrap();
    let d = c_long.new_data(Some(&Value::Int(7))).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    // Numerically equal but differently typed handles never compare equal
    assert_ne!(a, d);
}

#[test]
fn test_cast_truncates_with_wraparound() {
    let c_uchar = new_primitive_type("unsigned char").unwrap();
    let wrapped = c_uchar.cast_from(&Value::Int(300)).unwrap();
    assert_eq!(wrapped.value().unwrap(), Value::Int(300 % 256));

    let c_schar = new_primitive_type("signed char").unwrap();
    let negative = c_schar.cast_from(&Value::Int(0xFF)).unwrap();
    assert_eq!(negative.value().unwrap(), Value::Int(-1));
}

#[test]
fn test_cast_reads_through_handles_and_characters() {
    let c_int = new_primitive_type("int").unwrap();
    let c_char = new_primitive_type("char").unwrap();

    let source = c_int.new_data(Some(&Value::Int(66))).unwrap();
    let through = c_int.cast_from(&Value::Data(source.clone())).unwrap();
    assert_eq!(through.value().unwrap(), Value::Int(66));
    // The source is untouched
    assert_eq!(source.value().unwrap(), Value::Int(66));

    let ord = c_int.cast_from(&Value::Str("B".to_string())).unwrap();
    assert_eq!(ord.value().unwrap(), Value::Int(66));

    let ch = c_char.cast_from(&Value::Int(0x41)).unwrap();
    assert_eq!(ch.value().unwrap(), Value::Char(b'A'));
}

#[test]
fn test_cast_rejects_sourceless_types() {
    let c_int = new_primitive_type("int").unwrap();
    assert!(matches!(
        c_int.cast_from(&Value::Null),
        Err(Error::CastUnsupported { .. })
    ));
}

#[test]
fn test_enum_name_and_value_construction() {
    let colors = new_enum_type(
        "color",
        &["RED".to_string(), "GREEN".to_string(), "BLUE".to_string()],
        &[0, 1, 2],
    )
    .unwrap();

    let green = colors.new_data(Some(&Value::Str("GREEN".to_string()))).unwrap();
    assert_eq!(green.value().unwrap(), Value::Str("GREEN".to_string()));

    let err = colors
        .new_data(Some(&Value::Str("MAUVE".to_string())))
        .unwrap_err();
    match &err {
        Error::UnknownEnumerator { name, enum_name } => {
            assert_eq!(name, "MAUVE");
            assert_eq!(enum_name, "enum color");
        }
        other => panic!("expected unknown enumerator, got {}", other),
    }
}

#[test]
fn test_enum_open_values_pass_through() {
    let colors = new_enum_type("color", &["RED".to_string()], &[0]).unwrap();
    // C enums are open: any int constructs; an undeclared value decodes
    // back as the raw integer, a declared one as its name.
    let seven = colors.new_data(Some(&Value::Int(7))).unwrap();
    assert_eq!(seven.value().unwrap(), Value::Int(7));
    let zero = colors.new_data(Some(&Value::Int(0))).unwrap();
    assert_eq!(zero.value().unwrap(), Value::Str("RED".to_string()));
}

#[test]
fn test_nonstandard_integer_names_cover_fixed_widths() {
    let table = nonstandard_integer_types();
    assert_eq!(table.get("int8_t").map(String::as_str), Some("signed char"));
    assert_eq!(
        table.get("uint8_t").map(String::as_str),
        Some("unsigned char")
    );
    assert!(table.contains_key("int32_t"));
    assert!(table.contains_key("uint64_t"));
    assert!(table.contains_key("size_t"));
    assert!(table.contains_key("intptr_t"));
}

#[test]
fn test_errno_slot_roundtrips() {
    set_errno(7);
    assert_eq!(get_errno(), 7);
    set_errno(0);
    assert_eq!(get_errno(), 0);
}

#[test]
fn test_primitive_repr_names_the_type() {
    let c_uint = new_primitive_type("unsigned int").unwrap();
    let v = c_uint.new_data(Some(&Value::Int(1))).unwrap();
    assert_eq!(format!("{}", v), "<cdata 'unsigned int'>");
}
