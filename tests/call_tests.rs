// Live calls through the foreign-call layer: native functions defined in
// this test binary, host callbacks exposed as native code, and (on glibc
// hosts) real libc/libm symbols.

use std::os::raw::{c_char, c_int};

use ceffigy::types::errors::Error;
use ceffigy::{
    new_array_type, new_constcharp_type, new_function_type, new_pointer_type, new_primitive_type,
    new_struct_type, new_void_type, CType, HostCallable, Value,
};

extern "C" fn native_add(a: c_int, b: c_int) -> c_int {
    a.wrapping_add(b)
}

extern "C" fn native_halve(x: f64) -> f64 {
    x / 2.0
}

extern "C" fn native_fill(p: *mut c_int, n: c_int) {
    for i in 0..n {
        unsafe { *p.offset(i as isize) = i * 10 };
    }
}

extern "C" fn native_strlen(p: *const c_char) -> i64 {
    let mut n = 0;
    unsafe {
        while *p.offset(n) != 0 {
            n += 1;
        }
    }
    n as i64
}

#[repr(C)]
struct Pair {
    a: c_int,
    b: c_int,
}

extern "C" fn native_pair_sum(p: Pair) -> c_int {
    p.a + p.b
}

extern "C" fn native_make_pair(a: c_int, b: c_int) -> Pair {
    Pair { a, b }
}

fn int_type() -> CType {
    new_primitive_type("int").unwrap()
}

fn fn_handle(ftype: &CType, address: usize) -> ceffigy::CData {
    ftype.cast_from(&Value::Int(address as i128)).unwrap()
}

#[test]
fn test_call_int_function() {
    let c_int = int_type();
    let ftype = new_function_type(&[c_int.clone(), c_int.clone()], &c_int, false).unwrap();
    let add = fn_handle(&ftype, native_add as usize);
    let result = add.call(&[Value::Int(2), Value::Int(40)]).unwrap();
    assert_eq!(result, Value::Int(42));
}

#[test]
fn test_call_double_function() {
    let c_double = new_primitive_type("double").unwrap();
    let ftype = new_function_type(&[c_double.clone()], &c_double, false).unwrap();
    let halve = fn_handle(&ftype, native_halve as usize);
    assert_eq!(halve.call(&[Value::Float(9.0)]).unwrap(), Value::Float(4.5));
}

#[test]
fn test_argument_count_must_match_exactly() {
    let c_int = int_type();
    let ftype = new_function_type(&[c_int.clone(), c_int.clone()], &c_int, false).unwrap();
    let add = fn_handle(&ftype, native_add as usize);
    let err = add.call(&[Value::Int(1)]).unwrap_err();
    match err {
        Error::ArgumentCount { expected, got, .. } => {
            assert_eq!(expected, 2);
            assert_eq!(got, 1);
        }
        other => panic!("expected argument count error, got {}", other),
    }
}

#[test]
fn test_array_decays_into_pointer_argument() {
    let c_int = int_type();
    let c_void = new_void_type();
    let int_ptr = new_pointer_type(&c_int).unwrap();
    let arr_t = new_array_type(&int_ptr, Some(4)).unwrap();
    let arr = arr_t.new_data(None).unwrap();

    let ftype = new_function_type(&[int_ptr.clone(), c_int.clone()], &c_void, false).unwrap();
    let fill = fn_handle(&ftype, native_fill as usize);
    let result = fill.call(&[Value::Data(arr.clone()), Value::Int(4)]).unwrap();
    assert_eq!(result, Value::Null);
    for i in 0..4 {
        assert_eq!(arr.index(i).unwrap(), Value::Int(i as i128 * 10));
    }
}

#[test]
fn test_string_argument_is_kept_alive_for_the_call() {
    let c_char = new_primitive_type("char").unwrap();
    let ccp = new_constcharp_type(&c_char).unwrap();
    let c_longlong = new_primitive_type("long long").unwrap();
    let ftype = new_function_type(&[ccp.clone()], &c_longlong, false).unwrap();
    let strlen = fn_handle(&ftype, native_strlen as usize);

    // A bare host string marshals to a temporary NUL-terminated copy
    let n = strlen
        .call(&[Value::Str("four".to_string())])
        .unwrap();
    assert_eq!(n, Value::Int(4));

    // A retained const char* handle works the same way
    let s = ccp.new_data(Some(&Value::Str("seven!!".to_string()))).unwrap();
    assert_eq!(strlen.call(&[Value::Data(s)]).unwrap(), Value::Int(7));
}

#[test]
fn test_struct_travels_by_value() {
    let c_int = int_type();
    let pair_t = new_struct_type(
        "pair",
        Some(&[
            ("a".to_string(), c_int.clone(), None),
            ("b".to_string(), c_int.clone(), None),
        ]),
    )
    .unwrap();

    let sum_t = new_function_type(&[pair_t.clone()], &c_int, false).unwrap();
    let sum = fn_handle(&sum_t, native_pair_sum as usize);
    let p = pair_t
        .new_data(Some(&Value::Array(vec![Value::Int(30), Value::Int(12)])))
        .unwrap();
    assert_eq!(sum.call(&[Value::Data(p)]).unwrap(), Value::Int(42));

    let make_t = new_function_type(&[c_int.clone(), c_int.clone()], &pair_t, false).unwrap();
    let make = fn_handle(&make_t, native_make_pair as usize);
    let made = match make.call(&[Value::Int(5), Value::Int(6)]).unwrap() {
        Value::Data(d) => d,
        other => panic!("cdata expected, got {:?}", other),
    };
    assert_eq!(made.field("a").unwrap(), Value::Int(5));
    assert_eq!(made.field("b").unwrap(), Value::Int(6));
}

#[test]
fn test_callback_roundtrip_through_native_code() {
    let c_int = int_type();
    let ftype = new_function_type(&[c_int.clone(), c_int.clone()], &c_int, false).unwrap();

    let host = HostCallable::new("sum2", |args| {
        let a = args[0].expect_int()?;
        let b = args[1].expect_int()?;
        Ok(Value::Int(a + b))
    });
    let cb = ftype.new_data(Some(&Value::Callable(host))).unwrap();
    assert!(format!("{}", cb).contains("a callback to 'sum2'"));

    // Calling the handle drives libffi into the trampoline and back out
    // through the host callable.
    let result = cb.call(&[Value::Int(20), Value::Int(22)]).unwrap();
    assert_eq!(result, Value::Int(42));
}

#[test]
fn test_null_function_pointer_refuses_to_call() {
    let c_int = int_type();
    let ftype = new_function_type(&[], &c_int, false).unwrap();
    let null = ftype.new_data(None).unwrap();
    assert!(matches!(null.call(&[]), Err(Error::ForeignCall { .. })));
}

#[test]
fn test_variadic_trailing_arguments_must_be_cdata() {
    let c_int = int_type();
    let ftype = new_function_type(&[c_int.clone()], &c_int, true).unwrap();
    let f = fn_handle(&ftype, native_add as usize);
    // A bare host scalar has no unambiguous native width
    let err = f.call(&[Value::Int(1), Value::Int(2)]).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
mod libc_bound {
    use super::*;
    use ceffigy::Library;

    #[test]
    fn test_bind_and_call_libm_cbrt() {
        let libm = Library::open("libm.so.6").unwrap();
        let c_double = new_primitive_type("double").unwrap();
        let ftype = new_function_type(&[c_double.clone()], &c_double, false).unwrap();
        let cbrt = libm.function(&ftype, "cbrt").unwrap();
        // The bound symbol name shows up in the diagnostic repr
        assert_eq!(format!("{}", cbrt), "<cdata 'double cbrt(double)'>");
        match cbrt.call(&[Value::Float(27.0)]).unwrap() {
            Value::Float(x) => assert!((x - 3.0).abs() < 1e-12),
            other => panic!("float expected, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_symbols_fail_without_fallout() {
        let libm = Library::open("libm.so.6").unwrap();
        let c_double = new_primitive_type("double").unwrap();
        let ftype = new_function_type(&[c_double.clone()], &c_double, false).unwrap();
        assert!(matches!(
            libm.function(&ftype, "definitely_not_here"),
            Err(Error::SymbolNotFound { .. })
        ));
        // Earlier failures do not poison later lookups
        assert!(libm.function(&ftype, "sqrt").is_ok());
    }

    #[test]
    fn test_variadic_snprintf_formats_through_libffi() {
        let libc_lib = Library::open_default().unwrap();
        let c_char = new_primitive_type("char").unwrap();
        let c_int = int_type();
        let c_ulong = new_primitive_type("unsigned long").unwrap();
        let char_ptr = new_pointer_type(&c_char).unwrap();
        let ccp = new_constcharp_type(&c_char).unwrap();

        let ftype = new_function_type(
            &[char_ptr.clone(), c_ulong.clone(), ccp.clone()],
            &c_int,
            true,
        )
        .unwrap();
        let snprintf = libc_lib.function(&ftype, "snprintf").unwrap();

        let buf_t = new_array_type(&char_ptr, Some(64)).unwrap();
        let buf = buf_t.new_data(None).unwrap();
        let answer = c_int.new_data(Some(&Value::Int(42))).unwrap();
        let suffix = ccp.new_data(Some(&Value::Str("ok".to_string()))).unwrap();

        let written = snprintf
            .call(&[
                Value::Data(buf.clone()),
                Value::Int(64),
                Value::Str("%d-%s".to_string()),
                Value::Data(answer),
                Value::Data(suffix),
            ])
            .unwrap();
        assert_eq!(written, Value::Int(5));
        assert_eq!(buf.c_str().unwrap(), "42-ok");
    }
}
