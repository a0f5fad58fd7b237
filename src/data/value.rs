//! Host-side dynamic value representation
//!
//! This module defines the [`Value`] enum, the dynamically typed host value
//! that every conversion accepts or produces. Unlike the native memory the
//! handles manage, values are tagged and type-safe.
//!
//! # Value Types
//!
//! - [`Value::Null`]: absence — the null pointer, and the result of `void`
//! - [`Value::Int`]: integer, wide enough for every C integer type
//! - [`Value::Float`]: 64-bit floating point
//! - [`Value::Char`]: one C character (a byte)
//! - [`Value::Str`]: host string (C string initializers, enum names)
//! - [`Value::Array`]: ordered initializer for arrays and structs
//! - [`Value::Data`]: an already-typed memory handle
//! - [`Value::Callable`]: a host function, convertible to a native callback
//!
//! # Integer width
//!
//! Integers are held as `i128` so that every C integer type converts
//! without precision loss; `unsigned long long` values above `i64::MAX`
//! are still exact. Range checks happen against the target C type, not
//! against the host representation.

use std::rc::Rc;

use crate::data::cdata::CData;
use crate::types::errors::Error;

/// A host function usable as a native callback
#[derive(Clone)]
pub struct HostCallable {
    name: String,
    func: Rc<dyn Fn(&[Value]) -> Result<Value, Error>>,
}

impl HostCallable {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, Error> + 'static,
    {
        HostCallable {
            name: name.to_string(),
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, Error> {
        (self.func)(args)
    }
}

impl std::fmt::Debug for HostCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostCallable({})", self.name)
    }
}

/// Dynamically typed host values
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i128),
    Float(f64),
    Char(u8),
    Str(String),
    Array(Vec<Value>),
    Data(CData),
    Callable(HostCallable),
}

impl Value {
    /// Short kind name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Char(_) => "character",
            Value::Str(_) => "string",
            Value::Array(_) => "initializer list",
            Value::Data(_) => "cdata",
            Value::Callable(_) => "callable",
        }
    }

    /// Get the integer value, returns None if not an Int
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the float value, returns None if not a Float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Get the handle, returns None if not a Data
    pub fn as_data(&self) -> Option<&CData> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Get the string, returns None if not a Str
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Expect an integer value, with a uniform error otherwise
    pub fn expect_int(&self) -> Result<i128, Error> {
        self.as_int().ok_or_else(|| Error::TypeMismatch {
            expected: "integer".to_string(),
            got: self.kind_name().to_string(),
        })
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v as i128)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i128)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<CData> for Value {
    fn from(v: CData) -> Self {
        Value::Data(v)
    }
}
