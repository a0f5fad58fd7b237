//! Error types for type construction and handle operations
//!
//! This module defines [`Error`], which represents all errors that can occur
//! while constructing type objects or operating on typed memory handles (as
//! opposed to panics, which never cross this crate's API).
//!
//! All errors are raised synchronously at the point of violation; none are
//! downgraded to partial success. The only operation that touches memory
//! before failing is the bitfield write, which restores the previous
//! contents before returning [`Error::BitfieldOverflow`].

use std::fmt;

/// Whether an integer overflow was caused by a negative value reaching an
/// unsigned type or by sheer magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowKind {
    Negative,
    OutOfBounds,
}

/// Errors raised by type constructors and handle operations
#[derive(Debug, Clone)]
pub enum Error {
    /// Wrong host value kind where a specific C conversion is required
    TypeMismatch { expected: String, got: String },

    /// A value cannot be converted to the address space of a target type
    AddressConversion {
        from: String,
        to: Option<String>,
    },

    /// Explicit cast requested on a type with no defined cast source
    CastUnsupported { ctype: String, source: String },

    /// Integer does not fit the target primitive type
    Overflow { ctype: String, kind: OverflowKind },

    /// Bitfield write would lose bits beyond the declared width
    BitfieldOverflow { field: String, width: u32 },

    /// Invalid string value (embedded NUL in a C string)
    InvalidString { message: String },

    /// Name is not an enumerator of the enum type
    UnknownEnumerator { name: String, enum_name: String },

    /// Field name collides with a reserved accessor on the handle type
    FieldConflict { field: String, ctype: String },

    /// Array or string-pointer index outside the instance's length
    IndexOutOfBounds { index: i64, len: usize },

    /// Aggregate initializer supplies more values than there are fields
    TooManyInitializers { ctype: String, fields: usize },

    /// Attempt to instantiate an opaque (incomplete) aggregate type
    OpaqueInstantiation { ctype: String },

    /// Call argument count does not match the declared parameter count
    ArgumentCount {
        ctype: String,
        expected: usize,
        got: usize,
    },

    /// Dynamic library could not be loaded
    LibraryNotFound { name: String, reason: String },

    /// Exported symbol could not be located in a loaded library
    SymbolNotFound { library: String, symbol: String },

    /// The foreign-call primitive rejected the call description
    ForeignCall { message: String },

    /// Operation not supported on this handle type
    Unsupported { message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TypeMismatch { expected, got } => {
                write!(f, "{} expected, got {}", expected, got)
            }
            Error::AddressConversion { from, to } => match to {
                Some(to) => write!(f, "cannot convert '{}' to '{}'", from, to),
                None => write!(f, "cannot convert '{}' to an address", from),
            },
            Error::CastUnsupported { ctype, source } => {
                write!(f, "bad type for cast to '{}': {}", ctype, source)
            }
            Error::Overflow { ctype, kind } => match kind {
                OverflowKind::Negative => write!(f, "{}: negative integer", ctype),
                OverflowKind::OutOfBounds => write!(f, "{}: integer out of bounds", ctype),
            },
            Error::BitfieldOverflow { field, width } => {
                write!(
                    f,
                    "value too large for bitfield '{}' ({} bits)",
                    field, width
                )
            }
            Error::InvalidString { message } => {
                write!(f, "invalid string: {}", message)
            }
            Error::UnknownEnumerator { name, enum_name } => {
                write!(f, "'{}' is not an enumerator for '{}'", name, enum_name)
            }
            Error::FieldConflict { field, ctype } => {
                write!(
                    f,
                    "field name '{}' conflicts with a reserved accessor on '{}'",
                    field, ctype
                )
            }
            Error::IndexOutOfBounds { index, len } => {
                write!(f, "index {} out of bounds for length {}", index, len)
            }
            Error::TooManyInitializers { ctype, fields } => {
                write!(
                    f,
                    "too many values for '{}' initializer ({} fields)",
                    ctype, fields
                )
            }
            Error::OpaqueInstantiation { ctype } => {
                write!(f, "cannot instantiate opaque type '{}'", ctype)
            }
            Error::ArgumentCount {
                ctype,
                expected,
                got,
            } => {
                write!(
                    f,
                    "'{}' expects {} argument{}, got {}",
                    ctype,
                    expected,
                    if *expected == 1 { "" } else { "s" },
                    got
                )
            }
            Error::LibraryNotFound { name, reason } => {
                write!(f, "library not found: '{}' ({})", name, reason)
            }
            Error::SymbolNotFound { library, symbol } => {
                write!(f, "symbol '{}' not found in '{}'", symbol, library)
            }
            Error::ForeignCall { message } => {
                write!(f, "foreign call failed: {}", message)
            }
            Error::Unsupported { message } => {
                write!(f, "unsupported operation: {}", message)
            }
        }
    }
}

impl std::error::Error for Error {}
