//! # Introduction
//!
//! ceffigy turns abstract descriptions of C types into live,
//! runtime-constructed type objects that reproduce C's memory layout,
//! value-conversion rules, casting rules, and calling convention, built on
//! top of [libffi](https://docs.rs/libffi) and
//! [libloading](https://docs.rs/libloading).
//!
//! ## Pipeline
//!
//! ```text
//! Descriptor → CType constructor → CType → CData instances → native calls
//! ```
//!
//! 1. [`types`] — one constructor per C type category (primitive, pointer,
//!    array, struct/union, function, enum) building a shared
//!    [`CType`](types::CType), plus the [`registry`](types::registry)
//!    deduplicating construction per distinct descriptor.
//! 2. [`data`] — the dynamic host [`Value`](data::value::Value) and the
//!    typed memory handle [`CData`](data::cdata::CData): conversion,
//!    casting, indexing, field access, arithmetic.
//! 3. [`ffi`] — the foreign-call primitive: native memory blocks, the
//!    libffi call marshaller, callback trampolines, dynamic-library
//!    loading, and the errno slot.
//! 4. [`binding`] — typed symbol lookup in loaded libraries: functions as
//!    callable handles, global variables read and written in place.
//!
//! ## Supported C surface
//!
//! Types: all standard integer widths, `char`, `float`, `double`,
//! pointers (with `char*`/`const char*` string behaviour), fixed and
//! unbounded arrays, structs and unions (bitfields, opaque types), enums,
//! function pointers (including variadic functions and host-backed
//! callbacks).

pub mod binding;
pub mod data;
pub mod ffi;
pub mod types;

pub use binding::Library;
pub use data::cdata::{read_string, CData};
pub use data::value::{HostCallable, Value};
pub use ffi::errno::{get_errno, set_errno};
pub use types::array::new_array_type;
pub use types::enumeration::new_enum_type;
pub use types::errors::Error;
pub use types::function::new_function_type;
pub use types::pointer::{new_constcharp_type, new_pointer_type};
pub use types::primitive::{new_primitive_type, new_void_type, nonstandard_integer_types};
pub use types::record::{new_struct_type, new_union_type};
pub use types::registry::{TypeDescriptor, TypeRegistry};
pub use types::CType;
