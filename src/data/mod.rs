//! Host-side values and typed memory handles
//!
//! This module holds the two halves of the data model:
//! - [`value`]: the dynamic host [`value::Value`] that flows into and out
//!   of every conversion
//! - [`cdata`]: the typed memory handle [`cdata::CData`] — one value or
//!   memory region typed by a [`CType`](crate::types::CType)

pub mod cdata;
pub mod value;
