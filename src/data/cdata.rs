//! Typed memory handles
//!
//! A [`CData`] is one value or memory region typed by a
//! [`CType`](crate::types::CType). The storage split mirrors C's object
//! model:
//!
//! - primitives and enums hold their native scalar directly
//! - pointers hold an address plus an optional keepalive — the retained
//!   value backing the address (a C-string copy, a shared block, a
//!   callback trampoline, or a loaded library)
//! - arrays, structs, and unions hold a memory reference that is either an
//!   owned shared block or a borrowed view over foreign memory — an
//!   explicit tag, so ownership never has to be guessed from context
//! - function handles hold a native code address and remember where it
//!   came from (plain address, bound symbol, or live callback)
//!
//! # Aliasing
//!
//! Handles reaching the same address alias: a write through one is
//! immediately visible through every other, exactly like raw C memory.
//! Nothing here synchronizes; single-threaded or externally locked use is
//! assumed.

use std::fmt;
use std::rc::Rc;

use crate::data::value::Value;
use crate::ffi::closure::CallbackHandle;
use crate::ffi::library::SharedLibrary;
use crate::ffi::memory::{self, MemBlock};
use crate::ffi::NativeValue;
use crate::types::errors::Error;
use crate::types::pointer::{self, PtrKind};
use crate::types::{function, record, CType, TypeKind};

/// Retained NUL-terminated copy of a host string, with the original length
/// recorded for bounds checks.
pub struct CStrBuf {
    block: MemBlock,
    len: usize,
}

impl CStrBuf {
    /// Copy `s` into native memory with a terminating NUL. C strings
    /// cannot represent an embedded NUL, so one inside `s` is an error.
    pub fn new(s: &str) -> Result<Self, Error> {
        if s.as_bytes().contains(&0) {
            return Err(Error::InvalidString {
                message: "string contains an embedded NUL character".to_string(),
            });
        }
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        Ok(CStrBuf {
            block: MemBlock::from_bytes(&bytes, 1),
            len: s.len(),
        })
    }

    pub fn address(&self) -> u64 {
        self.block.address()
    }

    /// Length in bytes, excluding the terminating NUL
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for CStrBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CStrBuf({} chars at {:#x})", self.len, self.address())
    }
}

/// A retained value preventing reclamation of memory a handle addresses
/// but does not own
#[derive(Debug, Clone)]
pub enum Keepalive {
    Block(Rc<MemBlock>),
    CStr(Rc<CStrBuf>),
    Callback(Rc<CallbackHandle>),
    Library(Rc<SharedLibrary>),
}

/// Aggregate backing memory: owned shared block, or borrowed foreign view
#[derive(Debug, Clone)]
enum MemRef {
    Owned(Rc<MemBlock>),
    Borrowed { address: u64, len: usize },
}

impl MemRef {
    fn address(&self) -> u64 {
        match self {
            MemRef::Owned(block) => block.address(),
            MemRef::Borrowed { address, .. } => *address,
        }
    }

    fn len(&self) -> usize {
        match self {
            MemRef::Owned(block) => block.len(),
            MemRef::Borrowed { len, .. } => *len,
        }
    }
}

/// Where a function handle's code address came from
#[derive(Debug, Clone)]
enum FunProvenance {
    Plain,
    Callback { handle: Rc<CallbackHandle>, name: String },
    Symbol { name: String, library: Rc<SharedLibrary> },
}

#[derive(Debug, Clone)]
enum Storage {
    Scalar(NativeValue),
    Pointer {
        address: u64,
        keepalive: Option<Keepalive>,
    },
    Block(MemRef),
    Function {
        address: u64,
        provenance: FunProvenance,
    },
}

/// One value or memory region typed by a [`CType`]
#[derive(Debug, Clone)]
pub struct CData {
    btype: CType,
    storage: Storage,
}

impl CData {
    pub(crate) fn from_scalar(btype: CType, native: NativeValue) -> Self {
        CData {
            btype,
            storage: Storage::Scalar(native),
        }
    }

    pub(crate) fn pointer_at(btype: CType, address: u64, keepalive: Option<Keepalive>) -> Self {
        CData {
            btype,
            storage: Storage::Pointer { address, keepalive },
        }
    }

    pub(crate) fn owned(btype: CType, block: Rc<MemBlock>) -> Self {
        CData {
            btype,
            storage: Storage::Block(MemRef::Owned(block)),
        }
    }

    pub(crate) fn borrowed(btype: CType, address: u64, len: usize) -> Self {
        CData {
            btype,
            storage: Storage::Block(MemRef::Borrowed { address, len }),
        }
    }

    pub(crate) fn function_at(btype: CType, address: u64) -> Self {
        CData {
            btype,
            storage: Storage::Function {
                address,
                provenance: FunProvenance::Plain,
            },
        }
    }

    pub(crate) fn function_callback(btype: CType, handle: Rc<CallbackHandle>, name: String) -> Self {
        let address = handle.code();
        CData {
            btype,
            storage: Storage::Function {
                address,
                provenance: FunProvenance::Callback { handle, name },
            },
        }
    }

    pub(crate) fn function_symbol(
        btype: CType,
        address: u64,
        name: String,
        library: Rc<SharedLibrary>,
    ) -> Self {
        CData {
            btype,
            storage: Storage::Function {
                address,
                provenance: FunProvenance::Symbol { name, library },
            },
        }
    }

    /// The handle's type object
    pub fn btype(&self) -> &CType {
        &self.btype
    }

    /// The retained value that keeps this handle's target alive, if any —
    /// propagated to pointers derived from it.
    pub(crate) fn backing_keepalive(&self) -> Option<Keepalive> {
        match &self.storage {
            Storage::Scalar(_) => None,
            Storage::Pointer { keepalive, .. } => keepalive.clone(),
            Storage::Block(MemRef::Owned(block)) => Some(Keepalive::Block(block.clone())),
            Storage::Block(MemRef::Borrowed { .. }) => None,
            Storage::Function { provenance, .. } => match provenance {
                FunProvenance::Plain => None,
                FunProvenance::Callback { handle, .. } => {
                    Some(Keepalive::Callback(handle.clone()))
                }
                FunProvenance::Symbol { library, .. } => {
                    Some(Keepalive::Library(library.clone()))
                }
            },
        }
    }

    /// Base address of aggregate backing memory
    pub(crate) fn aggregate_address(&self) -> Result<u64, Error> {
        match &self.storage {
            Storage::Block(mem) => Ok(mem.address()),
            _ => Err(Error::AddressConversion {
                from: self.btype.c_name(),
                to: None,
            }),
        }
    }

    /// Native code address of a function handle
    pub(crate) fn function_address(&self) -> Result<u64, Error> {
        match &self.storage {
            Storage::Function { address, .. } => Ok(*address),
            _ => Err(Error::Unsupported {
                message: format!("'{}' is not callable", self.btype.c_name()),
            }),
        }
    }

    /// The address this handle would contribute when stored into or passed
    /// as `target`; `None` asks for the bare address-of.
    pub(crate) fn convert_to_address(&self, target: Option<&CType>) -> Result<u64, Error> {
        let refuse = || Error::AddressConversion {
            from: self.btype.c_name(),
            to: target.map(CType::c_name),
        };
        match (&self.storage, self.btype.kind()) {
            (Storage::Pointer { address, .. }, TypeKind::Pointer(_)) => match target {
                None => Ok(*address),
                Some(t) if pointer::compatible(&self.btype, t) => Ok(*address),
                Some(_) => Err(refuse()),
            },
            (Storage::Function { address, .. }, TypeKind::Function(_)) => match target {
                None => Ok(*address),
                Some(t) if self.btype.same_type(t) || t.automatic_cast() => Ok(*address),
                Some(_) => Err(refuse()),
            },
            (Storage::Block(mem), TypeKind::Array(a)) => match target {
                // Decay: the array contributes its base address for its
                // canonical element-pointer type and the automatic casts.
                None => Ok(mem.address()),
                Some(t) if t.same_type(&a.item_ptr) || t.automatic_cast() => Ok(mem.address()),
                Some(_) => Err(refuse()),
            },
            (Storage::Block(mem), TypeKind::Record(_)) => match target {
                Some(t) => match t.kind() {
                    TypeKind::Pointer(p) if p.item.same_type(&self.btype) => Ok(mem.address()),
                    _ => Err(refuse()),
                },
                None => Err(refuse()),
            },
            _ => Err(refuse()),
        }
    }

    /// Integer view used by explicit casts: scalar value, character
    /// ordinal, truncated float, or the address of a pointer/function/
    /// array handle.
    pub fn cast_to_integer(&self) -> Result<i128, Error> {
        match (&self.storage, self.btype.kind()) {
            (Storage::Scalar(native), _) => {
                if let Some(v) = native.as_int() {
                    Ok(v)
                } else if let Some(x) = native.as_float() {
                    Ok(x as i128)
                } else {
                    Err(Error::AddressConversion {
                        from: self.btype.c_name(),
                        to: None,
                    })
                }
            }
            (Storage::Pointer { address, .. }, _) => Ok(*address as i128),
            (Storage::Function { address, .. }, _) => Ok(*address as i128),
            (Storage::Block(mem), TypeKind::Array(_)) => Ok(mem.address() as i128),
            _ => Err(Error::AddressConversion {
                from: self.btype.c_name(),
                to: None,
            }),
        }
    }

    /// Integer view of a scalar handle only — the implicit-conversion
    /// path. Pointers do not implicitly become integers; that takes an
    /// explicit cast.
    pub(crate) fn scalar_int(&self) -> Result<i128, Error> {
        match &self.storage {
            Storage::Scalar(native) => native
                .as_int()
                .or_else(|| native.as_float().map(|x| x as i128))
                .ok_or_else(|| Error::TypeMismatch {
                    expected: "integer".to_string(),
                    got: format!("cdata '{}'", self.btype.c_name()),
                }),
            _ => Err(Error::TypeMismatch {
                expected: "integer".to_string(),
                got: format!("cdata '{}'", self.btype.c_name()),
            }),
        }
    }

    pub(crate) fn cast_to_float(&self) -> Result<f64, Error> {
        match &self.storage {
            Storage::Scalar(native) => native
                .as_float()
                .or_else(|| native.as_int().map(|v| v as f64))
                .ok_or_else(|| Error::TypeMismatch {
                    expected: "float".to_string(),
                    got: format!("cdata '{}'", self.btype.c_name()),
                }),
            _ => Err(Error::TypeMismatch {
                expected: "float".to_string(),
                got: format!("cdata '{}'", self.btype.c_name()),
            }),
        }
    }

    /// The byte of a `char`-typed handle
    pub(crate) fn char_value(&self) -> Result<u8, Error> {
        match (&self.storage, self.btype.kind()) {
            (Storage::Scalar(NativeValue::I8(b)), TypeKind::Primitive(p))
                if p.kind == crate::types::primitive::PrimKind::Char =>
            {
                Ok(*b as u8)
            }
            (Storage::Scalar(NativeValue::U8(b)), TypeKind::Primitive(p))
                if p.kind == crate::types::primitive::PrimKind::Char =>
            {
                Ok(*b)
            }
            _ => Err(Error::TypeMismatch {
                expected: "character".to_string(),
                got: format!("cdata '{}'", self.btype.c_name()),
            }),
        }
    }

    /// Host view of a primitive or enum handle's stored value
    pub fn value(&self) -> Result<Value, Error> {
        match &self.storage {
            Storage::Scalar(native) => self.btype.from_native(native.clone()),
            _ => Err(Error::Unsupported {
                message: format!("'{}' has no scalar value", self.btype.c_name()),
            }),
        }
    }

    /// Concrete element count of an array instance
    pub fn len(&self) -> Result<usize, Error> {
        match (self.btype.kind(), &self.storage) {
            (TypeKind::Array(a), Storage::Block(mem)) => match a.length {
                Some(n) => Ok(n),
                None => {
                    let item = a.item.size().max(1);
                    Ok(mem.len() / item)
                }
            },
            _ => Err(Error::Unsupported {
                message: format!("'{}' has no length", self.btype.c_name()),
            }),
        }
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    /// Dereference element `i` (pointer or array indexing).
    pub fn index(&self, i: i64) -> Result<Value, Error> {
        match self.btype.kind() {
            TypeKind::Pointer(p) if p.kind == PtrKind::ConstChar => {
                let Storage::Pointer { address, keepalive } = &self.storage else {
                    unreachable!("pointer type with non-pointer storage")
                };
                if i < 0 {
                    return Err(Error::IndexOutOfBounds { index: i, len: 0 });
                }
                if let Some(Keepalive::CStr(buf)) = keepalive {
                    // The terminating NUL is readable; nothing past it is.
                    if i as usize > buf.len() {
                        return Err(Error::IndexOutOfBounds {
                            index: i,
                            len: buf.len() + 1,
                        });
                    }
                }
                self.deref_check(*address)?;
                let byte = unsafe { memory::read_bytes(*address + i as u64, 1) }[0];
                Ok(Value::Char(byte))
            }
            TypeKind::Pointer(p) => {
                let Storage::Pointer { address, .. } = &self.storage else {
                    unreachable!("pointer type with non-pointer storage")
                };
                self.deref_check(*address)?;
                let at = offset_address(*address, i, p.item.size());
                p.item.read_at(at)
            }
            TypeKind::Array(a) => {
                let len = self.len()?;
                if i < 0 || i as usize >= len {
                    return Err(Error::IndexOutOfBounds { index: i, len });
                }
                let base = self.aggregate_address()?;
                a.item.read_at(offset_address(base, i, a.item.size()))
            }
            _ => Err(Error::Unsupported {
                message: format!("'{}' is not indexable", self.btype.c_name()),
            }),
        }
    }

    /// Assign element `i` through the element type's conversion.
    pub fn set_index(&self, i: i64, value: &Value) -> Result<(), Error> {
        match self.btype.kind() {
            TypeKind::Pointer(p) if p.kind == PtrKind::ConstChar => Err(Error::Unsupported {
                message: "'const char *' contents are read-only".to_string(),
            }),
            TypeKind::Pointer(p) => {
                let Storage::Pointer { address, .. } = &self.storage else {
                    unreachable!("pointer type with non-pointer storage")
                };
                self.deref_check(*address)?;
                p.item.write_at(offset_address(*address, i, p.item.size()), value)
            }
            TypeKind::Array(a) => {
                let len = self.len()?;
                if i < 0 || i as usize >= len {
                    return Err(Error::IndexOutOfBounds { index: i, len });
                }
                let base = self.aggregate_address()?;
                a.item.write_at(offset_address(base, i, a.item.size()), value)
            }
            _ => Err(Error::Unsupported {
                message: format!("'{}' is not indexable", self.btype.c_name()),
            }),
        }
    }

    /// Pointer arithmetic: a new handle shifted by `n` elements. Arrays
    /// decay to their canonical element-pointer type.
    pub fn add(&self, n: i64) -> Result<CData, Error> {
        match self.btype.kind() {
            TypeKind::Pointer(p) => {
                let size = arith_size(&self.btype, &p.item)?;
                let Storage::Pointer { address, keepalive } = &self.storage else {
                    unreachable!("pointer type with non-pointer storage")
                };
                Ok(CData::pointer_at(
                    self.btype.clone(),
                    offset_address(*address, n, size),
                    keepalive.clone(),
                ))
            }
            TypeKind::Array(a) => {
                let base = self.aggregate_address()?;
                Ok(CData::pointer_at(
                    a.item_ptr.clone(),
                    offset_address(base, n, a.item.size()),
                    self.backing_keepalive(),
                ))
            }
            _ => Err(Error::Unsupported {
                message: format!("'{}' does not support arithmetic", self.btype.c_name()),
            }),
        }
    }

    pub fn sub(&self, n: i64) -> Result<CData, Error> {
        self.add(-n)
    }

    /// Element-count difference between two pointers of the identical type
    pub fn diff(&self, other: &CData) -> Result<i64, Error> {
        let p = match self.btype.kind() {
            TypeKind::Pointer(p) => p,
            _ => {
                return Err(Error::Unsupported {
                    message: format!("'{}' does not support arithmetic", self.btype.c_name()),
                })
            }
        };
        if !self.btype.same_type(&other.btype) {
            return Err(Error::TypeMismatch {
                expected: format!("'{}'", self.btype.c_name()),
                got: format!("'{}'", other.btype.c_name()),
            });
        }
        let size = arith_size(&self.btype, &p.item)? as i64;
        let a = self.convert_to_address(None)? as i64;
        let b = other.convert_to_address(None)? as i64;
        Ok((a - b) / size)
    }

    /// Read a named field of a struct/union handle, or of the struct a
    /// pointer handle addresses (`p->field` shorthand).
    pub fn field(&self, name: &str) -> Result<Value, Error> {
        match self.btype.kind() {
            TypeKind::Record(r) => {
                let base = self.aggregate_address()?;
                record::read_field(base, record::lookup(&self.btype, r, name)?)
            }
            TypeKind::Pointer(p) => match p.item.kind() {
                TypeKind::Record(r) => {
                    let Storage::Pointer { address, .. } = &self.storage else {
                        unreachable!("pointer type with non-pointer storage")
                    };
                    self.deref_check(*address)?;
                    record::read_field(*address, record::lookup(&p.item, r, name)?)
                }
                _ => Err(Error::Unsupported {
                    message: format!("'{}' has no fields", self.btype.c_name()),
                }),
            },
            _ => Err(Error::Unsupported {
                message: format!("'{}' has no fields", self.btype.c_name()),
            }),
        }
    }

    /// Write a named field through the field type's conversion.
    pub fn set_field(&self, name: &str, value: &Value) -> Result<(), Error> {
        match self.btype.kind() {
            TypeKind::Record(r) => {
                let base = self.aggregate_address()?;
                record::write_field(base, record::lookup(&self.btype, r, name)?, value)
            }
            TypeKind::Pointer(p) => match p.item.kind() {
                TypeKind::Record(r) => {
                    let Storage::Pointer { address, .. } = &self.storage else {
                        unreachable!("pointer type with non-pointer storage")
                    };
                    self.deref_check(*address)?;
                    record::write_field(*address, record::lookup(&p.item, r, name)?, value)
                }
                _ => Err(Error::Unsupported {
                    message: format!("'{}' has no fields", self.btype.c_name()),
                }),
            },
            _ => Err(Error::Unsupported {
                message: format!("'{}' has no fields", self.btype.c_name()),
            }),
        }
    }

    /// Call a function handle.
    pub fn call(&self, args: &[Value]) -> Result<Value, Error> {
        function::invoke(self, args)
    }

    /// String conversion of `char*`/`const char*` pointers (scan to NUL)
    /// and `char` arrays (up to the first NUL, or the whole block).
    pub fn c_str(&self) -> Result<String, Error> {
        match self.btype.kind() {
            TypeKind::Pointer(p) if matches!(p.kind, PtrKind::Char | PtrKind::ConstChar) => {
                let Storage::Pointer { address, .. } = &self.storage else {
                    unreachable!("pointer type with non-pointer storage")
                };
                self.deref_check(*address)?;
                let bytes = unsafe { memory::read_cstring(*address) };
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            TypeKind::Array(a) if a.is_char => {
                let base = self.aggregate_address()?;
                let len = self.len()?;
                let mut bytes = unsafe { memory::read_bytes(base, len) };
                if let Some(nul) = bytes.iter().position(|&b| b == 0) {
                    bytes.truncate(nul);
                }
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => Err(Error::Unsupported {
                message: format!("'{}' has no string conversion", self.btype.c_name()),
            }),
        }
    }

    fn deref_check(&self, address: u64) -> Result<(), Error> {
        if address == 0 {
            return Err(Error::Unsupported {
                message: format!("null '{}' dereference", self.btype.c_name()),
            });
        }
        Ok(())
    }
}

/// `base + n * element_size`, signed-safe
fn offset_address(base: u64, n: i64, size: usize) -> u64 {
    (base as i64 + n * size as i64) as u64
}

/// Element size for pointer arithmetic; `void*` and incomplete pointees
/// have none.
fn arith_size(ptype: &CType, item: &CType) -> Result<usize, Error> {
    let size = item.size();
    if size == 0 {
        return Err(Error::Unsupported {
            message: format!("arithmetic on '{}'", ptype.c_name()),
        });
    }
    Ok(size)
}

/// Read exactly `length` bytes through an automatic-cast (`void*`-like)
/// pointer handle.
pub fn read_string(data: &CData, length: usize) -> Result<String, Error> {
    if !data.btype().automatic_cast() || !matches!(data.btype().kind(), TypeKind::Pointer(_)) {
        return Err(Error::TypeMismatch {
            expected: "'void *' argument".to_string(),
            got: format!("cdata '{}'", data.btype().c_name()),
        });
    }
    let address = data.convert_to_address(None)?;
    if address == 0 {
        return Err(Error::Unsupported {
            message: "null 'void *' dereference".to_string(),
        });
    }
    let bytes = unsafe { memory::read_bytes(address, length) };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

impl PartialEq for CData {
    /// Handles are equal when they have the identical type and the same
    /// stored value (scalars) or address (pointers, functions, blocks).
    fn eq(&self, other: &Self) -> bool {
        if !self.btype.same_type(&other.btype) {
            return false;
        }
        match (&self.storage, &other.storage) {
            (Storage::Scalar(a), Storage::Scalar(b)) => a == b,
            (Storage::Pointer { address: a, .. }, Storage::Pointer { address: b, .. }) => a == b,
            (Storage::Function { address: a, .. }, Storage::Function { address: b, .. }) => a == b,
            (Storage::Block(a), Storage::Block(b)) => a.address() == b.address(),
            _ => false,
        }
    }
}

impl std::hash::Hash for CData {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.btype.identity().hash(state);
        match &self.storage {
            Storage::Scalar(native) => match native {
                NativeValue::F32(x) => x.to_bits().hash(state),
                NativeValue::F64(x) => x.to_bits().hash(state),
                other => other.as_int().unwrap_or(0).hash(state),
            },
            Storage::Pointer { address, .. } => address.hash(state),
            Storage::Function { address, .. } => address.hash(state),
            Storage::Block(mem) => mem.address().hash(state),
        }
    }
}

impl fmt::Display for CData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c_name = match &self.storage {
            Storage::Function {
                provenance: FunProvenance::Symbol { name, .. },
                ..
            } => {
                // Splice the bound symbol into the declarator slot:
                // "int(* &)(int)" bound to "add" reads "int add(int)".
                let template = self.btype.reftypename();
                let insert = match template.find("(* &)") {
                    Some(i) if i > 0 && !" )*".contains(template.as_bytes()[i - 1] as char) => {
                        format!(" {}", name)
                    }
                    _ => name.clone(),
                };
                template.replace("(* &)", &insert)
            }
            _ => self.btype.c_name(),
        };
        let own = match (&self.storage, self.btype.kind()) {
            (Storage::Block(MemRef::Owned(block)), TypeKind::Record(_)) => {
                Some(format!("{} bytes", block.len()))
            }
            (Storage::Block(MemRef::Owned(block)), TypeKind::Array(_)) => {
                Some(format!("a {}-bytes array", block.len()))
            }
            (
                Storage::Pointer {
                    keepalive: Some(Keepalive::CStr(buf)),
                    ..
                },
                _,
            ) => Some(format!("a {}-char string", buf.len())),
            (
                Storage::Function {
                    provenance: FunProvenance::Callback { name, .. },
                    ..
                },
                _,
            ) => Some(format!("a callback to '{}'", name)),
            _ => None,
        };
        match own {
            Some(own) => write!(f, "<cdata '{}' owning {}>", c_name, own),
            None => write!(f, "<cdata '{}'>", c_name),
        }
    }
}
