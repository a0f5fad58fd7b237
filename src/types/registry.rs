//! The type-object registry
//!
//! Construction of a [`CType`] is a pure function of its descriptor, and
//! the casting rules compare types by identity, so every consumer must see
//! the one object built for a given descriptor. [`TypeRegistry`] provides
//! that guarantee for a single thread: the first request builds, every
//! later request for the same descriptor returns the cached object.

use rustc_hash::FxHashMap;

use super::errors::Error;
use super::CType;

/// Structural key identifying one distinct C type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Void,
    Primitive(String),
    Pointer(Box<TypeDescriptor>),
    ConstCharPtr,
    Array(Box<TypeDescriptor>, Option<usize>),
    Struct(String),
    Union(String),
    Function {
        args: Vec<TypeDescriptor>,
        result: Box<TypeDescriptor>,
        variadic: bool,
    },
    Enum(String),
}

/// Descriptor-keyed cache guaranteeing one construction per distinct type
#[derive(Debug, Default)]
pub struct TypeRegistry {
    cache: FxHashMap<TypeDescriptor, CType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry {
            cache: FxHashMap::default(),
        }
    }

    /// Return the type for `descriptor`, building it with `build` exactly
    /// once. A failed build caches nothing.
    pub fn get_or_build<F>(&mut self, descriptor: &TypeDescriptor, build: F) -> Result<CType, Error>
    where
        F: FnOnce() -> Result<CType, Error>,
    {
        if let Some(existing) = self.cache.get(descriptor) {
            return Ok(existing.clone());
        }
        let built = build()?;
        self.cache.insert(descriptor.clone(), built.clone());
        Ok(built)
    }

    /// Number of distinct types constructed so far
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::primitive::new_primitive_type;

    #[test]
    fn same_descriptor_yields_identical_type() {
        let mut registry = TypeRegistry::new();
        let desc = TypeDescriptor::Primitive("int".to_string());
        let first = registry
            .get_or_build(&desc, || new_primitive_type("int"))
            .unwrap();
        let second = registry
            .get_or_build(&desc, || panic!("must not rebuild"))
            .unwrap();
        assert!(first.same_type(&second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_builds_are_not_cached() {
        let mut registry = TypeRegistry::new();
        let desc = TypeDescriptor::Primitive("notatype".to_string());
        assert!(registry
            .get_or_build(&desc, || new_primitive_type("notatype"))
            .is_err());
        let recovered = registry.get_or_build(&desc, || new_primitive_type("int"));
        assert!(recovered.is_ok());
    }
}
