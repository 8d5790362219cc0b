//! Runtime type/method metadata
//!
//! Rust keeps no reflective method tables, so the application describes its
//! own types here: each type lists its methods with their implementation
//! addresses. The table builder enumerates whatever has been registered.
//!
//! ```rust,ignore
//! struct Parser;
//! impl Parser {
//!     fn parse(&self) {}
//!     fn reset(&mut self) {}
//! }
//!
//! threadtrace::register_type(threadtrace::type_metadata!(Parser { parse, reset }));
//! ```

use std::sync::{Mutex, PoisonError};

use crate::domain::Address;

/// A method and where its code starts in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodMetadata {
    pub name: String,
    pub implementation: Address,
}

/// A type and the methods defined on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMetadata {
    pub name: String,
    pub methods: Vec<MethodMetadata>,
}

impl TypeMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), methods: Vec::new() }
    }

    /// Add a method by its runtime implementation address
    #[must_use]
    pub fn method(mut self, name: impl Into<String>, implementation: usize) -> Self {
        self.methods.push(MethodMetadata {
            name: name.into(),
            implementation: Address::from(implementation),
        });
        self
    }
}

/// Describe a type and the listed methods by path
///
/// Each method must be a non-generic associated function of the type.
#[macro_export]
macro_rules! type_metadata {
    ($ty:ident { $($method:ident),* $(,)? }) => {
        $crate::symbolization::TypeMetadata::new(stringify!($ty))
            $(.method(stringify!($method), $ty::$method as usize))*
    };
}

/// Source of type/method metadata for the executable
pub trait MetadataSource: Send + Sync {
    /// Every type currently known, with its methods
    fn types(&self) -> Vec<TypeMetadata>;
}

impl<T: MetadataSource + ?Sized> MetadataSource for &T {
    fn types(&self) -> Vec<TypeMetadata> {
        (**self).types()
    }
}

/// In-process registry the application populates at startup
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    types: Mutex<Vec<TypeMetadata>>,
}

impl MetadataRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self { types: Mutex::new(Vec::new()) }
    }

    pub fn register(&self, ty: TypeMetadata) {
        log::debug!("Registered type {} with {} methods", ty.name, ty.methods.len());
        self.types.lock().unwrap_or_else(PoisonError::into_inner).push(ty);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetadataSource for MetadataRegistry {
    fn types(&self) -> Vec<TypeMetadata> {
        self.types.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

static GLOBAL_REGISTRY: MetadataRegistry = MetadataRegistry::new();

/// The process-wide registry used by the default backtracer
#[must_use]
pub fn global_registry() -> &'static MetadataRegistry {
    &GLOBAL_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    impl Widget {
        fn draw() {}
        fn resize(_w: u32) -> u32 {
            0
        }
    }

    #[test]
    fn test_builder_records_methods() {
        let ty = TypeMetadata::new("Widget").method("draw", 0x1000).method("resize", 0x2000);
        assert_eq!(ty.methods.len(), 2);
        assert_eq!(ty.methods[1].implementation, Address(0x2000));
    }

    #[test]
    fn test_macro_uses_function_addresses() {
        let ty = crate::type_metadata!(Widget { draw, resize });
        assert_eq!(ty.name, "Widget");
        assert_eq!(ty.methods[0].name, "draw");
        assert_eq!(ty.methods[0].implementation, Address::from(Widget::draw as usize));
        assert_eq!(ty.methods[1].implementation, Address::from(Widget::resize as usize));
    }

    #[test]
    fn test_registry_enumerates() {
        let registry = MetadataRegistry::new();
        assert!(registry.is_empty());
        registry.register(TypeMetadata::new("A").method("x", 1));
        registry.register(TypeMetadata::new("B"));
        let names: Vec<String> = registry.types().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
