//! Host class library.
//!
//! Classes the sandbox never acquires are served by the system loader from this
//! module: a small `java.lang`/`java.util` surface implemented in Rust, plus the
//! dispatch host that instrumented code calls into. Each submodule contributes its
//! classes through a `register` function; [`host_classes`] returns all of them with
//! every superclass and superinterface ahead of its subclasses, which is the order
//! the system loader defines them in.
//!
//! # Library surface
//!
//! | Module | Classes |
//! |--------|---------|
//! | `lang` | `Object`, `String`, `StringBuilder`, `System`, `Enum`, `Runnable` |
//! | `throwable` | `Throwable` and the exceptions and errors the interpreter raises |
//! | `thread` | `Thread` backed by OS threads |
//! | `util` | `Map`, `Map$Entry`, `HashMap`, `LinkedHashMap` and an immutable entry |
//!
//! Methods not listed in a class's builder do not exist; calling them raises
//! `java.lang.NoSuchMethodError` in the caller.

mod lang;
mod thread;
mod throwable;
mod util;

pub(crate) use lang::{arraycopy, java_string_hash};
pub(crate) use util::{eldest, ENTRY_CLASS};

use std::sync::{Arc, Weak};

use crate::{
    classfile::{AccessFlags, FieldType},
    loader::ClassLoader,
    runtime::{
        class::{ClassDefinition, HostFn, MethodBody, ObjectKind, RuntimeField, RuntimeMethod},
        dispatch, RuntimeClass,
    },
    Error, Result,
};

/// Internal name of `java.lang.Object`.
pub const OBJECT: &str = "java/lang/Object";

/// Declarative description of a host class.
pub struct HostClassBuilder {
    name: &'static str,
    access: AccessFlags,
    super_name: Option<&'static str>,
    interfaces: Vec<&'static str>,
    kind: Option<ObjectKind>,
    fields: Vec<(&'static str, &'static str, AccessFlags)>,
    methods: Vec<(&'static str, &'static str, AccessFlags, Option<HostFn>)>,
}

impl HostClassBuilder {
    /// Starts a public class extending `java.lang.Object`.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        HostClassBuilder {
            name,
            access: AccessFlags::PUBLIC | AccessFlags::SUPER,
            super_name: (name != OBJECT).then_some(OBJECT),
            interfaces: Vec::new(),
            kind: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Starts a public interface.
    #[must_use]
    pub fn interface(name: &'static str) -> Self {
        let mut builder = Self::new(name);
        builder.access = AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;
        builder
    }

    /// Internal name of the class being built.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Names the superclass.
    #[must_use]
    pub fn extends(mut self, super_name: &'static str) -> Self {
        self.super_name = Some(super_name);
        self
    }

    /// Adds a superinterface.
    #[must_use]
    pub fn implements(mut self, interface: &'static str) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Sets the object flavour of instances.
    #[must_use]
    pub fn kind(mut self, kind: ObjectKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Adds a public instance field.
    #[must_use]
    pub fn field(mut self, name: &'static str, descriptor: &'static str) -> Self {
        self.fields.push((name, descriptor, AccessFlags::PUBLIC));
        self
    }

    /// Adds a public instance method.
    #[must_use]
    pub fn method(self, name: &'static str, descriptor: &'static str, host: HostFn) -> Self {
        self.method_with(name, descriptor, AccessFlags::PUBLIC, host)
    }

    /// Adds a public final instance method.
    #[must_use]
    pub fn final_method(self, name: &'static str, descriptor: &'static str, host: HostFn) -> Self {
        self.method_with(name, descriptor, AccessFlags::PUBLIC | AccessFlags::FINAL, host)
    }

    /// Adds a public static method.
    #[must_use]
    pub fn static_method(self, name: &'static str, descriptor: &'static str, host: HostFn) -> Self {
        self.method_with(name, descriptor, AccessFlags::PUBLIC | AccessFlags::STATIC, host)
    }

    /// Adds a public abstract method.
    #[must_use]
    pub fn abstract_method(mut self, name: &'static str, descriptor: &'static str) -> Self {
        self.methods
            .push((name, descriptor, AccessFlags::PUBLIC | AccessFlags::ABSTRACT, None));
        self
    }

    fn method_with(
        mut self,
        name: &'static str,
        descriptor: &'static str,
        access: AccessFlags,
        host: HostFn,
    ) -> Self {
        self.methods.push((name, descriptor, access, Some(host)));
        self
    }

    /// Creates the runtime class. `resolve` returns already defined host classes by
    /// internal name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] when a superclass or interface has not been
    /// defined yet, and [`Error::Malformed`] for an invalid descriptor.
    pub fn define(
        self,
        resolve: impl Fn(&str) -> Option<Arc<RuntimeClass>>,
        loader: Weak<dyn ClassLoader>,
    ) -> Result<Arc<RuntimeClass>> {
        let lookup = |name: &str| resolve(name).ok_or_else(|| Error::ClassNotFound(name.to_string()));

        let mut definition = ClassDefinition::new(self.name, loader);
        definition.access = self.access;
        definition.super_class = self.super_name.map(lookup).transpose()?;
        definition.interfaces = self
            .interfaces
            .iter()
            .map(|name| lookup(name))
            .collect::<Result<_>>()?;
        definition.kind = self.kind;
        definition.source_file = Some("HostLibrary.java".to_string());
        for (name, descriptor, access) in self.fields {
            definition.fields.push(RuntimeField {
                name: name.to_string(),
                field_type: FieldType::parse(descriptor)?,
                access,
                slot: 0,
                constant: None,
            });
        }
        for (name, descriptor, access, host) in self.methods {
            let body = host.map_or(MethodBody::Abstract, MethodBody::Host);
            definition
                .methods
                .push(RuntimeMethod::new(name, descriptor, access, body)?);
        }
        Ok(RuntimeClass::new(definition))
    }
}

impl std::fmt::Debug for HostClassBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostClassBuilder")
            .field("name", &self.name)
            .field("super_name", &self.super_name)
            .field("methods", &self.methods.len())
            .finish_non_exhaustive()
    }
}

/// Every host class, supertypes first.
#[must_use]
pub fn host_classes() -> Vec<HostClassBuilder> {
    let mut classes = Vec::new();
    lang::register(&mut classes);
    throwable::register(&mut classes);
    thread::register(&mut classes);
    util::register(&mut classes);
    dispatch::register(&mut classes);
    classes
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_supertypes_come_first() {
        let mut seen = HashSet::new();
        for class in host_classes() {
            if let Some(super_name) = class.super_name {
                assert!(seen.contains(super_name), "{} before {}", class.name, super_name);
            }
            for interface in &class.interfaces {
                assert!(seen.contains(interface), "{} before {}", class.name, interface);
            }
            assert!(seen.insert(class.name), "{} registered twice", class.name);
        }
        assert!(seen.contains("shadowbox/internal/Dispatch"));
        assert!(seen.contains("java/lang/StackOverflowError"));
    }
}
