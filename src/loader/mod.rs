//! Class loading.
//!
//! A sandbox has two loaders:
//!
//! - [`SystemClassLoader`] defines the host class library and every class the
//!   instrumentation rules refuse to acquire. It is shared by all code in a sandbox,
//!   so types such as `java.lang.String` have one identity everywhere.
//! - [`SandboxClassLoader`] defines the acquired classes, instrumenting those the
//!   rules select. It delegates everything else to the system loader.
//!
//! Both read class bytes from a [`ClassBytesProvider`]. Names passed to
//! [`ClassLoader::load_class`] are internal (`com/example/Foo`) or array
//! descriptors (`[Lcom/example/Foo;`).

mod provider;
mod sandbox;
mod system;

pub use provider::{ClassBytes, ClassBytesProvider, DirectoryBytesProvider, MapBytesProvider};
pub use sandbox::SandboxClassLoader;
pub use system::SystemClassLoader;

use std::{
    cell::RefCell,
    sync::{Arc, Weak},
};

use crate::{
    classfile::{descriptor::binary_name, FieldType},
    runtime::{ClassDefinition, ObjectKind, RuntimeClass},
    Error, Result,
};

/// Something that defines classes.
pub trait ClassLoader: Send + Sync {
    /// Returns the class named `name` (internal), defining it on first request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] when no bytes exist for the class, or the
    /// error that made an earlier attempt fail.
    fn load_class(&self, name: &str) -> Result<Arc<RuntimeClass>>;

    /// Returns the class if this loader has already defined it.
    fn find_loaded_class(&self, name: &str) -> Option<Arc<RuntimeClass>>;
}

/// Defines the array class `name` (a descriptor) for `loader`.
pub(crate) fn define_array_class(
    name: &str,
    object: Arc<RuntimeClass>,
    loader: Weak<dyn ClassLoader>,
) -> Result<Arc<RuntimeClass>> {
    let FieldType::Array(component) = FieldType::parse(name)? else {
        return Err(Error::ClassNotFound(name.to_string()));
    };
    let mut definition = ClassDefinition::new(name, loader);
    definition.super_class = Some(object);
    definition.kind = Some(ObjectKind::Array);
    definition.component = Some(*component);
    Ok(RuntimeClass::new(definition))
}

thread_local! {
    static LOADING: RefCell<Vec<(usize, String)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a class as being loaded by one loader on the current thread.
///
/// A second [`LoadingGuard::enter`] for the same loader and class before the first
/// guard drops means the class is its own ancestor.
pub(crate) struct LoadingGuard {
    loader: usize,
}

impl LoadingGuard {
    pub(crate) fn enter(loader: usize, name: &str) -> Result<Self> {
        LOADING.with(|loading| {
            let mut loading = loading.borrow_mut();
            if loading.iter().any(|(l, n)| *l == loader && n == name) {
                return Err(Error::Linkage(format!("class circularity: {}", binary_name(name))));
            }
            loading.push((loader, name.to_string()));
            Ok(LoadingGuard { loader })
        })
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        LOADING.with(|loading| {
            let mut loading = loading.borrow_mut();
            if let Some(position) = loading.iter().rposition(|(l, _)| *l == self.loader) {
                loading.remove(position);
            }
        });
    }
}
