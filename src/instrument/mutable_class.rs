use std::collections::HashSet;

use crate::{
    classfile::{ClassFile, MethodInfo},
    instrument::ClassDetails,
    Result,
};

/// A class being prepared for definition.
///
/// Owned by the loader for the duration of one load. It remembers which
/// `name + descriptor` pairs the class declared before any rewriting, which is what
/// decides whether a no-argument constructor or an `Object` method must be synthesized.
#[derive(Debug, Clone)]
pub struct MutableClass {
    class: ClassFile,
    declared_methods: HashSet<(String, String)>,
}

impl MutableClass {
    /// Parses class bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged data.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self::from_class_file(ClassFile::parse(data)?))
    }

    /// Wraps an already parsed class.
    #[must_use]
    pub fn from_class_file(class: ClassFile) -> Self {
        let declared_methods = class
            .methods
            .iter()
            .map(|m| (m.name.clone(), m.descriptor.clone()))
            .collect();
        MutableClass {
            class,
            declared_methods,
        }
    }

    /// Internal name, e.g. `android/os/Build$VERSION`.
    #[must_use]
    pub fn internal_name(&self) -> &str {
        &self.class.name
    }

    /// Returns `true` if the class declared `name` + `descriptor` before rewriting.
    #[must_use]
    pub fn declared(&self, name: &str, descriptor: &str) -> bool {
        self.declared_methods
            .contains(&(name.to_string(), descriptor.to_string()))
    }

    /// The class model.
    #[must_use]
    pub fn class_file(&self) -> &ClassFile {
        &self.class
    }

    /// Mutable access to the class model.
    pub fn class_file_mut(&mut self) -> &mut ClassFile {
        &mut self.class
    }

    /// Appends a method.
    pub fn add_method(&mut self, method: MethodInfo) {
        self.class.methods.push(method);
    }

    /// Serializes the current state.
    ///
    /// # Errors
    ///
    /// See [`ClassFile::to_bytes`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.class.to_bytes()
    }

    /// Consumes the wrapper.
    #[must_use]
    pub fn into_class_file(self) -> ClassFile {
        self.class
    }
}

impl ClassDetails for MutableClass {
    fn name(&self) -> String {
        self.class.name()
    }

    fn is_interface(&self) -> bool {
        self.class.is_interface()
    }

    fn is_annotation(&self) -> bool {
        self.class.is_annotation()
    }

    fn has_annotation(&self, annotation_class: &str) -> bool {
        ClassDetails::has_annotation(&self.class, annotation_class)
    }
}
