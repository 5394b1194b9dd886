use std::sync::{Arc, Weak};

use dashmap::DashMap;
use log::debug;

use crate::{
    classfile::{descriptor::binary_name, ClassFile, FieldType},
    loader::{define_array_class, ClassBytesProvider, ClassLoader, LoadingGuard},
    runtime::{component_class_name, jdk, ClassDefinition, Object, ObjectData, ObjectRef, RuntimeClass},
    Error, Result,
};

const STRING: &str = "java/lang/String";

/// The parent loader of every sandbox.
///
/// Defines the host class library when created and serves classes the sandbox loader
/// refuses to acquire from an optional bytes provider, without instrumenting them.
/// Also owns the string intern table, so equal string constants are one object
/// across all classes of a sandbox.
pub struct SystemClassLoader {
    this: Weak<SystemClassLoader>,
    classes: DashMap<String, Arc<RuntimeClass>>,
    provider: Option<Arc<dyn ClassBytesProvider>>,
    interned: DashMap<String, ObjectRef>,
}

impl SystemClassLoader {
    /// Creates a loader with the host class library defined.
    ///
    /// # Errors
    ///
    /// Returns an error if the host library is inconsistent.
    pub fn new(provider: Option<Arc<dyn ClassBytesProvider>>) -> Result<Arc<Self>> {
        let mut failure = None;
        let loader = Arc::new_cyclic(|this: &Weak<SystemClassLoader>| {
            let weak: Weak<dyn ClassLoader> = this.clone();
            let classes: DashMap<String, Arc<RuntimeClass>> = DashMap::new();
            for builder in jdk::host_classes() {
                let name = builder.name();
                let defined = builder.define(
                    |wanted| classes.get(wanted).map(|class| Arc::clone(class.value())),
                    weak.clone(),
                );
                match defined {
                    Ok(class) => {
                        classes.insert(name.to_string(), class);
                    }
                    Err(error) => {
                        failure.get_or_insert(error);
                    }
                }
            }
            SystemClassLoader {
                this: this.clone(),
                classes,
                provider,
                interned: DashMap::new(),
            }
        });
        match failure {
            Some(error) => Err(error),
            None => Ok(loader),
        }
    }

    /// Returns the class named `name`, defining it on first request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] when neither the host library nor the
    /// provider has the class.
    pub fn load_class(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        let name = name.replace('.', "/");
        if let Some(class) = self.find_loaded_class(&name) {
            return Ok(class);
        }
        if name.starts_with('[') {
            return self.load_array(&name);
        }
        self.load_from_provider(&name)
    }

    /// Returns the class if it is already defined.
    #[must_use]
    pub fn find_loaded_class(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        self.classes.get(name).map(|class| Arc::clone(class.value()))
    }

    /// Number of defined classes, host classes included.
    #[must_use]
    pub fn defined_count(&self) -> usize {
        self.classes.len()
    }

    /// Creates a new `java.lang.String`.
    ///
    /// # Errors
    ///
    /// Fails only if the host library has no string class.
    pub fn new_string(&self, value: &str) -> Result<ObjectRef> {
        let class = self.load_class(STRING)?;
        Ok(Object::new(class, ObjectData::Str(value.to_string())))
    }

    /// The interned `java.lang.String` equal to `value`.
    ///
    /// # Errors
    ///
    /// Fails only if the host library has no string class.
    pub fn intern(&self, value: &str) -> Result<ObjectRef> {
        if let Some(existing) = self.interned.get(value) {
            return Ok(Arc::clone(existing.value()));
        }
        let created = self.new_string(value)?;
        Ok(Arc::clone(
            self.interned.entry(value.to_string()).or_insert(created).value(),
        ))
    }

    fn weak(&self) -> Weak<dyn ClassLoader> {
        self.this.clone()
    }

    fn object_class(&self) -> Result<Arc<RuntimeClass>> {
        self.find_loaded_class(jdk::OBJECT)
            .ok_or_else(|| Error::ClassNotFound(binary_name(jdk::OBJECT)))
    }

    fn define(&self, name: &str, class: Arc<RuntimeClass>) -> Arc<RuntimeClass> {
        Arc::clone(self.classes.entry(name.to_string()).or_insert(class).value())
    }

    fn load_array(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        if let FieldType::Array(component) = FieldType::parse(name)? {
            if component.is_reference() {
                self.load_class(&component_class_name(&component))?;
            }
        }
        let class = define_array_class(name, self.object_class()?, self.weak())?;
        Ok(self.define(name, class))
    }

    fn load_from_provider(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        let bytes = match &self.provider {
            Some(provider) => provider.class_bytes(name)?,
            None => None,
        };
        let Some(bytes) = bytes else {
            return Err(Error::ClassNotFound(binary_name(name)));
        };
        let _guard = LoadingGuard::enter(self as *const Self as usize, name)?;
        let file = ClassFile::parse(&bytes)?;
        if file.name != name {
            return Err(Error::Linkage(format!(
                "{} has the bytes of {}",
                binary_name(name),
                binary_name(&file.name)
            )));
        }
        let super_class = file.super_name.as_deref().map(|s| self.load_class(s)).transpose()?;
        let interfaces = file
            .interfaces
            .iter()
            .map(|interface| self.load_class(interface))
            .collect::<Result<Vec<_>>>()?;
        let definition = ClassDefinition::from_class_file(file, super_class, interfaces, self.weak(), false)?;
        debug!("System loader defined {}", binary_name(name));
        Ok(self.define(name, RuntimeClass::new(definition)))
    }
}

impl ClassLoader for SystemClassLoader {
    fn load_class(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        SystemClassLoader::load_class(self, name)
    }

    fn find_loaded_class(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        SystemClassLoader::find_loaded_class(self, name)
    }
}

impl std::fmt::Debug for SystemClassLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemClassLoader")
            .field("classes", &self.classes.len())
            .field("interned", &self.interned.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{classfile::builder::ClassBuilder, loader::MapBytesProvider};

    #[test]
    fn test_host_library_is_defined() {
        let loader = SystemClassLoader::new(None).unwrap();
        let string = loader.load_class("java.lang.String").unwrap();
        assert_eq!(string.name(), STRING);
        assert!(loader.load_class("shadowbox/internal/Dispatch").is_ok());
        assert!(matches!(
            loader.load_class("com/example/Missing"),
            Err(Error::ClassNotFound(_))
        ));
    }

    #[test]
    fn test_intern_returns_one_object() {
        let loader = SystemClassLoader::new(None).unwrap();
        let a = loader.intern("hello").unwrap();
        let b = loader.intern("hello").unwrap();
        let c = loader.new_string("hello").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.as_str(), Some("hello"));
    }

    #[test]
    fn test_arrays_share_identity() {
        let loader = SystemClassLoader::new(None).unwrap();
        let first = loader.load_class("[Ljava/lang/String;").unwrap();
        let second = loader.load_class("[Ljava/lang/String;").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.component(), Some(&FieldType::Object(STRING.to_string())));
    }

    #[test]
    fn test_provider_classes_are_not_instrumented() {
        let bytes = ClassBuilder::new("com/example/host/Bridge")
            .default_constructor()
            .unwrap()
            .to_bytes()
            .unwrap();
        let provider = Arc::new(MapBytesProvider::new().with_class("com/example/host/Bridge", bytes));
        let loader = SystemClassLoader::new(Some(provider)).unwrap();
        let class = loader.load_class("com.example.host.Bridge").unwrap();
        assert!(!class.is_instrumented());
        assert_eq!(class.super_class().unwrap().name(), jdk::OBJECT);
    }
}
