use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use dashmap::DashMap;
use log::{debug, info, warn};

use crate::{
    classfile::{descriptor::binary_name, AccessFlags, ClassFile, FieldType},
    config::InstrumentationConfiguration,
    instrument::{ClassHierarchy, ClassInstrumentor, MutableClass},
    loader::{define_array_class, ClassBytesProvider, ClassLoader, LoadingGuard, SystemClassLoader},
    runtime::{component_class_name, jdk, ClassDefinition, NativeCallMode, RuntimeClass},
    Error, Result,
};

/// Distinguishes dump files of the same class across sandboxes of one process.
static DUMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Why an earlier load of a class failed.
#[derive(Debug, Clone)]
enum LoadFailure {
    NotFound,
    Failed(String),
}

impl LoadFailure {
    fn of(error: &Error) -> Self {
        match error {
            Error::ClassNotFound(_) => LoadFailure::NotFound,
            other => LoadFailure::Failed(other.to_string()),
        }
    }

    fn to_error(&self, name: &str) -> Error {
        match self {
            LoadFailure::NotFound => Error::ClassNotFound(binary_name(name)),
            LoadFailure::Failed(message) => Error::Linkage(message.clone()),
        }
    }
}

/// The instrumenting loader of one sandbox.
///
/// Classes the configuration acquires are defined here, in a namespace of their own:
/// the same class file loaded by two sandboxes gives two unrelated classes. Acquired
/// classes selected for instrumentation are rewritten before they are defined.
/// Everything else is delegated to the [`SystemClassLoader`].
///
/// Each class is defined at most once. Threads racing to load the same class may
/// both build it; the first definition wins and every caller gets that one. Failed
/// loads are remembered, so a missing class is requested from the bytes provider
/// only once.
pub struct SandboxClassLoader {
    this: Weak<SandboxClassLoader>,
    config: Arc<InstrumentationConfiguration>,
    instrumentor: ClassInstrumentor,
    provider: Arc<dyn ClassBytesProvider>,
    parent: Arc<SystemClassLoader>,
    classes: DashMap<String, Arc<RuntimeClass>>,
    failures: DashMap<String, LoadFailure>,
    original_finals: DashMap<String, Vec<(String, String)>>,
    definitions: boxcar::Vec<String>,
    dump_directory: Option<PathBuf>,
}

impl SandboxClassLoader {
    /// Creates a loader.
    ///
    /// # Arguments
    ///
    /// * `config` - Acquisition and instrumentation rules
    /// * `native_mode` - Selects the body generated for native methods
    /// * `provider` - Bytes of acquired classes
    /// * `parent` - Loader of everything not acquired
    /// * `dump_directory` - Where instrumented class files are written, if anywhere
    #[must_use]
    pub fn new(
        config: Arc<InstrumentationConfiguration>,
        native_mode: NativeCallMode,
        provider: Arc<dyn ClassBytesProvider>,
        parent: Arc<SystemClassLoader>,
        dump_directory: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| SandboxClassLoader {
            this: this.clone(),
            instrumentor: ClassInstrumentor::new(Arc::clone(&config), native_mode),
            config,
            provider,
            parent,
            classes: DashMap::new(),
            failures: DashMap::new(),
            original_finals: DashMap::new(),
            definitions: boxcar::Vec::new(),
            dump_directory,
        })
    }

    /// The acquisition and instrumentation rules.
    #[must_use]
    pub fn config(&self) -> &Arc<InstrumentationConfiguration> {
        &self.config
    }

    /// The parent loader.
    #[must_use]
    pub fn parent(&self) -> &Arc<SystemClassLoader> {
        &self.parent
    }

    /// Internal names of the classes this loader defined, in definition order.
    pub fn defined_classes(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|(_, name)| name.as_str())
    }

    /// Returns `true` if `name` (dotted or internal) is defined by this loader rather
    /// than delegated.
    #[must_use]
    pub fn should_acquire(&self, name: &str) -> bool {
        let name = binary_name(name);
        !name.starts_with('[') && self.config.should_acquire(&name)
    }

    fn weak(&self) -> Weak<dyn ClassLoader> {
        self.this.clone()
    }

    fn id(&self) -> usize {
        self as *const Self as usize
    }

    fn define(&self, name: &str, class: Arc<RuntimeClass>) -> Arc<RuntimeClass> {
        let entry = self.classes.entry(name.to_string()).or_insert_with(|| {
            self.definitions.push(name.to_string());
            class
        });
        Arc::clone(entry.value())
    }

    fn load_array(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        let FieldType::Array(component) = FieldType::parse(name)? else {
            return Err(Error::ClassNotFound(name.to_string()));
        };
        if !component.is_reference() {
            return self.parent.load_class(name);
        }
        let component_class = self.load_class(&component_class_name(&component))?;
        let ours: Arc<dyn ClassLoader> = match self.this.upgrade() {
            Some(this) => this,
            None => return self.parent.load_class(name),
        };
        if !component_class.is_defined_by(&ours) {
            return self.parent.load_class(name);
        }
        let object = self.parent.load_class(jdk::OBJECT)?;
        Ok(self.define(name, define_array_class(name, object, self.weak())?))
    }

    fn acquire(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        let _guard = LoadingGuard::enter(self.id(), name)?;
        let Some(bytes) = self.provider.class_bytes(name)? else {
            return Err(Error::ClassNotFound(binary_name(name)));
        };
        let file = ClassFile::parse(&bytes)?;
        drop(bytes);
        if file.name != name {
            return Err(Error::Linkage(format!(
                "{} has the bytes of {}",
                binary_name(name),
                binary_name(&file.name)
            )));
        }

        let super_class = file
            .super_name
            .as_deref()
            .map(|super_name| self.load_class(super_name))
            .transpose()?;
        let interfaces = file
            .interfaces
            .iter()
            .map(|interface| self.load_class(interface))
            .collect::<Result<Vec<_>>>()?;

        let instrument = self.config.should_instrument(&file);
        let file = if instrument {
            self.original_finals.insert(name.to_string(), final_methods(&file));
            let mut class = MutableClass::from_class_file(file);
            self.instrumentor.instrument(&mut class, self)?;
            if let Some(directory) = &self.dump_directory {
                dump(directory, &class);
            }
            class.into_class_file()
        } else {
            file
        };

        let definition =
            ClassDefinition::from_class_file(file, super_class, interfaces, self.weak(), instrument)?;
        debug!(
            "Defined {}{}",
            binary_name(name),
            if instrument { " (instrumented)" } else { "" }
        );
        Ok(self.define(name, RuntimeClass::new(definition)))
    }

    fn lookup(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        self.find_loaded_class(name)
            .or_else(|| self.parent.find_loaded_class(name))
    }
}

fn final_methods(file: &ClassFile) -> Vec<(String, String)> {
    file.methods
        .iter()
        .filter(|method| method.access_flags.contains(AccessFlags::FINAL))
        .map(|method| (method.name.clone(), method.descriptor.clone()))
        .collect()
}

fn dump(directory: &Path, class: &MutableClass) {
    let suffix = DUMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = directory.join(format!(
        "{}-robo-instrumented-{suffix}.class",
        binary_name(class.internal_name())
    ));
    let written = class
        .to_bytes()
        .and_then(|bytes| fs::create_dir_all(directory).and_then(|()| fs::write(&path, bytes)).map_err(Error::from));
    match written {
        Ok(()) => info!("Dumped instrumented class to {}", path.display()),
        Err(error) => warn!("Could not dump {}: {error}", path.display()),
    }
}

impl ClassHierarchy for SandboxClassLoader {
    fn declares_final(&self, class_name: &str, name: &str, descriptor: &str) -> bool {
        let mut current = self.lookup(class_name);
        while let Some(class) = current {
            let is_final = match self.original_finals.get(class.name()) {
                Some(finals) => finals.iter().any(|(n, d)| n == name && d == descriptor),
                None => class
                    .declared_method(name, descriptor)
                    .is_some_and(|method| method.access.contains(AccessFlags::FINAL)),
            };
            if is_final {
                return true;
            }
            current = class.super_class().cloned();
        }
        false
    }
}

impl ClassLoader for SandboxClassLoader {
    fn load_class(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        let name = name.replace('.', "/");
        if let Some(class) = self.find_loaded_class(&name) {
            return Ok(class);
        }
        if name.starts_with('[') {
            return self.load_array(&name);
        }
        if !self.should_acquire(&name) {
            return self.parent.load_class(&name);
        }
        if let Some(failure) = self.failures.get(&name) {
            return Err(failure.to_error(&name));
        }
        self.acquire(&name).inspect_err(|error| {
            if !matches!(error, Error::Linkage(message) if message.starts_with("class circularity")) {
                self.failures.insert(name.clone(), LoadFailure::of(error));
            }
        })
    }

    fn find_loaded_class(&self, name: &str) -> Option<Arc<RuntimeClass>> {
        self.classes.get(name).map(|class| Arc::clone(class.value()))
    }
}

impl Drop for SandboxClassLoader {
    fn drop(&mut self) {
        // Statics can hold instances of the classes that own them.
        for class in self.classes.iter() {
            class.value().clear_statics();
        }
    }
}

impl std::fmt::Debug for SandboxClassLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxClassLoader")
            .field("classes", &self.classes.len())
            .field("failures", &self.failures.len())
            .field("dump_directory", &self.dump_directory)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classfile::builder::ClassBuilder,
        loader::MapBytesProvider,
        test::{class_bytes, instrumenting},
    };

    fn loader(provider: Arc<MapBytesProvider>, dump: Option<PathBuf>) -> Arc<SandboxClassLoader> {
        let parent = SystemClassLoader::new(None).unwrap();
        SandboxClassLoader::new(
            Arc::new(instrumenting("com.example.")),
            NativeCallMode::Legacy,
            provider,
            parent,
            dump,
        )
    }

    #[test]
    fn test_acquired_classes_are_cached() {
        let provider = Arc::new(MapBytesProvider::new().with_class("com/example/Foo", class_bytes("com/example/Foo")));
        let loader = loader(Arc::clone(&provider), None);
        let first = loader.load_class("com.example.Foo").unwrap();
        let second = loader.load_class("com/example/Foo").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_instrumented());
        assert_eq!(provider.request_count("com/example/Foo"), 1);
        assert_eq!(loader.defined_classes().collect::<Vec<_>>(), vec!["com/example/Foo"]);
    }

    #[test]
    fn test_missing_class_is_requested_once() {
        let provider = Arc::new(MapBytesProvider::new());
        let loader = loader(Arc::clone(&provider), None);
        for _ in 0..3 {
            assert!(matches!(
                loader.load_class("com/example/Missing"),
                Err(Error::ClassNotFound(_))
            ));
        }
        assert_eq!(provider.request_count("com/example/Missing"), 1);
    }

    #[test]
    fn test_malformed_class_failure_is_cached() {
        let provider = Arc::new(MapBytesProvider::new().with_class("com/example/Broken", vec![0xCA, 0xFE]));
        let loader = loader(Arc::clone(&provider), None);
        assert!(loader.load_class("com/example/Broken").is_err());
        assert!(matches!(loader.load_class("com/example/Broken"), Err(Error::Linkage(_))));
        assert_eq!(provider.request_count("com/example/Broken"), 1);
    }

    #[test]
    fn test_unacquired_classes_come_from_parent() {
        let loader = loader(Arc::new(MapBytesProvider::new()), None);
        let string = loader.load_class("java.lang.String").unwrap();
        let parent_string = loader.parent().load_class("java/lang/String").unwrap();
        assert!(Arc::ptr_eq(&string, &parent_string));
    }

    #[test]
    fn test_arrays_of_acquired_classes_are_local() {
        let provider = Arc::new(MapBytesProvider::new().with_class("com/example/Foo", class_bytes("com/example/Foo")));
        let loader = loader(provider, None);
        let array = loader.load_class("[Lcom/example/Foo;").unwrap();
        assert!(loader.find_loaded_class("[Lcom/example/Foo;").is_some());
        assert_eq!(array.super_class().unwrap().name(), jdk::OBJECT);
        let ints = loader.load_class("[I").unwrap();
        assert!(loader.find_loaded_class("[I").is_none());
        assert!(Arc::ptr_eq(&ints, &loader.parent().load_class("[I").unwrap()));
    }

    #[test]
    fn test_circular_hierarchy_is_rejected() {
        let bytes = ClassBuilder::new("com/example/Loop")
            .super_class("com/example/Loop")
            .to_bytes()
            .unwrap();
        let loader = loader(Arc::new(MapBytesProvider::new().with_class("com/example/Loop", bytes)), None);
        let error = loader.load_class("com/example/Loop").unwrap_err();
        assert!(error.to_string().contains("circularity"), "{error}");
    }

    #[test]
    fn test_dump_directory_receives_instrumented_classes() {
        let directory = tempfile::tempdir().unwrap();
        let provider = Arc::new(MapBytesProvider::new().with_class("com/example/Foo", class_bytes("com/example/Foo")));
        let loader = loader(provider, Some(directory.path().to_path_buf()));
        loader.load_class("com/example/Foo").unwrap();

        let dumped: Vec<String> = fs::read_dir(directory.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(dumped.len(), 1);
        assert!(dumped[0].starts_with("com.example.Foo-robo-instrumented-"));
        assert!(dumped[0].ends_with(".class"));
        let dumped = fs::read(directory.path().join(&dumped[0])).unwrap();
        let parsed = ClassFile::parse(&dumped).unwrap();
        assert!(parsed.method("__constructor__", "()V").is_none());
        assert!(parsed.method("$$robo$$com_example_Foo$__constructor__", "()V").is_some());
    }
}
