//! Sources of class file bytes.

use std::{
    collections::HashMap,
    fmt, fs,
    ops::Deref,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use dashmap::DashMap;
use memmap2::Mmap;

use crate::{Error, Result};

/// Bytes of one class file.
pub enum ClassBytes {
    /// Bytes held in memory.
    Shared(Arc<[u8]>),
    /// A memory-mapped class file.
    Mapped(Mmap),
}

impl Deref for ClassBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ClassBytes::Shared(bytes) => bytes,
            ClassBytes::Mapped(map) => map,
        }
    }
}

impl fmt::Debug for ClassBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassBytes::Shared(bytes) => write!(f, "Shared({} bytes)", bytes.len()),
            ClassBytes::Mapped(map) => write!(f, "Mapped({} bytes)", map.len()),
        }
    }
}

/// Supplies class file bytes by internal class name.
pub trait ClassBytesProvider: Send + Sync {
    /// The bytes of `name` (internal), or `None` if this provider has no such class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] when the class exists but cannot be read.
    fn class_bytes(&self, name: &str) -> Result<Option<ClassBytes>>;
}

/// Class bytes held in memory. Counts requests per class.
#[derive(Default)]
pub struct MapBytesProvider {
    classes: RwLock<HashMap<String, Arc<[u8]>>>,
    requests: DashMap<String, usize>,
}

impl MapBytesProvider {
    /// An empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the bytes of `name`. Dotted names are accepted.
    pub fn insert(&self, name: &str, bytes: impl Into<Arc<[u8]>>) {
        self.classes
            .write()
            .expect("class bytes lock poisoned")
            .insert(name.replace('.', "/"), bytes.into());
    }

    /// Builder-style [`MapBytesProvider::insert`].
    #[must_use]
    pub fn with_class(self, name: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.insert(name, bytes);
        self
    }

    /// How often the bytes of `name` were requested.
    #[must_use]
    pub fn request_count(&self, name: &str) -> usize {
        self.requests
            .get(&name.replace('.', "/"))
            .map_or(0, |count| *count)
    }

    /// Number of classes held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.read().expect("class bytes lock poisoned").len()
    }

    /// Returns `true` if no class is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClassBytesProvider for MapBytesProvider {
    fn class_bytes(&self, name: &str) -> Result<Option<ClassBytes>> {
        *self.requests.entry(name.to_string()).or_insert(0) += 1;
        Ok(self
            .classes
            .read()
            .expect("class bytes lock poisoned")
            .get(name)
            .map(|bytes| ClassBytes::Shared(Arc::clone(bytes))))
    }
}

impl fmt::Debug for MapBytesProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapBytesProvider")
            .field("classes", &self.len())
            .finish_non_exhaustive()
    }
}

/// Class files below one or more class path directories, memory-mapped on request.
///
/// `com/example/Foo` is looked up as `com/example/Foo.class` in each root in order.
#[derive(Debug, Clone)]
pub struct DirectoryBytesProvider {
    roots: Vec<PathBuf>,
}

impl DirectoryBytesProvider {
    /// A provider over `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryBytesProvider {
            roots: vec![root.into()],
        }
    }

    /// Adds another root, searched after the existing ones.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// The class path roots.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn map(path: &Path) -> Result<ClassBytes> {
        let file = fs::File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(ClassBytes::Shared(Arc::from(Vec::new())));
        }
        // SAFETY: the mapping is read-only; class files are not rewritten while a
        // sandbox reads them.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|error| Error::Linkage(format!("cannot map {}: {error}", path.display())))?;
        Ok(ClassBytes::Mapped(map))
    }
}

impl ClassBytesProvider for DirectoryBytesProvider {
    fn class_bytes(&self, name: &str) -> Result<Option<ClassBytes>> {
        if name.starts_with('[') || name.contains("..") {
            return Ok(None);
        }
        for root in &self.roots {
            let path = root.join(format!("{name}.class"));
            if path.is_file() {
                return Self::map(&path).map(Some);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_provider_counts_requests() {
        let provider = MapBytesProvider::new().with_class("com.example.Foo", vec![0xCA, 0xFE]);
        assert_eq!(provider.request_count("com/example/Foo"), 0);
        let bytes = provider.class_bytes("com/example/Foo").unwrap().unwrap();
        assert_eq!(&*bytes, &[0xCA, 0xFE]);
        assert!(provider.class_bytes("com/example/Bar").unwrap().is_none());
        assert_eq!(provider.request_count("com.example.Foo"), 1);
        assert_eq!(provider.request_count("com/example/Bar"), 1);
    }

    #[test]
    fn test_directory_provider_maps_class_files() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::create_dir_all(second.path().join("com/example")).unwrap();
        fs::write(second.path().join("com/example/Foo.class"), [1u8, 2, 3]).unwrap();

        let provider = DirectoryBytesProvider::new(first.path()).with_root(second.path());
        let bytes = provider.class_bytes("com/example/Foo").unwrap().unwrap();
        assert!(matches!(bytes, ClassBytes::Mapped(_)));
        assert_eq!(&*bytes, &[1, 2, 3]);
        assert!(provider.class_bytes("com/example/Missing").unwrap().is_none());
        assert!(provider.class_bytes("[Lcom/example/Foo;").unwrap().is_none());
    }
}
