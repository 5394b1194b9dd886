//! Heap objects.
//!
//! Every object is reference counted and carries an [`ObjectId`]: a process-wide
//! identity token that never repeats. Identity-keyed side tables (the shadow bindings
//! in particular) key on the token instead of on the allocation, and an object
//! removes its own side-table entry when it is dropped.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, Weak,
    },
    thread::JoinHandle,
};

use crate::{
    runtime::{RuntimeClass, StackFrame, Value},
    shadow::ShadowBindings,
};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl ObjectId {
    fn next() -> Self {
        ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The identity hash code Java code observes.
    #[must_use]
    pub fn hash_code(self) -> i32 {
        // Fold to 32 bits; ids are unique, hash codes need not be.
        (self.0 ^ (self.0 >> 32)) as i32
    }
}

/// State of a `java.lang.Throwable`.
#[derive(Debug, Default)]
pub struct ThrowableState {
    /// Detail message.
    pub message: Option<String>,
    /// Cause, if initialized.
    pub cause: Option<Arc<Object>>,
    /// Captured stack, innermost frame first.
    pub stack_trace: Vec<StackFrame>,
}

/// State of a `java.lang.Thread`.
#[derive(Debug, Default)]
pub struct ThreadState {
    /// `Runnable` passed to the constructor.
    pub target: Option<Arc<Object>>,
    /// Thread name.
    pub name: Option<String>,
    /// Join handle of the OS thread once started.
    pub handle: Option<JoinHandle<()>>,
    /// Set by `start`.
    pub started: bool,
}

/// Flavour-specific payload of an object.
#[derive(Debug)]
pub enum ObjectData {
    /// An ordinary instance; state lives in the field slots.
    Plain,
    /// An immutable `java.lang.String`.
    Str(String),
    /// An array of any element type.
    Array(Mutex<Vec<Value>>),
    /// A `java.lang.StringBuilder`.
    Builder(Mutex<String>),
    /// A `java.lang.Throwable`.
    Throwable(Mutex<ThrowableState>),
    /// A `java.lang.Thread`.
    Thread(Mutex<ThreadState>),
    /// A `java.util.LinkedHashMap` (insertion order).
    Map(Mutex<Vec<(Value, Value)>>),
    /// An immutable map entry.
    Entry(Value, Value),
}

/// A heap object.
pub struct Object {
    id: ObjectId,
    class: Arc<RuntimeClass>,
    fields: Mutex<Vec<Value>>,
    data: ObjectData,
    bindings: OnceLock<Weak<ShadowBindings>>,
}

impl Object {
    /// Allocates an object of `class` with zeroed fields.
    #[must_use]
    pub fn new(class: Arc<RuntimeClass>, data: ObjectData) -> Arc<Object> {
        let fields = class.instance_field_defaults();
        Arc::new(Object {
            id: ObjectId::next(),
            class,
            fields: Mutex::new(fields),
            data,
            bindings: OnceLock::new(),
        })
    }

    /// Identity token.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Runtime class.
    #[must_use]
    pub fn class(&self) -> &Arc<RuntimeClass> {
        &self.class
    }

    /// Flavour payload.
    #[must_use]
    pub fn data(&self) -> &ObjectData {
        &self.data
    }

    /// Locks the instance field slots.
    pub fn fields(&self) -> MutexGuard<'_, Vec<Value>> {
        self.fields.lock().expect("object field lock poisoned")
    }

    /// Reads the field in `slot`.
    #[must_use]
    pub fn field(&self, slot: usize) -> Value {
        self.fields().get(slot).cloned().unwrap_or_default()
    }

    /// Writes the field in `slot`.
    pub fn set_field(&self, slot: usize, value: Value) {
        if let Some(entry) = self.fields().get_mut(slot) {
            *entry = value;
        }
    }

    /// The string contents, for `java.lang.String` objects.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            ObjectData::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Registers the side table that holds this object's shadow, so the entry is
    /// removed when the object goes away. Only the first registration counts.
    pub(crate) fn attach_bindings(&self, bindings: &Arc<ShadowBindings>) {
        let _ = self.bindings.set(Arc::downgrade(bindings));
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        if let Some(bindings) = self.bindings.get().and_then(Weak::upgrade) {
            bindings.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("class", &self.class.name())
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}
