use std::{
    any::Any,
    fmt,
    sync::{Arc, Mutex, Weak},
};

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    runtime::{Object, ObjectId, ObjectRef},
    shadow::{ShadowClass, ShadowFlags},
};

struct ShadowState {
    shadow: String,
    value: Mutex<Box<dyn Any + Send>>,
}

/// The shadow side of one real instance.
///
/// Holds one state value per shadow in the hierarchy that declares a state factory,
/// and, for shadows with [`ShadowFlags::REAL_OBJECT`], a non-owning reference back to
/// the real object.
pub struct ShadowInstance {
    shadow: Arc<ShadowClass>,
    real: Option<Weak<Object>>,
    states: Vec<ShadowState>,
}

impl ShadowInstance {
    /// Creates the shadow instance of `real` for `shadow`, running every state
    /// factory of the shadow hierarchy.
    #[must_use]
    pub fn new(shadow: &Arc<ShadowClass>, real: &ObjectRef) -> Self {
        let states = shadow
            .hierarchy()
            .filter_map(|level| {
                level.create_state().map(|value| ShadowState {
                    shadow: level.name().to_string(),
                    value: Mutex::new(value),
                })
            })
            .collect();
        let real = shadow
            .hierarchy()
            .any(|level| level.flags().contains(ShadowFlags::REAL_OBJECT))
            .then(|| Arc::downgrade(real));
        ShadowInstance {
            shadow: Arc::clone(shadow),
            real,
            states,
        }
    }

    /// The most derived shadow class.
    #[must_use]
    pub fn shadow(&self) -> &Arc<ShadowClass> {
        &self.shadow
    }

    /// The real object, for shadows that asked for it and while it is alive.
    #[must_use]
    pub fn real(&self) -> Option<ObjectRef> {
        self.real.as_ref().and_then(Weak::upgrade)
    }

    /// Runs `f` on the first state of type `S`, most derived shadow first.
    pub fn with_state<S: 'static, R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        for state in &self.states {
            let mut value = state.value.lock().expect("shadow state lock poisoned");
            if let Some(typed) = value.downcast_mut::<S>() {
                return Some(f(typed));
            }
        }
        None
    }

    /// Runs `f` on the state owned by the shadow named `shadow_name`.
    pub fn with_state_of<S: 'static, R>(&self, shadow_name: &str, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let state = self.states.iter().find(|s| s.shadow == shadow_name)?;
        let mut value = state.value.lock().expect("shadow state lock poisoned");
        value.downcast_mut::<S>().map(f)
    }
}

impl fmt::Debug for ShadowInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowInstance")
            .field("shadow", &self.shadow.name())
            .field("states", &self.states.len())
            .field("real_object", &self.real.is_some())
            .finish()
    }
}

/// Side table from real instances to their shadow instances.
///
/// Keyed by [`ObjectId`]. An object removes its own entry when it is dropped, so
/// the table never keeps real instances alive and never outlives them.
#[derive(Default)]
pub struct ShadowBindings {
    table: DashMap<ObjectId, Arc<ShadowInstance>>,
}

impl ShadowBindings {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(ShadowBindings::default())
    }

    /// The shadow instance bound to `object`.
    #[must_use]
    pub fn get(&self, object: &Object) -> Option<Arc<ShadowInstance>> {
        self.table.get(&object.id()).map(|entry| Arc::clone(entry.value()))
    }

    /// The shadow instance bound to `object`, creating and binding it with `create`
    /// on first use.
    ///
    /// Creation is atomic per object: concurrent callers for the same object all get
    /// the instance created by the first one. `create` runs under the table shard
    /// lock and must not touch the table.
    pub fn get_or_create(
        self: &Arc<Self>,
        object: &ObjectRef,
        create: impl FnOnce() -> ShadowInstance,
    ) -> Arc<ShadowInstance> {
        let instance = match self.table.entry(object.id()) {
            Entry::Occupied(entry) => return Arc::clone(entry.get()),
            Entry::Vacant(entry) => Arc::clone(entry.insert(Arc::new(create())).value()),
        };
        object.attach_bindings(self);
        instance
    }

    /// Unbinds the object with `id`.
    pub fn remove(&self, id: ObjectId) {
        // The removed value may hold the last reference to other objects whose drop
        // re-enters this table, so it is dropped after the shard lock is released.
        let removed = self.table.remove(&id);
        drop(removed);
    }

    /// Number of bound objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for ShadowBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowBindings")
            .field("len", &self.table.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{runtime::ObjectData, test::plain_class};

    #[derive(Default)]
    struct Recorded(Vec<String>);

    fn shadow() -> Arc<ShadowClass> {
        ShadowClass::builder("ShadowFoo", "com/example/Foo")
            .real_object()
            .state(Recorded::default)
            .build()
            .unwrap()
    }

    #[test]
    fn test_state_and_back_reference() {
        let object = Object::new(plain_class("com/example/Foo"), ObjectData::Plain);
        let instance = ShadowInstance::new(&shadow(), &object);
        instance
            .with_state(|r: &mut Recorded| r.0.push("x".into()))
            .unwrap();
        assert_eq!(instance.with_state(|r: &mut Recorded| r.0.clone()), Some(vec!["x".to_string()]));
        assert!(instance.with_state(|_: &mut u32| ()).is_none());
        assert!(Arc::ptr_eq(&instance.real().unwrap(), &object));
    }

    #[test]
    fn test_binding_removed_with_object() {
        let bindings = ShadowBindings::new();
        let shadow = shadow();
        let object = Object::new(plain_class("com/example/Foo"), ObjectData::Plain);
        let first = bindings.get_or_create(&object, || ShadowInstance::new(&shadow, &object));
        let second = bindings.get_or_create(&object, || unreachable!());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(bindings.len(), 1);

        drop(first);
        drop(second);
        drop(object);
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_concurrent_creation_is_idempotent() {
        let bindings = ShadowBindings::new();
        let shadow = shadow();
        let object = Object::new(plain_class("com/example/Foo"), ObjectData::Plain);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bindings = Arc::clone(&bindings);
                let shadow = Arc::clone(&shadow);
                let object = Arc::clone(&object);
                thread::spawn(move || {
                    bindings.get_or_create(&object, || ShadowInstance::new(&shadow, &object))
                })
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
