use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::shadow::{SdkRange, ShadowClass, ShadowFlags, ShadowId};

/// Description of a shadow class.
///
/// Two shadows with equal infos are interchangeable for dispatch purposes. The
/// info is what [`ShadowMap`] equality and invalidation compare. It carries the
/// shadow's [`ShadowId`] and the ids of its super shadows, since implementation
/// bodies are closures that cannot be compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowInfo {
    /// Identity of the shadow and of each super shadow, nearest first.
    pub ids: Vec<ShadowId>,
    /// Shadow name.
    pub shadow_name: String,
    /// Internal name of the shadowed class.
    pub real_name: String,
    /// Name of the super shadow.
    pub super_shadow: Option<String>,
    /// SDK levels the shadow applies to.
    pub sdk: SdkRange,
    /// Behavior switches.
    pub flags: ShadowFlags,
    /// `(name, descriptor, is_static, sdk)` of every implementation method, in
    /// declaration order.
    pub methods: Vec<(String, String, bool, SdkRange)>,
}

impl ShadowInfo {
    pub(crate) fn of(shadow: &ShadowClass) -> Self {
        let mut ids = vec![shadow.id()];
        let mut current = shadow.super_shadow();
        while let Some(level) = current {
            ids.push(level.id());
            current = level.super_shadow();
        }
        ShadowInfo {
            ids,
            shadow_name: shadow.name().to_string(),
            real_name: shadow.real_name().to_string(),
            super_shadow: shadow.super_shadow().map(|s| s.name().to_string()),
            sdk: shadow.sdk(),
            flags: shadow.flags(),
            methods: shadow
                .methods()
                .iter()
                .map(|m| (m.name().to_string(), m.descriptor().to_string(), m.is_static(), m.sdk()))
                .collect(),
        }
    }
}

/// A source of shadow classes, such as one library of shadows.
pub trait ShadowProvider: Send + Sync {
    /// The shadows this provider contributes, in registration order.
    fn shadows(&self) -> Vec<Arc<ShadowClass>>;
}

impl ShadowProvider for Vec<Arc<ShadowClass>> {
    fn shadows(&self) -> Vec<Arc<ShadowClass>> {
        self.clone()
    }
}

/// Immutable binding of real classes to shadow classes.
///
/// Several shadows may be bound to one real class, typically with disjoint SDK
/// ranges; the most recently added one that supports the active SDK applies. Maps
/// are cheap to clone. Two maps are equal when they bind the same real classes to
/// the same built shadows, regardless of how each map was assembled.
///
/// # Examples
///
/// ```rust,no_run
/// use shadowbox::shadow::{ShadowClass, ShadowMap};
///
/// let base = ShadowMap::builder()
///     .add_shadow_class(ShadowClass::builder("ShadowView", "android/view/View").build()?)
///     .build();
/// let extended = base
///     .to_builder()
///     .add_shadow_class(ShadowClass::builder("ShadowButton", "android/widget/Button").build()?)
///     .build();
///
/// let changed = extended.invalidated_classes(&base);
/// assert!(changed.contains("android/widget/Button"));
/// # Ok::<(), shadowbox::Error>(())
/// ```
#[derive(Clone, Default)]
pub struct ShadowMap {
    shadows: Arc<BTreeMap<String, Vec<Arc<ShadowClass>>>>,
    infos: Arc<BTreeMap<String, Vec<ShadowInfo>>>,
}

impl ShadowMap {
    /// An empty map.
    #[must_use]
    pub fn empty() -> Self {
        ShadowMap::default()
    }

    /// Starts an empty builder.
    #[must_use]
    pub fn builder() -> ShadowMapBuilder {
        ShadowMapBuilder::default()
    }

    /// Starts a builder holding every binding of this map.
    #[must_use]
    pub fn to_builder(&self) -> ShadowMapBuilder {
        ShadowMapBuilder {
            shadows: (*self.shadows).clone(),
        }
    }

    /// The shadow bound to exactly `real_name` (internal) that supports `sdk`.
    #[must_use]
    pub fn get_shadow(&self, real_name: &str, sdk: u32) -> Option<Arc<ShadowClass>> {
        self.shadows
            .get(real_name)?
            .iter()
            .find(|shadow| shadow.supports_sdk(sdk))
            .cloned()
    }

    /// Every shadow bound to `real_name`, regardless of SDK.
    #[must_use]
    pub fn shadows_for(&self, real_name: &str) -> &[Arc<ShadowClass>] {
        self.shadows.get(real_name).map_or(&[], Vec::as_slice)
    }

    /// Internal names of all shadowed classes.
    pub fn real_classes(&self) -> impl Iterator<Item = &str> {
        self.shadows.keys().map(String::as_str)
    }

    /// Number of shadowed classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shadows.len()
    }

    /// Returns `true` if no class is shadowed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty()
    }

    /// Real classes whose bindings differ between `self` and `previous`: bound in
    /// only one of them, or bound to different shadows.
    #[must_use]
    pub fn invalidated_classes(&self, previous: &ShadowMap) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (name, infos) in self.infos.iter() {
            if previous.infos.get(name) != Some(infos) {
                changed.insert(name.clone());
            }
        }
        for name in previous.infos.keys() {
            if !self.infos.contains_key(name) {
                changed.insert(name.clone());
            }
        }
        changed
    }
}

impl PartialEq for ShadowMap {
    fn eq(&self, other: &Self) -> bool {
        self.infos == other.infos
    }
}

impl Eq for ShadowMap {}

impl Hash for ShadowMap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.infos.hash(state);
    }
}

impl fmt::Debug for ShadowMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.shadows.iter().map(|(real, shadows)| {
                (real, shadows.iter().map(|s| s.name()).collect::<Vec<_>>())
            }))
            .finish()
    }
}

/// Builder for [`ShadowMap`].
#[derive(Default)]
pub struct ShadowMapBuilder {
    shadows: BTreeMap<String, Vec<Arc<ShadowClass>>>,
}

impl ShadowMapBuilder {
    /// Binds `shadow` to its real class, ahead of shadows bound earlier.
    #[must_use]
    pub fn add_shadow_class(mut self, shadow: Arc<ShadowClass>) -> Self {
        let bound = self.shadows.entry(shadow.real_name().to_string()).or_default();
        bound.retain(|existing| existing.name() != shadow.name());
        bound.insert(0, shadow);
        self
    }

    /// Binds every shadow of `shadows`.
    #[must_use]
    pub fn add_shadow_classes<I>(self, shadows: I) -> Self
    where
        I: IntoIterator<Item = Arc<ShadowClass>>,
    {
        shadows.into_iter().fold(self, Self::add_shadow_class)
    }

    /// Binds every shadow a provider contributes.
    #[must_use]
    pub fn add_provider(self, provider: &dyn ShadowProvider) -> Self {
        self.add_shadow_classes(provider.shadows())
    }

    /// Freezes the bindings.
    #[must_use]
    pub fn build(self) -> ShadowMap {
        let infos = self
            .shadows
            .iter()
            .map(|(real, shadows)| (real.clone(), shadows.iter().map(|s| s.info()).collect()))
            .collect();
        ShadowMap {
            shadows: Arc::new(self.shadows),
            infos: Arc::new(infos),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Value;

    fn shadow(name: &str, real: &str) -> Arc<ShadowClass> {
        ShadowClass::builder(name, real).build().unwrap()
    }

    #[test]
    fn test_later_binding_wins() {
        let map = ShadowMap::builder()
            .add_shadow_class(shadow("ShadowA", "a/Foo"))
            .add_shadow_class(shadow("ShadowB", "a/Foo"))
            .build();
        assert_eq!(map.get_shadow("a/Foo", 30).unwrap().name(), "ShadowB");
        assert!(map.get_shadow("a/Bar", 30).is_none());
    }

    #[test]
    fn test_sdk_gated_binding() {
        let old = ShadowClass::builder("ShadowOld", "a/Foo")
            .sdk_range(None, Some(20))
            .build()
            .unwrap();
        let new = ShadowClass::builder("ShadowNew", "a/Foo")
            .sdk_range(Some(21), None)
            .build()
            .unwrap();
        let map = ShadowMap::builder().add_shadow_class(old).add_shadow_class(new).build();
        assert_eq!(map.get_shadow("a/Foo", 19).unwrap().name(), "ShadowOld");
        assert_eq!(map.get_shadow("a/Foo", 33).unwrap().name(), "ShadowNew");
    }

    #[test]
    fn test_equality_follows_bound_shadows() {
        let foo = shadow("ShadowA", "a/Foo");
        let a = ShadowMap::builder().add_shadow_class(Arc::clone(&foo)).build();
        let b = ShadowMap::empty().to_builder().add_shadow_class(foo).build();
        assert_eq!(a, b);
        assert!(a.invalidated_classes(&b).is_empty());
    }

    #[test]
    fn test_rebuilt_shadow_is_a_different_binding() {
        let a = ShadowMap::builder().add_shadow_class(shadow("ShadowA", "a/Foo")).build();
        let b = ShadowMap::builder().add_shadow_class(shadow("ShadowA", "a/Foo")).build();
        assert_ne!(a, b);
        let invalidated: Vec<String> = a.invalidated_classes(&b).into_iter().collect();
        assert_eq!(invalidated, vec!["a/Foo"]);
    }

    #[test]
    fn test_invalidated_classes_is_symmetric_difference() {
        let base = ShadowMap::builder()
            .add_shadow_class(shadow("ShadowA", "a/Foo"))
            .add_shadow_class(shadow("ShadowB", "a/Bar"))
            .build();
        let changed_method = ShadowClass::builder("ShadowB", "a/Bar")
            .method("size", "()I", |_| Ok(Value::Int(1)))
            .build()
            .unwrap();
        let next = ShadowMap::builder()
            .add_shadow_class(changed_method)
            .add_shadow_class(shadow("ShadowC", "a/Baz"))
            .build();
        let invalidated: Vec<String> = next.invalidated_classes(&base).into_iter().collect();
        assert_eq!(invalidated, vec!["a/Bar", "a/Baz", "a/Foo"]);
        assert_eq!(base.invalidated_classes(&next), next.invalidated_classes(&base));
    }
}
