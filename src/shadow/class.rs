//! Shadow class definitions.
//!
//! A [`ShadowClass`] substitutes behavior for one real class. It is an explicit
//! registry entry: the implementation methods are Rust closures keyed by name and
//! parameter descriptor, each optionally gated to a range of SDK levels. Per-instance
//! state is created by a factory when a real instance gets its shadow.
//!
//! # Building Shadows
//!
//! ```rust,no_run
//! use shadowbox::shadow::ShadowClass;
//! use shadowbox::runtime::Value;
//!
//! #[derive(Default)]
//! struct Counter {
//!     calls: i32,
//! }
//!
//! let shadow = ShadowClass::builder("com.example.ShadowFoo", "com/example/Foo")
//!     .state(Counter::default)
//!     .method("count", "()I", |call| {
//!         call.with_state(|counter: &mut Counter| {
//!             counter.calls += 1;
//!             Value::Int(counter.calls)
//!         })
//!     })
//!     .build()?;
//! # Ok::<(), shadowbox::Error>(())
//! ```
//!
//! # Method Matching
//!
//! A real method matches an implementation method with the same name, the same
//! parameter descriptor and the same static-ness; return types are not compared.
//! Among matches, methods outside the active SDK range are skipped and the first
//! declared remaining method wins. Shadows built with
//! [`ShadowClassBuilder::loose_signatures`] also match implementation methods of
//! the same arity whose parameters are all `java.lang.Object`.

use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use bitflags::bitflags;
use log::warn;

use crate::{
    classfile::{FieldType, MethodDescriptor},
    runtime::Value,
    shadow::{ShadowCall, ShadowInfo},
    Error, Result,
};

bitflags! {
    /// Behavior switches of a shadow class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct ShadowFlags: u8 {
        /// Unshadowed methods run the real body instead of returning a default value.
        const CALL_THROUGH_BY_DEFAULT = 0x01;
        /// Implementation methods taking only `Object` parameters match any real method of the same arity.
        const LOOSE_SIGNATURES = 0x02;
        /// Unshadowed native methods call through to the native call handler.
        const CALL_NATIVE_METHODS_BY_DEFAULT = 0x04;
        /// Method lookup continues in the shadow superclass even when it shadows a different real class.
        const INHERIT_IMPLEMENTATION_METHODS = 0x08;
        /// Shadow instances keep a back-reference to their real object.
        const REAL_OBJECT = 0x10;
    }
}

/// Body of an implementation method.
pub type ShadowFn = Arc<dyn Fn(&mut ShadowCall<'_>) -> Result<Value> + Send + Sync>;

static NEXT_SHADOW_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one built shadow class.
///
/// Every [`ShadowClassBuilder::build`] yields a fresh id, so two shadows with the
/// same name and methods but different closures never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowId(pub u64);

/// Creates the per-instance state of a shadow class.
pub type StateFactory = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// An inclusive SDK range; `None` bounds are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct SdkRange {
    /// Lowest supported SDK level.
    pub min: Option<u32>,
    /// Highest supported SDK level.
    pub max: Option<u32>,
}

impl SdkRange {
    /// The range covering every SDK level.
    pub const ALL: SdkRange = SdkRange { min: None, max: None };

    /// Returns `true` if `sdk` lies inside the range.
    #[must_use]
    pub fn contains(&self, sdk: u32) -> bool {
        self.min.is_none_or(|min| sdk >= min) && self.max.is_none_or(|max| sdk <= max)
    }

    fn overlaps(&self, other: &SdkRange) -> bool {
        let low = self.min.unwrap_or(0).max(other.min.unwrap_or(0));
        let high = self.max.unwrap_or(u32::MAX).min(other.max.unwrap_or(u32::MAX));
        low <= high
    }
}

/// A substitute for one real method.
pub struct ImplementationMethod {
    name: String,
    descriptor: String,
    parameters: Vec<FieldType>,
    is_static: bool,
    sdk: SdkRange,
    body: ShadowFn,
}

impl ImplementationMethod {
    /// Method name (`__constructor__` for constructors, `__staticInitializer__` for
    /// the static initializer).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full descriptor as declared.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Parameter types.
    #[must_use]
    pub fn parameters(&self) -> &[FieldType] {
        &self.parameters
    }

    /// Returns `true` for static implementation methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// SDK levels this method applies to.
    #[must_use]
    pub fn sdk(&self) -> SdkRange {
        self.sdk
    }

    /// The body.
    #[must_use]
    pub fn body(&self) -> &ShadowFn {
        &self.body
    }

    fn matches_exactly(&self, name: &str, parameters: &[FieldType], is_static: bool) -> bool {
        self.name == name && self.is_static == is_static && self.parameters == parameters
    }

    fn matches_loosely(&self, name: &str, parameters: &[FieldType], is_static: bool) -> bool {
        self.name == name
            && self.is_static == is_static
            && self.parameters.len() == parameters.len()
            && self.parameters.iter().all(FieldType::is_java_lang_object)
    }
}

impl fmt::Debug for ImplementationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationMethod")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("is_static", &self.is_static)
            .field("sdk", &self.sdk)
            .finish_non_exhaustive()
    }
}

/// A shadow class: substitute behavior and state for instances of one real class.
pub struct ShadowClass {
    id: ShadowId,
    name: String,
    real_name: String,
    super_shadow: Option<Arc<ShadowClass>>,
    sdk: SdkRange,
    flags: ShadowFlags,
    state: Option<StateFactory>,
    methods: Vec<Arc<ImplementationMethod>>,
    overlap_reported: AtomicBool,
}

impl ShadowClass {
    /// Starts a shadow named `name` for the real class `real_name`.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the shadow, used in stack traces and diagnostics
    /// * `real_name` - Real class, internal (`a/b/C`) or dotted (`a.b.C`) form
    #[must_use]
    pub fn builder(name: &str, real_name: &str) -> ShadowClassBuilder {
        ShadowClassBuilder {
            name: name.to_string(),
            real_name: real_name.replace('.', "/"),
            super_shadow: None,
            sdk: SdkRange::ALL,
            flags: ShadowFlags::empty(),
            state: None,
            methods: Vec::new(),
        }
    }

    /// Identity of this shadow.
    #[must_use]
    pub fn id(&self) -> ShadowId {
        self.id
    }

    /// Shadow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Internal name of the shadowed class.
    #[must_use]
    pub fn real_name(&self) -> &str {
        &self.real_name
    }

    /// The shadow this shadow extends.
    #[must_use]
    pub fn super_shadow(&self) -> Option<&Arc<ShadowClass>> {
        self.super_shadow.as_ref()
    }

    /// SDK levels the whole shadow applies to.
    #[must_use]
    pub fn sdk(&self) -> SdkRange {
        self.sdk
    }

    /// Returns `true` if the shadow applies at `sdk`.
    #[must_use]
    pub fn supports_sdk(&self, sdk: u32) -> bool {
        self.sdk.contains(sdk)
    }

    /// Behavior switches.
    #[must_use]
    pub fn flags(&self) -> ShadowFlags {
        self.flags
    }

    /// Declared implementation methods, in declaration order.
    #[must_use]
    pub fn methods(&self) -> &[Arc<ImplementationMethod>] {
        &self.methods
    }

    /// This shadow followed by its super shadows.
    pub fn hierarchy(self: &Arc<Self>) -> impl Iterator<Item = Arc<ShadowClass>> {
        std::iter::successors(Some(Arc::clone(self)), |shadow| shadow.super_shadow.clone())
    }

    pub(crate) fn create_state(&self) -> Option<Box<dyn Any + Send>> {
        self.state.as_ref().map(|factory| factory())
    }

    /// Static facts about this shadow.
    #[must_use]
    pub fn info(&self) -> ShadowInfo {
        ShadowInfo::of(self)
    }

    /// Finds the implementation method this class declares for a real method.
    ///
    /// # Arguments
    ///
    /// * `name` - Real method name
    /// * `parameters` - Real parameter types
    /// * `is_static` - Whether the real method is static
    /// * `sdk` - Active SDK level
    /// * `loose` - Whether loose signature matching is permitted
    #[must_use]
    pub fn find_declared(
        &self,
        name: &str,
        parameters: &[FieldType],
        is_static: bool,
        sdk: u32,
        loose: bool,
    ) -> Option<Arc<ImplementationMethod>> {
        let exact: Vec<&Arc<ImplementationMethod>> = self
            .methods
            .iter()
            .filter(|m| m.matches_exactly(name, parameters, is_static))
            .collect();
        if exact.len() > 1 {
            self.report_overlap(&exact);
        }
        let found = exact.into_iter().find(|m| m.sdk.contains(sdk)).cloned();
        if found.is_some() || !loose || !self.flags.contains(ShadowFlags::LOOSE_SIGNATURES) {
            return found;
        }
        self.methods
            .iter()
            .find(|m| m.matches_loosely(name, parameters, is_static) && m.sdk.contains(sdk))
            .cloned()
    }

    fn report_overlap(&self, candidates: &[&Arc<ImplementationMethod>]) {
        let overlapping = candidates.iter().enumerate().any(|(i, a)| {
            candidates[i + 1..]
                .iter()
                .any(|b| a.sdk.overlaps(&b.sdk))
        });
        if overlapping && !self.overlap_reported.swap(true, Ordering::Relaxed) {
            warn!(
                "{} declares overlapping SDK ranges for {}{}; the first declared method wins",
                self.name, candidates[0].name, candidates[0].descriptor
            );
        }
    }
}

impl fmt::Debug for ShadowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowClass")
            .field("name", &self.name)
            .field("real_name", &self.real_name)
            .field("sdk", &self.sdk)
            .field("flags", &self.flags)
            .field("methods", &self.methods.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ShadowClass`].
pub struct ShadowClassBuilder {
    name: String,
    real_name: String,
    super_shadow: Option<Arc<ShadowClass>>,
    sdk: SdkRange,
    flags: ShadowFlags,
    state: Option<StateFactory>,
    methods: Vec<(String, String, bool, SdkRange, ShadowFn)>,
}

impl ShadowClassBuilder {
    /// Declares the super shadow, whose state is created alongside this shadow's
    /// and whose methods are inherited under the rules of
    /// [`ShadowFlags::INHERIT_IMPLEMENTATION_METHODS`].
    #[must_use]
    pub fn extends(mut self, super_shadow: &Arc<ShadowClass>) -> Self {
        self.super_shadow = Some(Arc::clone(super_shadow));
        self
    }

    /// Restricts the whole shadow to an SDK range.
    #[must_use]
    pub fn sdk_range(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.sdk = SdkRange { min, max };
        self
    }

    /// Unshadowed methods run the real code.
    #[must_use]
    pub fn call_through_by_default(mut self) -> Self {
        self.flags |= ShadowFlags::CALL_THROUGH_BY_DEFAULT;
        self
    }

    /// Enables loose signature matching.
    #[must_use]
    pub fn loose_signatures(mut self) -> Self {
        self.flags |= ShadowFlags::LOOSE_SIGNATURES;
        self
    }

    /// Unshadowed native methods call through to the native call handler.
    #[must_use]
    pub fn call_native_methods_by_default(mut self) -> Self {
        self.flags |= ShadowFlags::CALL_NATIVE_METHODS_BY_DEFAULT;
        self
    }

    /// Inherits implementation methods from the super shadow even when it shadows
    /// a different real class.
    #[must_use]
    pub fn inherit_implementation_methods(mut self) -> Self {
        self.flags |= ShadowFlags::INHERIT_IMPLEMENTATION_METHODS;
        self
    }

    /// Gives shadow instances a back-reference to their real object.
    #[must_use]
    pub fn real_object(mut self) -> Self {
        self.flags |= ShadowFlags::REAL_OBJECT;
        self
    }

    /// Sets the factory for per-instance state.
    #[must_use]
    pub fn state<S, F>(mut self, factory: F) -> Self
    where
        S: Any + Send,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.state = Some(Arc::new(move || Box::new(factory()) as Box<dyn Any + Send>));
        self
    }

    /// Adds an instance implementation method.
    #[must_use]
    pub fn method<F>(self, name: &str, descriptor: &str, body: F) -> Self
    where
        F: Fn(&mut ShadowCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.push(name, descriptor, false, SdkRange::ALL, Arc::new(body))
    }

    /// Adds a static implementation method.
    #[must_use]
    pub fn static_method<F>(self, name: &str, descriptor: &str, body: F) -> Self
    where
        F: Fn(&mut ShadowCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.push(name, descriptor, true, SdkRange::ALL, Arc::new(body))
    }

    /// Adds an instance implementation method that applies only between `min` and
    /// `max` (inclusive).
    #[must_use]
    pub fn method_in_sdk<F>(
        self,
        name: &str,
        descriptor: &str,
        min: Option<u32>,
        max: Option<u32>,
        body: F,
    ) -> Self
    where
        F: Fn(&mut ShadowCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.push(name, descriptor, false, SdkRange { min, max }, Arc::new(body))
    }

    fn push(mut self, name: &str, descriptor: &str, is_static: bool, sdk: SdkRange, body: ShadowFn) -> Self {
        self.methods
            .push((name.to_string(), descriptor.to_string(), is_static, sdk, body));
        self
    }

    /// Finishes the shadow.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for an invalid method descriptor and
    /// [`Error::Configuration`] for an empty SDK range.
    pub fn build(self) -> Result<Arc<ShadowClass>> {
        let mut methods = Vec::with_capacity(self.methods.len());
        for (name, descriptor, is_static, sdk, body) in self.methods {
            if let (Some(min), Some(max)) = (sdk.min, sdk.max) {
                if min > max {
                    return Err(Error::Configuration(format!(
                        "{}.{}{} has an empty SDK range {min}..={max}",
                        self.name, name, descriptor
                    )));
                }
            }
            let parsed = MethodDescriptor::parse(&descriptor)?;
            methods.push(Arc::new(ImplementationMethod {
                name,
                descriptor,
                parameters: parsed.parameters,
                is_static,
                sdk,
                body,
            }));
        }
        Ok(Arc::new(ShadowClass {
            id: ShadowId(NEXT_SHADOW_ID.fetch_add(1, Ordering::Relaxed)),
            name: self.name,
            real_name: self.real_name,
            super_shadow: self.super_shadow,
            sdk: self.sdk,
            flags: self.flags,
            state: self.state,
            methods,
            overlap_reported: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: i32) -> impl Fn(&mut ShadowCall<'_>) -> Result<Value> + Send + Sync {
        move |_| Ok(Value::Int(value))
    }

    #[test]
    fn test_sdk_range() {
        let range = SdkRange {
            min: Some(21),
            max: Some(28),
        };
        assert!(range.contains(21));
        assert!(range.contains(28));
        assert!(!range.contains(29));
        assert!(SdkRange::ALL.contains(0));
    }

    #[test]
    fn test_first_in_range_wins() {
        let shadow = ShadowClass::builder("ShadowFoo", "com.example.Foo")
            .method_in_sdk("size", "()I", None, Some(20), constant(1))
            .method_in_sdk("size", "()I", Some(21), None, constant(2))
            .build()
            .unwrap();
        assert_eq!(shadow.real_name(), "com/example/Foo");
        let old = shadow.find_declared("size", &[], false, 19, false).unwrap();
        let new = shadow.find_declared("size", &[], false, 30, false).unwrap();
        assert_eq!(old.sdk().max, Some(20));
        assert_eq!(new.sdk().min, Some(21));
        assert!(shadow.find_declared("size", &[], true, 30, false).is_none());
    }

    #[test]
    fn test_loose_signatures_need_flag_and_policy() {
        let strict = ShadowClass::builder("ShadowFoo", "com/example/Foo")
            .method("put", "(Ljava/lang/Object;Ljava/lang/Object;)V", constant(0))
            .build()
            .unwrap();
        let params = [FieldType::Int, FieldType::object("java/lang/String")];
        assert!(strict.find_declared("put", &params, false, 30, true).is_none());

        let loose = ShadowClass::builder("ShadowFoo", "com/example/Foo")
            .loose_signatures()
            .method("put", "(Ljava/lang/Object;Ljava/lang/Object;)V", constant(0))
            .build()
            .unwrap();
        assert!(loose.find_declared("put", &params, false, 30, true).is_some());
        assert!(loose.find_declared("put", &params, false, 30, false).is_none());
        assert!(loose.find_declared("put", &params[..1], false, 30, true).is_none());
    }

    #[test]
    fn test_empty_range_is_rejected() {
        let result = ShadowClass::builder("ShadowFoo", "com/example/Foo")
            .method_in_sdk("size", "()I", Some(30), Some(20), constant(0))
            .build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
