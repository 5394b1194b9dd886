//! The dispatch core.
//!
//! Every instrumented stub ends up in a [`ClassHandler`] through the dispatch host
//! class. [`ShadowWrangler`] is the handler that routes calls to shadow classes:
//!
//! 1. `class_initializing` runs when an instrumented class is initialized and either
//!    runs the shadow's static initializer (deferring the original) or the original.
//! 2. `initializing` runs once per real instance, from its constructor chain, and
//!    binds the instance to a [`ShadowInstance`] of its most specific shadow.
//! 3. `method_invoked` resolves the [`Plan`] for a method signature. Plans are
//!    cached per signature; resolving the same signature on two threads at once is
//!    harmless and either result may be kept.
//! 4. `intercept` runs the interceptor for a call to a class the sandbox never
//!    acquires.
//! 5. `strip_stack_trace` removes dispatch frames from exceptions leaving a
//!    dispatched call.
//!
//! # Fallback policy
//!
//! When the shadow of the declaring class has no matching implementation method, or
//! there is no shadow at all, the plan is:
//!
//! | Method | Shadow bound | No shadow bound |
//! |--------|--------------|-----------------|
//! | native | real code if `call_native_methods_by_default`, else default value | real code (the native call handler) |
//! | other | real code if `call_through_by_default`, else default value | [`UnshadowedBehavior`] |

use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use strum::{Display, EnumIter, EnumString};

use crate::{
    classfile::FieldType,
    instrument::{native_stub_name, STATIC_INITIALIZER_METHOD_NAME},
    runtime::{
        class_value::ClassValueCache,
        exception::strip_stack_trace,
        intercept::{InterceptCall, Interceptors},
        interpreter::Interpreter,
        plan::{Plan, ShadowMethodPlan},
        JavaException, MethodSignature, ObjectRef, RuntimeClass, Value,
    },
    shadow::{ImplementationMethod, ShadowBindings, ShadowClass, ShadowFlags, ShadowInstance, ShadowMap},
    Result,
};

/// Default number of cached plans per handler.
pub const DEFAULT_PLAN_CACHE_CAPACITY: usize = 500;

/// What unshadowed methods of instrumented classes do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum UnshadowedBehavior {
    /// Return the default value of the return type.
    #[default]
    DoNothing,
    /// Run the original body.
    CallRealCode,
}

/// Whether shadows declaring loose signatures may match by arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LooseSignaturePolicy {
    /// Shadows with loose signatures match `Object`-only parameter lists of the same arity.
    #[default]
    Allow,
    /// Only exact parameter lists match.
    Reject,
}

/// Decision point for every instrumented call.
pub trait ClassHandler: Send + Sync {
    /// An instrumented class is being initialized.
    ///
    /// # Errors
    ///
    /// Returns the exception the initializer throws.
    fn class_initializing(&self, interp: &mut Interpreter, class: &Arc<RuntimeClass>) -> Result<()>;

    /// A real instance is being constructed; returns its shadow instance, if any.
    ///
    /// Must return the same shadow instance for every call with the same object.
    ///
    /// # Errors
    ///
    /// Returns an error if the shadow instance cannot be created.
    fn initializing(&self, interp: &mut Interpreter, instance: &ObjectRef) -> Result<Option<Arc<ShadowInstance>>>;

    /// The plan for calls of `signature` declared by `class`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an unparseable signature.
    fn method_invoked(&self, signature: &str, is_static: bool, class: &Arc<RuntimeClass>) -> Result<Arc<Plan>>;

    /// Runs the interceptor for a rewritten call site.
    ///
    /// # Errors
    ///
    /// Returns the exception the interceptor throws.
    fn intercept(
        &self,
        interp: &mut Interpreter,
        signature: &str,
        receiver: Option<ObjectRef>,
        args: Vec<Value>,
    ) -> Result<Value>;

    /// The shadow instance of `instance`, created on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the shadow instance cannot be created.
    fn shadow_of(&self, interp: &mut Interpreter, instance: &ObjectRef) -> Result<Option<Arc<ShadowInstance>>> {
        self.initializing(interp, instance)
    }

    /// Removes dispatch frames from an exception leaving a dispatched call.
    fn strip_stack_trace(&self, exception: JavaException) -> JavaException {
        strip_stack_trace(&exception);
        exception
    }
}

/// Settings of a [`ShadowWrangler`].
#[derive(Debug, Clone)]
pub struct WranglerOptions {
    /// Active SDK level.
    pub sdk: u32,
    /// Behavior of methods of classes without a shadow.
    pub unshadowed_behavior: UnshadowedBehavior,
    /// Loose signature matching.
    pub loose_signatures: LooseSignaturePolicy,
    /// Maximum number of cached plans.
    pub plan_cache_capacity: usize,
}

/// The shadow-routing [`ClassHandler`].
pub struct ShadowWrangler {
    shadow_map: ShadowMap,
    options: WranglerOptions,
    interceptors: Interceptors,
    bindings: Arc<ShadowBindings>,
    plans: DashMap<String, Arc<Plan>>,
    instance_shadows: ClassValueCache<Option<Arc<ShadowClass>>>,
}

impl ShadowWrangler {
    /// Creates a handler over `shadow_map`.
    #[must_use]
    pub fn new(shadow_map: ShadowMap, options: WranglerOptions, interceptors: Interceptors) -> Self {
        ShadowWrangler {
            shadow_map,
            options,
            interceptors,
            bindings: ShadowBindings::new(),
            plans: DashMap::new(),
            instance_shadows: ClassValueCache::new(),
        }
    }

    /// The shadow map.
    #[must_use]
    pub fn shadow_map(&self) -> &ShadowMap {
        &self.shadow_map
    }

    /// The bindings of real instances to shadow instances.
    #[must_use]
    pub fn bindings(&self) -> &Arc<ShadowBindings> {
        &self.bindings
    }

    /// Number of cached plans.
    #[must_use]
    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    /// The shadow instances of `class` get: the shadow bound to the nearest ancestor
    /// (the class itself included) that supports the active SDK.
    #[must_use]
    pub fn instance_shadow(&self, class: &Arc<RuntimeClass>) -> Option<Arc<ShadowClass>> {
        self.instance_shadows.get_or_compute(class, |class| {
            class
                .ancestors()
                .find_map(|ancestor| self.shadow_map.get_shadow(ancestor.name(), self.options.sdk))
        })
    }

    /// Finds the implementation method for a real method, starting at `shadow` and
    /// continuing into super shadows that shadow the same real class, or any super
    /// shadow when `shadow` inherits implementation methods.
    #[must_use]
    pub fn find_shadow_method(
        &self,
        shadow: &Arc<ShadowClass>,
        name: &str,
        parameters: &[FieldType],
        is_static: bool,
    ) -> Option<(Arc<ShadowClass>, Arc<ImplementationMethod>)> {
        let loose = self.options.loose_signatures == LooseSignaturePolicy::Allow;
        let inherit = shadow.flags().contains(ShadowFlags::INHERIT_IMPLEMENTATION_METHODS);
        let mut current = Some(Arc::clone(shadow));
        while let Some(level) = current {
            if !level.supports_sdk(self.options.sdk) {
                return None;
            }
            if let Some(method) = level.find_declared(name, parameters, is_static, self.options.sdk, loose) {
                return Some((level, method));
            }
            current = level
                .super_shadow()
                .filter(|s| inherit || s.real_name() == shadow.real_name())
                .cloned();
        }
        None
    }

    fn resolve(&self, signature: &str, is_static: bool, class: &Arc<RuntimeClass>) -> Result<Plan> {
        let signature = Arc::new(MethodSignature::parse(signature)?);
        let is_native = class
            .declared_method(&native_stub_name(&signature.method_name), &signature.descriptor)
            .is_some();

        let Some(shadow) = self.shadow_map.get_shadow(class.name(), self.options.sdk) else {
            return Ok(
                if is_native || self.options.unshadowed_behavior == UnshadowedBehavior::CallRealCode {
                    Plan::call_real_code(class, &signature)
                } else {
                    Plan::do_nothing(&signature)
                },
            );
        };

        if let Some((declaring, method)) =
            self.find_shadow_method(&shadow, &signature.method_name, &signature.parsed.parameters, is_static)
        {
            return Ok(Plan::Shadow(ShadowMethodPlan::new(
                declaring,
                method,
                Arc::clone(class),
                signature,
            )));
        }

        let call_through = if is_native {
            ShadowFlags::CALL_NATIVE_METHODS_BY_DEFAULT
        } else {
            ShadowFlags::CALL_THROUGH_BY_DEFAULT
        };
        Ok(if shadow.flags().contains(call_through) {
            Plan::call_real_code(class, &signature)
        } else {
            Plan::do_nothing(&signature)
        })
    }

    fn cache_plan(&self, signature: &str, plan: Arc<Plan>) {
        if self.plans.len() >= self.options.plan_cache_capacity {
            let evicted = self.plans.iter().next().map(|entry| entry.key().clone());
            if let Some(evicted) = evicted {
                self.plans.remove(&evicted);
            }
        }
        self.plans.insert(signature.to_string(), plan);
    }
}

impl ClassHandler for ShadowWrangler {
    fn class_initializing(&self, interp: &mut Interpreter, class: &Arc<RuntimeClass>) -> Result<()> {
        let shadow_initializer = self
            .shadow_map
            .get_shadow(class.name(), self.options.sdk)
            .and_then(|shadow| self.find_shadow_method(&shadow, STATIC_INITIALIZER_METHOD_NAME, &[], true));

        if let Some((shadow, method)) = shadow_initializer {
            debug!(
                "Running {}.{} instead of the static initializer of {}",
                shadow.name(),
                STATIC_INITIALIZER_METHOD_NAME,
                class.binary_name()
            );
            let signature = Arc::new(MethodSignature::parse(&format!(
                "{}/{}()V",
                class.name(),
                STATIC_INITIALIZER_METHOD_NAME
            ))?);
            let plan = Plan::Shadow(ShadowMethodPlan::new(shadow, method, Arc::clone(class), signature));
            plan.run(interp, self, None, Vec::new())?;
            return Ok(());
        }

        if let Some(initializer) = class.declared_method(STATIC_INITIALIZER_METHOD_NAME, "()V") {
            let initializer = Arc::clone(initializer);
            interp.invoke(class, &initializer, Vec::new())?;
        }
        Ok(())
    }

    fn initializing(&self, _: &mut Interpreter, instance: &ObjectRef) -> Result<Option<Arc<ShadowInstance>>> {
        if let Some(existing) = self.bindings.get(instance) {
            return Ok(Some(existing));
        }
        let Some(shadow) = self.instance_shadow(instance.class()) else {
            return Ok(None);
        };
        Ok(Some(self.bindings.get_or_create(instance, || {
            ShadowInstance::new(&shadow, instance)
        })))
    }

    fn method_invoked(&self, signature: &str, is_static: bool, class: &Arc<RuntimeClass>) -> Result<Arc<Plan>> {
        if let Some(plan) = self.plans.get(signature) {
            return Ok(Arc::clone(plan.value()));
        }
        let plan = Arc::new(self.resolve(signature, is_static, class)?);
        debug!("Resolved {} plan for {}: {:?}", plan.kind(), signature, plan);
        self.cache_plan(signature, Arc::clone(&plan));
        Ok(plan)
    }

    fn intercept(
        &self,
        interp: &mut Interpreter,
        signature: &str,
        receiver: Option<ObjectRef>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let signature = MethodSignature::parse(signature)?;
        let handler = self.interceptors.handler_for(&signature);
        handler(
            interp,
            InterceptCall {
                signature: &signature,
                receiver,
                args,
            },
        )
    }
}

impl std::fmt::Debug for ShadowWrangler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowWrangler")
            .field("options", &self.options)
            .field("shadow_map", &self.shadow_map)
            .field("cached_plans", &self.plans.len())
            .field("bound_instances", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use super::*;
    use crate::{
        loader::{ClassLoader, SystemClassLoader},
        runtime::ClassDefinition,
        test::plain_class,
    };

    fn subclass_of(name: &str, parent: &Arc<RuntimeClass>) -> Arc<RuntimeClass> {
        let loader: Weak<dyn ClassLoader> = Weak::<SystemClassLoader>::new();
        let mut definition = ClassDefinition::new(name, loader);
        definition.super_class = Some(Arc::clone(parent));
        RuntimeClass::new(definition)
    }

    fn wrangler(shadow_map: ShadowMap, capacity: usize) -> ShadowWrangler {
        ShadowWrangler::new(
            shadow_map,
            WranglerOptions {
                sdk: 34,
                unshadowed_behavior: UnshadowedBehavior::DoNothing,
                loose_signatures: LooseSignaturePolicy::Allow,
                plan_cache_capacity: capacity,
            },
            Interceptors::new(),
        )
    }

    fn shadow_map() -> ShadowMap {
        let shadow = ShadowClass::builder("ShadowView", "android.view.View")
            .method("getWidth", "()I", |_| Ok(Value::Int(320)))
            .build()
            .unwrap();
        ShadowMap::builder().add_shadow_class(shadow).build()
    }

    #[test]
    fn test_plans_are_cached_per_signature() {
        let handler = wrangler(shadow_map(), 16);
        let view = plain_class("android/view/View");

        let first = handler
            .method_invoked("android/view/View/getWidth()I", false, &view)
            .unwrap();
        let second = handler
            .method_invoked("android/view/View/getWidth()I", false, &view)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.kind(), "shadow");

        let missing = handler
            .method_invoked("android/view/View/getHeight()I", false, &view)
            .unwrap();
        assert_eq!(missing.kind(), "do-nothing");
        let again = handler
            .method_invoked("android/view/View/getHeight()I", false, &view)
            .unwrap();
        assert!(Arc::ptr_eq(&missing, &again));
        assert_eq!(handler.cached_plans(), 2);
    }

    #[test]
    fn test_plan_cache_is_bounded() {
        let handler = wrangler(ShadowMap::empty(), 2);
        let class = plain_class("com/example/Foo");
        for name in ["a", "b", "c", "d"] {
            handler
                .method_invoked(&format!("com/example/Foo/{name}()V"), true, &class)
                .unwrap();
        }
        assert_eq!(handler.cached_plans(), 2);
    }

    #[test]
    fn test_malformed_signature_is_an_error() {
        let handler = wrangler(ShadowMap::empty(), 2);
        let class = plain_class("com/example/Foo");
        assert!(handler.method_invoked("no-descriptor", false, &class).is_err());
        assert_eq!(handler.cached_plans(), 0);
    }

    #[test]
    fn test_instance_shadow_comes_from_nearest_ancestor() {
        let handler = wrangler(shadow_map(), 16);
        let view = plain_class("android/view/View");
        let button = subclass_of("android/widget/Button", &view);
        let custom = subclass_of("com/example/FancyButton", &button);

        let shadow = handler.instance_shadow(&custom).unwrap();
        assert_eq!(shadow.name(), "ShadowView");
        assert!(handler.instance_shadow(&plain_class("com/example/Other")).is_none());
    }

    #[test]
    fn test_declaring_class_without_shadow_gets_default_plan() {
        let handler = wrangler(shadow_map(), 16);
        let view = plain_class("android/view/View");
        let button = subclass_of("android/widget/Button", &view);

        // Plans bind to the shadow of the declaring class only.
        let plan = handler
            .method_invoked("android/widget/Button/getWidth()I", false, &button)
            .unwrap();
        assert_eq!(plan.kind(), "do-nothing");
    }
}
