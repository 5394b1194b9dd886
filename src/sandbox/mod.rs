//! Sandboxes: the unit of isolation.
//!
//! A [`Sandbox`] combines one [`SandboxClassLoader`], one [`ShadowMap`] and one
//! [`ClassHandler`]. Classes acquired by a sandbox exist only inside it, so static
//! state never leaks from one sandbox to another. Building a sandbox is cheap but
//! every acquired class is instrumented again on first use, which is why
//! [`SandboxManager`] reuses sandboxes whose configuration is unchanged.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shadowbox::{
//!     config::InstrumentationConfiguration,
//!     loader::DirectoryBytesProvider,
//!     runtime::Value,
//!     shadow::{ShadowClass, ShadowMap},
//!     Sandbox,
//! };
//!
//! let shadow = ShadowClass::builder("ShadowFoo", "com.example.Foo")
//!     .method("getName", "()Ljava/lang/String;", |call| call.new_string("shadowed"))
//!     .build()?;
//! let sandbox = Sandbox::builder()
//!     .instrumentation(
//!         InstrumentationConfiguration::builder()
//!             .add_instrumented_package("com.example.")
//!             .build(),
//!     )
//!     .shadow_map(ShadowMap::builder().add_shadow_class(shadow).build())
//!     .bytes_provider(Arc::new(DirectoryBytesProvider::new("build/classes")))
//!     .build()?;
//!
//! let foo = sandbox.new_instance("com.example.Foo", "()V", vec![])?;
//! let name = sandbox.invoke_virtual(&foo, "getName", "()Ljava/lang/String;", vec![])?;
//! assert_eq!(name.as_str(), Some("shadowed"));
//! # Ok::<(), shadowbox::Error>(())
//! ```

mod config;
mod manager;

pub use config::{
    NativeCallConfig, SandboxConfig, DEFAULT_SDK, DUMP_CLASSES_DIRECTORY_VAR, NATIVE_EXEMPTIONS_VAR,
    NATIVE_MODE_VAR,
};
pub use manager::{SandboxManager, SandboxRequest};

use std::sync::Arc;

use log::debug;

use crate::{
    classfile::descriptor::internal_name,
    config::InstrumentationConfiguration,
    instrument::{direct_method_name, STATIC_INITIALIZER_METHOD_NAME},
    loader::{ClassBytesProvider, ClassLoader, MapBytesProvider, SandboxClassLoader, SystemClassLoader},
    runtime::{
        ClassHandler, Interceptor, Interceptors, Interpreter, NativeCallHandler, ObjectRef, RuntimeClass,
        SandboxClock, ShadowWrangler, Value, WranglerOptions,
    },
    shadow::{ShadowInstance, ShadowMap},
    Result,
};

/// An isolated class namespace with its shadow bindings.
pub struct Sandbox {
    config: SandboxConfig,
    instrumentation: Arc<InstrumentationConfiguration>,
    shadow_map: ShadowMap,
    loader: Arc<SandboxClassLoader>,
    handler: Arc<dyn ClassHandler>,
    native_calls: NativeCallHandler,
    clock: SandboxClock,
}

impl Sandbox {
    /// Starts configuring a sandbox.
    #[must_use]
    pub fn builder() -> SandboxBuilder {
        SandboxBuilder::new()
    }

    /// Settings this sandbox was built with.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The acquisition and instrumentation rules, intercepted methods included.
    #[must_use]
    pub fn instrumentation(&self) -> &Arc<InstrumentationConfiguration> {
        &self.instrumentation
    }

    /// The active shadow map.
    #[must_use]
    pub fn shadow_map(&self) -> &ShadowMap {
        &self.shadow_map
    }

    /// The instrumenting loader.
    #[must_use]
    pub fn loader(&self) -> &Arc<SandboxClassLoader> {
        &self.loader
    }

    /// The parent loader.
    #[must_use]
    pub fn system_loader(&self) -> &Arc<SystemClassLoader> {
        self.loader.parent()
    }

    /// The handler every instrumented call is dispatched to.
    #[must_use]
    pub fn class_handler(&self) -> &Arc<dyn ClassHandler> {
        &self.handler
    }

    /// The native call handler.
    #[must_use]
    pub fn native_calls(&self) -> &NativeCallHandler {
        &self.native_calls
    }

    /// The deterministic clock behind `System.nanoTime` and `System.currentTimeMillis`.
    #[must_use]
    pub fn clock(&self) -> &SandboxClock {
        &self.clock
    }

    /// An interpreter for the calling thread.
    #[must_use]
    pub fn interpreter(self: &Arc<Self>) -> Interpreter {
        Interpreter::new(Arc::clone(self))
    }

    /// Loads a class by dotted or internal name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ClassNotFound`] when no bytes exist for the class, or
    /// the failure of an earlier attempt.
    pub fn load_class(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        self.loader.load_class(&internal_name(name))
    }

    /// Creates an instance of `class_name` with the constructor of `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns the exception the constructor throws, or a loading error.
    pub fn new_instance(self: &Arc<Self>, class_name: &str, descriptor: &str, args: Vec<Value>) -> Result<ObjectRef> {
        let class = self.load_class(class_name)?;
        self.interpreter().construct(&class, descriptor, args)
    }

    /// Invokes a static method.
    ///
    /// # Errors
    ///
    /// Returns the exception the method throws, or a loading error.
    pub fn invoke_static(
        self: &Arc<Self>,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let class = self.load_class(class_name)?;
        self.interpreter().invoke_static(&class, name, descriptor, args)
    }

    /// Invokes an instance method with virtual dispatch.
    ///
    /// # Errors
    ///
    /// Returns the exception the method throws.
    pub fn invoke_virtual(
        self: &Arc<Self>,
        receiver: &ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        self.interpreter().invoke_virtual(receiver, name, descriptor, args)
    }

    /// Invokes the original body of a method of an instrumented class, bypassing
    /// the dispatch core. `receiver` is `None` for static methods.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchMethodError` when the class has no direct method of
    /// that name, or the exception the body throws.
    pub fn invoke_direct(
        self: &Arc<Self>,
        class_name: &str,
        receiver: Option<&ObjectRef>,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let class = self.load_class(class_name)?;
        let direct = direct_method_name(class.name(), name);
        let mut interp = self.interpreter();
        match receiver {
            Some(receiver) => interp.invoke_special(&class, receiver, &direct, descriptor, args),
            None => interp.invoke_static(&class, &direct, descriptor, args),
        }
    }

    /// Reads an instance field.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchFieldError` when the field does not exist.
    pub fn get_field(self: &Arc<Self>, object: &ObjectRef, name: &str) -> Result<Value> {
        self.interpreter().get_field(object, name)
    }

    /// Writes an instance field.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchFieldError` when the field does not exist.
    pub fn set_field(self: &Arc<Self>, object: &ObjectRef, name: &str, value: Value) -> Result<()> {
        self.interpreter().set_field(object, name, value)
    }

    /// Reads a static field, initializing its class first.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchFieldError` when the field does not exist, or the
    /// exception static initialization throws.
    pub fn get_static(self: &Arc<Self>, class_name: &str, name: &str) -> Result<Value> {
        let class = self.load_class(class_name)?;
        self.interpreter().get_static(&class, name)
    }

    /// Writes a static field, initializing its class first.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchFieldError` when the field does not exist, or the
    /// exception static initialization throws.
    pub fn set_static(self: &Arc<Self>, class_name: &str, name: &str, value: Value) -> Result<()> {
        let class = self.load_class(class_name)?;
        self.interpreter().set_static(&class, name, value)
    }

    /// Creates a `java.lang.String`.
    ///
    /// # Errors
    ///
    /// Fails only if the host library is broken.
    pub fn new_string(&self, value: &str) -> Result<Value> {
        Ok(Value::Ref(self.system_loader().new_string(value)?))
    }

    /// The shadow instance bound to `instance`, created on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the class handler cannot create the shadow instance.
    pub fn extract_shadow(self: &Arc<Self>, instance: &ObjectRef) -> Result<Option<Arc<ShadowInstance>>> {
        let handler = Arc::clone(&self.handler);
        handler.shadow_of(&mut self.interpreter(), instance)
    }

    /// Runs the original static initializer of an instrumented class once more,
    /// initializing the class first if needed. Shadows use this to restore static
    /// state their own static initializer replaced.
    ///
    /// # Errors
    ///
    /// Returns the exception the initializer throws.
    pub fn perform_static_initialization(self: &Arc<Self>, class_name: &str) -> Result<()> {
        let class = self.load_class(class_name)?;
        let mut interp = self.interpreter();
        interp.ensure_initialized(&class)?;
        if let Some(initializer) = class.declared_method(STATIC_INITIALIZER_METHOD_NAME, "()V") {
            let initializer = Arc::clone(initializer);
            interp.invoke(&class, &initializer, Vec::new())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("sdk", &self.config.sdk)
            .field("shadow_map", &self.shadow_map)
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Sandbox`].
///
/// Unless given, the parent loader is a fresh [`SystemClassLoader`], the bytes
/// provider is empty, the interceptors are [`Interceptors::builtin`], and the class
/// handler is a [`ShadowWrangler`] over the shadow map.
pub struct SandboxBuilder {
    instrumentation: InstrumentationConfiguration,
    shadow_map: ShadowMap,
    config: SandboxConfig,
    provider: Option<Arc<dyn ClassBytesProvider>>,
    parent: Option<Arc<SystemClassLoader>>,
    parent_provider: Option<Arc<dyn ClassBytesProvider>>,
    handler: Option<Arc<dyn ClassHandler>>,
    interceptors: Interceptors,
}

impl Default for SandboxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxBuilder {
    /// A builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        SandboxBuilder {
            instrumentation: InstrumentationConfiguration::default(),
            shadow_map: ShadowMap::empty(),
            config: SandboxConfig::default(),
            provider: None,
            parent: None,
            parent_provider: None,
            handler: None,
            interceptors: Interceptors::builtin(),
        }
    }

    /// Sets the acquisition and instrumentation rules.
    #[must_use]
    pub fn instrumentation(mut self, instrumentation: InstrumentationConfiguration) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    /// Sets the shadow map.
    #[must_use]
    pub fn shadow_map(mut self, shadow_map: ShadowMap) -> Self {
        self.shadow_map = shadow_map;
        self
    }

    /// Sets the SDK level, overriding the one in the [`SandboxConfig`].
    #[must_use]
    pub fn sdk(mut self, sdk: u32) -> Self {
        self.config.sdk = sdk;
        self
    }

    /// Sets all settings.
    #[must_use]
    pub fn config(mut self, config: SandboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the provider of acquired class bytes.
    #[must_use]
    pub fn bytes_provider(mut self, provider: Arc<dyn ClassBytesProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Uses an existing parent loader, sharing host classes with other sandboxes.
    #[must_use]
    pub fn parent_loader(mut self, parent: Arc<SystemClassLoader>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the provider a fresh parent loader serves unacquired classes from.
    /// Ignored when a parent loader is given.
    #[must_use]
    pub fn parent_bytes_provider(mut self, provider: Arc<dyn ClassBytesProvider>) -> Self {
        self.parent_provider = Some(provider);
        self
    }

    /// Replaces the shadow-routing class handler.
    #[must_use]
    pub fn class_handler(mut self, handler: Arc<dyn ClassHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Replaces the interceptors.
    #[must_use]
    pub fn interceptors(mut self, interceptors: Interceptors) -> Self {
        self.interceptors = interceptors;
        self
    }

    /// Adds an interceptor ahead of the configured ones.
    #[must_use]
    pub fn interceptor(mut self, interceptor: Interceptor) -> Self {
        self.interceptors = self.interceptors.with_priority(interceptor);
        self
    }

    /// Builds the sandbox.
    ///
    /// Methods covered by the interceptors are added to the intercepted methods of
    /// the instrumentation rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the host library cannot be defined or the native call
    /// exemption file cannot be read.
    pub fn build(self) -> Result<Arc<Sandbox>> {
        let parent = match self.parent {
            Some(parent) => parent,
            None => SystemClassLoader::new(self.parent_provider)?,
        };
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(MapBytesProvider::new()));
        let instrumentation = Arc::new(
            self.instrumentation
                .to_builder()
                .add_intercepted_methods(self.interceptors.method_refs())
                .build(),
        );
        let native_calls = NativeCallHandler::new(
            self.config.native_calls.mode,
            self.config.native_calls.exemptions_file.clone(),
        )?;
        let loader = SandboxClassLoader::new(
            Arc::clone(&instrumentation),
            self.config.native_calls.mode,
            provider,
            parent,
            self.config.dump_classes_directory.clone(),
        );
        let handler = match self.handler {
            Some(handler) => handler,
            None => Arc::new(ShadowWrangler::new(
                self.shadow_map.clone(),
                WranglerOptions {
                    sdk: self.config.sdk,
                    unshadowed_behavior: self.config.unshadowed_behavior,
                    loose_signatures: self.config.loose_signatures,
                    plan_cache_capacity: self.config.plan_cache_capacity,
                },
                self.interceptors,
            )),
        };
        debug!(
            "Built sandbox for SDK {} with {} shadowed classes",
            self.config.sdk,
            self.shadow_map.len()
        );
        Ok(Arc::new(Sandbox {
            config: self.config,
            instrumentation,
            shadow_map: self.shadow_map,
            loader,
            handler,
            native_calls,
            clock: SandboxClock::default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        runtime::{NativeCallMode, ShadowWrangler},
        test::{class_bytes, counter_class_bytes},
    };

    fn sandbox() -> Arc<Sandbox> {
        let provider = MapBytesProvider::new()
            .with_class("com/example/Foo", class_bytes("com/example/Foo"))
            .with_class("com/example/Counter", counter_class_bytes());
        Sandbox::builder()
            .instrumentation(
                InstrumentationConfiguration::builder()
                    .add_instrumented_package("com.example.")
                    .build(),
            )
            .bytes_provider(Arc::new(provider))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_merges_interceptor_refs() {
        let sandbox = sandbox();
        assert!(sandbox
            .instrumentation()
            .is_intercepted("java.lang.System", "nanoTime"));
        assert_eq!(sandbox.native_calls().mode(), NativeCallMode::Legacy);
    }

    #[test]
    fn test_two_sandboxes_do_not_share_acquired_classes() {
        let a = sandbox();
        let b = sandbox();
        let foo_a = a.load_class("com.example.Foo").unwrap();
        let foo_b = b.load_class("com.example.Foo").unwrap();
        assert!(!Arc::ptr_eq(&foo_a, &foo_b));
        assert_eq!(foo_a.name(), foo_b.name());
    }

    #[test]
    fn test_unshadowed_instance_methods_return_defaults() {
        let sandbox = sandbox();
        let counter = sandbox.new_instance("com.example.Counter", "()V", vec![]).unwrap();
        sandbox
            .invoke_virtual(&counter, "increment", "()V", vec![])
            .unwrap();
        let count = sandbox.invoke_virtual(&counter, "get", "()I", vec![]).unwrap();
        assert_eq!(count, Value::Int(0));

        sandbox
            .invoke_direct("com.example.Counter", Some(&counter), "increment", "()V", vec![])
            .unwrap();
        let direct = sandbox
            .invoke_direct("com.example.Counter", Some(&counter), "get", "()I", vec![])
            .unwrap();
        assert_eq!(direct, Value::Int(1));
        assert_eq!(sandbox.get_field(&counter, "count").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_custom_class_handler_is_used() {
        let handler: Arc<dyn ClassHandler> = Arc::new(ShadowWrangler::new(
            ShadowMap::empty(),
            WranglerOptions {
                sdk: 21,
                unshadowed_behavior: crate::runtime::UnshadowedBehavior::CallRealCode,
                loose_signatures: crate::runtime::LooseSignaturePolicy::Reject,
                plan_cache_capacity: 4,
            },
            Interceptors::new(),
        ));
        let provider = MapBytesProvider::new().with_class("com/example/Counter", counter_class_bytes());
        let sandbox = Sandbox::builder()
            .instrumentation(
                InstrumentationConfiguration::builder()
                    .add_instrumented_package("com.example.")
                    .build(),
            )
            .bytes_provider(Arc::new(provider))
            .class_handler(Arc::clone(&handler))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(sandbox.class_handler(), &handler));

        let counter = sandbox.new_instance("com.example.Counter", "()V", vec![]).unwrap();
        sandbox.invoke_virtual(&counter, "increment", "()V", vec![]).unwrap();
        let count = sandbox.invoke_virtual(&counter, "get", "()I", vec![]).unwrap();
        assert_eq!(count, Value::Int(1));
    }
}
