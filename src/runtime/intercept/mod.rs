//! Interceptors for methods of classes the sandbox never acquires.
//!
//! Call sites in instrumented code that target an intercepted method are rewritten
//! to `Dispatch.intercept`, which looks up the [`Interceptor`] for the target
//! signature here and runs it instead of the target. Lookup never fails: a signature
//! without an interceptor gets a no-op that returns the default value of the
//! method's return type.
//!
//! # Resolution
//!
//! Interceptors are checked in registration order and the first whose
//! [`MethodRef`] covers the target class and method name wins. Interceptors added
//! with [`Interceptors::add`] therefore take precedence only over interceptors
//! registered after them; use [`Interceptors::with_priority`] to put one in front.

mod builtin;

use std::{fmt, sync::Arc};

use crate::{
    config::MethodRef,
    runtime::{interpreter::Interpreter, MethodSignature, ObjectRef, Value},
    Result,
};

/// An intercepted call.
#[derive(Debug)]
pub struct InterceptCall<'a> {
    /// Target method of the rewritten call site.
    pub signature: &'a MethodSignature,
    /// Receiver for instance methods.
    pub receiver: Option<ObjectRef>,
    /// Arguments without the receiver.
    pub args: Vec<Value>,
}

impl InterceptCall<'_> {
    /// The argument at `index`, or `void` when absent.
    #[must_use]
    pub fn arg(&self, index: usize) -> &Value {
        static VOID: Value = Value::Void;
        self.args.get(index).unwrap_or(&VOID)
    }

    /// The default value of the target's return type.
    #[must_use]
    pub fn default_return(&self) -> Value {
        Value::default_for(self.signature.parsed.return_type.as_ref())
    }
}

fn ignore(_: &mut Interpreter, call: InterceptCall<'_>) -> Result<Value> {
    Ok(call.default_return())
}

/// Body of an interceptor.
pub type InterceptFn = Arc<dyn Fn(&mut Interpreter, InterceptCall<'_>) -> Result<Value> + Send + Sync>;

/// A substitute for the methods one [`MethodRef`] covers.
#[derive(Clone)]
pub struct Interceptor {
    method: MethodRef,
    body: InterceptFn,
}

impl Interceptor {
    /// Creates an interceptor for `method`.
    pub fn new<F>(method: MethodRef, body: F) -> Self
    where
        F: Fn(&mut Interpreter, InterceptCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Interceptor {
            method,
            body: Arc::new(body),
        }
    }

    /// An interceptor that ignores the call and returns the default value.
    #[must_use]
    pub fn no_op(method: MethodRef) -> Self {
        Interceptor::new(method, ignore)
    }

    /// The methods this interceptor covers.
    #[must_use]
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// The body.
    #[must_use]
    pub fn body(&self) -> &InterceptFn {
        &self.body
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Interceptor").field(&self.method).finish()
    }
}

/// A fixed set of interceptors.
#[derive(Debug, Clone, Default)]
pub struct Interceptors {
    interceptors: Vec<Interceptor>,
}

impl Interceptors {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The interceptors shipped with the crate.
    #[must_use]
    pub fn builtin() -> Self {
        Interceptors {
            interceptors: builtin::interceptors(),
        }
    }

    /// The method references of [`Interceptors::builtin`], for
    /// [`crate::config::InstrumentationConfigurationBuilder::add_intercepted_methods`].
    #[must_use]
    pub fn all_method_refs() -> Vec<MethodRef> {
        Self::builtin().method_refs()
    }

    /// Appends an interceptor.
    #[must_use]
    pub fn add(mut self, interceptor: Interceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Inserts an interceptor ahead of every registered one.
    #[must_use]
    pub fn with_priority(mut self, interceptor: Interceptor) -> Self {
        self.interceptors.insert(0, interceptor);
        self
    }

    /// Method references of every registered interceptor.
    #[must_use]
    pub fn method_refs(&self) -> Vec<MethodRef> {
        self.interceptors.iter().map(|i| i.method.clone()).collect()
    }

    /// The interceptor covering `signature`.
    #[must_use]
    pub fn find(&self, signature: &MethodSignature) -> Option<&Interceptor> {
        let class_name = signature.binary_class_name();
        self.interceptors
            .iter()
            .find(|i| i.method.matches(&class_name, &signature.method_name))
    }

    /// The body to run for `signature`: its interceptor, or a no-op.
    #[must_use]
    pub fn handler_for(&self, signature: &MethodSignature) -> InterceptFn {
        match self.find(signature) {
            Some(interceptor) => Arc::clone(&interceptor.body),
            None => Arc::new(ignore),
        }
    }

    /// Number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns `true` if no interceptor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature(text: &str) -> MethodSignature {
        MethodSignature::parse(text).unwrap()
    }

    #[test]
    fn test_builtin_refs_cover_shipped_methods() {
        let refs = Interceptors::all_method_refs();
        assert!(refs.contains(&MethodRef::new("java.util.LinkedHashMap", "eldest")));
        assert!(refs.contains(&MethodRef::new("java.lang.System", "nanoTime")));
        assert!(refs.contains(&MethodRef::all_methods("android.view.IWindowSession")));
    }

    #[test]
    fn test_lookup_by_wildcard_and_name() {
        let interceptors = Interceptors::builtin();
        assert!(interceptors
            .find(&signature("android/view/FallbackEventHandler/preDispatchKeyEvent(Ljava/lang/Object;)V"))
            .is_some());
        assert!(interceptors
            .find(&signature("java/lang/System/nanoTime()J"))
            .is_some());
        assert!(interceptors
            .find(&signature("java/lang/System/gc()V"))
            .is_none());
    }

    #[test]
    fn test_priority_insertion() {
        let interceptors = Interceptors::builtin()
            .with_priority(Interceptor::no_op(MethodRef::all_methods("java.lang.System")));
        let found = interceptors
            .find(&signature("java/lang/System/nanoTime()J"))
            .unwrap();
        assert_eq!(found.method().method_name, "*");
    }
}
