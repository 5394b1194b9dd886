use std::sync::Arc;

use crate::{
    instrument::direct_method_name,
    runtime::{interpreter::Interpreter, MethodSignature, ObjectRef, RuntimeClass, Value},
    shadow::{ShadowClass, ShadowInstance},
    Error, Result,
};

/// Context handed to an implementation method.
///
/// Gives access to the receiver, the arguments, the shadow state of the receiver
/// and the interpreter, and can run the original ("real") body of the method.
pub struct ShadowCall<'a> {
    interp: &'a mut Interpreter,
    shadow: Arc<ShadowClass>,
    instance: Option<Arc<ShadowInstance>>,
    this: Option<ObjectRef>,
    real_class: Arc<RuntimeClass>,
    signature: Arc<MethodSignature>,
    args: Vec<Value>,
}

impl<'a> ShadowCall<'a> {
    pub(crate) fn new(
        interp: &'a mut Interpreter,
        shadow: Arc<ShadowClass>,
        instance: Option<Arc<ShadowInstance>>,
        this: Option<ObjectRef>,
        real_class: Arc<RuntimeClass>,
        signature: Arc<MethodSignature>,
        args: Vec<Value>,
    ) -> Self {
        ShadowCall {
            interp,
            shadow,
            instance,
            this,
            real_class,
            signature,
            args,
        }
    }

    /// The interpreter running the call.
    pub fn interp(&mut self) -> &mut Interpreter {
        self.interp
    }

    /// The shadow class declaring the running implementation method.
    #[must_use]
    pub fn shadow(&self) -> &Arc<ShadowClass> {
        &self.shadow
    }

    /// The shadow instance of the receiver; `None` for static calls.
    #[must_use]
    pub fn instance(&self) -> Option<&Arc<ShadowInstance>> {
        self.instance.as_ref()
    }

    /// The real receiver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Linkage`] for static calls.
    pub fn this(&self) -> Result<&ObjectRef> {
        self.this.as_ref().ok_or_else(|| {
            Error::Linkage(format!("{} is static and has no receiver", self.signature))
        })
    }

    /// The class declaring the real method.
    #[must_use]
    pub fn real_class(&self) -> &Arc<RuntimeClass> {
        &self.real_class
    }

    /// Signature of the real method.
    #[must_use]
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    /// Arguments, without the receiver.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The argument at `index`, or `void` when absent.
    #[must_use]
    pub fn arg(&self, index: usize) -> &Value {
        static VOID: Value = Value::Void;
        self.args.get(index).unwrap_or(&VOID)
    }

    /// The string contents of the argument at `index`; `None` for `null` or non-strings.
    #[must_use]
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.arg(index).as_str()
    }

    /// Runs `f` on the receiver's shadow state of type `S`.
    ///
    /// Every shadow in the receiver's shadow hierarchy owns its own state; the
    /// first one of type `S`, most derived first, is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for static calls and when no state of type
    /// `S` exists.
    pub fn with_state<S: 'static, R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R> {
        let Some(instance) = &self.instance else {
            return Err(Error::Configuration(format!(
                "{} is static and has no shadow state",
                self.signature
            )));
        };
        instance.with_state(f).ok_or_else(|| {
            Error::Configuration(format!(
                "{} has no state of type {}",
                instance.shadow().name(),
                std::any::type_name::<S>()
            ))
        })
    }

    /// Creates a `java.lang.String` value.
    ///
    /// # Errors
    ///
    /// Fails only if the host library is broken.
    pub fn new_string(&self, value: &str) -> Result<Value> {
        Ok(Value::Ref(self.interp.new_string(value)?))
    }

    /// Creates a Java exception of `class_name` (internal) to return as the error.
    pub fn throw_new(&self, class_name: &str, message: impl Into<String>) -> Error {
        self.interp.throw_new(class_name, message)
    }

    /// Runs the real body of the method with the original arguments.
    ///
    /// # Errors
    ///
    /// Returns the exception the real body throws.
    pub fn call_real(&mut self) -> Result<Value> {
        let args = self.args.clone();
        self.call_real_with(args)
    }

    /// Runs the real body of the method with `args` instead of the original arguments.
    ///
    /// # Errors
    ///
    /// Returns the exception the real body throws.
    pub fn call_real_with(&mut self, args: Vec<Value>) -> Result<Value> {
        let direct = direct_method_name(&self.signature.class_name, &self.signature.method_name);
        match &self.this {
            Some(this) => self.interp.invoke_special(
                &self.real_class,
                this,
                &direct,
                &self.signature.descriptor,
                args,
            ),
            None => self.interp.invoke_static(
                &self.real_class,
                &direct,
                &self.signature.descriptor,
                args,
            ),
        }
    }
}
