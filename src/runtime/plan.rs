//! Dispatch plans.
//!
//! A [`Plan`] is the resolved dispatch decision for one method signature. The class
//! handler resolves it once and caches it; every later call of the method just runs
//! the plan with its receiver and arguments.

use std::{fmt, sync::Arc};

use crate::{
    classfile::FieldType,
    instrument::direct_method_name,
    runtime::{
        handler::ClassHandler, interpreter::Interpreter, MethodSignature, ObjectRef, RuntimeClass,
        Value,
    },
    shadow::{ImplementationMethod, ShadowCall, ShadowClass},
    Result,
};

/// A plan implemented by a custom class handler.
pub type CustomPlanFn =
    Arc<dyn Fn(&mut Interpreter, Option<&ObjectRef>, Vec<Value>) -> Result<Value> + Send + Sync>;

/// What a dispatched call does.
#[derive(Clone)]
pub enum Plan {
    /// Run the original body, now in the direct method.
    CallRealCode(RealCodePlan),
    /// Return the default value of the return type without running anything.
    DoNothing(Option<FieldType>),
    /// Run a shadow implementation method.
    Shadow(ShadowMethodPlan),
    /// Run a handler-specific function.
    Custom(CustomPlanFn),
}

impl Plan {
    /// A plan running the direct method of `signature` in `class`.
    #[must_use]
    pub fn call_real_code(class: &Arc<RuntimeClass>, signature: &MethodSignature) -> Plan {
        Plan::CallRealCode(RealCodePlan {
            class: Arc::clone(class),
            direct_name: direct_method_name(&signature.class_name, &signature.method_name),
            descriptor: signature.descriptor.clone(),
        })
    }

    /// A plan returning the default value for the return type of `signature`.
    #[must_use]
    pub fn do_nothing(signature: &MethodSignature) -> Plan {
        Plan::DoNothing(signature.parsed.return_type.clone())
    }

    /// Short name of the plan kind, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Plan::CallRealCode(_) => "call-real-code",
            Plan::DoNothing(_) => "do-nothing",
            Plan::Shadow(_) => "shadow",
            Plan::Custom(_) => "custom",
        }
    }

    /// Runs the plan.
    ///
    /// # Arguments
    ///
    /// * `interp` - Interpreter of the calling thread
    /// * `handler` - Handler that resolved the plan, used to find shadow instances
    /// * `receiver` - Real receiver; `None` for static methods
    /// * `args` - Arguments without the receiver
    ///
    /// # Errors
    ///
    /// Returns the exception thrown by the real body or the shadow method.
    pub fn run(
        &self,
        interp: &mut Interpreter,
        handler: &dyn ClassHandler,
        receiver: Option<&ObjectRef>,
        args: Vec<Value>,
    ) -> Result<Value> {
        match self {
            Plan::CallRealCode(plan) => plan.run(interp, receiver, args),
            Plan::DoNothing(return_type) => Ok(Value::default_for(return_type.as_ref())),
            Plan::Shadow(plan) => plan.run(interp, handler, receiver, args),
            Plan::Custom(custom) => custom(interp, receiver, args),
        }
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::CallRealCode(plan) => f.debug_tuple("CallRealCode").field(plan).finish(),
            Plan::DoNothing(return_type) => f.debug_tuple("DoNothing").field(return_type).finish(),
            Plan::Shadow(plan) => f.debug_tuple("Shadow").field(plan).finish(),
            Plan::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Runs the direct method holding the original body.
#[derive(Clone)]
pub struct RealCodePlan {
    class: Arc<RuntimeClass>,
    direct_name: String,
    descriptor: String,
}

impl RealCodePlan {
    fn run(&self, interp: &mut Interpreter, receiver: Option<&ObjectRef>, args: Vec<Value>) -> Result<Value> {
        match receiver {
            Some(receiver) => {
                interp.invoke_special(&self.class, receiver, &self.direct_name, &self.descriptor, args)
            }
            None => interp.invoke_static(&self.class, &self.direct_name, &self.descriptor, args),
        }
    }
}

impl fmt::Debug for RealCodePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class.binary_name(), self.direct_name, self.descriptor)
    }
}

/// Runs an implementation method of a shadow class.
#[derive(Clone)]
pub struct ShadowMethodPlan {
    shadow: Arc<ShadowClass>,
    method: Arc<ImplementationMethod>,
    real_class: Arc<RuntimeClass>,
    signature: Arc<MethodSignature>,
}

impl ShadowMethodPlan {
    /// A plan running `method` of `shadow` for calls of `signature` declared by `real_class`.
    #[must_use]
    pub fn new(
        shadow: Arc<ShadowClass>,
        method: Arc<ImplementationMethod>,
        real_class: Arc<RuntimeClass>,
        signature: Arc<MethodSignature>,
    ) -> Self {
        ShadowMethodPlan {
            shadow,
            method,
            real_class,
            signature,
        }
    }

    /// The shadow class declaring the implementation method.
    #[must_use]
    pub fn shadow(&self) -> &Arc<ShadowClass> {
        &self.shadow
    }

    /// The implementation method.
    #[must_use]
    pub fn method(&self) -> &Arc<ImplementationMethod> {
        &self.method
    }

    fn run(
        &self,
        interp: &mut Interpreter,
        handler: &dyn ClassHandler,
        receiver: Option<&ObjectRef>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let instance = match receiver {
            Some(receiver) => handler.shadow_of(interp, receiver)?,
            None => None,
        };
        let return_type = self.signature.parsed.return_type.clone();
        let value = interp.with_shadow_frame(&self.shadow, &self.method, |interp| {
            let mut call = ShadowCall::new(
                interp,
                Arc::clone(&self.shadow),
                instance,
                receiver.cloned(),
                Arc::clone(&self.real_class),
                Arc::clone(&self.signature),
                args,
            );
            (self.method.body())(&mut call)
        })?;
        Ok(match (return_type, value) {
            (None, _) => Value::Void,
            (Some(return_type), Value::Void) => Value::default_for(Some(&return_type)),
            (Some(_), value) => value,
        })
    }
}

impl fmt::Debug for ShadowMethodPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}{} for {}",
            self.shadow.name(),
            self.method.name(),
            self.method.descriptor(),
            self.signature
        )
    }
}
