//! The dispatch host class `shadowbox.internal.Dispatch`.
//!
//! Instrumented stubs call its static entry points, which hand over to the
//! sandbox's [`ClassHandler`](crate::runtime::ClassHandler). The entry points are
//! signature-polymorphic: they accept whatever descriptor the call site uses, so
//! one host method serves every instrumented method shape.
//!
//! | Entry point | Operands |
//! |-------------|----------|
//! | `classInitializing` | class name |
//! | `initializing` | new instance |
//! | `methodInvoked` | signature, receiver, arguments |
//! | `staticMethodInvoked` | signature, arguments |
//! | `nativeMethodInvoked` | signature |
//! | `intercept` | receiver (instance targets only), arguments, signature |

use std::sync::Arc;

use crate::{
    instrument::DISPATCH_CLASS,
    runtime::{
        class::{HostCall, POLYMORPHIC_DESCRIPTOR},
        handler::ClassHandler,
        interpreter::Interpreter,
        jdk::HostClassBuilder,
        native::NativeCallMode,
        plan::Plan,
        MethodSignature, RuntimeClass, Value,
    },
    Error, Result,
};

pub(crate) fn register(classes: &mut Vec<HostClassBuilder>) {
    classes.push(
        HostClassBuilder::new(DISPATCH_CLASS)
            .static_method("classInitializing", "(Ljava/lang/String;)V", class_initializing)
            .static_method("initializing", "(Ljava/lang/Object;)V", initializing)
            .static_method("methodInvoked", POLYMORPHIC_DESCRIPTOR, method_invoked)
            .static_method("staticMethodInvoked", POLYMORPHIC_DESCRIPTOR, static_method_invoked)
            .static_method("nativeMethodInvoked", POLYMORPHIC_DESCRIPTOR, native_method_invoked)
            .static_method("intercept", POLYMORPHIC_DESCRIPTOR, intercept),
    );
}

/// Internal name of the class declaring the method named by `signature`.
fn signature_owner(signature: &str) -> &str {
    let head = signature.find('(').map_or(signature, |open| &signature[..open]);
    head.rfind('/').map_or("", |slash| &head[..slash])
}

/// The class that declares the dispatched method: the calling stub's class when it
/// matches, otherwise a lookup through the sandbox.
fn declaring_class(interp: &Interpreter, call: &HostCall, owner: &str) -> Result<Arc<RuntimeClass>> {
    match &call.caller {
        Some(caller) if caller.name() == owner => Ok(Arc::clone(caller)),
        _ => interp.load_class(owner),
    }
}

fn signature_arg(call: &HostCall, index: usize) -> Result<String> {
    call.arg(index)
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Linkage(format!("dispatch operand {index} is not a signature")))
}

fn class_handler(interp: &Interpreter) -> Arc<dyn ClassHandler> {
    Arc::clone(interp.sandbox().class_handler())
}

/// Runs `plan`, stripping dispatch frames from exceptions of shadow code.
fn run_plan(
    interp: &mut Interpreter,
    handler: &dyn ClassHandler,
    plan: &Plan,
    receiver: Option<&crate::runtime::ObjectRef>,
    args: Vec<Value>,
) -> Result<Value> {
    let result = plan.run(interp, handler, receiver, args);
    match (plan, result) {
        (Plan::Shadow(_) | Plan::Custom(_), Err(Error::Exception(exception))) => {
            Err(Error::Exception(handler.strip_stack_trace(exception)))
        }
        (_, result) => result,
    }
}

fn class_initializing(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let name = signature_arg(&call, 0)?;
    let class = declaring_class(interp, &call, &name)?;
    class_handler(interp).class_initializing(interp, &class)?;
    Ok(Value::Void)
}

fn initializing(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let instance = Arc::clone(call.this()?);
    class_handler(interp).initializing(interp, &instance)?;
    Ok(Value::Void)
}

fn method_invoked(interp: &mut Interpreter, mut call: HostCall) -> Result<Value> {
    let signature = signature_arg(&call, 0)?;
    let class = declaring_class(interp, &call, signature_owner(&signature))?;
    let args = call.args.split_off(2.min(call.args.len()));
    let Some(receiver) = call.arg(1).object().cloned() else {
        return Err(interp.throw_new("java/lang/NullPointerException", format!("{signature} on null")));
    };
    let handler = class_handler(interp);
    let plan = handler.method_invoked(&signature, false, &class)?;
    run_plan(interp, handler.as_ref(), &plan, Some(&receiver), args)
}

fn static_method_invoked(interp: &mut Interpreter, mut call: HostCall) -> Result<Value> {
    let signature = signature_arg(&call, 0)?;
    let class = declaring_class(interp, &call, signature_owner(&signature))?;
    let args = call.args.split_off(1.min(call.args.len()));
    let handler = class_handler(interp);
    let plan = handler.method_invoked(&signature, true, &class)?;
    run_plan(interp, handler.as_ref(), &plan, None, args)
}

fn native_method_invoked(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let signature = MethodSignature::parse(&signature_arg(&call, 0)?)?;
    let natives = interp.sandbox().native_calls();
    if natives.mode() != NativeCallMode::Legacy {
        if let Err(message) = natives.on_native_call(&signature) {
            return Err(interp.throw_new("java/lang/RuntimeException", message));
        }
    }
    Ok(Value::default_for(call.descriptor.return_type.as_ref()))
}

fn intercept(interp: &mut Interpreter, mut call: HostCall) -> Result<Value> {
    let Some(Value::Ref(last)) = call.args.pop() else {
        return Err(Error::Linkage("intercept called without a signature".into()));
    };
    let Some(signature) = last.as_str().map(str::to_string) else {
        return Err(Error::Linkage("intercept called without a signature".into()));
    };
    let parameters = MethodSignature::parse(&signature)?.parsed.parameters.len();
    let receiver = if call.args.len() > parameters {
        call.args.remove(0).object().cloned()
    } else {
        None
    };
    let handler = class_handler(interp);
    handler
        .intercept(interp, &signature, receiver, call.args)
        .map_err(|error| match error {
            Error::Exception(exception) => Error::Exception(handler.strip_stack_trace(exception)),
            other => other,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_owner() {
        assert_eq!(signature_owner("com/example/Foo$Bar/baz(Ljava/lang/String;)V"), "com/example/Foo$Bar");
        assert_eq!(signature_owner("com/example/Foo/__constructor__()V"), "com/example/Foo");
        assert_eq!(signature_owner("Top/run()V"), "Top");
    }
}
