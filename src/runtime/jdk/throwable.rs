//! `java.lang.Throwable` and the exception classes the runtime raises.
//!
//! Throwable state (message, cause, stack) lives in the object's
//! [`ThrowableState`](crate::runtime::ThrowableState) rather than in fields. The
//! stack is captured when a constructor runs, excluding the constructor frames
//! themselves. Subclasses declare no methods of their own and inherit every
//! constructor.

use std::sync::Arc;

use crate::{
    runtime::{
        class::{HostCall, ObjectKind},
        interpreter::Interpreter,
        jdk::HostClassBuilder,
        ObjectData, ObjectRef, ThrowableState, Value,
    },
    Error, Result,
};

/// `(class, superclass)` pairs, supertypes first.
const HIERARCHY: &[(&str, &str)] = &[
    ("java/lang/Exception", "java/lang/Throwable"),
    ("java/lang/Error", "java/lang/Throwable"),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/InterruptedException", "java/lang/Exception"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/IllegalThreadStateException", "java/lang/IllegalArgumentException"),
    ("java/lang/UnsupportedOperationException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/ClassCastException", "java/lang/RuntimeException"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/ArrayStoreException", "java/lang/RuntimeException"),
    ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
    ("java/lang/IndexOutOfBoundsException", "java/lang/RuntimeException"),
    ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/StringIndexOutOfBoundsException", "java/lang/IndexOutOfBoundsException"),
    ("java/lang/VirtualMachineError", "java/lang/Error"),
    ("java/lang/StackOverflowError", "java/lang/VirtualMachineError"),
    ("java/lang/LinkageError", "java/lang/Error"),
    ("java/lang/NoClassDefFoundError", "java/lang/LinkageError"),
    ("java/lang/UnsatisfiedLinkError", "java/lang/LinkageError"),
    ("java/lang/IncompatibleClassChangeError", "java/lang/LinkageError"),
    ("java/lang/NoSuchMethodError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/NoSuchFieldError", "java/lang/IncompatibleClassChangeError"),
    ("java/lang/AbstractMethodError", "java/lang/IncompatibleClassChangeError"),
];

pub(super) fn register(classes: &mut Vec<HostClassBuilder>) {
    classes.push(
        HostClassBuilder::new("java/lang/Throwable")
            .kind(ObjectKind::Throwable)
            .method("<init>", "()V", throwable_init)
            .method("<init>", "(Ljava/lang/String;)V", throwable_init)
            .method("<init>", "(Ljava/lang/String;Ljava/lang/Throwable;)V", throwable_init)
            .method("<init>", "(Ljava/lang/Throwable;)V", throwable_init)
            .method("getMessage", "()Ljava/lang/String;", throwable_get_message)
            .method("getLocalizedMessage", "()Ljava/lang/String;", throwable_get_message)
            .method("getCause", "()Ljava/lang/Throwable;", throwable_get_cause)
            .method(
                "initCause",
                "(Ljava/lang/Throwable;)Ljava/lang/Throwable;",
                throwable_init_cause,
            )
            .method("fillInStackTrace", "()Ljava/lang/Throwable;", throwable_fill_in_stack_trace)
            .method("toString", "()Ljava/lang/String;", throwable_to_string),
    );
    for &(name, super_name) in HIERARCHY {
        classes.push(HostClassBuilder::new(name).extends(super_name));
    }
}

fn with_state<R>(this: &ObjectRef, f: impl FnOnce(&mut ThrowableState) -> R) -> Result<R> {
    match this.data() {
        ObjectData::Throwable(state) => Ok(f(&mut state.lock().expect("throwable lock poisoned"))),
        _ => Err(Error::Linkage(format!(
            "{} is not a throwable",
            this.class().binary_name()
        ))),
    }
}

fn throwable_init(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let this = Arc::clone(call.this()?);
    let first_is_string = call
        .descriptor
        .parameters
        .first()
        .is_some_and(|p| p.descriptor() == "Ljava/lang/String;");

    let (message, cause) = match call.descriptor.parameters.len() {
        0 => (None, None),
        1 if first_is_string => (call.arg(1).as_str().map(str::to_string), None),
        1 => {
            // Throwable(Throwable cause): the message is cause.toString().
            let cause = call.arg(1).object().cloned();
            let message = match &cause {
                Some(cause) => Some(interp.to_java_string(&Value::Ref(Arc::clone(cause)))?),
                None => None,
            };
            (message, cause)
        }
        _ => (
            call.arg(1).as_str().map(str::to_string),
            call.arg(2).object().cloned(),
        ),
    };
    with_state(&this, |state| {
        state.message = message;
        state.cause = cause;
    })?;
    interp.fill_in_stack_trace(&this);
    Ok(Value::Void)
}

fn throwable_get_message(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let message = with_state(call.this()?, |state| state.message.clone())?;
    match message {
        Some(message) => Ok(Value::Ref(interp.new_string(&message)?)),
        None => Ok(Value::Null),
    }
}

fn throwable_get_cause(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let cause = with_state(call.this()?, |state| state.cause.clone())?;
    Ok(Value::from_ref(cause))
}

fn throwable_init_cause(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let this = Arc::clone(call.this()?);
    let cause = call.arg(1).object().cloned();
    if cause.as_ref().is_some_and(|c| Arc::ptr_eq(c, &this)) {
        return Err(interp.throw_new(
            "java/lang/IllegalArgumentException",
            "Self-causation not permitted",
        ));
    }
    let overwrites = with_state(&this, |state| {
        if state.cause.is_some() {
            return true;
        }
        state.cause = cause;
        false
    })?;
    if overwrites {
        return Err(interp.throw_new(
            "java/lang/IllegalStateException",
            "Can't overwrite cause",
        ));
    }
    Ok(Value::Ref(this))
}

fn throwable_fill_in_stack_trace(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let this = Arc::clone(call.this()?);
    interp.fill_in_stack_trace(&this);
    Ok(Value::Ref(this))
}

fn throwable_to_string(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let this = call.this()?;
    let message = with_state(this, |state| state.message.clone())?;
    let name = this.class().binary_name();
    let text = match message {
        Some(message) => format!("{name}: {message}"),
        None => name,
    };
    Ok(Value::Ref(interp.new_string(&text)?))
}
