//! `java.lang.Thread` on OS threads.
//!
//! `start` spawns a real thread running a fresh [`Interpreter`] over the same
//! sandbox, so code on every thread shares classes, statics and shadow bindings.
//! An exception escaping `run` ends the thread and is logged; `join` waits for the
//! OS thread. `sleep` advances the sandbox clock instead of blocking.

use std::{sync::Arc, time::Duration};

use log::warn;

use crate::{
    runtime::{
        class::{HostCall, ObjectKind},
        interpreter::Interpreter,
        jdk::HostClassBuilder,
        ObjectData, ObjectRef, ThreadState, Value,
    },
    Error, Result,
};

pub(super) fn register(classes: &mut Vec<HostClassBuilder>) {
    classes.push(
        HostClassBuilder::new("java/lang/Thread")
            .implements("java/lang/Runnable")
            .kind(ObjectKind::Thread)
            .method("<init>", "()V", thread_init)
            .method("<init>", "(Ljava/lang/Runnable;)V", thread_init)
            .method("<init>", "(Ljava/lang/String;)V", thread_init)
            .method("<init>", "(Ljava/lang/Runnable;Ljava/lang/String;)V", thread_init)
            .method("start", "()V", thread_start)
            .method("run", "()V", thread_run)
            .method("join", "()V", thread_join)
            .method("getName", "()Ljava/lang/String;", thread_get_name)
            .static_method("sleep", "(J)V", thread_sleep),
    );
}

fn with_state<R>(this: &ObjectRef, f: impl FnOnce(&mut ThreadState) -> R) -> Result<R> {
    match this.data() {
        ObjectData::Thread(state) => Ok(f(&mut state.lock().expect("thread lock poisoned"))),
        _ => Err(Error::Linkage(format!(
            "{} is not a thread",
            this.class().binary_name()
        ))),
    }
}

fn thread_name(this: &ObjectRef) -> Result<String> {
    with_state(this, |state| state.name.clone())
        .map(|name| name.unwrap_or_else(|| format!("Thread-{}", this.id().0)))
}

fn thread_init(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let this = Arc::clone(call.this()?);
    let mut target = None;
    let mut name = None;
    for (index, param) in call.descriptor.parameters.iter().enumerate() {
        let value = call.arg(index + 1);
        if param.descriptor() == "Ljava/lang/String;" {
            name = value.as_str().map(str::to_string);
        } else {
            target = value.object().cloned();
        }
    }
    with_state(&this, |state| {
        state.target = target;
        state.name = name;
    })?;
    Ok(Value::Void)
}

fn thread_start(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let this = Arc::clone(call.this()?);
    let already_started = with_state(&this, |state| std::mem::replace(&mut state.started, true))?;
    if already_started {
        return Err(interp.throw_new("java/lang/IllegalThreadStateException", "Thread already started"));
    }

    let sandbox = Arc::clone(interp.sandbox());
    let thread = Arc::clone(&this);
    let name = thread_name(&this)?;
    let handle = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let mut interp = Interpreter::new(sandbox);
            if let Err(error) = interp.invoke_virtual(&thread, "run", "()V", Vec::new()) {
                warn!("Uncaught exception in sandbox thread \"{name}\": {error}");
            }
        })?;
    with_state(&this, |state| state.handle = Some(handle))?;
    Ok(Value::Void)
}

fn thread_run(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let target = with_state(call.this()?, |state| state.target.clone())?;
    if let Some(target) = target {
        interp.invoke_virtual(&target, "run", "()V", Vec::new())?;
    }
    Ok(Value::Void)
}

fn thread_join(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let this = call.this()?;
    let handle = with_state(this, |state| state.handle.take())?;
    if let Some(handle) = handle {
        if handle.join().is_err() {
            warn!("Sandbox thread {} panicked", thread_name(this)?);
        }
    }
    Ok(Value::Void)
}

fn thread_get_name(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let name = thread_name(call.this()?)?;
    Ok(Value::Ref(interp.new_string(&name)?))
}

fn thread_sleep(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let millis = call.arg(0).as_long()?;
    let Ok(millis) = u64::try_from(millis) else {
        return Err(interp.throw_new(
            "java/lang/IllegalArgumentException",
            "timeout value is negative",
        ));
    };
    interp.sandbox().clock().advance(Duration::from_millis(millis));
    Ok(Value::Void)
}
