//! Shadow identity across sandbox threads.

mod common;

use std::{
    collections::HashMap,
    sync::{Arc, Barrier, Mutex},
    thread,
};

use common::{foo, sandbox, FOO};
use shadowbox::{
    classfile::{builder::ClassBuilder, AccessFlags},
    prelude::*,
    runtime::ObjectId,
};

const WORKER: &str = "com/example/Worker";
const WORKERS: usize = 100;

/// `com.example.Worker extends java.lang.Thread` with an empty `run()`.
fn worker() -> Result<Vec<u8>> {
    ClassBuilder::new(WORKER)
        .super_class("java/lang/Thread")
        .default_constructor()?
        .method(AccessFlags::PUBLIC, "run", "()V", |asm| {
            asm.return_void();
            Ok(())
        })?
        .to_bytes()
}

type Seen = Arc<Mutex<HashMap<ObjectId, Arc<ShadowInstance>>>>;

/// The shadow a test extracts for an object on the main thread is the shadow its
/// methods see when they run on the object's own thread.
#[test]
fn test_shadow_identity_across_threads() -> Result<()> {
    let seen: Seen = Arc::new(Mutex::new(HashMap::new()));
    let sink = Arc::clone(&seen);
    let shadow = ShadowClass::builder("ShadowWorker", "com.example.Worker")
        .method("run", "()V", move |call| {
            let id = call.this()?.id();
            let instance = call.instance().cloned().expect("worker has a shadow");
            sink.lock().unwrap().insert(id, instance);
            Ok(Value::Void)
        })
        .build()?;
    let sandbox = sandbox(
        vec![(WORKER.to_string(), worker()?)],
        ShadowMap::builder().add_shadow_class(shadow).build(),
        SandboxConfig::default(),
    )?;

    let mut workers = Vec::with_capacity(WORKERS);
    for _ in 0..WORKERS {
        let worker = sandbox.new_instance("com.example.Worker", "()V", vec![])?;
        let extracted = sandbox.extract_shadow(&worker)?.expect("worker has a shadow");
        workers.push((worker, extracted));
    }
    for (worker, _) in &workers {
        sandbox.invoke_virtual(worker, "start", "()V", vec![])?;
    }
    for (worker, _) in &workers {
        sandbox.invoke_virtual(worker, "join", "()V", vec![])?;
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), WORKERS);
    for (worker, extracted) in &workers {
        let inside = &seen[&worker.id()];
        assert!(Arc::ptr_eq(inside, extracted));
    }
    Ok(())
}

/// Starting a thread twice throws `IllegalThreadStateException`.
#[test]
fn test_double_start_throws() -> Result<()> {
    let sandbox = sandbox(
        vec![(WORKER.to_string(), worker()?)],
        ShadowMap::empty(),
        SandboxConfig {
            unshadowed_behavior: UnshadowedBehavior::CallRealCode,
            ..SandboxConfig::default()
        },
    )?;
    let worker = sandbox.new_instance("com.example.Worker", "()V", vec![])?;
    sandbox.invoke_virtual(&worker, "start", "()V", vec![])?;
    let error = sandbox
        .invoke_virtual(&worker, "start", "()V", vec![])
        .unwrap_err();
    sandbox.invoke_virtual(&worker, "join", "()V", vec![])?;

    let exception = error.as_exception().expect("start throws");
    assert_eq!(exception.class_name(), "java.lang.IllegalThreadStateException");
    Ok(())
}

/// Threads loading the same class at once all get the one definition.
#[test]
fn test_concurrent_loads_yield_one_class() -> Result<()> {
    const THREADS: usize = 32;
    let sandbox = sandbox(
        vec![(FOO.to_string(), foo()?)],
        ShadowMap::empty(),
        SandboxConfig::default(),
    )?;
    let barrier = Barrier::new(THREADS);

    let classes = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    sandbox.load_class("com.example.Foo")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("loader thread panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    let first = &classes[0];
    assert!(classes.iter().all(|class| Arc::ptr_eq(class, first)));
    assert!(first.is_instrumented());
    Ok(())
}
