//! Integration tests for shadow dispatch through instrumented classes.
//!
//! Every test builds its fixture classes with the class builder, loads them through
//! a sandbox instrumenting `com.example.`, and observes which implementation ran.

mod common;

use std::sync::{Arc, Mutex};

use common::{foo, levels, sandbox, subclass, FOO, STRING};
use shadowbox::{
    classfile::AccessFlags,
    prelude::*,
    runtime::{NativeCallMode, DISPATCH_CLASS_NAME, PLAN_CLASS_NAME},
    sandbox::NativeCallConfig,
    shadow::ShadowFlags,
};

fn foo_only() -> Result<Vec<(String, Vec<u8>)>> {
    Ok(vec![(FOO.to_string(), foo()?)])
}

fn expect_exception(error: Error) -> JavaException {
    match error {
        Error::Exception(exception) => exception,
        other => panic!("expected a Java exception, got {other}"),
    }
}

/// A shadow constructor replaces the constructor body: it sees the argument and the
/// field the real body would have set stays unset.
#[test]
fn test_shadow_constructor_replaces_body() -> Result<()> {
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&recorded);
    let shadow = ShadowClass::builder("ShadowFoo", "com.example.Foo")
        .method("__constructor__", "(Ljava/lang/String;)V", move |call| {
            let argument = call.arg_str(0).unwrap_or_default().to_string();
            sink.lock().unwrap().push(argument);
            Ok(Value::Void)
        })
        .build()?;
    let sandbox = sandbox(
        foo_only()?,
        ShadowMap::builder().add_shadow_class(shadow).build(),
        SandboxConfig::default(),
    )?;

    let x = sandbox.new_string("x")?;
    let foo = sandbox.new_instance("com.example.Foo", "(Ljava/lang/String;)V", vec![x])?;

    assert_eq!(*recorded.lock().unwrap(), vec!["x".to_string()]);
    assert!(sandbox.get_field(&foo, "name")?.is_null());
    Ok(())
}

/// Without a constructor shadow the real body runs when the shadow calls through.
#[test]
fn test_call_through_runs_real_bodies() -> Result<()> {
    let shadow = ShadowClass::builder("ShadowFoo", "com.example.Foo")
        .call_through_by_default()
        .static_method("twice", "(I)I", |call| {
            let real = call.call_real()?.as_int()?;
            Ok(Value::Int(real + 1))
        })
        .build()?;
    let sandbox = sandbox(
        foo_only()?,
        ShadowMap::builder().add_shadow_class(shadow).build(),
        SandboxConfig::default(),
    )?;

    let foo = sandbox.new_instance("com.example.Foo", "()V", vec![])?;
    let name = sandbox.invoke_virtual(&foo, "getName", "()Ljava/lang/String;", vec![])?;
    assert_eq!(name.as_str(), Some("real"));
    let twice = sandbox.invoke_static("com.example.Foo", "twice", "(I)I", vec![Value::Int(4)])?;
    assert_eq!(twice, Value::Int(9));
    Ok(())
}

/// Methods of an instrumented class without any shadow return defaults.
#[test]
fn test_unshadowed_methods_return_defaults() -> Result<()> {
    let sandbox = sandbox(foo_only()?, ShadowMap::empty(), SandboxConfig::default())?;
    let foo = sandbox.new_instance("com.example.Foo", "()V", vec![])?;

    let name = sandbox.invoke_virtual(&foo, "getName", "()Ljava/lang/String;", vec![])?;
    assert!(name.is_null());
    let twice = sandbox.invoke_static("com.example.Foo", "twice", "(I)I", vec![Value::Int(4)])?;
    assert_eq!(twice, Value::Int(0));
    assert_eq!(sandbox.invoke_virtual(&foo, "nativeHash", "()I", vec![])?, Value::Int(0));
    assert!(sandbox.extract_shadow(&foo)?.is_none());
    Ok(())
}

/// In throw mode an unexempted native call fails with an actionable message.
#[test]
fn test_unexempted_native_call_throws() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let exemptions = directory.path().join("native-exemptions.txt");
    let config = SandboxConfig {
        native_calls: NativeCallConfig {
            mode: NativeCallMode::ThrowOnUnexempted,
            exemptions_file: Some(exemptions.clone()),
        },
        ..SandboxConfig::default()
    };
    let sandbox = sandbox(foo_only()?, ShadowMap::empty(), config)?;
    let foo = sandbox.new_instance("com.example.Foo", "()V", vec![])?;

    let exception = expect_exception(
        sandbox
            .invoke_virtual(&foo, "nativeMethod", "()V", vec![])
            .unwrap_err(),
    );
    assert_eq!(exception.class_name(), "java.lang.RuntimeException");
    let message = exception.message().unwrap_or_default();
    assert!(message.contains("com.example.Foo#nativeMethod()V"), "{message}");
    assert!(message.contains(&exemptions.display().to_string()), "{message}");

    sandbox
        .native_calls()
        .add_exemption("com.example.Foo#nativeMethod()V");
    sandbox.invoke_virtual(&foo, "nativeMethod", "()V", vec![])?;
    Ok(())
}

/// Instances of an unshadowed class get the shadow of their nearest shadowed
/// ancestor, and calls resolve against the shadow of the declaring class.
#[test]
fn test_most_specific_shadow_wins() -> Result<()> {
    let mut classes = levels()?;
    classes.push((
        "com/example/Level3".to_string(),
        subclass("com/example/Level3", "com/example/Level2")?,
    ));
    let grandparent = ShadowClass::builder("ShadowLevel1", "com.example.Level1")
        .method("describe", "()Ljava/lang/String;", |call| call.new_string("shadow 1"))
        .build()?;
    let parent = ShadowClass::builder("ShadowLevel2", "com.example.Level2")
        .extends(&grandparent)
        .method("describe", "()Ljava/lang/String;", |call| call.new_string("shadow 2"))
        .build()?;
    let sandbox = sandbox(
        classes,
        ShadowMap::builder()
            .add_shadow_class(grandparent)
            .add_shadow_class(parent)
            .build(),
        SandboxConfig::default(),
    )?;

    let leaf = sandbox.new_instance("com.example.Level3", "()V", vec![])?;
    let shadow = sandbox.extract_shadow(&leaf)?.expect("leaf has a shadow");
    assert_eq!(shadow.shadow().name(), "ShadowLevel2");
    let described = sandbox.invoke_virtual(&leaf, "describe", "()Ljava/lang/String;", vec![])?;
    assert_eq!(described.as_str(), Some("shadow 2"));
    Ok(())
}

/// Constructing a three-level chain runs each level's shadow constructor once,
/// root first.
#[test]
fn test_constructor_fan_out_is_root_to_leaf() -> Result<()> {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut builder = ShadowMap::builder();
    let mut super_shadow: Option<Arc<ShadowClass>> = None;
    for level in 0..3 {
        let sink = Arc::clone(&order);
        let mut shadow = ShadowClass::builder(
            &format!("ShadowLevel{level}"),
            &format!("com.example.Level{level}"),
        );
        if let Some(parent) = &super_shadow {
            shadow = shadow.extends(parent);
        }
        let shadow = shadow
            .method("__constructor__", "()V", move |_| {
                sink.lock().unwrap().push(level);
                Ok(Value::Void)
            })
            .build()?;
        builder = builder.add_shadow_class(Arc::clone(&shadow));
        super_shadow = Some(shadow);
    }
    let sandbox = sandbox(levels()?, builder.build(), SandboxConfig::default())?;

    sandbox.new_instance("com.example.Level2", "()V", vec![])?;
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    Ok(())
}

/// `equals` and `hashCode` of instrumented instances route through the shadow even
/// though the class never declared them.
#[test]
fn test_object_methods_route_through_shadow() -> Result<()> {
    let shadow = ShadowClass::builder("ShadowFoo", "com.example.Foo")
        .method("equals", "(Ljava/lang/Object;)Z", |_| Ok(Value::from_bool(true)))
        .method("hashCode", "()I", |_| Ok(Value::Int(42)))
        .build()?;
    let sandbox = sandbox(
        foo_only()?,
        ShadowMap::builder().add_shadow_class(shadow).build(),
        SandboxConfig::default(),
    )?;

    let a = sandbox.new_instance("com.example.Foo", "()V", vec![])?;
    let b = sandbox.new_instance("com.example.Foo", "()V", vec![])?;
    let equal = sandbox.invoke_virtual(&a, "equals", "(Ljava/lang/Object;)Z", vec![Value::Ref(b)])?;
    assert!(equal.as_bool()?);
    assert_eq!(sandbox.invoke_virtual(&a, "hashCode", "()I", vec![])?, Value::Int(42));
    Ok(())
}

/// Instrumented classes lose every `final` modifier.
#[test]
fn test_final_modifiers_are_stripped() -> Result<()> {
    let sandbox = sandbox(foo_only()?, ShadowMap::empty(), SandboxConfig::default())?;
    let class = sandbox.load_class("com.example.Foo")?;

    assert!(!class.access().contains(AccessFlags::FINAL));
    assert!(class.methods().all(|m| !m.access.contains(AccessFlags::FINAL)));
    assert!(class.fields().all(|f| !f.access.contains(AccessFlags::FINAL)));
    let get_name = class
        .declared_method("getName", "()Ljava/lang/String;")
        .expect("getName is declared");
    assert!(!get_name.access.is_native());
    Ok(())
}

/// Exceptions leaving a shadow method carry no dispatch frames.
#[test]
fn test_stack_traces_hide_dispatch_frames() -> Result<()> {
    let shadow = ShadowClass::builder("ShadowFoo", "com.example.Foo")
        .method("getName", "()Ljava/lang/String;", |call| {
            Err(call.throw_new("java/lang/IllegalStateException", "no name"))
        })
        .build()?;
    let sandbox = sandbox(
        foo_only()?,
        ShadowMap::builder().add_shadow_class(shadow).build(),
        SandboxConfig::default(),
    )?;
    let foo = sandbox.new_instance("com.example.Foo", "()V", vec![])?;

    let exception = expect_exception(
        sandbox
            .invoke_virtual(&foo, "getName", "()Ljava/lang/String;", vec![])
            .unwrap_err(),
    );
    assert_eq!(exception.message().as_deref(), Some("no name"));
    let trace = exception.stack_trace();
    assert!(!trace.is_empty());
    assert!(trace
        .iter()
        .all(|frame| frame.class_name != DISPATCH_CLASS_NAME && frame.class_name != PLAN_CLASS_NAME));
    assert!(trace
        .iter()
        .any(|frame| frame.class_name == "com.example.Foo" && frame.method_name == "getName"));
    Ok(())
}

/// Shadow state is per instance and created lazily.
#[test]
fn test_shadow_state_is_per_instance() -> Result<()> {
    #[derive(Default)]
    struct Calls(u32);

    let shadow = ShadowClass::builder("ShadowFoo", "com.example.Foo")
        .state(Calls::default)
        .method("nativeHash", "()I", |call| {
            let count = call.with_state(|calls: &mut Calls| {
                calls.0 += 1;
                calls.0
            })?;
            Ok(Value::Int(i32::try_from(count).unwrap_or(i32::MAX)))
        })
        .build()?;
    assert!(!shadow.flags().contains(ShadowFlags::CALL_THROUGH_BY_DEFAULT));
    let sandbox = sandbox(
        foo_only()?,
        ShadowMap::builder().add_shadow_class(shadow).build(),
        SandboxConfig::default(),
    )?;

    let a = sandbox.new_instance("com.example.Foo", "()V", vec![])?;
    let b = sandbox.new_instance("com.example.Foo", "()V", vec![])?;
    for _ in 0..3 {
        sandbox.invoke_virtual(&a, "nativeHash", "()I", vec![])?;
    }
    assert_eq!(sandbox.invoke_virtual(&a, "nativeHash", "()I", vec![])?, Value::Int(4));
    assert_eq!(sandbox.invoke_virtual(&b, "nativeHash", "()I", vec![])?, Value::Int(1));
    Ok(())
}

/// Direct methods run the original bodies even when a shadow is bound.
#[test]
fn test_direct_invocation_bypasses_dispatch() -> Result<()> {
    let shadow = ShadowClass::builder("ShadowFoo", "com.example.Foo").build()?;
    let sandbox = sandbox(
        foo_only()?,
        ShadowMap::builder().add_shadow_class(shadow).build(),
        SandboxConfig::default(),
    )?;
    let foo = sandbox.new_instance("com.example.Foo", "()V", vec![])?;
    assert!(sandbox.get_field(&foo, "name")?.is_null());

    let name = sandbox.new_string("direct")?;
    sandbox.invoke_direct(
        "com.example.Foo",
        Some(&foo),
        "__constructor__",
        &format!("({STRING})V"),
        vec![name],
    )?;
    let name = sandbox.invoke_direct("com.example.Foo", Some(&foo), "getName", "()Ljava/lang/String;", vec![])?;
    assert_eq!(name.as_str(), Some("direct"));
    Ok(())
}
