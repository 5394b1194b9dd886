//! Integration tests for class acquisition, caching, dumping and name remapping.

mod common;

use std::{fs, sync::Arc};

use common::{foo, instrumentation, provider, FOO};
use shadowbox::{
    classfile::{builder::ClassBuilder, AccessFlags, ClassFile},
    config::InstrumentationConfiguration,
    prelude::*,
    runtime::{exemption_line, parse_exemptions, MethodSignature, NativeCallHandler},
};

/// Loading a name twice yields one class; a failed lookup is not retried.
#[test]
fn test_loads_and_failures_are_cached() -> Result<()> {
    let bytes = provider(vec![(FOO.to_string(), foo()?)]);
    let sandbox = Sandbox::builder()
        .instrumentation(instrumentation())
        .bytes_provider(Arc::clone(&bytes) as Arc<dyn ClassBytesProvider>)
        .build()?;

    let first = sandbox.load_class("com.example.Foo")?;
    let second = sandbox.load_class("com/example/Foo")?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(bytes.request_count(FOO), 1);

    for _ in 0..2 {
        assert!(matches!(
            sandbox.load_class("com.example.Missing"),
            Err(Error::ClassNotFound(_))
        ));
    }
    assert_eq!(bytes.request_count("com/example/Missing"), 1);
    Ok(())
}

/// Unacquired classes are the parent's classes, identical across sandboxes that
/// share a parent; acquired classes are not.
#[test]
fn test_parent_classes_are_shared() -> Result<()> {
    let parent = SystemClassLoader::new(None)?;
    let build = || {
        Sandbox::builder()
            .instrumentation(instrumentation())
            .bytes_provider(provider(vec![(FOO.to_string(), foo()?)]))
            .parent_loader(Arc::clone(&parent))
            .build()
    };
    let a = build()?;
    let b = build()?;

    let string_a = a.load_class("java.lang.String")?;
    let string_b = b.load_class("java.lang.String")?;
    assert!(Arc::ptr_eq(&string_a, &string_b));
    assert!(!a.loader().should_acquire("java.lang.String"));

    let foo_a = a.load_class("com.example.Foo")?;
    let foo_b = b.load_class("com.example.Foo")?;
    assert!(!Arc::ptr_eq(&foo_a, &foo_b));
    Ok(())
}

/// Static state set in one sandbox is invisible in another.
#[test]
fn test_statics_are_isolated() -> Result<()> {
    let counter = ClassBuilder::new("com/example/Registry")
        .field(AccessFlags::PUBLIC | AccessFlags::STATIC, "count", "I")
        .default_constructor()?
        .to_bytes()?;
    let build = || {
        Sandbox::builder()
            .bytes_provider(provider(vec![("com/example/Registry".to_string(), counter.clone())]))
            .build()
    };
    let a = build()?;
    let b = build()?;

    a.set_static("com.example.Registry", "count", Value::Int(5))?;
    assert_eq!(a.get_static("com.example.Registry", "count")?, Value::Int(5));
    assert_eq!(b.get_static("com.example.Registry", "count")?, Value::Int(0));
    Ok(())
}

/// The dump directory receives one instrumented class file per instrumented class.
#[test]
fn test_dump_directory() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let sandbox = Sandbox::builder()
        .instrumentation(instrumentation())
        .config(SandboxConfig {
            dump_classes_directory: Some(directory.path().to_path_buf()),
            ..SandboxConfig::default()
        })
        .bytes_provider(provider(vec![(FOO.to_string(), foo()?)]))
        .build()?;
    sandbox.load_class("com.example.Foo")?;
    sandbox.load_class("java.lang.String")?;

    let dumped: Vec<_> = fs::read_dir(directory.path())?.collect::<std::io::Result<_>>()?;
    assert_eq!(dumped.len(), 1);
    let file = ClassFile::parse(&fs::read(dumped[0].path())?)?;
    assert_eq!(file.name, FOO);
    assert!(file.method("$$robo$$com_example_Foo$getName", "()Ljava/lang/String;").is_some());
    assert!(file.method("$$robo$native$nativeHash", "()I").is_some());
    Ok(())
}

/// Class name translations rewrite references inside instrumented classes.
#[test]
fn test_class_name_remapping() -> Result<()> {
    let factory = ClassBuilder::new("com/example/Factory")
        .default_constructor()?
        .method(
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            "make",
            "()Lcom/example/Legacy;",
            |asm| {
                asm.new_object("com/example/Legacy")?
                    .dup()
                    .invokespecial("com/example/Legacy", "<init>", "()V")?
                    .areturn();
                Ok(())
            },
        )?
        .to_bytes()?;
    let sandbox = Sandbox::builder()
        .instrumentation(
            InstrumentationConfiguration::builder()
                .add_instrumented_package("com.example.")
                .add_class_name_translation("com.example.Legacy", "com.example.Foo")
                .build(),
        )
        .config(SandboxConfig {
            unshadowed_behavior: UnshadowedBehavior::CallRealCode,
            ..SandboxConfig::default()
        })
        .bytes_provider(provider(vec![
            ("com/example/Factory".to_string(), factory),
            (FOO.to_string(), foo()?),
        ]))
        .build()?;

    let made = sandbox.invoke_static("com.example.Factory", "make", "()Lcom/example/Foo;", vec![])?;
    let made = made.object().expect("factory returns an object");
    assert_eq!(made.class().name(), FOO);
    let name = sandbox.invoke_virtual(made, "getName", "()Ljava/lang/String;", vec![])?;
    assert_eq!(name.as_str(), Some("real"));
    Ok(())
}

/// Observed native calls written to the exemption file read back as the same
/// sorted, deduplicated lines.
#[test]
fn test_exemption_file_round_trip() -> Result<()> {
    let directory = tempfile::tempdir()?;
    let path = directory.path().join("exemptions.txt");
    let signatures = [
        "com/example/Foo/b()V",
        "com/example/Foo$Inner/a(I)J",
        "com/example/Bar/c()V",
        "com/example/Foo/b()V",
    ];

    let writer = NativeCallHandler::new(NativeCallMode::Write, Some(path.clone()))?;
    for signature in signatures {
        writer
            .on_native_call(&MethodSignature::parse(signature)?)
            .map_err(Error::Configuration)?;
    }
    writer.write_exemptions()?;

    let lines = parse_exemptions(&fs::read_to_string(&path)?);
    assert_eq!(
        lines,
        vec![
            "com.example.Bar#c()V".to_string(),
            "com.example.Foo#b()V".to_string(),
            "com.example.Foo^Inner#a(I)J".to_string(),
        ]
    );

    let reader = NativeCallHandler::new(NativeCallMode::ThrowOnUnexempted, Some(path))?;
    assert_eq!(reader.exemptions(), lines);
    let inner = MethodSignature::parse("com/example/Foo$Inner/a(I)J")?;
    assert_eq!(exemption_line(&inner), "com.example.Foo^Inner#a(I)J");
    assert!(reader.on_native_call(&inner).is_ok());
    Ok(())
}
