//! Class files and sandbox setup shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use shadowbox::{
    classfile::{builder::ClassBuilder, code::opcodes::LRETURN, AccessFlags},
    config::InstrumentationConfiguration,
    loader::MapBytesProvider,
    shadow::ShadowMap,
    Result, Sandbox, SandboxConfig,
};

pub const FOO: &str = "com/example/Foo";
pub const STRING: &str = "Ljava/lang/String;";
const STATIC: AccessFlags = AccessFlags::PUBLIC.union(AccessFlags::STATIC);

/// `com.example.Foo`: a `name` field set by both constructors, a getter, a final
/// method, and two native methods.
pub fn foo() -> Result<Vec<u8>> {
    ClassBuilder::new(FOO)
        .access(AccessFlags::PUBLIC | AccessFlags::SUPER | AccessFlags::FINAL)
        .source_file("Foo.java")?
        .field(AccessFlags::PRIVATE | AccessFlags::FINAL, "name", STRING)
        .method(AccessFlags::PUBLIC, "<init>", "()V", |asm| {
            asm.aload(0)
                .invokespecial("java/lang/Object", "<init>", "()V")?
                .aload(0)
                .ldc_string("real")?
                .putfield(FOO, "name", STRING)?
                .return_void();
            Ok(())
        })?
        .method(AccessFlags::PUBLIC, "<init>", "(Ljava/lang/String;)V", |asm| {
            asm.aload(0)
                .invokespecial("java/lang/Object", "<init>", "()V")?
                .aload(0)
                .aload(1)
                .putfield(FOO, "name", STRING)?
                .return_void();
            Ok(())
        })?
        .method(
            AccessFlags::PUBLIC | AccessFlags::FINAL,
            "getName",
            "()Ljava/lang/String;",
            |asm| {
                asm.line(7).aload(0).getfield(FOO, "name", STRING)?.areturn();
                Ok(())
            },
        )?
        .method(STATIC, "twice", "(I)I", |asm| {
            asm.iload(0).iconst(2)?.imul().ireturn();
            Ok(())
        })?
        .bodiless_method(AccessFlags::PUBLIC | AccessFlags::NATIVE, "nativeMethod", "()V")
        .bodiless_method(AccessFlags::PUBLIC | AccessFlags::NATIVE, "nativeHash", "()I")
        .to_bytes()
}

/// A class with a no-argument constructor calling the one of `super_name`.
pub fn subclass(name: &str, super_name: &str) -> Result<Vec<u8>> {
    ClassBuilder::new(name)
        .super_class(super_name)
        .default_constructor()?
        .to_bytes()
}

/// `com.example.Level0 <- Level1 <- Level2`, each with a `describe()` method
/// returning its own simple name.
pub fn levels() -> Result<Vec<(String, Vec<u8>)>> {
    let mut classes = Vec::new();
    let mut super_name = "java/lang/Object".to_string();
    for level in 0..3 {
        let name = format!("com/example/Level{level}");
        let simple = format!("Level{level}");
        let bytes = ClassBuilder::new(&name)
            .super_class(&super_name)
            .default_constructor()?
            .method(AccessFlags::PUBLIC, "describe", "()Ljava/lang/String;", |asm| {
                asm.ldc_string(&simple)?.areturn();
                Ok(())
            })?
            .to_bytes()?;
        classes.push((name.clone(), bytes));
        super_name = name;
    }
    Ok(classes)
}

/// `com.example.Clock` with static `now()` and `wall()` reading `java.lang.System`.
pub fn clock_reader() -> Result<Vec<u8>> {
    ClassBuilder::new("com/example/Clock")
        .default_constructor()?
        .method(STATIC, "now", "()J", |asm| {
            asm.invokestatic("java/lang/System", "nanoTime", "()J")?
                .op(LRETURN, -2);
            Ok(())
        })?
        .method(STATIC, "wall", "()J", |asm| {
            asm.invokestatic("java/lang/System", "currentTimeMillis", "()J")?
                .op(LRETURN, -2);
            Ok(())
        })?
        .to_bytes()
}

/// Rules instrumenting everything below `com.example.`.
pub fn instrumentation() -> InstrumentationConfiguration {
    InstrumentationConfiguration::builder()
        .add_instrumented_package("com.example.")
        .build()
}

/// A provider holding `classes`.
pub fn provider(classes: Vec<(String, Vec<u8>)>) -> Arc<MapBytesProvider> {
    let provider = MapBytesProvider::new();
    for (name, bytes) in classes {
        provider.insert(&name, bytes);
    }
    Arc::new(provider)
}

/// A sandbox instrumenting `com.example.` over `classes`.
pub fn sandbox(
    classes: Vec<(String, Vec<u8>)>,
    shadow_map: ShadowMap,
    config: SandboxConfig,
) -> Result<Arc<Sandbox>> {
    Sandbox::builder()
        .instrumentation(instrumentation())
        .shadow_map(shadow_map)
        .config(config)
        .bytes_provider(provider(classes))
        .build()
}
