//! Class files the unit tests load through sandboxes.

use crate::classfile::{builder::ClassBuilder, AccessFlags};

const STRING: &str = "Ljava/lang/String;";

// Helper function to create a class with a field set by its constructor, an
// instance getter, a static method and a native method
pub fn class_bytes(name: &str) -> Vec<u8> {
    ClassBuilder::new(name)
        .field(AccessFlags::PRIVATE, "name", STRING)
        .method(AccessFlags::PUBLIC, "<init>", "()V", |asm| {
            asm.aload(0)
                .invokespecial("java/lang/Object", "<init>", "()V")?
                .aload(0)
                .ldc_string("real")?
                .putfield(name, "name", STRING)?
                .return_void();
            Ok(())
        })
        .unwrap()
        .method(AccessFlags::PUBLIC, "getName", "()Ljava/lang/String;", |asm| {
            asm.aload(0).getfield(name, "name", STRING)?.areturn();
            Ok(())
        })
        .unwrap()
        .method(AccessFlags::PUBLIC | AccessFlags::STATIC, "twice", "(I)I", |asm| {
            asm.iload(0).iconst(2)?.imul().ireturn();
            Ok(())
        })
        .unwrap()
        .bodiless_method(AccessFlags::PUBLIC | AccessFlags::NATIVE, "nativeHash", "()I")
        .to_bytes()
        .unwrap()
}

// Helper function to create com/example/Counter with increment() and get()
pub fn counter_class_bytes() -> Vec<u8> {
    const OWNER: &str = "com/example/Counter";
    ClassBuilder::new(OWNER)
        .field(AccessFlags::PRIVATE, "count", "I")
        .default_constructor()
        .unwrap()
        .method(AccessFlags::PUBLIC, "increment", "()V", |asm| {
            asm.aload(0)
                .dup()
                .getfield(OWNER, "count", "I")?
                .iconst(1)?
                .iadd()
                .putfield(OWNER, "count", "I")?
                .return_void();
            Ok(())
        })
        .unwrap()
        .method(AccessFlags::PUBLIC, "get", "()I", |asm| {
            asm.aload(0).getfield(OWNER, "count", "I")?.ireturn();
            Ok(())
        })
        .unwrap()
        .to_bytes()
        .unwrap()
}
