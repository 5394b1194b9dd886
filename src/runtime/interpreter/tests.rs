use std::sync::Arc;

use crate::{
    classfile::{builder::ClassBuilder, code::opcodes::*, AccessFlags},
    loader::MapBytesProvider,
    runtime::Value,
    sandbox::{Sandbox, SandboxConfig},
    Error,
};

const CALC: &str = "com/example/Calc";
const STATIC: AccessFlags = AccessFlags::PUBLIC.union(AccessFlags::STATIC);

fn calc_bytes() -> Vec<u8> {
    ClassBuilder::new(CALC)
        .source_file("Calc.java")
        .unwrap()
        .field(STATIC, "seed", "I")
        .method(AccessFlags::STATIC, "<clinit>", "()V", |asm| {
            asm.getstatic(CALC, "seed", "I")?
                .iconst(41)?
                .iadd()
                .putstatic(CALC, "seed", "I")?
                .return_void();
            Ok(())
        })
        .unwrap()
        // sum(n) = 0 + 1 + ... + (n - 1)
        .method(STATIC, "sum", "(I)I", |asm| {
            let check = asm.new_label();
            let done = asm.new_label();
            asm.iconst(0)?.istore(1).iconst(0)?.istore(2);
            asm.label(check)
                .iload(2)
                .iload(0)
                .jump(IF_ICMPGE, done)
                .iload(1)
                .iload(2)
                .iadd()
                .istore(1)
                .iinc(2, 1)
                .goto(check);
            asm.label(done).iload(1).ireturn();
            Ok(())
        })
        .unwrap()
        .method(STATIC, "fail", "(Ljava/lang/String;)V", |asm| {
            asm.line(12)
                .new_object("java/lang/IllegalStateException")?
                .dup()
                .aload(0)
                .invokespecial("java/lang/IllegalStateException", "<init>", "(Ljava/lang/String;)V")?
                .athrow();
            Ok(())
        })
        .unwrap()
        .method(STATIC, "recover", "()I", |asm| {
            let start = asm.new_label();
            let end = asm.new_label();
            let handler = asm.new_label();
            asm.label(start)
                .ldc_string("boom")?
                .invokestatic(CALC, "fail", "(Ljava/lang/String;)V")?
                .iconst(0)?
                .ireturn();
            asm.label(end);
            asm.label(handler).set_depth(1).pop().iconst(1)?.ireturn();
            asm.try_catch(start, end, handler, Some("java/lang/RuntimeException"))?;
            Ok(())
        })
        .unwrap()
        .method(STATIC, "forever", "()V", |asm| {
            asm.invokestatic(CALC, "forever", "()V")?.return_void();
            Ok(())
        })
        .unwrap()
        .method(STATIC, "greet", "(Ljava/lang/String;)Ljava/lang/String;", |asm| {
            asm.new_object("java/lang/StringBuilder")?
                .dup()
                .invokespecial("java/lang/StringBuilder", "<init>", "()V")?
                .ldc_string("hello ")?
                .invokevirtual(
                    "java/lang/StringBuilder",
                    "append",
                    "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
                )?
                .aload(0)
                .invokevirtual(
                    "java/lang/StringBuilder",
                    "append",
                    "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
                )?
                .invokevirtual("java/lang/StringBuilder", "toString", "()Ljava/lang/String;")?
                .areturn();
            Ok(())
        })
        .unwrap()
        .to_bytes()
        .unwrap()
}

fn sandbox(config: SandboxConfig) -> Arc<Sandbox> {
    Sandbox::builder()
        .config(config)
        .bytes_provider(Arc::new(MapBytesProvider::new().with_class(CALC, calc_bytes())))
        .build()
        .unwrap()
}

#[test]
fn test_loop_and_locals() {
    let sandbox = sandbox(SandboxConfig::default());
    let class = sandbox.load_class(CALC).unwrap();
    assert!(!class.is_instrumented());
    let result = sandbox
        .invoke_static(CALC, "sum", "(I)I", vec![Value::Int(10)])
        .unwrap();
    assert_eq!(result, Value::Int(45));
}

#[test]
fn test_static_initializer_runs_once() {
    let sandbox = sandbox(SandboxConfig::default());
    assert_eq!(sandbox.get_static(CALC, "seed").unwrap(), Value::Int(41));
    sandbox.invoke_static(CALC, "sum", "(I)I", vec![Value::Int(1)]).unwrap();
    assert_eq!(sandbox.get_static(CALC, "seed").unwrap(), Value::Int(41));
}

#[test]
fn test_uncaught_exception_carries_message_and_trace() {
    let sandbox = sandbox(SandboxConfig::default());
    let message = sandbox.new_string("bad state").unwrap();
    let error = sandbox
        .invoke_static(CALC, "fail", "(Ljava/lang/String;)V", vec![message])
        .unwrap_err();
    let Error::Exception(exception) = error else {
        panic!("expected a Java exception, got {error}");
    };
    assert_eq!(exception.class_name(), "java.lang.IllegalStateException");
    assert!(exception.is_instance_of("java/lang/RuntimeException"));
    assert_eq!(exception.message().as_deref(), Some("bad state"));

    let top = &exception.stack_trace()[0];
    assert_eq!(top.class_name, "com.example.Calc");
    assert_eq!(top.method_name, "fail");
    assert_eq!(top.file_name.as_deref(), Some("Calc.java"));
    assert_eq!(top.line, 12);
}

#[test]
fn test_handler_catches_subclass() {
    let sandbox = sandbox(SandboxConfig::default());
    let result = sandbox.invoke_static(CALC, "recover", "()I", vec![]).unwrap();
    assert_eq!(result, Value::Int(1));
}

#[test]
fn test_call_depth_limit() {
    let sandbox = sandbox(SandboxConfig::default().with_max_call_depth(64));
    let error = sandbox.invoke_static(CALC, "forever", "()V", vec![]).unwrap_err();
    match error {
        Error::Exception(exception) => {
            assert_eq!(exception.class_name(), "java.lang.StackOverflowError");
        }
        other => panic!("expected StackOverflowError, got {other}"),
    }
}

#[test]
fn test_string_building() {
    let sandbox = sandbox(SandboxConfig::default());
    let name = sandbox.new_string("world").unwrap();
    let greeting = sandbox
        .invoke_static(CALC, "greet", "(Ljava/lang/String;)Ljava/lang/String;", vec![name])
        .unwrap();
    assert_eq!(greeting.as_str(), Some("hello world"));

    let mut interp = sandbox.interpreter();
    assert_eq!(interp.to_java_string(&Value::Int(-3)).unwrap(), "-3");
    assert_eq!(interp.to_java_string(&Value::Null).unwrap(), "null");
    assert_eq!(interp.depth(), 0);
}

#[test]
fn test_missing_method_throws_no_such_method_error() {
    let sandbox = sandbox(SandboxConfig::default());
    let error = sandbox.invoke_static(CALC, "absent", "()V", vec![]).unwrap_err();
    assert!(
        matches!(&error, Error::Exception(e) if e.class_name() == "java.lang.NoSuchMethodError"),
        "{error}"
    );
}
