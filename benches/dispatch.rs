//! Benchmarks for the dispatch hot path.
//!
//! Measures what one call from instrumented code costs:
//! - Parsing a dispatch signature
//! - Calling a shadowed instance method (plan cache hit)
//! - Calling an unshadowed method of an instrumented class
//! - Calling a method of an uninstrumented class, for comparison

extern crate shadowbox;

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, Criterion};
use shadowbox::{
    classfile::{builder::ClassBuilder, AccessFlags},
    config::InstrumentationConfiguration,
    prelude::*,
    runtime::MethodSignature,
};

const GREETER: &str = "com/example/Greeter";

fn greeter() -> Vec<u8> {
    ClassBuilder::new(GREETER)
        .default_constructor()
        .unwrap()
        .method(AccessFlags::PUBLIC, "greet", "()I", |asm| {
            asm.iconst(1)?.ireturn();
            Ok(())
        })
        .unwrap()
        .method(AccessFlags::PUBLIC, "wave", "()I", |asm| {
            asm.iconst(2)?.ireturn();
            Ok(())
        })
        .unwrap()
        .to_bytes()
        .unwrap()
}

fn sandbox(instrumented: bool) -> Arc<Sandbox> {
    let mut instrumentation = InstrumentationConfiguration::builder();
    if instrumented {
        instrumentation = instrumentation.add_instrumented_package("com.example.");
    }
    let shadow = ShadowClass::builder("ShadowGreeter", "com.example.Greeter")
        .method("greet", "()I", |_| Ok(Value::Int(10)))
        .build()
        .unwrap();
    Sandbox::builder()
        .instrumentation(instrumentation.build())
        .shadow_map(ShadowMap::builder().add_shadow_class(shadow).build())
        .config(SandboxConfig {
            unshadowed_behavior: UnshadowedBehavior::CallRealCode,
            ..SandboxConfig::default()
        })
        .bytes_provider(Arc::new(MapBytesProvider::new().with_class(GREETER, greeter())))
        .build()
        .unwrap()
}

/// Benchmark parsing the signature string instrumented code passes to dispatch.
fn bench_signature_parse(c: &mut Criterion) {
    c.bench_function("dispatch_signature_parse", |b| {
        b.iter(|| {
            let signature =
                MethodSignature::parse(black_box("com/example/Greeter/greet(ILjava/lang/String;)V"))
                    .unwrap();
            black_box(signature)
        });
    });
}

/// Benchmark a shadowed call once its plan is cached.
fn bench_shadowed_call(c: &mut Criterion) {
    let sandbox = sandbox(true);
    let greeter = sandbox.new_instance("com.example.Greeter", "()V", vec![]).unwrap();

    c.bench_function("dispatch_shadowed_call", |b| {
        b.iter(|| {
            let result = sandbox
                .invoke_virtual(black_box(&greeter), "greet", "()I", vec![])
                .unwrap();
            black_box(result)
        });
    });
}

/// Benchmark an unshadowed method of an instrumented class running its real code.
fn bench_call_through(c: &mut Criterion) {
    let sandbox = sandbox(true);
    let greeter = sandbox.new_instance("com.example.Greeter", "()V", vec![]).unwrap();

    c.bench_function("dispatch_call_through", |b| {
        b.iter(|| {
            let result = sandbox
                .invoke_virtual(black_box(&greeter), "wave", "()I", vec![])
                .unwrap();
            black_box(result)
        });
    });
}

/// Benchmark the same call on an uninstrumented class.
fn bench_uninstrumented_call(c: &mut Criterion) {
    let sandbox = sandbox(false);
    let greeter = sandbox.new_instance("com.example.Greeter", "()V", vec![]).unwrap();

    c.bench_function("dispatch_uninstrumented_call", |b| {
        b.iter(|| {
            let result = sandbox
                .invoke_virtual(black_box(&greeter), "wave", "()I", vec![])
                .unwrap();
            black_box(result)
        });
    });
}

criterion_group!(
    benches,
    bench_signature_parse,
    bench_shadowed_call,
    bench_call_through,
    bench_uninstrumented_call
);
criterion_main!(benches);
