//! Call-site interception of methods the sandbox cannot instrument.

mod common;

use std::time::Duration;

use common::{clock_reader, instrumentation, provider};
use shadowbox::{
    prelude::*,
    runtime::{InterceptCall, DEFAULT_START_MILLIS},
};

const CLOCK: &str = "com.example.Clock";

fn clock_sandbox(builder: SandboxBuilder) -> Result<std::sync::Arc<Sandbox>> {
    builder
        .instrumentation(instrumentation())
        .config(SandboxConfig {
            unshadowed_behavior: UnshadowedBehavior::CallRealCode,
            ..SandboxConfig::default()
        })
        .bytes_provider(provider(vec![(
            "com/example/Clock".to_string(),
            clock_reader()?,
        )]))
        .build()
}

fn read(sandbox: &std::sync::Arc<Sandbox>, method: &str) -> Result<i64> {
    sandbox.invoke_static(CLOCK, method, "()J", vec![])?.as_long()
}

/// `System.nanoTime` and `System.currentTimeMillis` read the sandbox clock, which
/// only moves when advanced.
#[test]
fn test_time_reads_sandbox_clock() -> Result<()> {
    let sandbox = clock_sandbox(Sandbox::builder())?;

    let before = read(&sandbox, "now")?;
    assert_eq!(read(&sandbox, "now")?, before);
    assert_eq!(read(&sandbox, "wall")?, DEFAULT_START_MILLIS);

    sandbox.clock().advance(Duration::from_millis(5));
    assert_eq!(read(&sandbox, "now")? - before, 5_000_000);
    assert_eq!(read(&sandbox, "wall")?, DEFAULT_START_MILLIS + 5);
    Ok(())
}

fn fixed_millis(_: &mut Interpreter, _: InterceptCall<'_>) -> Result<Value> {
    Ok(Value::Long(42))
}

/// An interceptor added to the builder takes priority over the built-in one for
/// the same method and leaves the others in place.
#[test]
fn test_custom_interceptor_takes_priority() -> Result<()> {
    let sandbox = clock_sandbox(Sandbox::builder().interceptor(Interceptor::new(
        MethodRef::new("java.lang.System", "currentTimeMillis"),
        fixed_millis,
    )))?;

    sandbox.clock().advance(Duration::from_secs(1));
    assert_eq!(read(&sandbox, "wall")?, 42);
    assert_eq!(read(&sandbox, "now")?, 1_000_000_000);
    Ok(())
}

/// Without interceptors the call sites stay ordinary calls into the system classes.
#[test]
fn test_empty_interceptors_leave_call_sites_alone() -> Result<()> {
    let sandbox = clock_sandbox(Sandbox::builder().interceptors(Interceptors::new()))?;
    assert!(!sandbox
        .instrumentation()
        .is_intercepted("java.lang.System", "nanoTime"));
    Ok(())
}
