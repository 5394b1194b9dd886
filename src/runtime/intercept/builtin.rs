//! Interceptors shipped with the crate.

use log::{error, warn};

use crate::{
    config::MethodRef,
    runtime::{
        intercept::{InterceptCall, Interceptor},
        interpreter::Interpreter,
        jdk, Value,
    },
    Error, Result,
};

/// Methods intercepted as no-ops.
const IGNORED: &[(&str, &str)] = &[
    ("java.lang.System", "loadLibrary"),
    ("android.os.StrictMode", "trackActivity"),
    ("android.os.StrictMode", "incrementExpectedActivityCount"),
    ("android.util.LocaleUtil", "getLayoutDirectionFromLocale"),
    ("android.view.FallbackEventHandler", "*"),
    ("android.view.IWindowSession", "*"),
];

pub(super) fn interceptors() -> Vec<Interceptor> {
    let mut interceptors = vec![
        Interceptor::new(MethodRef::new("java.util.LinkedHashMap", "eldest"), linked_hash_map_eldest),
        Interceptor::new(MethodRef::new("java.lang.System", "nanoTime"), system_nano_time),
        Interceptor::new(
            MethodRef::new("java.lang.System", "currentTimeMillis"),
            system_current_time_millis,
        ),
        Interceptor::new(MethodRef::new("java.lang.System", "arraycopy"), system_arraycopy),
        Interceptor::new(MethodRef::new("java.lang.System", "logE"), system_log_e),
        Interceptor::new(MethodRef::new("java.lang.System", "logW"), system_log_w),
        Interceptor::new(MethodRef::new("java.io.FileDescriptor", "release$"), return_null),
        Interceptor::new(MethodRef::new("java.net.Socket", "getFileDescriptor$"), return_null),
    ];
    interceptors.extend(
        IGNORED
            .iter()
            .map(|&(class, method)| Interceptor::no_op(MethodRef::new(class, method))),
    );
    interceptors
}

fn linked_hash_map_eldest(interp: &mut Interpreter, call: InterceptCall<'_>) -> Result<Value> {
    let Some(map) = call.receiver else {
        return Err(Error::Linkage("LinkedHashMap.eldest without receiver".into()));
    };
    jdk::eldest(interp, &map)
}

fn system_nano_time(interp: &mut Interpreter, _: InterceptCall<'_>) -> Result<Value> {
    Ok(Value::Long(interp.sandbox().clock().nano_time()))
}

fn system_current_time_millis(interp: &mut Interpreter, _: InterceptCall<'_>) -> Result<Value> {
    Ok(Value::Long(interp.sandbox().clock().current_time_millis()))
}

fn system_arraycopy(interp: &mut Interpreter, call: InterceptCall<'_>) -> Result<Value> {
    jdk::arraycopy(interp, &call.args)?;
    Ok(Value::Void)
}

/// `message` or `message: detail`, from the first two arguments.
fn render_log_arguments(interp: &mut Interpreter, call: &InterceptCall<'_>) -> Result<String> {
    let mut rendered = interp.to_java_string(call.arg(0))?;
    if call.args.len() > 1 {
        rendered.push_str(": ");
        rendered.push_str(&interp.to_java_string(call.arg(1))?);
    }
    Ok(rendered)
}

fn system_log_e(interp: &mut Interpreter, call: InterceptCall<'_>) -> Result<Value> {
    let message = render_log_arguments(interp, &call)?;
    error!("System.logE: {message}");
    Ok(Value::Void)
}

fn system_log_w(interp: &mut Interpreter, call: InterceptCall<'_>) -> Result<Value> {
    let message = render_log_arguments(interp, &call)?;
    warn!("System.logW: {message}");
    Ok(Value::Void)
}

fn return_null(_: &mut Interpreter, _: InterceptCall<'_>) -> Result<Value> {
    Ok(Value::Null)
}
