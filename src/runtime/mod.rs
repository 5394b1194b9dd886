//! Execution of instrumented classes.
//!
//! This module holds everything that runs inside a sandbox once classes are
//! defined: the object model, the bytecode [`Interpreter`](interpreter::Interpreter),
//! the host class library, and the dispatch core that instrumented stubs call into.
//!
//! # Architecture
//!
//! - **Object model**: [`RuntimeClass`], [`Object`] and [`Value`]
//! - **Execution**: [`interpreter::Interpreter`], one per OS thread
//! - **Dispatch**: the `Dispatch` host class hands every stub call to a
//!   [`ClassHandler`], which resolves a [`Plan`] per method signature
//! - **Side services**: [`NativeCallHandler`], [`SandboxClock`], [`Interceptors`]
//!
//! # Thread Safety
//!
//! Classes, objects, plans and handlers are shared freely between threads.
//! Interpreters are not: each thread running sandboxed code owns its own.

pub(crate) mod class;
mod class_value;
mod clock;
pub(crate) mod dispatch;
mod exception;
mod handler;
mod intercept;
pub mod interpreter;
pub(crate) mod jdk;
mod native;
mod object;
mod plan;
mod signature;
mod value;

pub use class::{
    component_class_name, BytecodeBody, ClassDefinition, ClassId, HostCall, HostFn, MethodBody,
    ObjectKind, RuntimeClass, RuntimeField, RuntimeMethod, POLYMORPHIC_DESCRIPTOR,
};
pub use class_value::ClassValueCache;
pub use clock::{SandboxClock, DEFAULT_START_MILLIS};
pub use exception::{
    same_throwable, strip_stack_trace, JavaException, StackFrame, DISPATCH_CLASS_NAME, NATIVE_LINE,
    PLAN_CLASS_NAME,
};
pub use handler::{
    ClassHandler, LooseSignaturePolicy, ShadowWrangler, UnshadowedBehavior, WranglerOptions,
    DEFAULT_PLAN_CACHE_CAPACITY,
};
pub use intercept::{InterceptCall, InterceptFn, Interceptor, Interceptors};
pub use interpreter::Interpreter;
pub use native::{display_signature, exemption_line, parse_exemptions, NativeCallHandler, NativeCallMode};
pub use object::{Object, ObjectData, ObjectId, ThreadState, ThrowableState};
pub use plan::{CustomPlanFn, Plan, RealCodePlan, ShadowMethodPlan};
pub use signature::MethodSignature;
pub use value::{ObjectRef, Value};
