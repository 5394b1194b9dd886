//! # shadowbox Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the shadowbox library. Import this module to get quick access to the essential
//! types for setting up sandboxes and writing shadows.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all shadowbox operations
pub use crate::Error;

/// The result type used throughout shadowbox
pub use crate::Result;

// ================================================================================================
// Sandboxes
// ================================================================================================

/// Isolated class namespaces and their configuration
pub use crate::sandbox::{
    NativeCallConfig, Sandbox, SandboxBuilder, SandboxConfig, SandboxManager, SandboxRequest,
};

// ================================================================================================
// Instrumentation Rules
// ================================================================================================

/// Which classes are acquired, instrumented and intercepted
pub use crate::config::{InstrumentationConfiguration, MethodRef};

// ================================================================================================
// Class Loading
// ================================================================================================

/// Loaders and sources of class bytes
pub use crate::loader::{
    ClassBytesProvider, ClassLoader, DirectoryBytesProvider, MapBytesProvider, SandboxClassLoader,
    SystemClassLoader,
};

// ================================================================================================
// Shadows
// ================================================================================================

/// Shadow classes and the registry binding them to real classes
pub use crate::shadow::{ShadowCall, ShadowClass, ShadowInstance, ShadowMap, ShadowProvider};

// ================================================================================================
// Runtime
// ================================================================================================

/// Values, objects and exceptions of sandboxed code
pub use crate::runtime::{JavaException, ObjectRef, RuntimeClass, Value};

/// Dispatch policy
pub use crate::runtime::{
    ClassHandler, Interceptor, Interceptors, LooseSignaturePolicy, NativeCallMode,
    UnshadowedBehavior,
};

/// The per-thread interpreter
pub use crate::runtime::Interpreter;
