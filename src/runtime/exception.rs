//! Java exceptions seen from Rust, and stack trace post-processing.

use std::{collections::HashSet, fmt, sync::Arc};

use crate::{
    instrument::{original_method_name, DIRECT_METHOD_PREFIX},
    runtime::{ObjectData, ObjectId, ObjectRef, ThrowableState},
};

/// Dotted class name of the dispatch host.
pub const DISPATCH_CLASS_NAME: &str = "shadowbox.internal.Dispatch";

/// Dotted class name used for frames of running shadow plans.
pub const PLAN_CLASS_NAME: &str = "shadowbox.internal.ShadowMethodPlan";

const REFLECTION_PREFIXES: [&str; 3] = ["sun.reflect.", "java.lang.reflect.", "jdk.internal.reflect."];

/// Line number of frames executing host (native) code.
pub const NATIVE_LINE: i32 = -2;

/// One frame of a Java stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Dotted class name.
    pub class_name: String,
    /// Method name.
    pub method_name: String,
    /// Source file, when known.
    pub file_name: Option<String>,
    /// Source line; negative when unknown ([`NATIVE_LINE`] for host code).
    pub line: i32,
}

impl StackFrame {
    /// Creates a frame.
    #[must_use]
    pub fn new(class_name: &str, method_name: &str, file_name: Option<&str>, line: i32) -> Self {
        StackFrame {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            file_name: file_name.map(str::to_string),
            line,
        }
    }

    fn is_internal(&self) -> bool {
        self.class_name == DISPATCH_CLASS_NAME
            || self.class_name == PLAN_CLASS_NAME
            || REFLECTION_PREFIXES
                .iter()
                .any(|prefix| self.class_name.starts_with(prefix))
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.class_name, self.method_name)?;
        match (&self.file_name, self.line) {
            (_, NATIVE_LINE) => f.write_str("Native Method")?,
            (Some(file), line) if line >= 0 => write!(f, "{file}:{line}")?,
            (Some(file), _) => f.write_str(file)?,
            (None, _) => f.write_str("Unknown Source")?,
        }
        f.write_str(")")
    }
}

/// A Java throwable that escaped to Rust.
///
/// Wraps the throwable object itself, so catching it again in Java code (or
/// rethrowing it) keeps its identity.
#[derive(Clone)]
pub struct JavaException {
    throwable: ObjectRef,
}

impl JavaException {
    /// Wraps a throwable object.
    #[must_use]
    pub fn new(throwable: ObjectRef) -> Self {
        JavaException { throwable }
    }

    /// The throwable object.
    #[must_use]
    pub fn throwable(&self) -> &ObjectRef {
        &self.throwable
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ThrowableState) -> R) -> Option<R> {
        match self.throwable.data() {
            ObjectData::Throwable(state) => {
                Some(f(&mut state.lock().expect("throwable lock poisoned")))
            }
            _ => None,
        }
    }

    /// Dotted class name, e.g. `java.lang.IllegalStateException`.
    #[must_use]
    pub fn class_name(&self) -> String {
        self.throwable.class().binary_name()
    }

    /// Returns `true` if the throwable is an instance of the class with internal name `name`.
    #[must_use]
    pub fn is_instance_of(&self, name: &str) -> bool {
        self.throwable.class().is_named_subclass_of(name)
    }

    /// Detail message.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.with_state(|state| state.message.clone()).flatten()
    }

    /// Cause.
    #[must_use]
    pub fn cause(&self) -> Option<JavaException> {
        self.with_state(|state| state.cause.clone())
            .flatten()
            .map(JavaException::new)
    }

    /// Captured stack trace, innermost frame first.
    #[must_use]
    pub fn stack_trace(&self) -> Vec<StackFrame> {
        self.with_state(|state| state.stack_trace.clone())
            .unwrap_or_default()
    }

    /// Replaces the stack trace.
    pub fn set_stack_trace(&self, frames: Vec<StackFrame>) {
        self.with_state(|state| state.stack_trace = frames);
    }
}

impl fmt::Display for JavaException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {}", self.class_name(), message),
            None => f.write_str(&self.class_name()),
        }
    }
}

impl fmt::Debug for JavaException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")?;
        for frame in self.stack_trace() {
            write!(f, "\n\tat {frame}")?;
        }
        if let Some(cause) = self.cause() {
            write!(f, "\nCaused by: {cause:?}")?;
        }
        Ok(())
    }
}

/// Removes dispatch machinery frames from `exception` and its cause chain.
///
/// Frames of the dispatch host, of running plans and of reflection are dropped;
/// direct method frames are renamed back to the original method; consecutive frames
/// of the same method without a line number collapse into one. The throwable objects
/// are updated in place, so type, message, identity and cause links are unchanged.
pub fn strip_stack_trace(exception: &JavaException) {
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut current = Some(exception.clone());
    while let Some(throwable) = current {
        if !seen.insert(throwable.throwable().id()) {
            break;
        }
        throwable.set_stack_trace(strip_frames(throwable.stack_trace()));
        current = throwable.cause();
    }
}

fn strip_frames(frames: Vec<StackFrame>) -> Vec<StackFrame> {
    let mut stripped: Vec<StackFrame> = Vec::with_capacity(frames.len());
    for mut frame in frames {
        if frame.is_internal() {
            continue;
        }
        if frame.method_name.starts_with(DIRECT_METHOD_PREFIX) {
            if let Some(original) = original_method_name(&frame.method_name) {
                frame.method_name = original.to_string();
            }
        }
        if let Some(previous) = stripped.last() {
            if previous.class_name == frame.class_name
                && previous.method_name == frame.method_name
                && (previous.line < 0 || frame.line < 0)
            {
                if previous.line < 0 && frame.line >= 0 {
                    if let Some(last) = stripped.last_mut() {
                        *last = frame;
                    }
                }
                continue;
            }
        }
        stripped.push(frame);
    }
    stripped
}

/// Returns `true` if both exceptions wrap the same throwable object.
#[must_use]
pub fn same_throwable(a: &JavaException, b: &JavaException) -> bool {
    Arc::ptr_eq(a.throwable(), b.throwable())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(class: &str, method: &str, line: i32) -> StackFrame {
        StackFrame::new(class, method, Some("Foo.java"), line)
    }

    #[test]
    fn test_strip_frames_removes_dispatch_and_renames_direct() {
        let frames = vec![
            frame("com.example.Foo", "$$robo$$com_example_Foo$bar", 12),
            frame("com.example.Foo", "bar", -1),
            frame(DISPATCH_CLASS_NAME, "methodInvoked", NATIVE_LINE),
            frame("sun.reflect.NativeMethodAccessorImpl", "invoke0", NATIVE_LINE),
            frame("com.example.FooTest", "test", 30),
        ];
        let stripped = strip_frames(frames);
        assert_eq!(
            stripped,
            vec![
                frame("com.example.Foo", "bar", 12),
                frame("com.example.FooTest", "test", 30),
            ]
        );
    }

    #[test]
    fn test_strip_frames_keeps_distinct_frames() {
        let frames = vec![
            frame("com.example.Foo", "a", 1),
            frame("com.example.Foo", "b", 2),
            frame("com.example.Foo", "a", 3),
        ];
        assert_eq!(strip_frames(frames.clone()), frames);
    }

    #[test]
    fn test_frame_display() {
        assert_eq!(
            frame("com.example.Foo", "bar", 12).to_string(),
            "com.example.Foo.bar(Foo.java:12)"
        );
        assert_eq!(
            StackFrame::new("java.lang.Object", "hashCode", None, NATIVE_LINE).to_string(),
            "java.lang.Object.hashCode(Native Method)"
        );
    }
}
