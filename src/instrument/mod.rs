//! Load-time class rewriting.
//!
//! The [`ClassInstrumentor`] turns an ordinary class into one whose every method,
//! constructor and static initializer routes through the dispatch host class
//! `shadowbox/internal/Dispatch`:
//!
//! - each method body moves to a private *direct method* and the original name becomes a
//!   small delegator that asks the class handler what to do,
//! - each constructor keeps only its superclass (or `this`) constructor call and hands the
//!   remainder to a direct `__constructor__` method,
//! - `<clinit>` is renamed to [`STATIC_INITIALIZER_METHOD_NAME`] and replaced by a
//!   notifier, so a shadow can replace or defer static initialization,
//! - native methods get bodies and keep a private native marker stub,
//! - `equals`/`hashCode`/`toString` are added when not declared,
//! - `final` is stripped from the class, its fields and methods.
//!
//! [`MutableClass`] is the in-memory class being rewritten; [`ClassDetails`] is the
//! read-only view the instrumentation rules are evaluated against.

mod instrumentor;
mod mutable_class;

pub use instrumentor::{ClassHierarchy, ClassInstrumentor};
pub use mutable_class::MutableClass;

/// Host class that instrumented code calls into.
pub const DISPATCH_CLASS: &str = "shadowbox/internal/Dispatch";

/// Prefix of direct method names.
pub const DIRECT_METHOD_PREFIX: &str = "$$robo$$";

/// Prefix of the private native marker stubs kept for former native methods.
pub const NATIVE_STUB_PREFIX: &str = "$$robo$native$";

/// Name the original `<clinit>` is renamed to.
pub const STATIC_INITIALIZER_METHOD_NAME: &str = "__staticInitializer__";

/// Dispatch name of constructor bodies.
pub const CONSTRUCTOR_METHOD_NAME: &str = "__constructor__";

/// Read-only facts about a class that the instrumentation rules need.
pub trait ClassDetails {
    /// Dotted binary name, e.g. `android.os.Build$VERSION`.
    fn name(&self) -> String;

    /// Returns `true` for interfaces.
    fn is_interface(&self) -> bool;

    /// Returns `true` for annotation types.
    fn is_annotation(&self) -> bool;

    /// Returns `true` if the class carries the annotation whose dotted class name is
    /// `annotation_class`.
    fn has_annotation(&self, annotation_class: &str) -> bool;
}

impl ClassDetails for crate::classfile::ClassFile {
    fn name(&self) -> String {
        self.binary_name()
    }

    fn is_interface(&self) -> bool {
        crate::classfile::ClassFile::is_interface(self)
    }

    fn is_annotation(&self) -> bool {
        crate::classfile::ClassFile::is_annotation(self)
    }

    fn has_annotation(&self, annotation_class: &str) -> bool {
        let descriptor = format!("L{};", annotation_class.replace('.', "/"));
        crate::classfile::ClassFile::has_annotation(self, &descriptor)
    }
}

/// Name of the direct method holding the original body of `method_name` in `class_name`.
///
/// `.` and `/` in the class name become `_` and `$` becomes `__`, so
/// `com/example/Foo$Bar` + `run` gives `$$robo$$com_example_Foo__Bar$run`.
#[must_use]
pub fn direct_method_name(class_name: &str, method_name: &str) -> String {
    let mangled = class_name
        .replace(['.', '/'], "_")
        .replace('$', "__");
    format!("{DIRECT_METHOD_PREFIX}{mangled}${method_name}")
}

/// Recovers the original method name from a direct method name.
#[must_use]
pub fn original_method_name(direct_name: &str) -> Option<&str> {
    let rest = direct_name.strip_prefix(DIRECT_METHOD_PREFIX)?;
    rest.find('$').map(|at| &rest[at + 1..])
}

/// Name of the native marker stub for `method_name`.
#[must_use]
pub fn native_stub_name(method_name: &str) -> String {
    format!("{NATIVE_STUB_PREFIX}{method_name}")
}

/// The dispatch signature string `owner/name(descriptor)`.
#[must_use]
pub fn method_signature(owner: &str, method_name: &str, descriptor: &str) -> String {
    format!("{owner}/{method_name}{descriptor}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_method_names() {
        let name = direct_method_name("com/example/Foo$Bar", "run");
        assert_eq!(name, "$$robo$$com_example_Foo__Bar$run");
        assert_eq!(original_method_name(&name), Some("run"));

        let name = direct_method_name("com/example/Foo", "__constructor__");
        assert_eq!(original_method_name(&name), Some("__constructor__"));
        assert_eq!(original_method_name("plain"), None);
    }

    #[test]
    fn test_signature_format() {
        assert_eq!(
            method_signature("com/example/Foo", "bar", "(I)V"),
            "com/example/Foo/bar(I)V"
        );
        assert_eq!(native_stub_name("open"), "$$robo$native$open");
    }
}
