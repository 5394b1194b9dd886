use std::fmt;

/// A method selected for interception: a class plus a method name or `*`.
///
/// Class names are dotted binary names (`java.util.LinkedHashMap`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    /// Dotted binary name of the declaring class.
    pub class_name: String,
    /// Method name, or `*` for every method of the class.
    pub method_name: String,
}

impl MethodRef {
    /// Creates a reference to `class_name.method_name`.
    #[must_use]
    pub fn new(class_name: &str, method_name: &str) -> Self {
        MethodRef {
            class_name: class_name.replace('/', "."),
            method_name: method_name.to_string(),
        }
    }

    /// Creates a reference matching every method of `class_name`.
    #[must_use]
    pub fn all_methods(class_name: &str) -> Self {
        Self::new(class_name, "*")
    }

    /// Returns `true` if this reference covers `class_name.method_name`.
    #[must_use]
    pub fn matches(&self, class_name: &str, method_name: &str) -> bool {
        self.class_name == class_name && (self.method_name == "*" || self.method_name == method_name)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.method_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard() {
        let all = MethodRef::all_methods("android/view/IWindowSession");
        assert_eq!(all.class_name, "android.view.IWindowSession");
        assert!(all.matches("android.view.IWindowSession", "relayout"));
        assert!(!all.matches("android.view.Window", "relayout"));

        let one = MethodRef::new("java.lang.System", "nanoTime");
        assert!(one.matches("java.lang.System", "nanoTime"));
        assert!(!one.matches("java.lang.System", "arraycopy"));
        assert_eq!(one.to_string(), "java.lang.System.nanoTime");
    }
}
