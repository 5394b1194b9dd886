use std::fmt;

use crate::{
    classfile::{binary_name, MethodDescriptor},
    Result,
};

/// A parsed dispatch signature `owner/name(descriptor)`.
///
/// Instrumented code passes these strings to the dispatch host. Parsing is a pure
/// function of the string, so parsed signatures are cached alongside plans.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Internal name of the declaring class.
    pub class_name: String,
    /// Method name (`__constructor__` for constructors).
    pub method_name: String,
    /// Descriptor string.
    pub descriptor: String,
    /// Parsed descriptor.
    pub parsed: MethodDescriptor,
}

impl MethodSignature {
    /// Parses `owner/name(descriptor)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when the string has no owner, no descriptor,
    /// or the descriptor does not parse.
    pub fn parse(signature: &str) -> Result<Self> {
        let Some(open) = signature.find('(') else {
            return Err(malformed_error!("Signature '{}' has no descriptor", signature));
        };
        let (head, descriptor) = signature.split_at(open);
        let Some(slash) = head.rfind('/') else {
            return Err(malformed_error!("Signature '{}' has no owner", signature));
        };
        Ok(MethodSignature {
            class_name: head[..slash].to_string(),
            method_name: head[slash + 1..].to_string(),
            descriptor: descriptor.to_string(),
            parsed: MethodDescriptor::parse(descriptor)?,
        })
    }

    /// Dotted name of the declaring class.
    #[must_use]
    pub fn binary_class_name(&self) -> String {
        binary_name(&self.class_name)
    }

    /// The parameter part of the descriptor, e.g. `(Ljava/lang/String;I)`.
    #[must_use]
    pub fn parameter_descriptor(&self) -> String {
        self.parsed.parameter_descriptor()
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.class_name, self.method_name, self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::FieldType;

    #[test]
    fn test_parse_signature() {
        let signature = MethodSignature::parse("android/os/Foo$Bar/baz(Ljava/lang/String;J)Z").unwrap();
        assert_eq!(signature.class_name, "android/os/Foo$Bar");
        assert_eq!(signature.method_name, "baz");
        assert_eq!(signature.binary_class_name(), "android.os.Foo$Bar");
        assert_eq!(signature.parsed.return_type, Some(FieldType::Boolean));
        assert_eq!(signature.parameter_descriptor(), "(Ljava/lang/String;J)");
        assert_eq!(
            signature.to_string(),
            "android/os/Foo$Bar/baz(Ljava/lang/String;J)Z"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MethodSignature::parse("noDescriptor").is_err());
        assert!(MethodSignature::parse("noOwner()V").is_err());
    }
}
