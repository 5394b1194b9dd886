//! Field and method descriptors.
//!
//! Descriptors are the JVM's compact type encoding (`I`, `Ljava/lang/String;`,
//! `([BI)V`). [`FieldType`] and [`MethodDescriptor`] parse them into a tree,
//! render them back, and produce the Java-source spelling used in signatures
//! shown to humans (`int[]`, `java.lang.String`).

use std::fmt;

use crate::Result;

/// A single field type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `byte`
    Byte,
    /// `char`
    Char,
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int`
    Int,
    /// `long`
    Long,
    /// `short`
    Short,
    /// `boolean`
    Boolean,
    /// A class or interface type, stored as an internal name (`java/lang/String`).
    Object(String),
    /// An array type with its component type.
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parses a complete field descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the descriptor is empty, truncated or
    /// has trailing characters.
    pub fn parse(descriptor: &str) -> Result<FieldType> {
        let (field_type, rest) = Self::parse_prefix(descriptor)?;
        if !rest.is_empty() {
            return Err(malformed_error!(
                "Trailing characters in field descriptor '{}'",
                descriptor
            ));
        }
        Ok(field_type)
    }

    fn parse_prefix(input: &str) -> Result<(FieldType, &str)> {
        let mut chars = input.chars();
        let Some(tag) = chars.next() else {
            return Err(malformed_error!("Empty field descriptor"));
        };
        let rest = chars.as_str();

        let parsed = match tag {
            'B' => (FieldType::Byte, rest),
            'C' => (FieldType::Char, rest),
            'D' => (FieldType::Double, rest),
            'F' => (FieldType::Float, rest),
            'I' => (FieldType::Int, rest),
            'J' => (FieldType::Long, rest),
            'S' => (FieldType::Short, rest),
            'Z' => (FieldType::Boolean, rest),
            'L' => {
                let end = rest
                    .find(';')
                    .ok_or_else(|| malformed_error!("Unterminated class type in '{}'", input))?;
                if end == 0 {
                    return Err(malformed_error!("Empty class name in '{}'", input));
                }
                (FieldType::Object(rest[..end].to_string()), &rest[end + 1..])
            }
            '[' => {
                let (component, rest) = Self::parse_prefix(rest)?;
                (FieldType::Array(Box::new(component)), rest)
            }
            other => {
                return Err(malformed_error!(
                    "Invalid descriptor character '{}' in '{}'",
                    other,
                    input
                ))
            }
        };
        Ok(parsed)
    }

    /// Returns the type for a Java-source or internal class name.
    ///
    /// Dots are converted to slashes, so both `java.lang.String` and
    /// `java/lang/String` produce the same type.
    #[must_use]
    pub fn object(class_name: &str) -> FieldType {
        FieldType::Object(class_name.replace('.', "/"))
    }

    /// Renders the descriptor form, e.g. `[Ljava/lang/String;`.
    #[must_use]
    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out);
        out
    }

    fn write_descriptor(&self, out: &mut String) {
        match self {
            FieldType::Byte => out.push('B'),
            FieldType::Char => out.push('C'),
            FieldType::Double => out.push('D'),
            FieldType::Float => out.push('F'),
            FieldType::Int => out.push('I'),
            FieldType::Long => out.push('J'),
            FieldType::Short => out.push('S'),
            FieldType::Boolean => out.push('Z'),
            FieldType::Object(name) => {
                out.push('L');
                out.push_str(name);
                out.push(';');
            }
            FieldType::Array(component) => {
                out.push('[');
                component.write_descriptor(out);
            }
        }
    }

    /// Renders the Java-source spelling, e.g. `java.lang.String[]`.
    #[must_use]
    pub fn java_name(&self) -> String {
        match self {
            FieldType::Byte => "byte".to_string(),
            FieldType::Char => "char".to_string(),
            FieldType::Double => "double".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::Int => "int".to_string(),
            FieldType::Long => "long".to_string(),
            FieldType::Short => "short".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Object(name) => name.replace('/', "."),
            FieldType::Array(component) => format!("{}[]", component.java_name()),
        }
    }

    /// Number of local variable / operand slots the type occupies.
    #[must_use]
    pub fn slots(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    /// Returns `true` for object and array types.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }

    /// Returns `true` for `java.lang.Object`.
    #[must_use]
    pub fn is_java_lang_object(&self) -> bool {
        matches!(self, FieldType::Object(name) if name == "java/lang/Object")
    }

    /// Rewrites every class name in the type through `map`.
    #[must_use]
    pub fn map_classes(&self, map: &dyn Fn(&str) -> Option<String>) -> FieldType {
        match self {
            FieldType::Object(name) => FieldType::Object(map(name).unwrap_or_else(|| name.clone())),
            FieldType::Array(component) => FieldType::Array(Box::new(component.map_classes(map))),
            other => other.clone(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// A parsed method descriptor: parameter types and an optional return type
/// (`None` for `void`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order.
    pub parameters: Vec<FieldType>,
    /// Return type, or `None` for `void`.
    pub return_type: Option<FieldType>,
}

impl MethodDescriptor {
    /// Creates a descriptor from parts.
    #[must_use]
    pub fn new(parameters: Vec<FieldType>, return_type: Option<FieldType>) -> Self {
        MethodDescriptor {
            parameters,
            return_type,
        }
    }

    /// Parses a method descriptor such as `(Ljava/lang/String;I)V`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when the descriptor is not well formed.
    pub fn parse(descriptor: &str) -> Result<MethodDescriptor> {
        let Some(mut rest) = descriptor.strip_prefix('(') else {
            return Err(malformed_error!(
                "Method descriptor '{}' does not start with '('",
                descriptor
            ));
        };

        let mut parameters = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            if rest.is_empty() {
                return Err(malformed_error!(
                    "Unterminated parameter list in '{}'",
                    descriptor
                ));
            }
            let (parameter, after) = FieldType::parse_prefix(rest)?;
            parameters.push(parameter);
            rest = after;
        }

        let return_type = if rest == "V" {
            None
        } else {
            Some(FieldType::parse(rest)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }

    /// Total slots needed by the parameters (without `this`).
    #[must_use]
    pub fn parameter_slots(&self) -> u16 {
        self.parameters.iter().map(FieldType::slots).sum()
    }

    /// Returns the parameter part of the descriptor, e.g. `(Ljava/lang/String;I)`.
    #[must_use]
    pub fn parameter_descriptor(&self) -> String {
        let mut out = String::from("(");
        for parameter in &self.parameters {
            parameter.write_descriptor(&mut out);
        }
        out.push(')');
        out
    }

    /// Returns a copy with `extra` inserted before the existing parameters.
    #[must_use]
    pub fn with_leading(&self, extra: &[FieldType]) -> MethodDescriptor {
        let mut parameters = extra.to_vec();
        parameters.extend(self.parameters.iter().cloned());
        MethodDescriptor::new(parameters, self.return_type.clone())
    }

    /// Returns a copy with `extra` appended after the existing parameters.
    #[must_use]
    pub fn with_trailing(&self, extra: &[FieldType]) -> MethodDescriptor {
        let mut parameters = self.parameters.clone();
        parameters.extend(extra.iter().cloned());
        MethodDescriptor::new(parameters, self.return_type.clone())
    }

    /// Rewrites every class name in the descriptor through `map`.
    #[must_use]
    pub fn map_classes(&self, map: &dyn Fn(&str) -> Option<String>) -> MethodDescriptor {
        MethodDescriptor {
            parameters: self.parameters.iter().map(|p| p.map_classes(map)).collect(),
            return_type: self.return_type.as_ref().map(|r| r.map_classes(map)),
        }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parameter_descriptor())?;
        match &self.return_type {
            Some(return_type) => f.write_str(&return_type.descriptor()),
            None => f.write_str("V"),
        }
    }
}

/// Converts a Java-source class name (`a.b.C$D`) to its internal form (`a/b/C$D`).
#[must_use]
pub fn internal_name(class_name: &str) -> String {
    class_name.replace('.', "/")
}

/// Converts an internal class name (`a/b/C$D`) to its Java-source form (`a.b.C$D`).
#[must_use]
pub fn binary_name(internal: &str) -> String {
    internal.replace('/', ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_method_descriptor() {
        let descriptor = MethodDescriptor::parse("(Ljava/lang/String;I[JD)Z").unwrap();
        assert_eq!(
            descriptor.parameters,
            vec![
                FieldType::Object("java/lang/String".into()),
                FieldType::Int,
                FieldType::Array(Box::new(FieldType::Long)),
                FieldType::Double,
            ]
        );
        assert_eq!(descriptor.return_type, Some(FieldType::Boolean));
        assert_eq!(descriptor.parameter_slots(), 5);
        assert_eq!(descriptor.to_string(), "(Ljava/lang/String;I[JD)Z");
    }

    #[test]
    fn test_void_return() {
        let descriptor = MethodDescriptor::parse("()V").unwrap();
        assert!(descriptor.parameters.is_empty());
        assert!(descriptor.return_type.is_none());
    }

    #[test]
    fn test_java_names() {
        let field = FieldType::parse("[[Ljava/util/Map$Entry;").unwrap();
        assert_eq!(field.java_name(), "java.util.Map$Entry[][]");
        assert_eq!(FieldType::Int.java_name(), "int");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(FieldType::parse("Ljava/lang/String").is_err());
        assert!(FieldType::parse("IX").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(FieldType::parse("Q").is_err());
    }

    #[test]
    fn test_map_classes() {
        let descriptor = MethodDescriptor::parse("(Lcom/a/Old;[Lcom/a/Old;)Lcom/a/Keep;").unwrap();
        let mapped = descriptor.map_classes(&|name| {
            (name == "com/a/Old").then(|| "com/b/New".to_string())
        });
        assert_eq!(mapped.to_string(), "(Lcom/b/New;[Lcom/b/New;)Lcom/a/Keep;");
    }
}
