//! Operand values.

use std::{fmt, sync::Arc};

use crate::{
    classfile::FieldType,
    runtime::{Object, ObjectData},
    Error, Result,
};

/// A shared reference to a heap object.
pub type ObjectRef = Arc<Object>;

/// A JVM operand value.
///
/// `boolean`, `byte`, `char` and `short` are carried as [`Value::Int`]. `long` and
/// `double` occupy a single operand stack entry; the interpreter accounts for their
/// second local variable slot separately.
#[derive(Clone, Default)]
pub enum Value {
    /// No value: the result of a `void` method, or the upper half of a wide local.
    #[default]
    Void,
    /// `int` and the sub-int types.
    Int(i32),
    /// `long`.
    Long(i64),
    /// `float`.
    Float(f32),
    /// `double`.
    Double(f64),
    /// The `null` reference.
    Null,
    /// A non-null reference.
    Ref(ObjectRef),
}

impl Value {
    /// The zero value for `field_type`; [`Value::Void`] for `None` (a `void` return).
    #[must_use]
    pub fn default_for(field_type: Option<&FieldType>) -> Value {
        match field_type {
            None => Value::Void,
            Some(FieldType::Long) => Value::Long(0),
            Some(FieldType::Float) => Value::Float(0.0),
            Some(FieldType::Double) => Value::Double(0.0),
            Some(FieldType::Object(_) | FieldType::Array(_)) => Value::Null,
            Some(_) => Value::Int(0),
        }
    }

    /// Wraps an optional reference.
    #[must_use]
    pub fn from_ref(object: Option<ObjectRef>) -> Value {
        object.map_or(Value::Null, Value::Ref)
    }

    /// `true` → 1, `false` → 0.
    #[must_use]
    pub fn from_bool(value: bool) -> Value {
        Value::Int(i32::from(value))
    }

    /// Returns `true` for `long` and `double`.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn mismatch(&self, expected: &str) -> Error {
        Error::Linkage(format!("expected {expected} operand, found {self:?}"))
    }

    /// The `int` payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Linkage`] when the value is not an `int`; verified bytecode never does this.
    pub fn as_int(&self) -> Result<i32> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(other.mismatch("int")),
        }
    }

    /// The `int` payload as a boolean.
    ///
    /// # Errors
    ///
    /// See [`Value::as_int`].
    pub fn as_bool(&self) -> Result<bool> {
        Ok(self.as_int()? != 0)
    }

    /// The `long` payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Linkage`] when the value is not a `long`.
    pub fn as_long(&self) -> Result<i64> {
        match self {
            Value::Long(v) => Ok(*v),
            other => Err(other.mismatch("long")),
        }
    }

    /// The `float` payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Linkage`] when the value is not a `float`.
    pub fn as_float(&self) -> Result<f32> {
        match self {
            Value::Float(v) => Ok(*v),
            other => Err(other.mismatch("float")),
        }
    }

    /// The `double` payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Linkage`] when the value is not a `double`.
    pub fn as_double(&self) -> Result<f64> {
        match self {
            Value::Double(v) => Ok(*v),
            other => Err(other.mismatch("double")),
        }
    }

    /// The reference payload; `None` for `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Linkage`] when the value is a primitive.
    pub fn as_ref(&self) -> Result<Option<&ObjectRef>> {
        match self {
            Value::Null => Ok(None),
            Value::Ref(object) => Ok(Some(object)),
            other => Err(other.mismatch("reference")),
        }
    }

    /// The reference payload, if this is a non-null reference.
    #[must_use]
    pub fn object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Ref(object) => Some(object),
            _ => None,
        }
    }

    /// The contents of a `java.lang.String` reference.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Ref(object) => match object.data() {
                ObjectData::Str(value) => Some(value.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Reference identity (`==` on references) or primitive equality.
    #[must_use]
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Ref(a), Value::Ref(b)) => Arc::ptr_eq(a, b),
            (Value::Null, Value::Null) | (Value::Void, Value::Void) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }

    /// Key equality used by the host map types: strings compare by content,
    /// everything else as [`Value::same`].
    #[must_use]
    pub fn key_equals(&self, other: &Value) -> bool {
        match (self.as_str(), other.as_str()) {
            (Some(a), Some(b)) => a == b,
            _ => self.same(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}L"),
            Value::Float(v) => write!(f, "{v}f"),
            Value::Double(v) => write!(f, "{v}d"),
            Value::Null => f.write_str("null"),
            Value::Ref(object) => match object.data() {
                ObjectData::Str(value) => write!(f, "{value:?}"),
                _ => write!(f, "{}@{:x}", object.class().binary_name(), object.id().0),
            },
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Ref(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert!(matches!(Value::default_for(None), Value::Void));
        assert!(matches!(
            Value::default_for(Some(&FieldType::Boolean)),
            Value::Int(0)
        ));
        assert!(matches!(
            Value::default_for(Some(&FieldType::Long)),
            Value::Long(0)
        ));
        assert!(Value::default_for(Some(&FieldType::object("java/lang/String"))).is_null());
    }

    #[test]
    fn test_type_mismatch_is_linkage_error() {
        assert!(matches!(Value::Long(1).as_int(), Err(Error::Linkage(_))));
        assert_eq!(Value::Int(7).as_int().unwrap(), 7);
        assert!(Value::Null.as_ref().unwrap().is_none());
    }
}
