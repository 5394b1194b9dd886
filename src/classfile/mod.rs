//! JVM class file model.
//!
//! This module parses class files into an owned, editable [`ClassFile`] and writes them
//! back out. Names of the class, its superclass, interfaces and members are resolved to
//! strings at parse time so the instrumentor can rename and add members freely; all other
//! constant pool references (`ldc` operands, `ConstantValue`, invoke targets) keep their
//! indices and stay valid because the pool is only ever appended to.
//!
//! # Architecture
//!
//! - [`reader`] - Big-endian cursor and writer over raw bytes
//! - [`constant_pool`] - Pool entries, lookups and deduplicating insertion
//! - [`attributes`] - The decoded attribute subset and raw passthrough
//! - [`descriptor`] - Field and method descriptor types
//! - [`code`] - Label-based instruction lists, decoder, layout and assembler
//! - [`builder`] - Programmatic class construction
//!
//! # Examples
//!
//! ```rust
//! use shadowbox::classfile::{builder::ClassBuilder, AccessFlags, ClassFile};
//!
//! let bytes = ClassBuilder::new("com/example/Foo")
//!     .default_constructor()?
//!     .to_bytes()?;
//! let class = ClassFile::parse(&bytes)?;
//! assert_eq!(class.name, "com/example/Foo");
//! assert!(class.method("<init>", "()V").is_some());
//! # Ok::<(), shadowbox::Error>(())
//! ```

pub mod attributes;
pub mod builder;
pub mod code;
pub mod constant_pool;
pub mod descriptor;
mod flags;
pub mod reader;

pub use attributes::{Annotation, Attribute, CodeAttribute};
pub use constant_pool::{ConstantPool, CpInfo, LoadableConstant, MemberRef};
pub use descriptor::{binary_name, internal_name, FieldType, MethodDescriptor};
pub use flags::AccessFlags;

use crate::{
    classfile::{
        attributes::{annotation_types, parse_attributes, write_attributes},
        reader::{ClassReader, ClassWriter},
    },
    Result,
};

/// Class file magic number.
pub const MAGIC: u32 = 0xCAFE_BABE;

/// A field or method.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    /// Access and property flags.
    pub access_flags: AccessFlags,
    /// Simple name.
    pub name: String,
    /// Field or method descriptor.
    pub descriptor: String,
    /// Member attributes.
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    /// Creates a member without attributes.
    #[must_use]
    pub fn new(access_flags: AccessFlags, name: &str, descriptor: &str) -> Self {
        MemberInfo {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            attributes: Vec::new(),
        }
    }

    /// The `Code` attribute, if the method has a body.
    #[must_use]
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|attribute| match attribute {
            Attribute::Code(code) => Some(code),
            _ => None,
        })
    }

    /// Replaces (or adds) the `Code` attribute.
    pub fn set_code(&mut self, code: CodeAttribute) {
        self.attributes.retain(|a| !matches!(a, Attribute::Code(_)));
        self.attributes.insert(0, Attribute::Code(code));
    }

    /// Removes the `Code` attribute.
    pub fn remove_code(&mut self) {
        self.attributes.retain(|a| !matches!(a, Attribute::Code(_)));
    }

    /// Annotation type descriptors on this member.
    pub fn annotation_types(&self) -> impl Iterator<Item = &str> {
        annotation_types(&self.attributes)
    }
}

/// Alias used where a member is known to be a field.
pub type FieldInfo = MemberInfo;
/// Alias used where a member is known to be a method.
pub type MethodInfo = MemberInfo;

/// A parsed class file.
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version.
    pub minor_version: u16,
    /// Major version.
    pub major_version: u16,
    /// The constant pool; append-only while the class is being transformed.
    pub constant_pool: ConstantPool,
    /// Class access flags.
    pub access_flags: AccessFlags,
    /// Internal name of this class.
    pub name: String,
    /// Internal name of the superclass; `None` only for `java/lang/Object`.
    pub super_name: Option<String>,
    /// Internal names of the direct superinterfaces.
    pub interfaces: Vec<String>,
    /// Declared fields.
    pub fields: Vec<FieldInfo>,
    /// Declared methods.
    pub methods: Vec<MethodInfo>,
    /// Class attributes.
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Parses a class file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad magic number or inconsistent
    /// constant pool references, and [`crate::Error::OutOfBounds`] for truncated data.
    pub fn parse(data: &[u8]) -> Result<ClassFile> {
        let mut reader = ClassReader::new(data);
        let magic = reader.read_u4()?;
        if magic != MAGIC {
            return Err(malformed_error!("Invalid class file magic 0x{:08X}", magic));
        }
        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        let constant_pool = ConstantPool::parse(&mut reader)?;

        let access_flags = AccessFlags::from_bits_retain(reader.read_u2()?);
        let name = constant_pool.class_name(reader.read_u2()?)?.to_string();
        let super_index = reader.read_u2()?;
        let super_name = if super_index == 0 {
            None
        } else {
            Some(constant_pool.class_name(super_index)?.to_string())
        };

        let interface_count = reader.read_u2()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(constant_pool.class_name(reader.read_u2()?)?.to_string());
        }

        let fields = Self::parse_members(&mut reader, &constant_pool)?;
        let methods = Self::parse_members(&mut reader, &constant_pool)?;
        let attributes = parse_attributes(&mut reader, &constant_pool)?;

        Ok(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            name,
            super_name,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    fn parse_members(reader: &mut ClassReader<'_>, pool: &ConstantPool) -> Result<Vec<MemberInfo>> {
        let count = reader.read_u2()?;
        let mut members = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let access_flags = AccessFlags::from_bits_retain(reader.read_u2()?);
            let name = pool.utf8(reader.read_u2()?)?.to_string();
            let descriptor = pool.utf8(reader.read_u2()?)?.to_string();
            let attributes = parse_attributes(reader, pool)?;
            members.push(MemberInfo {
                access_flags,
                name,
                descriptor,
                attributes,
            });
        }
        Ok(members)
    }

    /// Serializes the class.
    ///
    /// Entries missing from the pool (new names, attribute names) are appended to a
    /// copy of it; `self` is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow or if a member
    /// table exceeds 65535 entries.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.fields.len() > 0xFFFF || self.methods.len() > 0xFFFF {
            return Err(malformed_error!("Too many members in {}", self.name));
        }

        let mut pool = self.constant_pool.clone();
        let mut body = ClassWriter::new();

        body.write_u2(self.access_flags.bits());
        body.write_u2(pool.add_class(&self.name)?);
        match &self.super_name {
            Some(super_name) => body.write_u2(pool.add_class(super_name)?),
            None => body.write_u2(0),
        }
        body.write_u2(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            body.write_u2(pool.add_class(interface)?);
        }
        for members in [&self.fields, &self.methods] {
            body.write_u2(members.len() as u16);
            for member in members {
                body.write_u2(member.access_flags.bits());
                body.write_u2(pool.add_utf8(&member.name)?);
                body.write_u2(pool.add_utf8(&member.descriptor)?);
                write_attributes(&member.attributes, &mut pool, &mut body)?;
            }
        }
        write_attributes(&self.attributes, &mut pool, &mut body)?;

        let mut out = ClassWriter::new();
        out.write_u4(MAGIC);
        out.write_u2(self.minor_version);
        out.write_u2(self.major_version);
        pool.write(&mut out);
        out.write_bytes(&body.into_bytes());
        Ok(out.into_bytes())
    }

    /// Dotted binary name, e.g. `com.example.Foo$Bar`.
    #[must_use]
    pub fn binary_name(&self) -> String {
        binary_name(&self.name)
    }

    /// Finds a declared method.
    #[must_use]
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Finds a declared method for modification.
    pub fn method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut MethodInfo> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Finds a declared field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns `true` for interfaces (including annotation types).
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(AccessFlags::INTERFACE)
    }

    /// Returns `true` for annotation types.
    #[must_use]
    pub fn is_annotation(&self) -> bool {
        self.access_flags.contains(AccessFlags::ANNOTATION)
    }

    /// Annotation type descriptors present on the class.
    pub fn annotation_types(&self) -> impl Iterator<Item = &str> {
        annotation_types(&self.attributes)
    }

    /// Returns `true` if the class carries an annotation of type `type_descriptor`.
    #[must_use]
    pub fn has_annotation(&self, type_descriptor: &str) -> bool {
        self.annotation_types().any(|t| t == type_descriptor)
    }

    /// The `SourceFile` attribute value.
    #[must_use]
    pub fn source_file(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attribute| match attribute {
            Attribute::SourceFile(index) => self.constant_pool.utf8(*index).ok(),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::builder::ClassBuilder;

    #[test]
    fn test_parse_rejects_bad_magic() {
        let result = ClassFile::parse(&[0xCA, 0xFE, 0xBA, 0xBF, 0, 0, 0, 52]);
        assert!(matches!(result, Err(crate::Error::Malformed { .. })));
    }

    #[test]
    fn test_parse_rejects_truncated() {
        let bytes = ClassBuilder::new("a/B").to_bytes().unwrap();
        assert!(ClassFile::parse(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_roundtrip_preserves_members() {
        let bytes = ClassBuilder::new("com/example/Thing")
            .super_class("com/example/Base")
            .interface("java/lang/Runnable")
            .source_file("Thing.java")
            .unwrap()
            .field(AccessFlags::PRIVATE | AccessFlags::FINAL, "count", "I")
            .default_constructor()
            .unwrap()
            .method(AccessFlags::PUBLIC, "run", "()V", |asm| {
                asm.return_void();
                Ok(())
            })
            .unwrap()
            .to_bytes()
            .unwrap();

        let class = ClassFile::parse(&bytes).unwrap();
        assert_eq!(class.name, "com/example/Thing");
        assert_eq!(class.super_name.as_deref(), Some("com/example/Base"));
        assert_eq!(class.interfaces, vec!["java/lang/Runnable".to_string()]);
        assert_eq!(class.source_file(), Some("Thing.java"));
        assert!(class.field("count").unwrap().access_flags.is_final());
        assert!(class.method("run", "()V").unwrap().code().is_some());

        let again = ClassFile::parse(&class.to_bytes().unwrap()).unwrap();
        assert_eq!(again.methods, class.methods);
        assert_eq!(again.fields, class.fields);
    }

    #[test]
    fn test_set_code_replaces() {
        let mut member = MemberInfo::new(AccessFlags::PUBLIC, "f", "()V");
        let code = CodeAttribute {
            max_stack: 0,
            max_locals: 1,
            code: vec![code::opcodes::RETURN],
            exception_table: vec![],
            attributes: vec![],
        };
        member.set_code(code.clone());
        member.set_code(code);
        assert_eq!(member.attributes.len(), 1);
        member.remove_code();
        assert!(member.code().is_none());
    }
}
