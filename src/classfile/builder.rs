//! Programmatic construction of class files.
//!
//! Used to synthesize host-side classes and the fixture classes the test suites
//! load through a sandbox.

use crate::{
    classfile::{
        attributes::{marker_annotation, Attribute},
        code::CodeAssembler,
        AccessFlags, ClassFile, ConstantPool, MemberInfo, MethodDescriptor,
    },
    Result,
};

/// Java 8 class file version.
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

/// Fluent builder for a [`ClassFile`].
///
/// # Examples
///
/// ```rust
/// use shadowbox::classfile::{builder::ClassBuilder, AccessFlags};
///
/// let class = ClassBuilder::new("com/example/Counter")
///     .field(AccessFlags::PRIVATE, "count", "I")
///     .default_constructor()?
///     .method(AccessFlags::PUBLIC, "get", "()I", |asm| {
///         asm.aload(0).getfield("com/example/Counter", "count", "I")?.ireturn();
///         Ok(())
///     })?
///     .build();
/// assert_eq!(class.methods.len(), 2);
/// # Ok::<(), shadowbox::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    class: ClassFile,
}

impl ClassBuilder {
    /// Starts a public class extending `java/lang/Object`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            class: ClassFile {
                minor_version: 0,
                major_version: DEFAULT_MAJOR_VERSION,
                constant_pool: ConstantPool::new(),
                access_flags: AccessFlags::PUBLIC | AccessFlags::SUPER,
                name: name.to_string(),
                super_name: Some("java/lang/Object".to_string()),
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                attributes: Vec::new(),
            },
        }
    }

    /// Replaces the class access flags.
    #[must_use]
    pub fn access(mut self, access_flags: AccessFlags) -> Self {
        self.class.access_flags = access_flags;
        self
    }

    /// Sets the superclass.
    #[must_use]
    pub fn super_class(mut self, name: &str) -> Self {
        self.class.super_name = Some(name.to_string());
        self
    }

    /// Adds a superinterface.
    #[must_use]
    pub fn interface(mut self, name: &str) -> Self {
        self.class.interfaces.push(name.to_string());
        self
    }

    /// Sets the `SourceFile` attribute.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn source_file(mut self, file_name: &str) -> Result<Self> {
        let index = self.class.constant_pool.add_utf8(file_name)?;
        self.class
            .attributes
            .retain(|a| !matches!(a, Attribute::SourceFile(_)));
        self.class.attributes.push(Attribute::SourceFile(index));
        Ok(self)
    }

    /// Adds a runtime-visible marker annotation, e.g. `Lshadowbox/annotation/Instrument;`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn annotation(mut self, type_descriptor: &str) -> Result<Self> {
        let annotation = marker_annotation(&mut self.class.constant_pool, type_descriptor)?;
        for attribute in &mut self.class.attributes {
            if let Attribute::Annotations {
                visible: true,
                annotations,
            } = attribute
            {
                annotations.push(annotation);
                return Ok(self);
            }
        }
        self.class.attributes.push(Attribute::Annotations {
            visible: true,
            annotations: vec![annotation],
        });
        Ok(self)
    }

    /// Declares a field.
    #[must_use]
    pub fn field(mut self, access_flags: AccessFlags, name: &str, descriptor: &str) -> Self {
        self.class
            .fields
            .push(MemberInfo::new(access_flags, name, descriptor));
        self
    }

    /// Adds a method with a body produced by `body`.
    ///
    /// `max_locals` starts at the receiver plus parameter slots and grows with
    /// any local the body touches.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor, pool overflow or a
    /// body that fails to lay out; errors returned by `body` are passed through.
    pub fn method<F>(
        mut self,
        access_flags: AccessFlags,
        name: &str,
        descriptor: &str,
        body: F,
    ) -> Result<Self>
    where
        F: FnOnce(&mut CodeAssembler<'_>) -> Result<()>,
    {
        let parsed = MethodDescriptor::parse(descriptor)?;
        let receiver = u16::from(!access_flags.is_static());
        let mut asm =
            CodeAssembler::new(&mut self.class.constant_pool, parsed.parameter_slots() + receiver);
        body(&mut asm)?;
        let code = asm.finish();
        let attribute = code.encode(&self.class.constant_pool)?;

        let mut method = MemberInfo::new(access_flags, name, descriptor);
        method.set_code(attribute);
        self.class.methods.push(method);
        Ok(self)
    }

    /// Adds a method without a body (`abstract` or `native`, as given by `access_flags`).
    #[must_use]
    pub fn bodiless_method(mut self, access_flags: AccessFlags, name: &str, descriptor: &str) -> Self {
        self.class
            .methods
            .push(MemberInfo::new(access_flags, name, descriptor));
        self
    }

    /// Adds a public no-argument constructor that only calls `super()`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn default_constructor(self) -> Result<Self> {
        let super_name = self
            .class
            .super_name
            .clone()
            .unwrap_or_else(|| "java/lang/Object".to_string());
        self.method(AccessFlags::PUBLIC, "<init>", "()V", |asm| {
            asm.aload(0)
                .invokespecial(&super_name, "<init>", "()V")?
                .return_void();
            Ok(())
        })
    }

    /// Finishes the class.
    #[must_use]
    pub fn build(self) -> ClassFile {
        self.class
    }

    /// Finishes and serializes the class.
    ///
    /// # Errors
    ///
    /// See [`ClassFile::to_bytes`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.class.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotations_accumulate() {
        let class = ClassBuilder::new("a/B")
            .annotation("La/One;")
            .unwrap()
            .annotation("La/Two;")
            .unwrap()
            .build();
        assert_eq!(class.annotation_types().collect::<Vec<_>>(), vec!["La/One;", "La/Two;"]);
        assert_eq!(class.attributes.len(), 1);
    }

    #[test]
    fn test_method_locals_cover_parameters() {
        let class = ClassBuilder::new("a/B")
            .method(AccessFlags::PUBLIC | AccessFlags::STATIC, "f", "(JI)I", |asm| {
                asm.iload(2).ireturn();
                Ok(())
            })
            .unwrap()
            .build();
        let code = class.method("f", "(JI)I").unwrap().code().unwrap();
        assert_eq!(code.max_locals, 3);
        assert_eq!(code.max_stack, 1);
    }

    #[test]
    fn test_default_constructor_calls_declared_super() {
        let class = ClassBuilder::new("a/B")
            .super_class("a/Base")
            .default_constructor()
            .unwrap()
            .build();
        let code = class.method("<init>", "()V").unwrap().code().unwrap();
        let decoded = crate::classfile::code::Code::decode(code).unwrap();
        let invoke = decoded
            .insns
            .iter()
            .find_map(|insn| match insn {
                crate::classfile::code::Insn::Invoke { index, .. } => Some(*index),
                _ => None,
            })
            .unwrap();
        assert_eq!(class.constant_pool.member_ref(invoke).unwrap().class_name, "a/Base");
    }
}
