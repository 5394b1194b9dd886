//! Access flags shared by classes, fields and methods.
//!
//! The JVM reuses several bit positions with different meanings depending on
//! the owner (`ACC_SUPER` vs `ACC_SYNCHRONIZED`, `ACC_BRIDGE` vs `ACC_VOLATILE`).
//! [`AccessFlags`] exposes every bit once under its most common name and adds
//! aliases for the overlapping positions.

use bitflags::bitflags;

bitflags! {
    /// Access and property flags of a class, field or method.
    ///
    /// Unknown bits are retained so that rewriting a class never loses
    /// information the instrumentor does not understand.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u16 {
        /// Declared `public`.
        const PUBLIC = 0x0001;
        /// Declared `private`.
        const PRIVATE = 0x0002;
        /// Declared `protected`.
        const PROTECTED = 0x0004;
        /// Declared `static`.
        const STATIC = 0x0008;
        /// Declared `final`.
        const FINAL = 0x0010;
        /// `ACC_SUPER` on classes, `synchronized` on methods.
        const SUPER = 0x0020;
        /// `volatile` on fields, bridge marker on methods.
        const VOLATILE = 0x0040;
        /// `transient` on fields, varargs marker on methods.
        const TRANSIENT = 0x0080;
        /// Declared `native`.
        const NATIVE = 0x0100;
        /// The class is an interface.
        const INTERFACE = 0x0200;
        /// Declared `abstract`.
        const ABSTRACT = 0x0400;
        /// Declared `strictfp`.
        const STRICT = 0x0800;
        /// Not present in source code.
        const SYNTHETIC = 0x1000;
        /// The class is an annotation type.
        const ANNOTATION = 0x2000;
        /// Enum class or enum constant field.
        const ENUM = 0x4000;

        const _ = !0;
    }
}

impl AccessFlags {
    /// Alias of [`AccessFlags::SUPER`] for methods.
    pub const SYNCHRONIZED: AccessFlags = AccessFlags::SUPER;
    /// Alias of [`AccessFlags::VOLATILE`] for methods.
    pub const BRIDGE: AccessFlags = AccessFlags::VOLATILE;
    /// Alias of [`AccessFlags::TRANSIENT`] for methods.
    pub const VARARGS: AccessFlags = AccessFlags::TRANSIENT;

    /// Visibility bits.
    pub const VISIBILITY: AccessFlags = AccessFlags::PUBLIC
        .union(AccessFlags::PRIVATE)
        .union(AccessFlags::PROTECTED);

    /// Replaces the visibility bits with `visibility`.
    #[must_use]
    pub fn with_visibility(self, visibility: AccessFlags) -> AccessFlags {
        (self - AccessFlags::VISIBILITY) | (visibility & AccessFlags::VISIBILITY)
    }

    /// Returns `true` if the flags describe a static member.
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(AccessFlags::STATIC)
    }

    /// Returns `true` if the flags describe a final class or member.
    #[must_use]
    pub fn is_final(self) -> bool {
        self.contains(AccessFlags::FINAL)
    }

    /// Returns `true` if the flags describe a native method.
    #[must_use]
    pub fn is_native(self) -> bool {
        self.contains(AccessFlags::NATIVE)
    }

    /// Returns `true` if the flags describe an abstract class or method.
    #[must_use]
    pub fn is_abstract(self) -> bool {
        self.contains(AccessFlags::ABSTRACT)
    }
}
