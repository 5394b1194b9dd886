//! The class file constant pool.
//!
//! [`ConstantPool`] is both the parsed pool of an existing class and the
//! builder used when the instrumentor or [`crate::classfile::ClassBuilder`]
//! needs new entries. Entries are append-only: adding never renumbers an
//! existing index, so instructions decoded against the original pool stay
//! valid after the pool has grown.

use crate::{
    classfile::reader::{ClassReader, ClassWriter},
    Result,
};

/// One constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    /// `CONSTANT_Utf8`
    Utf8(String),
    /// `CONSTANT_Integer`
    Integer(i32),
    /// `CONSTANT_Float`
    Float(f32),
    /// `CONSTANT_Long`, occupies two slots
    Long(i64),
    /// `CONSTANT_Double`, occupies two slots
    Double(f64),
    /// `CONSTANT_Class`
    Class {
        /// Utf8 entry holding the internal name
        name_index: u16,
    },
    /// `CONSTANT_String`
    String {
        /// Utf8 entry holding the literal
        string_index: u16,
    },
    /// `CONSTANT_Fieldref`
    Fieldref {
        /// Owning class entry
        class_index: u16,
        /// Name and type entry
        name_and_type_index: u16,
    },
    /// `CONSTANT_Methodref`
    Methodref {
        /// Owning class entry
        class_index: u16,
        /// Name and type entry
        name_and_type_index: u16,
    },
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethodref {
        /// Owning interface entry
        class_index: u16,
        /// Name and type entry
        name_and_type_index: u16,
    },
    /// `CONSTANT_NameAndType`
    NameAndType {
        /// Utf8 name entry
        name_index: u16,
        /// Utf8 descriptor entry
        descriptor_index: u16,
    },
    /// `CONSTANT_MethodHandle`
    MethodHandle {
        /// Handle kind (1..=9)
        reference_kind: u8,
        /// Referenced member entry
        reference_index: u16,
    },
    /// `CONSTANT_MethodType`
    MethodType {
        /// Utf8 descriptor entry
        descriptor_index: u16,
    },
    /// `CONSTANT_Dynamic`
    Dynamic {
        /// Bootstrap method table index
        bootstrap_method_attr_index: u16,
        /// Name and type entry
        name_and_type_index: u16,
    },
    /// `CONSTANT_InvokeDynamic`
    InvokeDynamic {
        /// Bootstrap method table index
        bootstrap_method_attr_index: u16,
        /// Name and type entry
        name_and_type_index: u16,
    },
    /// `CONSTANT_Module`
    Module {
        /// Utf8 name entry
        name_index: u16,
    },
    /// `CONSTANT_Package`
    Package {
        /// Utf8 name entry
        name_index: u16,
    },
}

impl CpInfo {
    fn tag(&self) -> u8 {
        match self {
            CpInfo::Utf8(_) => 1,
            CpInfo::Integer(_) => 3,
            CpInfo::Float(_) => 4,
            CpInfo::Long(_) => 5,
            CpInfo::Double(_) => 6,
            CpInfo::Class { .. } => 7,
            CpInfo::String { .. } => 8,
            CpInfo::Fieldref { .. } => 9,
            CpInfo::Methodref { .. } => 10,
            CpInfo::InterfaceMethodref { .. } => 11,
            CpInfo::NameAndType { .. } => 12,
            CpInfo::MethodHandle { .. } => 15,
            CpInfo::MethodType { .. } => 16,
            CpInfo::Dynamic { .. } => 17,
            CpInfo::InvokeDynamic { .. } => 18,
            CpInfo::Module { .. } => 19,
            CpInfo::Package { .. } => 20,
        }
    }

    fn is_wide(&self) -> bool {
        matches!(self, CpInfo::Long(_) | CpInfo::Double(_))
    }
}

/// A resolved field or method reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Internal name of the owning class.
    pub class_name: String,
    /// Member name.
    pub name: String,
    /// Member descriptor.
    pub descriptor: String,
    /// `true` when the entry is an `InterfaceMethodref`.
    pub interface: bool,
}

/// A loadable constant as seen by `ldc`.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadableConstant {
    /// `int`, `boolean`, `char`, `short` or `byte`
    Integer(i32),
    /// `float`
    Float(f32),
    /// `long`
    Long(i64),
    /// `double`
    Double(f64),
    /// String literal
    String(String),
    /// Class literal, internal name
    Class(String),
}

/// The constant pool of a class file.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    /// Slot 0 and the upper half of long/double entries are `None`.
    entries: Vec<Option<CpInfo>>,
}

impl ConstantPool {
    /// Creates an empty pool (only the reserved slot 0).
    #[must_use]
    pub fn new() -> Self {
        ConstantPool {
            entries: vec![None],
        }
    }

    /// The `constant_pool_count` value: one more than the highest index.
    #[must_use]
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Parses the pool from `reader`, which must be positioned at `constant_pool_count`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for unknown tags and
    /// [`crate::Error::OutOfBounds`] for truncated input.
    pub fn parse(reader: &mut ClassReader<'_>) -> Result<ConstantPool> {
        let count = reader.read_u2()?;
        if count == 0 {
            return Err(malformed_error!("constant_pool_count must be at least 1"));
        }

        let mut entries: Vec<Option<CpInfo>> = Vec::with_capacity(count as usize);
        entries.push(None);

        while entries.len() < count as usize {
            let tag = reader.read_u1()?;
            let entry = match tag {
                1 => {
                    let length = reader.read_u2()? as usize;
                    CpInfo::Utf8(decode_modified_utf8(reader.read_bytes(length)?)?)
                }
                3 => CpInfo::Integer(reader.read_i4()?),
                4 => CpInfo::Float(f32::from_bits(reader.read_u4()?)),
                5 => {
                    let high = u64::from(reader.read_u4()?);
                    let low = u64::from(reader.read_u4()?);
                    CpInfo::Long(((high << 32) | low) as i64)
                }
                6 => {
                    let high = u64::from(reader.read_u4()?);
                    let low = u64::from(reader.read_u4()?);
                    CpInfo::Double(f64::from_bits((high << 32) | low))
                }
                7 => CpInfo::Class {
                    name_index: reader.read_u2()?,
                },
                8 => CpInfo::String {
                    string_index: reader.read_u2()?,
                },
                9 => CpInfo::Fieldref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                10 => CpInfo::Methodref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                11 => CpInfo::InterfaceMethodref {
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                12 => CpInfo::NameAndType {
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                },
                15 => CpInfo::MethodHandle {
                    reference_kind: reader.read_u1()?,
                    reference_index: reader.read_u2()?,
                },
                16 => CpInfo::MethodType {
                    descriptor_index: reader.read_u2()?,
                },
                17 => CpInfo::Dynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                18 => CpInfo::InvokeDynamic {
                    bootstrap_method_attr_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                19 => CpInfo::Module {
                    name_index: reader.read_u2()?,
                },
                20 => CpInfo::Package {
                    name_index: reader.read_u2()?,
                },
                other => {
                    return Err(malformed_error!(
                        "Unknown constant pool tag {} at index {}",
                        other,
                        entries.len()
                    ))
                }
            };

            let wide = entry.is_wide();
            entries.push(Some(entry));
            if wide {
                entries.push(None);
            }
        }

        if entries.len() != count as usize {
            return Err(malformed_error!(
                "Wide constant overruns constant_pool_count {}",
                count
            ));
        }

        Ok(ConstantPool { entries })
    }

    /// Serializes `constant_pool_count` and all entries.
    pub fn write(&self, out: &mut ClassWriter) {
        out.write_u2(self.count());
        for entry in self.entries.iter().flatten() {
            out.write_u1(entry.tag());
            match entry {
                CpInfo::Utf8(value) => {
                    let bytes = encode_modified_utf8(value);
                    out.write_u2(bytes.len() as u16);
                    out.write_bytes(&bytes);
                }
                CpInfo::Integer(value) => out.write_u4(*value as u32),
                CpInfo::Float(value) => out.write_u4(value.to_bits()),
                CpInfo::Long(value) => {
                    let bits = *value as u64;
                    out.write_u4((bits >> 32) as u32);
                    out.write_u4(bits as u32);
                }
                CpInfo::Double(value) => {
                    let bits = value.to_bits();
                    out.write_u4((bits >> 32) as u32);
                    out.write_u4(bits as u32);
                }
                CpInfo::Class { name_index }
                | CpInfo::Module { name_index }
                | CpInfo::Package { name_index } => out.write_u2(*name_index),
                CpInfo::String { string_index } => out.write_u2(*string_index),
                CpInfo::MethodType { descriptor_index } => out.write_u2(*descriptor_index),
                CpInfo::Fieldref {
                    class_index,
                    name_and_type_index,
                }
                | CpInfo::Methodref {
                    class_index,
                    name_and_type_index,
                }
                | CpInfo::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => {
                    out.write_u2(*class_index);
                    out.write_u2(*name_and_type_index);
                }
                CpInfo::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    out.write_u2(*name_index);
                    out.write_u2(*descriptor_index);
                }
                CpInfo::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    out.write_u1(*reference_kind);
                    out.write_u2(*reference_index);
                }
                CpInfo::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }
                | CpInfo::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    out.write_u2(*bootstrap_method_attr_index);
                    out.write_u2(*name_and_type_index);
                }
            }
        }
    }

    /// Returns the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for index 0, an out-of-range index or
    /// the unusable upper slot of a long/double entry.
    pub fn get(&self, index: u16) -> Result<&CpInfo> {
        self.entries
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| malformed_error!("Invalid constant pool index {}", index))
    }

    /// Iterates over `(index, entry)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &CpInfo)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|e| (index as u16, e)))
    }

    /// Returns the string held by a `Utf8` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is missing or of another kind.
    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            CpInfo::Utf8(value) => Ok(value.as_str()),
            other => Err(malformed_error!(
                "Expected Utf8 at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Returns the internal name referenced by a `Class` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is missing or of another kind.
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.utf8(*name_index),
            other => Err(malformed_error!(
                "Expected Class at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Returns `(name, descriptor)` of a `NameAndType` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is missing or of another kind.
    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            CpInfo::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            other => Err(malformed_error!(
                "Expected NameAndType at constant pool index {}, found {:?}",
                index,
                other
            )),
        }
    }

    /// Resolves a `Fieldref`, `Methodref` or `InterfaceMethodref` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the entry is not a member reference.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class_index, name_and_type_index, interface) = match self.get(index)? {
            CpInfo::Fieldref {
                class_index,
                name_and_type_index,
            }
            | CpInfo::Methodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, false),
            CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, true),
            other => {
                return Err(malformed_error!(
                    "Expected member reference at constant pool index {}, found {:?}",
                    index,
                    other
                ))
            }
        };
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Ok(MemberRef {
            class_name: self.class_name(class_index)?.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            interface,
        })
    }

    /// Resolves the constant loaded by `ldc`, `ldc_w` or `ldc2_w`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for entries `ldc` cannot load and
    /// [`crate::Error::Linkage`] for dynamic constants and method handles,
    /// which the interpreter does not support.
    pub fn loadable(&self, index: u16) -> Result<LoadableConstant> {
        match self.get(index)? {
            CpInfo::Integer(value) => Ok(LoadableConstant::Integer(*value)),
            CpInfo::Float(value) => Ok(LoadableConstant::Float(*value)),
            CpInfo::Long(value) => Ok(LoadableConstant::Long(*value)),
            CpInfo::Double(value) => Ok(LoadableConstant::Double(*value)),
            CpInfo::String { string_index } => {
                Ok(LoadableConstant::String(self.utf8(*string_index)?.to_string()))
            }
            CpInfo::Class { name_index } => {
                Ok(LoadableConstant::Class(self.utf8(*name_index)?.to_string()))
            }
            CpInfo::MethodHandle { .. } | CpInfo::MethodType { .. } | CpInfo::Dynamic { .. } => {
                Err(crate::Error::Linkage(format!(
                    "Unsupported loadable constant at index {index}"
                )))
            }
            other => Err(malformed_error!(
                "Constant pool index {} is not loadable: {:?}",
                index,
                other
            )),
        }
    }

    /// Adds `entry`, or returns the index of an identical existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the pool would exceed 65535 slots.
    pub fn add(&mut self, entry: CpInfo) -> Result<u16> {
        if let Some((index, _)) = self.iter().find(|(_, existing)| **existing == entry) {
            return Ok(index);
        }

        let needed = if entry.is_wide() { 2 } else { 1 };
        if self.entries.len() + needed > usize::from(u16::MAX) {
            return Err(malformed_error!("Constant pool overflow"));
        }

        let index = self.entries.len() as u16;
        let wide = entry.is_wide();
        self.entries.push(Some(entry));
        if wide {
            self.entries.push(None);
        }
        Ok(index)
    }

    /// Adds a `Utf8` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn add_utf8(&mut self, value: &str) -> Result<u16> {
        self.add(CpInfo::Utf8(value.to_string()))
    }

    /// Adds a `Class` entry for an internal name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn add_class(&mut self, internal_name: &str) -> Result<u16> {
        let name_index = self.add_utf8(internal_name)?;
        self.add(CpInfo::Class { name_index })
    }

    /// Adds a `String` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn add_string(&mut self, value: &str) -> Result<u16> {
        let string_index = self.add_utf8(value)?;
        self.add(CpInfo::String { string_index })
    }

    /// Adds an `Integer` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn add_integer(&mut self, value: i32) -> Result<u16> {
        self.add(CpInfo::Integer(value))
    }

    /// Adds a `Long` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn add_long(&mut self, value: i64) -> Result<u16> {
        self.add(CpInfo::Long(value))
    }

    /// Adds a `Double` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn add_double(&mut self, value: f64) -> Result<u16> {
        self.add(CpInfo::Double(value))
    }

    /// Adds a `Float` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn add_float(&mut self, value: f32) -> Result<u16> {
        self.add(CpInfo::Float(value))
    }

    /// Adds a `NameAndType` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.add(CpInfo::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    /// Adds a `Fieldref` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn add_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(CpInfo::Fieldref {
            class_index,
            name_and_type_index,
        })
    }

    /// Adds a `Methodref` (or `InterfaceMethodref` when `interface` is set) entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn add_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        if interface {
            self.add(CpInfo::InterfaceMethodref {
                class_index,
                name_and_type_index,
            })
        } else {
            self.add(CpInfo::Methodref {
                class_index,
                name_and_type_index,
            })
        }
    }

    /// Points `Class` entry `index` at a new name.
    ///
    /// The old `Utf8` entry is left untouched because other entries may share it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `index` is not a `Class` entry.
    pub fn rename_class(&mut self, index: u16, internal_name: &str) -> Result<()> {
        let name_index = self.add_utf8(internal_name)?;
        match self.entries.get_mut(index as usize).and_then(Option::as_mut) {
            Some(CpInfo::Class { name_index: slot }) => {
                *slot = name_index;
                Ok(())
            }
            _ => Err(malformed_error!("Constant pool index {} is not a Class", index)),
        }
    }

    /// Points the descriptor of `NameAndType` entry `index` at a new descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `index` is not a `NameAndType` entry.
    pub fn retype_name_and_type(&mut self, index: u16, descriptor: &str) -> Result<()> {
        let descriptor_index = self.add_utf8(descriptor)?;
        match self.entries.get_mut(index as usize).and_then(Option::as_mut) {
            Some(CpInfo::NameAndType {
                descriptor_index: slot,
                ..
            }) => {
                *slot = descriptor_index;
                Ok(())
            }
            _ => Err(malformed_error!(
                "Constant pool index {} is not a NameAndType",
                index
            )),
        }
    }
}

/// Decodes the JVM's modified UTF-8 (`\0` as `C0 80`, supplementary characters as surrogate pairs).
fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    if let Ok(value) = std::str::from_utf8(bytes) {
        return Ok(value.to_string());
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let a = u16::from(bytes[i]);
        if a & 0x80 == 0 {
            units.push(a);
            i += 1;
        } else if a & 0xE0 == 0xC0 {
            let b = u16::from(*bytes.get(i + 1).ok_or(crate::Error::OutOfBounds)?);
            units.push(((a & 0x1F) << 6) | (b & 0x3F));
            i += 2;
        } else if a & 0xF0 == 0xE0 {
            let b = u16::from(*bytes.get(i + 1).ok_or(crate::Error::OutOfBounds)?);
            let c = u16::from(*bytes.get(i + 2).ok_or(crate::Error::OutOfBounds)?);
            units.push(((a & 0x0F) << 12) | ((b & 0x3F) << 6) | (c & 0x3F));
            i += 3;
        } else {
            return Err(malformed_error!("Invalid modified UTF-8 byte 0x{:02X}", a));
        }
    }

    String::from_utf16(&units).map_err(|_| malformed_error!("Invalid UTF-16 surrogates in Utf8"))
}

/// Encodes a string as modified UTF-8.
fn encode_modified_utf8(value: &str) -> Vec<u8> {
    if !value.contains('\0') && value.chars().all(|c| (c as u32) < 0x10000) {
        return value.as_bytes().to_vec();
    }

    let mut out = Vec::with_capacity(value.len() + 4);
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push((0xC0 | (unit >> 6)) as u8);
                out.push((0x80 | (unit & 0x3F)) as u8);
            }
            _ => {
                out.push((0xE0 | (unit >> 12)) as u8);
                out.push((0x80 | ((unit >> 6) & 0x3F)) as u8);
                out.push((0x80 | (unit & 0x3F)) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_deduplicates() {
        let mut pool = ConstantPool::new();
        let a = pool.add_class("com/example/Foo").unwrap();
        let b = pool.add_class("com/example/Foo").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.class_name(a).unwrap(), "com/example/Foo");
    }

    #[test]
    fn test_wide_entries_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.add_long(42).unwrap();
        let next = pool.add_integer(7).unwrap();
        assert_eq!(long, 1);
        assert_eq!(next, 3);
        assert!(pool.get(2).is_err());
        assert_eq!(pool.count(), 4);
    }

    #[test]
    fn test_write_then_parse() {
        let mut pool = ConstantPool::new();
        pool.add_method_ref("java/lang/Object", "<init>", "()V", false)
            .unwrap();
        pool.add_double(1.5).unwrap();
        pool.add_string("nul\0char").unwrap();

        let mut out = ClassWriter::new();
        pool.write(&mut out);
        let bytes = out.into_bytes();

        let parsed = ConstantPool::parse(&mut ClassReader::new(&bytes)).unwrap();
        assert_eq!(parsed.count(), pool.count());
        let method = parsed.member_ref(6).unwrap();
        assert_eq!(method.class_name, "java/lang/Object");
        assert_eq!(method.name, "<init>");
        assert_eq!(method.descriptor, "()V");
        assert!(parsed
            .iter()
            .any(|(_, entry)| *entry == CpInfo::Utf8("nul\0char".to_string())));
    }

    #[test]
    fn test_rename_class_keeps_shared_utf8() {
        let mut pool = ConstantPool::new();
        let class = pool.add_class("a/Old").unwrap();
        let literal = pool.add_string("a/Old").unwrap();
        pool.rename_class(class, "b/New").unwrap();

        assert_eq!(pool.class_name(class).unwrap(), "b/New");
        assert_eq!(
            pool.loadable(literal).unwrap(),
            LoadableConstant::String("a/Old".to_string())
        );
    }
}
