//! Class, field, method and code attributes.
//!
//! Only the attributes the sandbox interprets are decoded: `Code`,
//! `ConstantValue`, `SourceFile`, `LineNumberTable` and the two annotation
//! attributes (annotation type names only, with the original bytes kept for
//! writing). Everything else round-trips verbatim as [`Attribute::Raw`].

use crate::{
    classfile::{
        constant_pool::ConstantPool,
        reader::{ClassReader, ClassWriter},
    },
    Result,
};

/// One entry of a `Code` attribute's exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    /// First covered bytecode offset.
    pub start_pc: u16,
    /// Offset one past the last covered instruction.
    pub end_pc: u16,
    /// Handler offset.
    pub handler_pc: u16,
    /// `Class` entry of the caught type, or 0 for catch-all.
    pub catch_type: u16,
}

/// One `LineNumberTable` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// Bytecode offset where the line starts.
    pub start_pc: u16,
    /// Source line.
    pub line: u16,
}

/// The `Code` attribute of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    /// Maximum operand stack depth.
    pub max_stack: u16,
    /// Number of local variable slots.
    pub max_locals: u16,
    /// Raw bytecode.
    pub code: Vec<u8>,
    /// Exception handlers.
    pub exception_table: Vec<ExceptionTableEntry>,
    /// Nested attributes (line numbers, local variables, stack maps).
    pub attributes: Vec<Attribute>,
}

/// A runtime annotation: its type and its complete encoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Field descriptor of the annotation type, e.g. `Lshadowbox/annotation/Instrument;`.
    pub type_descriptor: String,
    /// The encoded `annotation` structure, with `type_index` valid in the owning pool.
    pub raw: Vec<u8>,
}

/// A decoded attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// Method bytecode.
    Code(CodeAttribute),
    /// Initial value of a static field.
    ConstantValue(u16),
    /// Source file name (`Utf8` index).
    SourceFile(u16),
    /// Bytecode offset to source line mapping.
    LineNumberTable(Vec<LineNumber>),
    /// `RuntimeVisibleAnnotations` (`visible == true`) or `RuntimeInvisibleAnnotations`.
    Annotations {
        /// Retention: visible at runtime or class-file only.
        visible: bool,
        /// Annotations in declaration order.
        annotations: Vec<Annotation>,
    },
    /// Any attribute not decoded above.
    Raw {
        /// Attribute name.
        name: String,
        /// Attribute payload.
        info: Vec<u8>,
    },
}

impl Attribute {
    /// The attribute name as written in the class file.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Attribute::Code(_) => "Code",
            Attribute::ConstantValue(_) => "ConstantValue",
            Attribute::SourceFile(_) => "SourceFile",
            Attribute::LineNumberTable(_) => "LineNumberTable",
            Attribute::Annotations { visible: true, .. } => "RuntimeVisibleAnnotations",
            Attribute::Annotations { visible: false, .. } => "RuntimeInvisibleAnnotations",
            Attribute::Raw { name, .. } => name,
        }
    }
}

/// Parses an `attributes_count` prefixed attribute table.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged tables.
pub fn parse_attributes(reader: &mut ClassReader<'_>, pool: &ConstantPool) -> Result<Vec<Attribute>> {
    let count = reader.read_u2()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        attributes.push(parse_attribute(reader, pool)?);
    }
    Ok(attributes)
}

fn parse_attribute(reader: &mut ClassReader<'_>, pool: &ConstantPool) -> Result<Attribute> {
    let name = pool.utf8(reader.read_u2()?)?.to_string();
    let length = reader.read_u4()? as usize;
    let info = reader.read_bytes(length)?;
    let mut body = ClassReader::new(info);

    let attribute = match name.as_str() {
        "Code" => {
            let max_stack = body.read_u2()?;
            let max_locals = body.read_u2()?;
            let code_length = body.read_u4()? as usize;
            if code_length == 0 || code_length > 65535 {
                return Err(malformed_error!("Invalid code length {}", code_length));
            }
            let code = body.read_bytes(code_length)?.to_vec();
            let table_length = body.read_u2()?;
            let mut exception_table = Vec::with_capacity(table_length as usize);
            for _ in 0..table_length {
                exception_table.push(ExceptionTableEntry {
                    start_pc: body.read_u2()?,
                    end_pc: body.read_u2()?,
                    handler_pc: body.read_u2()?,
                    catch_type: body.read_u2()?,
                });
            }
            let attributes = parse_attributes(&mut body, pool)?;
            Attribute::Code(CodeAttribute {
                max_stack,
                max_locals,
                code,
                exception_table,
                attributes,
            })
        }
        "ConstantValue" => Attribute::ConstantValue(body.read_u2()?),
        "SourceFile" => Attribute::SourceFile(body.read_u2()?),
        "LineNumberTable" => {
            let count = body.read_u2()?;
            let mut lines = Vec::with_capacity(count as usize);
            for _ in 0..count {
                lines.push(LineNumber {
                    start_pc: body.read_u2()?,
                    line: body.read_u2()?,
                });
            }
            Attribute::LineNumberTable(lines)
        }
        "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
            let count = body.read_u2()?;
            let mut annotations = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let start = body.pos();
                let type_index = body.read_u2()?;
                skip_annotation_pairs(&mut body)?;
                annotations.push(Annotation {
                    type_descriptor: pool.utf8(type_index)?.to_string(),
                    raw: info[start..body.pos()].to_vec(),
                });
            }
            Attribute::Annotations {
                visible: name == "RuntimeVisibleAnnotations",
                annotations,
            }
        }
        _ => Attribute::Raw {
            name,
            info: info.to_vec(),
        },
    };

    Ok(attribute)
}

fn skip_annotation_pairs(reader: &mut ClassReader<'_>) -> Result<()> {
    let pairs = reader.read_u2()?;
    for _ in 0..pairs {
        reader.skip(2)?;
        skip_element_value(reader)?;
    }
    Ok(())
}

fn skip_element_value(reader: &mut ClassReader<'_>) -> Result<()> {
    match reader.read_u1()? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => reader.skip(2),
        b'e' => reader.skip(4),
        b'@' => {
            reader.skip(2)?;
            skip_annotation_pairs(reader)
        }
        b'[' => {
            let count = reader.read_u2()?;
            for _ in 0..count {
                skip_element_value(reader)?;
            }
            Ok(())
        }
        tag => Err(malformed_error!("Invalid element_value tag '{}'", tag as char)),
    }
}

/// Writes an `attributes_count` prefixed attribute table.
///
/// Attribute names are added to `pool` when missing.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] on constant pool overflow.
pub fn write_attributes(
    attributes: &[Attribute],
    pool: &mut ConstantPool,
    out: &mut ClassWriter,
) -> Result<()> {
    out.write_u2(attributes.len() as u16);
    for attribute in attributes {
        write_attribute(attribute, pool, out)?;
    }
    Ok(())
}

fn write_attribute(attribute: &Attribute, pool: &mut ConstantPool, out: &mut ClassWriter) -> Result<()> {
    out.write_u2(pool.add_utf8(attribute.name())?);
    let length_offset = out.len();
    out.write_u4(0);
    let start = out.len();

    match attribute {
        Attribute::Code(code) => {
            out.write_u2(code.max_stack);
            out.write_u2(code.max_locals);
            out.write_u4(code.code.len() as u32);
            out.write_bytes(&code.code);
            out.write_u2(code.exception_table.len() as u16);
            for entry in &code.exception_table {
                out.write_u2(entry.start_pc);
                out.write_u2(entry.end_pc);
                out.write_u2(entry.handler_pc);
                out.write_u2(entry.catch_type);
            }
            write_attributes(&code.attributes, pool, out)?;
        }
        Attribute::ConstantValue(index) | Attribute::SourceFile(index) => out.write_u2(*index),
        Attribute::LineNumberTable(lines) => {
            out.write_u2(lines.len() as u16);
            for line in lines {
                out.write_u2(line.start_pc);
                out.write_u2(line.line);
            }
        }
        Attribute::Annotations { annotations, .. } => {
            out.write_u2(annotations.len() as u16);
            for annotation in annotations {
                out.write_bytes(&annotation.raw);
            }
        }
        Attribute::Raw { info, .. } => out.write_bytes(info),
    }

    let length = out.len() - start;
    out.patch_u4(length_offset, length as u32);
    Ok(())
}

/// Returns the annotation type descriptors present in `attributes`.
pub fn annotation_types(attributes: &[Attribute]) -> impl Iterator<Item = &str> {
    attributes.iter().flat_map(|attribute| match attribute {
        Attribute::Annotations { annotations, .. } => annotations
            .iter()
            .map(|a| a.type_descriptor.as_str())
            .collect::<Vec<_>>(),
        _ => Vec::new(),
    })
}

/// Builds a marker annotation (no element values) of type `type_descriptor`.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] on constant pool overflow.
pub fn marker_annotation(pool: &mut ConstantPool, type_descriptor: &str) -> Result<Annotation> {
    let type_index = pool.add_utf8(type_descriptor)?;
    let mut raw = Vec::with_capacity(4);
    raw.extend_from_slice(&type_index.to_be_bytes());
    raw.extend_from_slice(&0u16.to_be_bytes());
    Ok(Annotation {
        type_descriptor: type_descriptor.to_string(),
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_roundtrip_keeps_elements() {
        let mut pool = ConstantPool::new();
        let marker = marker_annotation(&mut pool, "Lcom/example/Marker;").unwrap();

        // An annotation with one int element: name index + 'I' + const index.
        let type_index = pool.add_utf8("Lcom/example/Valued;").unwrap();
        let name_index = pool.add_utf8("value").unwrap();
        let const_index = pool.add_integer(3).unwrap();
        let mut valued = Vec::new();
        valued.extend_from_slice(&type_index.to_be_bytes());
        valued.extend_from_slice(&1u16.to_be_bytes());
        valued.extend_from_slice(&name_index.to_be_bytes());
        valued.push(b'I');
        valued.extend_from_slice(&const_index.to_be_bytes());

        let attribute = Attribute::Annotations {
            visible: true,
            annotations: vec![
                marker,
                Annotation {
                    type_descriptor: "Lcom/example/Valued;".into(),
                    raw: valued,
                },
            ],
        };

        let mut out = ClassWriter::new();
        write_attributes(std::slice::from_ref(&attribute), &mut pool, &mut out).unwrap();
        let bytes = out.into_bytes();
        let parsed = parse_attributes(&mut ClassReader::new(&bytes), &pool).unwrap();

        assert_eq!(parsed, vec![attribute]);
        assert_eq!(
            annotation_types(&parsed).collect::<Vec<_>>(),
            vec!["Lcom/example/Marker;", "Lcom/example/Valued;"]
        );
    }

    #[test]
    fn test_unknown_attribute_is_raw() {
        let mut pool = ConstantPool::new();
        let attribute = Attribute::Raw {
            name: "Signature".into(),
            info: vec![0, 1],
        };
        let mut out = ClassWriter::new();
        write_attributes(std::slice::from_ref(&attribute), &mut pool, &mut out).unwrap();
        let bytes = out.into_bytes();
        let parsed = parse_attributes(&mut ClassReader::new(&bytes), &pool).unwrap();
        assert_eq!(parsed, vec![attribute]);
    }
}
