//! Bytecode to [`Code`] decoding.

use std::collections::{BTreeMap, BTreeSet};

use super::{opcodes::*, Code, Insn, Label, TryCatch};
use crate::{
    classfile::{
        attributes::{Attribute, CodeAttribute},
        reader::ClassReader,
    },
    Result,
};

/// Instruction with absolute byte offsets as branch targets, before labels are placed.
enum Raw {
    Plain(Insn),
    Jump(u8, u32),
    TableSwitch(u32, i32, Vec<u32>),
    LookupSwitch(u32, Vec<(i32, u32)>),
}

impl Code {
    /// Decodes a `Code` attribute.
    ///
    /// Branch targets, exception ranges and line starts become labels. The
    /// `LineNumberTable` turns into [`Insn::Line`] markers; `StackMapTable`,
    /// `LocalVariableTable` and `LocalVariableTypeTable` are offset based and
    /// are dropped because they would not survive editing.
    ///
    /// # Arguments
    ///
    /// * `attribute` - The raw code attribute of a method
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for unknown opcodes, branches that do
    /// not land on an instruction boundary and truncated instructions.
    pub fn decode(attribute: &CodeAttribute) -> Result<Code> {
        let bytes = &attribute.code;
        let mut reader = ClassReader::new(bytes);
        let mut decoded: Vec<(u32, Raw)> = Vec::new();

        while reader.has_more_data() {
            let offset = reader.pos() as u32;
            let raw = decode_one(&mut reader, offset)?;
            decoded.push((offset, raw));
        }

        let boundaries: BTreeSet<u32> = decoded.iter().map(|(offset, _)| *offset).collect();
        let code_length = bytes.len() as u32;
        let check = |target: u32| -> Result<u32> {
            if boundaries.contains(&target) || target == code_length {
                Ok(target)
            } else {
                Err(malformed_error!(
                    "Branch target {} is not an instruction boundary",
                    target
                ))
            }
        };

        let mut targets: BTreeSet<u32> = BTreeSet::new();
        for (_, raw) in &decoded {
            match raw {
                Raw::Jump(_, target) => {
                    targets.insert(check(*target)?);
                }
                Raw::TableSwitch(default, _, list) => {
                    targets.insert(check(*default)?);
                    for target in list {
                        targets.insert(check(*target)?);
                    }
                }
                Raw::LookupSwitch(default, pairs) => {
                    targets.insert(check(*default)?);
                    for (_, target) in pairs {
                        targets.insert(check(*target)?);
                    }
                }
                Raw::Plain(_) => {}
            }
        }

        let mut try_catch = Vec::with_capacity(attribute.exception_table.len());
        for entry in &attribute.exception_table {
            let start = check(u32::from(entry.start_pc))?;
            let end = check(u32::from(entry.end_pc))?;
            let handler = check(u32::from(entry.handler_pc))?;
            targets.extend([start, end, handler]);
            try_catch.push(TryCatch {
                start: Label(start),
                end: Label(end),
                handler: Label(handler),
                catch_type: entry.catch_type,
            });
        }

        let mut lines: BTreeMap<u32, u16> = BTreeMap::new();
        let mut attributes = Vec::new();
        for nested in &attribute.attributes {
            match nested {
                Attribute::LineNumberTable(entries) => {
                    for entry in entries {
                        if boundaries.contains(&u32::from(entry.start_pc)) {
                            lines.insert(u32::from(entry.start_pc), entry.line);
                        }
                    }
                }
                Attribute::Raw { name, .. }
                    if matches!(
                        name.as_str(),
                        "StackMapTable" | "LocalVariableTable" | "LocalVariableTypeTable"
                    ) => {}
                other => attributes.push(other.clone()),
            }
        }

        let mut insns = Vec::with_capacity(decoded.len() + targets.len() + lines.len());
        for (offset, raw) in decoded {
            if targets.contains(&offset) {
                insns.push(Insn::Label(Label(offset)));
            }
            if let Some(line) = lines.get(&offset) {
                insns.push(Insn::Line(*line));
            }
            insns.push(match raw {
                Raw::Plain(insn) => insn,
                Raw::Jump(opcode, target) => Insn::Jump {
                    opcode,
                    target: Label(target),
                },
                Raw::TableSwitch(default, low, list) => Insn::TableSwitch {
                    default: Label(default),
                    low,
                    targets: list.into_iter().map(Label).collect(),
                },
                Raw::LookupSwitch(default, pairs) => Insn::LookupSwitch {
                    default: Label(default),
                    pairs: pairs.into_iter().map(|(k, t)| (k, Label(t))).collect(),
                },
            });
        }
        if targets.contains(&code_length) {
            insns.push(Insn::Label(Label(code_length)));
        }

        let mut code = Code::new(attribute.max_stack, attribute.max_locals);
        code.insns = insns;
        code.try_catch = try_catch;
        code.attributes = attributes;
        Ok(code)
    }
}

fn branch_target(offset: u32, delta: i32) -> Result<u32> {
    let target = i64::from(offset) + i64::from(delta);
    u32::try_from(target).map_err(|_| malformed_error!("Negative branch target at {}", offset))
}

fn decode_one(reader: &mut ClassReader<'_>, offset: u32) -> Result<Raw> {
    let opcode = reader.read_u1()?;
    let insn = match opcode {
        BIPUSH => Insn::IntPush {
            opcode,
            value: i16::from(reader.read_i1()?),
        },
        SIPUSH => Insn::IntPush {
            opcode,
            value: reader.read_i2()?,
        },
        LDC => Insn::Ldc(u16::from(reader.read_u1()?)),
        LDC_W => Insn::Ldc(reader.read_u2()?),
        LDC2_W => Insn::Ldc2(reader.read_u2()?),
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Var {
            opcode,
            index: u16::from(reader.read_u1()?),
        },
        ILOAD_0..=ALOAD_3 => Insn::Var {
            opcode: ILOAD + (opcode - ILOAD_0) / 4,
            index: u16::from((opcode - ILOAD_0) % 4),
        },
        ISTORE_0..=ASTORE_3 => Insn::Var {
            opcode: ISTORE + (opcode - ISTORE_0) / 4,
            index: u16::from((opcode - ISTORE_0) % 4),
        },
        IINC => Insn::Iinc {
            index: u16::from(reader.read_u1()?),
            delta: i16::from(reader.read_i1()?),
        },
        IFEQ..=JSR | IFNULL | IFNONNULL => {
            let delta = i32::from(reader.read_i2()?);
            return Ok(Raw::Jump(opcode, branch_target(offset, delta)?));
        }
        GOTO_W | JSR_W => {
            let delta = reader.read_i4()?;
            let normalized = if opcode == GOTO_W { GOTO } else { JSR };
            return Ok(Raw::Jump(normalized, branch_target(offset, delta)?));
        }
        TABLESWITCH => {
            let padding = (4 - (offset as usize + 1) % 4) % 4;
            reader.skip(padding)?;
            let default = branch_target(offset, reader.read_i4()?)?;
            let low = reader.read_i4()?;
            let high = reader.read_i4()?;
            if high < low {
                return Err(malformed_error!("tableswitch high < low at {}", offset));
            }
            let count = (i64::from(high) - i64::from(low) + 1) as usize;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(branch_target(offset, reader.read_i4()?)?);
            }
            return Ok(Raw::TableSwitch(default, low, targets));
        }
        LOOKUPSWITCH => {
            let padding = (4 - (offset as usize + 1) % 4) % 4;
            reader.skip(padding)?;
            let default = branch_target(offset, reader.read_i4()?)?;
            let count = reader.read_i4()?;
            if count < 0 {
                return Err(malformed_error!("lookupswitch negative npairs at {}", offset));
            }
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key = reader.read_i4()?;
                pairs.push((key, branch_target(offset, reader.read_i4()?)?));
            }
            return Ok(Raw::LookupSwitch(default, pairs));
        }
        GETSTATIC..=PUTFIELD => Insn::Field {
            opcode,
            index: reader.read_u2()?,
        },
        INVOKEVIRTUAL..=INVOKESTATIC => Insn::Invoke {
            opcode,
            index: reader.read_u2()?,
        },
        INVOKEINTERFACE => {
            let index = reader.read_u2()?;
            reader.skip(2)?;
            Insn::Invoke { opcode, index }
        }
        INVOKEDYNAMIC => {
            let index = reader.read_u2()?;
            reader.skip(2)?;
            Insn::InvokeDynamic(index)
        }
        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Insn::Type {
            opcode,
            index: reader.read_u2()?,
        },
        NEWARRAY => Insn::NewArray(reader.read_u1()?),
        MULTIANEWARRAY => Insn::MultiANewArray {
            index: reader.read_u2()?,
            dimensions: reader.read_u1()?,
        },
        WIDE => {
            let modified = reader.read_u1()?;
            match modified {
                ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Var {
                    opcode: modified,
                    index: reader.read_u2()?,
                },
                IINC => Insn::Iinc {
                    index: reader.read_u2()?,
                    delta: reader.read_i2()?,
                },
                other => {
                    return Err(malformed_error!(
                        "Invalid wide operand {} at {}",
                        mnemonic(other),
                        offset
                    ))
                }
            }
        }
        NOP..=DCONST_1
        | IALOAD..=SALOAD
        | IASTORE..=LXOR
        | I2L..=DCMPG
        | IRETURN..=RETURN
        | ARRAYLENGTH
        | ATHROW
        | MONITORENTER
        | MONITOREXIT => Insn::Op(opcode),
        other => {
            return Err(malformed_error!(
                "Unknown opcode 0x{:02X} at offset {}",
                other,
                offset
            ))
        }
    };
    Ok(Raw::Plain(insn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::attributes::{ExceptionTableEntry, LineNumber};

    /// `astore_1` (JVMS §6.5); the opcode table only names range endpoints.
    const ASTORE_1: u8 = 0x4C;

    fn attribute(code: Vec<u8>) -> CodeAttribute {
        CodeAttribute {
            max_stack: 2,
            max_locals: 2,
            code,
            exception_table: vec![],
            attributes: vec![],
        }
    }

    #[test]
    fn test_decode_branch_places_label() {
        // 0: iload_0, 1: ifeq +5 (-> 6), 4: iconst_1, 5: ireturn, 6: iconst_0, 7: ireturn
        let code = Code::decode(&attribute(vec![
            ILOAD_0, IFEQ, 0x00, 0x05, ICONST_1, IRETURN, ICONST_0, IRETURN,
        ]))
        .unwrap();

        assert_eq!(
            code.insns,
            vec![
                Insn::Var { opcode: ILOAD, index: 0 },
                Insn::Jump {
                    opcode: IFEQ,
                    target: Label(6)
                },
                Insn::Op(ICONST_1),
                Insn::Op(IRETURN),
                Insn::Label(Label(6)),
                Insn::Op(ICONST_0),
                Insn::Op(IRETURN),
            ]
        );
    }

    #[test]
    fn test_decode_rejects_mid_instruction_target() {
        let result = Code::decode(&attribute(vec![GOTO, 0x00, 0x02, RETURN]));
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_lines_and_handlers() {
        let mut attr = attribute(vec![ACONST_NULL, ATHROW, ASTORE_1, RETURN]);
        attr.exception_table.push(ExceptionTableEntry {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 2,
            catch_type: 0,
        });
        attr.attributes.push(Attribute::LineNumberTable(vec![
            LineNumber { start_pc: 0, line: 10 },
            LineNumber { start_pc: 2, line: 11 },
        ]));
        attr.attributes.push(Attribute::Raw {
            name: "StackMapTable".into(),
            info: vec![0, 0],
        });

        let code = Code::decode(&attr).unwrap();
        assert_eq!(code.insns[0], Insn::Label(Label(0)));
        assert_eq!(code.insns[1], Insn::Line(10));
        assert_eq!(code.try_catch[0].handler, Label(2));
        assert!(code.attributes.is_empty());
    }

    #[test]
    fn test_decode_wide_and_switch() {
        // 0: wide iload 0x0100; 4: tableswitch (pad to 8) default/low/high + 1 target
        let mut bytes = vec![WIDE, ILOAD, 0x01, 0x00, TABLESWITCH, 0, 0, 0];
        bytes.extend_from_slice(&20i32.to_be_bytes()); // default -> 24
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&20i32.to_be_bytes()); // case 0 -> 24
        bytes.push(RETURN);

        let code = Code::decode(&attribute(bytes)).unwrap();
        assert_eq!(
            code.insns[0],
            Insn::Var {
                opcode: ILOAD,
                index: 256
            }
        );
        assert_eq!(
            code.insns[1],
            Insn::TableSwitch {
                default: Label(24),
                low: 0,
                targets: vec![Label(24)]
            }
        );
    }
}
