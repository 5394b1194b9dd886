//! [`Code`] layout and the fluent [`CodeAssembler`].

use std::collections::HashMap;

use super::{opcodes::*, Code, Insn, Label, TryCatch};
use crate::{
    classfile::{
        attributes::{Attribute, CodeAttribute, ExceptionTableEntry, LineNumber},
        constant_pool::ConstantPool,
        descriptor::{FieldType, MethodDescriptor},
        reader::ClassWriter,
    },
    Result,
};

/// The typed load opcode for a value of `field_type`.
#[must_use]
pub fn load_opcode(field_type: &FieldType) -> u8 {
    match field_type {
        FieldType::Long => LLOAD,
        FieldType::Double => DLOAD,
        FieldType::Float => FLOAD,
        FieldType::Object(_) | FieldType::Array(_) => ALOAD,
        _ => ILOAD,
    }
}

fn switch_padding(position: usize) -> usize {
    (4 - (position + 1) % 4) % 4
}

fn short_var_form(opcode: u8, index: u16) -> Option<u8> {
    if index > 3 {
        return None;
    }
    match opcode {
        ILOAD..=ALOAD => Some(ILOAD_0 + (opcode - ILOAD) * 4 + index as u8),
        ISTORE..=ASTORE => Some(ISTORE_0 + (opcode - ISTORE) * 4 + index as u8),
        _ => None,
    }
}

fn encoded_size(insn: &Insn, position: usize) -> usize {
    match insn {
        Insn::Label(_) | Insn::Line(_) => 0,
        Insn::Op(_) => 1,
        Insn::IntPush { opcode, .. } => {
            if *opcode == BIPUSH {
                2
            } else {
                3
            }
        }
        Insn::Ldc(index) => {
            if *index <= 0xFF {
                2
            } else {
                3
            }
        }
        Insn::Ldc2(_) => 3,
        Insn::Var { opcode, index } => {
            if short_var_form(*opcode, *index).is_some() {
                1
            } else if *index <= 0xFF {
                2
            } else {
                4
            }
        }
        Insn::Iinc { index, delta } => {
            if *index <= 0xFF && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
        Insn::Jump { .. } => 3,
        Insn::TableSwitch { targets, .. } => 1 + switch_padding(position) + 12 + 4 * targets.len(),
        Insn::LookupSwitch { pairs, .. } => 1 + switch_padding(position) + 8 + 8 * pairs.len(),
        Insn::Field { .. } | Insn::Type { .. } => 3,
        Insn::Invoke { opcode, .. } => {
            if *opcode == INVOKEINTERFACE {
                5
            } else {
                3
            }
        }
        Insn::InvokeDynamic(_) => 5,
        Insn::NewArray(_) => 2,
        Insn::MultiANewArray { .. } => 4,
    }
}

impl Code {
    /// Lays out the instruction list and produces a `Code` attribute.
    ///
    /// [`Insn::Line`] markers become a `LineNumberTable`; try/catch blocks whose
    /// range collapsed to nothing are dropped.
    ///
    /// # Arguments
    ///
    /// * `pool` - Constant pool the instructions refer to; used to compute the
    ///   argument count operand of `invokeinterface`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for unplaced labels, branches that
    /// exceed the 16-bit offset range and code longer than 65535 bytes.
    pub fn encode(&self, pool: &ConstantPool) -> Result<CodeAttribute> {
        let mut labels: HashMap<Label, usize> = HashMap::new();
        let mut position = 0usize;
        for insn in &self.insns {
            if let Insn::Label(label) = insn {
                labels.insert(*label, position);
            }
            position += encoded_size(insn, position);
        }
        if position == 0 || position > 65535 {
            return Err(malformed_error!("Invalid code size {}", position));
        }

        let resolve = |label: &Label| -> Result<usize> {
            labels
                .get(label)
                .copied()
                .ok_or_else(|| malformed_error!("Label {:?} is never placed", label))
        };

        let mut out = ClassWriter::new();
        let mut lines = Vec::new();

        for insn in &self.insns {
            let here = out.len();
            match insn {
                Insn::Label(_) => {}
                Insn::Line(line) => lines.push(LineNumber {
                    start_pc: here as u16,
                    line: *line,
                }),
                Insn::Op(opcode) => out.write_u1(*opcode),
                Insn::IntPush { opcode, value } => {
                    out.write_u1(*opcode);
                    if *opcode == BIPUSH {
                        out.write_u1(*value as i8 as u8);
                    } else {
                        out.write_u2(*value as u16);
                    }
                }
                Insn::Ldc(index) => {
                    if *index <= 0xFF {
                        out.write_u1(LDC);
                        out.write_u1(*index as u8);
                    } else {
                        out.write_u1(LDC_W);
                        out.write_u2(*index);
                    }
                }
                Insn::Ldc2(index) => {
                    out.write_u1(LDC2_W);
                    out.write_u2(*index);
                }
                Insn::Var { opcode, index } => {
                    if let Some(short) = short_var_form(*opcode, *index) {
                        out.write_u1(short);
                    } else if *index <= 0xFF {
                        out.write_u1(*opcode);
                        out.write_u1(*index as u8);
                    } else {
                        out.write_u1(WIDE);
                        out.write_u1(*opcode);
                        out.write_u2(*index);
                    }
                }
                Insn::Iinc { index, delta } => {
                    if *index <= 0xFF && i8::try_from(*delta).is_ok() {
                        out.write_u1(IINC);
                        out.write_u1(*index as u8);
                        out.write_u1(*delta as i8 as u8);
                    } else {
                        out.write_u1(WIDE);
                        out.write_u1(IINC);
                        out.write_u2(*index);
                        out.write_u2(*delta as u16);
                    }
                }
                Insn::Jump { opcode, target } => {
                    let delta = resolve(target)? as i64 - here as i64;
                    let delta = i16::try_from(delta)
                        .map_err(|_| malformed_error!("Branch offset {} out of range", delta))?;
                    out.write_u1(*opcode);
                    out.write_u2(delta as u16);
                }
                Insn::TableSwitch {
                    default,
                    low,
                    targets,
                } => {
                    out.write_u1(TABLESWITCH);
                    for _ in 0..switch_padding(here) {
                        out.write_u1(0);
                    }
                    out.write_u4((resolve(default)? as i64 - here as i64) as u32);
                    out.write_u4(*low as u32);
                    out.write_u4((*low + targets.len() as i32 - 1) as u32);
                    for target in targets {
                        out.write_u4((resolve(target)? as i64 - here as i64) as u32);
                    }
                }
                Insn::LookupSwitch { default, pairs } => {
                    out.write_u1(LOOKUPSWITCH);
                    for _ in 0..switch_padding(here) {
                        out.write_u1(0);
                    }
                    out.write_u4((resolve(default)? as i64 - here as i64) as u32);
                    out.write_u4(pairs.len() as u32);
                    for (key, target) in pairs {
                        out.write_u4(*key as u32);
                        out.write_u4((resolve(target)? as i64 - here as i64) as u32);
                    }
                }
                Insn::Field { opcode, index } | Insn::Type { opcode, index } => {
                    out.write_u1(*opcode);
                    out.write_u2(*index);
                }
                Insn::Invoke { opcode, index } => {
                    out.write_u1(*opcode);
                    out.write_u2(*index);
                    if *opcode == INVOKEINTERFACE {
                        let member = pool.member_ref(*index)?;
                        let descriptor = MethodDescriptor::parse(&member.descriptor)?;
                        out.write_u1((descriptor.parameter_slots() + 1) as u8);
                        out.write_u1(0);
                    }
                }
                Insn::InvokeDynamic(index) => {
                    out.write_u1(INVOKEDYNAMIC);
                    out.write_u2(*index);
                    out.write_u2(0);
                }
                Insn::NewArray(element) => {
                    out.write_u1(NEWARRAY);
                    out.write_u1(*element);
                }
                Insn::MultiANewArray { index, dimensions } => {
                    out.write_u1(MULTIANEWARRAY);
                    out.write_u2(*index);
                    out.write_u1(*dimensions);
                }
            }
        }

        let mut exception_table = Vec::with_capacity(self.try_catch.len());
        for block in &self.try_catch {
            let start = resolve(&block.start)?;
            let end = resolve(&block.end)?;
            if end <= start {
                continue;
            }
            exception_table.push(ExceptionTableEntry {
                start_pc: start as u16,
                end_pc: end as u16,
                handler_pc: resolve(&block.handler)? as u16,
                catch_type: block.catch_type,
            });
        }

        let mut attributes = Vec::with_capacity(self.attributes.len() + 1);
        if !lines.is_empty() {
            attributes.push(Attribute::LineNumberTable(lines));
        }
        attributes.extend(self.attributes.iter().cloned());

        Ok(CodeAttribute {
            max_stack: self.max_stack,
            max_locals: self.max_locals,
            code: out.into_bytes(),
            exception_table,
            attributes,
        })
    }
}

/// Fluent builder for method bodies.
///
/// Every emitter appends one instruction and returns `&mut Self` so calls can be
/// chained; emitters that add constant pool entries return [`Result`] because the
/// pool can overflow. The assembler tracks the operand stack depth of straight-line
/// code and uses the maximum as `max_stack`; `max_locals` grows to cover every
/// local slot touched.
///
/// # Examples
///
/// ```rust
/// use shadowbox::classfile::{code::CodeAssembler, ConstantPool};
///
/// let mut pool = ConstantPool::new();
/// let mut asm = CodeAssembler::new(&mut pool, 1);
/// asm.aload(0)
///     .invokespecial("java/lang/Object", "<init>", "()V")?
///     .return_void();
/// let code = asm.finish();
/// assert_eq!(code.max_stack, 1);
/// # Ok::<(), shadowbox::Error>(())
/// ```
pub struct CodeAssembler<'a> {
    pool: &'a mut ConstantPool,
    code: Code,
    depth: i32,
    max_depth: i32,
    max_locals: u16,
}

impl<'a> CodeAssembler<'a> {
    /// Creates an assembler emitting into a fresh body with `max_locals` slots.
    pub fn new(pool: &'a mut ConstantPool, max_locals: u16) -> Self {
        CodeAssembler {
            pool,
            code: Code::new(0, max_locals),
            depth: 0,
            max_depth: 0,
            max_locals,
        }
    }

    /// The constant pool being emitted against.
    pub fn pool(&mut self) -> &mut ConstantPool {
        self.pool
    }

    fn push(&mut self, insn: Insn, effect: i32) -> &mut Self {
        self.code.insns.push(insn);
        self.depth += effect;
        self.max_depth = self.max_depth.max(self.depth);
        self
    }

    /// Sets the tracked stack depth, e.g. at a handler entry or after an unconditional jump.
    pub fn set_depth(&mut self, depth: i32) -> &mut Self {
        self.depth = depth;
        self.max_depth = self.max_depth.max(depth);
        self
    }

    /// Appends an already decoded instruction with a known stack effect.
    pub fn raw(&mut self, insn: Insn, effect: i32) -> &mut Self {
        self.push(insn, effect)
    }

    /// Allocates a label.
    pub fn new_label(&mut self) -> Label {
        self.code.new_label()
    }

    /// Places `label` at the current position.
    pub fn label(&mut self, label: Label) -> &mut Self {
        self.push(Insn::Label(label), 0)
    }

    /// Marks the start of source line `line`.
    pub fn line(&mut self, line: u16) -> &mut Self {
        self.push(Insn::Line(line), 0)
    }

    /// Emits an operand-less instruction with the given stack effect.
    pub fn op(&mut self, opcode: u8, effect: i32) -> &mut Self {
        self.push(Insn::Op(opcode), effect)
    }

    /// `aconst_null`
    pub fn aconst_null(&mut self) -> &mut Self {
        self.op(ACONST_NULL, 1)
    }

    /// Pushes an `int` using the shortest encoding.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn iconst(&mut self, value: i32) -> Result<&mut Self> {
        Ok(match value {
            -1..=5 => self.op((i32::from(ICONST_0) + value) as u8, 1),
            -128..=127 => self.push(
                Insn::IntPush {
                    opcode: BIPUSH,
                    value: value as i16,
                },
                1,
            ),
            -32768..=32767 => self.push(
                Insn::IntPush {
                    opcode: SIPUSH,
                    value: value as i16,
                },
                1,
            ),
            _ => {
                let index = self.pool.add_integer(value)?;
                self.push(Insn::Ldc(index), 1)
            }
        })
    }

    /// Pushes a `long` constant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn lconst(&mut self, value: i64) -> Result<&mut Self> {
        Ok(match value {
            0 => self.op(LCONST_0, 2),
            1 => self.op(LCONST_1, 2),
            _ => {
                let index = self.pool.add_long(value)?;
                self.push(Insn::Ldc2(index), 2)
            }
        })
    }

    /// Pushes a `double` constant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn dconst(&mut self, value: f64) -> Result<&mut Self> {
        if value.to_bits() == 0 {
            return Ok(self.op(DCONST_0, 2));
        }
        if value == 1.0 {
            return Ok(self.op(DCONST_1, 2));
        }
        let index = self.pool.add_double(value)?;
        Ok(self.push(Insn::Ldc2(index), 2))
    }

    /// Pushes a `float` constant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn fconst(&mut self, value: f32) -> Result<&mut Self> {
        if value.to_bits() == 0 {
            return Ok(self.op(FCONST_0, 1));
        }
        let index = self.pool.add_float(value)?;
        Ok(self.push(Insn::Ldc(index), 1))
    }

    /// Pushes a string literal.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn ldc_string(&mut self, value: &str) -> Result<&mut Self> {
        let index = self.pool.add_string(value)?;
        Ok(self.push(Insn::Ldc(index), 1))
    }

    fn touch_local(&mut self, index: u16, size: u16) {
        self.max_locals = self.max_locals.max(index.saturating_add(size));
    }

    /// Loads local `index` with a typed load opcode (`ILOAD`..`ALOAD`).
    pub fn load(&mut self, opcode: u8, index: u16) -> &mut Self {
        let effect = if opcode == LLOAD || opcode == DLOAD { 2 } else { 1 };
        self.touch_local(index, effect as u16);
        self.push(Insn::Var { opcode, index }, effect)
    }

    /// Stores to local `index` with a typed store opcode (`ISTORE`..`ASTORE`).
    pub fn store(&mut self, opcode: u8, index: u16) -> &mut Self {
        let effect = if opcode == LSTORE || opcode == DSTORE { -2 } else { -1 };
        self.touch_local(index, (-effect) as u16);
        self.push(Insn::Var { opcode, index }, effect)
    }

    /// `aload index`
    pub fn aload(&mut self, index: u16) -> &mut Self {
        self.load(ALOAD, index)
    }

    /// `astore index`
    pub fn astore(&mut self, index: u16) -> &mut Self {
        self.store(ASTORE, index)
    }

    /// `iload index`
    pub fn iload(&mut self, index: u16) -> &mut Self {
        self.load(ILOAD, index)
    }

    /// `istore index`
    pub fn istore(&mut self, index: u16) -> &mut Self {
        self.store(ISTORE, index)
    }

    /// `iinc index delta`
    pub fn iinc(&mut self, index: u16, delta: i16) -> &mut Self {
        self.touch_local(index, 1);
        self.push(Insn::Iinc { index, delta }, 0)
    }

    /// `dup`
    pub fn dup(&mut self) -> &mut Self {
        self.op(DUP, 1)
    }

    /// `pop`
    pub fn pop(&mut self) -> &mut Self {
        self.op(POP, -1)
    }

    /// `iadd`
    pub fn iadd(&mut self) -> &mut Self {
        self.op(IADD, -1)
    }

    /// `isub`
    pub fn isub(&mut self) -> &mut Self {
        self.op(ISUB, -1)
    }

    /// `imul`
    pub fn imul(&mut self) -> &mut Self {
        self.op(IMUL, -1)
    }

    /// Emits a branch. Conditional branches pop their operands.
    pub fn jump(&mut self, opcode: u8, target: Label) -> &mut Self {
        let effect = match opcode {
            IFEQ..=IFLE | IFNULL | IFNONNULL => -1,
            IF_ICMPEQ..=IF_ACMPNE => -2,
            _ => 0,
        };
        self.push(Insn::Jump { opcode, target }, effect)
    }

    /// `goto target`
    pub fn goto(&mut self, target: Label) -> &mut Self {
        self.jump(GOTO, target)
    }

    fn field(&mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        let index = self.pool.add_field_ref(owner, name, descriptor)?;
        let size = i32::from(FieldType::parse(descriptor)?.slots());
        let effect = match opcode {
            GETSTATIC => size,
            PUTSTATIC => -size,
            GETFIELD => size - 1,
            _ => -size - 1,
        };
        Ok(self.push(Insn::Field { opcode, index }, effect))
    }

    /// `getfield owner.name:descriptor`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor or pool overflow.
    pub fn getfield(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.field(GETFIELD, owner, name, descriptor)
    }

    /// `putfield owner.name:descriptor`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor or pool overflow.
    pub fn putfield(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.field(PUTFIELD, owner, name, descriptor)
    }

    /// `getstatic owner.name:descriptor`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor or pool overflow.
    pub fn getstatic(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.field(GETSTATIC, owner, name, descriptor)
    }

    /// `putstatic owner.name:descriptor`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor or pool overflow.
    pub fn putstatic(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.field(PUTSTATIC, owner, name, descriptor)
    }

    /// Emits an invoke instruction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor or pool overflow.
    pub fn invoke(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<&mut Self> {
        let parsed = MethodDescriptor::parse(descriptor)?;
        let index =
            self.pool
                .add_method_ref(owner, name, descriptor, opcode == INVOKEINTERFACE)?;
        let receiver = i32::from(opcode != INVOKESTATIC);
        let returned = parsed
            .return_type
            .as_ref()
            .map_or(0, |r| i32::from(r.slots()));
        let effect = returned - i32::from(parsed.parameter_slots()) - receiver;
        Ok(self.push(Insn::Invoke { opcode, index }, effect))
    }

    /// `invokevirtual`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor or pool overflow.
    pub fn invokevirtual(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.invoke(INVOKEVIRTUAL, owner, name, descriptor)
    }

    /// `invokespecial`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor or pool overflow.
    pub fn invokespecial(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.invoke(INVOKESPECIAL, owner, name, descriptor)
    }

    /// `invokestatic`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor or pool overflow.
    pub fn invokestatic(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.invoke(INVOKESTATIC, owner, name, descriptor)
    }

    /// `invokeinterface`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad descriptor or pool overflow.
    pub fn invokeinterface(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.invoke(INVOKEINTERFACE, owner, name, descriptor)
    }

    fn type_insn(&mut self, opcode: u8, class: &str, effect: i32) -> Result<&mut Self> {
        let index = self.pool.add_class(class)?;
        Ok(self.push(Insn::Type { opcode, index }, effect))
    }

    /// `new class`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn new_object(&mut self, class: &str) -> Result<&mut Self> {
        self.type_insn(NEW, class, 1)
    }

    /// `anewarray component`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn anewarray(&mut self, component: &str) -> Result<&mut Self> {
        self.type_insn(ANEWARRAY, component, 0)
    }

    /// `checkcast class`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn checkcast(&mut self, class: &str) -> Result<&mut Self> {
        self.type_insn(CHECKCAST, class, 0)
    }

    /// `instanceof class`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn instanceof(&mut self, class: &str) -> Result<&mut Self> {
        self.type_insn(INSTANCEOF, class, 0)
    }

    /// `newarray` of a primitive element code from [`array_type`].
    pub fn newarray(&mut self, element: u8) -> &mut Self {
        self.push(Insn::NewArray(element), 0)
    }

    /// `athrow`
    pub fn athrow(&mut self) -> &mut Self {
        self.op(ATHROW, -1)
    }

    /// `return`
    pub fn return_void(&mut self) -> &mut Self {
        self.op(RETURN, 0)
    }

    /// `areturn`
    pub fn areturn(&mut self) -> &mut Self {
        self.op(ARETURN, -1)
    }

    /// `ireturn`
    pub fn ireturn(&mut self) -> &mut Self {
        self.op(IRETURN, -1)
    }

    /// Loads every parameter of `descriptor`, starting at local `first_slot`.
    pub fn load_args(&mut self, descriptor: &MethodDescriptor, first_slot: u16) -> &mut Self {
        let mut slot = first_slot;
        for parameter in &descriptor.parameters {
            self.load(load_opcode(parameter), slot);
            slot += parameter.slots();
        }
        self
    }

    /// Pushes the zero value of `return_type`; nothing for `void`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn push_default(&mut self, return_type: Option<&FieldType>) -> Result<&mut Self> {
        Ok(match return_type {
            None => self,
            Some(FieldType::Long) => self.lconst(0)?,
            Some(FieldType::Double) => self.dconst(0.0)?,
            Some(FieldType::Float) => self.fconst(0.0)?,
            Some(FieldType::Object(_) | FieldType::Array(_)) => self.aconst_null(),
            Some(_) => self.iconst(0)?,
        })
    }

    /// Emits the return instruction matching `return_type`.
    pub fn xreturn(&mut self, return_type: Option<&FieldType>) -> &mut Self {
        match return_type {
            None => self.return_void(),
            Some(FieldType::Long) => self.op(LRETURN, -2),
            Some(FieldType::Double) => self.op(DRETURN, -2),
            Some(FieldType::Float) => self.op(FRETURN, -1),
            Some(FieldType::Object(_) | FieldType::Array(_)) => self.areturn(),
            Some(_) => self.ireturn(),
        }
    }

    /// Registers a try/catch block; `catch_type` of `None` catches everything.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] on constant pool overflow.
    pub fn try_catch(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<&mut Self> {
        let catch_type = match catch_type {
            Some(class) => self.pool.add_class(class)?,
            None => 0,
        };
        self.code.try_catch.push(TryCatch {
            start,
            end,
            handler,
            catch_type,
        });
        Ok(self)
    }

    /// Finishes the body, filling in `max_stack` from the tracked depth.
    #[must_use]
    pub fn finish(mut self) -> Code {
        self.code.max_stack = self.max_depth.max(0) as u16;
        self.code.max_locals = self.max_locals;
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_roundtrip_with_branches() {
        let mut pool = ConstantPool::new();
        let mut asm = CodeAssembler::new(&mut pool, 2);
        let zero = asm.new_label();
        asm.iload(1).jump(IFEQ, zero).iconst(1).unwrap().ireturn();
        asm.label(zero).iconst(0).unwrap().ireturn();
        let code = asm.finish();

        let attribute = code.encode(&pool).unwrap();
        assert_eq!(
            attribute.code,
            vec![ILOAD_1, IFEQ, 0x00, 0x05, ICONST_1, IRETURN, ICONST_0, IRETURN]
        );

        let decoded = Code::decode(&attribute).unwrap();
        assert_eq!(decoded.encode(&pool).unwrap().code, attribute.code);
    }

    #[test]
    fn test_wide_forms() {
        let mut code = Code::new(1, 300);
        code.insns.push(Insn::Var {
            opcode: ILOAD,
            index: 300,
        });
        code.insns.push(Insn::Iinc {
            index: 2,
            delta: 1000,
        });
        code.insns.push(Insn::Op(IRETURN));
        let attribute = code.encode(&ConstantPool::new()).unwrap();
        assert_eq!(
            attribute.code,
            vec![WIDE, ILOAD, 0x01, 0x2C, WIDE, IINC, 0x00, 0x02, 0x03, 0xE8, IRETURN]
        );
    }

    #[test]
    fn test_unplaced_label_fails() {
        let mut code = Code::new(0, 0);
        let label = code.new_label();
        code.insns.push(Insn::Jump {
            opcode: GOTO,
            target: label,
        });
        assert!(code.encode(&ConstantPool::new()).is_err());
    }

    #[test]
    fn test_max_stack_tracking() {
        let mut pool = ConstantPool::new();
        let mut asm = CodeAssembler::new(&mut pool, 1);
        asm.ldc_string("a")
            .unwrap()
            .lconst(5)
            .unwrap()
            .invokestatic("x/Y", "f", "(Ljava/lang/String;J)I")
            .unwrap()
            .ireturn();
        let code = asm.finish();
        assert_eq!(code.max_stack, 3);
    }

    #[test]
    fn test_delegate_shape() {
        let descriptor = MethodDescriptor::parse("(JLjava/lang/String;)D").unwrap();
        let mut pool = ConstantPool::new();
        let mut asm = CodeAssembler::new(&mut pool, 0);
        asm.load_args(&descriptor, 1)
            .push_default(descriptor.return_type.as_ref())
            .unwrap();
        asm.xreturn(descriptor.return_type.as_ref());
        let code = asm.finish();
        assert_eq!(code.max_locals, 4);
        assert_eq!(code.insns[0], Insn::Var { opcode: LLOAD, index: 1 });
        assert_eq!(code.insns[1], Insn::Var { opcode: ALOAD, index: 3 });
        assert_eq!(code.insns[3], Insn::Op(DRETURN));
    }

    #[test]
    fn test_line_numbers_encode() {
        let mut pool = ConstantPool::new();
        let mut asm = CodeAssembler::new(&mut pool, 0);
        asm.line(7).return_void();
        let attribute = asm.finish().encode(&pool).unwrap();
        assert_eq!(
            attribute.attributes,
            vec![Attribute::LineNumberTable(vec![LineNumber {
                start_pc: 0,
                line: 7
            }])]
        );
    }
}
