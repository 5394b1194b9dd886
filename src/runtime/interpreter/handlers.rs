//! Instruction handlers, grouped by category.

use std::sync::{Arc, Mutex};

use crate::{
    classfile::{
        code::opcodes::{array_type, *},
        FieldType,
    },
    runtime::{
        class::Linked, interpreter::StepResult, JavaException, Object,
        ObjectData, ObjectRef, RuntimeClass, RuntimeField, Value,
    },
    Error, Result,
};

use super::{FrameState, Interpreter};

fn int_op(state: &mut FrameState, op: impl FnOnce(i32, i32) -> i32) -> Result<()> {
    let b = state.pop_int()?;
    let a = state.pop_int()?;
    state.push(Value::Int(op(a, b)));
    Ok(())
}

fn long_op(state: &mut FrameState, op: impl FnOnce(i64, i64) -> i64) -> Result<()> {
    let b = state.pop_long()?;
    let a = state.pop_long()?;
    state.push(Value::Long(op(a, b)));
    Ok(())
}

fn float_op(state: &mut FrameState, op: impl FnOnce(f32, f32) -> f32) -> Result<()> {
    let b = state.pop_float()?;
    let a = state.pop_float()?;
    state.push(Value::Float(op(a, b)));
    Ok(())
}

fn double_op(state: &mut FrameState, op: impl FnOnce(f64, f64) -> f64) -> Result<()> {
    let b = state.pop_double()?;
    let a = state.pop_double()?;
    state.push(Value::Double(op(a, b)));
    Ok(())
}

fn long_shift(state: &mut FrameState, op: impl FnOnce(i64, u32) -> i64) -> Result<()> {
    let shift = state.pop_int()?;
    let value = state.pop_long()?;
    state.push(Value::Long(op(value, shift as u32 & 0x3f)));
    Ok(())
}

/// `-1`, `0` or `1`; `nan` decides unordered comparisons.
fn float_compare(a: f64, b: f64, nan: i32) -> i32 {
    match a.partial_cmp(&b) {
        Some(std::cmp::Ordering::Less) => -1,
        Some(std::cmp::Ordering::Equal) => 0,
        Some(std::cmp::Ordering::Greater) => 1,
        None => nan,
    }
}

/// Element descriptor of a `newarray` type code.
fn primitive_component(code: u8) -> Option<FieldType> {
    Some(match code {
        array_type::BOOLEAN => FieldType::Boolean,
        array_type::CHAR => FieldType::Char,
        array_type::FLOAT => FieldType::Float,
        array_type::DOUBLE => FieldType::Double,
        array_type::BYTE => FieldType::Byte,
        array_type::SHORT => FieldType::Short,
        array_type::INT => FieldType::Int,
        array_type::LONG => FieldType::Long,
        _ => return None,
    })
}

/// Name of the array class whose elements are instances of `class_name`.
fn array_class_name(class_name: &str) -> String {
    if class_name.starts_with('[') {
        format!("[{class_name}")
    } else {
        format!("[L{class_name};")
    }
}

impl Interpreter {
    pub(super) fn local_variable(opcode: u8, index: u16, state: &mut FrameState) -> Result<StepResult> {
        match opcode {
            ILOAD..=ALOAD => {
                let value = state.load(index)?;
                state.push(value);
            }
            ISTORE..=ASTORE => {
                let value = state.pop()?;
                state.store(index, value)?;
            }
            _ => {
                return Err(Error::Linkage(format!(
                    "{} is not supported",
                    mnemonic(opcode)
                )))
            }
        }
        Ok(StepResult::Continue)
    }

    pub(super) fn arithmetic(&mut self, opcode: u8, state: &mut FrameState) -> Result<StepResult> {
        match opcode {
            IADD => int_op(state, i32::wrapping_add)?,
            LADD => long_op(state, i64::wrapping_add)?,
            FADD => float_op(state, |a, b| a + b)?,
            DADD => double_op(state, |a, b| a + b)?,
            ISUB => int_op(state, i32::wrapping_sub)?,
            LSUB => long_op(state, i64::wrapping_sub)?,
            FSUB => float_op(state, |a, b| a - b)?,
            DSUB => double_op(state, |a, b| a - b)?,
            IMUL => int_op(state, i32::wrapping_mul)?,
            LMUL => long_op(state, i64::wrapping_mul)?,
            FMUL => float_op(state, |a, b| a * b)?,
            DMUL => double_op(state, |a, b| a * b)?,
            IDIV | IREM => {
                let b = state.pop_int()?;
                let a = state.pop_int()?;
                if b == 0 {
                    return Err(self.throw_new("java/lang/ArithmeticException", "/ by zero"));
                }
                state.push(Value::Int(if opcode == IDIV {
                    a.wrapping_div(b)
                } else {
                    a.wrapping_rem(b)
                }));
            }
            LDIV | LREM => {
                let b = state.pop_long()?;
                let a = state.pop_long()?;
                if b == 0 {
                    return Err(self.throw_new("java/lang/ArithmeticException", "/ by zero"));
                }
                state.push(Value::Long(if opcode == LDIV {
                    a.wrapping_div(b)
                } else {
                    a.wrapping_rem(b)
                }));
            }
            FDIV => float_op(state, |a, b| a / b)?,
            DDIV => double_op(state, |a, b| a / b)?,
            FREM => float_op(state, |a, b| a % b)?,
            DREM => double_op(state, |a, b| a % b)?,
            INEG => {
                let value = state.pop_int()?;
                state.push(Value::Int(value.wrapping_neg()));
            }
            LNEG => {
                let value = state.pop_long()?;
                state.push(Value::Long(value.wrapping_neg()));
            }
            FNEG => {
                let value = state.pop_float()?;
                state.push(Value::Float(-value));
            }
            DNEG => {
                let value = state.pop_double()?;
                state.push(Value::Double(-value));
            }
            ISHL => int_op(state, |a, b| a.wrapping_shl(b as u32))?,
            ISHR => int_op(state, |a, b| a.wrapping_shr(b as u32))?,
            IUSHR => int_op(state, |a, b| ((a as u32) >> (b as u32 & 0x1f)) as i32)?,
            LSHL => long_shift(state, i64::wrapping_shl)?,
            LSHR => long_shift(state, i64::wrapping_shr)?,
            LUSHR => long_shift(state, |a, b| ((a as u64) >> b) as i64)?,
            IAND => int_op(state, |a, b| a & b)?,
            LAND => long_op(state, |a, b| a & b)?,
            IOR => int_op(state, |a, b| a | b)?,
            LOR => long_op(state, |a, b| a | b)?,
            IXOR => int_op(state, |a, b| a ^ b)?,
            LXOR => long_op(state, |a, b| a ^ b)?,
            _ => return Err(Error::Linkage(format!("{} is not arithmetic", mnemonic(opcode)))),
        }
        Ok(StepResult::Continue)
    }

    pub(super) fn convert(opcode: u8, state: &mut FrameState) -> Result<()> {
        let value = state.pop()?;
        let converted = match opcode {
            I2L => Value::Long(i64::from(value.as_int()?)),
            I2F => Value::Float(value.as_int()? as f32),
            I2D => Value::Double(f64::from(value.as_int()?)),
            L2I => Value::Int(value.as_long()? as i32),
            L2F => Value::Float(value.as_long()? as f32),
            L2D => Value::Double(value.as_long()? as f64),
            // Float to integer casts saturate and map NaN to zero, as the JVM does.
            F2I => Value::Int(value.as_float()? as i32),
            F2L => Value::Long(value.as_float()? as i64),
            F2D => Value::Double(f64::from(value.as_float()?)),
            D2I => Value::Int(value.as_double()? as i32),
            D2L => Value::Long(value.as_double()? as i64),
            D2F => Value::Float(value.as_double()? as f32),
            I2B => Value::Int(i32::from(value.as_int()? as i8)),
            I2C => Value::Int(i32::from(value.as_int()? as u16)),
            I2S => Value::Int(i32::from(value.as_int()? as i16)),
            _ => return Err(Error::Linkage(format!("{} is not a conversion", mnemonic(opcode)))),
        };
        state.push(converted);
        Ok(())
    }

    pub(super) fn compare(opcode: u8, state: &mut FrameState) -> Result<()> {
        let result = match opcode {
            LCMP => {
                let b = state.pop_long()?;
                let a = state.pop_long()?;
                a.cmp(&b) as i32
            }
            FCMPL | FCMPG => {
                let b = state.pop_float()?;
                let a = state.pop_float()?;
                float_compare(f64::from(a), f64::from(b), if opcode == FCMPL { -1 } else { 1 })
            }
            DCMPL | DCMPG => {
                let b = state.pop_double()?;
                let a = state.pop_double()?;
                float_compare(a, b, if opcode == DCMPL { -1 } else { 1 })
            }
            _ => return Err(Error::Linkage(format!("{} is not a comparison", mnemonic(opcode)))),
        };
        state.push(Value::Int(result));
        Ok(())
    }

    pub(super) fn branch(&mut self, opcode: u8, target: usize, state: &mut FrameState) -> Result<StepResult> {
        let taken = match opcode {
            GOTO => true,
            IFEQ..=IFLE => {
                let value = state.pop_int()?;
                match opcode {
                    IFEQ => value == 0,
                    IFNE => value != 0,
                    IFLT => value < 0,
                    IFGE => value >= 0,
                    IFGT => value > 0,
                    _ => value <= 0,
                }
            }
            IF_ICMPEQ..=IF_ICMPLE => {
                let b = state.pop_int()?;
                let a = state.pop_int()?;
                match opcode {
                    IF_ICMPEQ => a == b,
                    IF_ICMPNE => a != b,
                    IF_ICMPLT => a < b,
                    IF_ICMPGE => a >= b,
                    IF_ICMPGT => a > b,
                    _ => a <= b,
                }
            }
            IF_ACMPEQ | IF_ACMPNE => {
                let b = state.pop()?;
                let a = state.pop()?;
                a.same(&b) == (opcode == IF_ACMPEQ)
            }
            IFNULL | IFNONNULL => {
                let value = state.pop_ref()?;
                value.is_none() == (opcode == IFNULL)
            }
            _ => {
                return Err(Error::Linkage(format!(
                    "{} is not supported",
                    mnemonic(opcode)
                )))
            }
        };
        Ok(if taken {
            StepResult::Jump(target)
        } else {
            StepResult::Continue
        })
    }

    fn linked_class(&mut self, class: &Arc<RuntimeClass>, index: u16) -> Result<Arc<RuntimeClass>> {
        if let Some(Linked::Class(weak)) = class.linked(index) {
            if let Some(resolved) = weak.upgrade() {
                return Ok(resolved);
            }
        }
        let name = self.pool(class)?.class_name(index)?.to_string();
        let resolved = self.resolve_class(class, &name)?;
        class.link(index, Linked::Class(Arc::downgrade(&resolved)));
        Ok(resolved)
    }

    fn pool<'a>(&self, class: &'a Arc<RuntimeClass>) -> Result<&'a Arc<crate::classfile::ConstantPool>> {
        class
            .constant_pool()
            .ok_or_else(|| Error::Linkage(format!("{} has no constant pool", class.binary_name())))
    }

    fn linked_field(
        &mut self,
        class: &Arc<RuntimeClass>,
        index: u16,
    ) -> Result<(Arc<RuntimeClass>, Arc<RuntimeField>)> {
        if let Some(Linked::Field { declaring, field }) = class.linked(index) {
            if let Some(declaring) = declaring.upgrade() {
                return Ok((declaring, field));
            }
        }
        let member = self.pool(class)?.member_ref(index)?;
        let owner = self.resolve_class(class, &member.class_name)?;
        let Some((declaring, field)) = owner.find_field(&member.name) else {
            return Err(self.throw_new(
                "java/lang/NoSuchFieldError",
                format!("{}.{}", owner.binary_name(), member.name),
            ));
        };
        class.link(
            index,
            Linked::Field {
                declaring: Arc::downgrade(&declaring),
                field: Arc::clone(&field),
            },
        );
        Ok((declaring, field))
    }

    pub(super) fn field_access(
        &mut self,
        class: &Arc<RuntimeClass>,
        opcode: u8,
        index: u16,
        state: &mut FrameState,
    ) -> Result<StepResult> {
        let (declaring, field) = self.linked_field(class, index)?;
        match opcode {
            GETSTATIC | PUTSTATIC => {
                if !field.is_static() {
                    return Err(self.throw_new(
                        "java/lang/IncompatibleClassChangeError",
                        format!("{}.{} is not static", declaring.binary_name(), field.name),
                    ));
                }
                self.ensure_initialized(&declaring)?;
                if opcode == GETSTATIC {
                    state.push(declaring.get_static(&field.name).unwrap_or_default());
                } else {
                    let value = state.pop()?;
                    declaring.set_static(&field.name, value)?;
                }
            }
            GETFIELD => {
                let Some(object) = state.pop_ref()? else {
                    return Err(self.null_field_access(&field));
                };
                state.push(object.field(field.slot));
            }
            _ => {
                let value = state.pop()?;
                let Some(object) = state.pop_ref()? else {
                    return Err(self.null_field_access(&field));
                };
                object.set_field(field.slot, value);
            }
        }
        Ok(StepResult::Continue)
    }

    fn null_field_access(&self, field: &RuntimeField) -> Error {
        self.throw_new(
            "java/lang/NullPointerException",
            format!("Cannot access field \"{}\" of a null object", field.name),
        )
    }

    pub(super) fn invoke_insn(
        &mut self,
        class: &Arc<RuntimeClass>,
        opcode: u8,
        index: u16,
        state: &mut FrameState,
    ) -> Result<StepResult> {
        let (owner, name, descriptor, raw_descriptor) = match class.linked(index) {
            Some(Linked::Method {
                owner,
                name,
                descriptor,
                raw_descriptor,
            }) => (owner, name, descriptor, raw_descriptor),
            _ => {
                let member = self.pool(class)?.member_ref(index)?;
                let parsed = Arc::new(crate::classfile::MethodDescriptor::parse(&member.descriptor)?);
                let linked = Linked::Method {
                    owner: member.class_name.clone(),
                    name: Arc::from(member.name.as_str()),
                    descriptor: Arc::clone(&parsed),
                    raw_descriptor: Arc::from(member.descriptor.as_str()),
                };
                class.link(index, linked);
                (
                    member.class_name,
                    Arc::from(member.name.as_str()),
                    parsed,
                    Arc::from(member.descriptor.as_str()),
                )
            }
        };

        let has_receiver = opcode != INVOKESTATIC;
        let args = state.pop_n(descriptor.parameters.len() + usize::from(has_receiver))?;
        let returns = descriptor.return_type.is_some();

        let (declaring, method) = match opcode {
            INVOKESTATIC => {
                let target = self.resolve_class(class, &owner)?;
                self.ensure_initialized(&target)?;
                match target.find_method(&name, &raw_descriptor) {
                    Some(found) => found,
                    None => return Err(self.no_such_method(&target, &name, &raw_descriptor)),
                }
            }
            INVOKESPECIAL => {
                let target = self.resolve_class(class, &owner)?;
                if args[0].is_null() {
                    return Err(self.null_invocation(&name));
                }
                match target.find_method(&name, &raw_descriptor) {
                    Some(found) => found,
                    None => return Err(self.no_such_method(&target, &name, &raw_descriptor)),
                }
            }
            _ => {
                let Some(receiver) = args[0].object().cloned() else {
                    return Err(self.null_invocation(&name));
                };
                let receiver_class = Arc::clone(receiver.class());
                match receiver_class.find_virtual(&name, &raw_descriptor) {
                    Some(found) => found,
                    None => {
                        return Err(self.throw_new(
                            "java/lang/AbstractMethodError",
                            format!("{}.{}{}", receiver_class.binary_name(), name, raw_descriptor),
                        ))
                    }
                }
            }
        };

        let result = self.call(&declaring, &method, descriptor, args)?;
        if returns {
            state.push(result);
        }
        Ok(StepResult::Continue)
    }

    fn null_invocation(&self, name: &str) -> Error {
        self.throw_new(
            "java/lang/NullPointerException",
            format!("Cannot invoke \"{name}\" on a null object"),
        )
    }

    pub(super) fn type_insn(
        &mut self,
        class: &Arc<RuntimeClass>,
        opcode: u8,
        index: u16,
        state: &mut FrameState,
    ) -> Result<StepResult> {
        match opcode {
            NEW => {
                let target = self.linked_class(class, index)?;
                self.ensure_initialized(&target)?;
                state.push(Value::Ref(target.allocate()));
            }
            ANEWARRAY => {
                let length = state.pop_int()?;
                let component = self.pool(class)?.class_name(index)?.to_string();
                let array_class = self.resolve_class(class, &array_class_name(&component))?;
                let array = self.allocate_array(&array_class, length)?;
                state.push(Value::Ref(array));
            }
            CHECKCAST => {
                let value = state.pop()?;
                if let Some(object) = value.as_ref()? {
                    let target = self.linked_class(class, index)?;
                    if !object.class().is_subclass_of(&target) {
                        return Err(self.throw_new(
                            "java/lang/ClassCastException",
                            format!(
                                "class {} cannot be cast to class {}",
                                object.class().binary_name(),
                                target.binary_name()
                            ),
                        ));
                    }
                }
                state.push(value);
            }
            INSTANCEOF => {
                let value = state.pop_ref()?;
                let result = match value {
                    Some(object) => {
                        let target = self.linked_class(class, index)?;
                        object.class().is_subclass_of(&target)
                    }
                    None => false,
                };
                state.push(Value::from_bool(result));
            }
            _ => return Err(Error::Linkage(format!("{} is not a type instruction", mnemonic(opcode)))),
        }
        Ok(StepResult::Continue)
    }

    pub(super) fn new_primitive_array(
        &mut self,
        class: &Arc<RuntimeClass>,
        code: u8,
        state: &mut FrameState,
    ) -> Result<StepResult> {
        let Some(component) = primitive_component(code) else {
            return Err(Error::Linkage(format!("invalid newarray type {code}")));
        };
        let length = state.pop_int()?;
        let array_class = self.resolve_class(class, &format!("[{}", component.descriptor()))?;
        let array = self.allocate_array(&array_class, length)?;
        state.push(Value::Ref(array));
        Ok(StepResult::Continue)
    }

    /// Allocates an array of `array_class` with default elements.
    ///
    /// # Errors
    ///
    /// Throws `java.lang.NegativeArraySizeException` for a negative length.
    pub fn allocate_array(&self, array_class: &Arc<RuntimeClass>, length: i32) -> Result<ObjectRef> {
        let Ok(length) = usize::try_from(length) else {
            return Err(self.throw_new(
                "java/lang/NegativeArraySizeException",
                length.to_string(),
            ));
        };
        let default = Value::default_for(array_class.component());
        Ok(Object::new(
            Arc::clone(array_class),
            ObjectData::Array(Mutex::new(vec![default; length])),
        ))
    }

    fn array_operand(&self, value: Option<ObjectRef>) -> Result<ObjectRef> {
        match value {
            Some(array) if matches!(array.data(), ObjectData::Array(_)) => Ok(array),
            Some(other) => Err(Error::Linkage(format!(
                "{} is not an array",
                other.class().binary_name()
            ))),
            None => Err(self.throw_new(
                "java/lang/NullPointerException",
                "Cannot access an element of a null array",
            )),
        }
    }

    fn index_error(&self, index: i32, length: usize) -> Error {
        self.throw_new(
            "java/lang/ArrayIndexOutOfBoundsException",
            format!("Index {index} out of bounds for length {length}"),
        )
    }

    pub(super) fn array_load(&mut self, state: &mut FrameState) -> Result<StepResult> {
        let index = state.pop_int()?;
        let array = self.array_operand(state.pop_ref()?)?;
        let ObjectData::Array(elements) = array.data() else {
            return Err(Error::Linkage("array expected".into()));
        };
        let value = {
            let elements = elements.lock().expect("array lock poisoned");
            match usize::try_from(index).ok().and_then(|i| elements.get(i)) {
                Some(value) => Ok(value.clone()),
                None => Err(elements.len()),
            }
        };
        match value {
            Ok(value) => {
                state.push(value);
                Ok(StepResult::Continue)
            }
            Err(length) => Err(self.index_error(index, length)),
        }
    }

    pub(super) fn array_store(&mut self, opcode: u8, state: &mut FrameState) -> Result<StepResult> {
        let value = state.pop()?;
        let index = state.pop_int()?;
        let array = self.array_operand(state.pop_ref()?)?;
        let value = match opcode {
            BASTORE if array.class().component() == Some(&FieldType::Boolean) => {
                Value::Int(value.as_int()? & 1)
            }
            BASTORE => Value::Int(i32::from(value.as_int()? as i8)),
            CASTORE => Value::Int(i32::from(value.as_int()? as u16)),
            SASTORE => Value::Int(i32::from(value.as_int()? as i16)),
            _ => value,
        };
        let ObjectData::Array(elements) = array.data() else {
            return Err(Error::Linkage("array expected".into()));
        };
        let length = {
            let mut elements = elements.lock().expect("array lock poisoned");
            match usize::try_from(index).ok().and_then(|i| elements.get_mut(i)) {
                Some(slot) => {
                    *slot = value;
                    None
                }
                None => Some(elements.len()),
            }
        };
        match length {
            None => Ok(StepResult::Continue),
            Some(length) => Err(self.index_error(index, length)),
        }
    }

    pub(super) fn array_length(&mut self, state: &mut FrameState) -> Result<StepResult> {
        let array = self.array_operand(state.pop_ref()?)?;
        let ObjectData::Array(elements) = array.data() else {
            return Err(Error::Linkage("array expected".into()));
        };
        let length = elements.lock().expect("array lock poisoned").len();
        state.push(Value::Int(i32::try_from(length).unwrap_or(i32::MAX)));
        Ok(StepResult::Continue)
    }

    pub(super) fn athrow(&mut self, state: &mut FrameState) -> Result<StepResult> {
        match state.pop_ref()? {
            Some(throwable) => Err(Error::Exception(JavaException::new(throwable))),
            None => Err(self.throw_new(
                "java/lang/NullPointerException",
                "Cannot throw a null exception",
            )),
        }
    }
}
