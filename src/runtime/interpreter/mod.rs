//! Bytecode interpreter.
//!
//! The [`Interpreter`] executes methods of classes defined by a sandbox's loaders.
//! One interpreter belongs to one OS thread; it owns the call stack of that thread
//! and a handle to the [`Sandbox`] whose class handler, native call handler and
//! loaders serve the code it runs. Threads started by Java code get their own
//! interpreter over the same sandbox.
//!
//! Execution is step based: [`Interpreter::step`] executes one instruction and
//! reports how control continues. Java exceptions travel as
//! [`Error::Exception`]; the dispatch loop looks them up in the method's exception
//! table and either jumps to a handler or lets them propagate to the caller.

mod frame;
mod handlers;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::{
    classfile::{
        code::{opcodes::*, Insn},
        LoadableConstant, MethodDescriptor,
    },
    runtime::{
        class::Linked, exception::NATIVE_LINE, BytecodeBody, HostCall, JavaException,
        MethodBody, ObjectData, ObjectRef, RuntimeClass, RuntimeField, RuntimeMethod,
        StackFrame, Value, PLAN_CLASS_NAME,
    },
    sandbox::Sandbox,
    shadow::{ImplementationMethod, ShadowClass},
    Error, Result,
};

pub(crate) use frame::FrameState;

/// How execution continues after one instruction.
#[derive(Debug)]
pub(crate) enum StepResult {
    /// Fall through to the next instruction.
    Continue,
    /// Continue at an instruction index.
    Jump(usize),
    /// Leave the method with a value ([`Value::Void`] for `return`).
    Return(Value),
}

/// What a call stack entry is executing.
#[derive(Debug, Clone)]
enum FrameKind {
    /// A method of a runtime class.
    Method {
        class: Arc<RuntimeClass>,
        method: Arc<RuntimeMethod>,
    },
    /// The dispatch step that runs a shadow method.
    Plan,
    /// A shadow implementation method.
    Shadow {
        class: Arc<ShadowClass>,
        method: Arc<ImplementationMethod>,
    },
}

#[derive(Debug, Clone)]
struct Frame {
    kind: FrameKind,
    line: i32,
}

/// Executes code inside a sandbox on the current thread.
pub struct Interpreter {
    sandbox: Arc<Sandbox>,
    frames: Vec<Frame>,
    max_depth: usize,
}

impl Interpreter {
    /// Creates an interpreter with an empty call stack.
    #[must_use]
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        let max_depth = sandbox.config().max_call_depth;
        Interpreter {
            sandbox,
            frames: Vec::new(),
            max_depth,
        }
    }

    /// The sandbox this interpreter runs in.
    #[must_use]
    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    /// Current call depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Class of the innermost executing class method, if any.
    #[must_use]
    pub fn caller_class(&self) -> Option<Arc<RuntimeClass>> {
        self.frames.iter().rev().find_map(|frame| match &frame.kind {
            FrameKind::Method { class, .. } => Some(Arc::clone(class)),
            _ => None,
        })
    }

    /// The current stack, innermost frame first.
    #[must_use]
    pub fn stack_trace(&self) -> Vec<StackFrame> {
        self.frames.iter().rev().map(describe_frame).collect()
    }

    /// The stack a newly constructed throwable records: the current stack minus the
    /// throwable constructors still running.
    fn throwable_stack_trace(&self) -> Vec<StackFrame> {
        self.frames
            .iter()
            .rev()
            .skip_while(|frame| match &frame.kind {
                FrameKind::Method { class, method } => {
                    method.name == "<init>"
                        && class.kind() == crate::runtime::ObjectKind::Throwable
                }
                _ => false,
            })
            .map(describe_frame)
            .collect()
    }

    /// Loads a class through the sandbox loader.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClassNotFound`] or the cached failure of an earlier load.
    pub fn load_class(&self, name: &str) -> Result<Arc<RuntimeClass>> {
        self.sandbox.load_class(name)
    }

    /// Resolves `name` (internal) through the loader that defined `from`.
    ///
    /// A class that cannot be found surfaces as `java.lang.NoClassDefFoundError`.
    ///
    /// # Errors
    ///
    /// Returns the Java exception, or the framework error of a failed load.
    pub fn resolve_class(&mut self, from: &Arc<RuntimeClass>, name: &str) -> Result<Arc<RuntimeClass>> {
        let loader = from.loader().ok_or_else(|| {
            Error::Linkage(format!("the loader of {} is gone", from.binary_name()))
        })?;
        match loader.load_class(name) {
            Ok(class) => Ok(class),
            Err(Error::ClassNotFound(missing)) => {
                Err(self.throw_new("java/lang/NoClassDefFoundError", missing))
            }
            Err(error) => Err(error),
        }
    }

    /// Creates a `java.lang.String`.
    ///
    /// # Errors
    ///
    /// Fails only if the host library is broken.
    pub fn new_string(&self, value: &str) -> Result<ObjectRef> {
        self.sandbox.system_loader().new_string(value)
    }

    /// Returns the interned `java.lang.String` for `value`.
    ///
    /// # Errors
    ///
    /// Fails only if the host library is broken.
    pub fn intern(&self, value: &str) -> Result<ObjectRef> {
        self.sandbox.system_loader().intern(value)
    }

    /// Creates a throwable of the host class `class_name` with the current stack,
    /// without running a constructor.
    ///
    /// # Errors
    ///
    /// Returns an error when `class_name` is not a host throwable class.
    pub fn new_exception(&self, class_name: &str, message: Option<String>) -> Result<JavaException> {
        let class = self.sandbox.system_loader().load_class(class_name)?;
        let throwable = class.allocate();
        let ObjectData::Throwable(state) = throwable.data() else {
            return Err(Error::Linkage(format!("{class_name} is not a throwable")));
        };
        {
            let mut state = state.lock().expect("throwable lock poisoned");
            state.message = message;
            state.stack_trace = self.stack_trace();
        }
        Ok(JavaException::new(throwable))
    }

    /// Builds the error that throws a new `class_name` with `message`.
    pub fn throw_new(&self, class_name: &str, message: impl Into<String>) -> Error {
        match self.new_exception(class_name, Some(message.into())) {
            Ok(exception) => Error::Exception(exception),
            Err(error) => error,
        }
    }

    /// Records the current stack in a freshly constructed throwable.
    pub(crate) fn fill_in_stack_trace(&self, throwable: &ObjectRef) {
        if let ObjectData::Throwable(state) = throwable.data() {
            state.lock().expect("throwable lock poisoned").stack_trace =
                self.throwable_stack_trace();
        }
    }

    /// Runs static initialization of `class` (and its superclasses) if it has not run yet.
    ///
    /// Concurrent first uses block until the initializing thread finishes; recursive
    /// use from the initializing thread proceeds immediately.
    ///
    /// # Errors
    ///
    /// Propagates the exception thrown by the initializer. Later uses of a class whose
    /// initializer failed throw `java.lang.NoClassDefFoundError`.
    pub fn ensure_initialized(&mut self, class: &Arc<RuntimeClass>) -> Result<()> {
        match class.begin_initialization() {
            Ok(false) => Ok(()),
            Err(message) => Err(self.throw_new(
                "java/lang/NoClassDefFoundError",
                format!("Could not initialize class {}: {message}", class.binary_name()),
            )),
            Ok(true) => {
                let outcome = self.run_initialization(class);
                class.finish_initialization(outcome.as_ref().err().map(ToString::to_string));
                outcome
            }
        }
    }

    fn run_initialization(&mut self, class: &Arc<RuntimeClass>) -> Result<()> {
        if let Some(super_class) = class.super_class() {
            let super_class = Arc::clone(super_class);
            self.ensure_initialized(&super_class)?;
        }
        let constants: Vec<(String, LoadableConstant)> = class
            .fields()
            .filter_map(|f| f.constant.clone().map(|c| (f.name.clone(), c)))
            .collect();
        for (name, constant) in constants {
            let value = self.constant_value(&constant)?;
            class.set_static(&name, value)?;
        }
        if let Some(initializer) = class.declared_method("<clinit>", "()V") {
            let initializer = Arc::clone(initializer);
            self.invoke(class, &initializer, Vec::new())?;
        }
        Ok(())
    }

    fn constant_value(&self, constant: &LoadableConstant) -> Result<Value> {
        Ok(match constant {
            LoadableConstant::Integer(v) => Value::Int(*v),
            LoadableConstant::Float(v) => Value::Float(*v),
            LoadableConstant::Long(v) => Value::Long(*v),
            LoadableConstant::Double(v) => Value::Double(*v),
            LoadableConstant::String(s) => Value::Ref(self.intern(s)?),
            LoadableConstant::Class(name) => {
                return Err(Error::Linkage(format!(
                    "class literal {name} is not supported"
                )))
            }
        })
    }

    /// Invokes `method` of `class` without virtual dispatch. `args` starts with the
    /// receiver for instance methods.
    ///
    /// # Errors
    ///
    /// Returns the Java exception the method throws, or a framework error.
    pub fn invoke(
        &mut self,
        class: &Arc<RuntimeClass>,
        method: &Arc<RuntimeMethod>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let descriptor = Arc::clone(&method.parsed);
        self.call(class, method, descriptor, args)
    }

    fn call(
        &mut self,
        class: &Arc<RuntimeClass>,
        method: &Arc<RuntimeMethod>,
        call_site: Arc<MethodDescriptor>,
        args: Vec<Value>,
    ) -> Result<Value> {
        if self.frames.len() >= self.max_depth {
            return Err(self.throw_new(
                "java/lang/StackOverflowError",
                format!("call depth limit {} reached", self.max_depth),
            ));
        }
        match &method.body {
            MethodBody::Bytecode(body) => {
                let body = Arc::clone(body);
                self.frames.push(Frame {
                    kind: FrameKind::Method {
                        class: Arc::clone(class),
                        method: Arc::clone(method),
                    },
                    line: -1,
                });
                let result = self.execute(class, &body, args);
                self.frames.pop();
                result
            }
            MethodBody::Host(host) => {
                let caller = self.caller_class();
                self.frames.push(Frame {
                    kind: FrameKind::Method {
                        class: Arc::clone(class),
                        method: Arc::clone(method),
                    },
                    line: NATIVE_LINE,
                });
                let result = host(
                    self,
                    HostCall {
                        class: Arc::clone(class),
                        caller,
                        descriptor: call_site,
                        args,
                    },
                );
                self.frames.pop();
                result
            }
            MethodBody::Abstract => Err(self.throw_new(
                "java/lang/AbstractMethodError",
                format!("{}.{}{}", class.binary_name(), method.name, method.descriptor),
            )),
            MethodBody::Native => Err(self.throw_new(
                "java/lang/UnsatisfiedLinkError",
                format!("{}.{}{}", class.binary_name(), method.name, method.descriptor),
            )),
        }
    }

    /// Runs `body` with a dispatch plan frame and a shadow method frame on the stack.
    pub(crate) fn with_shadow_frame<R>(
        &mut self,
        class: &Arc<ShadowClass>,
        method: &Arc<ImplementationMethod>,
        body: impl FnOnce(&mut Interpreter) -> Result<R>,
    ) -> Result<R> {
        if self.frames.len() + 2 > self.max_depth {
            return Err(self.throw_new(
                "java/lang/StackOverflowError",
                format!("call depth limit {} reached", self.max_depth),
            ));
        }
        self.frames.push(Frame {
            kind: FrameKind::Plan,
            line: -1,
        });
        self.frames.push(Frame {
            kind: FrameKind::Shadow {
                class: Arc::clone(class),
                method: Arc::clone(method),
            },
            line: -1,
        });
        let result = body(self);
        self.frames.truncate(self.frames.len() - 2);
        result
    }

    /// Resolves and invokes a static method, initializing its class first.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchMethodError` when no such method exists, or the
    /// exception the method throws.
    pub fn invoke_static(
        &mut self,
        class: &Arc<RuntimeClass>,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        self.ensure_initialized(class)?;
        let Some((declaring, method)) = class.find_method(name, descriptor) else {
            return Err(self.no_such_method(class, name, descriptor));
        };
        self.invoke(&declaring, &method, args)
    }

    /// Invokes an instance method with virtual dispatch on the receiver class.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.AbstractMethodError` when the receiver class has no
    /// implementation, or the exception the method throws.
    pub fn invoke_virtual(
        &mut self,
        receiver: &ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let class = Arc::clone(receiver.class());
        let Some((declaring, method)) = class.find_virtual(name, descriptor) else {
            return Err(self.throw_new(
                "java/lang/AbstractMethodError",
                format!("{}.{}{}", class.binary_name(), name, descriptor),
            ));
        };
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Ref(Arc::clone(receiver)));
        full.extend(args);
        self.invoke(&declaring, &method, full)
    }

    /// Invokes the method `name + descriptor` declared by `class` or inherited by it,
    /// without virtual dispatch.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchMethodError` when no such method exists, or the
    /// exception the method throws.
    pub fn invoke_special(
        &mut self,
        class: &Arc<RuntimeClass>,
        receiver: &ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let Some((declaring, method)) = class.find_method(name, descriptor) else {
            return Err(self.no_such_method(class, name, descriptor));
        };
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Ref(Arc::clone(receiver)));
        full.extend(args);
        self.invoke(&declaring, &method, full)
    }

    /// Allocates an instance of `class` and runs the constructor with `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchMethodError` when the constructor does not exist, or
    /// the exception the constructor throws.
    pub fn construct(
        &mut self,
        class: &Arc<RuntimeClass>,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<ObjectRef> {
        self.ensure_initialized(class)?;
        let Some(constructor) = class.declared_method("<init>", descriptor).cloned() else {
            return Err(self.no_such_method(class, "<init>", descriptor));
        };
        let instance = class.allocate();
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Ref(Arc::clone(&instance)));
        full.extend(args);
        self.invoke(class, &constructor, full)?;
        Ok(instance)
    }

    fn no_such_method(&self, class: &Arc<RuntimeClass>, name: &str, descriptor: &str) -> Error {
        self.throw_new(
            "java/lang/NoSuchMethodError",
            format!("{}.{}{}", class.binary_name(), name, descriptor),
        )
    }

    /// Reads an instance field by name.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchFieldError` when the field does not exist.
    pub fn get_field(&self, object: &ObjectRef, name: &str) -> Result<Value> {
        let field = self.instance_field(object, name)?;
        Ok(object.field(field.slot))
    }

    /// Writes an instance field by name.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchFieldError` when the field does not exist.
    pub fn set_field(&self, object: &ObjectRef, name: &str, value: Value) -> Result<()> {
        let field = self.instance_field(object, name)?;
        object.set_field(field.slot, value);
        Ok(())
    }

    fn instance_field(&self, object: &ObjectRef, name: &str) -> Result<Arc<RuntimeField>> {
        match object.class().find_field(name) {
            Some((_, field)) if !field.is_static() => Ok(field),
            _ => Err(self.throw_new(
                "java/lang/NoSuchFieldError",
                format!("{}.{}", object.class().binary_name(), name),
            )),
        }
    }

    /// Reads a static field, initializing the class first.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchFieldError` when the field does not exist.
    pub fn get_static(&mut self, class: &Arc<RuntimeClass>, name: &str) -> Result<Value> {
        let declaring = self.static_field_owner(class, name)?;
        self.ensure_initialized(&declaring)?;
        Ok(declaring.get_static(name).unwrap_or_default())
    }

    /// Writes a static field, initializing the class first.
    ///
    /// # Errors
    ///
    /// Returns `java.lang.NoSuchFieldError` when the field does not exist.
    pub fn set_static(&mut self, class: &Arc<RuntimeClass>, name: &str, value: Value) -> Result<()> {
        let declaring = self.static_field_owner(class, name)?;
        self.ensure_initialized(&declaring)?;
        declaring.set_static(name, value)
    }

    fn static_field_owner(&self, class: &Arc<RuntimeClass>, name: &str) -> Result<Arc<RuntimeClass>> {
        match class.find_field(name) {
            Some((declaring, field)) if field.is_static() => Ok(declaring),
            _ => Err(self.throw_new(
                "java/lang/NoSuchFieldError",
                format!("{}.{}", class.binary_name(), name),
            )),
        }
    }

    /// Converts a value to the string Java's string concatenation would produce,
    /// calling `toString()` on objects.
    ///
    /// # Errors
    ///
    /// Returns the exception `toString()` throws.
    pub fn to_java_string(&mut self, value: &Value) -> Result<String> {
        Ok(match value {
            Value::Void => String::new(),
            Value::Int(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Float(v) => java_float_string(f64::from(*v)),
            Value::Double(v) => java_float_string(*v),
            Value::Null => "null".to_string(),
            Value::Ref(object) => {
                if let Some(text) = object.as_str() {
                    return Ok(text.to_string());
                }
                let result = self.invoke_virtual(object, "toString", "()Ljava/lang/String;", Vec::new())?;
                result.as_str().unwrap_or("null").to_string()
            }
        })
    }

    /// Executes an interpreted method body.
    fn execute(
        &mut self,
        class: &Arc<RuntimeClass>,
        body: &Arc<BytecodeBody>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let mut state = FrameState::new(body.max_locals, args);
        let mut pc = 0usize;
        while pc < body.insns.len() {
            match self.step(class, body, &body.insns[pc], &mut state) {
                Ok(StepResult::Continue) => pc += 1,
                Ok(StepResult::Jump(target)) => pc = target,
                Ok(StepResult::Return(value)) => return Ok(value),
                Err(Error::Exception(exception)) => {
                    match self.find_handler(class, body, pc, &exception)? {
                        Some(handler) => {
                            state.clear_stack();
                            state.push(Value::Ref(Arc::clone(exception.throwable())));
                            pc = handler;
                        }
                        None => return Err(Error::Exception(exception)),
                    }
                }
                Err(error) => return Err(error),
            }
        }
        Err(Error::Linkage(format!(
            "execution fell off the end of a method in {}",
            class.binary_name()
        )))
    }

    fn find_handler(
        &mut self,
        class: &Arc<RuntimeClass>,
        body: &BytecodeBody,
        pc: usize,
        exception: &JavaException,
    ) -> Result<Option<usize>> {
        for handler in &body.handlers {
            if pc < handler.start || pc >= handler.end {
                continue;
            }
            let Some(catch_type) = &handler.catch_type else {
                return Ok(Some(handler.handler));
            };
            let caught = self.resolve_class(class, catch_type)?;
            if exception.throwable().class().is_subclass_of(&caught) {
                return Ok(Some(handler.handler));
            }
        }
        Ok(None)
    }

    /// Executes one instruction.
    pub(crate) fn step(
        &mut self,
        class: &Arc<RuntimeClass>,
        body: &BytecodeBody,
        insn: &Insn,
        state: &mut FrameState,
    ) -> Result<StepResult> {
        match insn {
            Insn::Label(_) => Ok(StepResult::Continue),
            Insn::Line(line) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.line = i32::from(*line);
                }
                Ok(StepResult::Continue)
            }
            Insn::Op(opcode) => self.execute_op(*opcode, state),
            Insn::IntPush { value, .. } => {
                state.push(Value::Int(i32::from(*value)));
                Ok(StepResult::Continue)
            }
            Insn::Ldc(index) | Insn::Ldc2(index) => self.load_constant(class, *index, state),
            Insn::Var { opcode, index } => Self::local_variable(*opcode, *index, state),
            Insn::Iinc { index, delta } => {
                let value = state.load(*index)?.as_int()?;
                state.store(*index, Value::Int(value.wrapping_add(i32::from(*delta))))?;
                Ok(StepResult::Continue)
            }
            Insn::Jump { opcode, target } => self.branch(*opcode, body.target(*target)?, state),
            Insn::TableSwitch {
                default,
                low,
                targets,
            } => {
                let key = i64::from(state.pop_int()?);
                let offset = key - i64::from(*low);
                let label = usize::try_from(offset)
                    .ok()
                    .and_then(|i| targets.get(i))
                    .unwrap_or(default);
                Ok(StepResult::Jump(body.target(*label)?))
            }
            Insn::LookupSwitch { default, pairs } => {
                let key = state.pop_int()?;
                let label = pairs
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map_or(default, |(_, label)| label);
                Ok(StepResult::Jump(body.target(*label)?))
            }
            Insn::Field { opcode, index } => self.field_access(class, *opcode, *index, state),
            Insn::Invoke { opcode, index } => self.invoke_insn(class, *opcode, *index, state),
            Insn::Type { opcode, index } => self.type_insn(class, *opcode, *index, state),
            Insn::NewArray(code) => self.new_primitive_array(class, *code, state),
            Insn::InvokeDynamic(_) => Err(Error::Linkage(format!(
                "invokedynamic is not supported (in {})",
                class.binary_name()
            ))),
            Insn::MultiANewArray { .. } => Err(Error::Linkage(format!(
                "multianewarray is not supported (in {})",
                class.binary_name()
            ))),
        }
    }

    fn load_constant(
        &mut self,
        class: &Arc<RuntimeClass>,
        index: u16,
        state: &mut FrameState,
    ) -> Result<StepResult> {
        if let Some(Linked::Str(string)) = class.linked(index) {
            state.push(Value::Ref(string));
            return Ok(StepResult::Continue);
        }
        let pool = class
            .constant_pool()
            .ok_or_else(|| Error::Linkage(format!("{} has no constant pool", class.binary_name())))?;
        let constant = pool.loadable(index)?;
        let value = self.constant_value(&constant)?;
        if let (LoadableConstant::String(_), Value::Ref(string)) = (&constant, &value) {
            class.link(index, Linked::Str(Arc::clone(string)));
        }
        state.push(value);
        Ok(StepResult::Continue)
    }

    /// Executes an operand-free instruction.
    fn execute_op(&mut self, opcode: u8, state: &mut FrameState) -> Result<StepResult> {
        match opcode {
            NOP => {}
            ACONST_NULL => state.push(Value::Null),
            ICONST_M1..=ICONST_5 => state.push(Value::Int(i32::from(opcode) - i32::from(ICONST_0))),
            LCONST_0 | LCONST_1 => state.push(Value::Long(i64::from(opcode - LCONST_0))),
            FCONST_0..=FCONST_2 => state.push(Value::Float(f32::from(opcode - FCONST_0))),
            DCONST_0 | DCONST_1 => state.push(Value::Double(f64::from(opcode - DCONST_0))),
            IALOAD..=SALOAD => return self.array_load(state),
            IASTORE..=SASTORE => return self.array_store(opcode, state),
            POP => state.pop_words(1)?,
            POP2 => state.pop_words(2)?,
            DUP => state.dup(1, 0)?,
            DUP_X1 => state.dup(1, 1)?,
            DUP_X2 => state.dup(1, 2)?,
            DUP2 => state.dup(2, 0)?,
            DUP2_X1 => state.dup(2, 1)?,
            DUP2_X2 => state.dup(2, 2)?,
            SWAP => state.swap()?,
            IADD..=LXOR => return self.arithmetic(opcode, state),
            I2L..=I2S => Self::convert(opcode, state)?,
            LCMP..=DCMPG => Self::compare(opcode, state)?,
            IRETURN..=ARETURN => return Ok(StepResult::Return(state.pop()?)),
            RETURN => return Ok(StepResult::Return(Value::Void)),
            ARRAYLENGTH => return self.array_length(state),
            ATHROW => return self.athrow(state),
            MONITORENTER | MONITOREXIT => {
                if state.pop_ref()?.is_none() {
                    return Err(self.throw_new("java/lang/NullPointerException", "monitor on null"));
                }
            }
            other => {
                return Err(Error::Linkage(format!(
                    "unsupported instruction {}",
                    mnemonic(other)
                )))
            }
        }
        Ok(StepResult::Continue)
    }
}

fn describe_frame(frame: &Frame) -> StackFrame {
    match &frame.kind {
        FrameKind::Method { class, method } => StackFrame::new(
            &class.binary_name(),
            &method.name,
            class.source_file(),
            frame.line,
        ),
        FrameKind::Plan => StackFrame::new(PLAN_CLASS_NAME, "run", None, -1),
        FrameKind::Shadow { class, method } => {
            StackFrame::new(class.name(), method.name(), None, frame.line)
        }
    }
}

/// Formats a floating point value the way `Double.toString` does for common values.
#[must_use]
pub fn java_float_string(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e7 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}
