//! Runtime classes, methods and fields.
//!
//! A [`RuntimeClass`] is a class as defined by one loader: the same class file defined
//! by two sandbox loaders yields two unrelated runtime classes with separate statics.
//! Bytecode methods are decoded once at definition time into a [`BytecodeBody`]
//! with resolved label positions, so the interpreter never touches byte offsets.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard, Weak,
    },
    thread::ThreadId,
};

use dashmap::DashMap;

use crate::{
    classfile::{
        binary_name,
        code::{Code, Insn, Label},
        AccessFlags, Attribute, ClassFile, FieldType, LoadableConstant, MethodDescriptor,
    },
    loader::ClassLoader,
    runtime::{
        interpreter::Interpreter, Object, ObjectData, ObjectRef, ThreadState, ThrowableState,
        Value,
    },
    Error, Result,
};

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

/// Descriptor string of host methods that accept any call-site descriptor.
pub const POLYMORPHIC_DESCRIPTOR: &str = "*";

/// Identity of a runtime class, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u64);

/// A call into a host (Rust) method.
#[derive(Debug)]
pub struct HostCall {
    /// Class declaring the host method.
    pub class: Arc<RuntimeClass>,
    /// Class of the calling frame, if any.
    pub caller: Option<Arc<RuntimeClass>>,
    /// Descriptor at the call site. Equal to the method descriptor except for
    /// signature-polymorphic methods.
    pub descriptor: Arc<MethodDescriptor>,
    /// Receiver (for instance methods) followed by the arguments.
    pub args: Vec<Value>,
}

impl HostCall {
    /// The argument at `index`, or `void` when absent.
    #[must_use]
    pub fn arg(&self, index: usize) -> &Value {
        static VOID: Value = Value::Void;
        self.args.get(index).unwrap_or(&VOID)
    }

    /// The receiver of an instance host method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Linkage`] when the first operand is not a reference.
    pub fn this(&self) -> Result<&ObjectRef> {
        self.arg(0)
            .as_ref()?
            .ok_or_else(|| Error::Linkage("host method invoked without receiver".into()))
    }
}

/// Signature of a host method implementation.
pub type HostFn = fn(&mut Interpreter, HostCall) -> Result<Value>;

/// Which object flavour instances of a class get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Field slots only.
    Plain,
    /// `java.lang.String`.
    Str,
    /// `java.lang.StringBuilder`.
    Builder,
    /// `java.lang.Throwable` and subclasses.
    Throwable,
    /// `java.lang.Thread` and subclasses.
    Thread,
    /// `java.util.LinkedHashMap` and relatives.
    Map,
    /// Map entries.
    Entry,
    /// Arrays.
    Array,
}

/// An exception handler with resolved instruction positions.
#[derive(Debug, Clone)]
pub struct Handler {
    /// First covered instruction index.
    pub start: usize,
    /// End of the covered range (exclusive).
    pub end: usize,
    /// Handler entry index.
    pub handler: usize,
    /// Internal name of the caught class, `None` for catch-all.
    pub catch_type: Option<String>,
}

/// Decoded, executable bytecode.
#[derive(Debug)]
pub struct BytecodeBody {
    /// Number of local slots.
    pub max_locals: usize,
    /// Instructions, including label and line markers.
    pub insns: Vec<Insn>,
    /// Label positions in `insns`.
    pub labels: HashMap<Label, usize>,
    /// Exception handlers in priority order.
    pub handlers: Vec<Handler>,
}

impl BytecodeBody {
    /// Decodes and links a method body.
    ///
    /// # Errors
    ///
    /// Returns an error when the code is malformed or refers to labels that do not exist.
    pub fn from_code(code: Code, pool: &crate::classfile::ConstantPool) -> Result<Self> {
        let labels: HashMap<Label, usize> = code
            .insns
            .iter()
            .enumerate()
            .filter_map(|(position, insn)| match insn {
                Insn::Label(label) => Some((*label, position)),
                _ => None,
            })
            .collect();
        let position = |label: Label| -> Result<usize> {
            labels
                .get(&label)
                .copied()
                .ok_or_else(|| Error::Linkage(format!("branch to unknown label {}", label.0)))
        };

        let mut handlers = Vec::with_capacity(code.try_catch.len());
        for block in &code.try_catch {
            let catch_type = if block.catch_type == 0 {
                None
            } else {
                Some(pool.class_name(block.catch_type)?.to_string())
            };
            handlers.push(Handler {
                start: position(block.start)?,
                end: position(block.end)?,
                handler: position(block.handler)?,
                catch_type,
            });
        }

        Ok(BytecodeBody {
            max_locals: usize::from(code.max_locals),
            insns: code.insns,
            labels,
            handlers,
        })
    }

    /// Position of `label`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Linkage`] for labels that were never placed.
    pub fn target(&self, label: Label) -> Result<usize> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| Error::Linkage(format!("branch to unknown label {}", label.0)))
    }
}

/// How a method executes.
#[derive(Clone)]
pub enum MethodBody {
    /// Interpreted bytecode.
    Bytecode(Arc<BytecodeBody>),
    /// A Rust implementation.
    Host(HostFn),
    /// No body (abstract or interface method).
    Abstract,
    /// A native method of an uninstrumented class.
    Native,
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Bytecode(body) => write!(f, "Bytecode({} insns)", body.insns.len()),
            MethodBody::Host(_) => f.write_str("Host"),
            MethodBody::Abstract => f.write_str("Abstract"),
            MethodBody::Native => f.write_str("Native"),
        }
    }
}

/// A method of a runtime class.
#[derive(Debug)]
pub struct RuntimeMethod {
    /// Method name.
    pub name: String,
    /// Descriptor string, or [`POLYMORPHIC_DESCRIPTOR`].
    pub descriptor: String,
    /// Parsed descriptor (empty for polymorphic host methods).
    pub parsed: Arc<MethodDescriptor>,
    /// Access flags.
    pub access: AccessFlags,
    /// Implementation.
    pub body: MethodBody,
}

impl RuntimeMethod {
    /// Creates a method.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an invalid descriptor.
    pub fn new(name: &str, descriptor: &str, access: AccessFlags, body: MethodBody) -> Result<Self> {
        let parsed = if descriptor == POLYMORPHIC_DESCRIPTOR {
            MethodDescriptor::new(Vec::new(), None)
        } else {
            MethodDescriptor::parse(descriptor)?
        };
        Ok(RuntimeMethod {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            parsed: Arc::new(parsed),
            access,
            body,
        })
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }
}

/// A field of a runtime class.
#[derive(Debug, Clone)]
pub struct RuntimeField {
    /// Field name.
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
    /// Access flags.
    pub access: AccessFlags,
    /// Slot in the instance field vector; unused for statics.
    pub slot: usize,
    /// `ConstantValue` initializer of a static field.
    pub constant: Option<LoadableConstant>,
}

impl RuntimeField {
    /// Returns `true` for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }
}

#[derive(Debug, Clone)]
enum InitState {
    Uninitialized,
    InProgress(ThreadId),
    Initialized,
    Failed(String),
}

/// A resolved constant pool reference, cached per class.
#[derive(Debug, Clone)]
pub(crate) enum Linked {
    Class(Weak<RuntimeClass>),
    Method {
        owner: String,
        name: Arc<str>,
        descriptor: Arc<MethodDescriptor>,
        raw_descriptor: Arc<str>,
    },
    Field {
        declaring: Weak<RuntimeClass>,
        field: Arc<RuntimeField>,
    },
    Str(ObjectRef),
}

/// Everything needed to create a [`RuntimeClass`].
pub struct ClassDefinition {
    /// Internal name.
    pub name: String,
    /// Access flags.
    pub access: AccessFlags,
    /// Superclass, `None` only for `java/lang/Object`.
    pub super_class: Option<Arc<RuntimeClass>>,
    /// Direct superinterfaces.
    pub interfaces: Vec<Arc<RuntimeClass>>,
    /// Declared fields; instance slots are assigned by [`RuntimeClass::new`].
    pub fields: Vec<RuntimeField>,
    /// Declared methods.
    pub methods: Vec<RuntimeMethod>,
    /// Constant pool of bytecode classes.
    pub pool: Option<Arc<crate::classfile::ConstantPool>>,
    /// `SourceFile` attribute.
    pub source_file: Option<String>,
    /// Object flavour; `None` inherits the superclass flavour.
    pub kind: Option<ObjectKind>,
    /// Component type of array classes.
    pub component: Option<FieldType>,
    /// Defining loader.
    pub loader: Weak<dyn ClassLoader>,
    /// Whether the instrumentor rewrote this class.
    pub instrumented: bool,
}

impl ClassDefinition {
    /// A definition with no members, defined by `loader`.
    #[must_use]
    pub fn new(name: &str, loader: Weak<dyn ClassLoader>) -> Self {
        ClassDefinition {
            name: name.to_string(),
            access: AccessFlags::PUBLIC | AccessFlags::SUPER,
            super_class: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            pool: None,
            source_file: None,
            kind: None,
            component: None,
            loader,
            instrumented: false,
        }
    }

    /// Builds a definition from a parsed class file. Superclass and interfaces
    /// must already be resolved by the defining loader.
    ///
    /// # Errors
    ///
    /// Returns an error when a method body cannot be decoded or a descriptor is invalid.
    pub fn from_class_file(
        file: ClassFile,
        super_class: Option<Arc<RuntimeClass>>,
        interfaces: Vec<Arc<RuntimeClass>>,
        loader: Weak<dyn ClassLoader>,
        instrumented: bool,
    ) -> Result<Self> {
        let source_file = file.source_file().map(str::to_string);
        let pool = &file.constant_pool;

        let mut fields = Vec::with_capacity(file.fields.len());
        for field in &file.fields {
            let constant = field.attributes.iter().find_map(|attribute| match attribute {
                Attribute::ConstantValue(index) => Some(*index),
                _ => None,
            });
            let constant = match constant {
                Some(index) if field.access_flags.is_static() => Some(pool.loadable(index)?),
                _ => None,
            };
            fields.push(RuntimeField {
                name: field.name.clone(),
                field_type: FieldType::parse(&field.descriptor)?,
                access: field.access_flags,
                slot: 0,
                constant,
            });
        }

        let mut methods = Vec::with_capacity(file.methods.len());
        for method in &file.methods {
            let body = match method.code() {
                Some(attribute) => {
                    MethodBody::Bytecode(Arc::new(BytecodeBody::from_code(Code::decode(attribute)?, pool)?))
                }
                None if method.access_flags.is_native() => MethodBody::Native,
                None => MethodBody::Abstract,
            };
            methods.push(RuntimeMethod::new(
                &method.name,
                &method.descriptor,
                method.access_flags,
                body,
            )?);
        }

        Ok(ClassDefinition {
            name: file.name,
            access: file.access_flags,
            super_class,
            interfaces,
            fields,
            methods,
            pool: Some(Arc::new(file.constant_pool)),
            source_file,
            kind: None,
            component: None,
            loader,
            instrumented,
        })
    }
}

/// A class defined by a loader.
pub struct RuntimeClass {
    id: ClassId,
    name: String,
    access: AccessFlags,
    super_class: Option<Arc<RuntimeClass>>,
    interfaces: Vec<Arc<RuntimeClass>>,
    fields: Vec<Arc<RuntimeField>>,
    methods: HashMap<String, Vec<Arc<RuntimeMethod>>>,
    instance_defaults: Vec<Value>,
    statics: Mutex<HashMap<String, Value>>,
    pool: Option<Arc<crate::classfile::ConstantPool>>,
    source_file: Option<String>,
    kind: ObjectKind,
    component: Option<FieldType>,
    loader: Weak<dyn ClassLoader>,
    instrumented: bool,
    init: Mutex<InitState>,
    init_done: Condvar,
    linked: DashMap<u16, Linked>,
}

impl RuntimeClass {
    /// Creates a class from a definition, laying out instance fields after the
    /// superclass fields.
    #[must_use]
    pub fn new(definition: ClassDefinition) -> Arc<RuntimeClass> {
        let mut instance_defaults = definition
            .super_class
            .as_ref()
            .map(|s| s.instance_defaults.clone())
            .unwrap_or_default();

        let mut statics = HashMap::new();
        let mut fields = Vec::with_capacity(definition.fields.len());
        for mut field in definition.fields {
            let default = Value::default_for(Some(&field.field_type));
            if field.is_static() {
                statics.insert(field.name.clone(), default);
            } else {
                field.slot = instance_defaults.len();
                instance_defaults.push(default);
            }
            fields.push(Arc::new(field));
        }

        let mut methods: HashMap<String, Vec<Arc<RuntimeMethod>>> = HashMap::new();
        for method in definition.methods {
            methods
                .entry(method.name.clone())
                .or_default()
                .push(Arc::new(method));
        }

        let kind = definition.kind.unwrap_or_else(|| {
            definition
                .super_class
                .as_ref()
                .map_or(ObjectKind::Plain, |s| s.kind)
        });

        Arc::new(RuntimeClass {
            id: ClassId(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed)),
            name: definition.name,
            access: definition.access,
            super_class: definition.super_class,
            interfaces: definition.interfaces,
            fields,
            methods,
            instance_defaults,
            statics: Mutex::new(statics),
            pool: definition.pool,
            source_file: definition.source_file,
            kind,
            component: definition.component,
            loader: definition.loader,
            instrumented: definition.instrumented,
            init: Mutex::new(InitState::Uninitialized),
            init_done: Condvar::new(),
            linked: DashMap::new(),
        })
    }

    /// Identity token.
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Internal name, e.g. `com/example/Foo$Bar`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted binary name, e.g. `com.example.Foo$Bar`.
    #[must_use]
    pub fn binary_name(&self) -> String {
        binary_name(&self.name)
    }

    /// Access flags as defined (after instrumentation, for instrumented classes).
    #[must_use]
    pub fn access(&self) -> AccessFlags {
        self.access
    }

    /// Returns `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access.contains(AccessFlags::INTERFACE)
    }

    /// Superclass.
    #[must_use]
    pub fn super_class(&self) -> Option<&Arc<RuntimeClass>> {
        self.super_class.as_ref()
    }

    /// Direct superinterfaces.
    #[must_use]
    pub fn interfaces(&self) -> &[Arc<RuntimeClass>] {
        &self.interfaces
    }

    /// Declared fields.
    pub fn fields(&self) -> impl Iterator<Item = &Arc<RuntimeField>> {
        self.fields.iter()
    }

    /// Declared methods.
    pub fn methods(&self) -> impl Iterator<Item = &Arc<RuntimeMethod>> {
        self.methods.values().flatten()
    }

    /// Constant pool of bytecode classes.
    #[must_use]
    pub fn constant_pool(&self) -> Option<&Arc<crate::classfile::ConstantPool>> {
        self.pool.as_ref()
    }

    /// `SourceFile` attribute.
    #[must_use]
    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    /// Object flavour of instances.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Component type of an array class.
    #[must_use]
    pub fn component(&self) -> Option<&FieldType> {
        self.component.as_ref()
    }

    /// Returns `true` if the instrumentor rewrote this class.
    #[must_use]
    pub fn is_instrumented(&self) -> bool {
        self.instrumented
    }

    /// The defining loader, while it is alive.
    #[must_use]
    pub fn loader(&self) -> Option<Arc<dyn ClassLoader>> {
        self.loader.upgrade()
    }

    /// Returns `true` if this class was defined by `loader`.
    #[must_use]
    pub fn is_defined_by(&self, loader: &Arc<dyn ClassLoader>) -> bool {
        self.loader
            .upgrade()
            .is_some_and(|own| std::ptr::addr_eq(Arc::as_ptr(&own), Arc::as_ptr(loader)))
    }

    /// Iterates this class and its superclasses, nearest first.
    pub fn ancestors(self: &Arc<Self>) -> impl Iterator<Item = Arc<RuntimeClass>> {
        std::iter::successors(Some(Arc::clone(self)), |class| class.super_class.clone())
    }

    /// The method declared by this class with `name` and `descriptor`. Falls back to
    /// a signature-polymorphic host method of the same name.
    #[must_use]
    pub fn declared_method(&self, name: &str, descriptor: &str) -> Option<&Arc<RuntimeMethod>> {
        let candidates = self.methods.get(name)?;
        candidates
            .iter()
            .find(|m| m.descriptor == descriptor)
            .or_else(|| {
                candidates
                    .iter()
                    .find(|m| m.descriptor == POLYMORPHIC_DESCRIPTOR)
            })
    }

    /// Resolves a method starting at this class and walking superclasses, then
    /// superinterfaces.
    #[must_use]
    pub fn find_method(
        self: &Arc<Self>,
        name: &str,
        descriptor: &str,
    ) -> Option<(Arc<RuntimeClass>, Arc<RuntimeMethod>)> {
        for class in self.ancestors() {
            if let Some(method) = class.declared_method(name, descriptor) {
                let method = Arc::clone(method);
                return Some((class, method));
            }
        }
        self.find_interface_method(name, descriptor)
    }

    /// Resolves a non-abstract implementation for a virtual call, as `invokevirtual`
    /// and `invokeinterface` do on the receiver class.
    #[must_use]
    pub fn find_virtual(
        self: &Arc<Self>,
        name: &str,
        descriptor: &str,
    ) -> Option<(Arc<RuntimeClass>, Arc<RuntimeMethod>)> {
        for class in self.ancestors() {
            if let Some(method) = class.declared_method(name, descriptor) {
                if !matches!(method.body, MethodBody::Abstract) {
                    let method = Arc::clone(method);
                    return Some((class, method));
                }
            }
        }
        self.find_interface_method(name, descriptor)
            .filter(|(_, m)| !matches!(m.body, MethodBody::Abstract))
    }

    fn find_interface_method(
        self: &Arc<Self>,
        name: &str,
        descriptor: &str,
    ) -> Option<(Arc<RuntimeClass>, Arc<RuntimeMethod>)> {
        for class in self.ancestors() {
            for interface in &class.interfaces {
                if let Some(found) = interface.find_method(name, descriptor) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Resolves a field by name in this class, its superinterfaces and superclasses.
    #[must_use]
    pub fn find_field(self: &Arc<Self>, name: &str) -> Option<(Arc<RuntimeClass>, Arc<RuntimeField>)> {
        for class in self.ancestors() {
            if let Some(field) = class.fields.iter().find(|f| f.name == name) {
                return Some((Arc::clone(&class), Arc::clone(field)));
            }
            for interface in &class.interfaces {
                if let Some(found) = interface.find_field(name) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Returns `true` if instances of this class are instances of `other`.
    #[must_use]
    pub fn is_subclass_of(self: &Arc<Self>, other: &Arc<RuntimeClass>) -> bool {
        if Arc::ptr_eq(self, other) {
            return true;
        }
        if let (Some(mine), Some(theirs)) = (&self.component, &other.component) {
            return array_component_assignable(self, mine, other, theirs);
        }
        if other.is_interface() {
            return self.implements(other);
        }
        self.ancestors().any(|class| Arc::ptr_eq(&class, other))
    }

    fn implements(self: &Arc<Self>, interface: &Arc<RuntimeClass>) -> bool {
        self.ancestors().any(|class| {
            class
                .interfaces
                .iter()
                .any(|i| Arc::ptr_eq(i, interface) || i.implements(interface))
        })
    }

    /// Returns `true` if `self` or an ancestor has the internal name `name`.
    #[must_use]
    pub fn is_named_subclass_of(self: &Arc<Self>, name: &str) -> bool {
        self.ancestors().any(|class| class.name == name)
    }

    /// Zeroed instance field slots, superclass fields first.
    #[must_use]
    pub fn instance_field_defaults(&self) -> Vec<Value> {
        self.instance_defaults.clone()
    }

    /// Allocates an instance without running a constructor.
    #[must_use]
    pub fn allocate(self: &Arc<Self>) -> ObjectRef {
        let data = match self.kind {
            ObjectKind::Plain | ObjectKind::Array => ObjectData::Plain,
            ObjectKind::Str => ObjectData::Str(String::new()),
            ObjectKind::Builder => ObjectData::Builder(Mutex::new(String::new())),
            ObjectKind::Throwable => ObjectData::Throwable(Mutex::new(ThrowableState::default())),
            ObjectKind::Thread => ObjectData::Thread(Mutex::new(ThreadState::default())),
            ObjectKind::Map => ObjectData::Map(Mutex::new(Vec::new())),
            ObjectKind::Entry => ObjectData::Entry(Value::Null, Value::Null),
        };
        Object::new(Arc::clone(self), data)
    }

    /// Locks the static field values declared by this class.
    pub fn statics(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.statics.lock().expect("static field lock poisoned")
    }

    /// Reads a static field declared by this class.
    #[must_use]
    pub fn get_static(&self, name: &str) -> Option<Value> {
        self.statics().get(name).cloned()
    }

    /// Writes a static field declared by this class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Linkage`] if the class declares no such static field.
    pub fn set_static(&self, name: &str, value: Value) -> Result<()> {
        match self.statics().get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::Linkage(format!(
                "{} has no static field {}",
                self.binary_name(),
                name
            ))),
        }
    }

    /// Drops every static value, breaking reference cycles through statics when the
    /// defining loader goes away.
    pub(crate) fn clear_statics(&self) {
        for value in self.statics().values_mut() {
            *value = Value::Void;
        }
        self.linked.clear();
    }

    pub(crate) fn linked(&self, index: u16) -> Option<Linked> {
        self.linked.get(&index).map(|entry| entry.value().clone())
    }

    pub(crate) fn link(&self, index: u16, linked: Linked) {
        self.linked.insert(index, linked);
    }

    /// Returns `true` once static initialization completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(
            *self.init.lock().expect("class init lock poisoned"),
            InitState::Initialized
        )
    }

    /// Claims initialization for the current thread.
    ///
    /// Returns `Ok(true)` if the caller must run initialization, `Ok(false)` if the
    /// class is initialized or being initialized by the current thread. Blocks
    /// while another thread initializes the class.
    ///
    /// # Errors
    ///
    /// Returns the recorded failure message of a previous failed initialization.
    pub(crate) fn begin_initialization(&self) -> std::result::Result<bool, String> {
        let current = std::thread::current().id();
        let mut state = self.init.lock().expect("class init lock poisoned");
        loop {
            match &*state {
                InitState::Initialized => return Ok(false),
                InitState::Failed(message) => return Err(message.clone()),
                InitState::InProgress(owner) if *owner == current => return Ok(false),
                InitState::InProgress(_) => {
                    state = self
                        .init_done
                        .wait(state)
                        .expect("class init lock poisoned");
                }
                InitState::Uninitialized => {
                    *state = InitState::InProgress(current);
                    return Ok(true);
                }
            }
        }
    }

    /// Records the outcome of initialization and wakes waiting threads.
    pub(crate) fn finish_initialization(&self, failure: Option<String>) {
        let mut state = self.init.lock().expect("class init lock poisoned");
        *state = match failure {
            None => InitState::Initialized,
            Some(message) => InitState::Failed(message),
        };
        self.init_done.notify_all();
    }
}

fn array_component_assignable(
    source: &Arc<RuntimeClass>,
    mine: &FieldType,
    target: &Arc<RuntimeClass>,
    theirs: &FieldType,
) -> bool {
    match (mine.is_reference(), theirs.is_reference()) {
        (true, true) => {
            if theirs.is_java_lang_object() || mine == theirs {
                return true;
            }
            let (Some(source_loader), Some(target_loader)) = (source.loader(), target.loader())
            else {
                return false;
            };
            let (Ok(a), Ok(b)) = (
                source_loader.load_class(&component_class_name(mine)),
                target_loader.load_class(&component_class_name(theirs)),
            ) else {
                return false;
            };
            a.is_subclass_of(&b)
        }
        (false, false) => mine == theirs,
        _ => false,
    }
}

/// The class name a reference component type resolves through: the internal name
/// for objects, the descriptor for nested arrays.
#[must_use]
pub fn component_class_name(component: &FieldType) -> String {
    match component {
        FieldType::Object(name) => name.clone(),
        other => other.descriptor(),
    }
}

impl fmt::Debug for RuntimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeClass")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("instrumented", &self.instrumented)
            .finish_non_exhaustive()
    }
}
