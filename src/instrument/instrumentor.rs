use std::{collections::HashSet, sync::Arc};

use log::{debug, warn};

use crate::{
    classfile::{
        binary_name,
        code::{opcodes::*, Code, CodeAssembler, Insn, Label},
        internal_name, AccessFlags, Attribute, CodeAttribute, ConstantPool, CpInfo, FieldType,
        MemberInfo, MethodDescriptor, MethodInfo,
    },
    config::InstrumentationConfiguration,
    instrument::{
        direct_method_name, method_signature, native_stub_name, MutableClass,
        CONSTRUCTOR_METHOD_NAME, DISPATCH_CLASS, STATIC_INITIALIZER_METHOD_NAME,
    },
    runtime::NativeCallMode,
    Result,
};

const OBJECT_METHODS: [(&str, &str); 3] = [
    ("equals", "(Ljava/lang/Object;)Z"),
    ("hashCode", "()I"),
    ("toString", "()Ljava/lang/String;"),
];

/// Answers questions about the ancestors of a class being instrumented.
pub trait ClassHierarchy {
    /// Returns `true` if `class_name` (internal) or one of its ancestors declares
    /// `name + descriptor` as `final` in its original, uninstrumented form.
    fn declares_final(&self, class_name: &str, name: &str, descriptor: &str) -> bool;
}

/// Rewrites classes so all behavior routes through the dispatch host.
///
/// One instrumentor serves every class a sandbox loader defines. It is stateless
/// apart from its configuration, so [`ClassInstrumentor::instrument`] may run on
/// several threads at once.
#[derive(Debug, Clone)]
pub struct ClassInstrumentor {
    config: Arc<InstrumentationConfiguration>,
    native_mode: NativeCallMode,
}

impl ClassInstrumentor {
    /// Creates an instrumentor for `config`.
    ///
    /// `native_mode` selects the body generated for native methods: [`NativeCallMode::Legacy`]
    /// returns a default value, every other mode calls the native call handler.
    #[must_use]
    pub fn new(config: Arc<InstrumentationConfiguration>, native_mode: NativeCallMode) -> Self {
        ClassInstrumentor {
            config,
            native_mode,
        }
    }

    /// Rewrites `class` in place. Must be called at most once per class.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a method body cannot be decoded or
    /// re-encoded, or if a constructor never calls a superclass constructor. There is
    /// no partial instrumentation: the class must not be defined after an error.
    pub fn instrument(&self, class: &mut MutableClass, hierarchy: &dyn ClassHierarchy) -> Result<()> {
        if self.config.has_translations() {
            self.translate_class_names(class)?;
        }

        let declared_object_methods: Vec<bool> = OBJECT_METHODS
            .iter()
            .map(|(name, descriptor)| class.declared(name, descriptor))
            .collect();
        let has_no_arg_constructor = class.declared("<init>", "()V");

        let subject = class.class_file_mut();
        let class_name = subject.name.clone();
        let super_name = subject
            .super_name
            .clone()
            .unwrap_or_else(|| "java/lang/Object".to_string());
        debug!("Instrumenting {}", binary_name(&class_name));

        subject.access_flags =
            (subject.access_flags - AccessFlags::FINAL).with_visibility(AccessFlags::PUBLIC);
        for field in &mut subject.fields {
            field.access_flags.remove(AccessFlags::FINAL);
        }

        let originals = std::mem::take(&mut subject.methods);
        let pool = &mut subject.constant_pool;
        let mut methods = Vec::with_capacity(originals.len() * 2 + 4);

        for mut method in originals {
            self.rewrite_call_sites(pool, &mut method)?;
            method.access_flags.remove(AccessFlags::FINAL);

            if method.name == "<clinit>" {
                method.name = STATIC_INITIALIZER_METHOD_NAME.to_string();
                methods.push(method);
                methods.push(static_initializer_notifier(pool, &class_name)?);
            } else if method.name == "<init>" {
                instrument_constructor(pool, &class_name, &super_name, method, &mut methods)?;
            } else if method.access_flags.contains(AccessFlags::SYNTHETIC)
                || method.access_flags.is_abstract()
            {
                methods.push(method);
            } else {
                self.instrument_normal_method(pool, &class_name, method, &mut methods)?;
            }
        }

        if !has_no_arg_constructor {
            methods.push(no_arg_constructor(pool, &super_name)?);
        }

        for ((name, descriptor), declared) in OBJECT_METHODS.iter().zip(declared_object_methods) {
            if declared || hierarchy.declares_final(&super_name, name, descriptor) {
                continue;
            }
            let method = object_method_fallthrough(pool, &super_name, name, descriptor)?;
            self.instrument_normal_method(pool, &class_name, method, &mut methods)?;
        }

        subject.methods = methods;
        Ok(())
    }

    /// Applies the configured class name translations to every class reference and
    /// descriptor of `class`.
    fn translate_class_names(&self, class: &mut MutableClass) -> Result<()> {
        let config = &self.config;
        let map = |internal: &str| -> Option<String> {
            config
                .translated_name(&binary_name(internal))
                .map(internal_name)
        };
        let map_descriptor = |descriptor: &str| -> Result<String> {
            if descriptor.starts_with('(') {
                Ok(MethodDescriptor::parse(descriptor)?.map_classes(&map).to_string())
            } else {
                Ok(FieldType::parse(descriptor)?.map_classes(&map).to_string())
            }
        };

        let subject = class.class_file_mut();
        let mut renamed_classes = Vec::new();
        let mut retyped = Vec::new();
        for (index, entry) in subject.constant_pool.iter() {
            match entry {
                CpInfo::Class { .. } => {
                    let name = subject.constant_pool.class_name(index)?;
                    let mapped = if name.starts_with('[') {
                        map_descriptor(name)?
                    } else {
                        map(name).unwrap_or_else(|| name.to_string())
                    };
                    if mapped != name {
                        renamed_classes.push((index, mapped));
                    }
                }
                CpInfo::NameAndType { .. } => {
                    let (_, descriptor) = subject.constant_pool.name_and_type(index)?;
                    let mapped = map_descriptor(descriptor)?;
                    if mapped != descriptor {
                        retyped.push((index, mapped));
                    }
                }
                _ => {}
            }
        }
        for (index, name) in renamed_classes {
            subject.constant_pool.rename_class(index, &name)?;
        }
        for (index, descriptor) in retyped {
            subject.constant_pool.retype_name_and_type(index, &descriptor)?;
        }

        if let Some(name) = map(&subject.name) {
            subject.name = name;
        }
        if let Some(name) = subject.super_name.as_deref().and_then(|n| map(n)) {
            subject.super_name = Some(name);
        }
        for interface in &mut subject.interfaces {
            if let Some(name) = map(interface) {
                *interface = name;
            }
        }
        for member in subject.fields.iter_mut().chain(subject.methods.iter_mut()) {
            member.descriptor = map_descriptor(&member.descriptor)?;
        }
        Ok(())
    }

    /// Redirects call sites of intercepted methods to `Dispatch.intercept`.
    fn rewrite_call_sites(&self, pool: &mut ConstantPool, method: &mut MethodInfo) -> Result<()> {
        let Some(attribute) = method.code() else {
            return Ok(());
        };
        let mut code = Code::decode(attribute)?;

        let mut rewritten = Vec::with_capacity(code.insns.len());
        let mut changed = false;
        for insn in std::mem::take(&mut code.insns) {
            let Insn::Invoke { opcode, index } = insn else {
                rewritten.push(insn);
                continue;
            };
            let target = pool.member_ref(index)?;
            if !self
                .config
                .is_intercepted(&binary_name(&target.class_name), &target.name)
            {
                rewritten.push(insn);
                continue;
            }

            let descriptor = MethodDescriptor::parse(&target.descriptor)?;
            let mut intercept = if opcode == INVOKESTATIC {
                descriptor
            } else {
                descriptor.with_leading(&[FieldType::object("java/lang/Object")])
            };
            intercept = intercept.with_trailing(&[FieldType::object("java/lang/String")]);

            let signature = method_signature(&target.class_name, &target.name, &target.descriptor);
            rewritten.push(Insn::Ldc(pool.add_string(&signature)?));
            rewritten.push(Insn::Invoke {
                opcode: INVOKESTATIC,
                index: pool.add_method_ref(DISPATCH_CLASS, "intercept", &intercept.to_string(), false)?,
            });
            changed = true;
        }

        if changed {
            code.insns = rewritten;
            code.max_stack = code.max_stack.saturating_add(1);
            method.set_code(code.encode(pool)?);
        }
        Ok(())
    }

    /// Splits `method` into a private direct method holding the body and a delegator
    /// under the original name.
    fn instrument_normal_method(
        &self,
        pool: &mut ConstantPool,
        class_name: &str,
        method: MethodInfo,
        out: &mut Vec<MethodInfo>,
    ) -> Result<()> {
        let descriptor = MethodDescriptor::parse(&method.descriptor)?;
        let is_static = method.access_flags.is_static();
        let signature = method_signature(class_name, &method.name, &method.descriptor);
        let receiver = u16::from(!is_static);

        let mut direct = method.clone();
        direct.name = direct_method_name(class_name, &method.name);
        direct.access_flags = (method.access_flags
            - AccessFlags::NATIVE
            - AccessFlags::ABSTRACT
            - AccessFlags::FINAL)
            .with_visibility(AccessFlags::PRIVATE);

        if method.access_flags.is_native() {
            let locals = descriptor.parameter_slots() + receiver;
            let body = assemble(pool, locals, |asm| {
                if self.native_mode == NativeCallMode::Legacy {
                    asm.push_default(descriptor.return_type.as_ref())?;
                } else {
                    let handler = MethodDescriptor::new(
                        vec![FieldType::object("java/lang/String")],
                        descriptor.return_type.clone(),
                    );
                    asm.ldc_string(&signature)?
                        .invokestatic(DISPATCH_CLASS, "nativeMethodInvoked", &handler.to_string())?;
                }
                asm.xreturn(descriptor.return_type.as_ref());
                Ok(())
            })?;
            direct.set_code(body);

            let mut stub_flags = AccessFlags::PRIVATE | AccessFlags::NATIVE | AccessFlags::SYNTHETIC;
            if is_static {
                stub_flags |= AccessFlags::STATIC;
            }
            out.push(MemberInfo::new(
                stub_flags,
                &native_stub_name(&method.name),
                &method.descriptor,
            ));
        }

        let mut delegator = MemberInfo::new(
            method.access_flags - AccessFlags::NATIVE - AccessFlags::ABSTRACT - AccessFlags::FINAL,
            &method.name,
            &method.descriptor,
        );
        delegator.attributes = method
            .attributes
            .into_iter()
            .filter(|a| !matches!(a, Attribute::Code(_)))
            .collect();
        let body = assemble(pool, descriptor.parameter_slots() + receiver, |asm| {
            asm.ldc_string(&signature)?;
            let entry = if is_static {
                asm.load_args(&descriptor, 0);
                "staticMethodInvoked"
            } else {
                asm.aload(0).load_args(&descriptor, 1);
                "methodInvoked"
            };
            let dispatch = dispatch_descriptor(&descriptor, is_static);
            asm.invokestatic(DISPATCH_CLASS, entry, &dispatch.to_string())?
                .xreturn(descriptor.return_type.as_ref());
            Ok(())
        })?;
        delegator.set_code(body);

        out.push(direct);
        out.push(delegator);
        Ok(())
    }
}

/// The descriptor of the `Dispatch.methodInvoked` / `staticMethodInvoked` call for a
/// method with `descriptor`: the signature string, the receiver, then the parameters.
fn dispatch_descriptor(descriptor: &MethodDescriptor, is_static: bool) -> MethodDescriptor {
    let mut leading = vec![FieldType::object("java/lang/String")];
    if !is_static {
        leading.push(FieldType::object("java/lang/Object"));
    }
    descriptor.with_leading(&leading)
}

fn assemble<F>(pool: &mut ConstantPool, max_locals: u16, body: F) -> Result<CodeAttribute>
where
    F: FnOnce(&mut CodeAssembler<'_>) -> Result<()>,
{
    let mut asm = CodeAssembler::new(pool, max_locals);
    body(&mut asm)?;
    let code = asm.finish();
    code.encode(pool)
}

/// `<clinit>` replacement: `Dispatch.classInitializing("owner")`.
fn static_initializer_notifier(pool: &mut ConstantPool, class_name: &str) -> Result<MethodInfo> {
    let mut notifier = MemberInfo::new(AccessFlags::STATIC, "<clinit>", "()V");
    notifier.set_code(assemble(pool, 0, |asm| {
        asm.ldc_string(class_name)?
            .invokestatic(DISPATCH_CLASS, "classInitializing", "(Ljava/lang/String;)V")?
            .return_void();
        Ok(())
    })?);
    Ok(notifier)
}

fn no_arg_constructor(pool: &mut ConstantPool, super_name: &str) -> Result<MethodInfo> {
    let mut constructor = MemberInfo::new(AccessFlags::PUBLIC, "<init>", "()V");
    constructor.set_code(assemble(pool, 1, |asm| {
        asm.aload(0)
            .invokespecial(super_name, "<init>", "()V")?
            .aload(0)
            .invokestatic(DISPATCH_CLASS, "initializing", "(Ljava/lang/Object;)V")?
            .return_void();
        Ok(())
    })?);
    Ok(constructor)
}

/// A public method that only calls the superclass implementation.
fn object_method_fallthrough(
    pool: &mut ConstantPool,
    super_name: &str,
    name: &str,
    descriptor: &str,
) -> Result<MethodInfo> {
    let parsed = MethodDescriptor::parse(descriptor)?;
    let mut method = MemberInfo::new(AccessFlags::PUBLIC, name, descriptor);
    method.set_code(assemble(pool, parsed.parameter_slots() + 1, |asm| {
        asm.aload(0)
            .load_args(&parsed, 1)
            .invokespecial(super_name, name, descriptor)?
            .xreturn(parsed.return_type.as_ref());
        Ok(())
    })?);
    Ok(method)
}

/// Index of the `invokespecial <init>` that chains to the superclass or to another
/// constructor of the same class. Nested `new` expressions of those classes are skipped.
fn find_chained_constructor_call(
    pool: &ConstantPool,
    code: &Code,
    class_name: &str,
    super_name: &str,
) -> Result<usize> {
    let mut pending_news = 0usize;
    for (position, insn) in code.insns.iter().enumerate() {
        match insn {
            Insn::Type { opcode: NEW, index } => {
                let created = pool.class_name(*index)?;
                if created == class_name || created == super_name {
                    pending_news += 1;
                }
            }
            Insn::Invoke {
                opcode: INVOKESPECIAL,
                index,
            } => {
                let target = pool.member_ref(*index)?;
                if target.name == "<init>"
                    && (target.class_name == class_name || target.class_name == super_name)
                {
                    if pending_news == 0 {
                        return Ok(position);
                    }
                    pending_news -= 1;
                }
            }
            _ => {}
        }
    }
    Err(malformed_error!(
        "Constructor {}.<init> never calls a superclass constructor",
        binary_name(class_name)
    ))
}

/// Splits a constructor: the chained constructor call stays in `<init>`, the rest of
/// the body moves to the direct `__constructor__` method.
fn instrument_constructor(
    pool: &mut ConstantPool,
    class_name: &str,
    super_name: &str,
    method: MethodInfo,
    out: &mut Vec<MethodInfo>,
) -> Result<()> {
    let Some(attribute) = method.code() else {
        return Err(malformed_error!(
            "Constructor {}.<init>{} has no body",
            binary_name(class_name),
            method.descriptor
        ));
    };
    let code = Code::decode(attribute)?;
    let split = find_chained_constructor_call(pool, &code, class_name, super_name)?;
    let descriptor = MethodDescriptor::parse(&method.descriptor)?;

    let prefix: Vec<Insn> = code.insns[..=split].to_vec();
    let body: Vec<Insn> = code.insns[split + 1..].to_vec();
    let prefix_labels = labels_in(&prefix);
    let body_labels = labels_in(&body);

    let mut prefix_handlers = Vec::new();
    let mut body_handlers = Vec::new();
    for block in &code.try_catch {
        let ends = [block.start, block.end, block.handler];
        if ends.iter().all(|l| body_labels.contains(l)) {
            body_handlers.push(block.clone());
        } else if ends.iter().all(|l| prefix_labels.contains(l)) {
            prefix_handlers.push(block.clone());
        } else {
            warn!(
                "Dropping exception handler spanning the constructor call in {}.<init>{}",
                binary_name(class_name),
                method.descriptor
            );
        }
    }

    let mut direct_code = Code::new(code.max_stack, code.max_locals);
    direct_code.insns = body;
    direct_code.try_catch = body_handlers;
    direct_code.attributes = code.attributes.clone();
    let mut direct = method.clone();
    direct.name = direct_method_name(class_name, CONSTRUCTOR_METHOD_NAME);
    direct.access_flags = (method.access_flags - AccessFlags::FINAL).with_visibility(AccessFlags::PRIVATE);
    direct.set_code(direct_code.encode(pool)?);

    let signature = method_signature(class_name, CONSTRUCTOR_METHOD_NAME, &method.descriptor);
    let mut tail = CodeAssembler::new(pool, descriptor.parameter_slots() + 1);
    tail.aload(0)
        .invokestatic(DISPATCH_CLASS, "initializing", "(Ljava/lang/Object;)V")?
        .ldc_string(&signature)?
        .aload(0)
        .load_args(&descriptor, 1)
        .invokestatic(
            DISPATCH_CLASS,
            "methodInvoked",
            &dispatch_descriptor(&descriptor, false).to_string(),
        )?
        .return_void();
    let tail = tail.finish();

    let mut constructor_code = Code::new(code.max_stack.max(tail.max_stack), code.max_locals);
    constructor_code.insns = prefix;
    constructor_code.insns.extend(tail.insns);
    constructor_code.try_catch = prefix_handlers;
    constructor_code.attributes = code.attributes;

    let mut constructor = method;
    constructor.access_flags =
        (constructor.access_flags - AccessFlags::FINAL).with_visibility(AccessFlags::PUBLIC);
    constructor.set_code(constructor_code.encode(pool)?);

    out.push(direct);
    out.push(constructor);
    Ok(())
}

fn labels_in(insns: &[Insn]) -> HashSet<Label> {
    insns
        .iter()
        .filter_map(|insn| match insn {
            Insn::Label(label) => Some(*label),
            _ => None,
        })
        .collect()
}
