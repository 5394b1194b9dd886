//! `java.util` maps.
//!
//! `HashMap` and `LinkedHashMap` share one implementation that keeps insertion
//! order. String keys compare by content, every other key by identity.

use std::sync::Mutex;

use crate::{
    runtime::{
        class::{HostCall, ObjectKind},
        interpreter::Interpreter,
        jdk::HostClassBuilder,
        Object, ObjectData, ObjectRef, Value,
    },
    Error, Result,
};

/// Internal name of the immutable entry class.
pub(crate) const ENTRY_CLASS: &str = "java/util/AbstractMap$SimpleImmutableEntry";

pub(super) fn register(classes: &mut Vec<HostClassBuilder>) {
    classes.push(
        HostClassBuilder::interface("java/util/Map")
            .abstract_method("put", "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;")
            .abstract_method("get", "(Ljava/lang/Object;)Ljava/lang/Object;")
            .abstract_method("remove", "(Ljava/lang/Object;)Ljava/lang/Object;")
            .abstract_method("containsKey", "(Ljava/lang/Object;)Z")
            .abstract_method("size", "()I")
            .abstract_method("isEmpty", "()Z")
            .abstract_method("clear", "()V"),
    );
    classes.push(
        HostClassBuilder::interface("java/util/Map$Entry")
            .abstract_method("getKey", "()Ljava/lang/Object;")
            .abstract_method("getValue", "()Ljava/lang/Object;"),
    );
    classes.push(
        HostClassBuilder::new("java/util/HashMap")
            .implements("java/util/Map")
            .kind(ObjectKind::Map)
            .method("<init>", "()V", map_init)
            .method("<init>", "(I)V", map_init)
            .method("<init>", "(IFZ)V", map_init)
            .method("put", "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;", map_put)
            .method("get", "(Ljava/lang/Object;)Ljava/lang/Object;", map_get)
            .method("remove", "(Ljava/lang/Object;)Ljava/lang/Object;", map_remove)
            .method("containsKey", "(Ljava/lang/Object;)Z", map_contains_key)
            .method("size", "()I", map_size)
            .method("isEmpty", "()Z", map_is_empty)
            .method("clear", "()V", map_clear),
    );
    classes.push(HostClassBuilder::new("java/util/LinkedHashMap").extends("java/util/HashMap"));
    classes.push(
        HostClassBuilder::new(ENTRY_CLASS)
            .implements("java/util/Map$Entry")
            .kind(ObjectKind::Entry)
            .method("getKey", "()Ljava/lang/Object;", entry_get_key)
            .method("getValue", "()Ljava/lang/Object;", entry_get_value),
    );
}

fn entries(this: &ObjectRef) -> Result<&Mutex<Vec<(Value, Value)>>> {
    match this.data() {
        ObjectData::Map(entries) => Ok(entries),
        _ => Err(Error::Linkage(format!(
            "{} is not a map",
            this.class().binary_name()
        ))),
    }
}

fn with_entries<R>(call: &HostCall, f: impl FnOnce(&mut Vec<(Value, Value)>) -> R) -> Result<R> {
    Ok(f(&mut entries(call.this()?)?.lock().expect("map lock poisoned")))
}

/// The first entry of `map` in insertion order, as a new entry object.
///
/// # Errors
///
/// Returns an error when `map` is not a host map.
pub(crate) fn eldest(interp: &Interpreter, map: &ObjectRef) -> Result<Value> {
    let first = entries(map)?
        .lock()
        .expect("map lock poisoned")
        .first()
        .cloned();
    let Some((key, value)) = first else {
        return Ok(Value::Null);
    };
    let class = interp.sandbox().system_loader().load_class(ENTRY_CLASS)?;
    Ok(Value::Ref(Object::new(class, ObjectData::Entry(key, value))))
}

fn map_init(_: &mut Interpreter, _: HostCall) -> Result<Value> {
    Ok(Value::Void)
}

fn map_put(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let key = call.arg(1).clone();
    let value = call.arg(2).clone();
    with_entries(&call, |entries| {
        match entries.iter_mut().find(|(k, _)| k.key_equals(&key)) {
            Some((_, slot)) => std::mem::replace(slot, value),
            None => {
                entries.push((key, value));
                Value::Null
            }
        }
    })
}

fn map_get(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let key = call.arg(1);
    with_entries(&call, |entries| {
        entries
            .iter()
            .find(|(k, _)| k.key_equals(key))
            .map_or(Value::Null, |(_, v)| v.clone())
    })
}

fn map_remove(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let key = call.arg(1);
    with_entries(&call, |entries| {
        match entries.iter().position(|(k, _)| k.key_equals(key)) {
            Some(index) => entries.remove(index).1,
            None => Value::Null,
        }
    })
}

fn map_contains_key(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let key = call.arg(1);
    with_entries(&call, |entries| {
        Value::from_bool(entries.iter().any(|(k, _)| k.key_equals(key)))
    })
}

fn map_size(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    with_entries(&call, |entries| {
        Value::Int(i32::try_from(entries.len()).unwrap_or(i32::MAX))
    })
}

fn map_is_empty(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    with_entries(&call, |entries| Value::from_bool(entries.is_empty()))
}

fn map_clear(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    with_entries(&call, Vec::clear)?;
    Ok(Value::Void)
}

fn entry_get_key(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    match call.this()?.data() {
        ObjectData::Entry(key, _) => Ok(key.clone()),
        _ => Err(Error::Linkage("getKey on a non-entry".into())),
    }
}

fn entry_get_value(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    match call.this()?.data() {
        ObjectData::Entry(_, value) => Ok(value.clone()),
        _ => Err(Error::Linkage("getValue on a non-entry".into())),
    }
}
