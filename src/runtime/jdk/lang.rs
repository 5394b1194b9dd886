//! `java.lang` core classes.
//!
//! | Class | Methods |
//! |-------|---------|
//! | `Object` | `<init>`, `equals`, `hashCode`, `toString` |
//! | `String` | `length`, `isEmpty`, `charAt`, `equals`, `hashCode`, `toString`, `concat`, `startsWith`, `intern`, `valueOf` |
//! | `StringBuilder` | `<init>`, `append` (all overloads), `length`, `toString` |
//! | `System` | `nanoTime`, `currentTimeMillis`, `arraycopy`, `identityHashCode`, `loadLibrary` |
//! | `Enum` | `<init>`, `name`, `ordinal`, `toString`, `compareTo`, final `equals`/`hashCode` |
//! | `Runnable` | `run` (abstract) |
//!
//! `System` time methods read the sandbox clock, so time only moves when the host
//! advances it.

use std::sync::Arc;

use log::debug;

use crate::{
    classfile::FieldType,
    runtime::{
        class::{HostCall, ObjectKind},
        interpreter::Interpreter,
        jdk::{HostClassBuilder, OBJECT},
        ObjectData, Value,
    },
    Error, Result,
};

pub(super) fn register(classes: &mut Vec<HostClassBuilder>) {
    classes.push(
        HostClassBuilder::new(OBJECT)
            .method("<init>", "()V", object_init)
            .method("equals", "(Ljava/lang/Object;)Z", object_equals)
            .method("hashCode", "()I", object_hash_code)
            .method("toString", "()Ljava/lang/String;", object_to_string),
    );
    classes.push(HostClassBuilder::interface("java/lang/Runnable").abstract_method("run", "()V"));
    classes.push(
        HostClassBuilder::new("java/lang/String")
            .kind(ObjectKind::Str)
            .method("length", "()I", string_length)
            .method("isEmpty", "()Z", string_is_empty)
            .method("charAt", "(I)C", string_char_at)
            .method("equals", "(Ljava/lang/Object;)Z", string_equals)
            .method("hashCode", "()I", string_hash_code)
            .method("toString", "()Ljava/lang/String;", string_to_string)
            .method("concat", "(Ljava/lang/String;)Ljava/lang/String;", string_concat)
            .method("startsWith", "(Ljava/lang/String;)Z", string_starts_with)
            .method("intern", "()Ljava/lang/String;", string_intern)
            .static_method("valueOf", "(Ljava/lang/Object;)Ljava/lang/String;", string_value_of)
            .static_method("valueOf", "(I)Ljava/lang/String;", string_value_of)
            .static_method("valueOf", "(J)Ljava/lang/String;", string_value_of)
            .static_method("valueOf", "(Z)Ljava/lang/String;", string_value_of)
            .static_method("valueOf", "(C)Ljava/lang/String;", string_value_of),
    );

    let mut builder = HostClassBuilder::new("java/lang/StringBuilder")
        .kind(ObjectKind::Builder)
        .method("<init>", "()V", object_init)
        .method("<init>", "(Ljava/lang/String;)V", builder_init)
        .method("length", "()I", builder_length)
        .method("toString", "()Ljava/lang/String;", builder_to_string);
    for descriptor in [
        "(Ljava/lang/String;)Ljava/lang/StringBuilder;",
        "(Ljava/lang/Object;)Ljava/lang/StringBuilder;",
        "(I)Ljava/lang/StringBuilder;",
        "(J)Ljava/lang/StringBuilder;",
        "(F)Ljava/lang/StringBuilder;",
        "(D)Ljava/lang/StringBuilder;",
        "(Z)Ljava/lang/StringBuilder;",
        "(C)Ljava/lang/StringBuilder;",
    ] {
        builder = builder.method("append", descriptor, builder_append);
    }
    classes.push(builder);

    classes.push(
        HostClassBuilder::new("java/lang/System")
            .static_method("nanoTime", "()J", system_nano_time)
            .static_method("currentTimeMillis", "()J", system_current_time_millis)
            .static_method(
                "arraycopy",
                "(Ljava/lang/Object;ILjava/lang/Object;II)V",
                system_arraycopy,
            )
            .static_method("identityHashCode", "(Ljava/lang/Object;)I", system_identity_hash_code)
            .static_method("loadLibrary", "(Ljava/lang/String;)V", system_load_library),
    );
    classes.push(
        HostClassBuilder::new("java/lang/Enum")
            .field("name", "Ljava/lang/String;")
            .field("ordinal", "I")
            .method("<init>", "(Ljava/lang/String;I)V", enum_init)
            .final_method("name", "()Ljava/lang/String;", enum_name)
            .final_method("ordinal", "()I", enum_ordinal)
            .method("toString", "()Ljava/lang/String;", enum_name)
            .final_method("compareTo", "(Ljava/lang/Enum;)I", enum_compare_to)
            .final_method("equals", "(Ljava/lang/Object;)Z", object_equals)
            .final_method("hashCode", "()I", object_hash_code),
    );
}

fn object_init(_: &mut Interpreter, _: HostCall) -> Result<Value> {
    Ok(Value::Void)
}

fn object_equals(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    Ok(Value::from_bool(call.arg(0).same(call.arg(1))))
}

fn object_hash_code(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    Ok(Value::Int(call.this()?.id().hash_code()))
}

fn object_to_string(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let this = Arc::clone(call.this()?);
    let hash = interp
        .invoke_virtual(&this, "hashCode", "()I", Vec::new())?
        .as_int()?;
    let text = format!("{}@{:x}", this.class().binary_name(), hash as u32);
    Ok(Value::Ref(interp.new_string(&text)?))
}

fn this_str(call: &HostCall) -> Result<&str> {
    call.arg(0)
        .as_str()
        .ok_or_else(|| Error::Linkage("string method invoked on a non-string".into()))
}

fn string_length(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let length = this_str(&call)?.encode_utf16().count();
    Ok(Value::Int(i32::try_from(length).unwrap_or(i32::MAX)))
}

fn string_is_empty(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    Ok(Value::from_bool(this_str(&call)?.is_empty()))
}

fn string_char_at(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let text = this_str(&call)?;
    let index = call.arg(1).as_int()?;
    match usize::try_from(index)
        .ok()
        .and_then(|i| text.encode_utf16().nth(i))
    {
        Some(unit) => Ok(Value::Int(i32::from(unit))),
        None => Err(interp.throw_new(
            "java/lang/StringIndexOutOfBoundsException",
            format!("index {index}, length {}", text.encode_utf16().count()),
        )),
    }
}

fn string_equals(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let equal = matches!((call.arg(0).as_str(), call.arg(1).as_str()), (Some(a), Some(b)) if a == b);
    Ok(Value::from_bool(equal))
}

/// `s[0]*31^(n-1) + ... + s[n-1]` over UTF-16 code units.
pub(crate) fn java_string_hash(text: &str) -> i32 {
    text.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

fn string_hash_code(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    Ok(Value::Int(java_string_hash(this_str(&call)?)))
}

fn string_to_string(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    Ok(call.arg(0).clone())
}

fn string_concat(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let Some(other) = call.arg(1).as_str() else {
        return Err(interp.throw_new("java/lang/NullPointerException", "concat(null)"));
    };
    let joined = format!("{}{}", this_str(&call)?, other);
    Ok(Value::Ref(interp.new_string(&joined)?))
}

fn string_starts_with(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let Some(prefix) = call.arg(1).as_str() else {
        return Err(interp.throw_new("java/lang/NullPointerException", "startsWith(null)"));
    };
    Ok(Value::from_bool(this_str(&call)?.starts_with(prefix)))
}

fn string_intern(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    Ok(Value::Ref(interp.intern(this_str(&call)?)?))
}

/// Renders `value` the way string conversion renders a value of `param` type.
fn render(interp: &mut Interpreter, value: &Value, param: Option<&FieldType>) -> Result<String> {
    match param {
        Some(FieldType::Boolean) => Ok(if value.as_bool()? { "true" } else { "false" }.to_string()),
        Some(FieldType::Char) => {
            let unit = value.as_int()? as u16;
            Ok(String::from_utf16_lossy(&[unit]))
        }
        _ => interp.to_java_string(value),
    }
}

fn string_value_of(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let param = call.descriptor.parameters.first().cloned();
    let text = render(interp, call.arg(0), param.as_ref())?;
    Ok(Value::Ref(interp.new_string(&text)?))
}

fn builder_buffer(call: &HostCall) -> Result<&std::sync::Mutex<String>> {
    match call.this()?.data() {
        ObjectData::Builder(buffer) => Ok(buffer),
        _ => Err(Error::Linkage("StringBuilder method invoked on a non-builder".into())),
    }
}

fn builder_init(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let initial = call.arg(1).as_str().unwrap_or("null").to_string();
    builder_buffer(&call)?
        .lock()
        .expect("string builder lock poisoned")
        .push_str(&initial);
    Ok(Value::Void)
}

fn builder_append(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let param = call.descriptor.parameters.first().cloned();
    let text = render(interp, call.arg(1), param.as_ref())?;
    builder_buffer(&call)?
        .lock()
        .expect("string builder lock poisoned")
        .push_str(&text);
    Ok(call.arg(0).clone())
}

fn builder_length(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    let length = builder_buffer(&call)?
        .lock()
        .expect("string builder lock poisoned")
        .encode_utf16()
        .count();
    Ok(Value::Int(i32::try_from(length).unwrap_or(i32::MAX)))
}

fn builder_to_string(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let text = builder_buffer(&call)?
        .lock()
        .expect("string builder lock poisoned")
        .clone();
    Ok(Value::Ref(interp.new_string(&text)?))
}

fn system_nano_time(interp: &mut Interpreter, _: HostCall) -> Result<Value> {
    Ok(Value::Long(interp.sandbox().clock().nano_time()))
}

fn system_current_time_millis(interp: &mut Interpreter, _: HostCall) -> Result<Value> {
    Ok(Value::Long(interp.sandbox().clock().current_time_millis()))
}

fn system_arraycopy(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    arraycopy(interp, &call.args)?;
    Ok(Value::Void)
}

/// `System.arraycopy(src, srcPos, dest, destPos, length)` over `args`.
pub(crate) fn arraycopy(interp: &mut Interpreter, args: &[Value]) -> Result<()> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    let (Some(source), Some(dest)) = (arg(0).object().cloned(), arg(2).object().cloned()) else {
        return Err(interp.throw_new("java/lang/NullPointerException", "arraycopy of null"));
    };
    let (source_pos, dest_pos, length) = (arg(1).as_int()?, arg(3).as_int()?, arg(4).as_int()?);
    let (ObjectData::Array(source_elements), ObjectData::Array(dest_elements)) =
        (source.data(), dest.data())
    else {
        return Err(interp.throw_new("java/lang/ArrayStoreException", "arraycopy: not an array"));
    };

    let copied: Option<Vec<Value>> = {
        let elements = source_elements.lock().expect("array lock poisoned");
        let start = usize::try_from(source_pos).ok();
        let count = usize::try_from(length).ok();
        match (start, count) {
            (Some(start), Some(count)) if start + count <= elements.len() => {
                Some(elements[start..start + count].to_vec())
            }
            _ => None,
        }
    };
    let Some(copied) = copied else {
        return Err(interp.throw_new(
            "java/lang/ArrayIndexOutOfBoundsException",
            format!("arraycopy: last source index {} out of bounds", i64::from(source_pos) + i64::from(length)),
        ));
    };

    let mut elements = dest_elements.lock().expect("array lock poisoned");
    match usize::try_from(dest_pos) {
        Ok(start) if start + copied.len() <= elements.len() => {
            elements[start..start + copied.len()].clone_from_slice(&copied);
            Ok(())
        }
        _ => {
            let size = elements.len();
            drop(elements);
            Err(interp.throw_new(
                "java/lang/ArrayIndexOutOfBoundsException",
                format!(
                    "arraycopy: last destination index {} out of bounds for length {size}",
                    i64::from(dest_pos) + i64::from(length)
                ),
            ))
        }
    }
}

fn system_identity_hash_code(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    Ok(Value::Int(
        call.arg(0).object().map_or(0, |object| object.id().hash_code()),
    ))
}

fn system_load_library(_: &mut Interpreter, call: HostCall) -> Result<Value> {
    debug!("Ignoring System.loadLibrary({:?})", call.arg(0).as_str());
    Ok(Value::Void)
}

fn enum_init(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let this = Arc::clone(call.this()?);
    interp.set_field(&this, "name", call.arg(1).clone())?;
    interp.set_field(&this, "ordinal", call.arg(2).clone())?;
    Ok(Value::Void)
}

fn enum_name(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    interp.get_field(call.this()?, "name")
}

fn enum_ordinal(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    interp.get_field(call.this()?, "ordinal")
}

fn enum_compare_to(interp: &mut Interpreter, call: HostCall) -> Result<Value> {
    let Some(other) = call.arg(1).object() else {
        return Err(interp.throw_new("java/lang/NullPointerException", "compareTo(null)"));
    };
    let mine = interp.get_field(call.this()?, "ordinal")?.as_int()?;
    let theirs = interp.get_field(other, "ordinal")?.as_int()?;
    Ok(Value::Int(mine.wrapping_sub(theirs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_java_string_hash() {
        assert_eq!(java_string_hash(""), 0);
        assert_eq!(java_string_hash("a"), 97);
        assert_eq!(java_string_hash("hello"), 99_162_322);
        assert_eq!(java_string_hash("polygenelubricants"), i32::MIN);
    }
}
