//! Sandbox reuse across test requests.

mod common;

use std::sync::Arc;

use common::{foo, instrumentation, provider, FOO};
use shadowbox::prelude::*;

fn manager() -> Result<SandboxManager> {
    SandboxManager::new(
        instrumentation(),
        ShadowMap::empty(),
        SandboxConfig::default(),
        provider(vec![(FOO.to_string(), foo()?)]),
    )
}

fn shadow_foo(name: &'static str) -> Result<Arc<ShadowClass>> {
    ShadowClass::builder("ShadowFoo", "com.example.Foo")
        .method("getName", "()Ljava/lang/String;", move |call| call.new_string(name))
        .build()
}

/// Requests resolving to the same configuration share one sandbox and its classes;
/// a different SDK level gets its own.
#[test]
fn test_requests_share_sandboxes() -> Result<()> {
    let manager = manager()?;
    let first = manager.sandbox_for(SandboxRequest::new())?;
    let again = manager.sandbox_for(SandboxRequest::new())?;
    assert!(Arc::ptr_eq(&first, &again));
    assert!(Arc::ptr_eq(
        &first.load_class("com.example.Foo")?,
        &again.load_class("com.example.Foo")?
    ));

    let older = manager.sandbox_for(SandboxRequest::new().sdk(21))?;
    assert!(!Arc::ptr_eq(&first, &older));
    assert_eq!(older.config().sdk, 21);
    assert!(!Arc::ptr_eq(
        &first.load_class("com.example.Foo")?,
        &older.load_class("com.example.Foo")?
    ));
    assert!(Arc::ptr_eq(
        &first.load_class("java.lang.String")?,
        &older.load_class("java.lang.String")?
    ));
    assert_eq!(manager.len(), 2);
    Ok(())
}

/// Each request's shadows apply only inside the sandbox built for it.
#[test]
fn test_request_shadows_are_scoped() -> Result<()> {
    let manager = manager()?;
    let plain = manager.sandbox_for(SandboxRequest::new())?;
    let shadowed = manager.sandbox_for(SandboxRequest::new().shadow(shadow_foo("shadowed")?))?;
    assert!(!Arc::ptr_eq(&plain, &shadowed));

    let foo = shadowed.new_instance("com.example.Foo", "()V", vec![])?;
    let name = shadowed.invoke_virtual(&foo, "getName", "()Ljava/lang/String;", vec![])?;
    assert_eq!(name.as_str(), Some("shadowed"));

    let foo = plain.new_instance("com.example.Foo", "()V", vec![])?;
    let name = plain.invoke_virtual(&foo, "getName", "()Ljava/lang/String;", vec![])?;
    assert!(name.is_null());

    manager.clear();
    assert!(manager.is_empty());
    Ok(())
}

/// A later request whose shadow has the same name but a different body gets a
/// sandbox running the new body.
#[test]
fn test_new_shadow_body_is_not_served_from_cache() -> Result<()> {
    let manager = manager()?;
    let first = manager.sandbox_for(SandboxRequest::new().shadow(shadow_foo("first-test")?))?;
    let second = manager.sandbox_for(SandboxRequest::new().shadow(shadow_foo("second-test")?))?;
    assert!(!Arc::ptr_eq(&first, &second));

    let foo = second.new_instance("com.example.Foo", "()V", vec![])?;
    let name = second.invoke_virtual(&foo, "getName", "()Ljava/lang/String;", vec![])?;
    assert_eq!(name.as_str(), Some("second-test"));

    let foo = first.new_instance("com.example.Foo", "()V", vec![])?;
    let name = first.invoke_virtual(&foo, "getName", "()Ljava/lang/String;", vec![])?;
    assert_eq!(name.as_str(), Some("first-test"));
    assert_eq!(manager.len(), 1);
    Ok(())
}

/// Passing the same built shadow again reuses the sandbox.
#[test]
fn test_same_shadow_reuses_sandbox() -> Result<()> {
    let manager = manager()?;
    let shadow = shadow_foo("shared")?;
    let a = manager.sandbox_for(SandboxRequest::new().shadow(Arc::clone(&shadow)))?;
    let b = manager.sandbox_for(SandboxRequest::new().shadow(shadow))?;
    assert!(Arc::ptr_eq(&a, &b));
    Ok(())
}
