//! Fixtures shared by the unit tests.

mod classes;

use std::sync::{Arc, Weak};

pub use classes::*;

use crate::{
    config::InstrumentationConfiguration,
    loader::{ClassLoader, SystemClassLoader},
    runtime::{ClassDefinition, RuntimeClass},
};

// Helper function to create a class without members or loader
pub fn plain_class(name: &str) -> Arc<RuntimeClass> {
    let loader: Weak<dyn ClassLoader> = Weak::<SystemClassLoader>::new();
    RuntimeClass::new(ClassDefinition::new(name, loader))
}

// Helper function to create rules instrumenting one package
pub fn instrumenting(package_prefix: &str) -> InstrumentationConfiguration {
    InstrumentationConfiguration::builder()
        .add_instrumented_package(package_prefix)
        .build()
}
