//! Instrumentation rules.
//!
//! [`InstrumentationConfiguration`] answers two questions for the sandbox loader:
//! does the sandbox define a class itself ([`InstrumentationConfiguration::should_acquire`]),
//! and does it rewrite the class on the way in
//! ([`InstrumentationConfiguration::should_instrument`]). It also carries the class name
//! translations and the set of [`MethodRef`]s whose call sites are redirected to the
//! interceptors.

mod instrumentation;
mod method_ref;

pub use instrumentation::{
    ClassPattern, InstrumentationConfiguration, InstrumentationConfigurationBuilder,
    DO_NOT_INSTRUMENT_ANNOTATION, INSTRUMENT_ANNOTATION, INTERNAL_PACKAGE, RUNTIME_DENYLIST,
};
pub use method_ref::MethodRef;
