//! Shadow classes and their bindings.
//!
//! A shadow substitutes behavior for a real class. Shadows are explicit registry
//! entries built in Rust with [`ShadowClass::builder`]; a [`ShadowMap`] binds them to
//! real classes. When instrumented code calls a method of a shadowed class, the
//! dispatch core finds the matching [`ImplementationMethod`] and runs it with a
//! [`ShadowCall`].
//!
//! Every real instance of a shadowed class gets one [`ShadowInstance`] holding the
//! per-instance state of its shadows. The pairing lives in [`ShadowBindings`], a side
//! table keyed by object identity whose entries disappear with the real object.

mod call;
mod class;
mod instance;
mod map;

pub use call::ShadowCall;
pub use class::{
    ImplementationMethod, SdkRange, ShadowClass, ShadowClassBuilder, ShadowFlags, ShadowFn,
    ShadowId, StateFactory,
};
pub use instance::{ShadowBindings, ShadowInstance};
pub use map::{ShadowInfo, ShadowMap, ShadowMapBuilder, ShadowProvider};
