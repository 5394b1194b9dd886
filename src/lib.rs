// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'loader/provider.rs' uses mmap to map class files into memory

//! # shadowbox
//!
//! Loads JVM class files into isolated sandboxes, rewrites them on the way in so
//! every method call, constructor and static initializer is routed through a
//! dispatch core, and answers those calls with host-side *shadow* implementations.
//! Test code can then run classes whose real implementations depend on an
//! unavailable platform.
//!
//! ## Features
//!
//! - **Class file model** - Parsing, assembling and serializing Java class files
//! - **Instrumentation** - Direct-method split, constructor split, native stubs,
//!   call-site interception and class name remapping
//! - **Isolation** - One instrumenting loader per sandbox; static state never
//!   crosses sandboxes
//! - **Shadow dispatch** - Most-specific shadow lookup with SDK gating, cached plans
//!   and lazily created shadow instances
//! - **Deterministic clock** - `System.nanoTime` and `currentTimeMillis` only move
//!   when the host advances them
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shadowbox::prelude::*;
//!
//! let shadow = ShadowClass::builder("ShadowFoo", "com.example.Foo")
//!     .method("nativeHash", "()I", |_| Ok(Value::Int(7)))
//!     .build()?;
//! let sandbox = Sandbox::builder()
//!     .instrumentation(
//!         InstrumentationConfiguration::builder()
//!             .add_instrumented_package("com.example.")
//!             .build(),
//!     )
//!     .shadow_map(ShadowMap::builder().add_shadow_class(shadow).build())
//!     .bytes_provider(Arc::new(DirectoryBytesProvider::new("build/classes")))
//!     .build()?;
//!
//! let foo = sandbox.new_instance("com.example.Foo", "()V", vec![])?;
//! assert_eq!(sandbox.invoke_virtual(&foo, "nativeHash", "()I", vec![])?, Value::Int(7));
//! # Ok::<(), shadowbox::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`classfile`] - Class file parsing, building and writing
//! - [`config`] - Which classes a sandbox acquires and instruments
//! - [`instrument`] - The bytecode rewrite
//! - [`loader`] - Class bytes providers and the system and sandbox loaders
//! - [`shadow`] - Shadow classes, shadow maps and shadow instances
//! - [`runtime`] - Interpreter, host class library and the dispatch core
//! - [`sandbox`] - Sandboxes, their settings and their reuse
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Java exceptions thrown inside a sandbox surface as [`Error::Exception`]; every
//! other variant is a framework failure:
//!
//! ```rust,no_run
//! use shadowbox::{Error, Sandbox};
//!
//! let sandbox = Sandbox::builder().build()?;
//! match sandbox.load_class("com.example.Missing") {
//!     Ok(class) => println!("Loaded {}", class.name()),
//!     Err(Error::ClassNotFound(name)) => println!("No bytes for {name}"),
//!     Err(e) => println!("Other error: {e}"),
//! }
//! # Ok::<(), shadowbox::Error>(())
//! ```
//!
//! ## Configuration
//!
//! [`SandboxConfig::from_env`] reads `SHADOWBOX_DUMP_CLASSES_DIRECTORY`,
//! `SHADOWBOX_NATIVE_MODE` and `SHADOWBOX_NATIVE_EXEMPTIONS`. Logging goes through
//! the `log` facade; install any logger to see loader and dispatch activity.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use shadowbox::prelude::*;
///
/// let sandbox = Sandbox::builder().sdk(28).build()?;
/// assert_eq!(sandbox.config().sdk, 28);
/// # Ok::<(), shadowbox::Error>(())
/// ```
pub mod prelude;

/// Java class file model.
///
/// Parsing ([`classfile::ClassFile::parse`]), programmatic construction
/// ([`classfile::builder::ClassBuilder`]), bytecode assembly and serialization.
pub mod classfile;

/// Acquisition and instrumentation rules.
pub mod config;

/// The bytecode rewrite applied to acquired classes.
pub mod instrument;

/// Class loaders and class bytes providers.
pub mod loader;

/// Shadow classes and their registry.
pub mod shadow;

/// Execution of sandboxed code and the dispatch core.
pub mod runtime;

/// Sandboxes, their configuration and their reuse across tests.
pub mod sandbox;

/// `shadowbox` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `shadowbox` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

/// Main entry point: an isolated class namespace with shadow dispatch.
///
/// # Example
///
/// ```rust,no_run
/// use shadowbox::Sandbox;
///
/// let sandbox = Sandbox::builder().build()?;
/// let string = sandbox.load_class("java.lang.String")?;
/// assert_eq!(string.binary_name(), "java.lang.String");
/// # Ok::<(), shadowbox::Error>(())
/// ```
pub use sandbox::{Sandbox, SandboxBuilder, SandboxConfig, SandboxManager, SandboxRequest};
