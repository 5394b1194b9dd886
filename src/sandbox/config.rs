use std::{env, path::PathBuf, str::FromStr};

use crate::{
    runtime::{LooseSignaturePolicy, NativeCallMode, UnshadowedBehavior, DEFAULT_PLAN_CACHE_CAPACITY},
    Error, Result,
};

/// Environment variable naming the instrumented class dump directory.
pub const DUMP_CLASSES_DIRECTORY_VAR: &str = "SHADOWBOX_DUMP_CLASSES_DIRECTORY";

/// Environment variable selecting the [`NativeCallMode`].
pub const NATIVE_MODE_VAR: &str = "SHADOWBOX_NATIVE_MODE";

/// Environment variable naming the native call exemption file.
pub const NATIVE_EXEMPTIONS_VAR: &str = "SHADOWBOX_NATIVE_EXEMPTIONS";

/// The SDK level sandboxes run at unless configured otherwise.
pub const DEFAULT_SDK: u32 = 34;

/// Native call handling.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NativeCallConfig {
    /// What former native methods do when called.
    pub mode: NativeCallMode,
    /// Exemption list read at sandbox creation and written by
    /// [`NativeCallHandler::write_exemptions`](crate::runtime::NativeCallHandler::write_exemptions).
    pub exemptions_file: Option<PathBuf>,
}

/// Settings of a [`Sandbox`](crate::Sandbox).
///
/// # Default Values
///
/// | Setting | Default |
/// |---------|---------|
/// | `sdk` | 34 |
/// | `dump_classes_directory` | none |
/// | `native_calls.mode` | `legacy` |
/// | `unshadowed_behavior` | `do_nothing` |
/// | `loose_signatures` | `allow` |
/// | `plan_cache_capacity` | 500 |
/// | `max_call_depth` | 512 |
///
/// # Presets
///
/// - [`strict()`](Self::strict) - Unexempted native calls throw, unshadowed methods run
///   their real code
///
/// # Example
///
/// ```rust
/// use shadowbox::{SandboxConfig, runtime::UnshadowedBehavior};
///
/// let config = SandboxConfig {
///     sdk: 28,
///     unshadowed_behavior: UnshadowedBehavior::CallRealCode,
///     ..SandboxConfig::default()
/// };
/// assert_eq!(config.plan_cache_capacity, 500);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SandboxConfig {
    /// Active SDK level; gates shadow classes and implementation methods.
    pub sdk: u32,
    /// Where instrumented class files are written for inspection.
    pub dump_classes_directory: Option<PathBuf>,
    /// Native call handling.
    pub native_calls: NativeCallConfig,
    /// Behavior of methods of instrumented classes without a shadow.
    pub unshadowed_behavior: UnshadowedBehavior,
    /// Whether loose shadow signatures are honored.
    pub loose_signatures: LooseSignaturePolicy,
    /// Maximum number of dispatch plans cached per sandbox.
    pub plan_cache_capacity: usize,
    /// Call depth at which `java.lang.StackOverflowError` is thrown.
    pub max_call_depth: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            sdk: DEFAULT_SDK,
            dump_classes_directory: None,
            native_calls: NativeCallConfig::default(),
            unshadowed_behavior: UnshadowedBehavior::default(),
            loose_signatures: LooseSignaturePolicy::default(),
            plan_cache_capacity: DEFAULT_PLAN_CACHE_CAPACITY,
            max_call_depth: 512,
        }
    }
}

impl SandboxConfig {
    /// Creates a configuration for catching unintended native calls.
    ///
    /// # Settings
    ///
    /// - **Native calls**: throw unless exempted
    /// - **Unshadowed methods**: run their real code
    #[must_use]
    pub fn strict() -> Self {
        Self {
            native_calls: NativeCallConfig {
                mode: NativeCallMode::ThrowOnUnexempted,
                exemptions_file: None,
            },
            unshadowed_behavior: UnshadowedBehavior::CallRealCode,
            ..Self::default()
        }
    }

    /// The default configuration with the `SHADOWBOX_*` environment variables applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `SHADOWBOX_NATIVE_MODE` names no mode.
    pub fn from_env() -> Result<Self> {
        Self::default().with_vars(|name| env::var(name).ok())
    }

    /// Applies settings from a variable lookup, as [`SandboxConfig::from_env`] does
    /// with the process environment. Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the native mode variable names no mode.
    pub fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(directory) = lookup(DUMP_CLASSES_DIRECTORY_VAR) {
            self.dump_classes_directory = Some(PathBuf::from(directory));
        }
        if let Some(mode) = lookup(NATIVE_MODE_VAR) {
            self.native_calls.mode = NativeCallMode::from_str(mode.trim()).map_err(|_| {
                Error::Configuration(format!("{NATIVE_MODE_VAR}: unknown native call mode '{mode}'"))
            })?;
        }
        if let Some(file) = lookup(NATIVE_EXEMPTIONS_VAR) {
            self.native_calls.exemptions_file = Some(PathBuf::from(file));
        }
        Ok(self)
    }

    /// Sets the SDK level.
    #[must_use]
    pub fn with_sdk(mut self, sdk: u32) -> Self {
        self.sdk = sdk;
        self
    }

    /// Sets the call depth limit.
    #[must_use]
    pub fn with_max_call_depth(mut self, max: usize) -> Self {
        self.max_call_depth = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_vars_override_defaults() {
        let vars: HashMap<&str, &str> = [
            (DUMP_CLASSES_DIRECTORY_VAR, "/tmp/dump"),
            (NATIVE_MODE_VAR, "THROW_ON_UNEXEMPTED"),
            (NATIVE_EXEMPTIONS_VAR, "/tmp/exemptions.txt"),
        ]
        .into_iter()
        .collect();
        let config = SandboxConfig::default()
            .with_vars(|name| vars.get(name).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.dump_classes_directory, Some(PathBuf::from("/tmp/dump")));
        assert_eq!(config.native_calls.mode, NativeCallMode::ThrowOnUnexempted);
        assert_eq!(
            config.native_calls.exemptions_file,
            Some(PathBuf::from("/tmp/exemptions.txt"))
        );
    }

    #[test]
    fn test_empty_and_invalid_vars() {
        let config = SandboxConfig::default()
            .with_vars(|_| Some(String::new()))
            .unwrap();
        assert_eq!(config, SandboxConfig::default());

        let error = SandboxConfig::default()
            .with_vars(|name| (name == NATIVE_MODE_VAR).then(|| "loud".to_string()))
            .unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
    }
}
