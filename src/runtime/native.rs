//! Handling of calls to former native methods.
//!
//! Instrumented native methods (outside [`NativeCallMode::Legacy`]) call
//! `Dispatch.nativeMethodInvoked`, which asks the [`NativeCallHandler`] whether the
//! call is allowed. Allowed calls return the default value for the return type.
//!
//! # Exemption file format
//!
//! Plain UTF-8 text, one `owningClass#methodName(descriptor)` per line. Blank lines
//! and lines starting with `#` are ignored. Every `$` is written as `^`:
//!
//! ```text
//! # observed native calls
//! android.graphics.Bitmap^Config#nativeToConfig(I)Landroid/graphics/Bitmap^Config;
//! android.os.SystemClock#uptimeMillis()J
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use crossbeam_skiplist::SkipSet;
use log::{debug, info};
use strum::{Display, EnumIter, EnumString};

use crate::{runtime::MethodSignature, Result};

/// What happens when instrumented code calls a former native method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum NativeCallMode {
    /// Native bodies return the default value without consulting the handler.
    #[default]
    Legacy,
    /// Unexempted calls throw; exempted calls return the default value.
    ThrowOnUnexempted,
    /// Every call is recorded as an exemption and returns the default value.
    Log,
    /// Like [`NativeCallMode::Log`]; the recorded set is persisted by
    /// [`NativeCallHandler::write_exemptions`].
    Write,
}

/// Decides the outcome of native method calls and maintains the exemption list.
#[derive(Debug)]
pub struct NativeCallHandler {
    mode: NativeCallMode,
    exemptions_file: Option<PathBuf>,
    exemptions: SkipSet<String>,
}

impl NativeCallHandler {
    /// Creates a handler, reading `exemptions_file` when it exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] when the file exists but cannot be read.
    pub fn new(mode: NativeCallMode, exemptions_file: Option<PathBuf>) -> Result<Self> {
        let exemptions = SkipSet::new();
        if let Some(path) = exemptions_file.as_deref().filter(|p| p.exists()) {
            for line in parse_exemptions(&fs::read_to_string(path)?) {
                exemptions.insert(line);
            }
            debug!(
                "Loaded {} native call exemptions from {}",
                exemptions.len(),
                path.display()
            );
        }
        Ok(NativeCallHandler {
            mode,
            exemptions_file,
            exemptions,
        })
    }

    /// Active mode.
    #[must_use]
    pub fn mode(&self) -> NativeCallMode {
        self.mode
    }

    /// Configured exemption file.
    #[must_use]
    pub fn exemptions_file(&self) -> Option<&Path> {
        self.exemptions_file.as_deref()
    }

    /// Returns `true` if `signature` is on the exemption list.
    #[must_use]
    pub fn is_exempted(&self, signature: &MethodSignature) -> bool {
        self.exemptions.contains(&exemption_line(signature))
    }

    /// Adds a line to the exemption list.
    pub fn add_exemption(&self, line: &str) {
        self.exemptions.insert(line.to_string());
    }

    /// The exemption list, sorted.
    #[must_use]
    pub fn exemptions(&self) -> Vec<String> {
        self.exemptions.iter().map(|e| e.value().clone()).collect()
    }

    /// Handles a call to the native method `signature`.
    ///
    /// Returns `Err` with the message of the exception to throw when the call is not allowed.
    pub fn on_native_call(&self, signature: &MethodSignature) -> std::result::Result<(), String> {
        let line = exemption_line(signature);
        match self.mode {
            NativeCallMode::Legacy => Ok(()),
            NativeCallMode::Log | NativeCallMode::Write => {
                self.exemptions.insert(line);
                Ok(())
            }
            NativeCallMode::ThrowOnUnexempted => {
                if self.exemptions.contains(&line) {
                    return Ok(());
                }
                let path = self
                    .exemptions_file
                    .as_deref()
                    .map_or_else(|| "<unset>".to_string(), |p| p.display().to_string());
                Err(format!(
                    "Unexpected call to native method {}. Add a shadow implementation for it, \
                     or add the line \"{}\" to the exemption list at {}",
                    display_signature(signature),
                    line,
                    path
                ))
            }
        }
    }

    /// Writes the exemption list to the configured file, sorted, one line each.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] when no file is configured and
    /// [`crate::Error::FileError`] when writing fails.
    pub fn write_exemptions(&self) -> Result<()> {
        let Some(path) = self.exemptions_file.as_deref() else {
            return Err(crate::Error::Configuration(
                "no native call exemption file configured".to_string(),
            ));
        };
        let mut text = String::new();
        for entry in &self.exemptions {
            text.push_str(entry.value());
            text.push('\n');
        }
        fs::write(path, text)?;
        info!(
            "Wrote {} native call exemptions to {}",
            self.exemptions.len(),
            path.display()
        );
        Ok(())
    }
}

/// `owningClass#methodName(descriptor)` for `signature`, without `$` escaping.
#[must_use]
pub fn display_signature(signature: &MethodSignature) -> String {
    format!(
        "{}#{}{}",
        signature.binary_class_name(),
        signature.method_name,
        signature.descriptor
    )
}

/// The exemption file line for `signature`, with `$` written as `^`.
#[must_use]
pub fn exemption_line(signature: &MethodSignature) -> String {
    display_signature(signature).replace('$', "^")
}

/// Parses exemption file text into its lines, skipping blanks and comments.
#[must_use]
pub fn parse_exemptions(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn signature(text: &str) -> MethodSignature {
        MethodSignature::parse(text).unwrap()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            NativeCallMode::from_str("throw_on_unexempted").unwrap(),
            NativeCallMode::ThrowOnUnexempted
        );
        assert_eq!(NativeCallMode::from_str("LOG").unwrap(), NativeCallMode::Log);
        assert!(NativeCallMode::from_str("sometimes").is_err());
        assert_eq!(NativeCallMode::Write.to_string(), "write");
    }

    #[test]
    fn test_exemption_line_escapes_dollar() {
        let sig = signature("android/graphics/Bitmap$Config/nativeToConfig(I)Landroid/graphics/Bitmap$Config;");
        assert_eq!(
            exemption_line(&sig),
            "android.graphics.Bitmap^Config#nativeToConfig(I)Landroid/graphics/Bitmap^Config;"
        );
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let lines = parse_exemptions("# header\n\n  a.B#c()V  \n   # indented comment\nd.E#f(I)I\n");
        assert_eq!(lines, vec!["a.B#c()V".to_string(), "d.E#f(I)I".to_string()]);
    }

    #[test]
    fn test_throw_message_names_signature_and_file() {
        let handler = NativeCallHandler::new(
            NativeCallMode::ThrowOnUnexempted,
            Some(PathBuf::from("/tmp/does-not-exist/natives.txt")),
        )
        .unwrap();
        let sig = signature("com/example/Foo/nativeMethod()V");
        let message = handler.on_native_call(&sig).unwrap_err();
        assert!(message.contains("com.example.Foo#nativeMethod()V"));
        assert!(message.contains("/tmp/does-not-exist/natives.txt"));

        handler.add_exemption("com.example.Foo#nativeMethod()V");
        assert!(handler.on_native_call(&sig).is_ok());
    }

    #[test]
    fn test_log_mode_records_calls() {
        let handler = NativeCallHandler::new(NativeCallMode::Log, None).unwrap();
        handler
            .on_native_call(&signature("com/example/Foo$Inner/b()V"))
            .unwrap();
        handler.on_native_call(&signature("com/example/Foo/a()I")).unwrap();
        handler.on_native_call(&signature("com/example/Foo/a()I")).unwrap();
        assert_eq!(
            handler.exemptions(),
            vec![
                "com.example.Foo#a()I".to_string(),
                "com.example.Foo^Inner#b()V".to_string()
            ]
        );
    }
}
