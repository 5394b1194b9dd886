use thiserror::Error;

use crate::runtime::JavaException;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors fall into a small taxonomy. Framework failures (damaged class files, missing classes,
/// broken configuration) are fatal for the operation that hit them and are never retried.
/// Java exceptions raised by code running inside a sandbox are carried by
/// [`Error::Exception`] and are ordinary outcomes of the code under test: the interpreter
/// routes them through exception tables and only surfaces them to Rust when nothing catches them.
///
/// # Error Categories
///
/// ## Class File Errors
/// - [`Error::Malformed`] - Corrupted or invalid class file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a class file
///
/// ## Class Loading Errors
/// - [`Error::ClassNotFound`] - No bytes could be located for a class
/// - [`Error::Linkage`] - A class or member could not be linked, or emitted bytecode was invalid
///
/// ## Configuration Errors
/// - [`Error::Configuration`] - Inconsistent instrumentation rules or shadow declarations
///
/// ## Runtime Errors
/// - [`Error::Exception`] - A Java exception escaped from sandboxed code
/// - [`Error::RecursionLimit`] - Maximum call depth exceeded while linking
/// - [`Error::LockError`] - Thread synchronization failure
///
/// # Examples
///
/// ```rust,no_run
/// use shadowbox::{Error, Sandbox};
///
/// # fn example(sandbox: &Sandbox) {
/// match sandbox.load_class("com.example.Foo") {
///     Ok(class) => println!("Loaded {}", class.name()),
///     Err(Error::ClassNotFound(name)) => eprintln!("missing class {name}"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed class: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The class file is damaged and could not be parsed or rewritten.
    ///
    /// Includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing a class file.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The bytes for a class could not be located.
    ///
    /// Raised by class loaders when neither the bytes provider nor the parent
    /// loader knows the class. Failures are cached, so asking again for the same
    /// name returns this error without consulting the provider a second time.
    #[error("Class not found - {0}")]
    ClassNotFound(String),

    /// A class or member could not be linked.
    ///
    /// Covers missing methods and fields, invalid bytecode emitted by the
    /// instrumentor, unsupported instructions and circular class hierarchies.
    #[error("Linkage error - {0}")]
    Linkage(String),

    /// Instrumentation rules or shadow declarations are inconsistent.
    #[error("Configuration error - {0}")]
    Configuration(String),

    /// A Java exception was thrown inside the sandbox and not caught.
    ///
    /// The exception keeps its class, message, cause chain and stack trace.
    #[error("{0}")]
    Exception(JavaException),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Recursion limit reached.
    ///
    /// The associated value shows the recursion limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Failed to lock target.
    #[error("Failed to lock target")]
    LockError,
}

impl Error {
    /// Returns the Java exception carried by this error, if any.
    #[must_use]
    pub fn as_exception(&self) -> Option<&JavaException> {
        match self {
            Error::Exception(exception) => Some(exception),
            _ => None,
        }
    }
}

impl From<JavaException> for Error {
    fn from(exception: JavaException) -> Self {
        Error::Exception(exception)
    }
}
