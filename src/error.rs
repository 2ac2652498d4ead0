use thiserror::Error;

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

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Compiler-facing conditions such as option conflicts or friend mismatches are not errors in
/// this sense; they are reported through [`crate::metadata::diagnostics::Diagnostics`] so that
/// analysis can continue. This enum covers the operational failures: malformed key blobs or
/// images, I/O, cryptographic backend failures, and an aborted emit.
///
/// # Error Categories
///
/// ## Binary Parsing Errors
/// - [`Error::Malformed`] - Corrupted key blob, image or attribute blob
/// - [`Error::OutOfBounds`] - Attempted to read or write beyond a buffer
/// - [`Error::NotSupported`] - Image lacks a CLI header or uses an unsupported layout
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from goblin crate
///
/// ## Key Material and Signing Errors
/// - [`Error::KeyFile`] - A key file could not be found or decoded
/// - [`Error::KeyContainer`] - A key container could not be opened
/// - [`Error::Crypto`] - The signing backend failed
/// - [`Error::SignButNoPrivateKey`] - Real signing requested with only a public key
/// - [`Error::InvalidSignaturePublicKey`] - Counter-signature key material is unusable
///
/// ## Emit Errors
/// - [`Error::Cancelled`] - Emit was cancelled before output was committed
/// - [`Error::EmitFailed`] - Emit was refused because of earlier errors
///
/// # Examples
///
/// ```rust,no_run
/// use dotsign::{Error, signing::keys::snk::KeyBlob};
///
/// match KeyBlob::parse(&[1, 2, 3, 4]) {
///     Ok(blob) => println!("{} bit key", blob.bit_len()),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed key: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Binary parsing errors
    /// The input is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    ///
    /// Raised for PE images without a CLI runtime header, or for layouts this crate
    /// cannot sign.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    // Key material
    /// A key file could not be located or decoded.
    ///
    /// The `reason` text is surfaced verbatim in the public-key-file diagnostic.
    #[error("Error reading key file '{path}' -- {reason}")]
    KeyFile {
        /// The key file path as configured
        path: String,
        /// Human readable cause
        reason: String,
    },

    /// A key container could not be opened.
    ///
    /// The `reason` text comes from the platform key store capability.
    #[error("Error reading key container '{name}' -- {reason}")]
    KeyContainer {
        /// The container name as configured
        name: String,
        /// Human readable cause reported by the key store
        reason: String,
    },

    /// The signing backend failed to produce a signature.
    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    /// Real signing was requested but the key source only yielded a public key.
    #[error("Key file '{0}' is missing the private key needed for signing")]
    SignButNoPrivateKey(String),

    /// The counter-signature public key or blob given through
    /// `AssemblySignatureKeyAttribute` is unusable.
    #[error("invalid signature public key")]
    InvalidSignaturePublicKey,

    // Emit
    /// Emit was cancelled before any output bytes were committed.
    #[error("Emit was cancelled")]
    Cancelled,

    /// Emit refused to produce an image.
    #[error("Emit failed: {0}")]
    EmitFailed(String),
}
