//! Error types for the packed calling convention
//!
//! Recoverable failures (tag mismatches, conversions) are returned to the
//! caller of the accessor. Registry and boundary wiring defects get their
//! own types so they can be escalated instead of retried.

use std::path::PathBuf;

use thiserror::Error;

use crate::ffi::Status;
use crate::packed::{RawTag, TypeTag};

/// Errors raised while converting or invoking packed values
#[derive(Debug, Error)]
pub enum PackedError {
    /// Accessor invoked with a tag different from the stored one
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: TypeTag, found: TypeTag },

    /// Tag code with no mapping on this side of the boundary
    #[error("Unsupported conversion for tag code {tag}")]
    UnsupportedConversion { tag: RawTag },

    /// Integer doesn't fit the requested width
    #[error("Integer overflow: value {value} doesn't fit in {target}")]
    IntegerOverflow { value: i128, target: &'static str },

    /// Finite float too large for the requested width
    #[error("Float out of range: value {value} doesn't fit in {target}")]
    FloatOutOfRange { value: f64, target: &'static str },

    /// Argument index past the end of the argument list
    #[error("Argument index {index} out of range for {len} arguments")]
    ArgumentOutOfRange { index: usize, len: usize },

    /// Null pointer where a referent was expected
    #[error("Unexpected null pointer for {tag} value")]
    NullPointer { tag: TypeTag },

    /// Invalid UTF-8 in a string crossing the boundary
    #[error("Invalid UTF-8 in string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Native string can't be NUL-terminated
    #[error("String contains an interior NUL byte at position {position}")]
    InteriorNul { position: usize },

    /// Callable registered but never given a body
    #[error("Packed function '{name}' has no body")]
    MissingBody { name: String },

    /// Element of a sequence failed to convert
    #[error("Sequence element {index} conversion failed: {source}")]
    SequenceElement {
        index: usize,
        #[source]
        source: Box<PackedError>,
    },

    /// Extension tag without a registered descriptor
    #[error("Extension tag {tag} is not registered")]
    ExtensionNotRegistered { tag: RawTag },

    /// Failure raised by a callable body
    #[error("Call failed: {message}")]
    Call { message: String },
}

impl PackedError {
    /// Create a type mismatch error
    pub fn type_mismatch(expected: TypeTag, found: TypeTag) -> Self {
        Self::TypeMismatch { expected, found }
    }

    /// Create a sequence element error
    pub fn sequence_element(index: usize, source: PackedError) -> Self {
        Self::SequenceElement {
            index,
            source: Box::new(source),
        }
    }

    /// Create a free-form call failure
    pub fn call(message: impl Into<String>) -> Self {
        Self::Call {
            message: message.into(),
        }
    }

    /// Innermost error, looking through sequence element wrappers
    pub fn root_cause(&self) -> &PackedError {
        match self {
            Self::SequenceElement { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::ffi::NulError> for PackedError {
    fn from(err: std::ffi::NulError) -> Self {
        Self::InteriorNul {
            position: err.nul_position(),
        }
    }
}

/// Registry wiring errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Name registered twice for the same stored type
    #[error("Global registry {registry} already has an entry named '{name}'")]
    Duplicate { registry: &'static str, name: String },

    /// Extension tag collides with the built-in range
    #[error("Extension tag {tag} is below the extension range (starts at {start})")]
    ExtensionTagOutOfRange { tag: RawTag, start: RawTag },

    /// Extension tag already claimed by another type
    #[error("Extension tag {tag} is already registered as '{existing}'")]
    DuplicateExtension { tag: RawTag, existing: String },
}

/// Errors seen by a caller on the far side of the ABI boundary
#[derive(Debug, Error)]
pub enum AbiError {
    /// Value union layout differs between the two modules
    #[error(
        "Value layout mismatch: expected {expected_size} bytes aligned to {expected_align}, \
         module reports {found_size} bytes aligned to {found_align}"
    )]
    LayoutMismatch {
        expected_size: usize,
        expected_align: usize,
        found_size: usize,
        found_align: usize,
    },

    /// Entry point returned a non-zero status
    #[error("Boundary call failed with {status:?}: {message}")]
    Status { status: Status, message: String },

    /// Conversion failure on the caller side
    #[error(transparent)]
    Packed(#[from] PackedError),

    /// Module could not be loaded
    #[error(transparent)]
    Load(#[from] crate::client::LoadError),

    /// Entry point missing from the module
    #[error(transparent)]
    Symbol(#[from] crate::client::SymbolError),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for packed value operations
pub type PackedResult<T> = Result<T, PackedError>;

/// Result type for boundary callers
pub type AbiResult<T> = Result<T, AbiError>;
