//! Validation errors for job descriptors.

use thiserror::Error;

/// An error that occurs while parsing or validating a job descriptor.
///
/// Every variant is raised before any cluster resource is reserved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A line of a descriptor could not be read as a directive.
    #[error("line {line}: expected a `key=value` or `--key value` directive, found `{text}`")]
    MalformedDirective {
        /// The one-based line number.
        line: usize,
        /// The text of the line.
        text: String,
    },

    /// A directive key is not in the recognized set.
    #[error("unknown directive `{key}`")]
    UnknownDirective {
        /// The key as written.
        key: String,
    },

    /// A directive was specified more than once.
    #[error("directive `{key}` is specified more than once")]
    DuplicateDirective {
        /// The canonical name of the directive.
        key: &'static str,
    },

    /// A mandatory directive is missing.
    #[error("missing required directive `{0}`")]
    MissingRequiredDirective(&'static str),

    /// A directive value failed to parse.
    #[error("directive `{directive}` has invalid value `{value}`: {reason}")]
    MalformedValue {
        /// The canonical name of the directive.
        directive: &'static str,
        /// The value as written.
        value: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// The request is well-formed but cannot be satisfied by the cluster.
    #[error("unsatisfiable request: {0}")]
    UnsatisfiableRequest(String),
}

/// A [`Result`](std::result::Result) with a [`ValidationError`].
pub type Result<T> = std::result::Result<T, ValidationError>;
