use thiserror::Error;

/// Errors raised by option parsing and option storage
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptionError {
    /// No option with this name exists
    #[error("unknown option '{0}'")]
    Unknown(String),

    /// Text could not be parsed for the option type
    #[error("option '{name}': cannot parse '{value}' as {type_name}")]
    Parse {
        name: String,
        value: String,
        type_name: &'static str,
    },

    /// Value is outside the allowed range
    #[error("option '{name}': value {value} out of range [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: String,
        min: String,
        max: String,
    },

    /// Node value has the wrong format for this option
    #[error("option '{name}': expected {expected}, got {got}")]
    WrongFormat {
        name: String,
        expected: &'static str,
        got: &'static str,
    },

    /// The type does not implement the requested operation
    #[error("option type {type_name} does not support {operation}")]
    Unsupported {
        type_name: &'static str,
        operation: &'static str,
    },

    /// Unknown list operation for `change-list` style edits
    #[error("unknown list action '{0}'")]
    UnknownAction(String),

    /// Profile lookup failed
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    /// Profile application recursed too deeply
    #[error("profile '{0}' includes itself too deeply")]
    ProfileRecursion(String),
}

/// Result type for option operations
pub type Result<T> = std::result::Result<T, OptionError>;
