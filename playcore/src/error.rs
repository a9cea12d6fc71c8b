use option_store::OptionError;
use thiserror::Error;

use crate::logging::LoggingError;

/// Outcome kinds of a property operation
///
/// Callers treat these differently: an unknown name is a usage error, an
/// unavailable property is skipped silently, an unsupported action is
/// reported.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyError {
    /// No property with this name exists
    #[error("property unknown")]
    Unknown,

    /// The property exists but has no value right now (e.g. nothing loaded)
    #[error("property unavailable")]
    Unavailable,

    /// The property does not implement this action
    #[error("action not supported by property")]
    NotSupported,

    /// The supplied value is not valid for the property
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The action was attempted and failed
    #[error("property operation failed: {0}")]
    Failed(String),
}

impl From<OptionError> for PropertyError {
    fn from(err: OptionError) -> Self {
        match err {
            OptionError::Unknown(_) => PropertyError::Unknown,
            OptionError::Unsupported { .. } => PropertyError::NotSupported,
            OptionError::Parse { .. } | OptionError::OutOfRange { .. } | OptionError::WrongFormat { .. } => {
                PropertyError::InvalidValue(err.to_string())
            }
            other => PropertyError::Failed(other.to_string()),
        }
    }
}

/// Result type for property operations
pub type PropertyResult<T> = std::result::Result<T, PropertyError>;

/// Malformed `${...}` expressions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpandError {
    #[error("unterminated property expansion in '{0}'")]
    Unterminated(String),

    #[error("empty property name in '{0}'")]
    EmptyName(String),
}

/// Errors raised while parsing, validating or running commands
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// The command name does not exist
    #[error("command '{0}' not found")]
    UnknownCommand(String),

    /// The command text could not be tokenized
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("command '{command}': missing argument '{arg}'")]
    MissingArgument { command: String, arg: String },

    #[error("command '{command}': too many arguments (at most {max})")]
    TooManyArguments { command: String, max: usize },

    #[error("command '{command}': invalid argument '{arg}': {reason}")]
    InvalidArgument {
        command: String,
        arg: String,
        reason: String,
    },

    /// Property expansion of a string argument failed
    #[error("property expansion failed: {0}")]
    Expansion(#[from] ExpandError),

    /// A property operation issued by the handler failed
    #[error("property '{name}': {source}")]
    Property {
        name: String,
        #[source]
        source: PropertyError,
    },

    /// The command is reserved for clients
    #[error("{0}")]
    ClientOnly(&'static str),

    /// Worker pool rejected the command
    #[error("worker submission failed: {0}")]
    Pool(#[from] PoolError),

    /// Handler-reported failure
    #[error("{0}")]
    Failed(String),
}

/// Misuse of the hook API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HookError {
    /// No handler with this sequence number belongs to the client
    #[error("invalid hook API usage: no handler {seq} for this client")]
    NotFound { seq: u64 },

    /// The handler exists but is not the one currently running
    #[error("invalid hook API usage: handler {seq} is not active")]
    NotActive { seq: u64 },
}

/// Worker pool submission errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("worker queue is full")]
    QueueFull,

    #[error("worker pool is shut down")]
    ShutDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Errors surfaced by the `Core` facade
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Option(#[from] OptionError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The core was shut down
    #[error("core has been shut down")]
    ShutDown,
}

/// Result type for `Core` operations
pub type Result<T> = std::result::Result<T, CoreError>;
