use thiserror::Error;

/// Why an emit was refused or lost.
#[derive(Error, Debug, Clone)]
pub enum EmitError {
    /// A terminal event was already emitted; nothing else may follow.
    #[error("a terminal event was already emitted for this run")]
    TerminalEvent,

    /// The IPC sink failed earlier; every later emit is refused with the
    /// original cause.
    #[error("the ipc sink failed: {cause}")]
    SinkFailed { cause: String },

    /// The writer task is gone.
    #[error("emit channel closed")]
    ChannelClosed,

    /// The artifact or file payload violates the wire contract.
    #[error("invalid emit payload: {0}")]
    Invalid(String),
}

/// Failure raised by a user script or one of its hooks.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
    pub error_type: Option<String>,
    pub stack: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        ScriptError {
            message: message.into(),
            error_type: None,
            stack: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// The script module could not be loaded. Always a crash outcome, never a
/// script error.
#[derive(Error, Debug)]
pub enum ScriptLoadError {
    #[error("cannot read script {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("script {path:?} failed to compile: {message}")]
    Compile { path: String, message: String },

    #[error("script {path:?} defines no `run` function")]
    MissingEntrypoint { path: String },
}
