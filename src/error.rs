//! Error types for hoverlens

use thiserror::Error;

/// Result type for hoverlens operations
pub type Result<T> = std::result::Result<T, Error>;

/// CDP error message for a hit-test that landed outside any node
const NO_NODE_AT_LOCATION: &str = "No node found at given location";

/// Error type for hoverlens
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A command was sent while the debugger was detached
    #[error("Debugger is not attached")]
    NotAttached,

    /// CDP protocol error
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// The target page is destroyed or still loading
    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    /// Frame is not (or no longer) known
    #[error("Frame not found: {0}")]
    FrameNotFound(String),

    /// No usable execution context for a frame
    #[error("No {world} execution context for frame {frame_id}")]
    ContextNotFound {
        frame_id: String,
        world: &'static str,
    },

    /// Node resolution returned no remote object
    #[error("No object handle for backend node {backend_node_id} in context {context_id:?}")]
    NoHandle {
        backend_node_id: i64,
        context_id: Option<i64>,
    },

    /// A page script threw
    #[error("Page script {script} threw: {message}")]
    Script { script: String, message: String },

    /// A page script returned something outside its contract
    #[error("Unexpected payload from {script}: {message}")]
    Payload { script: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error with IO source
    pub fn transport_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a script error
    pub fn script(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script {
            script: script.into(),
            message: message.into(),
        }
    }

    /// Create a payload error
    pub fn payload(script: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Payload {
            script: script.into(),
            message: message.into(),
        }
    }

    /// Check if this is the hit-test miss reported when the pointer is
    /// outside the page
    pub fn is_no_node_at_location(&self) -> bool {
        match self {
            Error::Cdp { message, .. } => message.contains(NO_NODE_AT_LOCATION),
            _ => false,
        }
    }

    /// Check if this error came from the transport rather than the page
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::NotAttached)
    }
}
