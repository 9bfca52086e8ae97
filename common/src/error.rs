use thiserror::Error;

use crate::message::NodeId;

/// Errors that stop a node. Expected misses (late replies, unknown message
/// types) are never reported through this type.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Reading the input stream or writing the output stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An input line was not a valid message.
    #[error("malformed message {line:?}: {source}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// An outbound message could not be encoded.
    #[error("failed encoding message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A topology message arrived without a mapping.
    #[error("topology message carried no topology")]
    MissingTopology,

    /// The topology mapping has no neighbor list for this node.
    #[error("topology has no entry for node {0:?}")]
    MissingTopologyEntry(Option<NodeId>),

    /// The writer task went away while messages were still being sent.
    #[error("output channel closed")]
    OutputClosed,

    /// The handler concurrency limiter was closed.
    #[error("handler limiter closed")]
    LimiterClosed(#[from] tokio::sync::AcquireError),

    /// A spawned task panicked or was cancelled.
    #[error("task execution failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
