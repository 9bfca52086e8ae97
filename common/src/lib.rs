//! A single node of a Maelstrom-style cluster: newline-delimited JSON in,
//! newline-delimited JSON out.
//!
//! [`runtime::Runtime`] reads messages and hands each to its own task;
//! [`node::Node`] owns all shared state and answers `init`, `echo`,
//! `generate`, `broadcast`, `read` and `topology`, and spreads newly seen
//! broadcast values to its neighbors until they acknowledge them.

pub mod broadcast;
pub mod config;
pub mod correlator;
pub mod error;
pub mod message;
pub mod node;
pub mod runtime;
pub mod store;
pub mod topology;

pub use config::{GossipConfig, NodeConfig};
pub use error::NodeError;
pub use message::{Message, MessageBody, MessageId, MessagePayload, NodeId, Value};
pub use node::Node;
pub use runtime::Runtime;
