use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type MessageId = u64;
pub type NodeId = String;
pub type Value = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<P = MessagePayload> {
    pub src: NodeId,
    pub dest: NodeId,
    pub body: MessageBody<P>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody<P = MessagePayload> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
    #[serde(flatten)]
    pub payload: P,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum MessagePayload {
    Init {
        node_id: NodeId,
        node_ids: Vec<NodeId>,
    },
    InitOk,
    Echo {
        echo: serde_json::Value,
    },
    EchoOk {
        echo: serde_json::Value,
    },
    Generate,
    GenerateOk {
        id: String,
    },
    Broadcast {
        message: Value,
    },
    BroadcastOk,
    Read,
    ReadOk {
        messages: Vec<Value>,
    },
    Topology {
        #[serde(default)]
        topology: Option<HashMap<NodeId, Vec<NodeId>>>,
    },
    TopologyOk,
    Gossip {
        messages: Vec<Value>,
    },
    /// Any `type` this node does not know about.
    #[serde(other)]
    Unknown,
}

impl MessagePayload {
    /// The wire name of this payload, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::InitOk => "init_ok",
            Self::Echo { .. } => "echo",
            Self::EchoOk { .. } => "echo_ok",
            Self::Generate => "generate",
            Self::GenerateOk { .. } => "generate_ok",
            Self::Broadcast { .. } => "broadcast",
            Self::BroadcastOk => "broadcast_ok",
            Self::Read => "read",
            Self::ReadOk { .. } => "read_ok",
            Self::Topology { .. } => "topology",
            Self::TopologyOk => "topology_ok",
            Self::Gossip { .. } => "gossip",
            Self::Unknown => "unknown",
        }
    }
}

impl<P> Message<P> {
    /// Whether this message answers an earlier request.
    pub fn is_reply(&self) -> bool {
        self.body.in_reply_to.is_some()
    }
}
