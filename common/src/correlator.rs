use std::collections::HashMap;

use crate::message::{MessageId, NodeId, Value};

/// A `broadcast` of `value` a dissemination wave sent to `peer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAck {
    pub value: Value,
    pub peer: NodeId,
}

/// Outstanding node-initiated requests, keyed by the `msg_id` they went out with.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<MessageId, PendingAck>,
}

impl Correlator {
    pub fn register(&mut self, msg_id: MessageId, pending: PendingAck) {
        let previous = self.pending.insert(msg_id, pending);
        debug_assert!(previous.is_none(), "msg_id {msg_id} registered twice");
    }

    /// Removes and returns the entry for `in_reply_to`. A second call with the
    /// same id finds nothing, so a duplicated reply is acted on once.
    pub fn resolve(&mut self, in_reply_to: MessageId) -> Option<PendingAck> {
        self.pending.remove(&in_reply_to)
    }

    /// Drops entries whose operation was abandoned.
    pub fn forget<I>(&mut self, msg_ids: I)
    where
        I: IntoIterator<Item = MessageId>,
    {
        for msg_id in msg_ids {
            self.pending.remove(&msg_id);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
