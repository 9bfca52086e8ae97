use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::broadcast::Waves;
use crate::config::NodeConfig;
use crate::correlator::{Correlator, PendingAck};
use crate::error::NodeError;
use crate::message::{Message, MessageBody, MessageId, MessagePayload, NodeId, Value};
use crate::store::ValueStore;
use crate::topology::Topology;

/// Everything the handlers share. Only ever touched through `Node::state`,
/// and never held across an `.await`.
#[derive(Debug, Default)]
pub(crate) struct NodeState {
    pub(crate) self_id: Option<NodeId>,
    pub(crate) node_ids: Vec<NodeId>,
    curr_msg_id: MessageId,
    pub(crate) topology: Topology,
    pub(crate) store: ValueStore,
    pub(crate) correlator: Correlator,
    pub(crate) waves: Waves,
    gossip_started: bool,
}

impl NodeState {
    fn next_msg_id(&mut self) -> MessageId {
        self.curr_msg_id = self.curr_msg_id.checked_add(1).expect("ids exhausted");
        self.curr_msg_id
    }
}

/// A single cluster participant. Handlers run concurrently against one
/// shared instance; every outbound message goes through the same channel to
/// the writer task.
pub struct Node {
    state: Mutex<NodeState>,
    tx: UnboundedSender<Message>,
    pub(crate) config: NodeConfig,
    shutdown_tx: watch::Sender<bool>,
    pub(crate) shutdown: watch::Receiver<bool>,
    background: Mutex<JoinSet<()>>,
}

impl Node {
    /// Creates an uninitialized node and the receiving end of its outbound
    /// message stream.
    pub fn new(config: NodeConfig) -> (Arc<Self>, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = watch::channel(false);
        let node = Self {
            state: Mutex::new(NodeState::default()),
            tx,
            config,
            shutdown_tx,
            shutdown,
            background: Mutex::new(JoinSet::new()),
        };
        (Arc::new(node), rx)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().expect("poisoned lock")
    }

    pub fn id(&self) -> Option<NodeId> {
        self.state().self_id.clone()
    }

    pub fn neighbors(&self) -> Vec<NodeId> {
        self.state().topology.neighbors().iter().cloned().collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.state().store.snapshot()
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_replies(&self) -> usize {
        self.state().correlator.len()
    }

    /// Processes one inbound message. Replies go to the correlator, everything
    /// else is dispatched on its type.
    pub fn handle(self: &Arc<Self>, message: Message) -> Result<(), NodeError> {
        if let Some(in_reply_to) = message.body.in_reply_to {
            let pending = self.state().correlator.resolve(in_reply_to);
            match pending {
                Some(PendingAck { value, peer }) => self.acknowledge(value, &peer),
                None => debug!(
                    in_reply_to,
                    src = %message.src,
                    kind = message.body.payload.kind(),
                    "dropping reply with no pending request"
                ),
            }
            return Ok(());
        }

        debug!(src = %message.src, kind = message.body.payload.kind(), "handling message");
        match &message.body.payload {
            MessagePayload::Init { node_id, node_ids } => {
                self.on_init(node_id.clone(), node_ids.clone());
                self.reply(&message, MessagePayload::InitOk)
            }
            MessagePayload::Echo { echo } => {
                let echo = echo.clone();
                self.reply(&message, MessagePayload::EchoOk { echo })
            }
            MessagePayload::Generate => self.reply_with(&message, |state, msg_id| {
                // Node ids are unique in the cluster and msg ids are unique
                // per node, so the pair needs no coordination.
                let node_id = state.self_id.as_deref().unwrap_or(&message.dest);
                MessagePayload::GenerateOk {
                    id: format!("id-{node_id}-{msg_id}"),
                }
            }),
            MessagePayload::Broadcast { message: value } => self.on_broadcast(&message, *value),
            MessagePayload::Read => self.reply_with(&message, |state, _| MessagePayload::ReadOk {
                messages: state.store.snapshot(),
            }),
            MessagePayload::Topology { topology } => {
                {
                    let mut state = self.state();
                    let state = &mut *state;
                    state
                        .topology
                        .apply(state.self_id.as_ref(), topology.clone())?;
                    info!(neighbors = ?state.topology.neighbors(), "topology applied");
                }
                self.reply(&message, MessagePayload::TopologyOk)
            }
            MessagePayload::Gossip { messages } => {
                self.on_gossip(&message.src, messages.iter().copied());
                Ok(())
            }
            MessagePayload::InitOk
            | MessagePayload::EchoOk { .. }
            | MessagePayload::GenerateOk { .. }
            | MessagePayload::BroadcastOk
            | MessagePayload::ReadOk { .. }
            | MessagePayload::TopologyOk
            | MessagePayload::Unknown => {
                debug!(kind = message.body.payload.kind(), "ignoring message");
                Ok(())
            }
        }
    }

    fn on_init(self: &Arc<Self>, node_id: NodeId, node_ids: Vec<NodeId>) {
        let start_gossip = {
            let mut state = self.state();
            if let Some(previous) = state.self_id.as_ref().filter(|id| **id != node_id) {
                warn!(%previous, %node_id, "node re-initialized with a different id");
            }
            info!(%node_id, cluster = node_ids.len(), "node initialized");
            state.self_id = Some(node_id);
            state.node_ids = node_ids;

            let start = self.config.gossip.is_some() && !state.gossip_started;
            state.gossip_started |= start;
            start
        };

        if start_gossip {
            self.spawn_background(crate::broadcast::gossip(Arc::clone(self)));
        }
    }

    pub(crate) fn reply(&self, request: &Message, payload: MessagePayload) -> Result<(), NodeError> {
        self.reply_with(request, |_, _| payload)
    }

    /// Answers `request` with a payload built while the state is locked, from
    /// the state and the msg id the reply is about to carry.
    pub(crate) fn reply_with<F>(&self, request: &Message, build: F) -> Result<(), NodeError>
    where
        F: FnOnce(&NodeState, MessageId) -> MessagePayload,
    {
        let mut state = self.state();
        let msg_id = state.next_msg_id();
        let payload = build(&*state, msg_id);
        let src = state
            .self_id
            .clone()
            .unwrap_or_else(|| request.dest.clone());

        self.transmit(Message {
            src,
            dest: request.src.clone(),
            body: MessageBody {
                msg_id: Some(msg_id),
                in_reply_to: request.body.msg_id,
                payload,
            },
        })
    }

    /// Sends a message that expects no reply.
    pub(crate) fn send(
        &self,
        state: &mut NodeState,
        dest: NodeId,
        payload: MessagePayload,
    ) -> Result<MessageId, NodeError> {
        let msg_id = state.next_msg_id();
        self.transmit(Message {
            src: state.self_id.clone().unwrap_or_default(),
            dest,
            body: MessageBody {
                msg_id: Some(msg_id),
                in_reply_to: None,
                payload,
            },
        })?;
        Ok(msg_id)
    }

    /// Sends a request with `pending` registered before the message leaves,
    /// so even an immediate reply finds it.
    pub(crate) fn send_request(
        &self,
        state: &mut NodeState,
        dest: NodeId,
        payload: MessagePayload,
        pending: PendingAck,
    ) -> Result<MessageId, NodeError> {
        let msg_id = state.next_msg_id();
        state.correlator.register(msg_id, pending);
        let sent = self.transmit(Message {
            src: state.self_id.clone().unwrap_or_default(),
            dest,
            body: MessageBody {
                msg_id: Some(msg_id),
                in_reply_to: None,
                payload,
            },
        });
        if sent.is_err() {
            state.correlator.forget([msg_id]);
        }
        sent.map(|_| msg_id)
    }

    // Called with the state locked: queueing under the lock keeps msg ids
    // increasing in output order.
    fn transmit(&self, message: Message) -> Result<(), NodeError> {
        self.tx.send(message).map_err(|_| NodeError::OutputClosed)
    }

    pub(crate) fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut background = self.background.lock().expect("poisoned lock");
        while background.try_join_next().is_some() {}
        background.spawn(task);
    }

    /// Stops dissemination waves and gossip at their next wait point and
    /// waits for them to wind down.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let mut background = std::mem::take(&mut *self.background.lock().expect("poisoned lock"));
        while let Some(joined) = background.join_next().await {
            if let Err(err) = joined {
                warn!(%err, "background task failed");
            }
        }
    }
}

/// Resolves once shutdown has been requested.
pub(crate) async fn stopped(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(src: &str, msg_id: MessageId, payload: MessagePayload) -> Message {
        Message {
            src: src.to_string(),
            dest: "n1".to_string(),
            body: MessageBody {
                msg_id: Some(msg_id),
                in_reply_to: None,
                payload,
            },
        }
    }

    fn init(node: &Arc<Node>) {
        node.handle(request(
            "c1",
            1,
            MessagePayload::Init {
                node_id: "n1".into(),
                node_ids: vec!["n1".into(), "n2".into(), "n3".into()],
            },
        ))
        .unwrap();
    }

    #[tokio::test]
    async fn init_replies_and_sets_id() {
        let (node, mut rx) = Node::new(NodeConfig::default());
        init(&node);

        let reply = rx.recv().await.unwrap();
        assert_eq!(node.id().as_deref(), Some("n1"));
        assert_eq!(reply.src, "n1");
        assert_eq!(reply.dest, "c1");
        assert_eq!(reply.body.in_reply_to, Some(1));
        assert_eq!(reply.body.payload, MessagePayload::InitOk);
    }

    #[tokio::test]
    async fn echo_is_verbatim() {
        let (node, mut rx) = Node::new(NodeConfig::default());
        init(&node);
        rx.recv().await.unwrap();

        let echo = json!({"nested": [1, "two", null]});
        node.handle(request("c1", 2, MessagePayload::Echo { echo: echo.clone() }))
            .unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.body.in_reply_to, Some(2));
        assert_eq!(reply.body.payload, MessagePayload::EchoOk { echo });
    }

    #[tokio::test]
    async fn concurrent_generate_ids_are_distinct() {
        let (node, mut rx) = Node::new(NodeConfig::default());
        init(&node);
        rx.recv().await.unwrap();

        let mut tasks = JoinSet::new();
        for msg_id in 0..64 {
            let node = Arc::clone(&node);
            tasks.spawn(async move { node.handle(request("c1", msg_id, MessagePayload::Generate)) });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        let mut ids = std::collections::HashSet::new();
        for _ in 0..64 {
            match rx.recv().await.unwrap().body.payload {
                MessagePayload::GenerateOk { id } => {
                    assert!(id.starts_with("id-n1-"), "{id}");
                    assert!(ids.insert(id));
                }
                other => panic!("unexpected payload {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn msg_ids_increase_in_send_order() {
        let (node, mut rx) = Node::new(NodeConfig::default());
        init(&node);
        for msg_id in 2..20 {
            node.handle(request("c1", msg_id, MessagePayload::Read)).unwrap();
        }

        let mut last = 0;
        for _ in 1..20 {
            let msg_id = rx.recv().await.unwrap().body.msg_id.unwrap();
            assert!(msg_id > last);
            last = msg_id;
        }
    }

    #[tokio::test]
    async fn topology_without_own_entry_is_fatal() {
        let (node, mut rx) = Node::new(NodeConfig::default());
        init(&node);
        rx.recv().await.unwrap();

        let topology = [("n2".to_string(), vec!["n1".to_string()])].into();
        let err = node
            .handle(request(
                "c1",
                5,
                MessagePayload::Topology {
                    topology: Some(topology),
                },
            ))
            .unwrap_err();

        assert!(matches!(err, NodeError::MissingTopologyEntry(Some(id)) if id == "n1"));
        assert!(node.neighbors().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stray_reply_and_unknown_type_are_ignored() {
        let (node, mut rx) = Node::new(NodeConfig::default());
        init(&node);
        rx.recv().await.unwrap();

        let mut stray = request("n2", 9, MessagePayload::BroadcastOk);
        stray.body.in_reply_to = Some(1234);
        node.handle(stray).unwrap();
        node.handle(request("c1", 10, MessagePayload::Unknown)).unwrap();

        assert!(rx.try_recv().is_err());
    }
}
