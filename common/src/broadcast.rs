//! Value dissemination.
//!
//! A value seen for the first time gets a wave: every neighbor except the
//! sender is sent `broadcast` each round until it acknowledges, then the wave
//! ends. Optional gossip periodically pushes the whole value set to random
//! cluster nodes as a backstop.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::correlator::PendingAck;
use crate::error::NodeError;
use crate::message::{Message, MessageId, MessagePayload, NodeId, Value};
use crate::node::{stopped, Node};

/// Dissemination waves that have not finished yet, one per value.
#[derive(Debug, Default)]
pub(crate) struct Waves {
    active: HashMap<Value, Wave>,
}

#[derive(Debug)]
struct Wave {
    remaining: BTreeSet<NodeId>,
    /// The latest `broadcast` sent to each peer. Earlier rounds are
    /// superseded and no longer awaited.
    sent: HashMap<NodeId, MessageId>,
}

impl Waves {
    fn start(&mut self, value: Value, targets: BTreeSet<NodeId>) {
        self.active.insert(
            value,
            Wave {
                remaining: targets,
                sent: HashMap::new(),
            },
        );
    }

    fn remaining(&self, value: Value) -> Vec<NodeId> {
        self.active
            .get(&value)
            .map(|wave| wave.remaining.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Records the round just sent to `peer` and returns the one it replaces.
    fn record(&mut self, value: Value, peer: &str, msg_id: MessageId) -> Option<MessageId> {
        let wave = self.active.get_mut(&value)?;
        wave.sent.insert(peer.to_string(), msg_id)
    }

    fn acknowledge(&mut self, value: Value, peer: &str) -> bool {
        self.active
            .get_mut(&value)
            .is_some_and(|wave| wave.remaining.remove(peer))
    }

    fn finish(&mut self, value: Value) -> Vec<MessageId> {
        self.active
            .remove(&value)
            .map(|wave| wave.sent.into_values().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }
}

enum Outcome {
    Done,
    Abandoned,
}

impl Node {
    pub(crate) fn on_broadcast(
        self: &Arc<Self>,
        request: &Message,
        value: Value,
    ) -> Result<(), NodeError> {
        let fresh = {
            let mut state = self.state();
            let fresh = state.store.insert(value);
            if fresh {
                let targets = state.topology.targets_except(&request.src);
                state.waves.start(value, targets);
            }
            fresh
        };

        self.reply(request, MessagePayload::BroadcastOk)?;

        if fresh {
            debug!(value, src = %request.src, "starting dissemination wave");
            self.spawn_background(disseminate(Arc::clone(self), value));
        }
        Ok(())
    }

    pub(crate) fn acknowledge(&self, value: Value, peer: &str) {
        if self.state().waves.acknowledge(value, peer) {
            debug!(value, peer, "broadcast acknowledged");
        }
    }

    pub(crate) fn on_gossip<I>(&self, src: &str, values: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let fresh = self.state().store.merge(values);
        if !fresh.is_empty() {
            debug!(src, count = fresh.len(), "merged gossiped values");
        }
    }

    /// Sends `broadcast` to every peer that has not acknowledged `value` yet.
    /// Returns how many were sent; zero means the wave is complete. Only the
    /// newest request per peer stays pending, so the correlator holds at most
    /// one entry per peer and wave.
    fn send_round(&self, value: Value) -> Result<usize, NodeError> {
        let mut state = self.state();
        let targets = state.waves.remaining(value);

        for peer in &targets {
            let msg_id = self.send_request(
                &mut state,
                peer.clone(),
                MessagePayload::Broadcast { message: value },
                PendingAck {
                    value,
                    peer: peer.clone(),
                },
            )?;
            if let Some(superseded) = state.waves.record(value, peer, msg_id) {
                state.correlator.forget([superseded]);
            }
        }
        Ok(targets.len())
    }

    fn finish_wave(&self, value: Value) {
        let mut state = self.state();
        let sent = state.waves.finish(value);
        state.correlator.forget(sent);
    }

    /// Pushes the whole value set to a random subset of the cluster.
    fn gossip_round(&self, fanout_probability: f64) -> Result<(), NodeError> {
        let mut state = self.state();
        if state.store.len() < 2 {
            return Ok(());
        }
        let Some(self_id) = state.self_id.clone() else {
            return Ok(());
        };

        let messages = state.store.snapshot();
        let peers: Vec<NodeId> = state
            .node_ids
            .iter()
            .filter(|id| **id != self_id)
            .cloned()
            .collect();

        let mut rng = rand::thread_rng();
        for peer in peers {
            if rng.gen_bool(fanout_probability.clamp(0.0, 1.0)) {
                self.send(
                    &mut state,
                    peer,
                    MessagePayload::Gossip {
                        messages: messages.clone(),
                    },
                )?;
            }
        }
        Ok(())
    }
}

/// Runs one wave until every target acknowledged or the node shuts down.
pub(crate) async fn disseminate(node: Arc<Node>, value: Value) {
    let interval = node.config.retry_interval;
    let mut rounds = 0usize;

    let outcome = loop {
        match node.send_round(value) {
            Ok(0) => break Outcome::Done,
            Ok(sent) => {
                rounds += 1;
                debug!(value, sent, rounds, "broadcast round sent");
            }
            Err(err) => {
                error!(value, %err, "dissemination wave failed");
                break Outcome::Abandoned;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stopped(node.shutdown.clone()) => break Outcome::Abandoned,
        }
    };

    node.finish_wave(value);
    match outcome {
        Outcome::Done => debug!(value, rounds, "dissemination wave done"),
        Outcome::Abandoned => warn!(value, rounds, "dissemination wave abandoned"),
    }
}

/// Periodic anti-entropy, started once the node knows the cluster.
pub(crate) async fn gossip(node: Arc<Node>) {
    let Some(config) = node.config.gossip.clone() else {
        return;
    };
    info!(interval = ?config.interval, "gossip started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = stopped(node.shutdown.clone()) => break,
        }

        if let Err(err) = node.gossip_round(config.fanout_probability) {
            error!(%err, "gossip round failed");
            break;
        }
    }
    info!("gossip stopped");
}
