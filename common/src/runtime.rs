use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::message::Message;
use crate::node::Node;

pub struct Runtime;

impl Runtime {
    /// Starts delegating processing of messages as they arrive on the specified `reader`.
    ///
    /// Every message is handled on its own task. Returns once the input ends and
    /// all handlers have finished, or as soon as a handler reports a fatal error.
    pub async fn start<R, W>(reader: R, writer: W, config: NodeConfig) -> Result<(), NodeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (node, rx) = Node::new(config);
        let writer = tokio::spawn(write_loop(writer, rx));

        let dispatched = Self::dispatch(&node, reader).await;

        node.shutdown().await;
        drop(node);
        let written = writer.await?;

        dispatched?;
        written
    }

    async fn dispatch<R>(node: &Arc<Node>, reader: R) -> Result<(), NodeError>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        let limiter = Arc::new(Semaphore::new(node.config.max_in_flight));
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let message: Message = serde_json::from_str(&line)
                        .map_err(|source| NodeError::Malformed { line, source })?;

                    let permit = Arc::clone(&limiter).acquire_owned().await?;
                    let node = Arc::clone(node);
                    handlers.spawn(async move {
                        let _permit = permit;
                        node.handle(message)
                    });
                }
                Some(handled) = handlers.join_next(), if !handlers.is_empty() => {
                    handled??;
                }
            }
        }

        debug!(in_flight = handlers.len(), "input closed, draining handlers");
        while let Some(handled) = handlers.join_next().await {
            handled??;
        }
        info!("input drained");
        Ok(())
    }
}

/// Writes each message as one JSON line. Ends once every sender is gone.
async fn write_loop<W>(mut writer: W, mut rx: UnboundedReceiver<Message>) -> Result<(), NodeError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut bytes = serde_json::to_vec(&message).map_err(NodeError::Encode)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
    Ok(())
}
