//! NetworkBridge: the race channel over a WebSocket.
//!
//! The engine never sees the socket. Outbound [`ClientMsg`]s go in through
//! an unbounded channel and decoded [`ServerMsg`]s come out of another;
//! dropping or shutting down the bridge aborts the socket task.

use anyhow::{Context, Result};
use engine::protocol::{ClientMsg, ServerMsg};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub fn encode(msg: &ClientMsg) -> Result<String> {
    serde_json::to_string(msg).context("encoding client message")
}

/// Frames that do not parse as a known event are dropped.
pub fn decode(text: &str) -> Option<ServerMsg> {
    match serde_json::from_str::<ServerMsg>(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("dropping unrecognized frame: {}", e);
            None
        }
    }
}

pub struct NetworkBridge {
    outgoing: mpsc::UnboundedSender<ClientMsg>,
    incoming: mpsc::UnboundedReceiver<ServerMsg>,
    task: JoinHandle<()>,
}

impl NetworkBridge {
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url)
            .await
            .with_context(|| format!("connecting to {url}"))?;
        info!("race channel connected to {}", url);

        let (mut sender, mut receiver) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMsg>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMsg>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => {
                        let Some(msg) = outbound else { break };
                        let text = match encode(&msg) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("{:#}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            warn!("race channel send failed");
                            break;
                        }
                    }
                    frame = receiver.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(msg) = decode(text.as_str()) {
                                    if in_tx.send(msg).is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            _ => {}
                        }
                    }
                }
            }
            debug!("race channel task exiting");
        });

        Ok(Self {
            outgoing: out_tx,
            incoming: in_rx,
            task,
        })
    }

    pub fn send(&self, msg: ClientMsg) {
        if self.outgoing.send(msg).is_err() {
            warn!("race channel closed; dropping outbound message");
        }
    }

    /// A handle for queueing outbound messages while `recv` is pending.
    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMsg> {
        self.outgoing.clone()
    }

    /// Next message from the server; `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ServerMsg> {
        self.incoming.recv().await
    }

    /// Unsubscribe and close the socket.
    pub fn shutdown(self) {
        self.task.abort();
        info!("race channel closed");
    }
}

impl Drop for NetworkBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}
