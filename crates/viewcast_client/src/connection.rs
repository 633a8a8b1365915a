//! Broker connection
//!
//! `Connection::connect` opens the socket and spawns the two tasks that own
//! it. The writer drains an unbounded queue of outbound frames, so sending
//! never waits on the network. The reader routes replies to the request that
//! is waiting for them and deliveries to the consumer they were addressed to.
//! When the socket ends, every waiting request fails with
//! `ClientError::ConnectionClosed` and every consumer stream ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use viewcast_transport::{ClientMessage, Delivery, ServerMessage};

use crate::channel::Channel;
use crate::error::ClientError;

type Reply = Result<ServerMessage, ClientError>;

pub(crate) enum Outbound {
    Frame(ClientMessage),
    Close,
}

/// State shared by the connection, its channels and its consumers.
pub(crate) struct Shared {
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    consumers: Mutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>,
    next_request: AtomicU64,
    closed: AtomicBool,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            consumers: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Enqueues a frame without waiting for the broker.
    pub(crate) fn send(&self, frame: ClientMessage) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Sends the frame built for a fresh request id and waits for its reply.
    /// An `error` reply becomes `ClientError::Broker`.
    pub(crate) async fn call<F>(&self, build: F) -> Reply
    where
        F: FnOnce(u64) -> ClientMessage,
    {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        guard(&self.pending).insert(request_id, tx);

        // shutdown() flags before draining, so checking after inserting cannot miss it
        if self.is_closed() {
            guard(&self.pending).remove(&request_id);
            return Err(ClientError::ConnectionClosed);
        }

        if let Err(e) = self.send(build(request_id)) {
            guard(&self.pending).remove(&request_id);
            return Err(e);
        }

        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    pub(crate) fn register_consumer(&self, tag: &str, sender: mpsc::UnboundedSender<Delivery>) {
        guard(&self.consumers).insert(tag.to_string(), sender);
    }

    pub(crate) fn forget_consumer(&self, tag: &str) {
        guard(&self.consumers).remove(tag);
    }

    fn route(&self, frame: ServerMessage) {
        if let ServerMessage::Deliver(delivery) = frame {
            let consumers = guard(&self.consumers);
            match consumers.get(&delivery.consumer_tag) {
                Some(consumer) => {
                    if consumer.send(delivery).is_err() {
                        debug!("consumer went away, delivery stays unacknowledged");
                    }
                }
                None => warn!(
                    consumer_tag = %delivery.consumer_tag,
                    "delivery for unknown consumer"
                ),
            }
            return;
        }

        match frame.request_id() {
            Some(request_id) => {
                let Some(waiter) = guard(&self.pending).remove(&request_id) else {
                    warn!(request_id, "reply to unknown request");
                    return;
                };
                let reply = match frame {
                    ServerMessage::Error { code, message, .. } => {
                        Err(ClientError::Broker { code, message })
                    }
                    ok => Ok(ok),
                };
                let _ = waiter.send(reply);
            }
            None => {
                if let ServerMessage::Error { code, message, .. } = frame {
                    warn!(code, "broker reported: {message}");
                }
            }
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let waiting: Vec<oneshot::Sender<Reply>> =
            guard(&self.pending).drain().map(|(_, tx)| tx).collect();
        for waiter in waiting {
            let _ = waiter.send(Err(ClientError::ConnectionClosed));
        }

        guard(&self.consumers).clear();
    }
}

pub struct Connection {
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Opens a connection to the broker at `url` (e.g. `ws://localhost:5672`).
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws_stream, _response) = connect_async(url).await?;
        let (mut sink, mut stream) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let shared = Arc::new(Shared::new(outbound_tx));

        let writer = tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                let frame = match outbound {
                    Outbound::Frame(frame) => frame,
                    Outbound::Close => break,
                };

                let text = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize frame: {e}");
                        continue;
                    }
                };

                if let Err(e) = sink.send(WsMessage::text(text)).await {
                    warn!("Failed to send frame to broker: {e}");
                    break;
                }
            }

            let _ = sink.close().await;
        });

        let reader = {
            let shared = shared.clone();

            tokio::spawn(async move {
                while let Some(Ok(msg)) = stream.next().await {
                    if msg.is_close() {
                        break;
                    }
                    if !msg.is_text() {
                        continue;
                    }
                    let Ok(text) = msg.to_text() else {
                        continue;
                    };

                    match serde_json::from_str::<ServerMessage>(text) {
                        Ok(frame) => shared.route(frame),
                        Err(e) => warn!(
                            "Invalid frame from broker: {e} | {}",
                            text.chars().take(100).collect::<String>()
                        ),
                    }
                }

                shared.shutdown();
                debug!("broker connection closed");
            })
        };

        info!(url, "connected to broker");

        Ok(Self {
            shared,
            reader,
            writer,
        })
    }

    /// Returns a channel on this connection. Channels are cheap handles; all
    /// of them share the connection's socket.
    pub fn create_channel(&self) -> Channel {
        Channel::new(self.shared.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Flushes queued frames, closes the socket and fails anything still waiting.
    pub async fn close(self) {
        let _ = self.shared.outbound.send(Outbound::Close);
        let _ = self.writer.await;
        self.reader.abort();
        self.shared.shutdown();
        info!("closed broker connection");
    }
}
