//! WebSocket transport
//!
//! This file implements the broker's network face. Responsibilities:
//! - Accept TCP/WebSocket connections, refusing them above the connection limit
//! - Open a broker `Session` per connection and close it when the socket ends
//! - Deserialize client frames, apply them to the broker, serialize replies
//! - Forward deliveries the broker hands to the session into the socket

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use viewcast_broker::engine::{SharedBroker, lock};
use viewcast_broker::{Broker, BrokerError, Delivery, QueueOptions, Session, SessionId};

use crate::message::{ClientMessage, ServerMessage};

/// Reply code sent to connections refused because of the connection limit.
const NOT_ALLOWED: u16 = 530;
/// Reply code for frames that are not valid protocol JSON.
const SYNTAX_ERROR: u16 = 502;

pub async fn start_websocket_server(
    addr: String,
    broker: SharedBroker,
    max_connections: usize,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;

    info!("Broker listening on ws://{}", listener.local_addr()?);

    serve(listener, broker, max_connections).await;
    Ok(())
}

/// Accepts connections on an already bound listener until accepting fails.
pub async fn serve(listener: TcpListener, broker: SharedBroker, max_connections: usize) {
    while let Ok((stream, peer)) = listener.accept().await {
        let broker = broker.clone();
        debug!(%peer, "accepted TCP connection");
        tokio::spawn(handle_connection(stream, broker, max_connections));
    }
    warn!("listener stopped accepting connections");
}

async fn handle_connection(stream: TcpStream, broker: SharedBroker, max_connections: usize) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<Delivery>();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let session = Session::new(delivery_tx);
    let session_id = session.id.clone();

    // check and registration share one guard; the limit holds under concurrent handshakes
    let admitted = {
        let mut broker = lock(&broker);
        let connected = broker.session_count();
        if connected < max_connections {
            broker.register_session(session);
            Ok(())
        } else {
            Err(connected)
        }
    };

    if let Err(connected) = admitted {
        warn!(connected, "connection limit reached, refusing client");
        let refusal = ServerMessage::Error {
            request_id: None,
            code: NOT_ALLOWED,
            message: "connection limit reached".to_string(),
        };
        if let Ok(text) = serde_json::to_string(&refusal) {
            let _ = ws_sender.send(WsMessage::text(text)).await;
        }
        let _ = ws_sender.close().await;
        return;
    }

    info!(session = %session_id, "client connected");

    let writer = {
        let session_id = session_id.clone();

        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    Some(reply) = reply_rx.recv() => reply,
                    Some(delivery) = delivery_rx.recv() => ServerMessage::Deliver(delivery),
                    else => break,
                };

                let text = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize frame for {session_id}: {e}");
                        continue;
                    }
                };

                if let Err(e) = ws_sender.send(WsMessage::text(text)).await {
                    warn!("Failed to send message to {session_id}: {e}");
                    break;
                }
            }

            let _ = ws_sender.close().await;
            debug!("Send loop closed for {session_id}");
        })
    };

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };

        let reply = match serde_json::from_str::<ClientMessage>(text) {
            Ok(request) => {
                let mut broker = lock(&broker);
                handle_client_message(&mut broker, &session_id, request)
            }
            Err(err) => {
                warn!(
                    "Invalid client message from {session_id}: {err} | {}",
                    text.chars().take(100).collect::<String>()
                );
                Some(ServerMessage::Error {
                    request_id: None,
                    code: SYNTAX_ERROR,
                    message: format!("invalid frame: {err}"),
                })
            }
        };

        if let Some(reply) = reply {
            if reply_tx.send(reply).is_err() {
                break;
            }
        }
    }

    lock(&broker).cleanup_session(&session_id);
    drop(reply_tx);
    let _ = writer.await;

    info!(session = %session_id, "client disconnected");
}

/// Applies one client frame to the broker and returns the frame to send back, if any.
pub fn handle_client_message(
    broker: &mut Broker,
    session: &SessionId,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::ExchangeDeclare {
            request_id,
            exchange,
            kind,
            durable,
        } => Some(answer(
            request_id,
            broker
                .exchange_declare(&exchange, kind, durable)
                .map(|_| ServerMessage::ExchangeDeclareOk { request_id }),
        )),

        ClientMessage::QueueDeclare {
            request_id,
            queue,
            exclusive,
            auto_delete,
            durable,
        } => {
            let options = QueueOptions {
                exclusive,
                auto_delete,
                durable,
            };
            Some(answer(
                request_id,
                broker
                    .queue_declare(session, &queue, options)
                    .map(|declared| ServerMessage::QueueDeclareOk {
                        request_id,
                        queue: declared.queue,
                        message_count: declared.message_count,
                        consumer_count: declared.consumer_count,
                    }),
            ))
        }

        ClientMessage::QueueBind {
            request_id,
            queue,
            exchange,
            routing_key,
        } => Some(answer(
            request_id,
            broker
                .queue_bind(session, &queue, &exchange, &routing_key)
                .map(|_| ServerMessage::QueueBindOk { request_id }),
        )),

        ClientMessage::Publish {
            exchange,
            routing_key,
            payload,
        } => match broker.publish(&exchange, &routing_key, payload) {
            Ok(routed) => {
                debug!("{session} published to '{exchange}', routed to {routed} queue(s)");
                None
            }
            Err(e) => {
                warn!("{session} failed to publish to '{exchange}': {e}");
                Some(ServerMessage::error(None, &e))
            }
        },

        ClientMessage::Consume {
            request_id,
            queue,
            consumer_tag,
            no_ack,
        } => Some(answer(
            request_id,
            broker
                .consume(session, &queue, consumer_tag.as_deref(), no_ack)
                .map(|consumer_tag| ServerMessage::ConsumeOk {
                    request_id,
                    consumer_tag,
                }),
        )),

        ClientMessage::Cancel { consumer_tag } => broker
            .cancel(session, &consumer_tag)
            .err()
            .map(|e| ServerMessage::error(None, &e)),

        ClientMessage::Ack {
            delivery_tag,
            multiple,
        } => broker
            .ack(session, delivery_tag, multiple)
            .err()
            .map(|e| ServerMessage::error(None, &e)),

        ClientMessage::Nack {
            delivery_tag,
            requeue,
        } => broker
            .nack(session, delivery_tag, requeue)
            .err()
            .map(|e| ServerMessage::error(None, &e)),
    }
}

fn answer(request_id: u64, result: Result<ServerMessage, BrokerError>) -> ServerMessage {
    result.unwrap_or_else(|e| ServerMessage::error(Some(request_id), &e))
}
