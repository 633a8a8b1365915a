//! Broker engine
//!
//! This module contains the in-memory broker implementation responsible for:
//! - declaring exchanges and queues and binding them together
//! - routing published messages into every matching queue
//! - handing queued messages to consumers and tracking them until settled
//! - requeueing unacknowledged deliveries when a session closes or an
//!   acknowledgement does not arrive in time
//!
//! Concurrency and usage notes:
//! - The public API here is synchronous and designed to be held behind a
//!   lock (`SharedBroker`) by the transport layer. Deliveries leave through
//!   unbounded channels, so no method blocks while the lock is held.
//! - The redelivery loop is designed to be run as a background task. It
//!   requeues deliveries whose acknowledgement is overdue and drops messages
//!   that exhausted their redeliveries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::BrokerError;
use crate::exchange::{Exchange, ExchangeKind};
use crate::message::{Delivery, DeliveryTag, Message};
use crate::queue::{Queue, QueueConsumer, QueueOptions};
use crate::session::{Session, SessionId};

pub type SharedBroker = Arc<Mutex<Broker>>;

/// Locks a shared broker. A poisoned lock is recovered: every engine method
/// leaves the broker consistent before it can panic.
pub fn lock(broker: &SharedBroker) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A delivery that was handed out and not yet settled.
#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub queue: String,
    pub message: Message,
    pub sent_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// How long a delivery may stay unacknowledged before it is requeued.
    pub ack_timeout: Duration,
    /// Redeliveries allowed after the first delivery before the message is dropped.
    pub max_redeliveries: u32,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(30),
            max_redeliveries: 5,
        }
    }
}

/// Reply to a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclared {
    pub queue: String,
    pub message_count: usize,
    pub consumer_count: usize,
}

#[derive(Debug, Default)]
pub struct Broker {
    pub exchanges: HashMap<String, Exchange>,
    pub queues: HashMap<String, Queue>,
    pub sessions: HashMap<SessionId, Session>,
    pub pending_acks: HashMap<(SessionId, DeliveryTag), PendingDelivery>,
    policy: RedeliveryPolicy,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: RedeliveryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn shared(self) -> SharedBroker {
        Arc::new(Mutex::new(self))
    }

    pub fn policy(&self) -> RedeliveryPolicy {
        self.policy
    }

    pub fn register_session(&mut self, session: Session) {
        debug!(session = %session.id, "session opened");
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Declares an exchange. Redeclaring with identical arguments is a no-op;
    /// redeclaring with a different kind or durability is refused.
    pub fn exchange_declare(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        if name.is_empty() {
            return Err(BrokerError::AccessRefused("the default exchange".to_string()));
        }

        match self.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(BrokerError::PreconditionFailed {
                entity: "exchange",
                name: name.to_string(),
                detail: format!("type: received '{kind}' but current is '{}'", existing.kind),
            }),
            Some(existing) if existing.durable != durable => Err(BrokerError::PreconditionFailed {
                entity: "exchange",
                name: name.to_string(),
                detail: format!(
                    "durable: received '{durable}' but current is '{}'",
                    existing.durable
                ),
            }),
            Some(_) => Ok(()),
            None => {
                self.exchanges
                    .insert(name.to_string(), Exchange::new(name, kind, durable));
                info!(exchange = name, %kind, "declared exchange");
                Ok(())
            }
        }
    }

    /// Declares a queue on behalf of `session`. An empty name asks the broker
    /// to generate a unique one.
    pub fn queue_declare(
        &mut self,
        session: &SessionId,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueDeclared, BrokerError> {
        self.ensure_session(session)?;

        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_string()
        };

        if let Some(existing) = self.queues.get(&name) {
            if !existing.accessible_by(session) {
                return Err(BrokerError::ResourceLocked(name));
            }
            if existing.options != options {
                return Err(BrokerError::PreconditionFailed {
                    entity: "queue",
                    name,
                    detail: format!(
                        "received {options:?} but current is {:?}",
                        existing.options
                    ),
                });
            }
            return Ok(QueueDeclared {
                message_count: existing.ready.len(),
                consumer_count: existing.consumers.len(),
                queue: name,
            });
        }

        self.queues
            .insert(name.clone(), Queue::new(&name, options, session));
        info!(queue = %name, ?options, "declared queue");

        Ok(QueueDeclared {
            queue: name,
            message_count: 0,
            consumer_count: 0,
        })
    }

    /// Binds a queue to an exchange. Binding the same pair again has no effect.
    pub fn queue_bind(
        &mut self,
        session: &SessionId,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_session(session)?;

        let target = self
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        if !target.accessible_by(session) {
            return Err(BrokerError::ResourceLocked(queue.to_string()));
        }

        let exchange_entry = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;
        exchange_entry.bind(queue, routing_key);

        info!(queue, exchange, routing_key, "bound queue");
        Ok(())
    }

    /// Routes a message through `exchange` and returns how many queues it
    /// reached. The nameless exchange routes to the queue named by the routing
    /// key. A message that reaches no queue is dropped.
    pub fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: String,
    ) -> Result<usize, BrokerError> {
        let targets = if exchange.is_empty() {
            if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            }
        } else {
            self.exchanges
                .get(exchange)
                .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?
                .route(routing_key)
        };

        if targets.is_empty() {
            debug!(exchange, routing_key, "unroutable message dropped");
            return Ok(0);
        }

        let message = Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            message_id: Uuid::new_v4().to_string(),
            delivery_count: 0,
        };

        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(message.clone());
            }
        }
        for name in &targets {
            self.dispatch(name);
        }

        debug!(exchange, message_id = %message.message_id, queues = targets.len(), "routed message");
        Ok(targets.len())
    }

    /// Attaches a consumer to a queue and returns its tag. Ready messages are
    /// delivered right away.
    pub fn consume(
        &mut self,
        session: &SessionId,
        queue: &str,
        consumer_tag: Option<&str>,
        no_ack: bool,
    ) -> Result<String, BrokerError> {
        self.ensure_session(session)?;

        let tag = consumer_tag
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("amq.ctag-{}", Uuid::new_v4().simple()));

        let tag_in_use = self.queues.values().any(|q| {
            q.consumers
                .iter()
                .any(|c| &c.session == session && c.tag == tag)
        });
        if tag_in_use {
            return Err(BrokerError::ConsumerTagInUse(tag));
        }

        let target = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        if !target.accessible_by(session) {
            return Err(BrokerError::ResourceLocked(queue.to_string()));
        }

        target.add_consumer(QueueConsumer {
            session: session.clone(),
            tag: tag.clone(),
            no_ack,
        });
        info!(queue, consumer_tag = %tag, "consumer attached");

        self.dispatch(queue);
        Ok(tag)
    }

    /// Settles a delivery as processed. With `multiple`, every outstanding
    /// delivery of the session up to and including `tag` is settled.
    pub fn ack(
        &mut self,
        session: &SessionId,
        tag: DeliveryTag,
        multiple: bool,
    ) -> Result<(), BrokerError> {
        let keys: Vec<(SessionId, DeliveryTag)> = if multiple {
            self.pending_acks
                .keys()
                .filter(|(s, t)| s == session && *t <= tag)
                .cloned()
                .collect()
        } else {
            vec![(session.clone(), tag)]
        };

        let mut settled = 0;
        for key in keys {
            if self.pending_acks.remove(&key).is_some() {
                settled += 1;
            }
        }

        if settled == 0 {
            warn!(session = %session, delivery_tag = tag, "ACK for unknown delivery tag");
            return Err(BrokerError::UnknownDeliveryTag(tag));
        }

        debug!(session = %session, delivery_tag = tag, settled, "ACK received");
        Ok(())
    }

    /// Settles a delivery as not processed. With `requeue` the message goes
    /// back to the head of its queue, otherwise it is dropped.
    pub fn nack(
        &mut self,
        session: &SessionId,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let pending = self
            .pending_acks
            .remove(&(session.clone(), tag))
            .ok_or(BrokerError::UnknownDeliveryTag(tag))?;

        if requeue {
            if let Some(queue) = self.requeue(pending) {
                self.dispatch(&queue);
            }
        } else {
            warn!(
                queue = %pending.queue,
                message_id = %pending.message.message_id,
                "rejected message dropped"
            );
        }
        Ok(())
    }

    /// Detaches a consumer so nothing more is dispatched to it. Deliveries it
    /// already received stay unacknowledged until they are settled, time out
    /// or the session closes. An auto-delete queue that loses its last
    /// consumer is deleted. Returns whether the tag was attached.
    pub fn cancel(&mut self, session: &SessionId, consumer_tag: &str) -> Result<bool, BrokerError> {
        self.ensure_session(session)?;

        let Some(queue) = self.queues.values_mut().find(|q| {
            q.consumers
                .iter()
                .any(|c| &c.session == session && c.tag == consumer_tag)
        }) else {
            debug!(consumer_tag, "cancel for unknown consumer");
            return Ok(false);
        };

        queue.remove_consumer(session, consumer_tag);
        let name = queue.name.clone();
        let abandoned = queue.abandoned();
        info!(queue = %name, consumer_tag, "consumer cancelled");

        if abandoned {
            self.delete_queue(&name);
        }
        Ok(true)
    }

    /// Closes a session: its consumers detach, its exclusive queues and any
    /// auto-delete queue left without consumers are deleted, and whatever it
    /// had not acknowledged is requeued.
    pub fn cleanup_session(&mut self, session_id: &SessionId) {
        self.sessions.remove(session_id);

        for queue in self.queues.values_mut() {
            queue.remove_consumers_of(session_id);
        }

        let doomed: Vec<String> = self
            .queues
            .values()
            .filter(|q| q.owner.as_ref() == Some(session_id) || q.abandoned())
            .map(|q| q.name.clone())
            .collect();

        for name in &doomed {
            self.delete_queue(name);
        }

        let mut unacked: Vec<(DeliveryTag, PendingDelivery)> = Vec::new();
        let keys: Vec<(SessionId, DeliveryTag)> = self
            .pending_acks
            .keys()
            .filter(|(s, _)| s == session_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(pending) = self.pending_acks.remove(&key) {
                unacked.push((key.1, pending));
            }
        }

        // Highest tag first so that pushing to the front restores delivery order.
        unacked.sort_by(|a, b| b.0.cmp(&a.0));
        let mut touched: Vec<String> = Vec::new();
        for (_, pending) in unacked {
            if let Some(queue) = self.requeue(pending) {
                if !touched.contains(&queue) {
                    touched.push(queue);
                }
            }
        }
        for queue in touched {
            self.dispatch(&queue);
        }

        info!(session = %session_id, "cleaned up session");
    }

    /// Requeues deliveries whose acknowledgement is overdue at `now_ms`.
    /// Messages that used up their redeliveries are dropped instead.
    /// Returns the number of requeued messages.
    pub fn requeue_expired(&mut self, now_ms: i64) -> usize {
        let timeout = i64::try_from(self.policy.ack_timeout.as_millis()).unwrap_or(i64::MAX);

        let expired: Vec<(SessionId, DeliveryTag)> = self
            .pending_acks
            .iter()
            .filter(|(_, pending)| now_ms.saturating_sub(pending.sent_at) > timeout)
            .map(|(key, _)| key.clone())
            .collect();

        let mut requeued = 0;
        let mut touched: Vec<String> = Vec::new();
        for key in expired {
            let Some(pending) = self.pending_acks.remove(&key) else {
                continue;
            };

            if pending.message.delivery_count > self.policy.max_redeliveries {
                warn!(
                    message_id = %pending.message.message_id,
                    queue = %pending.queue,
                    "message dropped after {} redeliveries",
                    self.policy.max_redeliveries
                );
                continue;
            }

            info!(
                message_id = %pending.message.message_id,
                queue = %pending.queue,
                attempt = pending.message.delivery_count + 1,
                "acknowledgement overdue, requeueing"
            );
            if let Some(queue) = self.requeue(pending) {
                requeued += 1;
                if !touched.contains(&queue) {
                    touched.push(queue);
                }
            }
        }

        for queue in touched {
            self.dispatch(&queue);
        }
        requeued
    }

    /// Runs `requeue_expired` once a second for as long as the task lives.
    pub async fn start_redelivery_loop(broker: SharedBroker) {
        let mut ticker = tokio::time::interval(Duration::from_millis(1000));
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp_millis();
            lock(&broker).requeue_expired(now);
        }
    }

    fn delete_queue(&mut self, name: &str) {
        self.queues.remove(name);
        for exchange in self.exchanges.values_mut() {
            exchange.unbind_queue(name);
        }
        info!(queue = %name, "deleted queue");
    }

    fn ensure_session(&self, session: &SessionId) -> Result<(), BrokerError> {
        if self.sessions.contains_key(session) {
            Ok(())
        } else {
            Err(BrokerError::UnknownSession(session.clone()))
        }
    }

    /// Puts a message back at the head of its queue, flagged as redelivered.
    /// Returns the queue name, or `None` if the queue no longer exists.
    fn requeue(&mut self, pending: PendingDelivery) -> Option<String> {
        match self.queues.get_mut(&pending.queue) {
            Some(queue) => {
                queue.ready.push_front(pending.message);
                Some(pending.queue)
            }
            None => {
                debug!(queue = %pending.queue, "queue gone, unacked message dropped");
                None
            }
        }
    }

    /// Hands ready messages of `queue_name` to its consumers until either runs out.
    fn dispatch(&mut self, queue_name: &str) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };

        while !queue.ready.is_empty() {
            let Some(consumer) = queue.next_consumer() else {
                break;
            };

            let Some(session) = self.sessions.get_mut(&consumer.session) else {
                queue.remove_consumers_of(&consumer.session);
                continue;
            };

            let Some(mut message) = queue.ready.pop_front() else {
                break;
            };

            let tag = session.next_delivery_tag();
            let delivery = Delivery::new(tag, &consumer.tag, &message);

            if let Err(e) = session.sender.send(delivery) {
                warn!(session = %session.id, "failed to hand delivery to session: {e}");
                queue.ready.push_front(message);
                break;
            }

            message.delivery_count += 1;
            if !consumer.no_ack {
                self.pending_acks.insert(
                    (session.id.clone(), tag),
                    PendingDelivery {
                        queue: queue_name.to_string(),
                        message,
                        sent_at: chrono::Utc::now().timestamp_millis(),
                    },
                );
            }
        }
    }
}
