use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::session::SessionId;

/// Declaration flags of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Only the declaring session may use the queue; it is deleted when that session closes.
    #[serde(default)]
    pub exclusive: bool,
    /// Deleted once its last consumer goes away.
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConsumer {
    pub session: SessionId,
    pub tag: String,
    pub no_ack: bool,
}

/// Represents a queue in the broker system
///
/// Holds messages that are ready for delivery, in arrival order, and the
/// consumers attached to it. Consumers are served round robin.
#[derive(Debug)]
pub struct Queue {
    pub name: String,
    pub options: QueueOptions,
    pub owner: Option<SessionId>,
    pub ready: VecDeque<Message>,
    pub consumers: Vec<QueueConsumer>,
    had_consumer: bool,
    next_consumer: usize,
}

impl Queue {
    pub fn new(name: &str, options: QueueOptions, declared_by: &SessionId) -> Self {
        Self {
            name: name.to_string(),
            options,
            owner: options.exclusive.then(|| declared_by.clone()),
            ready: VecDeque::new(),
            consumers: Vec::new(),
            had_consumer: false,
            next_consumer: 0,
        }
    }

    /// Whether `session` may use this queue.
    pub fn accessible_by(&self, session: &SessionId) -> bool {
        match &self.owner {
            Some(owner) => owner == session,
            None => true,
        }
    }

    pub fn add_consumer(&mut self, consumer: QueueConsumer) {
        self.consumers.push(consumer);
        self.had_consumer = true;
    }

    pub fn remove_consumers_of(&mut self, session: &SessionId) {
        self.consumers.retain(|c| &c.session != session);
        if self.next_consumer >= self.consumers.len() {
            self.next_consumer = 0;
        }
    }

    /// Removes one consumer. Returns whether it was attached.
    pub fn remove_consumer(&mut self, session: &SessionId, tag: &str) -> bool {
        let before = self.consumers.len();
        self.consumers
            .retain(|c| !(&c.session == session && c.tag == tag));
        if self.next_consumer >= self.consumers.len() {
            self.next_consumer = 0;
        }
        self.consumers.len() != before
    }

    /// Picks the next consumer in round robin order.
    pub fn next_consumer(&mut self) -> Option<QueueConsumer> {
        if self.consumers.is_empty() {
            return None;
        }
        let index = self.next_consumer % self.consumers.len();
        self.next_consumer = (index + 1) % self.consumers.len();
        Some(self.consumers[index].clone())
    }

    /// True once an auto-delete queue has lost the last of its consumers.
    pub fn abandoned(&self) -> bool {
        self.options.auto_delete && self.had_consumer && self.consumers.is_empty()
    }
}
