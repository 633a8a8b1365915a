use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Every bound queue receives a copy; routing keys are ignored.
    Fanout,
    /// Queues bound with a key equal to the message's routing key receive a copy.
    Direct,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Fanout => write!(f, "fanout"),
            ExchangeKind::Direct => write!(f, "direct"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub queue: String,
    pub routing_key: String,
}

/// A named routing entity. Bindings keep their declaration order so routing
/// is deterministic.
#[derive(Debug)]
pub struct Exchange {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub bindings: Vec<Binding>,
}

impl Exchange {
    pub fn new(name: &str, kind: ExchangeKind, durable: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            durable,
            bindings: Vec::new(),
        }
    }

    /// Adds a binding. Binding the same pair twice has no effect.
    pub fn bind(&mut self, queue: &str, routing_key: &str) {
        let binding = Binding {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
    }

    pub fn unbind_queue(&mut self, queue: &str) {
        self.bindings.retain(|b| b.queue != queue);
    }

    /// Names of the queues a message with `routing_key` goes to, each once.
    pub fn route(&self, routing_key: &str) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for binding in &self.bindings {
            let matches = match self.kind {
                ExchangeKind::Fanout => true,
                ExchangeKind::Direct => binding.routing_key == routing_key,
            };
            if matches && !targets.contains(&binding.queue) {
                targets.push(binding.queue.clone());
            }
        }
        targets
    }
}
