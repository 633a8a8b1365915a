use thiserror::Error;

/// Reasons the broker refuses an operation. Each maps onto the AMQP reply
/// code a RabbitMQ client would see for the same situation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("no exchange '{0}'")]
    ExchangeNotFound(String),
    #[error("no queue '{0}'")]
    QueueNotFound(String),
    #[error("inequivalent arg for {entity} '{name}': {detail}")]
    PreconditionFailed {
        entity: &'static str,
        name: String,
        detail: String,
    },
    #[error("cannot obtain exclusive access to locked queue '{0}'")]
    ResourceLocked(String),
    #[error("access to {0} refused")]
    AccessRefused(String),
    #[error("consumer tag '{0}' already in use on this session")]
    ConsumerTagInUse(String),
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
    #[error("unknown session '{0}'")]
    UnknownSession(String),
}

impl BrokerError {
    pub fn reply_code(&self) -> u16 {
        match self {
            BrokerError::ExchangeNotFound(_) | BrokerError::QueueNotFound(_) => 404,
            BrokerError::PreconditionFailed { .. } | BrokerError::UnknownDeliveryTag(_) => 406,
            BrokerError::ResourceLocked(_) => 405,
            BrokerError::AccessRefused(_) => 403,
            BrokerError::ConsumerTagInUse(_) => 530,
            BrokerError::UnknownSession(_) => 504,
        }
    }
}
