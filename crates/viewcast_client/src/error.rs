use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("broker connection closed")]
    ConnectionClosed,
    /// The broker refused an operation.
    #[error("broker replied {code}: {message}")]
    Broker { code: u16, message: String },
    #[error("unexpected reply from broker: {0}")]
    UnexpectedReply(String),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ClientError {
    /// True when the connection is gone and nothing sent on it can arrive.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ClientError::ConnectionClosed | ClientError::Connect(_))
    }
}
