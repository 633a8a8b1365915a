use tracing::info;
use viewcast_client::{
    Channel, ClientError, Connection, ExchangeDeclareOptions, ExchangeKind, QueueDeclareOptions,
};

pub const VIEWED_EXCHANGE: &str = "viewed";

/// A channel on which the "viewed" exchange is known to exist.
#[derive(Clone)]
pub struct Topology {
    pub channel: Channel,
    pub exchange: &'static str,
}

/// Opens a channel and declares the durable "viewed" fanout exchange.
///
/// Safe to call on every startup: an identical declaration is a no-op and
/// leaves existing bindings alone. A declaration the broker refuses, such as
/// the name already being taken by a direct exchange, is returned as an error
/// and the caller is expected to give up.
pub async fn ensure_topology(connection: &Connection) -> Result<Topology, ClientError> {
    let channel = connection.create_channel();
    channel
        .exchange_declare(
            VIEWED_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions { durable: true },
        )
        .await?;

    info!(exchange = VIEWED_EXCHANGE, "exchange declared");

    Ok(Topology {
        channel,
        exchange: VIEWED_EXCHANGE,
    })
}

/// Declares a server-named queue owned by this connection, deleted with it,
/// and binds it to the "viewed" exchange. Returns the queue name.
pub async fn bind_private_queue(channel: &Channel) -> Result<String, ClientError> {
    let queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                durable: false,
            },
        )
        .await?;

    info!(queue = %queue.name, "created queue, binding it to \"{VIEWED_EXCHANGE}\" exchange");
    channel.queue_bind(&queue.name, VIEWED_EXCHANGE, "").await?;

    Ok(queue.name)
}
