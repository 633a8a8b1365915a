//! CLI for viewcast
//!
//! Subcommands:
//! - `broker`: run the message broker
//! - `streaming`: serve videos and announce each view on the "viewed" exchange
//! - `recommendations`: consume "viewed" events
//!
//! Configuration comes from the environment (see `viewcast_config`). Any
//! startup failure is logged with its cause chain and exits with status 1.

use std::io;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use viewcast_broker::{Broker, RedeliveryPolicy};
use viewcast_client::Connection;
use viewcast_config::{ServerSettings, load_config};
use viewcast_events::{ViewedConsumer, ViewedPublisher, bind_private_queue, ensure_topology};
use viewcast_streaming::VideoCatalog;
use viewcast_transport::start_websocket_server;
use viewcast_utils::error::{BoxError, report};
use warp::Filter;
use warp::http::StatusCode;

#[derive(Parser)]
#[command(name = "viewcast", version)]
enum Command {
    /// Start the message broker
    Broker,
    /// Start the video streaming service
    Streaming,
    /// Start the recommendations service
    Recommendations,
}

#[tokio::main]
async fn main() -> ExitCode {
    viewcast_utils::logging::init("info");

    let result = match Command::parse() {
        Command::Broker => run_broker().await,
        Command::Streaming => run_streaming().await,
        Command::Recommendations => run_recommendations().await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Microservice failed: {}", report(e.as_ref()));
            ExitCode::FAILURE
        }
    }
}

async fn run_broker() -> Result<(), BoxError> {
    let settings = load_config()?.broker();
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let policy = RedeliveryPolicy {
        ack_timeout: Duration::from_secs(settings.broker.ack_timeout_secs),
        max_redeliveries: settings.broker.max_redeliveries,
    };
    let broker = Broker::with_policy(policy).shared();

    tokio::spawn(Broker::start_redelivery_loop(broker.clone()));

    tokio::select! {
        served = start_websocket_server(addr, broker, settings.broker.max_connections) => {
            served?;
            error!("Broker exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_streaming() -> Result<(), BoxError> {
    let settings = load_config()?.streaming()?;
    let addr = resolve(&settings.server).await?;

    info!("Connecting to broker at {}.", settings.broker_url);
    let connection = Connection::connect(&settings.broker_url).await?;
    let topology = ensure_topology(&connection).await?;

    let (_, server) = viewcast_streaming::bind(
        addr,
        VideoCatalog::new(&settings.videos_dir),
        ViewedPublisher::new(topology.channel),
        shutdown_signal(),
    )?;

    info!("Microservice online.");
    server.await;

    connection.close().await;
    Ok(())
}

async fn run_recommendations() -> Result<(), BoxError> {
    let settings = load_config()?.recommendations()?;
    let addr = resolve(&settings.server).await?;

    // metadata storage is not wired up; the settings are required all the same
    info!(
        db_host = %settings.db_host,
        db_name = %settings.db_name,
        "video metadata database configured"
    );

    info!("Connecting to broker at {}.", settings.broker_url);
    let connection = Connection::connect(&settings.broker_url).await?;
    let topology = ensure_topology(&connection).await?;
    let queue = bind_private_queue(&topology.channel).await?;
    let stream = topology.channel.basic_consume(&queue, false).await?;
    let mut consuming = tokio::spawn(async move { ViewedConsumer::default().run(stream).await });

    let routes = warp::any().map(|| warp::reply::with_status("Not Found", StatusCode::NOT_FOUND));
    let (addr, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown_signal())?;
    info!("Microservice online at http://{addr}.");

    let outcome: Result<(), BoxError> = tokio::select! {
        _ = server => Ok(()),
        consumed = &mut consuming => match consumed {
            Ok(Ok(())) => Err("broker closed the connection".into()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(e.into()),
        },
    };

    consuming.abort();
    connection.close().await;
    outcome
}

/// Resolves the configured listen address, allowing host names.
async fn resolve(server: &ServerSettings) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((server.host.as_str(), server.port))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} does not resolve to an address", server.host),
            )
        })
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received. Exiting gracefully."),
        Err(e) => warn!("Failed to listen for the shutdown signal: {e}"),
    }
}
