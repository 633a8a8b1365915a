use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use viewcast_events::ViewedPublisher;
use warp::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use warp::http::{HeaderValue, StatusCode};
use warp::hyper::Body;
use warp::reply::{Reply, Response};
use warp::{Filter, Rejection};

use crate::catalog::VideoCatalog;

const VIDEO_MIME: &str = "video/mp4";

#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("failed to bind HTTP server: {0}")]
    Bind(#[from] warp::Error),
}

/// Query pairs in request order. Decoding into pairs accepts any query
/// string, so a malformed one ends in a 404 rather than a rejection.
type QueryPairs = Vec<(String, String)>;

/// The `id` parameter, when it is given exactly once.
fn requested_id(query: &QueryPairs) -> Option<&str> {
    let mut ids = query
        .iter()
        .filter(|(key, _)| key == "id")
        .map(|(_, value)| value.as_str());
    match (ids.next(), ids.next()) {
        (Some(id), None) => Some(id),
        _ => None,
    }
}

pub fn routes(
    catalog: Arc<VideoCatalog>,
    publisher: ViewedPublisher,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("video")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<QueryPairs>())
        .and(warp::any().map(move || catalog.clone()))
        .and(warp::any().map(move || publisher.clone()))
        .and_then(stream_video)
}

/// Binds the HTTP server. The returned future serves until `shutdown` resolves.
pub fn bind(
    addr: SocketAddr,
    catalog: VideoCatalog,
    publisher: ViewedPublisher,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()> + 'static), StreamingError> {
    let routes = routes(Arc::new(catalog), publisher);
    let (addr, server) = warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown)?;

    info!("Listening at http://{addr}/video");

    Ok((addr, server))
}

async fn stream_video(
    query: QueryPairs,
    catalog: Arc<VideoCatalog>,
    publisher: ViewedPublisher,
) -> Result<Response, Rejection> {
    let Some(id) = requested_id(&query) else {
        return Ok(not_found());
    };
    let Some(path) = catalog.resolve(id) else {
        debug!(video_id = id, "unknown video requested");
        return Ok(not_found());
    };

    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(video_id = id, "Failed to open {}: {e}", path.display());
            return Ok(not_found());
        }
    };
    let size = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            warn!(video_id = id, "Failed to stat {}: {e}", path.display());
            return Ok(not_found());
        }
    };

    let mut response = Response::new(Body::wrap_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(VIDEO_MIME));

    info!(video_id = id, size, "streaming video");

    // the body is only pulled after we return; the event does not wait for it
    publisher.publish_viewed(id);

    Ok(response)
}

fn not_found() -> Response {
    warp::reply::with_status("Video not found", StatusCode::NOT_FOUND).into_response()
}
