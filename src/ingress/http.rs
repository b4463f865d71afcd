//! HTTP surface
//!
//! - `POST /api/v2/device/send`: route one message, encoding picked by
//!   `Content-Type` (JSON when absent)
//! - `GET /api/v2/devices`: streamed device listing
//! - `GET /api/v2/device/:id/stat`: one device's listing entry

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use bytes::Bytes;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

use super::{send_message, SendOutcome};
use crate::device::DeviceId;
use crate::manager::Manager;
use crate::message::Format;
use crate::transport::Upgrader;

pub const SEND_PATH: &str = "/api/v2/device/send";
pub const DEVICES_PATH: &str = "/api/v2/devices";
pub const STAT_PATH: &str = "/api/v2/device/:id/stat";

/// Buffer between the listing task and the response body
const LISTING_PIPE_SIZE: usize = 64 * 1024;

/// Build the HTTP routes for a manager
pub fn router<U: Upgrader>(manager: Arc<Manager<U>>) -> axum::Router {
    axum::Router::new()
        .route(SEND_PATH, post(send::<U>))
        .route(DEVICES_PATH, get(devices::<U>))
        .route(STAT_PATH, get(stat::<U>))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

impl IntoResponse for SendOutcome {
    fn into_response(self) -> Response {
        let status = self.status();

        match self {
            SendOutcome::Delivered | SendOutcome::NoMatch => status.into_response(),
            SendOutcome::Failed(report) => (status, Json(report)).into_response(),
            SendOutcome::BadRequest(reason) => (status, reason).into_response(),
        }
    }
}

async fn send<U: Upgrader>(
    State(manager): State<Arc<Manager<U>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let format = match headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        Some(content_type) => match Format::from_content_type(content_type) {
            Ok(format) => format,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        },
        None => Format::Json,
    };

    let cancel = manager.shutdown_token().child_token();
    send_message(manager.as_ref(), format, body, &cancel)
        .await
        .into_response()
}

async fn devices<U: Upgrader>(State(manager): State<Arc<Manager<U>>>) -> Response {
    let (mut writer, reader) = tokio::io::duplex(LISTING_PIPE_SIZE);
    let listing = manager.listing();
    let cancel = manager.shutdown_token().child_token();

    tokio::spawn(async move {
        // Fails when the client goes away mid-listing
        if let Err(e) = listing.stream(&mut writer, &cancel).await {
            tracing::debug!(error = %e, "Device listing aborted");
        }
    });

    (
        [(header::CONTENT_TYPE, Format::Json.content_type())],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

async fn stat<U: Upgrader>(
    State(manager): State<Arc<Manager<U>>>,
    Path(id): Path<String>,
) -> Response {
    let id = match DeviceId::parse(&id) {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match manager.registry().get(&id).await {
        Some(device) => Json(device.as_ref()).into_response(),
        None => (StatusCode::NOT_FOUND, format!("device {id} is not connected")).into_response(),
    }
}
