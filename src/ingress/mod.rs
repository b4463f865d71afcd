//! Ingress adapters
//!
//! Glue between request handling and the manager: decoding an inbound
//! message, routing it with a fresh failure aggregator and translating the
//! outcome into a reply. Connect requests are funneled through
//! [`connect_device`] so every attempt is logged the same way.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::device::Device;
use crate::error::ConnectError;
use crate::failures::{FailureReport, Failures};
use crate::manager::{Connector, Router};
use crate::message::Format;
use crate::transport::ConnectRequest;

pub mod http;

/// Result of handling one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every matched device accepted the message
    Delivered,
    /// No connected device matched the destination
    NoMatch,
    /// At least one delivery failed
    Failed(FailureReport),
    /// The message could not be decoded or routed
    BadRequest(String),
}

impl SendOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            SendOutcome::Delivered => StatusCode::OK,
            SendOutcome::NoMatch => StatusCode::NOT_FOUND,
            SendOutcome::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SendOutcome::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Decode and route one message
///
/// Binary bodies are forwarded to devices as received; JSON bodies are
/// re-encoded once in the binary form.
pub async fn send_message<R: Router>(
    router: &R,
    format: Format,
    body: Bytes,
    cancel: &CancellationToken,
) -> SendOutcome {
    let message = match format.decode(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "Could not decode message");
            return SendOutcome::BadRequest(format!("Could not decode message: {e}"));
        }
    };

    let raw = match format {
        Format::Binary => Some(body),
        Format::Json => None,
    };

    let failures = Failures::new();
    let routed = router
        .route(Arc::new(message), raw, cancel, |device, error| {
            failures.add(device, error)
        })
        .await;

    match routed {
        Err(e) => {
            tracing::debug!(error = %e, "Could not route message");
            SendOutcome::BadRequest(format!("Could not route message: {e}"))
        }
        Ok(routed) if routed.count() == 0 => SendOutcome::NoMatch,
        Ok(routed) => match failures.report() {
            Some(report) => {
                tracing::warn!(
                    matched = routed.count(),
                    failed = report.errors.len(),
                    "Message delivery failed for some devices"
                );
                SendOutcome::Failed(report)
            }
            None => SendOutcome::Delivered,
        },
    }
}

/// Connect a device, logging the outcome
pub async fn connect_device<C: Connector>(
    connector: &C,
    request: &ConnectRequest,
    response_headers: &HeaderMap,
) -> Result<Arc<Device>, ConnectError> {
    match connector.connect(request, response_headers).await {
        Ok(device) => {
            tracing::debug!(device = %device.id(), key = %device.key(), "Connect request accepted");
            Ok(device)
        }
        Err(e) => {
            tracing::error!(peer = ?request.peer_addr, error = %e, "Failed to connect device");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::device::metadata::DEVICE_NAME_HEADER;
    use crate::manager::{Manager, ManagerConfig};
    use crate::message::Message;
    use crate::transport::MemoryUpgrader;

    async fn manager_with(names: &[&'static str]) -> Manager<MemoryUpgrader> {
        let (upgrader, _peers) = MemoryUpgrader::new();
        let manager = Manager::new(ManagerConfig::default(), upgrader);
        for name in names {
            let mut headers = HeaderMap::new();
            headers.insert(DEVICE_NAME_HEADER, HeaderValue::from_static(name));
            connect_device(&manager, &ConnectRequest::new(headers), &HeaderMap::new())
                .await
                .unwrap();
        }
        manager
    }

    fn json(message: &Message) -> Bytes {
        Format::Json.encode(message)
    }

    #[tokio::test]
    async fn test_send_delivered() {
        let manager = manager_with(&["serial:a"]).await;

        let outcome = send_message(
            &manager,
            Format::Json,
            json(&Message::event("dns:gw", "serial:a")),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(outcome.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_send_no_match() {
        let manager = manager_with(&[]).await;

        let outcome = send_message(
            &manager,
            Format::Json,
            json(&Message::event("dns:gw", "serial:a")),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_malformed() {
        let manager = manager_with(&["serial:a"]).await;

        let outcome = send_message(
            &manager,
            Format::Json,
            Bytes::from_static(b"{not json"),
            &CancellationToken::new(),
        )
        .await;

        match outcome {
            SendOutcome::BadRequest(reason) => assert!(reason.starts_with("Could not decode")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_unroutable() {
        let manager = manager_with(&["serial:a"]).await;

        let outcome = send_message(
            &manager,
            Format::Json,
            json(&Message::event("dns:gw", "not a device")),
            &CancellationToken::new(),
        )
        .await;

        match outcome {
            SendOutcome::BadRequest(reason) => assert!(reason.starts_with("Could not route")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_partial_failure() {
        let manager = manager_with(&["serial:a", "serial:b"]).await;
        let b = manager
            .registry()
            .get(&"serial:b".parse().unwrap())
            .await
            .unwrap();
        // Closed but still registered: deliveries to it fail
        b.close();

        let outcome = send_message(
            &manager,
            Format::Json,
            json(&Message::event("dns:gw", "*")),
            &CancellationToken::new(),
        )
        .await;

        match outcome {
            SendOutcome::Failed(report) => {
                assert_eq!(report.errors.len(), 1);
                assert_eq!(report.errors[0].id.as_str(), "serial:b");
                assert_eq!(report.errors[0].key, b.key());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
