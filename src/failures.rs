//! Per-request delivery failure aggregation

use std::collections::HashMap;
use std::io::{self, Write};

use parking_lot::Mutex;
use serde::Serialize;

use crate::device::{ConnectionKey, Device, DeviceId};
use crate::error::DeliveryError;

/// Collects delivery outcomes for one routed request
///
/// Safe to feed from concurrent delivery callbacks. Successful outcomes are
/// recorded too but never appear in the report.
#[derive(Debug, Default)]
pub struct Failures {
    outcomes: Mutex<HashMap<DeviceId, Outcome>>,
}

#[derive(Debug)]
struct Outcome {
    key: ConnectionKey,
    error: Option<DeliveryError>,
}

/// One failed delivery in a [`FailureReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    pub id: DeviceId,
    pub key: ConnectionKey,
    pub error: String,
}

/// Body returned to the sender when deliveries failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub errors: Vec<FailureDetail>,
}

impl Failures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one delivery
    pub fn add(&self, device: &Device, error: Option<&DeliveryError>) {
        self.outcomes.lock().insert(
            device.id().clone(),
            Outcome {
                key: device.key(),
                error: error.cloned(),
            },
        );
    }

    /// Number of outcomes recorded, successful or not
    pub fn len(&self) -> usize {
        self.outcomes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.lock().is_empty()
    }

    /// Number of failed deliveries
    pub fn failure_count(&self) -> usize {
        self.outcomes
            .lock()
            .values()
            .filter(|outcome| outcome.error.is_some())
            .count()
    }

    /// Report of every failed delivery, ordered by device id
    ///
    /// `None` when nothing failed.
    pub fn report(&self) -> Option<FailureReport> {
        let outcomes = self.outcomes.lock();

        let mut errors: Vec<FailureDetail> = outcomes
            .iter()
            .filter_map(|(id, outcome)| {
                outcome.error.as_ref().map(|error| FailureDetail {
                    id: id.clone(),
                    key: outcome.key,
                    error: error.to_string(),
                })
            })
            .collect();
        drop(outcomes);

        if errors.is_empty() {
            return None;
        }

        errors.sort_by(|a, b| a.id.cmp(&b.id));
        Some(FailureReport { errors })
    }

    /// Write the `{"errors":[...]}` document
    ///
    /// The document is written even when empty. Returns the number of
    /// failures it lists.
    pub fn write_json<W: Write>(&self, writer: W) -> io::Result<usize> {
        let report = self.report().unwrap_or(FailureReport { errors: Vec::new() });
        serde_json::to_writer(writer, &report)?;
        Ok(report.errors.len())
    }
}
