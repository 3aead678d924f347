//! State reconciliation engine.
//!
//! Merges an incoming partial camera update into the locally held record.
//! The engine is pure and does not care whether the update came from the push
//! channel or a REST refresh; [`EntityCache`] is the caller that applies
//! results and reports conflicts.

mod cache;

use serde::{Deserialize, Serialize};

use crate::models::{Camera, CameraField, CameraPatch};

pub use cache::{ApplyOutcome, EntityCache, PushEnvelope, UpdateSource};

/// Which side's values ended up in the resolved record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Incoming was newer and was applied
    Incoming,
    /// Incoming was rejected; local kept unchanged
    Local,
    /// Incoming was not newer but touched no critical field, so it was merged
    Merged,
}

/// Result of reconciling one update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub resolved: Camera,
    pub conflict: bool,
    pub resolution: Resolution,
    /// Critical fields where incoming disagreed with local
    pub conflicting_fields: Vec<CameraField>,
}

/// Fields whose disagreement blocks an update that is not provably newer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSchema {
    critical_fields: Vec<CameraField>,
}

impl Default for ReconcileSchema {
    fn default() -> Self {
        Self {
            critical_fields: vec![
                CameraField::Status,
                CameraField::IsRecording,
                CameraField::DetectionEnabled,
                CameraField::LastHeartbeatAt,
            ],
        }
    }
}

impl ReconcileSchema {
    pub fn new(critical_fields: impl IntoIterator<Item = CameraField>) -> Self {
        let mut fields: Vec<CameraField> = Vec::new();
        for field in critical_fields {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        Self {
            critical_fields: fields,
        }
    }

    pub fn critical_fields(&self) -> &[CameraField] {
        &self.critical_fields
    }

    /// Reconcile `incoming` against `local`.
    ///
    /// `incoming_timestamp` is the source's notion of when the update was
    /// produced; when absent, `incoming.last_updated_at` is used.
    pub fn reconcile(
        &self,
        local: &Camera,
        incoming: &CameraPatch,
        incoming_timestamp: Option<i64>,
    ) -> Reconciliation {
        let incoming_timestamp = incoming_timestamp.or(incoming.last_updated_at);
        let incoming_is_newer = is_newer(local, incoming, incoming_timestamp);
        let conflicting_fields: Vec<CameraField> = self
            .critical_fields
            .iter()
            .copied()
            .filter(|field| incoming.differs(*field, local))
            .collect();

        let stale_version = matches!(
            (incoming.version, local.version),
            (Some(incoming_version), Some(local_version)) if incoming_version < local_version
        );

        if stale_version || (!conflicting_fields.is_empty() && !incoming_is_newer) {
            return Reconciliation {
                resolved: local.clone(),
                conflict: true,
                resolution: Resolution::Local,
                conflicting_fields,
            };
        }

        Reconciliation {
            resolved: merge(local, incoming, incoming_timestamp),
            conflict: false,
            resolution: if incoming_is_newer {
                Resolution::Incoming
            } else {
                Resolution::Merged
            },
            conflicting_fields,
        }
    }
}

/// Reconcile with the default critical-field schema.
pub fn reconcile(
    local: &Camera,
    incoming: &CameraPatch,
    incoming_timestamp: Option<i64>,
) -> Reconciliation {
    ReconcileSchema::default().reconcile(local, incoming, incoming_timestamp)
}

fn is_newer(local: &Camera, incoming: &CameraPatch, incoming_timestamp: Option<i64>) -> bool {
    if let (Some(incoming_version), Some(local_version)) = (incoming.version, local.version) {
        if incoming_version != local_version {
            return incoming_version > local_version;
        }
    }

    match (incoming_timestamp, local.last_updated_at) {
        (Some(incoming_ts), Some(local_ts)) => incoming_ts > local_ts,
        (Some(_), None) => true,
        _ => false,
    }
}

fn merge(local: &Camera, incoming: &CameraPatch, incoming_timestamp: Option<i64>) -> Camera {
    let mut resolved = local.clone();

    if let Some(name) = &incoming.name {
        resolved.name.clone_from(name);
    }
    if let Some(status) = incoming.status {
        resolved.status = status;
    }
    if let Some(is_recording) = incoming.is_recording {
        resolved.is_recording = is_recording;
    }
    if let Some(detection_enabled) = incoming.detection_enabled {
        resolved.detection_enabled = detection_enabled;
    }
    if let Some(heartbeat) = incoming.last_heartbeat_at {
        resolved.last_heartbeat_at = Some(heartbeat);
    }
    if let Some(stream_url) = &incoming.stream_url {
        resolved.stream_url = Some(stream_url.clone());
    }

    resolved.version = max_option(local.version, incoming.version);
    resolved.last_updated_at = max_option(local.last_updated_at, incoming_timestamp);

    let status_changed = resolved.status != local.status;
    if status_changed {
        resolved.last_status_change_at = incoming
            .last_status_change_at
            .or(incoming_timestamp)
            .or(local.last_status_change_at);
    } else {
        resolved.last_status_change_at =
            max_option(local.last_status_change_at, incoming.last_status_change_at);
    }

    let went_dark = local.status.is_healthy() && resolved.status.is_degraded();
    resolved.last_known_state = match (&incoming.last_known_state, &local.last_known_state) {
        (Some(supplied), _) if went_dark => Some(supplied.clone()),
        (None, _) if went_dark => {
            let captured_at = incoming_timestamp
                .or(local.last_updated_at)
                .unwrap_or_default();
            Some(local.snapshot(captured_at))
        }
        _ if resolved.status.is_healthy() => None,
        (Some(supplied), Some(existing)) if supplied.captured_at > existing.captured_at => {
            Some(supplied.clone())
        }
        (Some(supplied), None) => Some(supplied.clone()),
        (_, existing) => existing.clone(),
    };

    resolved
}

fn max_option<T: Ord>(left: Option<T>, right: Option<T>) -> Option<T> {
    match (left, right) {
        (Some(left), Some(right)) => Some(left.max(right)),
        (left, right) => left.or(right),
    }
}
