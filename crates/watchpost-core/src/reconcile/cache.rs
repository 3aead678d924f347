//! Client-side camera cache fed by push messages and REST refreshes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Camera, CameraPatch};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

use super::{ReconcileSchema, Resolution};

/// Where an update came from. Only used for logging; the merge is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Push,
    Refresh,
}

/// Push-channel message carrying a partial camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope {
    pub entity: CameraPatch,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl PushEnvelope {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// What applying one update did to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub id: String,
    /// `None` when the update was inserted or ignored without reconciling
    pub resolution: Option<Resolution>,
    pub inserted: bool,
    pub changed: bool,
}

/// Holds the current cameras and runs every incoming update through the
/// reconciliation engine.
pub struct EntityCache<T: TelemetrySink> {
    cameras: BTreeMap<String, Camera>,
    schema: ReconcileSchema,
    telemetry: T,
}

impl<T: TelemetrySink> EntityCache<T> {
    pub fn new(telemetry: T) -> Self {
        Self::with_schema(ReconcileSchema::default(), telemetry)
    }

    pub const fn with_schema(schema: ReconcileSchema, telemetry: T) -> Self {
        Self {
            cameras: BTreeMap::new(),
            schema,
            telemetry,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Camera> {
        self.cameras.get(id)
    }

    pub fn cameras(&self) -> impl Iterator<Item = &Camera> {
        self.cameras.values()
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Apply a single partial update.
    pub fn apply(
        &mut self,
        patch: CameraPatch,
        incoming_timestamp: Option<i64>,
        source: UpdateSource,
    ) -> ApplyOutcome {
        let id = patch.id.clone();
        let Some(local) = self.cameras.get(&id) else {
            return self.insert_unknown(patch, source);
        };

        let result = self.schema.reconcile(local, &patch, incoming_timestamp);
        if result.conflict {
            self.telemetry.record(TelemetryEvent::MergeConflict {
                entity_id: id.clone(),
                fields: result
                    .conflicting_fields
                    .iter()
                    .map(|field| field.as_str())
                    .collect(),
            });
        }

        let changed = result.resolved != *local;
        if changed {
            tracing::debug!(
                camera_id = %id,
                ?source,
                resolution = ?result.resolution,
                "camera updated"
            );
            self.cameras.insert(id.clone(), result.resolved);
        }

        ApplyOutcome {
            id,
            resolution: Some(result.resolution),
            inserted: false,
            changed,
        }
    }

    /// Apply a push message; the envelope's version and timestamp fill in
    /// for values the entity itself omits.
    pub fn apply_push(&mut self, envelope: PushEnvelope) -> ApplyOutcome {
        let PushEnvelope {
            mut entity,
            version,
            timestamp,
        } = envelope;
        if entity.version.is_none() {
            entity.version = version;
        }
        self.apply(entity, timestamp, UpdateSource::Push)
    }

    pub fn apply_push_json(&mut self, raw: &str) -> Result<ApplyOutcome> {
        Ok(self.apply_push(PushEnvelope::parse(raw)?))
    }

    /// Apply a full REST listing, entity by entity.
    pub fn apply_refresh(&mut self, cameras: Vec<Camera>) -> Vec<ApplyOutcome> {
        cameras
            .into_iter()
            .map(|camera| self.apply(CameraPatch::from(camera), None, UpdateSource::Refresh))
            .collect()
    }

    fn insert_unknown(&mut self, patch: CameraPatch, source: UpdateSource) -> ApplyOutcome {
        let id = patch.id.clone();
        match patch.into_camera() {
            Some(camera) => {
                self.cameras.insert(id.clone(), camera);
                ApplyOutcome {
                    id,
                    resolution: None,
                    inserted: true,
                    changed: true,
                }
            }
            None => {
                tracing::debug!(camera_id = %id, ?source, "ignoring partial update for unknown camera");
                ApplyOutcome {
                    id,
                    resolution: None,
                    inserted: false,
                    changed: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CameraStatus;
    use crate::telemetry::RecordingTelemetry;

    fn listed_camera(id: &str, version: u64, status: CameraStatus) -> Camera {
        Camera {
            version: Some(version),
            last_updated_at: Some(1_000 * i64::try_from(version).unwrap()),
            status,
            ..Camera::new(id, id.to_uppercase())
        }
    }

    #[test]
    fn refresh_inserts_then_push_updates() {
        let telemetry = RecordingTelemetry::new();
        let mut cache = EntityCache::new(telemetry.clone());

        let outcomes = cache.apply_refresh(vec![
            listed_camera("cam-1", 1, CameraStatus::Online),
            listed_camera("cam-2", 1, CameraStatus::Online),
        ]);
        assert!(outcomes.iter().all(|outcome| outcome.inserted));
        assert_eq!(cache.len(), 2);

        let outcome = cache
            .apply_push_json(
                r#"{"entity":{"id":"cam-1","status":"offline"},"version":2,"timestamp":2000}"#,
            )
            .unwrap();
        assert_eq!(outcome.resolution, Some(Resolution::Incoming));
        assert!(outcome.changed);

        let camera = cache.get("cam-1").unwrap();
        assert_eq!(camera.status, CameraStatus::Offline);
        assert_eq!(camera.version, Some(2));
        assert!(camera.last_known_state.is_some());
        assert!(telemetry.events().is_empty());
    }

    #[test]
    fn stale_refresh_does_not_undo_newer_push() {
        let telemetry = RecordingTelemetry::new();
        let mut cache = EntityCache::new(telemetry.clone());
        cache.apply_refresh(vec![listed_camera("cam-1", 1, CameraStatus::Online)]);

        cache.apply_push(PushEnvelope {
            entity: CameraPatch {
                status: Some(CameraStatus::Offline),
                ..CameraPatch::new("cam-1")
            },
            version: Some(3),
            timestamp: Some(3_000),
        });

        // Listing fetched before the push landed still reports v2/online.
        let outcomes = cache.apply_refresh(vec![listed_camera("cam-1", 2, CameraStatus::Online)]);
        assert_eq!(outcomes[0].resolution, Some(Resolution::Local));
        assert!(!outcomes[0].changed);
        assert_eq!(cache.get("cam-1").unwrap().status, CameraStatus::Offline);
        assert!(matches!(
            telemetry.events().as_slice(),
            [TelemetryEvent::MergeConflict { entity_id, .. }] if entity_id == "cam-1"
        ));
    }

    #[test]
    fn partial_push_for_unknown_camera_is_ignored() {
        let mut cache = EntityCache::new(RecordingTelemetry::new());
        let outcome = cache.apply_push(PushEnvelope {
            entity: CameraPatch {
                is_recording: Some(true),
                ..CameraPatch::new("cam-9")
            },
            version: None,
            timestamp: None,
        });
        assert!(!outcome.inserted);
        assert!(cache.is_empty());
    }

    #[test]
    fn malformed_push_is_an_error() {
        let mut cache = EntityCache::new(RecordingTelemetry::new());
        assert!(cache.apply_push_json("{not json").is_err());
    }
}
