//! Camera record, the entity reconciled between push and REST sources

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reported camera health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Online,
    Offline,
    Degraded,
    Maintenance,
    #[default]
    Unknown,
}

impl CameraStatus {
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Online)
    }

    /// Statuses where the live feed is unavailable and the last good state
    /// should be shown instead.
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Offline | Self::Degraded)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Degraded => "degraded",
            Self::Maintenance => "maintenance",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable observable fields of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraField {
    Name,
    Status,
    IsRecording,
    DetectionEnabled,
    LastHeartbeatAt,
    StreamUrl,
}

impl CameraField {
    pub const ALL: [Self; 6] = [
        Self::Name,
        Self::Status,
        Self::IsRecording,
        Self::DetectionEnabled,
        Self::LastHeartbeatAt,
        Self::StreamUrl,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Status => "status",
            Self::IsRecording => "isRecording",
            Self::DetectionEnabled => "detectionEnabled",
            Self::LastHeartbeatAt => "lastHeartbeatAt",
            Self::StreamUrl => "streamUrl",
        }
    }
}

/// Mutable fields captured when a camera last went dark
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSnapshot {
    pub name: String,
    pub status: CameraStatus,
    pub is_recording: bool,
    pub detection_enabled: bool,
    #[serde(default)]
    pub last_heartbeat_at: Option<i64>,
    #[serde(default)]
    pub stream_url: Option<String>,
    /// When the snapshot was taken (Unix ms)
    pub captured_at: i64,
}

/// A camera as held by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    pub id: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub last_updated_at: Option<i64>,
    #[serde(default)]
    pub last_status_change_at: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: CameraStatus,
    #[serde(default)]
    pub is_recording: bool,
    #[serde(default)]
    pub detection_enabled: bool,
    #[serde(default)]
    pub last_heartbeat_at: Option<i64>,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub last_known_state: Option<CameraSnapshot>,
}

impl Camera {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            last_updated_at: None,
            last_status_change_at: None,
            name: name.into(),
            status: CameraStatus::Unknown,
            is_recording: false,
            detection_enabled: false,
            last_heartbeat_at: None,
            stream_url: None,
            last_known_state: None,
        }
    }

    /// Capture the current mutable fields.
    pub fn snapshot(&self, captured_at: i64) -> CameraSnapshot {
        CameraSnapshot {
            name: self.name.clone(),
            status: self.status,
            is_recording: self.is_recording,
            detection_enabled: self.detection_enabled,
            last_heartbeat_at: self.last_heartbeat_at,
            stream_url: self.stream_url.clone(),
            captured_at,
        }
    }
}

/// Partial camera update from a push message or REST refresh
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_change_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CameraStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_recording: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_state: Option<CameraSnapshot>,
}

impl CameraPatch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Whether `field` is present here and differs from `camera`.
    pub fn differs(&self, field: CameraField, camera: &Camera) -> bool {
        match field {
            CameraField::Name => self.name.as_ref().is_some_and(|v| *v != camera.name),
            CameraField::Status => self.status.is_some_and(|v| v != camera.status),
            CameraField::IsRecording => self.is_recording.is_some_and(|v| v != camera.is_recording),
            CameraField::DetectionEnabled => self
                .detection_enabled
                .is_some_and(|v| v != camera.detection_enabled),
            CameraField::LastHeartbeatAt => self
                .last_heartbeat_at
                .is_some_and(|v| Some(v) != camera.last_heartbeat_at),
            CameraField::StreamUrl => self
                .stream_url
                .as_ref()
                .is_some_and(|v| Some(v) != camera.stream_url.as_ref()),
        }
    }

    /// Build a full camera when the patch carries at least a status.
    pub fn into_camera(self) -> Option<Camera> {
        let status = self.status?;
        let name = self.name.unwrap_or_else(|| self.id.clone());
        Some(Camera {
            id: self.id,
            version: self.version,
            last_updated_at: self.last_updated_at,
            last_status_change_at: self.last_status_change_at,
            name,
            status,
            is_recording: self.is_recording.unwrap_or(false),
            detection_enabled: self.detection_enabled.unwrap_or(false),
            last_heartbeat_at: self.last_heartbeat_at,
            stream_url: self.stream_url,
            last_known_state: self.last_known_state,
        })
    }
}

impl From<Camera> for CameraPatch {
    fn from(camera: Camera) -> Self {
        Self {
            id: camera.id,
            version: camera.version,
            last_updated_at: camera.last_updated_at,
            last_status_change_at: camera.last_status_change_at,
            name: Some(camera.name),
            status: Some(camera.status),
            is_recording: Some(camera.is_recording),
            detection_enabled: Some(camera.detection_enabled),
            last_heartbeat_at: camera.last_heartbeat_at,
            stream_url: camera.stream_url,
            last_known_state: camera.last_known_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(CameraStatus::Online.is_healthy());
        assert!(CameraStatus::Offline.is_degraded());
        assert!(CameraStatus::Degraded.is_degraded());
        assert!(!CameraStatus::Maintenance.is_degraded());
        assert!(!CameraStatus::Maintenance.is_healthy());
    }

    #[test]
    fn test_patch_differs_only_for_present_fields() {
        let mut camera = Camera::new("cam-1", "Lobby");
        camera.is_recording = true;

        let patch = CameraPatch {
            is_recording: Some(true),
            status: Some(CameraStatus::Offline),
            ..CameraPatch::new("cam-1")
        };
        assert!(!patch.differs(CameraField::IsRecording, &camera));
        assert!(patch.differs(CameraField::Status, &camera));
        assert!(!patch.differs(CameraField::Name, &camera));
    }

    #[test]
    fn test_patch_deserializes_camel_case() {
        let patch: CameraPatch = serde_json::from_str(
            r#"{"id":"cam-2","isRecording":false,"status":"degraded","version":4}"#,
        )
        .unwrap();
        assert_eq!(patch.is_recording, Some(false));
        assert_eq!(patch.status, Some(CameraStatus::Degraded));
        assert_eq!(patch.version, Some(4));
        assert_eq!(patch.name, None);
    }

    #[test]
    fn test_into_camera_requires_status() {
        assert!(CameraPatch::new("cam-3").into_camera().is_none());

        let camera = CameraPatch {
            status: Some(CameraStatus::Online),
            ..CameraPatch::new("cam-3")
        }
        .into_camera()
        .unwrap();
        assert_eq!(camera.name, "cam-3");
        assert_eq!(camera.status, CameraStatus::Online);
    }
}
