//! Queued operation model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Mutation kind; each maps to one remote API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    /// Partial update of an entity's fields
    EntityUpdate,
    /// Flip a single boolean flag (recording, detection)
    ToggleFlag,
    /// Change an entity's status
    StatusChange,
    /// Apply the same settings to many entities
    BulkSettingsUpdate,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EntityUpdate => "entity-update",
            Self::ToggleFlag => "toggle-flag",
            Self::StatusChange => "status-change",
            Self::BulkSettingsUpdate => "bulk-settings-update",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "entity-update" => Ok(Self::EntityUpdate),
            "toggle-flag" => Ok(Self::ToggleFlag),
            "status-change" => Ok(Self::StatusChange),
            "bulk-settings-update" => Ok(Self::BulkSettingsUpdate),
            other => Err(format!("unknown operation type: {other}")),
        }
    }
}

/// Parameters needed to replay a mutation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPayload {
    /// Target entity (empty for bulk operations)
    #[serde(default)]
    pub target_id: String,
    /// Targets of a bulk operation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_ids: Vec<String>,
    /// Partial fields to apply
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl OperationPayload {
    pub fn for_target(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            ..Self::default()
        }
    }

    pub fn for_targets<I, T>(target_ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            target_ids: target_ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Replay state of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Waiting for (re)play
    #[default]
    Pending,
    /// Replayed successfully; removed from the store on the same write
    Synced,
    /// Terminal until a user resets it
    Failed,
}

/// A mutation that failed and must be replayed later
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: OperationId,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub payload: OperationPayload,
    /// Creation timestamp (Unix ms)
    pub queued_at: i64,
    pub sync_status: SyncStatus,
    pub retry_count: u32,
    /// Most recent attempt (Unix ms), 0 before the first attempt
    pub last_retry_at: i64,
    #[serde(default, rename = "error", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Create a new pending operation
    #[must_use]
    pub fn new(kind: OperationKind, payload: OperationPayload, queued_at: i64) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            payload,
            queued_at,
            sync_status: SyncStatus::Pending,
            retry_count: 0,
            last_retry_at: 0,
            last_error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    pub fn is_failed(&self) -> bool {
        self.sync_status == SyncStatus::Failed
    }

    /// Put a failed operation back in line as if freshly queued.
    pub fn reset(&mut self) {
        self.sync_status = SyncStatus::Pending;
        self.retry_count = 0;
        self.last_retry_at = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_operation_id_unique_and_parse() {
        let id1 = OperationId::new();
        let id2 = OperationId::new();
        assert_ne!(id1, id2);
        let parsed: OperationId = id1.as_str().parse().unwrap();
        assert_eq!(id1, parsed);
    }

    #[test]
    fn test_new_operation_defaults() {
        let op = QueuedOperation::new(
            OperationKind::ToggleFlag,
            OperationPayload::for_target("cam-1").with_field("isRecording", true),
            1_000,
        );
        assert!(op.is_pending());
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.last_retry_at, 0);
        assert_eq!(op.last_error, None);
    }

    #[test]
    fn test_record_json_shape() {
        let mut op = QueuedOperation::new(
            OperationKind::StatusChange,
            OperationPayload::for_target("cam-7").with_field("status", "maintenance"),
            42,
        );
        op.last_error = Some("HTTP 503".to_string());

        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], json!("status-change"));
        assert_eq!(value["payload"]["targetId"], json!("cam-7"));
        assert_eq!(value["payload"]["fields"]["status"], json!("maintenance"));
        assert_eq!(value["queuedAt"], json!(42));
        assert_eq!(value["syncStatus"], json!("pending"));
        assert_eq!(value["retryCount"], json!(0));
        assert_eq!(value["lastRetryAt"], json!(0));
        assert_eq!(value["error"], json!("HTTP 503"));
        assert!(value["payload"].get("targetIds").is_none());
    }

    #[test]
    fn test_reset_clears_retry_state() {
        let mut op = QueuedOperation::new(
            OperationKind::EntityUpdate,
            OperationPayload::for_target("cam-1"),
            0,
        );
        op.sync_status = SyncStatus::Failed;
        op.retry_count = 5;
        op.last_retry_at = 99;
        op.reset();
        assert_eq!(op.sync_status, SyncStatus::Pending);
        assert_eq!((op.retry_count, op.last_retry_at), (0, 0));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(
            "bulk-settings-update".parse::<OperationKind>().unwrap(),
            OperationKind::BulkSettingsUpdate
        );
        assert!("delete".parse::<OperationKind>().is_err());
    }
}
