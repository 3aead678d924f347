//! Data models for Watchpost

mod camera;
mod operation;

pub use camera::{Camera, CameraField, CameraPatch, CameraSnapshot, CameraStatus};
pub use operation::{OperationId, OperationKind, OperationPayload, QueuedOperation, SyncStatus};
