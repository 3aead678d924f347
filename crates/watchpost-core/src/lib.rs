//! watchpost-core - client resilience layer for the Watchpost dashboard
//!
//! Keeps locally displayed camera state correct and user actions durable on
//! an unreliable network: an offline operation queue that replays failed
//! mutations with backoff, a reconciliation engine that merges push and REST
//! updates, and a media session controller that keeps live feeds alive.

pub mod clock;
pub mod config;
pub mod error;
pub mod fault;
pub mod media;
pub mod models;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod util;

pub use config::ResilienceConfig;
pub use error::{Error, Result};
pub use models::{Camera, CameraPatch, OperationId, OperationKind, QueuedOperation};
pub use queue::OfflineQueue;
pub use state::SyncState;
