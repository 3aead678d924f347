//! Resilient media session control.
//!
//! One [`MediaSessionController`] per live feed owns the decode session,
//! classifies faults and drives the reconnect backoff. [`FeedRegistry`]
//! keeps one controller per feed id.

mod controller;
mod registry;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fault::{classify_status, FaultClass};
use crate::retry::RetryPolicy;

pub use controller::MediaSessionController;
pub use registry::FeedRegistry;

/// Tags transport callbacks with the session they belong to.
///
/// Bumped whenever the decode session is destroyed or recreated, so late
/// callbacks from an old session are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct SessionEpoch(u64);

impl SessionEpoch {
    pub const fn value(self) -> u64 {
        self.0
    }

    #[must_use]
    const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decode/transport layer driven by the controller.
///
/// Implementations report back through [`MediaSessionController::on_playing`]
/// and [`MediaSessionController::on_fault`] with the epoch they were loaded
/// with.
pub trait MediaTransport: Send + Sync + 'static {
    /// Create a decode session for `url`.
    fn load(&self, url: &str, epoch: SessionEpoch);

    /// Ask the current session to continue loading without recreating it.
    fn resume_loading(&self, epoch: SessionEpoch);

    /// Release the current session, if any.
    fn destroy(&self);
}

impl<T: MediaTransport + ?Sized> MediaTransport for Arc<T> {
    fn load(&self, url: &str, epoch: SessionEpoch) {
        (**self).load(url, epoch);
    }

    fn resume_loading(&self, epoch: SessionEpoch) {
        (**self).resume_loading(epoch);
    }

    fn destroy(&self) {
        (**self).destroy();
    }
}

/// Fault reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFault {
    pub status: Option<u16>,
    pub message: String,
}

impl MediaFault {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub const fn class(&self) -> FaultClass {
        classify_status(self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum MediaState {
    Idle,
    Initializing,
    Playing,
    SoftResuming,
    #[serde(rename_all = "camelCase")]
    Reconnecting {
        delay_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    Unrecoverable {
        feed_id: String,
        status: Option<u16>,
    },
    Exhausted,
    Stopped,
}

impl MediaState {
    /// Whether the controller currently owns a live decode session.
    pub const fn has_session(&self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::Playing | Self::SoftResuming | Self::Reconnecting { .. }
        )
    }
}

/// Coarse status reported upward to the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum FeedStatus {
    Connecting,
    Online,
    Reconnecting,
    /// Automatic retries stopped; a manual retry is offered.
    Exhausted,
    #[serde(rename_all = "camelCase")]
    Unrecoverable {
        feed_id: String,
    },
    Stopped,
}

impl From<&MediaState> for FeedStatus {
    fn from(state: &MediaState) -> Self {
        match state {
            MediaState::Initializing => Self::Connecting,
            MediaState::Playing => Self::Online,
            MediaState::SoftResuming | MediaState::Reconnecting { .. } => Self::Reconnecting,
            MediaState::Exhausted => Self::Exhausted,
            MediaState::Unrecoverable { feed_id, .. } => Self::Unrecoverable {
                feed_id: feed_id.clone(),
            },
            MediaState::Idle | MediaState::Stopped => Self::Stopped,
        }
    }
}

/// Snapshot of a controller's session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSession {
    pub feed_id: String,
    pub source_url: Option<String>,
    pub state: MediaState,
    pub epoch: SessionEpoch,
    pub reconnect_attempts: u32,
    pub current_backoff_ms: u64,
    pub classification: Option<FaultClass>,
    pub soft_resume_attempted: bool,
}

impl MediaSession {
    fn new(feed_id: String) -> Self {
        Self {
            feed_id,
            source_url: None,
            state: MediaState::Idle,
            epoch: SessionEpoch::default(),
            reconnect_attempts: 0,
            current_backoff_ms: 0,
            classification: None,
            soft_resume_attempted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MediaPolicy {
    pub backoff: RetryPolicy,
    /// Scheduled reconnects allowed before the feed is marked exhausted
    pub max_attempts: u32,
}

impl Default for MediaPolicy {
    fn default() -> Self {
        Self {
            backoff: RetryPolicy::new(1_000, 30_000),
            max_attempts: 5,
        }
    }
}
