//! Remote mutation API used to replay queued operations.

mod http;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::fault::{classify_status, FaultClass};
use crate::models::QueuedOperation;

pub use http::{HttpMutationClient, RemoteError, RemoteResult};

/// Why a replay attempt did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFailure {
    pub status: Option<u16>,
    pub class: FaultClass,
    pub message: String,
}

impl ReplayFailure {
    /// Remote answered with a non-success status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            class: classify_status(Some(status)),
            message: message.into(),
        }
    }

    /// Request never got a response.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            class: FaultClass::RetryableNetwork,
            message: message.into(),
        }
    }

    /// The operation cannot be turned into a request at all.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: None,
            class: FaultClass::Unrecoverable,
            message: message.into(),
        }
    }

    pub const fn is_terminal(&self) -> bool {
        !self.class.is_retryable()
    }
}

impl fmt::Display for ReplayFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ReplayFailure {}

/// Performs the remote call a queued operation stands for.
pub trait MutationApi: Send + Sync + 'static {
    fn replay(
        &self,
        operation: &QueuedOperation,
    ) -> impl Future<Output = Result<(), ReplayFailure>> + Send;
}

impl<A: MutationApi> MutationApi for Arc<A> {
    fn replay(
        &self,
        operation: &QueuedOperation,
    ) -> impl Future<Output = Result<(), ReplayFailure>> + Send {
        (**self).replay(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classes_follow_status() {
        assert!(ReplayFailure::http(403, "forbidden").is_terminal());
        assert!(!ReplayFailure::http(503, "unavailable").is_terminal());
        assert!(!ReplayFailure::network("connection reset").is_terminal());
        assert!(ReplayFailure::invalid("missing target").is_terminal());
    }

    #[test]
    fn failure_display_includes_status() {
        assert_eq!(
            ReplayFailure::http(503, "Service Unavailable").to_string(),
            "HTTP 503: Service Unavailable"
        );
        assert_eq!(ReplayFailure::network("timed out").to_string(), "timed out");
    }
}
