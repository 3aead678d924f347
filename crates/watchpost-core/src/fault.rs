//! Failure classification shared by queue replays and media faults.

use serde::{Deserialize, Serialize};

/// How a failure should be treated by retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultClass {
    /// Client-caused; retrying will fail the same way.
    Unrecoverable,
    /// Transport failure without a usable status code.
    RetryableNetwork,
    /// Server-side failure (5xx).
    RetryableServer,
}

impl FaultClass {
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Unrecoverable)
    }
}

/// Map an optional HTTP-like status code to a fault class.
///
/// Statuses outside `[400, 600)` are treated as network-level oddities and
/// stay retryable.
pub const fn classify_status(status: Option<u16>) -> FaultClass {
    match status {
        Some(400..=499) => FaultClass::Unrecoverable,
        Some(500..=599) => FaultClass::RetryableServer,
        _ => FaultClass::RetryableNetwork,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_ranges() {
        assert_eq!(classify_status(Some(400)), FaultClass::Unrecoverable);
        assert_eq!(classify_status(Some(403)), FaultClass::Unrecoverable);
        assert_eq!(classify_status(Some(499)), FaultClass::Unrecoverable);
        assert_eq!(classify_status(Some(500)), FaultClass::RetryableServer);
        assert_eq!(classify_status(Some(503)), FaultClass::RetryableServer);
        assert_eq!(classify_status(None), FaultClass::RetryableNetwork);
        assert_eq!(classify_status(Some(302)), FaultClass::RetryableNetwork);
    }

    #[test]
    fn only_client_errors_are_terminal() {
        assert!(!FaultClass::Unrecoverable.is_retryable());
        assert!(FaultClass::RetryableServer.is_retryable());
        assert!(FaultClass::RetryableNetwork.is_retryable());
    }
}
