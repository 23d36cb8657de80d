//! Subscription Backend Port (Driven Port)
//!
//! The REST calls that tell the backend which instruments to stream, and
//! the authoritative list it reports back.

use async_trait::async_trait;

use crate::domain::instrument::InstrumentKey;
use crate::domain::subscription::DeliveryMode;

/// A REST call to the backend failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Response body was not the expected JSON.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request URL could not be built.
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    /// Backend answered 2xx but reported `ok: false`.
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

impl RequestError {
    /// HTTP status code, if the backend answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Port for informing the backend of subscription intent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionBackend: Send + Sync {
    /// Ask the backend to stream these instruments.
    async fn subscribe(
        &self,
        keys: &[InstrumentKey],
        mode: DeliveryMode,
    ) -> Result<(), RequestError>;

    /// Ask the backend to stop streaming these instruments.
    async fn unsubscribe(&self, keys: &[InstrumentKey]) -> Result<(), RequestError>;

    /// The backend's authoritative subscription list.
    async fn subscriptions(&self) -> Result<Vec<InstrumentKey>, RequestError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_accessor() {
        let err = RequestError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.to_string(), "HTTP 500: boom");
        assert_eq!(RequestError::Network("reset".to_string()).status(), None);
    }
}
