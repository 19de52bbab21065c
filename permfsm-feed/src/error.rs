//! Feed error types.

use thiserror::Error;

/// Errors from feed receivers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The receiver fell behind and the channel dropped events.
    #[error("subscriber lagged, {skipped} events dropped")]
    Lagged { skipped: u64 },

    /// Every sender is gone; no further events will arrive.
    #[error("feed closed")]
    Closed,

    #[error("subscription not found: {subscription_id}")]
    SubscriptionNotFound { subscription_id: String },
}

impl FeedError {
    /// A lagged receiver can keep reading; it only missed events.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Lagged { .. })
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            FeedError::Lagged { .. } => "SUBSCRIBER_LAGGED",
            FeedError::Closed => "FEED_CLOSED",
            FeedError::SubscriptionNotFound { .. } => "NOT_FOUND",
        }
    }
}

impl From<tokio::sync::broadcast::error::RecvError> for FeedError {
    fn from(e: tokio::sync::broadcast::error::RecvError) -> Self {
        use tokio::sync::broadcast::error::RecvError;
        match e {
            RecvError::Lagged(skipped) => FeedError::Lagged { skipped },
            RecvError::Closed => FeedError::Closed,
        }
    }
}
