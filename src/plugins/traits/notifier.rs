use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{DeliveryTarget, Listing};
use crate::Result;

/// A fully rendered message ready for the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: String,
    pub thread_id: Option<i64>,
    pub text: String,
}

/// Delivers one listing to one target.
///
/// Implementations own their pacing and retry policy; an `Err` means the
/// message was not delivered after that policy ran its course.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, listing: &Listing, target: &DeliveryTarget) -> Result<()>;
}

/// Raw single-shot send, no pacing and no retries.
///
/// Rate-limit replies must surface as `AppError::RateLimited`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()>;
}

#[async_trait]
impl<T: MessageTransport + ?Sized> MessageTransport for std::sync::Arc<T> {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
        (**self).send_message(message).await
    }
}
