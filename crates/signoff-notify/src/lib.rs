//! Notification fan-out for the approval engine
//!
//! The engine commits a state transition first, then enqueues a
//! [`NotificationRequest`]; a background worker fans each request out to
//! every recipient on every configured channel. Channel failures are
//! recorded per attempt and never reach the engine. Delivery is
//! best-effort; at-least-once is not guaranteed.

pub mod channel;
pub mod dispatcher;
pub mod stage;

pub use channel::{ChannelKind, InMemoryChannel, NotificationChannel, TracingChannel};
pub use dispatcher::{
    notification_queue, spawn_dispatcher, InMemoryNotificationStore, NotificationDispatcher,
    NotificationRecord, NotificationRequest, NotificationStore,
};
pub use stage::{MessageContent, NotificationStage, StagePayload};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("channel delivery failed: {0}")]
    Delivery(String),

    #[error("notification record not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
