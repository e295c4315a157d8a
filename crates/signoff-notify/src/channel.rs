//! Delivery channels
//!
//! A channel is a thin adapter over an external transport (SMTP relay, SMS
//! gateway, push provider, in-app inbox). Transports live outside this
//! crate; the implementations here are a log-only placeholder and a
//! recording fake for tests.

use crate::stage::MessageContent;
use crate::{NotifyError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use signoff_core::UserId;
use tokio::sync::RwLock;
use tracing::info;

/// The transport a notification travels over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    InApp,
    Push,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::InApp => "in_app",
            ChannelKind::Push => "push",
        }
    }

    /// Parse a configured channel name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "email" => Some(ChannelKind::Email),
            "sms" => Some(ChannelKind::Sms),
            "in_app" => Some(ChannelKind::InApp),
            "push" => Some(ChannelKind::Push),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One delivery transport
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Attempt delivery to a single recipient. Errors are recorded by the
    /// dispatcher and never affect other channels or recipients.
    async fn deliver(&self, recipient: &UserId, message: &MessageContent) -> Result<()>;
}

/// Log-only channel, useful until a real transport is wired in
#[derive(Debug, Clone)]
pub struct TracingChannel {
    kind: ChannelKind,
}

impl TracingChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl NotificationChannel for TracingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn deliver(&self, recipient: &UserId, message: &MessageContent) -> Result<()> {
        info!(
            channel = self.kind.as_str(),
            recipient = %recipient,
            subject = %message.subject,
            "Notification delivered"
        );
        Ok(())
    }
}

/// A sent message captured by [`InMemoryChannel`]
#[derive(Debug, Clone)]
pub struct CapturedMessage {
    pub recipient: UserId,
    pub content: MessageContent,
}

/// Recording channel for tests, with optional failure injection
#[derive(Debug)]
pub struct InMemoryChannel {
    kind: ChannelKind,
    sent: RwLock<Vec<CapturedMessage>>,
    fail: RwLock<bool>,
}

impl InMemoryChannel {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            sent: RwLock::new(Vec::new()),
            fail: RwLock::new(false),
        }
    }

    /// Make every subsequent delivery fail
    pub async fn set_failing(&self, failing: bool) {
        *self.fail.write().await = failing;
    }

    pub async fn sent(&self) -> Vec<CapturedMessage> {
        self.sent.read().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }
}

#[async_trait]
impl NotificationChannel for InMemoryChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn deliver(&self, recipient: &UserId, message: &MessageContent) -> Result<()> {
        if *self.fail.read().await {
            return Err(NotifyError::Delivery("injected failure".to_string()));
        }
        self.sent.write().await.push(CapturedMessage {
            recipient: *recipient,
            content: message.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_parse() {
        assert_eq!(ChannelKind::parse("email"), Some(ChannelKind::Email));
        assert_eq!(ChannelKind::parse("in_app"), Some(ChannelKind::InApp));
        assert_eq!(ChannelKind::parse("carrier_pigeon"), None);
    }

    #[tokio::test]
    async fn test_in_memory_channel_records() {
        let channel = InMemoryChannel::new(ChannelKind::Email);
        let recipient = UserId::new();
        let message = MessageContent {
            subject: "s".to_string(),
            body: "b".to_string(),
        };

        channel.deliver(&recipient, &message).await.unwrap();

        let sent = channel.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, recipient);
    }

    #[tokio::test]
    async fn test_in_memory_channel_failure_injection() {
        let channel = InMemoryChannel::new(ChannelKind::Sms);
        channel.set_failing(true).await;

        let result = channel
            .deliver(
                &UserId::new(),
                &MessageContent {
                    subject: "s".to_string(),
                    body: "b".to_string(),
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(channel.sent_count().await, 0);
    }
}
