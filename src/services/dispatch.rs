use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::NotificationEvent;

/// Errors that can occur when delivering a notification
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Notification channel closed")]
    Closed,
}

/// Receives notification events for newly matched pairs
///
/// A returned error leaves the pair unmarked so it is offered again on the
/// next cycle.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), DispatchError>;
}

/// Writes each notification as a structured log event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl DispatchSink for LogSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), DispatchError> {
        tracing::info!(
            event_id = %event.id,
            volunteer_id = %event.proximity_match.volunteer_id,
            help_request_id = %event.proximity_match.help_request_id,
            distance_meters = event.proximity_match.distance_meters,
            category = %event.category,
            "Volunteer within range of help request"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a push gateway
pub struct WebhookSink {
    url: String,
    client: Client,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl DispatchSink for WebhookSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), DispatchError> {
        let response = self.client.post(&self.url).json(event).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected(format!("{}: {}", status, body)));
        }

        tracing::debug!("Delivered notification {} to webhook", event.id);
        Ok(())
    }
}

/// Forwards notifications into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<NotificationEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<NotificationEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end of its stream
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DispatchSink for ChannelSink {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), DispatchError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProximityMatch;
    use chrono::Utc;
    use uuid::Uuid;

    fn event() -> NotificationEvent {
        NotificationEvent {
            id: Uuid::new_v4(),
            proximity_match: ProximityMatch {
                volunteer_id: "v1".to_string(),
                help_request_id: "h1".to_string(),
                distance_meters: 12.5,
            },
            category: "shelter".to_string(),
            volunteer_name: Some("Sam".to_string()),
            volunteer_phone: Some("5550001111".to_string()),
            emitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel(4);
        let sent = event();

        sink.notify(&sent).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, sent.id);
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);

        assert!(matches!(sink.notify(&event()).await, Err(DispatchError::Closed)));
    }

    #[tokio::test]
    async fn test_log_sink_never_fails() {
        assert!(LogSink.notify(&event()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_sink_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/notify")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"match": {"volunteerId": "v1", "helpRequestId": "h1"}, "category": "shelter"}"#.to_string(),
            ))
            .with_status(202)
            .create_async()
            .await;

        let sink = WebhookSink::new(format!("{}/notify", server.url()), Duration::from_secs(5)).unwrap();
        sink.notify(&event()).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_sink_rejects_non_success() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/notify")
            .with_status(503)
            .with_body("device unreachable")
            .create_async()
            .await;

        let sink = WebhookSink::new(format!("{}/notify", server.url()), Duration::from_secs(5)).unwrap();
        let result = sink.notify(&event()).await;

        match result {
            Err(DispatchError::Rejected(message)) => assert!(message.contains("device unreachable")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }
}
