use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{HelpRequestRecord, VolunteerRecord};

/// Errors that can occur when pulling a data feed snapshot
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    Api(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Feed timed out after {0:?}")]
    Timeout(Duration),

    #[error("Feed unavailable: {0}")]
    Unavailable(String),
}

/// Source of the current help request snapshot
#[async_trait]
pub trait HelpRequestFeed: Send + Sync {
    async fn fetch_help_requests(&self) -> Result<Vec<HelpRequestRecord>, FeedError>;
}

/// Source of the current volunteer snapshot
#[async_trait]
pub trait VolunteerFeed: Send + Sync {
    async fn fetch_volunteers(&self) -> Result<Vec<VolunteerRecord>, FeedError>;
}

#[derive(Debug, Default)]
struct MemoryFeedState {
    help_requests: Vec<HelpRequestRecord>,
    volunteers: Vec<VolunteerRecord>,
    help_requests_down: bool,
    volunteers_down: bool,
    delay: Option<Duration>,
}

/// In-memory feed for embedding and tests
///
/// Serves whatever snapshot was last set; either side can be switched to
/// fail, and an artificial delay can be added to every fetch.
#[derive(Debug, Default)]
pub struct MemoryFeed {
    state: RwLock<MemoryFeedState>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_help_requests(&self, records: Vec<HelpRequestRecord>) {
        self.state.write().await.help_requests = records;
    }

    pub async fn set_volunteers(&self, records: Vec<VolunteerRecord>) {
        self.state.write().await.volunteers = records;
    }

    pub async fn set_help_requests_down(&self, down: bool) {
        self.state.write().await.help_requests_down = down;
    }

    pub async fn set_volunteers_down(&self, down: bool) {
        self.state.write().await.volunteers_down = down;
    }

    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().await.delay = delay;
    }

    async fn pause(&self) {
        let delay = self.state.read().await.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl HelpRequestFeed for MemoryFeed {
    async fn fetch_help_requests(&self) -> Result<Vec<HelpRequestRecord>, FeedError> {
        self.pause().await;
        let state = self.state.read().await;
        if state.help_requests_down {
            return Err(FeedError::Unavailable("help requests feed is down".into()));
        }
        Ok(state.help_requests.clone())
    }
}

#[async_trait]
impl VolunteerFeed for MemoryFeed {
    async fn fetch_volunteers(&self) -> Result<Vec<VolunteerRecord>, FeedError> {
        self.pause().await;
        let state = self.state.read().await;
        if state.volunteers_down {
            return Err(FeedError::Unavailable("volunteers feed is down".into()));
        }
        Ok(state.volunteers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_feed_serves_snapshot() {
        let feed = MemoryFeed::new();
        feed.set_volunteers(vec![VolunteerRecord {
            id: "v1".to_string(),
            location: Some("1.0, 1.0".to_string()),
            name: None,
            phone: None,
            registered_at: None,
        }])
        .await;

        assert_eq!(feed.fetch_volunteers().await.unwrap().len(), 1);
        assert!(feed.fetch_help_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_feed_failure_toggle() {
        let feed = MemoryFeed::new();
        feed.set_help_requests_down(true).await;

        assert!(matches!(feed.fetch_help_requests().await, Err(FeedError::Unavailable(_))));
        assert!(feed.fetch_volunteers().await.is_ok());
    }
}
