use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::models::{HelpRequestRecord, VolunteerRecord};
use crate::services::feed::{FeedError, HelpRequestFeed, VolunteerFeed};

/// Collection IDs in the data store
#[derive(Debug, Clone)]
pub struct StoreCollections {
    pub help_requests: String,
    pub volunteers: String,
}

/// Data store API client
///
/// Reads the help request and volunteer collections. Both are fetched whole
/// each cycle; the store returns `{ "total": n, "documents": [...] }`.
pub struct StoreClient {
    base_url: String,
    api_key: String,
    project_id: String,
    database_id: String,
    page_limit: u32,
    client: Client,
    collections: StoreCollections,
}

impl StoreClient {
    /// Create a new data store client
    pub fn new(
        base_url: String,
        api_key: String,
        project_id: String,
        database_id: String,
        collections: StoreCollections,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url,
            api_key,
            project_id,
            database_id,
            page_limit: 5000,
            client,
            collections,
        })
    }

    /// Cap on documents requested per collection fetch
    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit;
        self
    }

    fn documents_url(&self, collection: &str, offset: u64) -> String {
        let query_json = format!(r#"["limit({})","offset({})"]"#, self.page_limit, offset);

        format!(
            "{}/databases/{}/collections/{}/documents?query={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.database_id),
            urlencoding::encode(collection),
            urlencoding::encode(&query_json)
        )
    }

    async fn fetch_page(&self, collection: &str, offset: u64) -> Result<Value, FeedError> {
        let url = self.documents_url(collection, offset);

        tracing::debug!("Fetching documents from: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Store-Key", &self.api_key)
            .header("X-Store-Project", &self.project_id)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Unable to read body".to_string());
            tracing::warn!("Failed to list {}: {} - {}", collection, status, body);
            return Err(FeedError::Api(format!("Failed to list {}: {}", collection, status)));
        }

        Ok(response.json().await?)
    }

    /// Fetch every document of a collection, one page at a time
    ///
    /// Documents without a usable id are skipped. A listing that ends before
    /// the reported `total` is an error, never a short snapshot.
    async fn list_documents<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, FeedError> {
        let mut records: Vec<T> = Vec::new();
        let mut received: u64 = 0;

        loop {
            let json = self.fetch_page(collection, received).await?;
            let total = json.get("total").and_then(|t| t.as_u64());

            let documents = json
                .get("documents")
                .and_then(|d| d.as_array())
                .ok_or_else(|| FeedError::InvalidResponse("Missing documents array".into()))?;

            for doc in documents {
                let data = doc.get("data").unwrap_or(doc);
                match serde_json::from_value(data.clone()) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!("Skipping document without an id in {}: {}", collection, e),
                }
            }
            received += documents.len() as u64;

            let done = match total {
                Some(total) if received >= total => true,
                Some(total) if documents.is_empty() => {
                    return Err(FeedError::InvalidResponse(format!(
                        "{} listing ended at {} of {} documents",
                        collection, received, total
                    )));
                }
                Some(_) => false,
                None => documents.is_empty() || (documents.len() as u64) < u64::from(self.page_limit),
            };

            if done {
                break;
            }
        }

        tracing::debug!("Fetched {} documents from {} ({} listed)", records.len(), collection, received);

        Ok(records)
    }
}

#[async_trait]
impl HelpRequestFeed for StoreClient {
    async fn fetch_help_requests(&self) -> Result<Vec<HelpRequestRecord>, FeedError> {
        self.list_documents(&self.collections.help_requests).await
    }
}

#[async_trait]
impl VolunteerFeed for StoreClient {
    async fn fetch_volunteers(&self) -> Result<Vec<VolunteerRecord>, FeedError> {
        self.list_documents(&self.collections.volunteers).await
    }
}
