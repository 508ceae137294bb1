//! Document fetch adapters.
//!
//! The HTTP fetcher resolves a document URI with a GET and decodes the JSON
//! body. Every failure mode maps to a retryable [`FetchError`]; the caller
//! leaves the inbox row unconsumed and tries again on a later tick.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use outpost_domain::document::{Document, DocumentFetcher, FetchError};

/// reqwest-backed [`DocumentFetcher`].
pub struct HttpDocumentFetcher {
    client: reqwest::Client,
}

impl HttpDocumentFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with static configuration");
        Self { client }
    }
}

impl Default for HttpDocumentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, uri: &str) -> Result<Document, FetchError> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                uri: uri.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<Document>()
            .await
            .map_err(|e| FetchError::Decode {
                uri: uri.to_string(),
                message: e.to_string(),
            })
    }
}

/// In-memory [`DocumentFetcher`] backed by a URI map.
///
/// Used by the test suites in place of a live publisher endpoint; records
/// request order and can be told to fail individual URIs.
#[derive(Default)]
pub struct InMemoryDocumentFetcher {
    documents: Mutex<HashMap<String, Document>>,
    failing: Mutex<HashSet<String>>,
    requests: Mutex<Vec<String>>,
}

impl InMemoryDocumentFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `document` for `uri`.
    pub fn insert(&self, uri: impl Into<String>, document: Document) {
        self.documents.lock().unwrap().insert(uri.into(), document);
    }

    /// Make fetches of `uri` fail with a transport error.
    pub fn fail(&self, uri: impl Into<String>) {
        self.failing.lock().unwrap().insert(uri.into());
    }

    /// Stop failing fetches of `uri`.
    pub fn recover(&self, uri: &str) {
        self.failing.lock().unwrap().remove(uri);
    }

    /// URIs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentFetcher for InMemoryDocumentFetcher {
    async fn fetch(&self, uri: &str) -> Result<Document, FetchError> {
        self.requests.lock().unwrap().push(uri.to_string());

        if self.failing.lock().unwrap().contains(uri) {
            return Err(FetchError::Transport {
                uri: uri.to_string(),
                message: "connection refused".to_string(),
            });
        }

        match self.documents.lock().unwrap().get(uri) {
            Some(document) => Ok(document.clone()),
            None => Err(FetchError::Status {
                uri: uri.to_string(),
                status: 404,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_in_memory_fetcher_serves_and_fails() {
        let fetcher = InMemoryDocumentFetcher::new();
        let document = Document {
            id: Uuid::new_v4(),
            content: "body".to_string(),
        };
        fetcher.insert("http://pub/documents/1", document.clone());

        let fetched = fetcher.fetch("http://pub/documents/1").await.unwrap();
        assert_eq!(fetched, document);

        let missing = fetcher.fetch("http://pub/documents/2").await;
        assert!(matches!(missing, Err(FetchError::Status { status: 404, .. })));

        fetcher.fail("http://pub/documents/1");
        let failed = fetcher.fetch("http://pub/documents/1").await;
        assert!(matches!(failed, Err(FetchError::Transport { .. })));

        fetcher.recover("http://pub/documents/1");
        assert!(fetcher.fetch("http://pub/documents/1").await.is_ok());

        assert_eq!(fetcher.requests().len(), 4);
    }
}
