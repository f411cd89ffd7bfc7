//! Delivery of single records to a remote endpoint

use std::future::Future;
use std::time::Duration;

use crate::models::Record;

/// Default time allowed for one delivery attempt
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(8000);

/// Pushes one record to an endpoint
///
/// Implementations report failure as `false` and never return an error; the
/// pending queue is the only recovery path.
pub trait SyncClient: Send + Sync {
    fn send<R: Record>(&self, endpoint: &str, record: &R) -> impl Future<Output = bool> + Send;
}

/// `SyncClient` that POSTs the record as JSON
#[derive(Debug, Clone)]
pub struct HttpSyncClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpSyncClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            timeout,
        })
    }
}

impl SyncClient for HttpSyncClient {
    async fn send<R: Record>(&self, endpoint: &str, record: &R) -> bool {
        let collection = R::COLLECTION;
        let id = record.id();

        // The timer races the request; a request that loses is dropped, not
        // cancelled remotely.
        let request = self.client.post(endpoint).json(record).send();
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) if response.status().is_success() => {
                tracing::debug!(%collection, id, endpoint, status = %response.status(), "Delivered");
                true
            }
            Ok(Ok(response)) => {
                tracing::warn!(%collection, id, endpoint, status = %response.status(), "Delivery rejected");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(%collection, id, endpoint, error = %e, "Delivery failed");
                false
            }
            Err(_) => {
                tracing::warn!(
                    %collection,
                    id,
                    endpoint,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Delivery timed out"
                );
                false
            }
        }
    }
}
