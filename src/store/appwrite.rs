//! Appwrite REST backend for [`DocumentStore`].
//! Transient failures (5xx, timeouts, resets) are retried by reqwest-retry.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::{json, Value};

use super::{Document, DocumentList, DocumentStore, Query, StoreError};

#[derive(Debug, Clone)]
pub struct AppwriteSettings {
    /// e.g. `https://cloud.appwrite.io/v1`
    pub endpoint: String,
    pub project_id: String,
    pub api_key: String,
    pub database_id: String,
}

pub struct AppwriteStore {
    client: ClientWithMiddleware,
    base: String,
    project_id: String,
    api_key: String,
}

impl AppwriteStore {
    pub fn new(settings: &AppwriteSettings) -> Result<Self, StoreError> {
        let endpoint = url::Url::parse(&settings.endpoint)
            .map_err(|e| StoreError::Transport(format!("invalid Appwrite endpoint: {}", e)))?;

        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        // Retries: 3, exponential backoff on transient failures (5xx, timeouts, resets)
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let base = format!(
            "{}/databases/{}/collections",
            endpoint.as_str().trim_end_matches('/'),
            settings.database_id
        );

        Ok(Self {
            client,
            base,
            project_id: settings.project_id.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    fn documents_url(&self, collection: &str) -> String {
        format!("{}/{}/documents", self.base, collection)
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/documents/{}", self.base, collection, id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("x-appwrite-project", &self.project_id)
            .header("x-appwrite-key", &self.api_key)
            .header("content-type", "application/json")
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        collection: &str,
        id: Option<&str>,
    ) -> Result<Vec<u8>, StoreError> {
        let resp = builder.send().await.map_err(|e| {
            tracing::warn!(collection, error = %e, "appwrite request failed after retries");
            StoreError::Transport(e.to_string())
        })?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.unwrap_or_default().to_string(),
            });
        }

        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl DocumentStore for AppwriteStore {
    async fn list(&self, collection: &str, queries: &[Query]) -> Result<DocumentList, StoreError> {
        let params: Vec<(&str, String)> = queries
            .iter()
            .map(|q| ("queries[]", q.to_appwrite().to_string()))
            .collect();

        let builder = self
            .request(Method::GET, &self.documents_url(collection))
            .query(&params);
        let body = self.send(builder, collection, None).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        let builder = self.request(Method::GET, &self.document_url(collection, id));
        let body = self.send(builder, collection, Some(id)).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> Result<Document, StoreError> {
        let payload = json!({ "documentId": id, "data": data });
        let builder = self
            .request(Method::POST, &self.documents_url(collection))
            .body(payload.to_string());
        let body = self.send(builder, collection, Some(id)).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn update(&self, collection: &str, id: &str, data: Value) -> Result<Document, StoreError> {
        let payload = json!({ "data": data });
        let builder = self
            .request(Method::PATCH, &self.document_url(collection, id))
            .body(payload.to_string());
        let body = self.send(builder, collection, Some(id)).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let builder = self.request(Method::DELETE, &self.document_url(collection, id));
        self.send(builder, collection, Some(id)).await?;
        Ok(())
    }
}
