//! reqwest client for the storage REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::config::StorageConfig;
use crate::error::{AppError, Result};

use super::{BucketInfo, StorageApi, StorageObject};

/// HTTP implementation of [`StorageApi`].
pub struct HttpStorageApi {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl HttpStorageApi {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.service_key)
    }

    /// Turns a non-2xx response into a storage error carrying the body.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Storage(format!(
            "storage API returned {status}: {body}"
        )))
    }
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

#[async_trait]
impl StorageApi for HttpStorageApi {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        debug!("Listing storage buckets");
        let response = self
            .authorize(self.client.get(self.url("bucket")))
            .send()
            .await?;
        let buckets: Vec<BucketInfo> = Self::check(response).await?.json().await?;
        info!(count = buckets.len(), "Listed storage buckets");
        Ok(buckets)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<StorageObject>> {
        debug!(bucket, prefix, "Listing objects");
        let mut body = serde_json::json!({ "prefix": prefix });
        if let Some(limit) = limit {
            body["limit"] = limit.into();
        }
        if let Some(offset) = offset {
            body["offset"] = offset.into();
        }

        let response = self
            .authorize(self.client.post(self.url(&format!("object/list/{bucket}"))))
            .json(&body)
            .send()
            .await?;
        let objects: Vec<StorageObject> = Self::check(response).await?.json().await?;
        info!(bucket, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<()> {
        debug!(bucket, path, size = content.len(), "Uploading object");
        let response = self
            .authorize(self.client.post(self.url(&format!("object/{bucket}/{path}"))))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(content)
            .send()
            .await?;
        Self::check(response).await?;
        info!(bucket, path, "Object uploaded");
        Ok(())
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        debug!(bucket, path, "Downloading object");
        let response = self
            .authorize(self.client.get(self.url(&format!("object/{bucket}/{path}"))))
            .send()
            .await?;
        let bytes = Self::check(response).await?.bytes().await?;
        info!(bucket, path, size = bytes.len(), "Object downloaded");
        Ok(bytes.to_vec())
    }

    async fn delete(&self, bucket: &str, paths: &[String]) -> Result<()> {
        debug!(bucket, count = paths.len(), "Deleting objects");
        let response = self
            .authorize(self.client.delete(self.url(&format!("object/{bucket}"))))
            .json(&serde_json::json!({ "prefixes": paths }))
            .send()
            .await?;
        Self::check(response).await?;
        info!(bucket, count = paths.len(), "Objects deleted");
        Ok(())
    }

    async fn move_object(&self, bucket: &str, from_path: &str, to_path: &str) -> Result<()> {
        debug!(bucket, from_path, to_path, "Moving object");
        let response = self
            .authorize(self.client.post(self.url("object/move")))
            .json(&serde_json::json!({
                "bucketId": bucket,
                "sourceKey": from_path,
                "destinationKey": to_path,
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn copy_object(&self, bucket: &str, from_path: &str, to_path: &str) -> Result<()> {
        debug!(bucket, from_path, to_path, "Copying object");
        let response = self
            .authorize(self.client.post(self.url("object/copy")))
            .json(&serde_json::json!({
                "bucketId": bucket,
                "sourceKey": from_path,
                "destinationKey": to_path,
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/object/public/{bucket}/{path}", self.base_url)
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in: u64,
    ) -> Result<String> {
        debug!(bucket, path, expires_in, "Creating signed URL");
        let response = self
            .authorize(
                self.client
                    .post(self.url(&format!("object/sign/{bucket}/{path}"))),
            )
            .json(&serde_json::json!({ "expiresIn": expires_in }))
            .send()
            .await?;
        let signed: SignedUrlResponse = Self::check(response).await?.json().await?;
        // The API returns a path relative to the storage root.
        Ok(format!(
            "{}/{}",
            self.base_url,
            signed.signed_url.trim_start_matches('/')
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> HttpStorageApi {
        HttpStorageApi::new(&StorageConfig {
            base_url: server.uri(),
            service_key: "test-service-key".to_string(),
            request_timeout: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_buckets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bucket"))
            .and(header("authorization", "Bearer test-service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "avatars", "name": "avatars", "public": true, "created_at": "2024-01-01T00:00:00Z"},
                {"id": "docs", "name": "docs", "public": false}
            ])))
            .mount(&server)
            .await;

        let buckets = api_for(&server).list_buckets().await.unwrap();
        assert_eq!(buckets.len(), 2);
        assert!(buckets[0].public);
        assert_eq!(buckets[1].name, "docs");
    }

    #[tokio::test]
    async fn test_list_objects_sends_prefix_and_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/object/list/docs"))
            .and(body_json(serde_json::json!({
                "prefix": "reports/",
                "limit": 10,
                "offset": 5
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "reports/q1.pdf", "metadata": {"size": 1024, "mimetype": "application/pdf"}}
            ])))
            .mount(&server)
            .await;

        let objects = api_for(&server)
            .list_objects("docs", "reports/", Some(10), Some(5))
            .await
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].size(), Some(1024));
        assert_eq!(objects[0].mime_type(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_upload_sets_upsert_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/object/docs/readme.txt"))
            .and(header("x-upsert", "true"))
            .and(header("content-type", "text/plain"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Key": "docs/readme.txt"
            })))
            .mount(&server)
            .await;

        api_for(&server)
            .upload("docs", "readme.txt", b"hello".to_vec(), "text/plain", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_download_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object/docs/readme.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"file content".to_vec()))
            .mount(&server)
            .await;

        let bytes = api_for(&server).download("docs", "readme.txt").await.unwrap();
        assert_eq!(bytes, b"file content");
    }

    #[tokio::test]
    async fn test_error_status_maps_to_storage_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object/docs/missing.txt"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Object not found"))
            .mount(&server)
            .await;

        let err = api_for(&server)
            .download("docs", "missing.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_signed_url_is_joined_to_base() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/object/sign/docs/secret.pdf"))
            .and(body_json(serde_json::json!({"expiresIn": 3600})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "signedURL": "/object/sign/docs/secret.pdf?token=abc123"
            })))
            .mount(&server)
            .await;

        let api = api_for(&server);
        let url = api.create_signed_url("docs", "secret.pdf", 3600).await.unwrap();
        assert_eq!(
            url,
            format!("{}/object/sign/docs/secret.pdf?token=abc123", server.uri())
        );
    }

    #[test]
    fn test_public_url_shape() {
        let api = HttpStorageApi::new(&StorageConfig {
            base_url: "http://localhost:54321/storage/v1/".to_string(),
            service_key: "k".to_string(),
            request_timeout: 5,
        })
        .unwrap();
        assert_eq!(
            api.public_url("avatars", "user/1.png"),
            "http://localhost:54321/storage/v1/object/public/avatars/user/1.png"
        );
    }
}
