//! Object storage integration.
//!
//! Talks to a Supabase-compatible storage REST API. The [`StorageApi`]
//! trait keeps the MCP tool layer testable without a live endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod http;

pub use http::HttpStorageApi;

/// A storage bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// An object inside a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageObject {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl StorageObject {
    /// Object size from the metadata blob, when present.
    pub fn size(&self) -> Option<u64> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("size"))
            .and_then(|v| v.as_u64())
    }

    /// MIME type from the metadata blob, when present.
    pub fn mime_type(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("mimetype"))
            .and_then(|v| v.as_str())
    }
}

/// Storage backend operations.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<StorageObject>>;

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<()>;

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;

    async fn delete(&self, bucket: &str, paths: &[String]) -> Result<()>;

    async fn move_object(&self, bucket: &str, from_path: &str, to_path: &str) -> Result<()>;

    async fn copy_object(&self, bucket: &str, from_path: &str, to_path: &str) -> Result<()>;

    /// Public URL for an object in a public bucket. No request is made.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Time-limited signed URL for an object in a private bucket.
    async fn create_signed_url(&self, bucket: &str, path: &str, expires_in: u64)
    -> Result<String>;
}
