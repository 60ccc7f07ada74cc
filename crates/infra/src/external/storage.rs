//! Object storage addressing.

use async_trait::async_trait;

use super::CollaboratorError;

/// Where produced assets are served from.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Public URL of the object stored under `key`.
    fn public_url(&self, key: &str) -> String;

    /// Place the asset at `source_url` under `key` and return the URL clients
    /// should use for it.
    async fn publish(&self, key: &str, source_url: &str) -> Result<String, CollaboratorError>;
}

/// A bucket exposed under a public base URL.
#[derive(Debug, Clone)]
pub struct PublicBucketStorage {
    base_url: String,
}

impl PublicBucketStorage {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for PublicBucketStorage {
    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    /// Addresses the object under `key`; the source is not copied.
    async fn publish(&self, key: &str, _source_url: &str) -> Result<String, CollaboratorError> {
        Ok(self.public_url(key))
    }
}

/// No bucket configured: assets stay where the producer put them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderStorage;

#[async_trait]
impl ObjectStorage for PlaceholderStorage {
    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", super::PLACEHOLDER_CDN, key.trim_start_matches('/'))
    }

    async fn publish(&self, _key: &str, source_url: &str) -> Result<String, CollaboratorError> {
        Ok(source_url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_urls_join_base_and_key() {
        let storage = PublicBucketStorage::new("https://pub.example.com/");
        assert_eq!(storage.public_url("stems/p/s.wav"), "https://pub.example.com/stems/p/s.wav");
        assert_eq!(
            storage.publish("stems/p/s.wav", "https://origin/x.wav").await.unwrap(),
            "https://pub.example.com/stems/p/s.wav"
        );
    }

    #[tokio::test]
    async fn placeholder_keeps_source_url() {
        assert_eq!(
            PlaceholderStorage.publish("stems/p/s.wav", "https://origin/x.wav").await.unwrap(),
            "https://origin/x.wav"
        );
    }
}
