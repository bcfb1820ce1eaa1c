//! HTTP remote cache transport

use super::CacheTransport;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

/// Remote cache speaking plain `PUT`/`GET`/`HEAD` on `<base>/<key>`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    /// Create a new remote cache transport
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the cache server (e.g., "<http://localhost:9090>")
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InvalidUrl` if the URL is malformed
    pub fn new(base_url: &str) -> CacheResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(CacheError::InvalidUrl(base_url));
        }

        Ok(Self {
            base_url,
            client: Client::new(),
        })
    }

    /// Base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[async_trait]
impl CacheTransport for HttpTransport {
    async fn store(&self, key: &str, bytes: Vec<u8>) -> CacheResult<()> {
        let response = self.client.put(self.url(key)).body(bytes).send().await?;

        if !response.status().is_success() {
            return Err(CacheError::ServerError(format!(
                "Failed to store {key}: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn fetch(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let response = self.client.get(self.url(key)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CacheError::ServerError(format!(
                "Failed to fetch {key}: {}",
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        Ok(Some(bytes.to_vec()))
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        let response = self.client.head(self.url(key)).send().await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(CacheError::ServerError(format!(
                "Failed to check {key}: {status}"
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("http:{}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        assert!(HttpTransport::new("http://localhost:9090").is_ok());
        assert!(HttpTransport::new("https://cache.example.com/").is_ok());
        assert!(matches!(
            HttpTransport::new("ftp://cache"),
            Err(CacheError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_key_urls() {
        let transport = HttpTransport::new("http://localhost:9090/").unwrap();
        assert_eq!(transport.base_url(), "http://localhost:9090");
        assert_eq!(
            transport.url("cache/abc:12"),
            "http://localhost:9090/cache/abc:12"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let transport = HttpTransport::new("http://127.0.0.1:1").unwrap();
        assert!(matches!(
            transport.fetch("rulekey/aa").await,
            Err(CacheError::Http(_))
        ));
    }
}
