//! Upload resolver: turn a local image into a publicly fetchable URL
//!
//! The generation API only accepts source images by URL, so local files are
//! relayed through free anonymous hosts. Each host is individually
//! unreliable; the resolver walks an ordered chain and the first working URL
//! wins. Sequential fallback trades latency for availability, which is fine
//! when generation itself takes tens of seconds.

pub mod backends;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;

pub use backends::{FileIo, Imgur, TmpFiles, ZeroXZero};

/// One anonymous file host
#[async_trait]
pub trait UploadBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Upload the file, returning its public URL.
    ///
    /// Implementations must return a validated absolute http(s) URL; anything
    /// else is a backend failure, not a resolver result.
    async fn upload(&self, path: &Path) -> Result<String>;
}

/// Accept only well-formed absolute http(s) URLs from backend responses
pub(crate) fn validate_public_url(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    let parsed = url::Url::parse(trimmed).ok()?;
    match parsed.scheme() {
        "http" | "https" => Some(trimmed.to_string()),
        _ => None,
    }
}

/// Ordered fallback chain over upload backends
pub struct UploadResolver {
    backends: Vec<Box<dyn UploadBackend>>,
}

impl UploadResolver {
    pub fn new(backends: Vec<Box<dyn UploadBackend>>) -> Self {
        Self { backends }
    }

    /// Default chain: 0x0.st, then tmpfiles.org, then file.io
    pub fn with_default_backends() -> Self {
        Self::new(vec![
            Box::new(ZeroXZero::new()),
            Box::new(TmpFiles::new()),
            Box::new(FileIo::new()),
        ])
    }

    /// Append the authenticated imgur backend to the end of the chain
    pub fn with_imgur(mut self, client_id: impl Into<String>) -> Self {
        self.backends.push(Box::new(Imgur::new(client_id)));
        self
    }

    /// Resolve a local file to a public URL, first backend success wins
    pub async fn resolve(&self, path: &Path) -> Result<String> {
        for backend in &self.backends {
            tracing::debug!(backend = backend.name(), path = %path.display(), "upload attempt");
            match backend.upload(path).await {
                Ok(url) => {
                    tracing::info!(backend = backend.name(), url = %url, "upload succeeded");
                    return Ok(url);
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), "upload failed: {}", e);
                }
            }
        }
        Err(Error::UploadExhausted {
            path: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedBackend {
        name: &'static str,
        result: std::result::Result<String, String>,
        calls: Arc<AtomicUsize>,
    }

    impl FixedBackend {
        fn ok(name: &'static str, url: &str) -> Self {
            Self {
                name,
                result: Ok(url.to_string()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(name: &'static str, reason: &str) -> Self {
            Self {
                name,
                result: Err(reason.to_string()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl UploadBackend for FixedBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn upload(&self, _path: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(url) => Ok(url.clone()),
                Err(reason) => Err(Error::Network(reason.clone())),
            }
        }
    }

    #[tokio::test]
    async fn first_success_wins_without_trying_the_rest() {
        let secondary = FixedBackend::ok("secondary", "https://other/b.png");
        let secondary_calls = secondary.calls.clone();
        let resolver = UploadResolver::new(vec![
            Box::new(FixedBackend::ok("primary", "https://host/a.png")),
            Box::new(secondary),
        ]);

        let url = resolver.resolve(&PathBuf::from("img.png")).await.unwrap();
        assert_eq!(url, "https://host/a.png");
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallback_reaches_the_third_backend() {
        let resolver = UploadResolver::new(vec![
            Box::new(FixedBackend::failing("primary", "timed out")),
            Box::new(FixedBackend::failing("secondary", "malformed body")),
            Box::new(FixedBackend::ok("tertiary", "https://tertiary/c.png")),
        ]);

        let url = resolver.resolve(&PathBuf::from("img.png")).await.unwrap();
        assert_eq!(url, "https://tertiary/c.png");
    }

    #[tokio::test]
    async fn exhausted_chain_reports_a_single_terminal_error() {
        let resolver = UploadResolver::new(vec![
            Box::new(FixedBackend::failing("primary", "timed out")),
            Box::new(FixedBackend::failing("secondary", "500")),
        ]);

        let err = resolver.resolve(&PathBuf::from("img.png")).await.unwrap_err();
        match err {
            Error::UploadExhausted { path } => assert_eq!(path, "img.png"),
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn imgur_joins_the_chain_only_when_configured() {
        let resolver = UploadResolver::with_default_backends();
        assert!(resolver.backends.iter().all(|b| b.name() != "imgur"));

        let resolver = UploadResolver::with_default_backends().with_imgur("client-id");
        assert_eq!(resolver.backends.last().unwrap().name(), "imgur");
    }

    #[test]
    fn url_validation_rejects_relative_and_non_http_values() {
        assert_eq!(
            validate_public_url("https://host/img.png").as_deref(),
            Some("https://host/img.png")
        );
        assert_eq!(
            validate_public_url("  http://host/img.png\n").as_deref(),
            Some("http://host/img.png")
        );
        assert!(validate_public_url("/dl/12345/img.png").is_none());
        assert!(validate_public_url("ftp://host/img.png").is_none());
        assert!(validate_public_url("not a url").is_none());
        assert!(validate_public_url("").is_none());
    }
}
