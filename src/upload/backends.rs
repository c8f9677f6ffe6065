//! Anonymous file-host backends
//!
//! Each host has its own request shape and its own, often inconsistent,
//! response format. Parsing is per-backend on purpose so one host's quirks
//! fail independently of the others.

use crate::error::{Error, Result};
use crate::upload::{validate_public_url, UploadBackend};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const CURL_USER_AGENT: &str = "curl/7.68.0";

async fn multipart_file(path: &Path, mime: &str) -> Result<reqwest::multipart::Form> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.png".to_string());
    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime)
        .map_err(|e| Error::Network(e.to_string()))?;
    Ok(reqwest::multipart::Form::new().part("file", part))
}

/// 0x0.st - the primary host.
///
/// Rejects common HTTP-library user agents, so the first attempt shells out
/// to `curl`; a direct request with a curl user agent is the fallback. The
/// response body is a bare-text URL.
pub struct ZeroXZero {
    client: reqwest::Client,
    upload_url: String,
}

impl ZeroXZero {
    pub fn new() -> Self {
        Self::with_url("https://0x0.st")
    }

    pub fn with_url(upload_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            upload_url: upload_url.into(),
        }
    }

    async fn upload_via_curl(&self, path: &Path) -> Result<String> {
        let output = tokio::time::timeout(
            Duration::from_secs(60),
            tokio::process::Command::new("curl")
                .arg("-sf")
                .arg("-F")
                .arg(format!("file=@{}", path.display()))
                .arg(&self.upload_url)
                .output(),
        )
        .await
        .map_err(|_| Error::Network("curl upload timed out".to_string()))?
        .map_err(|e| Error::Network(format!("failed to run curl: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Network(format!(
                "curl exited with status {}",
                output.status
            )));
        }

        let body = String::from_utf8_lossy(&output.stdout);
        parse_bare_url_body(&body)
    }

    async fn upload_via_http(&self, path: &Path) -> Result<String> {
        let form = multipart_file(path, "application/octet-stream").await?;
        let response = self
            .client
            .post(&self.upload_url)
            .header(reqwest::header::USER_AGENT, CURL_USER_AGENT)
            .timeout(Duration::from_secs(60))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "0x0.st returned HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        parse_bare_url_body(&body)
    }
}

impl Default for ZeroXZero {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadBackend for ZeroXZero {
    fn name(&self) -> &'static str {
        "0x0.st"
    }

    async fn upload(&self, path: &Path) -> Result<String> {
        match self.upload_via_curl(path).await {
            Ok(url) => Ok(url),
            Err(e) => {
                tracing::debug!("curl path failed ({}), falling back to direct request", e);
                self.upload_via_http(path).await
            }
        }
    }
}

/// tmpfiles.org - secondary host.
///
/// Replies with JSON in a couple of shapes, or occasionally a bare-text URL.
/// Download URLs under `/dl/` need rewriting to an absolute form.
pub struct TmpFiles {
    client: reqwest::Client,
    upload_url: String,
}

impl TmpFiles {
    pub fn new() -> Self {
        Self::with_url("https://tmpfiles.org/api/v1/upload")
    }

    pub fn with_url(upload_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            upload_url: upload_url.into(),
        }
    }
}

impl Default for TmpFiles {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadBackend for TmpFiles {
    fn name(&self) -> &'static str {
        "tmpfiles.org"
    }

    async fn upload(&self, path: &Path) -> Result<String> {
        let form = multipart_file(path, "image/png").await?;
        let response = self
            .client
            .post(&self.upload_url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(30))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "tmpfiles.org returned HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        parse_tmpfiles_body(&body)
    }
}

/// file.io - tertiary host. JSON with `success`/`link`, or bare text.
pub struct FileIo {
    client: reqwest::Client,
    upload_url: String,
}

impl FileIo {
    pub fn new() -> Self {
        Self::with_url("https://file.io")
    }

    pub fn with_url(upload_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            upload_url: upload_url.into(),
        }
    }
}

impl Default for FileIo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadBackend for FileIo {
    fn name(&self) -> &'static str {
        "file.io"
    }

    async fn upload(&self, path: &Path) -> Result<String> {
        let form = multipart_file(path, "image/png").await?;
        let response = self
            .client
            .post(&self.upload_url)
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(30))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "file.io returned HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        parse_fileio_body(&body)
    }
}

/// Imgur - authenticated variant, only active when a client id is configured
pub struct Imgur {
    client: reqwest::Client,
    client_id: String,
}

impl Imgur {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
        }
    }
}

#[async_trait]
impl UploadBackend for Imgur {
    fn name(&self) -> &'static str {
        "imgur"
    }

    async fn upload(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("image.png")
            .mime_str("image/png")
            .map_err(|e| Error::Network(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .client
            .post("https://api.imgur.com/3/image")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Client-ID {}", self.client_id),
            )
            .timeout(Duration::from_secs(30))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "imgur returned HTTP {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        parse_imgur_body(&body)
    }
}

fn parse_bare_url_body(body: &str) -> Result<String> {
    validate_public_url(body)
        .ok_or_else(|| Error::Network(format!("response body is not a URL: {:?}", body.trim())))
}

fn parse_tmpfiles_body(body: &str) -> Result<String> {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        // Primary shape: {"status": "success", "data": {"url": ...}}
        if json.get("status").and_then(Value::as_str) == Some("success") {
            let data = json.get("data").cloned().unwrap_or(Value::Null);
            if let Some(raw) = data
                .get("url")
                .or_else(|| data.get("link"))
                .and_then(Value::as_str)
            {
                return normalize_tmpfiles_url(raw);
            }
        }
        // Alternative shape: {"url": ...}
        if let Some(raw) = json.get("url").and_then(Value::as_str) {
            return normalize_tmpfiles_url(raw);
        }
        return Err(Error::Network("tmpfiles JSON had no URL field".to_string()));
    }
    // Not JSON at all: some deployments answer with a bare URL
    parse_bare_url_body(body)
}

fn normalize_tmpfiles_url(raw: &str) -> Result<String> {
    let absolute = if raw.starts_with("/dl/") {
        format!("https://tmpfiles.org{}", raw)
    } else if raw.starts_with("http") {
        raw.to_string()
    } else {
        format!("https://tmpfiles.org/dl/{}", raw)
    };
    validate_public_url(&absolute)
        .ok_or_else(|| Error::Network(format!("tmpfiles URL is malformed: {:?}", raw)))
}

fn parse_imgur_body(body: &Value) -> Result<String> {
    if body.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(Error::Network("imgur reported failure".to_string()));
    }
    body.get("data")
        .and_then(|d| d.get("link"))
        .and_then(Value::as_str)
        .and_then(validate_public_url)
        .ok_or_else(|| Error::Network("imgur response had no usable link".to_string()))
}

fn parse_fileio_body(body: &str) -> Result<String> {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if json.get("success").and_then(Value::as_bool) == Some(true) {
            if let Some(url) = json
                .get("link")
                .and_then(Value::as_str)
                .and_then(validate_public_url)
            {
                return Ok(url);
            }
        }
        return Err(Error::Network("file.io JSON had no usable link".to_string()));
    }
    parse_bare_url_body(body)
}
