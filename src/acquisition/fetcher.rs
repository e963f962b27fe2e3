//! Remote sequence retrieval over http(s) and ftp.

use super::AcquisitionError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Name of the file the URL designates, after redirects for http(s).
    async fn resolve_filename(&self, url: &str) -> Result<String, AcquisitionError>;

    /// Download `url` to `dest`. Returns the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, AcquisitionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Http,
    Ftp,
}

fn parse_url(url: &str) -> Result<(Url, Scheme), AcquisitionError> {
    let parsed = Url::parse(url).map_err(|_| AcquisitionError::InvalidUrl(url.to_string()))?;
    let scheme = match parsed.scheme() {
        "http" | "https" => Scheme::Http,
        "ftp" => Scheme::Ftp,
        _ => return Err(AcquisitionError::InvalidUrl(url.to_string())),
    };
    if parsed.host_str().is_none() {
        return Err(AcquisitionError::InvalidUrl(url.to_string()));
    }
    Ok((parsed, scheme))
}

/// Last path segment of `url`, or an empty string.
pub fn last_segment(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("")
        .to_string()
}

/// Fetches with reqwest for http(s) and the `curl` executable for ftp.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    curl_path: String,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, AcquisitionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AcquisitionError::Download {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            timeout,
            curl_path: "curl".to_string(),
        })
    }

    async fn download_http(&self, url: &str, dest: &Path) -> Result<u64, AcquisitionError> {
        let download_err = |reason: String| AcquisitionError::Download {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_err(format!("status {}", response.status())));
        }

        let mut file = File::create(dest).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_err(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn download_ftp(&self, url: &str, dest: &Path) -> Result<u64, AcquisitionError> {
        let output = Command::new(&self.curl_path)
            .args(["--silent", "--show-error", "--fail", "--max-time"])
            .arg(self.timeout.as_secs().max(1).to_string())
            .arg("--output")
            .arg(dest)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AcquisitionError::Download {
                url: url.to_string(),
                reason: stderr.trim().to_string(),
            });
        }
        Ok(tokio::fs::metadata(dest).await?.len())
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn resolve_filename(&self, url: &str) -> Result<String, AcquisitionError> {
        let (parsed, scheme) = parse_url(url)?;
        match scheme {
            Scheme::Ftp => Ok(last_segment(&parsed)),
            Scheme::Http => {
                // reqwest follows redirects by default
                let response = self.client.head(parsed).send().await.map_err(|e| {
                    AcquisitionError::Download {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                debug!("Resolved {} to {}", url, response.url());
                Ok(last_segment(response.url()))
            }
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, AcquisitionError> {
        let (_, scheme) = parse_url(url)?;
        match scheme {
            Scheme::Http => self.download_http(url, dest).await,
            Scheme::Ftp => self.download_ftp(url, dest).await,
        }
    }
}
