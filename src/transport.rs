use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::debug;

use crate::config::HttpConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body_bytes: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// A single GET. Non-2xx statuses are successful exchanges; only failing to
/// get a complete response is an error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

pub struct HttpTransport {
    client: Client,
    follow_embedded: bool,
}

impl HttpTransport {
    pub fn new(cfg: &HttpConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .local_address(cfg.source_address)
            .build()?;
        Ok(Self {
            client,
            follow_embedded: cfg.follow_embedded,
        })
    }

    async fn fetch(&self, url: Url) -> Result<(u16, Url, Vec<u8>), TransportError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().clone();
        let body = resp.bytes().await?;
        Ok((status, final_url, body.to_vec()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::Other(format!("{}: {}", url, e)))?;
        let (status, page_url, body) = self.fetch(url).await?;
        let mut body_bytes = body.len() as u64;

        if self.follow_embedded {
            let html = String::from_utf8_lossy(&body);
            for link in embedded_links(&html, &page_url) {
                match self.fetch(link.clone()).await {
                    Ok((_, _, sub)) => body_bytes += sub.len() as u64,
                    Err(e) => debug!("embedded resource {} skipped: {}", link, e),
                }
            }
        }

        Ok(TransportResponse { status, body_bytes })
    }
}

const LINK_ATTRS: [&str; 2] = ["src=\"", "href=\""];

/// Every `src="..."`/`href="..."` value in document order, resolved against
/// `base`. Only http(s) targets are kept.
pub fn embedded_links(html: &str, base: &Url) -> Vec<Url> {
    let mut links = Vec::new();
    let mut rest = html;
    loop {
        let next = LINK_ATTRS
            .iter()
            .filter_map(|attr| rest.find(attr).map(|at| at + attr.len()))
            .min();
        let Some(start) = next else { break };
        let tail = &rest[start..];
        let Some(end) = tail.find('"') else { break };

        let raw = tail[..end].trim();
        if !raw.is_empty() && !raw.starts_with('#') {
            if let Ok(url) = base.join(raw) {
                if matches!(url.scheme(), "http" | "https") {
                    links.push(url);
                }
            }
        }
        rest = &tail[end + 1..];
    }
    links
}
