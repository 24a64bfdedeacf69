//! Paginated registry client. Houses the [`PageSource`] trait consumed by the
//! token source, the `reqwest`-backed implementation, and its error type.

use crate::runtime::config::MigrationConfig;
use crate::source::auth::build_registry_headers;
use crate::source::page::{Cursor, Page};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::{Client, Url};
use std::time::Duration;

#[derive(Debug)]
pub enum SourceError {
    Transport { url: String, message: String },
    Timeout { url: String },
    Status { url: String, status: u16, body: String },
    Decode { url: String, message: String },
    InvalidCursor { cursor: String, message: String },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Transport { url, message } => {
                write!(f, "registry request to {url} failed: {message}")
            }
            SourceError::Timeout { url } => write!(f, "registry request to {url} timed out"),
            SourceError::Status { url, status, body } => {
                write!(f, "registry returned HTTP {status} for {url}: {body}")
            }
            SourceError::Decode { url, message } => {
                write!(f, "registry page from {url} could not be decoded: {message}")
            }
            SourceError::InvalidCursor { cursor, message } => {
                write!(f, "invalid continuation cursor {cursor:?}: {message}")
            }
        }
    }
}

impl std::error::Error for SourceError {}

/// Fetches one page of the registry for a cursor.
pub trait PageSource: Send + Sync {
    fn fetch_page<'a>(&'a self, cursor: &'a Cursor) -> BoxFuture<'a, Result<Page>>;
}

#[derive(Debug, Clone)]
pub struct HttpPageSource {
    base_url: Url,
    client: Client,
}

impl PageSource for HttpPageSource {
    fn fetch_page<'a>(&'a self, cursor: &'a Cursor) -> BoxFuture<'a, Result<Page>> {
        Box::pin(self.fetch(cursor))
    }
}

impl HttpPageSource {
    pub fn new(
        list_url: &str,
        app_key: &str,
        master_secret: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(list_url)
            .with_context(|| format!("invalid registry list url {list_url}"))?;
        let headers = build_registry_headers(app_key, master_secret)?;
        let client = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .context("failed to build registry HTTP client")?;
        Ok(Self { base_url, client })
    }

    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        Self::new(
            config.source_url(),
            config.source_app_key(),
            config.source_master_secret(),
            config.request_timeout(),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a cursor into the URL of the page it designates.
    pub fn page_url(&self, cursor: &Cursor) -> Result<Url> {
        match cursor {
            Cursor::Start { limit, start } => {
                let mut url = self.base_url.clone();
                {
                    let mut query = url.query_pairs_mut();
                    if let Some(limit) = limit {
                        query.append_pair("limit", &limit.to_string());
                    }
                    if let Some(start) = start.as_deref().filter(|id| !id.is_empty()) {
                        query.append_pair("start", start);
                    }
                }
                if url.query() == Some("") {
                    url.set_query(None);
                }
                Ok(url)
            }
            Cursor::Next(token) => self.base_url.join(token).map_err(|err| {
                SourceError::InvalidCursor {
                    cursor: token.clone(),
                    message: err.to_string(),
                }
                .into()
            }),
        }
    }

    async fn fetch(&self, cursor: &Cursor) -> Result<Page> {
        let url = self.page_url(cursor)?;
        let url_label = url.to_string();

        let response = self.client.get(url).send().await.map_err(|err| {
            if err.is_timeout() {
                SourceError::Timeout {
                    url: url_label.clone(),
                }
            } else {
                SourceError::Transport {
                    url: url_label.clone(),
                    message: err.to_string(),
                }
            }
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| SourceError::Transport {
                url: url_label.clone(),
                message: err.to_string(),
            })?;

        if !status.is_success() {
            return Err(SourceError::Status {
                url: url_label,
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }
            .into());
        }

        let page: Page = serde_json::from_slice(&body).map_err(|err| SourceError::Decode {
            url: url_label.clone(),
            message: err.to_string(),
        })?;

        tracing::debug!(
            url = %url_label,
            items = page.items.len(),
            has_next = page.next_cursor().is_some(),
            "fetched registry page"
        );

        Ok(page)
    }
}
