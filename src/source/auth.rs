//! HTTP header helpers for wiring registry credentials into the `reqwest`
//! client used by [`HttpPageSource`](super::HttpPageSource).

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

pub(crate) const REGISTRY_ACCEPT: &str = "application/vnd.urbanairship+json; version=3;";

pub(crate) fn build_registry_headers(app_key: &str, master_secret: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let credentials = format!("{app_key}:{master_secret}");
    let encoded = BASE64_STANDARD.encode(credentials);
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .context("failed to build Authorization header")?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static(REGISTRY_ACCEPT));
    Ok(headers)
}
