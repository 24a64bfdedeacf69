//! Registration service client. Houses the [`Registrar`] trait consumed by
//! workers, the `reqwest`-backed implementation, and per-attempt errors.

use crate::runtime::config::MigrationConfig;
use crate::source::page::Record;
use crate::target::payload::{RegisterDevice, RegisterResponse, RegistrationDefaults};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;

/// Why a single registration attempt did not succeed.
#[derive(Debug)]
pub enum RegistrationError {
    Transport { message: String },
    Timeout,
    Rejected {
        status_code: i64,
        status_message: String,
        payload: Value,
    },
    Decode { http_status: u16, body: String },
}

impl RegistrationError {
    /// Response payload worth keeping for diagnostics, if any.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            RegistrationError::Rejected { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

impl std::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationError::Transport { message } => {
                write!(f, "registration request failed: {message}")
            }
            RegistrationError::Timeout => write!(f, "registration request timed out"),
            RegistrationError::Rejected {
                status_code,
                status_message,
                ..
            } => write!(
                f,
                "registration rejected (status_code={status_code}, status_message={status_message})"
            ),
            RegistrationError::Decode { http_status, body } => write!(
                f,
                "registration response (HTTP {http_status}) could not be decoded: {body}"
            ),
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Performs one registration call for a record.
///
/// Implementations return `Ok` only when the service accepted the record;
/// every other outcome is a [`RegistrationError`] wrapped in `anyhow`.
pub trait Registrar: Send + Sync {
    fn register<'a>(&'a self, record: &'a Record) -> BoxFuture<'a, Result<RegisterResponse>>;
}

#[derive(Debug, Clone)]
pub struct HttpRegistrar {
    url: Url,
    client: Client,
    defaults: RegistrationDefaults,
}

impl Registrar for HttpRegistrar {
    fn register<'a>(&'a self, record: &'a Record) -> BoxFuture<'a, Result<RegisterResponse>> {
        Box::pin(self.register_once(record))
    }
}

impl HttpRegistrar {
    pub fn new(
        register_url: &str,
        defaults: RegistrationDefaults,
        request_timeout: Duration,
    ) -> Result<Self> {
        let url = Url::parse(register_url)
            .with_context(|| format!("invalid registration url {register_url}"))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .context("failed to build registration HTTP client")?;
        Ok(Self {
            url,
            client,
            defaults,
        })
    }

    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        Self::new(
            config.target_url(),
            config.registration_defaults(),
            config.request_timeout(),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.url
    }

    async fn register_once(&self, record: &Record) -> Result<RegisterResponse> {
        let body = RegisterDevice::for_record(&self.defaults, record);
        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    RegistrationError::Timeout
                } else {
                    RegistrationError::Transport {
                        message: err.to_string(),
                    }
                }
            })?;

        let http_status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RegistrationError::Transport {
                message: err.to_string(),
            })?;

        let payload: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(_) if !http_status.is_success() => {
                return Err(RegistrationError::Rejected {
                    status_code: i64::from(http_status.as_u16()),
                    status_message: http_status
                        .canonical_reason()
                        .unwrap_or_default()
                        .to_owned(),
                    payload: Value::String(String::from_utf8_lossy(&bytes).into_owned()),
                }
                .into());
            }
            Err(_) => {
                return Err(RegistrationError::Decode {
                    http_status: http_status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                }
                .into());
            }
        };

        let parsed: RegisterResponse =
            serde_json::from_value(payload.clone()).map_err(|_| RegistrationError::Decode {
                http_status: http_status.as_u16(),
                body: payload.to_string(),
            })?;

        if !http_status.is_success() || !parsed.is_success() {
            return Err(RegistrationError::Rejected {
                status_code: parsed.status_code,
                status_message: parsed.status_message,
                payload,
            }
            .into());
        }

        tracing::trace!(token = %record.id, "registration accepted");
        Ok(parsed)
    }
}
