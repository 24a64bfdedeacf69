use crate::pipeline::backoff::{BackoffStrategy, RetryPolicy};
use crate::runtime::telemetry;
use crate::source::page::Cursor;
use crate::target::payload::{DeviceType, RegistrationDefaults};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_SOURCE_URL: &str = "https://go.urbanairship.com/api/device_tokens/";
pub const DEFAULT_TARGET_URL: &str = "https://cp.pushwoosh.com/json/1.3/registerDevice";
/// Largest page the registry will serve.
pub const MAX_PAGE_LIMIT: usize = 10_000;

const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 1_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 10;
const DEFAULT_RETRY_DELAY_SECS: u64 = 1;
const DEFAULT_DUMP_ROOT: &str = "dump";

/// Runtime configuration for a migration run.
///
/// All instances must be constructed via [`MigrationConfig::builder`] or [`MigrationConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    source_url: String,
    source_app_key: String,
    source_master_secret: String,
    page_limit: Option<usize>,
    start_cursor: Option<String>,
    target_url: String,
    target_api_key: String,
    target_app_code: String,
    device_type: DeviceType,
    language: Option<String>,
    timezone: Option<f64>,
    worker_count: usize,
    queue_capacity: usize,
    request_timeout: Duration,
    retry_max_attempts: usize,
    retry_delay: Duration,
    backoff: BackoffStrategy,
    progress_interval: Duration,
    dump_dir: PathBuf,
}

pub struct MigrationConfigParams {
    pub source_url: String,
    pub source_app_key: String,
    pub source_master_secret: String,
    pub page_limit: Option<usize>,
    pub start_cursor: Option<String>,
    pub target_url: String,
    pub target_api_key: String,
    pub target_app_code: String,
    pub device_type: DeviceType,
    pub language: Option<String>,
    pub timezone: Option<f64>,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
    pub retry_max_attempts: usize,
    pub retry_delay: Duration,
    pub backoff: BackoffStrategy,
    pub progress_interval: Duration,
    pub dump_dir: PathBuf,
}

impl MigrationConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> MigrationConfigBuilder {
        MigrationConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: MigrationConfigParams) -> Result<Self> {
        let MigrationConfigParams {
            source_url,
            source_app_key,
            source_master_secret,
            page_limit,
            start_cursor,
            target_url,
            target_api_key,
            target_app_code,
            device_type,
            language,
            timezone,
            worker_count,
            queue_capacity,
            request_timeout,
            retry_max_attempts,
            retry_delay,
            backoff,
            progress_interval,
            dump_dir,
        } = params;

        let config = Self {
            source_url: trimmed_string(source_url),
            source_app_key: trimmed_string(source_app_key),
            source_master_secret: trimmed_string(source_master_secret),
            page_limit,
            start_cursor: start_cursor.map(trimmed_string).filter(|s| !s.is_empty()),
            target_url: trimmed_string(target_url),
            target_api_key: trimmed_string(target_api_key),
            target_app_code: trimmed_string(target_app_code),
            device_type,
            language: language.map(trimmed_string).filter(|s| !s.is_empty()),
            timezone,
            worker_count,
            queue_capacity,
            request_timeout,
            retry_max_attempts,
            retry_delay,
            backoff,
            progress_interval,
            dump_dir,
        };

        config.validate()?;
        Ok(config)
    }

    /// List endpoint of the source registry.
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn source_app_key(&self) -> &str {
        &self.source_app_key
    }

    pub fn source_master_secret(&self) -> &str {
        &self.source_master_secret
    }

    /// Page size requested from the registry; `None` lets the registry pick.
    pub fn page_limit(&self) -> Option<usize> {
        self.page_limit
    }

    /// Record id the first page starts from.
    pub fn start_cursor(&self) -> Option<&str> {
        self.start_cursor.as_deref()
    }

    pub fn initial_cursor(&self) -> Cursor {
        Cursor::start(self.page_limit, self.start_cursor.clone())
    }

    /// Registration endpoint of the target service.
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn target_api_key(&self) -> &str {
        &self.target_api_key
    }

    pub fn target_app_code(&self) -> &str {
        &self.target_app_code
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn timezone(&self) -> Option<f64> {
        self.timezone
    }

    /// Fields copied into every registration request.
    pub fn registration_defaults(&self) -> RegistrationDefaults {
        RegistrationDefaults {
            auth: self.target_api_key.clone(),
            application: self.target_app_code.clone(),
            device_type: self.device_type,
            language: self.language.clone(),
            timezone: self.timezone,
        }
    }

    /// Number of concurrent registration workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Bound of the record queue between the source and the workers.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Per-request timeout applied to both HTTP clients.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            delay: self.retry_delay,
            strategy: self.backoff,
        }
    }

    /// Interval between two progress lines.
    pub fn progress_interval(&self) -> Duration {
        self.progress_interval
    }

    /// Directory receiving page dumps and the outcome ledger.
    pub fn dump_dir(&self) -> &PathBuf {
        &self.dump_dir
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.source_url, "source_url")?;
        ensure_not_empty(&self.source_app_key, "source_app_key")?;
        ensure_not_empty(&self.source_master_secret, "source_master_secret")?;
        validate_url(&self.target_url, "target_url")?;
        ensure_not_empty(&self.target_api_key, "target_api_key")?;
        ensure_not_empty(&self.target_app_code, "target_app_code")?;

        if let Some(limit) = self.page_limit {
            if limit == 0 || limit > MAX_PAGE_LIMIT {
                bail!("page_limit must be between 1 and {MAX_PAGE_LIMIT}");
            }
        }

        if let Some(timezone) = self.timezone {
            if !timezone.is_finite() {
                bail!("timezone must be a finite UTC offset");
            }
        }

        if self.worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }

        if self.queue_capacity == 0 {
            bail!("queue_capacity must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.retry_max_attempts == 0 {
            bail!("retry_max_attempts must be greater than 0");
        }

        if let BackoffStrategy::Exponential { max_delay, .. } = self.backoff {
            if max_delay < self.retry_delay {
                bail!("backoff max_delay must not be shorter than retry_delay");
            }
        }

        if self.progress_interval.is_zero() {
            bail!("progress_interval must be greater than 0");
        }

        if self.dump_dir.as_os_str().is_empty() {
            bail!("dump_dir cannot be empty");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MigrationConfigBuilder {
    source_url: Option<String>,
    source_app_key: Option<String>,
    source_master_secret: Option<String>,
    page_limit: Option<usize>,
    start_cursor: Option<String>,
    target_url: Option<String>,
    target_api_key: Option<String>,
    target_app_code: Option<String>,
    device_type: Option<DeviceType>,
    language: Option<String>,
    timezone: Option<f64>,
    worker_count: Option<usize>,
    queue_capacity: Option<usize>,
    request_timeout: Option<Duration>,
    retry_max_attempts: Option<usize>,
    retry_delay: Option<Duration>,
    backoff: Option<BackoffStrategy>,
    progress_interval: Option<Duration>,
    dump_dir: Option<PathBuf>,
}

impl MigrationConfigBuilder {
    pub fn source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn source_app_key(mut self, key: impl Into<String>) -> Self {
        self.source_app_key = Some(key.into());
        self
    }

    pub fn source_master_secret(mut self, secret: impl Into<String>) -> Self {
        self.source_master_secret = Some(secret.into());
        self
    }

    pub fn page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    pub fn start_cursor(mut self, start: impl Into<String>) -> Self {
        self.start_cursor = Some(start.into());
        self
    }

    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn target_api_key(mut self, key: impl Into<String>) -> Self {
        self.target_api_key = Some(key.into());
        self
    }

    pub fn target_app_code(mut self, code: impl Into<String>) -> Self {
        self.target_app_code = Some(code.into());
        self
    }

    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn timezone(mut self, offset: f64) -> Self {
        self.timezone = Some(offset);
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn retry_max_attempts(mut self, attempts: usize) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = Some(strategy);
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    pub fn dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<MigrationConfig> {
        let params = MigrationConfigParams {
            source_url: self
                .source_url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_owned()),
            source_app_key: self.source_app_key.context("source_app_key is required")?,
            source_master_secret: self
                .source_master_secret
                .context("source_master_secret is required")?,
            page_limit: self.page_limit,
            start_cursor: self.start_cursor,
            target_url: self
                .target_url
                .unwrap_or_else(|| DEFAULT_TARGET_URL.to_owned()),
            target_api_key: self.target_api_key.context("target_api_key is required")?,
            target_app_code: self
                .target_app_code
                .context("target_app_code is required")?,
            device_type: self.device_type.unwrap_or_default(),
            language: self.language,
            timezone: self.timezone,
            worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT),
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            retry_max_attempts: self
                .retry_max_attempts
                .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
            retry_delay: self
                .retry_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RETRY_DELAY_SECS)),
            backoff: self.backoff.unwrap_or(BackoffStrategy::Fixed),
            progress_interval: self
                .progress_interval
                .unwrap_or(telemetry::DEFAULT_PROGRESS_INTERVAL),
            dump_dir: self.dump_dir.unwrap_or_else(default_dump_dir),
        };

        MigrationConfig::new(params)
    }
}

/// `./dump/<unix seconds>`, one directory per run.
pub fn default_dump_dir() -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    PathBuf::from(DEFAULT_DUMP_ROOT).join(stamp.to_string())
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}
