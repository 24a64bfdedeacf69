//! Environment-driven entry point.
//!
//! Required: `PUSHMIGRATE_SOURCE_APP_KEY`, `PUSHMIGRATE_SOURCE_MASTER_SECRET`,
//! `PUSHMIGRATE_TARGET_API_KEY`, `PUSHMIGRATE_TARGET_APP_CODE`. Everything
//! else falls back to the library defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pushmigrate::{BackoffStrategy, DeviceType, MigrationConfig, MigrationConfigBuilder, Runner};

const ENV_PREFIX: &str = "PUSHMIGRATE_";

#[tokio::main]
async fn main() -> Result<()> {
    pushmigrate::init_tracing();

    let config = config_from_env()?;
    let run_timeout = parse_optional_env::<u64>("TIMEOUT_SECS")?.map(Duration::from_secs);
    let runner = Runner::new(config)?;

    let report = match run_timeout {
        Some(limit) => runner.run_with_timeout(limit).await?,
        None => runner.run_until_ctrl_c().await?,
    };

    println!("{}", report.progress);
    println!(
        "{} sent, {} inactive, {} failed across {} pages ({} registration attempts, {} retries)",
        report.progress.sent,
        report.progress.inactive,
        report.progress.failed,
        report.source.pages,
        report.telemetry.registration_attempts,
        report.telemetry.registration_retries,
    );
    Ok(())
}

fn config_from_env() -> Result<MigrationConfig> {
    let mut builder = MigrationConfig::builder()
        .source_app_key(required_env("SOURCE_APP_KEY")?)
        .source_master_secret(required_env("SOURCE_MASTER_SECRET")?)
        .target_api_key(required_env("TARGET_API_KEY")?)
        .target_app_code(required_env("TARGET_APP_CODE")?);

    if let Some(url) = read_env("SOURCE_URL") {
        builder = builder.source_url(url);
    }
    if let Some(url) = read_env("TARGET_URL") {
        builder = builder.target_url(url);
    }
    if let Some(limit) = parse_optional_env::<usize>("PAGE_LIMIT")? {
        builder = builder.page_limit(limit);
    }
    if let Some(start) = read_env("START") {
        builder = builder.start_cursor(start);
    }
    if let Some(device_type) = parse_optional_env::<DeviceType>("DEVICE_TYPE")? {
        builder = builder.device_type(device_type);
    }
    if let Some(language) = read_env("LANGUAGE") {
        builder = builder.language(language);
    }
    if let Some(timezone) = parse_optional_env::<f64>("TIMEZONE")? {
        builder = builder.timezone(timezone);
    }
    if let Some(workers) = parse_optional_env::<usize>("WORKERS")? {
        builder = builder.worker_count(workers);
    }
    if let Some(capacity) = parse_optional_env::<usize>("QUEUE_CAPACITY")? {
        builder = builder.queue_capacity(capacity);
    }
    if let Some(secs) = parse_optional_env::<u64>("REQUEST_TIMEOUT_SECS")? {
        builder = builder.request_timeout(Duration::from_secs(secs));
    }
    if let Some(attempts) = parse_optional_env::<usize>("RETRY_ATTEMPTS")? {
        builder = builder.retry_max_attempts(attempts);
    }
    if let Some(millis) = parse_optional_env::<u64>("RETRY_DELAY_MS")? {
        builder = builder.retry_delay(Duration::from_millis(millis));
    }
    if let Some(secs) = parse_optional_env::<u64>("PROGRESS_SECS")? {
        builder = builder.progress_interval(Duration::from_secs(secs));
    }
    if let Some(dir) = read_env("DUMP_DIR") {
        builder = builder.dump_dir(dir);
    }

    backoff_from_env(builder)?.build()
}

fn backoff_from_env(builder: MigrationConfigBuilder) -> Result<MigrationConfigBuilder> {
    let Some(kind) = read_env("BACKOFF") else {
        return Ok(builder);
    };
    let strategy = match kind.trim().to_ascii_lowercase().as_str() {
        "fixed" => BackoffStrategy::Fixed,
        "linear" => BackoffStrategy::Linear,
        "exponential" => BackoffStrategy::Exponential {
            max_delay: Duration::from_millis(
                parse_optional_env::<u64>("BACKOFF_MAX_MS")?.unwrap_or(60_000),
            ),
            jitter: parse_optional_env::<bool>("BACKOFF_JITTER")?.unwrap_or(true),
        },
        other => bail!("{ENV_PREFIX}BACKOFF must be fixed, linear or exponential, got {other:?}"),
    };
    Ok(builder.backoff(strategy))
}

fn read_env(name: &str) -> Option<String> {
    match env::var(format!("{ENV_PREFIX}{name}")) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn required_env(name: &str) -> Result<String> {
    read_env(name).with_context(|| format!("{ENV_PREFIX}{name} must be set"))
}

fn parse_optional_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Into<anyhow::Error>,
{
    read_env(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(Into::<anyhow::Error>::into)
                .with_context(|| format!("failed to parse {ENV_PREFIX}{name}='{value}'"))
        })
        .transpose()
}
