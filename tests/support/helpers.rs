use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use pushmigrate::{MigrationConfig, MigrationConfigBuilder, Outcome};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use super::mock_server::MockServer;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Fresh directory under the system temp dir, unique per call.
pub fn scratch_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let sequence = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "pushmigrate-it-{label}-{}-{nanos}-{sequence}",
        std::process::id()
    ))
}

/// Config pointing at the mock server with fast retries and short timeouts.
pub fn config_for(server: &MockServer, dump_dir: &Path) -> MigrationConfigBuilder {
    MigrationConfig::builder()
        .source_url(server.list_url())
        .source_app_key("app-key")
        .source_master_secret("master-secret")
        .target_url(server.register_url())
        .target_api_key("api-token")
        .target_app_code("ABCDE-12345")
        .request_timeout(Duration::from_millis(250))
        .retry_delay(Duration::from_millis(1))
        .progress_interval(Duration::from_millis(20))
        .dump_dir(dump_dir)
}

pub fn read_ledger(dir: &Path) -> Result<Vec<Outcome>> {
    let path = dir.join("ledger.jsonl");
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    contents
        .lines()
        .map(|line| serde_json::from_str(line).context("invalid ledger line"))
        .collect()
}

pub fn read_json(path: &Path) -> Result<Value> {
    let raw = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).context("invalid JSON dump")
}

pub fn cleanup(dir: &Path) {
    let _ = std::fs::remove_dir_all(dir);
}
