use std::time::Duration;

use anyhow::Result;
use pushmigrate::Runner;

use crate::support::{
    helpers::{cleanup, config_for, init_tracing, read_ledger, scratch_dir},
    mock_server::{MockServer, MockServices, Reply},
};

#[tokio::test]
async fn runner_completes_within_a_generous_limit() -> Result<()> {
    init_tracing();
    let services = MockServices::generated(12, 5);
    let server = MockServer::start(services.clone()).await?;
    let dump_dir = scratch_dir("runner-ok");

    let config = config_for(&server, &dump_dir).worker_count(2).build()?;
    let report = Runner::new(config)?
        .run_with_timeout(Duration::from_secs(30))
        .await?;

    assert_eq!(report.source.records, 12);
    assert_eq!(report.progress.processed(), 12);
    assert_eq!(read_ledger(&dump_dir)?.len(), 12);

    server.shutdown().await;
    cleanup(&dump_dir);
    Ok(())
}

#[tokio::test]
async fn runner_timeout_cancels_a_stuck_migration() -> Result<()> {
    init_tracing();
    let services = MockServices::generated(4, 4);
    services.set_fallback(Reply::Stall(Duration::from_secs(1)));
    let server = MockServer::start(services.clone()).await?;
    let dump_dir = scratch_dir("runner-timeout");

    let config = config_for(&server, &dump_dir).worker_count(1).build()?;
    let runner = Runner::new(config)?;
    let token = runner.cancellation_token();

    let err = tokio::time::timeout(
        Duration::from_secs(10),
        runner.run_with_timeout(Duration::from_millis(100)),
    )
    .await
    .expect("timed out run must still be joined")
    .expect_err("stalled registrations cannot finish in time");

    assert!(token.is_cancelled());
    assert!(format!("{err:#}").contains("did not finish within"), "{err:#}");

    server.shutdown().await;
    cleanup(&dump_dir);
    Ok(())
}

#[tokio::test]
async fn external_token_cancels_the_runner() -> Result<()> {
    init_tracing();
    let services = MockServices::generated(4, 4);
    services.set_fallback(Reply::Stall(Duration::from_secs(1)));
    let server = MockServer::start(services.clone()).await?;
    let dump_dir = scratch_dir("runner-cancel");

    let config = config_for(&server, &dump_dir).worker_count(1).build()?;
    let runner = Runner::new(config)?;
    let token = runner.cancellation_token();
    let run = tokio::spawn(runner.run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .expect("cancelled run must finish")?;
    assert!(result.is_err());

    server.shutdown().await;
    cleanup(&dump_dir);
    Ok(())
}
