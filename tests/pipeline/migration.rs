use std::collections::HashSet;

use anyhow::Result;
use pushmigrate::{Migrator, OutcomeStatus};

use crate::support::{
    helpers::{cleanup, config_for, init_tracing, read_json, read_ledger, scratch_dir},
    mock_server::{MockServer, MockServices, RegistryPage},
};

#[tokio::test]
async fn single_page_registers_active_records_only() -> Result<()> {
    init_tracing();
    let services = MockServices::with_pages(vec![RegistryPage::new(
        Some((3, 2)),
        &[("AAA", true), ("BBB", true), ("CCC", false)],
    )]);
    let server = MockServer::start(services.clone()).await?;
    let dump_dir = scratch_dir("single-page");

    let config = config_for(&server, &dump_dir).worker_count(2).build()?;
    let report = Migrator::new(config)?.run().await?;

    assert_eq!(report.source.records, 3);
    assert_eq!(report.progress.sent, 2);
    assert_eq!(report.progress.inactive, 1);
    assert_eq!(report.progress.failed, 0);
    assert_eq!(report.progress.download_percent(), 100.0);
    assert_eq!(report.progress.upload_percent(), 100.0);

    let mut ledger: Vec<_> = read_ledger(&dump_dir)?
        .into_iter()
        .map(|outcome| (outcome.device_token, outcome.status))
        .collect();
    ledger.sort_by(|left, right| left.0.cmp(&right.0));
    assert_eq!(
        ledger,
        vec![
            ("AAA".to_string(), OutcomeStatus::Sent),
            ("BBB".to_string(), OutcomeStatus::Sent),
            ("CCC".to_string(), OutcomeStatus::Inactive),
        ]
    );

    assert_eq!(services.registration_count("CCC"), 0);
    let registrations = services.registrations();
    assert_eq!(registrations.len(), 2);
    for body in &registrations {
        let request = &body["request"];
        assert_eq!(request["auth"], "api-token");
        assert_eq!(request["application"], "ABCDE-12345");
        assert_eq!(request["device_type"], 1);
        assert_eq!(request["hwid"], request["push_token"]);
    }

    let requests = services.registry_requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0]
        .authorization
        .as_deref()
        .is_some_and(|value| value.starts_with("Basic ")));
    assert_eq!(
        requests[0].accept.as_deref(),
        Some("application/vnd.urbanairship+json; version=3;")
    );

    server.shutdown().await;
    cleanup(&dump_dir);
    Ok(())
}

#[tokio::test]
async fn chained_pages_are_dumped_and_recorded_in_fetch_order() -> Result<()> {
    init_tracing();
    let services = MockServices::with_pages(vec![
        RegistryPage::new(Some((5, 5)), &[("t1", true), ("t2", true), ("t3", true)]),
        RegistryPage::new(None, &[("t4", true), ("t5", true)]),
    ]);
    let server = MockServer::start(services.clone()).await?;
    let dump_dir = scratch_dir("two-pages");

    let config = config_for(&server, &dump_dir)
        .worker_count(1)
        .page_limit(3)
        .build()?;
    let report = Migrator::new(config)?.run().await?;

    assert_eq!(report.source.pages, 2);
    assert_eq!(report.source.records, 5);
    assert_eq!(report.progress.sent, 5);

    let expected = ["t1", "t2", "t3", "t4", "t5"];
    let ledger: Vec<_> = read_ledger(&dump_dir)?
        .into_iter()
        .map(|outcome| outcome.device_token)
        .collect();
    assert_eq!(ledger, expected);

    let aggregate = read_json(&dump_dir.join("source.json"))?;
    let dumped: Vec<_> = aggregate
        .as_array()
        .expect("aggregate dump is a list")
        .iter()
        .map(|record| record["device_token"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(dumped, expected);

    let first = read_json(&dump_dir.join("source/0/device_tokens.json"))?;
    assert_eq!(first["device_tokens"].as_array().map(Vec::len), Some(3));
    assert_eq!(first["device_tokens_count"], 5);
    let second = read_json(&dump_dir.join("source/3/device_tokens.json"))?;
    assert_eq!(second["device_tokens"].as_array().map(Vec::len), Some(2));

    let requests = services.registry_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].path_and_query, "/api/device_tokens/?limit=3");
    assert_eq!(requests[1].path_and_query, "/api/device_tokens/?page=1");

    server.shutdown().await;
    cleanup(&dump_dir);
    Ok(())
}

#[tokio::test]
async fn empty_registry_completes_with_zero_counts() -> Result<()> {
    init_tracing();
    let services = MockServices::with_pages(vec![RegistryPage::new(Some((0, 0)), &[])]);
    let server = MockServer::start(services.clone()).await?;
    let dump_dir = scratch_dir("empty");

    let config = config_for(&server, &dump_dir).build()?;
    let report = Migrator::new(config)?.run().await?;

    assert_eq!(report.source.records, 0);
    assert_eq!(report.progress.processed(), 0);
    assert_eq!(report.progress.download_percent(), 0.0);
    assert_eq!(report.progress.upload_percent(), 0.0);
    assert!(read_ledger(&dump_dir)?.is_empty());
    assert!(services.registrations().is_empty());

    server.shutdown().await;
    cleanup(&dump_dir);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_workers_record_each_of_a_hundred_records_once() -> Result<()> {
    init_tracing();
    let services = MockServices::generated(100, 15);
    let server = MockServer::start(services.clone()).await?;
    let dump_dir = scratch_dir("hundred");

    let config = config_for(&server, &dump_dir)
        .worker_count(3)
        .queue_capacity(8)
        .build()?;
    let report = Migrator::new(config)?.run().await?;

    let ledger = read_ledger(&dump_dir)?;
    assert_eq!(ledger.len(), 100);
    let unique: HashSet<_> = ledger.iter().map(|outcome| outcome.sequence).collect();
    assert_eq!(unique.len(), 100);
    let tokens: HashSet<_> = ledger.iter().map(|o| o.device_token.clone()).collect();
    assert_eq!(tokens.len(), 100);

    let inactive = ledger
        .iter()
        .filter(|outcome| outcome.status == OutcomeStatus::Inactive)
        .count() as u64;
    assert_eq!(report.progress.inactive, inactive);
    assert_eq!(report.progress.sent + inactive, 100);
    assert_eq!(services.registrations().len() as u64, report.progress.sent);
    assert_eq!(
        report.workers.iter().map(|worker| worker.processed).sum::<usize>(),
        100
    );
    assert_eq!(report.source.pages, 7);

    server.shutdown().await;
    cleanup(&dump_dir);
    Ok(())
}
