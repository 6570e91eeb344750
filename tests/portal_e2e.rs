//! End-to-end tests through the public API against a mock portal
//!
//! Each test drives a `PortalScraper` the way an embedding application does:
//! JSON config, a run per trigger, snapshot reads and event subscription.

mod common;

use calwatch::{
    AuthError, CalibrationStatus, Credentials, Event, HealthStatus, PortalScraper, RunOutcome,
    RunState, ScrapeError,
};
use common::{
    EQUIPMENT_PATH, config_from_json, equipment_html, login_posts, mount_login, mount_page,
    page_hits,
};
use std::sync::Arc;
use wiremock::MockServer;

fn alice() -> Credentials {
    Credentials::new("alice", "s3cret")
}

async fn portal_with_equipment() -> (MockServer, tempfile::TempDir) {
    let server = MockServer::start().await;
    mount_login(&server, "alice", "e2e-token").await;
    mount_page(&server, EQUIPMENT_PATH, equipment_html()).await;
    (server, tempfile::tempdir().unwrap())
}

#[tokio::test]
async fn scheduled_run_publishes_mixed_snapshot() {
    let (server, dir) = portal_with_equipment().await;
    let scraper = PortalScraper::new(config_from_json(&server, &dir))
        .await
        .unwrap();
    assert_eq!(scraper.health().status, HealthStatus::NoData);

    let report = scraper.run(&alice()).await.unwrap();

    assert!(!report.is_partial());
    assert!(report.logged_in);
    assert_eq!(report.rows_skipped, 0);

    let snapshot = scraper.latest_snapshot().unwrap();
    assert!(Arc::ptr_eq(&snapshot, &report.snapshot));
    assert_eq!(snapshot.instruments.len(), 2);
    assert_eq!(
        snapshot.instrument("VP-001").unwrap().calibration_status,
        CalibrationStatus::Warning
    );
    assert_eq!(
        snapshot.instrument("MX-002").unwrap().calibration_status,
        CalibrationStatus::Danger
    );

    let station = &snapshot.docking_stations[0];
    assert_eq!(station.serial, "DS-100");
    assert_eq!(station.docked_group.as_deref(), Some("Unit 1"));

    let health = scraper.health();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.has_equipment_data);
    assert_eq!(health.last_update, Some(snapshot.taken_at));
    assert_eq!(scraper.state(), RunState::Idle);

    let runs = scraper.recent_runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].outcome, RunOutcome::Success);
    assert_eq!(runs[0].instruments, 2);
}

#[tokio::test]
async fn snapshot_serializes_for_push_layer() {
    let (server, dir) = portal_with_equipment().await;
    let scraper = PortalScraper::new(config_from_json(&server, &dir))
        .await
        .unwrap();

    scraper.run(&alice()).await.unwrap();
    let snapshot = scraper.latest_snapshot().unwrap();
    let json = serde_json::to_value(snapshot.as_ref()).unwrap();

    assert!(json["taken_at"].is_string());
    let instruments = json["instruments"].as_array().unwrap();
    let overdue = instruments
        .iter()
        .find(|i| i["serial"] == "MX-002")
        .unwrap();
    assert_eq!(overdue["calibration_status"], "danger");
    assert_eq!(overdue["type"], "MX4");
    assert_eq!(overdue["upgrade"], "YesPending");

    let station = &json["docking_stations"][0];
    assert_eq!(station["docked_serial"], "VP-001");
    assert_eq!(station["state"], "Docked");
}

#[tokio::test]
async fn rejected_login_keeps_previous_snapshot_and_fetches_nothing() {
    let (server, dir) = portal_with_equipment().await;
    let scraper = PortalScraper::new(config_from_json(&server, &dir))
        .await
        .unwrap();

    scraper.run(&alice()).await.unwrap();
    let before = scraper.latest_snapshot().unwrap();
    let fetched = page_hits(&server, EQUIPMENT_PATH).await;

    scraper.invalidate_session().await;
    let mut events = scraper.subscribe();
    let err = scraper
        .run(&Credentials::new("mallory", "guess"))
        .await
        .unwrap_err();

    assert_eq!(err, ScrapeError::Auth(AuthError::InvalidCredentials));
    assert_eq!(page_hits(&server, EQUIPMENT_PATH).await, fetched);
    assert_eq!(login_posts(&server).await, 2);
    assert!(Arc::ptr_eq(&scraper.latest_snapshot().unwrap(), &before));
    assert_eq!(scraper.health().status, HealthStatus::Healthy);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, Event::SnapshotPublished { .. }));
        saw_failure |= matches!(event, Event::RunFailed { .. });
    }
    assert!(saw_failure);

    let runs = scraper.recent_runs(5).await.unwrap();
    assert_eq!(runs[0].outcome, RunOutcome::Failed);
    assert_eq!(runs[1].outcome, RunOutcome::Success);
}

#[tokio::test]
async fn watchers_see_each_publication_as_a_whole() {
    let (server, dir) = portal_with_equipment().await;
    let scraper = PortalScraper::new(config_from_json(&server, &dir))
        .await
        .unwrap();
    let mut watcher = scraper.watch_snapshot();
    assert!(watcher.borrow().is_none());

    scraper.run(&alice()).await.unwrap();
    watcher.changed().await.unwrap();
    let first = watcher.borrow_and_update().clone().unwrap();

    scraper.run(&alice()).await.unwrap();
    watcher.changed().await.unwrap();
    let second = watcher.borrow_and_update().clone().unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(first.instruments.len(), 2, "old readers keep their copy");
    assert!(second.taken_at >= first.taken_at);
    assert_eq!(login_posts(&server).await, 1, "second run reuses the session");
}

#[tokio::test]
async fn shutdown_rejects_further_runs() {
    let (server, dir) = portal_with_equipment().await;
    let scraper = PortalScraper::new(config_from_json(&server, &dir))
        .await
        .unwrap();

    scraper.run(&alice()).await.unwrap();
    scraper.shutdown().await;

    assert!(scraper.is_shut_down());
    assert_eq!(
        scraper.run(&alice()).await.unwrap_err(),
        ScrapeError::ShuttingDown
    );
    assert!(scraper.latest_snapshot().is_some());
}
