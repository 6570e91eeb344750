use super::*;
use crate::error::{AuthError, FetchError, PageError};
use crate::test_helpers::{
    LOGIN_PAGE, login_posts, mount_login_rejected, page_hits, portal_fixture,
};
use crate::types::{CalibrationStatus, FailureKind, HealthStatus, RunId, RunOutcome};

#[tokio::test]
async fn end_to_end_run_derives_statuses() {
    let (server, dir) = portal_fixture().await;
    mount_portal(&server, None).await;
    let scraper = PortalScraper::new(two_page_config(&server, &dir)).await.unwrap();

    let report = scraper.run(&creds()).await.unwrap();

    assert!(!report.is_partial());
    assert!(report.logged_in);
    assert_eq!(report.run_id, RunId(1));
    let snapshot = &report.snapshot;
    assert_eq!(snapshot.instruments.len(), 2);

    let soon = snapshot.instrument("VP-001").unwrap();
    assert_eq!(soon.calibration_status, CalibrationStatus::Warning);
    assert_eq!(soon.days_until, Some(5));
    let overdue = snapshot.instrument("MX-002").unwrap();
    assert_eq!(overdue.calibration_status, CalibrationStatus::Danger);
    assert_eq!(overdue.days_until, Some(-2));

    let station = &snapshot.docking_stations[0];
    assert_eq!(station.docked_group.as_deref(), Some("Unit 1"));
    assert_eq!(station.gas_inlets[0].pressure.display(), "1200 psi");

    let latest = scraper.latest_snapshot().unwrap();
    assert!(Arc::ptr_eq(&latest, &report.snapshot));
    assert_eq!(scraper.state(), RunState::Idle);
}

#[tokio::test]
async fn one_failing_page_of_three_gives_partial_snapshot() {
    let (server, dir) = portal_fixture().await;
    mount_portal(&server, None).await;
    Mock::given(method("GET"))
        .and(path("/Dashboard/Broken.aspx"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let mut config = two_page_config(&server, &dir);
    config.pages.insert(
        1,
        PageConfig::new("broken", "/Dashboard/Broken.aspx", PageKind::Instruments),
    );
    let scraper = PortalScraper::new(config.clone()).await.unwrap();

    let report = scraper.run(&creds()).await.unwrap();

    assert!(report.is_partial());
    assert_eq!(report.snapshot.instruments.len(), 2);
    assert_eq!(report.snapshot.docking_stations.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].page.as_str(), "broken");
    assert!(matches!(
        report.failures[0].error,
        PageError::Fetch(FetchError::ServerError { status: 503, .. })
    ));
    assert_eq!(
        page_hits(&server, "/Dashboard/Broken.aspx").await,
        1 + config.retry.max_attempts as usize
    );

    let history = scraper.recent_runs(10).await.unwrap();
    assert_eq!(history[0].outcome, RunOutcome::Partial);
    assert_eq!(history[0].pages_failed, 1);
}

#[tokio::test]
async fn invalid_credentials_fetch_nothing_and_keep_snapshot() {
    let (server, dir) = portal_fixture().await;
    mount_portal(&server, None).await;
    let scraper = PortalScraper::new(two_page_config(&server, &dir)).await.unwrap();
    let first = scraper.run(&creds()).await.unwrap();

    scraper.invalidate_session().await;
    server.reset().await;
    mount_login_rejected(&server).await;
    mount_page(&server, INSTRUMENTS_PATH, instruments_html(), None).await;
    let mut events = scraper.subscribe();

    let err = scraper
        .run(&Credentials::new("alice", "wrong"))
        .await
        .unwrap_err();

    assert_eq!(err, ScrapeError::Auth(AuthError::InvalidCredentials));
    assert_eq!(page_hits(&server, INSTRUMENTS_PATH).await, 0, "no fetch attempted");
    let retained = scraper.latest_snapshot().unwrap();
    assert!(Arc::ptr_eq(&retained, &first.snapshot));

    let events = drain(&mut events);
    assert!(events.contains(&Event::StateChanged {
        run_id: RunId(2),
        state: RunState::Failed(FailureKind::Auth),
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::RunFailed { code, .. } if code == "invalid_credentials"
    )));
    assert_eq!(scraper.state(), RunState::Idle);
}

#[tokio::test]
async fn every_page_failing_is_a_run_failure() {
    let (server, dir) = portal_fixture().await;
    mount_login_success(&server, "tok").await;
    mount_page(&server, INSTRUMENTS_PATH, "<html>no grid</html>".into(), None).await;
    Mock::given(method("GET"))
        .and(path(STATIONS_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let scraper = PortalScraper::new(two_page_config(&server, &dir)).await.unwrap();

    let err = scraper.run(&creds()).await.unwrap_err();

    let ScrapeError::AllPagesFailed { failures } = err else {
        panic!("expected all pages failed, got {err:?}");
    };
    let pages: Vec<&str> = failures.iter().map(|f| f.page.as_str()).collect();
    assert_eq!(pages, vec!["instruments", "stations"]);
    assert!(matches!(failures[0].error, PageError::Parse(_)));
    assert!(scraper.latest_snapshot().is_none());
    assert_eq!(scraper.health().status, HealthStatus::NoData);

    let history = scraper.recent_runs(10).await.unwrap();
    assert_eq!(history[0].outcome, RunOutcome::Failed);
    assert_eq!(history[0].pages_failed, 2);
    assert!(history[0].error.is_some());
}

#[tokio::test]
async fn events_follow_the_state_machine() {
    let (server, dir) = portal_fixture().await;
    mount_portal(&server, None).await;
    let mut config = two_page_config(&server, &dir);
    config.pages.truncate(1);
    let scraper = PortalScraper::new(config).await.unwrap();
    let mut rx = scraper.subscribe();

    scraper.run(&creds()).await.unwrap();

    let run_id = RunId(1);
    let state = |state| Event::StateChanged { run_id, state };
    assert_eq!(
        drain(&mut rx),
        vec![
            Event::RunStarted { run_id, pages: 1 },
            state(RunState::Authenticating),
            Event::LoggedIn { generation: 1 },
            state(RunState::Fetching),
            Event::PageFetched {
                run_id,
                page: "instruments".into(),
                status: 200
            },
            state(RunState::Parsing),
            Event::SnapshotPublished {
                run_id,
                instruments: 2,
                docking_stations: 0,
                partial: false
            },
            state(RunState::Merged),
            state(RunState::Idle),
        ]
    );
}

#[tokio::test]
async fn session_and_run_ids_survive_restart() {
    let (server, dir) = portal_fixture().await;
    mount_portal(&server, None).await;
    let config = two_page_config(&server, &dir);

    {
        let scraper = PortalScraper::new(config.clone()).await.unwrap();
        scraper.run(&creds()).await.unwrap();
    }

    let scraper = PortalScraper::new(config).await.unwrap();
    assert!(scraper.latest_snapshot().is_none(), "snapshots are not persisted");

    let report = scraper.run(&creds()).await.unwrap();

    assert_eq!(report.run_id, RunId(2));
    assert!(!report.logged_in, "stored session reused");
    assert_eq!(login_posts(&server).await, 1);

    let ids: Vec<i64> = scraper
        .recent_runs(10)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id.get())
        .collect();
    assert_eq!(ids, vec![2, 1]);
}

#[tokio::test]
async fn expired_session_mid_run_relogs_once() {
    let (server, dir) = portal_fixture().await;
    mount_login_success(&server, "tok").await;
    Mock::given(method("GET"))
        .and(path(INSTRUMENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, INSTRUMENTS_PATH, instruments_html(), None).await;
    mount_page(&server, STATIONS_PATH, stations_html(), None).await;
    let mut config = two_page_config(&server, &dir);
    config.fetch.max_concurrent_fetches = 1;
    let scraper = PortalScraper::new(config).await.unwrap();

    let report = scraper.run(&creds()).await.unwrap();

    assert!(!report.is_partial());
    assert_eq!(login_posts(&server).await, 2);
    assert_eq!(scraper.session_manager().login_count(), 2);
}

#[tokio::test]
async fn rejected_relogin_mid_run_fails_the_run_as_auth() {
    let (server, dir) = portal_fixture().await;
    mount_login_rejected(&server).await;
    Mock::given(method("POST"))
        .and(path("/Login.aspx"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/Dashboard/LandingPage.aspx")
                .insert_header("Set-Cookie", ".ASPXAUTH=tok; path=/"),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Dashboard/LandingPage.aspx"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let paths = [INSTRUMENTS_PATH, STATIONS_PATH, "/Dashboard/Gas.aspx"];
    for page_path in paths {
        Mock::given(method("GET"))
            .and(path(page_path))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/Login.aspx"))
            .mount(&server)
            .await;
    }
    let mut config = two_page_config(&server, &dir);
    config.pages.push(PageConfig::new("gas", paths[2], PageKind::Instruments));
    let scraper = PortalScraper::new(config).await.unwrap();
    let mut events = scraper.subscribe();

    let err = scraper.run(&creds()).await.unwrap_err();

    assert_eq!(err, ScrapeError::Auth(AuthError::InvalidCredentials));
    assert_eq!(login_posts(&server).await, 2, "one login and one rejected re-login");
    assert!(scraper.latest_snapshot().is_none());
    assert_eq!(scraper.state(), RunState::Idle);

    let events = drain(&mut events);
    assert!(events.contains(&Event::StateChanged {
        run_id: RunId(1),
        state: RunState::Failed(FailureKind::Auth),
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::RunFailed { code, .. } if code == "invalid_credentials"
    )));
    assert!(!events.iter().any(|e| matches!(e, Event::SnapshotPublished { .. })));

    let history = scraper.recent_runs(1).await.unwrap();
    assert_eq!(history[0].outcome, RunOutcome::Failed);
}

#[tokio::test]
async fn no_pages_configured_is_rejected() {
    let (server, dir) = portal_fixture().await;
    mount_login_success(&server, "tok").await;
    let mut config = test_config(&server, &dir);
    config.pages.clear();
    let scraper = PortalScraper::new(config).await.unwrap();

    let err = scraper.run(&creds()).await.unwrap_err();

    assert_eq!(err, ScrapeError::NoPagesConfigured);
    assert_eq!(login_posts(&server).await, 0);
}

#[tokio::test]
async fn health_reports_data_after_a_run() {
    let (server, dir) = portal_fixture().await;
    mount_portal(&server, None).await;
    let scraper = PortalScraper::new(two_page_config(&server, &dir)).await.unwrap();
    assert_eq!(scraper.health().status, HealthStatus::NoData);

    scraper.run(&creds()).await.unwrap();

    let health = scraper.health();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.has_equipment_data);
    assert!(health.last_update.is_some());
}

#[tokio::test]
async fn invalid_config_is_rejected_at_construction() {
    let (server, dir) = portal_fixture().await;
    let mut config = test_config(&server, &dir);
    config.fetch.max_concurrent_fetches = 0;

    let err = PortalScraper::new(config).await.err().unwrap();
    assert!(matches!(err, crate::Error::Config { .. }));
}
