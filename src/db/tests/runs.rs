use crate::db::*;
use crate::types::{RunId, RunOutcome, RunRecord};
use chrono::{TimeZone, Utc};
use tempfile::tempdir;

fn record(id: i64, outcome: RunOutcome, error: Option<&str>) -> RunRecord {
    RunRecord {
        id: RunId(id),
        started_at: Utc.timestamp_opt(1_770_000_000 + id * 60, 0).unwrap(),
        finished_at: Utc.timestamp_opt(1_770_000_010 + id * 60, 0).unwrap(),
        outcome,
        instruments: 12,
        docking_stations: 3,
        pages_failed: i64::from(outcome == RunOutcome::Partial),
        rows_skipped: 1,
        logged_in: id == 1,
        error: error.map(str::to_string),
    }
}

#[tokio::test]
async fn max_run_id_starts_at_zero() {
    let dir = tempdir().unwrap();
    let db = Database::new(&dir.path().join("calwatch.db")).await.unwrap();

    assert_eq!(db.max_run_id().await.unwrap(), 0);
}

#[tokio::test]
async fn recent_runs_are_newest_first() {
    let dir = tempdir().unwrap();
    let db = Database::new(&dir.path().join("calwatch.db")).await.unwrap();

    let first = record(1, RunOutcome::Success, None);
    let second = record(2, RunOutcome::Partial, None);
    let third = record(3, RunOutcome::Failed, Some("authentication failed: invalid credentials"));
    for r in [&first, &second, &third] {
        db.insert_run(r).await.unwrap();
    }

    let runs = db.recent_runs(2).await.unwrap();
    assert_eq!(runs, vec![third, second]);
    assert_eq!(db.max_run_id().await.unwrap(), 3);
}

#[tokio::test]
async fn prune_keeps_newest() {
    let dir = tempdir().unwrap();
    let db = Database::new(&dir.path().join("calwatch.db")).await.unwrap();
    for id in 1..=5 {
        db.insert_run(&record(id, RunOutcome::Success, None))
            .await
            .unwrap();
    }

    let removed = db.prune_runs(2).await.unwrap();

    assert_eq!(removed, 3);
    let ids: Vec<i64> = db
        .recent_runs(10)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id.get())
        .collect();
    assert_eq!(ids, vec![5, 4]);
}
