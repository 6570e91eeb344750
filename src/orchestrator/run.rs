//! Single-flight entry points and the run state machine.

use super::{InFlight, PortalScraper, RunResult, merge};
use crate::error::{PageFailure, ScrapeError};
use crate::types::{
    Credentials, Event, FailureKind, RunId, RunOutcome, RunRecord, RunReport, RunState,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{OwnedMutexGuard, watch};
use tokio_util::sync::CancellationToken;

/// Runs kept in the history table
const HISTORY_RETENTION: i64 = 1000;

type Slot = std::sync::Mutex<Option<InFlight>>;

fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<InFlight>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ownership of the single run slot; released on drop, even if the run future is dropped
struct RunSlot {
    in_flight: Arc<Slot>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        let mut slot = lock_slot(&self.in_flight);
        *slot = None;
        // Release the run lock while the slot is still locked, so admission
        // never sees the lock held with an empty slot
        self.guard.take();
    }
}

enum Admission {
    Started(RunSlot, watch::Sender<Option<RunResult>>),
    Busy(Option<InFlight>),
}

impl PortalScraper {
    /// Run one scrape; rejects with [`ScrapeError::AlreadyRunning`] if a run is in flight
    ///
    /// On success the new snapshot has already replaced the retained one when
    /// this returns. On failure the retained snapshot is untouched.
    ///
    /// # Errors
    /// - [`ScrapeError::Auth`] if login fails (no page is fetched), or if
    ///   renewing an expired session fails (remaining fetches are dropped)
    /// - [`ScrapeError::AllPagesFailed`] if no page contributed
    /// - [`ScrapeError::AlreadyRunning`], [`ScrapeError::ShuttingDown`],
    ///   [`ScrapeError::TimedOut`], [`ScrapeError::NoPagesConfigured`]
    pub async fn run(&self, credentials: &Credentials) -> RunResult {
        self.run_with_cancel(credentials, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), abandoning the run when `cancel` fires
    ///
    /// In-flight fetches are dropped and the session lock, if held, is
    /// released. Returns [`ScrapeError::Cancelled`]. Dropping the returned
    /// future cancels the run the same way.
    pub async fn run_with_cancel(
        &self,
        credentials: &Credentials,
        cancel: CancellationToken,
    ) -> RunResult {
        if !self.control.accepting_new.load(Ordering::SeqCst) {
            return Err(ScrapeError::ShuttingDown);
        }

        match self.admit() {
            Admission::Started(slot, tx) => self.execute_in_slot(slot, tx, credentials, cancel).await,
            Admission::Busy(_) => {
                tracing::warn!("scrape run requested while another is in flight");
                Err(ScrapeError::AlreadyRunning)
            }
        }
    }

    /// Run one scrape, or wait for and share the result of the run in flight
    ///
    /// A joined run's result is returned as-is, including its errors. If the
    /// in-flight run is abandoned without a result, joiners get
    /// [`ScrapeError::Cancelled`].
    pub async fn run_or_join(&self, credentials: &Credentials) -> RunResult {
        loop {
            if !self.control.accepting_new.load(Ordering::SeqCst) {
                return Err(ScrapeError::ShuttingDown);
            }

            match self.admit() {
                Admission::Started(slot, tx) => {
                    return self
                        .execute_in_slot(slot, tx, credentials, CancellationToken::new())
                        .await;
                }
                Admission::Busy(Some(mut rx)) => {
                    tracing::debug!("joining in-flight scrape run");
                    return match rx.wait_for(Option::is_some).await {
                        Ok(result) => (*result).clone().unwrap_or(Err(ScrapeError::Cancelled)),
                        Err(_) => Err(ScrapeError::Cancelled),
                    };
                }
                Admission::Busy(None) => tokio::task::yield_now().await,
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut slot = lock_slot(&self.control.in_flight);
        match self.control.run_lock.clone().try_lock_owned() {
            Ok(guard) => {
                let (tx, rx) = watch::channel(None);
                *slot = Some(rx);
                Admission::Started(
                    RunSlot {
                        in_flight: self.control.in_flight.clone(),
                        guard: Some(guard),
                    },
                    tx,
                )
            }
            Err(_) => Admission::Busy(slot.clone()),
        }
    }

    async fn execute_in_slot(
        &self,
        slot: RunSlot,
        tx: watch::Sender<Option<RunResult>>,
        credentials: &Credentials,
        cancel: CancellationToken,
    ) -> RunResult {
        // The run lives on its own task so that bookkeeping completes even if
        // the caller stops polling; the guard cancels it in that case
        let run_cancel = cancel.child_token();
        let _abandon = run_cancel.clone().drop_guard();

        let scraper = self.clone();
        let credentials = credentials.clone();
        let task = tokio::spawn(async move {
            let result = scraper.execute(&credentials, run_cancel).await;
            tx.send_replace(Some(result.clone()));
            drop(slot);
            result
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "scrape run task failed");
                Err(ScrapeError::Cancelled)
            }
        }
    }

    async fn execute(&self, credentials: &Credentials, cancel: CancellationToken) -> RunResult {
        let run_id = RunId(self.control.last_run_id.fetch_add(1, Ordering::SeqCst) + 1);
        let started_at = Utc::now();
        let started = Instant::now();
        let logins_before = self.sessions.login_count();

        tracing::info!(run_id = %run_id, pages = self.config.pages.len(), "starting scrape run");
        self.emit_event(Event::RunStarted {
            run_id,
            pages: self.config.pages.len(),
        });

        let stages = self.run_stages(run_id, credentials, started, logins_before);
        let bounded = async {
            match self.config.run_timeout {
                Some(limit) => tokio::time::timeout(limit, stages)
                    .await
                    .unwrap_or(Err(ScrapeError::TimedOut)),
                None => stages.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
            _ = self.control.shutdown_token.cancelled() => Err(ScrapeError::ShuttingDown),
            result = bounded => result,
        };

        self.finish(run_id, started_at, logins_before, &result).await;
        result
    }

    async fn run_stages(
        &self,
        run_id: RunId,
        credentials: &Credentials,
        started: Instant,
        logins_before: u64,
    ) -> RunResult {
        let pages = &self.config.pages;
        if pages.is_empty() {
            return Err(ScrapeError::NoPagesConfigured);
        }

        self.set_state(run_id, RunState::Authenticating);
        let session = self.sessions.ensure_session(credentials).await?;

        self.set_state(run_id, RunState::Fetching);
        let fetched = self.fetcher.fetch_all(&session, pages, credentials).await?;

        let mut failures: Vec<PageFailure> = Vec::new();
        let mut raw_pages = Vec::with_capacity(pages.len());
        for (page, result) in pages.iter().zip(fetched) {
            match result {
                Ok(raw) => {
                    tracing::debug!(run_id = %run_id, page = %page.key, status = raw.status, "page fetched");
                    self.emit_event(Event::PageFetched {
                        run_id,
                        page: page.key.clone(),
                        status: raw.status,
                    });
                    raw_pages.push(raw);
                }
                Err(e) => failures.push(self.page_failed(run_id, &page.key, e.into())),
            }
        }

        self.set_state(run_id, RunState::Parsing);
        let now = chrono::Local::now().naive_local();
        let mut parsed = Vec::with_capacity(raw_pages.len());
        for raw in raw_pages {
            match self.parser.parse(&raw, now) {
                Ok(page) => parsed.push(page),
                Err(e) => failures.push(self.page_failed(run_id, &raw.key, e.into())),
            }
        }

        // Report failures in configured page order
        failures.sort_by_key(|f| pages.iter().position(|p| p.key == f.page));

        if parsed.is_empty() {
            return Err(ScrapeError::AllPagesFailed { failures });
        }

        let merged = merge::merge_pages(parsed, Utc::now());
        let snapshot = Arc::new(merged.snapshot);
        let report = RunReport {
            run_id,
            snapshot: snapshot.clone(),
            pages: merged.pages,
            failures,
            rows_skipped: merged.rows_skipped,
            duplicates_dropped: merged.duplicates_dropped,
            logged_in: self.sessions.login_count() > logins_before,
            elapsed: started.elapsed(),
        };

        // Publish by replacement: readers hold either the old Arc or the new one
        self.published.snapshot.send_replace(Some(snapshot.clone()));
        self.emit_event(Event::SnapshotPublished {
            run_id,
            instruments: snapshot.instruments.len(),
            docking_stations: snapshot.docking_stations.len(),
            partial: report.is_partial(),
        });
        self.set_state(run_id, RunState::Merged);

        tracing::info!(
            run_id = %run_id,
            instruments = snapshot.instruments.len(),
            docking_stations = snapshot.docking_stations.len(),
            pages_failed = report.failures.len(),
            rows_skipped = report.rows_skipped,
            duplicates_dropped = report.duplicates_dropped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "snapshot published"
        );

        Ok(report)
    }

    fn page_failed(
        &self,
        run_id: RunId,
        page: &crate::types::PageKey,
        error: crate::error::PageError,
    ) -> PageFailure {
        tracing::warn!(run_id = %run_id, page = %page, error = %error, "page failed");
        self.emit_event(Event::PageFailed {
            run_id,
            page: page.clone(),
            error: error.to_string(),
        });
        PageFailure {
            page: page.clone(),
            error,
        }
    }

    fn set_state(&self, run_id: RunId, state: RunState) {
        tracing::debug!(run_id = %run_id, state = ?state, "run state changed");
        self.published.state.send_replace(state);
        self.emit_event(Event::StateChanged { run_id, state });
    }

    /// Terminal bookkeeping: final state, events, history; always returns to `Idle`
    async fn finish(
        &self,
        run_id: RunId,
        started_at: DateTime<Utc>,
        logins_before: u64,
        result: &RunResult,
    ) {
        let logged_in = self.sessions.login_count() > logins_before;
        let record = match result {
            Ok(report) => RunRecord {
                id: run_id,
                started_at,
                finished_at: Utc::now(),
                outcome: if report.is_partial() {
                    RunOutcome::Partial
                } else {
                    RunOutcome::Success
                },
                instruments: report.snapshot.instruments.len() as i64,
                docking_stations: report.snapshot.docking_stations.len() as i64,
                pages_failed: report.failures.len() as i64,
                rows_skipped: report.rows_skipped as i64,
                logged_in,
                error: None,
            },
            Err(e) => {
                if let Some(kind) = FailureKind::from_error(e) {
                    self.set_state(run_id, RunState::Failed(kind));
                }

                let outcome = match e {
                    ScrapeError::Cancelled | ScrapeError::ShuttingDown => {
                        tracing::info!(run_id = %run_id, reason = %e, "scrape run cancelled");
                        self.emit_event(Event::RunCancelled { run_id });
                        RunOutcome::Cancelled
                    }
                    _ => {
                        tracing::error!(
                            run_id = %run_id,
                            code = e.error_code(),
                            error = %e,
                            "scrape run failed"
                        );
                        self.emit_event(Event::RunFailed {
                            run_id,
                            code: e.error_code().to_string(),
                            error: e.to_string(),
                        });
                        if matches!(e, ScrapeError::TimedOut) {
                            RunOutcome::Cancelled
                        } else {
                            RunOutcome::Failed
                        }
                    }
                };

                let pages_failed = match e {
                    ScrapeError::AllPagesFailed { failures } => failures.len() as i64,
                    _ => 0,
                };

                RunRecord {
                    id: run_id,
                    started_at,
                    finished_at: Utc::now(),
                    outcome,
                    instruments: 0,
                    docking_stations: 0,
                    pages_failed,
                    rows_skipped: 0,
                    logged_in,
                    error: Some(e.to_string()),
                }
            }
        };

        if let Err(e) = self.db.insert_run(&record).await {
            tracing::error!(run_id = %run_id, error = %e, "failed to record run history");
        } else if let Err(e) = self.db.prune_runs(HISTORY_RETENTION).await {
            tracing::warn!(error = %e, "failed to prune run history");
        }

        self.set_state(run_id, RunState::Idle);
    }
}
