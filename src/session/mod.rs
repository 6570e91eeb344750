//! Session manager: cookie jar ownership, login, expiry
//!
//! All session mutation goes through one [`tokio::sync::Mutex`]. The lock is
//! held across the whole login exchange, so callers that race into an expired
//! session queue behind the first login and then reuse its result.

mod cookie;
mod login;

pub use cookie::{CookieEntry, CookieJar};

use crate::client::PortalClient;
use crate::config::{Config, PortalConfig, RetryConfig};
use crate::db::Database;
use crate::error::AuthError;
use crate::retry::with_retry;
use crate::types::{Credentials, Event};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};

/// An authenticated portal session
///
/// Handed out by value; the manager keeps the authoritative copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub(crate) jar: CookieJar,
    pub(crate) fresh: bool,
    pub(crate) generation: u64,
    pub(crate) logged_in_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Cookies to send with requests
    pub fn cookies(&self) -> &CookieJar {
        &self.jar
    }

    /// Whether the session is believed valid
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Monotonic login counter that produced this session
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the login that produced this session completed
    pub fn logged_in_at(&self) -> Option<DateTime<Utc>> {
        self.logged_in_at
    }

    /// Expired without asking the portal: too old, or every dated cookie has lapsed
    pub fn is_provably_expired(&self, now: DateTime<Utc>, max_age: Option<Duration>) -> bool {
        let too_old = max_age
            .and_then(|age| chrono::Duration::from_std(age).ok())
            .zip(self.logged_in_at)
            .is_some_and(|(age, at)| now >= at + age);

        too_old || self.jar.all_expired(now)
    }
}

#[derive(Debug, Default)]
struct SessionState {
    current: Option<Session>,
    /// Persisted session has been read (or found missing)
    loaded: bool,
    last_generation: u64,
    /// Generation whose renewal failed, and how; cleared by the next successful login
    failed_renewal: Option<(u64, AuthError)>,
}

/// Owns the portal session and the login protocol
pub struct SessionManager {
    client: PortalClient,
    db: Arc<Database>,
    portal: PortalConfig,
    max_age: Option<Duration>,
    retry: RetryConfig,
    state: Mutex<SessionState>,
    login_count: AtomicU64,
    event_tx: broadcast::Sender<Event>,
}

impl SessionManager {
    /// Create a manager; the persisted session is loaded lazily on first use
    pub fn new(
        client: PortalClient,
        db: Arc<Database>,
        config: &Config,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            client,
            db,
            portal: config.portal.clone(),
            max_age: config.session.max_age,
            retry: config.retry.clone(),
            state: Mutex::new(SessionState::default()),
            login_count: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Return a usable session, logging in only when the current one is not fresh
    ///
    /// A fresh session that is not provably expired is returned without any
    /// network activity.
    ///
    /// # Errors
    /// [`AuthError::InvalidCredentials`] or [`AuthError::Unreachable`] from the
    /// login exchange. The previous session is left as it was.
    pub async fn ensure_session(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let mut state = self.state.lock().await;
        self.load_persisted(&mut state).await;

        let now = Utc::now();
        if let Some(session) = &state.current {
            if session.fresh && !session.is_provably_expired(now, self.max_age) {
                return Ok(session.clone());
            }
            if session.fresh {
                tracing::info!(
                    generation = session.generation,
                    "persisted session expired, logging in again"
                );
            }
        }

        self.login(&mut state, credentials).await
    }

    /// Replace `observed` after the portal rejected it, logging in at most once per generation
    ///
    /// Used by fetches that hit an expired session. Callers racing on the same
    /// stale generation queue behind the first one and then either reuse its
    /// new session or get its login error back without contacting the portal.
    ///
    /// # Errors
    /// The [`AuthError`] of the (possibly shared) failed login.
    pub async fn renew(
        &self,
        observed: &Session,
        credentials: &Credentials,
    ) -> Result<Session, AuthError> {
        let mut state = self.state.lock().await;
        self.load_persisted(&mut state).await;

        if let Some(current) = state
            .current
            .as_ref()
            .filter(|s| s.fresh && s.generation != observed.generation)
        {
            tracing::debug!(
                observed = observed.generation,
                current = current.generation,
                "session already renewed"
            );
            return Ok(current.clone());
        }

        if let Some((_, error)) = state
            .failed_renewal
            .as_ref()
            .filter(|(generation, _)| *generation == observed.generation)
        {
            tracing::debug!(
                generation = observed.generation,
                error = %error,
                "renewal of this session already failed"
            );
            return Err(error.clone());
        }

        let is_current = state
            .current
            .as_ref()
            .is_some_and(|s| s.generation == observed.generation);
        if is_current {
            self.mark_stale(&mut state).await;
        }

        let result = self.login(&mut state, credentials).await;
        if let Err(e) = &result {
            state.failed_renewal = Some((observed.generation, e.clone()));
        }
        result
    }

    /// Perform the login exchange and install the new session; the state lock is held
    async fn login(
        &self,
        state: &mut SessionState,
        credentials: &Credentials,
    ) -> Result<Session, AuthError> {
        self.login_count.fetch_add(1, Ordering::SeqCst);
        tracing::info!(username = %credentials.username, "logging in to portal");

        let jar = match login::perform_login(&self.client, &self.portal, credentials).await {
            Ok(jar) => jar,
            Err(e) => {
                tracing::warn!(error = %e, "portal login failed");
                return Err(e);
            }
        };

        state.last_generation += 1;
        let session = Session {
            jar,
            fresh: true,
            generation: state.last_generation,
            logged_in_at: Some(Utc::now()),
        };

        self.persist(&session).await;
        state.current = Some(session.clone());
        state.failed_renewal = None;

        tracing::info!(
            generation = session.generation,
            cookies = session.jar.len(),
            "portal login succeeded"
        );
        self.emit_event(Event::LoggedIn {
            generation: session.generation,
        });

        Ok(session)
    }

    /// Mark the current session stale so the next `ensure_session` logs in
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        self.load_persisted(&mut state).await;
        self.mark_stale(&mut state).await;
    }

    /// Mark the session stale only if `observed` is still the current one
    ///
    /// Returns false when another caller has already replaced it, in which
    /// case the replacement is left alone.
    pub async fn invalidate_if_current(&self, observed: &Session) -> bool {
        let mut state = self.state.lock().await;
        self.load_persisted(&mut state).await;

        let is_current = state
            .current
            .as_ref()
            .is_some_and(|s| s.generation == observed.generation && s.fresh);
        if is_current {
            self.mark_stale(&mut state).await;
        } else {
            tracing::debug!(
                observed = observed.generation,
                current = state.current.as_ref().map(|s| s.generation),
                "session already replaced, not invalidating"
            );
        }
        is_current
    }

    /// Fold cookies refreshed by the portal into the current session
    ///
    /// Ignored when `observed` is no longer current. Returns the updated session.
    pub async fn absorb_cookies(
        &self,
        observed: &Session,
        cookies: Vec<CookieEntry>,
    ) -> Option<Session> {
        if cookies.is_empty() {
            return None;
        }

        let mut state = self.state.lock().await;
        let session = state
            .current
            .as_mut()
            .filter(|s| s.generation == observed.generation)?;
        session.jar.merge(cookies);
        let updated = session.clone();

        self.persist(&updated).await;
        Some(updated)
    }

    /// Forget the session entirely, in memory and on disk
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.current = None;
        state.loaded = true;

        if let Err(e) = self.db.delete_session().await {
            tracing::error!(error = %e, "failed to delete persisted session");
        }
        tracing::info!("session cleared");
    }

    /// Snapshot of the current session, if one is held
    pub async fn current(&self) -> Option<Session> {
        let mut state = self.state.lock().await;
        self.load_persisted(&mut state).await;
        state.current.clone()
    }

    /// Number of real login attempts made by this manager
    pub fn login_count(&self) -> u64 {
        self.login_count.load(Ordering::SeqCst)
    }

    async fn load_persisted(&self, state: &mut SessionState) {
        if state.loaded {
            return;
        }
        state.loaded = true;

        match self.db.load_session().await {
            Ok(Some(session)) => {
                tracing::info!(
                    generation = session.generation,
                    fresh = session.fresh,
                    "loaded persisted session"
                );
                state.last_generation = state.last_generation.max(session.generation);
                state.current = Some(session);
            }
            Ok(None) => tracing::debug!("no persisted session"),
            Err(e) => tracing::warn!(error = %e, "failed to load persisted session, will log in"),
        }
    }

    async fn mark_stale(&self, state: &mut SessionState) {
        let Some(session) = state.current.as_mut().filter(|s| s.fresh) else {
            return;
        };
        session.fresh = false;
        let generation = session.generation;

        if let Err(e) = self.db.mark_session_stale().await {
            tracing::error!(error = %e, "failed to persist session invalidation");
        }

        tracing::info!(generation, "session invalidated");
        self.emit_event(Event::SessionInvalidated { generation });
    }

    /// Write the session; failures are logged, the in-memory session stays valid
    async fn persist(&self, session: &Session) {
        let result = with_retry(&self.retry, || self.db.save_session(session)).await;
        if let Err(e) = result {
            tracing::error!(
                error = %e,
                generation = session.generation,
                "failed to persist session"
            );
        }
    }

    fn emit_event(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}
