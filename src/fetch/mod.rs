//! Fetch engine: bounded-concurrency page retrieval with retry and re-login
//!
//! Every attempt is classified into a [`FetchOutcome`]. Transient outcomes go
//! through the retry policy; an `Expired` outcome invalidates the session,
//! obtains a new one, and starts over with a fresh retry budget, once.

use crate::client::PortalClient;
use crate::config::{Config, PageConfig, RetryConfig};
use crate::error::{AuthError, FetchError};
use crate::retry::{IsRetryable, with_retry};
use crate::session::{CookieEntry, Session, SessionManager};
use crate::types::{Credentials, RawPage, TableAnchor};
use futures::stream::{self, StreamExt};
use std::sync::Arc;

/// Non-login redirect hops followed for one page
const MAX_REDIRECTS: usize = 5;

/// Classification of a single fetch attempt
#[derive(Debug)]
pub enum FetchOutcome {
    /// The page was retrieved
    Page(RawPage),
    /// The portal answered with its login page instead
    Expired,
    /// Worth retrying (connection error, timeout, 5xx)
    Transient(FetchError),
    /// Not worth retrying (4xx, malformed URL, redirect loop)
    Terminal(FetchError),
}

/// Failure of one attempt as seen by the retry loop
#[derive(Debug)]
enum AttemptError {
    Expired,
    Transient(FetchError),
    Terminal(FetchError),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Expired => f.write_str("session expired"),
            AttemptError::Transient(e) | AttemptError::Terminal(e) => e.fmt(f),
        }
    }
}

impl IsRetryable for AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Transient(_))
    }
}

/// Retrieves target pages with the shared session
pub struct FetchEngine {
    client: PortalClient,
    sessions: Arc<SessionManager>,
    retry: RetryConfig,
    max_concurrent: usize,
    /// Text only present on the login page
    login_marker: String,
}

impl FetchEngine {
    /// Create an engine sharing `sessions` with the rest of the scraper
    pub fn new(client: PortalClient, sessions: Arc<SessionManager>, config: &Config) -> Self {
        Self {
            client,
            sessions,
            retry: config.retry.clone(),
            max_concurrent: config.fetch.max_concurrent_fetches.max(1),
            login_marker: config.portal.password_field.clone(),
        }
    }

    /// Fetch one page, retrying transient failures and re-logging in once on expiry
    ///
    /// # Errors
    /// - [`FetchError::Network`] / [`FetchError::ServerError`] once retries are exhausted
    /// - [`FetchError::Login`] if re-login fails; the whole run cannot proceed
    /// - [`FetchError::Auth`] if the fresh session is rejected too
    /// - [`FetchError::InvalidUrl`] if the page path does not resolve
    /// - [`FetchError::UnexpectedStatus`] for other non-success statuses
    pub async fn fetch(
        &self,
        session: Session,
        page: &PageConfig,
        credentials: &Credentials,
    ) -> Result<RawPage, FetchError> {
        let mut session = session;
        let mut relogged = false;

        loop {
            let current = &session;
            let attempt = with_retry(&self.retry, || self.attempt(current, page)).await;

            match attempt {
                Ok(raw) => return Ok(raw),
                Err(AttemptError::Transient(e) | AttemptError::Terminal(e)) => return Err(e),
                Err(AttemptError::Expired) if !relogged => {
                    relogged = true;
                    tracing::info!(
                        page = %page.key,
                        generation = session.generation(),
                        "session expired during fetch, re-authenticating"
                    );

                    session = self
                        .sessions
                        .renew(&session, credentials)
                        .await
                        .map_err(|error| FetchError::Login {
                            url: page.path.clone(),
                            error,
                        })?;
                }
                Err(AttemptError::Expired) => {
                    tracing::warn!(page = %page.key, "session rejected again after re-login");
                    return Err(FetchError::Auth {
                        url: page.path.clone(),
                        reason: "login page served again after re-login".into(),
                    });
                }
            }
        }
    }

    /// Fetch all pages concurrently, at most `max_concurrent_fetches` at a time
    ///
    /// Results come back in the order of `pages`.
    ///
    /// # Errors
    /// The [`AuthError`] of a failed re-login. Fetches still pending are
    /// dropped, since none of them can succeed without a session.
    pub async fn fetch_all(
        &self,
        session: &Session,
        pages: &[PageConfig],
        credentials: &Credentials,
    ) -> Result<Vec<Result<RawPage, FetchError>>, AuthError> {
        let fetches = pages
            .iter()
            .enumerate()
            .map(|(index, page)| {
                let session = session.clone();
                async move { (index, self.fetch(session, page, credentials).await) }
            })
            .collect::<Vec<_>>();

        let mut results: Vec<Option<Result<RawPage, FetchError>>> =
            pages.iter().map(|_| None).collect();
        let mut completed = stream::iter(fetches).buffer_unordered(self.max_concurrent);

        while let Some((index, result)) = completed.next().await {
            if let Err(e) = &result {
                if let Some(error) = e.login_failure() {
                    tracing::warn!(
                        page = %pages[index].key,
                        error = %error,
                        "re-login failed, abandoning remaining pages"
                    );
                    return Err(error.clone());
                }
            }
            results[index] = Some(result);
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn attempt(&self, session: &Session, page: &PageConfig) -> Result<RawPage, AttemptError> {
        match self.fetch_once(session, page).await {
            FetchOutcome::Page(raw) => Ok(raw),
            FetchOutcome::Expired => Err(AttemptError::Expired),
            FetchOutcome::Transient(e) => Err(AttemptError::Transient(e)),
            FetchOutcome::Terminal(e) => Err(AttemptError::Terminal(e)),
        }
    }

    /// One attempt, following non-login redirects, without retry
    pub async fn fetch_once(&self, session: &Session, page: &PageConfig) -> FetchOutcome {
        let mut url = match self.client.resolve(&page.path) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::Terminal(FetchError::InvalidUrl {
                    url: page.path.clone(),
                    message: e.to_string(),
                });
            }
        };

        let mut jar = session.cookies().clone();
        let mut refreshed: Vec<CookieEntry> = Vec::new();
        let mut hops = 0;

        let outcome = loop {
            tracing::debug!(page = %page.key, url = %url, "fetching page");

            let response = match self.client.get(&url, &jar).await {
                Ok(response) => response,
                Err(e) => {
                    break FetchOutcome::Transient(FetchError::from_transport(url.as_str(), &e));
                }
            };
            jar.merge(response.set_cookies.iter().cloned());
            refreshed.extend(response.set_cookies.iter().cloned());

            if response.is_redirect() {
                let Some(next) = response.location.clone() else {
                    break FetchOutcome::Terminal(FetchError::UnexpectedStatus {
                        url: url.to_string(),
                        status: response.status,
                    });
                };
                if self.client.is_login_url(&next) {
                    break FetchOutcome::Expired;
                }
                if hops >= MAX_REDIRECTS {
                    break FetchOutcome::Terminal(FetchError::UnexpectedStatus {
                        url: url.to_string(),
                        status: response.status,
                    });
                }
                hops += 1;
                url = next;
                continue;
            }

            if response.is_server_error() {
                break FetchOutcome::Transient(FetchError::ServerError {
                    url: url.to_string(),
                    status: response.status,
                });
            }

            if response.is_success() {
                if response.body.contains(&self.login_marker) {
                    break FetchOutcome::Expired;
                }
                break FetchOutcome::Page(RawPage {
                    key: page.key.clone(),
                    kind: page.kind,
                    anchor: TableAnchor {
                        table_id: page.table_id.clone(),
                        heading: page.heading.clone(),
                    },
                    url: url.to_string(),
                    status: response.status,
                    body: response.body,
                    fetched_at: chrono::Utc::now(),
                });
            }

            break FetchOutcome::Terminal(FetchError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status,
            });
        };

        // Sliding-expiration cookies renewed by the portal
        if matches!(outcome, FetchOutcome::Page(_)) && !refreshed.is_empty() {
            self.sessions.absorb_cookies(session, refreshed).await;
        }

        outcome
    }
}
