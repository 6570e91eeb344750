//! Persisted portal session (a single row).

use crate::error::DatabaseError;
use crate::session::{CookieJar, Session};
use crate::{Error, Result};
use chrono::{TimeZone, Utc};

use super::{Database, SessionRow};

impl Database {
    /// Load the persisted session, if any
    ///
    /// A row whose cookie JSON does not decode is reported as
    /// [`DatabaseError::Corrupt`].
    pub async fn load_session(&self) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT cookies, fresh, generation, logged_in_at
            FROM portal_session
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load session: {}",
                e
            )))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let jar: CookieJar = serde_json::from_str(&row.cookies).map_err(|e| {
            Error::Database(DatabaseError::Corrupt(format!(
                "session cookie jar: {}",
                e
            )))
        })?;

        Ok(Some(Session {
            jar,
            fresh: row.fresh != 0,
            generation: row.generation.max(0) as u64,
            logged_in_at: row
                .logged_in_at
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        }))
    }

    /// Replace the persisted session
    ///
    /// SQLite failures come back as [`Error::Sqlx`] so that lock contention
    /// is seen as retryable by the caller.
    pub async fn save_session(&self, session: &Session) -> Result<()> {
        let cookies = serde_json::to_string(&session.jar)?;

        sqlx::query(
            r#"
            INSERT INTO portal_session (id, cookies, fresh, generation, logged_in_at, updated_at)
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                cookies = excluded.cookies,
                fresh = excluded.fresh,
                generation = excluded.generation,
                logged_in_at = excluded.logged_in_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(cookies)
        .bind(session.fresh as i64)
        .bind(session.generation as i64)
        .bind(session.logged_in_at.map(|t| t.timestamp()))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Clear only the freshness flag of the persisted session
    pub async fn mark_session_stale(&self) -> Result<()> {
        sqlx::query("UPDATE portal_session SET fresh = 0, updated_at = ? WHERE id = 1")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark session stale: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete the persisted session
    pub async fn delete_session(&self) -> Result<()> {
        sqlx::query("DELETE FROM portal_session")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete session: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
