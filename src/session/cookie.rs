//! Cookie jar owned by a [`Session`](super::Session)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One stored cookie
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieEntry {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// `Domain` attribute, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// `Path` attribute, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Absolute expiry; `None` for session cookies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl CookieEntry {
    /// A session cookie with no attributes
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            expires: None,
        }
    }

    /// Convert a parsed `Set-Cookie` header, preferring `Max-Age` over `Expires`
    pub fn from_response(cookie: &reqwest::cookie::Cookie<'_>, now: DateTime<Utc>) -> Self {
        let expires = cookie
            .max_age()
            .and_then(|age| chrono::Duration::from_std(age).ok())
            .map(|age| now + age)
            .or_else(|| cookie.expires().map(DateTime::<Utc>::from));

        Self {
            name: cookie.name().to_string(),
            value: cookie.value().to_string(),
            domain: cookie.domain().map(str::to_string),
            path: cookie.path().map(str::to_string),
            expires,
        }
    }

    /// Whether the cookie carries an expiry that has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}

/// The cookies of one portal session, keyed by name
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    entries: Vec<CookieEntry>,
}

impl CookieJar {
    /// A jar holding the statically configured cookies
    pub fn seeded(extra: &BTreeMap<String, String>) -> Self {
        let mut jar = Self::default();
        for (name, value) in extra {
            jar.insert(CookieEntry::new(name, value));
        }
        jar
    }

    /// Insert or replace a cookie by name
    ///
    /// An empty value or an expiry in the past deletes the cookie, matching
    /// how servers clear cookies on logout.
    pub fn insert(&mut self, cookie: CookieEntry) {
        self.entries.retain(|c| c.name != cookie.name);
        if !cookie.value.is_empty() && !cookie.is_expired(Utc::now()) {
            self.entries.push(cookie);
        }
    }

    /// Insert every cookie, in order
    pub fn merge(&mut self, cookies: impl IntoIterator<Item = CookieEntry>) {
        for cookie in cookies {
            self.insert(cookie);
        }
    }

    /// Look up a cookie by name
    pub fn get(&self, name: &str) -> Option<&CookieEntry> {
        self.entries.iter().find(|c| c.name == name)
    }

    /// Number of stored cookies
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the jar is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over stored cookies
    pub fn iter(&self) -> impl Iterator<Item = &CookieEntry> {
        self.entries.iter()
    }

    /// `Cookie` request header for the unexpired cookies, if any
    pub fn header_value(&self, now: DateTime<Utc>) -> Option<String> {
        let pairs: Vec<String> = self
            .entries
            .iter()
            .filter(|c| !c.is_expired(now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// True when at least one cookie carries an expiry and all such cookies have passed it
    ///
    /// Session cookies (no expiry) say nothing about the server-side lifetime,
    /// so a jar holding only those is never provably expired.
    pub fn all_expired(&self, now: DateTime<Utc>) -> bool {
        let mut dated = self.entries.iter().filter_map(|c| c.expires).peekable();
        dated.peek().is_some() && dated.all(|at| at <= now)
    }
}
