//! Thin HTTP client for the portal
//!
//! Redirects are never followed automatically: the login exchange needs the
//! `Set-Cookie` headers and `Location` of each hop, and a redirect back to the
//! login page is how the portal says a session has expired.

use crate::config::PortalConfig;
use crate::error::{Error, Result};
use crate::session::{CookieEntry, CookieJar};
use reqwest::header::{COOKIE, LOCATION};
use url::Url;

/// One HTTP response with everything the session layer needs from it
#[derive(Clone, Debug)]
pub struct PortalResponse {
    /// URL that was requested
    pub url: Url,
    /// HTTP status code
    pub status: u16,
    /// `Location` header resolved against `url`, for redirects
    pub location: Option<Url>,
    /// Cookies set by this response
    pub set_cookies: Vec<CookieEntry>,
    /// Response body (empty for redirects without one)
    pub body: String,
}

impl PortalResponse {
    /// 3xx with a usable `Location`
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location.is_some()
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 5xx
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// HTTP client bound to one portal
#[derive(Clone, Debug)]
pub struct PortalClient {
    http: reqwest::Client,
    base_url: Url,
    login_url: Url,
}

impl PortalClient {
    /// Build a client from portal settings
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an unparsable base URL or login path and
    /// [`Error::Network`] if the TLS backend cannot be initialized.
    pub fn new(config: &PortalConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL '{}': {}", config.base_url, e),
            key: Some("portal.base_url".into()),
        })?;
        let login_url = base_url.join(&config.login_path).map_err(|e| Error::Config {
            message: format!("invalid login path '{}': {}", config.login_path, e),
            key: Some("portal.login_path".into()),
        })?;

        if config.accept_invalid_certs {
            tracing::warn!(portal = %base_url, "TLS certificate verification disabled");
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            http,
            base_url,
            login_url,
        })
    }

    /// Portal base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute login page URL
    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    /// Resolve a page path against the base URL
    pub fn resolve(&self, path: &str) -> std::result::Result<Url, url::ParseError> {
        self.base_url.join(path)
    }

    /// Whether `url` points at the login page (query and case ignored)
    pub fn is_login_url(&self, url: &Url) -> bool {
        url.host_str() == self.login_url.host_str()
            && url.path().eq_ignore_ascii_case(self.login_url.path())
    }

    /// GET `url`, sending the jar's cookies
    pub async fn get(
        &self,
        url: &Url,
        jar: &CookieJar,
    ) -> std::result::Result<PortalResponse, reqwest::Error> {
        let request = self.with_cookies(self.http.get(url.clone()), jar);
        self.execute(url, request).await
    }

    /// POST an urlencoded form to `url`, sending the jar's cookies
    pub async fn post_form(
        &self,
        url: &Url,
        form: &[(String, String)],
        jar: &CookieJar,
    ) -> std::result::Result<PortalResponse, reqwest::Error> {
        let request = self.with_cookies(self.http.post(url.clone()).form(form), jar);
        self.execute(url, request).await
    }

    fn with_cookies(
        &self,
        request: reqwest::RequestBuilder,
        jar: &CookieJar,
    ) -> reqwest::RequestBuilder {
        match jar.header_value(chrono::Utc::now()) {
            Some(header) => request.header(COOKIE, header),
            None => request,
        }
    }

    async fn execute(
        &self,
        url: &Url,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<PortalResponse, reqwest::Error> {
        let response = request.send().await?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| url.join(v).ok());
        let now = chrono::Utc::now();
        let set_cookies: Vec<CookieEntry> = response
            .cookies()
            .map(|c| CookieEntry::from_response(&c, now))
            .collect();
        let body = response.text().await?;

        tracing::debug!(
            url = %url,
            status,
            location = location.as_ref().map(Url::as_str),
            cookies = set_cookies.len(),
            "portal response"
        );

        Ok(PortalResponse {
            url: url.clone(),
            status,
            location,
            set_cookies,
            body,
        })
    }
}
