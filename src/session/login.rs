//! Portal login exchange
//!
//! The portal is an ASP.NET WebForms site: the login page carries hidden state
//! (`__VIEWSTATE`, `__EVENTVALIDATION`, ...) that must be posted back together
//! with the credentials.

use crate::client::{PortalClient, PortalResponse};
use crate::config::PortalConfig;
use crate::error::AuthError;
use crate::session::CookieJar;
use crate::types::Credentials;
use scraper::{Html, Selector};
use url::Url;

/// Redirect hops followed while loading the login page or the post-login landing page
const MAX_REDIRECTS: usize = 5;

/// How the login form is submitted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FormMethod {
    Get,
    Post,
}

/// The login form as found on the login page
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LoginForm {
    /// Absolute submit URL
    pub action: Url,
    pub method: FormMethod,
    /// Fields to round-trip (hidden inputs), in document order
    pub hidden: Vec<(String, String)>,
}

/// Locate the first `<form>` in `html` and collect its hidden inputs
pub(crate) fn parse_login_form(html: &str, page_url: &Url) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let Ok(form_sel) = Selector::parse("form") else {
        return None;
    };
    let Ok(input_sel) = Selector::parse("input") else {
        return None;
    };

    let form = document.select(&form_sel).next()?;

    let action = match form.value().attr("action").map(str::trim) {
        Some(action) if !action.is_empty() => page_url.join(action).ok()?,
        _ => page_url.clone(),
    };
    let method = match form.value().attr("method") {
        Some(m) if m.eq_ignore_ascii_case("get") => FormMethod::Get,
        _ => FormMethod::Post,
    };

    let hidden = form
        .select(&input_sel)
        .filter(|input| {
            input
                .value()
                .attr("type")
                .is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
        })
        .filter_map(|input| {
            let name = input.value().attr("name").filter(|n| !n.is_empty())?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    Some(LoginForm {
        action,
        method,
        hidden,
    })
}

/// Build the submitted field list: hidden state, credentials, then the submit button
pub(crate) fn build_form_fields(
    form: &LoginForm,
    config: &PortalConfig,
    credentials: &Credentials,
) -> Vec<(String, String)> {
    let overridden = |name: &str| {
        name == config.username_field
            || name == config.password_field
            || config.submit_button.as_deref() == Some(name)
    };

    let mut fields: Vec<(String, String)> = form
        .hidden
        .iter()
        .filter(|(name, _)| !overridden(name))
        .cloned()
        .collect();

    fields.push((config.username_field.clone(), credentials.username.clone()));
    fields.push((config.password_field.clone(), credentials.password.clone()));
    if let Some(button) = &config.submit_button {
        fields.push((button.clone(), button.clone()));
    }

    fields
}

/// Run the full login exchange and return the resulting cookie jar
///
/// # Errors
/// - [`AuthError::InvalidCredentials`] when the portal answers with the login page again
/// - [`AuthError::Unreachable`] on transport errors, 5xx, or a login page without a form
pub(crate) async fn perform_login(
    client: &PortalClient,
    config: &PortalConfig,
    credentials: &Credentials,
) -> Result<CookieJar, AuthError> {
    let mut jar = CookieJar::seeded(&config.extra_cookies);

    let page = get_following(client, client.login_url().clone(), &mut jar)
        .await
        .map_err(|e| AuthError::Unreachable(format!("login page: {e}")))?;

    if page.is_server_error() || !page.is_success() {
        return Err(AuthError::Unreachable(format!(
            "login page returned status {}",
            page.status
        )));
    }

    let form = parse_login_form(&page.body, &page.url)
        .ok_or_else(|| AuthError::Unreachable("login page has no form".into()))?;
    let fields = build_form_fields(&form, config, credentials);

    tracing::debug!(
        action = %form.action,
        hidden_fields = form.hidden.len(),
        "submitting login form"
    );

    let response = match form.method {
        FormMethod::Post => client.post_form(&form.action, &fields, &jar).await,
        FormMethod::Get => {
            let mut url = form.action.clone();
            url.query_pairs_mut().extend_pairs(fields.iter());
            client.get(&url, &jar).await
        }
    }
    .map_err(|e| AuthError::Unreachable(format!("login submit: {e}")))?;

    jar.merge(response.set_cookies.iter().cloned());

    if response.is_server_error() {
        return Err(AuthError::Unreachable(format!(
            "login submit returned status {}",
            response.status
        )));
    }

    if response.is_redirect() {
        let target = response
            .location
            .clone()
            .ok_or_else(|| AuthError::Unreachable("redirect without location".into()))?;
        if client.is_login_url(&target) {
            return Err(AuthError::InvalidCredentials);
        }

        // The landing page may set further cookies; a failure here does not undo the login
        match get_following(client, target, &mut jar).await {
            Ok(landing) if client.is_login_url(&landing.url) => {
                return Err(AuthError::InvalidCredentials);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to load post-login landing page"),
        }
        return Ok(jar);
    }

    if response.is_success() && !response.body.contains(&config.password_field) {
        return Ok(jar);
    }

    Err(AuthError::InvalidCredentials)
}

/// GET `url`, following redirects manually so every hop's cookies reach the jar
async fn get_following(
    client: &PortalClient,
    mut url: Url,
    jar: &mut CookieJar,
) -> Result<PortalResponse, reqwest::Error> {
    let mut hops = 0;
    loop {
        let response = client.get(&url, jar).await?;
        jar.merge(response.set_cookies.iter().cloned());

        match response.location.clone() {
            Some(next) if response.is_redirect() && hops < MAX_REDIRECTS => {
                hops += 1;
                url = next;
            }
            _ => return Ok(response),
        }
    }
}
