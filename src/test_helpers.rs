//! Shared test helpers: a mock portal on wiremock and pre-wired components.

use crate::client::PortalClient;
use crate::config::{Config, PageConfig, RetryConfig};
use crate::db::Database;
use crate::session::SessionManager;
use crate::types::{Event, PageKind};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::broadcast;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Id of the DevExpress grid the portal renders
pub(crate) const GRID_ID: &str = "ctl00_ctl00_ctl00_cph1_main_dr_Grid_DXMainTable";

/// Session cookie set by a successful login
pub(crate) const AUTH_COOKIE: &str = ".ASPXAUTH";

/// Login page as the portal renders it
pub(crate) const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Log In</title></head><body>
<form name="aspnetForm" method="post" action="./Login.aspx" id="aspnetForm">
  <input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="dDwtMTA4NzI0" />
  <input type="hidden" name="__EVENTVALIDATION" id="__EVENTVALIDATION" value="wEWBAKP" />
  <input name="ctl00$cph1$main$Login1$UserName" type="text" id="UserName" />
  <input name="ctl00$cph1$main$Login1$Password" type="password" id="Password" />
  <input type="submit" name="ctl00$cph1$main$Login1$LoginButton" value="Log In" />
</form>
</body></html>"#;

/// Config pointing at `server`, with a database inside `dir` and fast retries
pub(crate) fn test_config(server: &MockServer, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.portal.base_url = server.uri();
    config.persistence.database_path = dir.path().join("calwatch.db");
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.pages = vec![PageConfig::new(
        "equipment",
        "/Dashboard/EquipmentList.aspx",
        PageKind::Equipment,
    )];
    config
}

/// Serve the login page on GET /Login.aspx
pub(crate) async fn mount_login_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/Login.aspx"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "ASP.NET_SessionId=sess01; path=/; HttpOnly")
                .set_body_string(LOGIN_PAGE),
        )
        .mount(server)
        .await;
}

/// Accept any login that round-trips the view state
///
/// Sets the auth cookie to `token` and redirects to the landing page.
pub(crate) async fn mount_login_success(server: &MockServer, token: &str) {
    mount_login_page(server).await;

    Mock::given(method("POST"))
        .and(path("/Login.aspx"))
        .and(body_string_contains("__VIEWSTATE=dDwtMTA4NzI0"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/Dashboard/LandingPage.aspx")
                .insert_header(
                    "Set-Cookie",
                    format!("{AUTH_COOKIE}={token}; path=/; HttpOnly").as_str(),
                ),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/Dashboard/LandingPage.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Welcome</html>"))
        .mount(server)
        .await;
}

/// Reject every login by serving the login form again
pub(crate) async fn mount_login_rejected(server: &MockServer) {
    mount_login_page(server).await;

    Mock::given(method("POST"))
        .and(path("/Login.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(server)
        .await;
}

/// Number of POSTs the mock portal received on the login endpoint
pub(crate) async fn login_posts(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/Login.aspx")
        .count()
}

/// Number of GETs the mock portal received on `page_path`
pub(crate) async fn page_hits(server: &MockServer, page_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET" && r.url.path() == page_path)
        .count()
}

/// Session manager wired to `config`, plus its database and an event receiver
pub(crate) async fn create_test_session_manager(
    config: &Config,
) -> (Arc<SessionManager>, Arc<Database>, broadcast::Receiver<Event>) {
    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let client = PortalClient::new(&config.portal).unwrap();
    let (event_tx, event_rx) = broadcast::channel(256);
    let manager = Arc::new(SessionManager::new(client, db.clone(), config, event_tx));
    (manager, db, event_rx)
}

/// A DevExpress-style grid: header cells wrap their caption in a nested table
pub(crate) fn grid_html(headers: &[&str], rows: &[Vec<&str>]) -> String {
    let mut html = format!(r#"<html><body><h2>Equipment List</h2><table id="{GRID_ID}">"#);

    html.push_str(r#"<tr id="ctl00_ctl00_ctl00_cph1_main_dr_Grid_DXHeadersRow0">"#);
    for header in headers {
        html.push_str(&format!(
            r#"<td class="dxgvHeader_Moderno"><table><tr><td>{header}</td><td><img alt="sort"/></td></tr></table></td>"#
        ));
    }
    html.push_str("</tr>");

    for (i, row) in rows.iter().enumerate() {
        html.push_str(&format!(
            r#"<tr id="ctl00_ctl00_ctl00_cph1_main_dr_Grid_DXDataRow{i}" class="dxgvDataRow_Moderno">"#
        ));
        for cell in row {
            html.push_str(&format!(r#"<td class="dxgv">{cell}</td>"#));
        }
        html.push_str("</tr>");
    }

    html.push_str("</table></body></html>");
    html
}

/// Calibration date `days` from now in the portal's primary format
pub(crate) fn portal_date(days: i64) -> String {
    // Last minute of the day, so the floored difference is exactly `days`
    let date = chrono::Local::now().date_naive() + chrono::Duration::days(days);
    date.format("%m/%d/%Y 11:59 PM").to_string()
}

/// Start a mock server and a tempdir for one test
pub(crate) async fn portal_fixture() -> (MockServer, TempDir) {
    (MockServer::start().await, tempdir().unwrap())
}

/// Fetch engine sharing a fresh session manager, plus that manager
pub(crate) async fn create_test_fetch_engine(
    config: &Config,
) -> (crate::fetch::FetchEngine, Arc<SessionManager>) {
    let (sessions, _db, _rx) = create_test_session_manager(config).await;
    let client = PortalClient::new(&config.portal).unwrap();
    let engine = crate::fetch::FetchEngine::new(client, sessions.clone(), config);
    (engine, sessions)
}
