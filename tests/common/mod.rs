//! Common test utilities for calwatch integration tests
//!
//! A wiremock-backed stand-in for the portal: a WebForms login page, a login
//! endpoint that sets the auth cookie, and DevExpress-style grid pages.

#![allow(dead_code)]

use calwatch::Config;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the default equipment page
pub const EQUIPMENT_PATH: &str = "/Dashboard/EquipmentList.aspx";

/// Grid id the portal renders and the default config looks for
pub const GRID_ID: &str = "ctl00_ctl00_ctl00_cph1_main_dr_Grid_DXMainTable";

pub const LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Log In</title></head><body>
<form name="aspnetForm" method="post" action="./Login.aspx" id="aspnetForm">
  <input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="e2eViewState" />
  <input type="hidden" name="__EVENTVALIDATION" id="__EVENTVALIDATION" value="e2eValidation" />
  <input name="ctl00$cph1$main$Login1$UserName" type="text" id="UserName" />
  <input name="ctl00$cph1$main$Login1$Password" type="password" id="Password" />
  <input type="submit" name="ctl00$cph1$main$Login1$LoginButton" value="Log In" />
</form>
</body></html>"#;

pub const EQUIPMENT_HEADERS: &[&str] = &[
    "Category",
    "Equipment Group",
    "Type",
    "Serial Number",
    "Last Calibration Date",
    "Next Calibration Date",
    "Upgrade Available",
    "Last Known State",
    "Instrument Currently Docked",
];

/// Config built the way an embedding application would: JSON from elsewhere
pub fn config_from_json(server: &MockServer, dir: &TempDir) -> Config {
    let json = serde_json::json!({
        "portal": { "base_url": server.uri() },
        "persistence": { "database_path": dir.path().join("calwatch.db") },
        "retry": {
            "max_attempts": 1,
            "initial_delay": 0,
            "max_delay": 0,
            "jitter": false
        },
        "health": { "update_frequency": 3600, "stale_margin": 600 }
    });
    serde_json::from_value(json).expect("config deserializes")
}

/// Login page plus a login endpoint that accepts `username`
pub async fn mount_login(server: &MockServer, username: &str, token: &str) {
    Mock::given(method("GET"))
        .and(path("/Login.aspx"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "ASP.NET_SessionId=e2e; path=/; HttpOnly")
                .set_body_string(LOGIN_PAGE),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/Login.aspx"))
        .and(body_string_contains(username))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/Dashboard/LandingPage.aspx")
                .insert_header(
                    "Set-Cookie",
                    format!(".ASPXAUTH={token}; path=/; HttpOnly").as_str(),
                ),
        )
        .with_priority(1)
        .mount(server)
        .await;

    // Anyone else gets the form back
    Mock::given(method("POST"))
        .and(path("/Login.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .with_priority(5)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/Dashboard/LandingPage.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Welcome</html>"))
        .mount(server)
        .await;
}

/// Serve `body` on GET `page_path`
pub async fn mount_page(server: &MockServer, page_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// DevExpress-style grid with nested header tables
pub fn grid_html(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut html = format!(r#"<html><body><h2>Equipment List</h2><table id="{GRID_ID}">"#);

    html.push_str(r#"<tr id="grid_DXHeadersRow0">"#);
    for header in headers {
        html.push_str(&format!(
            r#"<td class="dxgvHeader"><table><tr><td>{header}</td></tr></table></td>"#
        ));
    }
    html.push_str("</tr>");

    for (i, row) in rows.iter().enumerate() {
        html.push_str(&format!(r#"<tr id="grid_DXDataRow{i}">"#));
        for cell in row {
            html.push_str(&format!("<td>{cell}</td>"));
        }
        html.push_str("</tr>");
    }

    html.push_str("</table></body></html>");
    html
}

/// Mixed equipment grid: two instruments and one docking station
///
/// VP-001 is due in 5 days, MX-002 was due 2 days ago, DS-100 holds VP-001.
pub fn equipment_html() -> String {
    let row = |cells: &[&str]| cells.iter().map(|c| c.to_string()).collect::<Vec<_>>();
    let soon = portal_date(5);
    let overdue = portal_date(-2);

    grid_html(
        EQUIPMENT_HEADERS,
        &[
            row(&[
                "Instrument", "Unit 1", "Ventis Pro5", "VP-001", "01/02/2025", soon.as_str(), "No", "",
                "",
            ]),
            row(&[
                "Instrument", "Unit 2", "MX4", "MX-002", "01/02/2025", overdue.as_str(), "YesPending",
                "", "",
            ]),
            row(&[
                "Docking Station", "", "DSX", "DS-100", "", "", "", "Docked", "VP-001",
            ]),
        ],
    )
}

/// Calibration date `days` from today, late enough that whole days count exactly
pub fn portal_date(days: i64) -> String {
    let date = chrono::Local::now().date_naive() + chrono::Duration::days(days);
    date.format("%m/%d/%Y 11:59 PM").to_string()
}

/// Number of GETs on `page_path`
pub async fn page_hits(server: &MockServer, page_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "GET" && r.url.path() == page_path)
        .count()
}

/// Number of login submissions
pub async fn login_posts(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/Login.aspx")
        .count()
}
