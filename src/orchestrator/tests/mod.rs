use super::*;
use crate::config::PageConfig;
use crate::test_helpers::{mount_login_success, portal_date, test_config};
use crate::types::{Credentials, PageKind};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod runs;

const INSTRUMENTS_PATH: &str = "/Dashboard/Instruments.aspx";
const STATIONS_PATH: &str = "/Dashboard/DockingStations.aspx";

const INSTRUMENT_HEADERS: &[&str] = &[
    "Equipment Group",
    "Type",
    "Serial Number",
    "Last Calibration Date",
    "Next Calibration Date",
    "Upgrade Available",
];

const STATION_HEADERS: &[&str] = &[
    "Type",
    "Serial Number",
    "State",
    "Instrument Currently Docked",
    "Gas Inlet 1",
    "Gas Inlet 1 Pressure",
];

fn creds() -> Credentials {
    Credentials::new("alice", "s3cret")
}

/// Config with an instruments page and a docking stations page
fn two_page_config(server: &MockServer, dir: &TempDir) -> Config {
    let mut config = test_config(server, dir);
    config.pages = vec![
        PageConfig::new("instruments", INSTRUMENTS_PATH, PageKind::Instruments),
        PageConfig::new("stations", STATIONS_PATH, PageKind::DockingStations),
    ];
    config
}

/// Instruments due in 5 days (warning) and 2 days ago (danger)
fn instruments_html() -> String {
    let soon = portal_date(5);
    let overdue = portal_date(-2);
    crate::test_helpers::grid_html(
        INSTRUMENT_HEADERS,
        &[
            vec!["Unit 1", "Ventis Pro5", "VP-001", "01/02/2025", soon.as_str(), "No"],
            vec!["Unit 2", "MX4", "MX-002", "01/02/2025", overdue.as_str(), "YesPending"],
        ],
    )
}

fn stations_html() -> String {
    crate::test_helpers::grid_html(
        STATION_HEADERS,
        &[vec!["DSX", "DS-100", "Docked", "VP-001", "Quad Mix", "1200 psi"]],
    )
}

async fn mount_page(server: &MockServer, page_path: &str, body: String, delay: Option<Duration>) {
    let mut template = ResponseTemplate::new(200).set_body_string(body);
    if let Some(delay) = delay {
        template = template.set_delay(delay);
    }
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(template)
        .mount(server)
        .await;
}

/// Login plus both pages, each answering after `delay`
async fn mount_portal(server: &MockServer, delay: Option<Duration>) {
    mount_login_success(server, "tok").await;
    mount_page(server, INSTRUMENTS_PATH, instruments_html(), delay).await;
    mount_page(server, STATIONS_PATH, stations_html(), delay).await;
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
