use httpmock::prelude::*;
use partner_etl::{EtlError, LocalEtlEngine, RunOutcome, TomlConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const HEADER: &str = "country,country_code,region,region_code,city\n";

fn partner_page(level: &str, partners: &[(&str, &str)]) -> String {
    let cards: Vec<String> = partners
        .iter()
        .map(|(id, name)| {
            format!(
                r#"<div class="xcx_partner_box">
                     <a href="/p/{id}"><strong>{name}</strong></a>
                     <div style="display:flex;">+1 915 000 {id}</div>
                     <div style="display:flex;">www.{id}.example</div>
                     <div style="display:flex;">{id} Main St</div>
                     <div style="display:flex;">Partner ID: {id}</div>
                   </div>"#
            )
        })
        .collect();
    format!("<h3>3CX {level} Partners</h3>\n{}", cards.join("\n"))
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(rows: &str) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("locations.csv"), format!("{HEADER}{rows}")).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn config(&self, server: &MockServer) -> TomlConfig {
        let mut config = TomlConfig::default();
        config.source.endpoint = server.url("/partners");
        config.source.timeout_seconds = 5;
        config.input.path = path_str(&self.path("locations.csv"));
        config.output.path = path_str(&self.path("out/partners.csv"));
        config.output.failures_path = path_str(&self.path("out/failures.csv"));
        config.cache.dir = path_str(&self.path("cache"));
        config.fetch.retry_attempts = 2;
        config.fetch.initial_backoff_ms = 1;
        config.fetch.max_backoff_ms = 5;
        config.fetch.request_delay_ms = 0;
        config
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.path(name)).unwrap()
    }
}

fn path_str(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

async fn run(config: &TomlConfig) -> partner_etl::Result<partner_etl::AggregateReport> {
    LocalEtlEngine::from_config(config, CancellationToken::new())
        .await?
        .run()
        .await
}

#[tokio::test]
async fn test_duplicate_rows_fetch_once_and_cache_every_key() {
    let ws = Workspace::new("United States,US,Texas,TX,\nUnited States,US,Ohio,OH,\nUnited States,us,Texas,tx,\n");
    let server = MockServer::start();
    let texas = server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=TX&name=");
        then.status(200)
            .body(partner_page("Titanium", &[("1001", "Lone Star Voice")]));
    });
    let ohio = server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=OH&name=");
        then.status(200).body("");
    });

    let report = run(&ws.config(&server)).await.unwrap();

    texas.assert_hits(1);
    ohio.assert_hits(1);
    assert_eq!(report.outcome(), RunOutcome::Complete);
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.stats.duplicate_rows, 1);
    assert!(ws.path("cache/US_TX_.json").exists());
    assert!(ws.path("cache/US_OH_.json").exists());

    let output = ws.read("out/partners.csv");
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("United States,Texas,,Titanium Partners,Lone Star Voice,"));
}

#[tokio::test]
async fn test_second_run_uses_cache_only() {
    let ws = Workspace::new("United States,US,Texas,TX,El Paso\nUnited States,US,Ohio,OH,\n");
    let server = MockServer::start();
    let el_paso = server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("city=El+Paso");
        then.status(200).body(partner_page("Gold", &[("2001", "Border Telecom")]));
    });
    let ohio = server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=OH&name=");
        then.status(200).body(partner_page("Silver", &[("2002", "Buckeye PBX")]));
    });
    let config = ws.config(&server);

    run(&config).await.unwrap();
    let first = ws.read("out/partners.csv");

    let report = run(&config).await.unwrap();
    let second = ws.read("out/partners.csv");

    el_paso.assert_hits(1);
    ohio.assert_hits(1);
    assert_eq!(report.stats.cache_hits, 2);
    assert_eq!(report.stats.network_requests, 0);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_force_refresh_refetches_cached_keys() {
    let ws = Workspace::new("United States,US,Ohio,OH,\n");
    let server = MockServer::start();
    let ohio = server.mock(|when, then| {
        when.method(POST).path("/partners");
        then.status(200).body(partner_page("Silver", &[("2002", "Buckeye PBX")]));
    });
    let mut config = ws.config(&server);

    run(&config).await.unwrap();
    config.cache.force_refresh = true;
    let report = run(&config).await.unwrap();

    ohio.assert_hits(2);
    assert_eq!(report.stats.fetched, 1);
    assert_eq!(report.stats.cache_hits, 0);
}

#[tokio::test]
async fn test_output_follows_input_order_not_completion_order() {
    let ws = Workspace::new(
        "United States,US,Texas,TX,\nUnited States,US,Ohio,OH,\nUnited States,US,Utah,UT,\n",
    );
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=TX&name=");
        then.status(200)
            .delay(Duration::from_millis(300))
            .body(partner_page("Gold", &[("1", "Slow Texas")]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=OH&name=");
        then.status(200).body(partner_page("Gold", &[("2", "Fast Ohio")]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=UT&name=");
        then.status(200)
            .delay(Duration::from_millis(100))
            .body(partner_page("Gold", &[("3", "Middle Utah")]));
    });
    let mut config = ws.config(&server);
    config.fetch.concurrency = 3;

    let report = run(&config).await.unwrap();

    let ids: Vec<&str> = report.records.iter().map(|r| r.partner_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);

    let output = ws.read("out/partners.csv");
    let names: Vec<&str> = output
        .lines()
        .skip(1)
        .map(|l| l.split(',').nth(4).unwrap())
        .collect();
    assert_eq!(names, vec!["Slow Texas", "Fast Ohio", "Middle Utah"]);
}

#[tokio::test]
async fn test_same_partner_from_two_locations_is_merged() {
    let ws = Workspace::new("United States,US,Texas,TX,\nUnited States,US,New Mexico,NM,\n");
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=TX&name=");
        then.status(200)
            .body(partner_page("Platinum", &[("42", "Southwest Comms"), ("43", "Alamo IT")]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=NM&name=");
        then.status(200)
            .body(partner_page("Platinum", &[("42", "Southwest Comms")]));
    });

    let report = run(&ws.config(&server)).await.unwrap();

    assert_eq!(report.records.len(), 2);
    let merged = &report.records[0];
    assert_eq!(merged.partner_id, "42");
    assert_eq!(merged.locations.len(), 2);
    assert_eq!(merged.state, "Texas");

    let output = ws.read("out/partners.csv");
    assert!(output.contains(",42,US_TX_;US_NM_"));
}

#[tokio::test]
async fn test_permanent_failure_does_not_abort_run() {
    let ws = Workspace::new(
        "United States,US,Texas,TX,\nUnited States,US,Ohio,OH,\nbroken row\nUnited States,US,Utah,UT,\n",
    );
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=TX&name=");
        then.status(200).body(partner_page("Gold", &[("1", "Texan Tel")]));
    });
    let ohio = server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=OH&name=");
        then.status(403);
    });
    server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=UT&name=");
        then.status(200).body(partner_page("Gold", &[("3", "Utah Voice")]));
    });

    let report = run(&ws.config(&server)).await.unwrap();

    ohio.assert_hits(1);
    assert_eq!(report.outcome(), RunOutcome::PartialFailure);
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert!(!ws.path("cache/US_OH_.json").exists());

    let failures = ws.read("out/failures.csv");
    assert!(failures.contains("skipped_row,,4,0,"));
    assert!(failures.contains("permanent,United States - Ohio,,1,HTTP 403 Forbidden"));
}

#[tokio::test]
async fn test_all_transient_failures_report_unreachable() {
    let ws = Workspace::new("United States,US,Texas,TX,\nUnited States,US,Ohio,OH,\n");
    let server = MockServer::start();
    let down = server.mock(|when, then| {
        when.method(POST).path("/partners");
        then.status(503);
    });

    let err = run(&ws.config(&server)).await.unwrap_err();

    assert!(matches!(err, EtlError::UpstreamUnreachable { failed_keys: 2 }));
    down.assert_hits(4);
    let failures = ws.read("out/failures.csv");
    assert_eq!(failures.lines().count(), 3);
    assert!(failures.contains("transient,United States - Texas,,2,HTTP 503 Service Unavailable"));
}

#[tokio::test]
async fn test_cancelled_run_serves_cache_and_skips_fetches() {
    let ws = Workspace::new("United States,US,Texas,TX,\n");
    let server = MockServer::start();
    let texas = server.mock(|when, then| {
        when.method(POST).path("/partners").body_contains("state=TX&name=");
        then.status(200).body(partner_page("Gold", &[("1", "Texan Tel")]));
    });
    let config = ws.config(&server);
    run(&config).await.unwrap();

    // 新增一個尚未快取的地點，再以已取消的 token 執行
    std::fs::write(
        ws.path("locations.csv"),
        format!("{HEADER}United States,US,Texas,TX,\nUnited States,US,Ohio,OH,\n"),
    )
    .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = LocalEtlEngine::from_config(&config, cancel)
        .await
        .unwrap()
        .run()
        .await
        .unwrap();

    texas.assert_hits(1);
    assert_eq!(report.outcome(), RunOutcome::Cancelled);
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.not_attempted.len(), 1);
    assert!(ws
        .read("out/failures.csv")
        .contains("not_attempted,United States - Ohio,,0,run cancelled"));
}
