// netpolicy-server/tests/internal_api.rs
// ============================================================================
// Module: Internal API Tests
// Description: End-to-end tests for the host-agent listener.
// Purpose: Pin tagged policy output, tag allocation, ASG paging, and mTLS.
// Dependencies: netpolicy-server, rcgen, reqwest, serde_json, tokio
// ============================================================================

//! ## Overview
//! Most tests reach the internal router over plain TCP; the mTLS tests bind
//! it behind the client-certificate verifier.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::ADMIN_TOKEN;
use common::TestApp;
use common::TestOptions;
use common::json_of;
use common::policies_body;
use common::policy_json;
use common::security_group;
use netpolicy_registry::HttpClientConfig;
use netpolicy_registry::LocalLockService;
use netpolicy_server::AsgSyncer;
use netpolicy_server::CycleOutcome;
use netpolicy_server::NoopMetrics;
use netpolicy_server::SyncerSettings;
use netpolicy_server::internal_router;
use netpolicy_server::shutdown_channel;
use netpolicy_server::spawn_tls;
use netpolicy_server::tls::mutual_tls_config;
use reqwest::StatusCode;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn guids(page: &Value) -> BTreeSet<String> {
    page["security_groups"]
        .as_array()
        .unwrap()
        .iter()
        .map(|group| group["guid"].as_str().unwrap().to_string())
        .collect()
}

fn settings() -> SyncerSettings {
    SyncerSettings {
        owner: "syncer-test".to_string(),
        interval: Duration::from_secs(60),
        timeout: Duration::from_secs(10),
        retry_deadline: Duration::from_secs(5),
        retry_delay: Duration::from_millis(10),
        lock_ttl: Duration::from_secs(15),
    }
}

// ============================================================================
// SECTION: Policies and Tags
// ============================================================================

#[tokio::test]
async fn internal_policies_carry_rendered_tags() {
    let app = TestApp::start(TestOptions::default()).await;
    let body = policies_body(vec![policy_json("a", "b", 8080), policy_json("c", "d", 9090)]);
    app.post("/networking/v1/external/policies", ADMIN_TOKEN, &body).await;

    let response = app.internal_get("/networking/v1/internal/policies?id=a").await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = json_of(response).await;
    assert_eq!(listed["total_policies"], json!(1));
    let width = usize::from(app.store.tag_width().bytes()) * 2;
    let source_tag = listed["policies"][0]["source"]["tag"].as_str().unwrap();
    let destination_tag = listed["policies"][0]["destination"]["tag"].as_str().unwrap();
    assert_eq!(source_tag.len(), width);
    assert_ne!(source_tag, destination_tag);
    assert!(source_tag.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    assert!(listed.get("egress_policies").is_none());

    let everything = json_of(app.internal_get("/networking/v1/internal/policies").await).await;
    assert_eq!(everything["total_policies"], json!(2));
}

#[tokio::test]
async fn tag_allocation_is_idempotent() {
    let app = TestApp::start(TestOptions::default()).await;
    let url = app.internal_url("/networking/v1/internal/tags");
    let body = json!({"id": "space-guid", "type": "space"});
    let first = json_of(app.client.put(&url).json(&body).send().await.unwrap()).await;
    let second = json_of(app.client.put(&url).json(&body).send().await.unwrap()).await;
    assert_eq!(first, second);
    assert_eq!(first["id"], json!("space-guid"));
    assert_eq!(first["type"], json!("space"));

    let missing = app.client.put(&url).json(&json!({"type": "app"})).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_of(missing).await, json!({"error": "missing id"}));
}

#[tokio::test]
async fn last_updated_reports_the_write_version() {
    let app = TestApp::start(TestOptions::default()).await;
    let path = "/networking/v1/internal/policies_last_updated";
    let before: i64 = app.internal_get(path).await.text().await.unwrap().parse().unwrap();
    assert_eq!(before, 0);
    app.post(
        "/networking/v1/external/policies",
        ADMIN_TOKEN,
        &policies_body(vec![policy_json("a", "b", 80)]),
    )
    .await;
    let after: i64 = app.internal_get(path).await.text().await.unwrap().parse().unwrap();
    assert_eq!(after, 1);
    assert_eq!(after, app.store.last_updated().unwrap());
}

#[tokio::test]
async fn dynamic_egress_adds_expanded_egress_policies() {
    let app = TestApp::start(TestOptions {
        dynamic_egress: true,
        ..TestOptions::default()
    })
    .await;
    let destinations = json!({"destinations": [{
        "name": "metadata",
        "rules": [{"protocol": "udp", "ips": "169.254.169.254", "ports": "53-54"}]
    }]});
    let created = json_of(
        app.post("/networking/v1/external/destinations", ADMIN_TOKEN, &destinations).await,
    )
    .await;
    let destination_id = created["destinations"][0]["id"].as_str().unwrap().to_string();
    let egress = json!({"egress_policies": [{
        "source": {"id": "app-1"},
        "destination": {"id": destination_id},
        "app_lifecycle": "running"
    }]});
    app.post("/networking/v1/external/egress_policies", ADMIN_TOKEN, &egress).await;

    let listed = json_of(app.internal_get("/networking/v1/internal/policies?id=app-1").await).await;
    assert_eq!(listed["total_egress_policies"], json!(1));
    let policy = &listed["egress_policies"][0];
    assert_eq!(policy["source"]["id"], json!("app-1"));
    assert_eq!(policy["app_lifecycle"], json!("running"));
    assert_eq!(policy["destination"]["name"], json!("metadata"));
    assert_eq!(policy["destination"]["rules"][0]["ports"], json!("53-54"));
}

// ============================================================================
// SECTION: Security Groups
// ============================================================================

#[tokio::test]
async fn synced_security_groups_page_by_space() {
    let app = TestApp::start(TestOptions::default()).await;
    let mut sg1 = security_group("sg-1");
    sg1.staging_default = true;
    let mut sg2 = security_group("sg-2");
    sg2.running_space_guids.insert("space-c".to_string());
    let mut sg3 = security_group("sg-3");
    sg3.running_space_guids.insert("space-a".to_string());
    app.registry.set_catalog(vec![sg1, sg2, sg3], Some(OffsetDateTime::now_utc()));

    let mut syncer = AsgSyncer::new(
        Arc::clone(&app.store),
        common::gateway(&app.registry),
        Arc::new(LocalLockService::new()),
        Arc::new(NoopMetrics),
        settings(),
    );
    assert_eq!(syncer.tick().await.unwrap(), CycleOutcome::Synced(3));

    let all = json_of(
        app.internal_get("/networking/v1/internal/security_groups?space_guids=space-a").await,
    )
    .await;
    assert_eq!(guids(&all), BTreeSet::from(["sg-1".to_string(), "sg-3".to_string()]));
    assert_eq!(all["next"], json!(0));
    let bound = all["security_groups"]
        .as_array()
        .unwrap()
        .iter()
        .find(|group| group["guid"] == json!("sg-3"))
        .unwrap()
        .clone();
    assert_eq!(bound["running_space_guids"], json!(["space-a"]));
    assert!(bound["rules"].is_string());

    let first = json_of(
        app.internal_get("/networking/v1/internal/security_groups?space_guids=space-a&limit=1")
            .await,
    )
    .await;
    let next = first["next"].as_i64().unwrap();
    assert!(next > 0);
    assert_eq!(first["security_groups"].as_array().unwrap().len(), 1);

    let last = json_of(
        app.internal_get(&format!(
            "/networking/v1/internal/security_groups?space_guids=space-a&limit=1&from={next}"
        ))
        .await,
    )
    .await;
    assert_eq!(last["next"], json!(0));
    let mut seen = guids(&first);
    seen.extend(guids(&last));
    assert_eq!(seen, BTreeSet::from(["sg-1".to_string(), "sg-3".to_string()]));
}

#[tokio::test]
async fn negative_cursor_is_rejected() {
    let app = TestApp::start(TestOptions::default()).await;
    let response = app.internal_get("/networking/v1/internal/security_groups?from=-4").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// SECTION: Mutual TLS
// ============================================================================

#[tokio::test]
async fn internal_listener_requires_a_trusted_client_certificate() {
    let app = TestApp::start(TestOptions::default()).await;
    let fixtures = common::tls::generate("internal");
    let config =
        mutual_tls_config(&fixtures.server_cert, &fixtures.server_key, &fixtures.ca).unwrap();
    let (_shutdown, rx) = shutdown_channel();
    let loopback: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener =
        spawn_tls(internal_router(Arc::clone(&app.state)), loopback, config, rx).await.unwrap();
    let url = format!(
        "https://localhost:{}/networking/v1/internal/policies_last_updated",
        listener.addr().port()
    );

    let trusted = HttpClientConfig {
        ca_file: Some(fixtures.ca.clone()),
        client_cert_file: Some(fixtures.client_cert.clone()),
        client_key_file: Some(fixtures.client_key.clone()),
        ..HttpClientConfig::default()
    }
    .build()
    .unwrap();
    let response = trusted.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["strict-transport-security"], "max-age=31536000");

    let anonymous = HttpClientConfig {
        ca_file: Some(fixtures.ca.clone()),
        ..HttpClientConfig::default()
    }
    .build()
    .unwrap();
    assert!(anonymous.get(&url).send().await.is_err());

    let stranger = common::tls::generate("stranger");
    let untrusted = HttpClientConfig {
        ca_file: Some(fixtures.ca.clone()),
        client_cert_file: Some(stranger.client_cert.clone()),
        client_key_file: Some(stranger.client_key.clone()),
        ..HttpClientConfig::default()
    }
    .build()
    .unwrap();
    assert!(untrusted.get(&url).send().await.is_err());
}
