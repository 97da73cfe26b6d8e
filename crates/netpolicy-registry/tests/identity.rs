// netpolicy-registry/tests/identity.rs
// ============================================================================
// Module: Identity Client Tests
// Description: Token grant and introspection against a scripted server.
// Purpose: Validate form bodies, basic auth, and error mapping.
// Dependencies: netpolicy-registry, tiny_http, tokio
// ============================================================================

//! ## Overview
//! Exercises the identity client's two calls and the shape of its failures.

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

use netpolicy_registry::HttpClientConfig;
use netpolicy_registry::IdentityClient;
use netpolicy_registry::IdentityError;
use netpolicy_registry::UaaClient;
use serde_json::json;

use crate::common::serve;

fn client_for(url: &str) -> UaaClient {
    UaaClient::new(url, "policy-server", "secret", &HttpClientConfig::default()).unwrap()
}

#[tokio::test]
async fn get_token_posts_client_credentials() {
    let server = serve(|_| (200, json!({"access_token": "machine-token"}).to_string()));
    let client = client_for(&server.url);
    assert_eq!(client.get_token().await.unwrap(), "machine-token");

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].url, "/oauth/token");
    assert_eq!(requests[0].body, "client_id=policy-server&grant_type=client_credentials");
    // base64("policy-server:secret")
    assert_eq!(
        requests[0].authorization.as_deref(),
        Some("Basic cG9saWN5LXNlcnZlcjpzZWNyZXQ=")
    );
}

#[tokio::test]
async fn check_token_decodes_scopes() {
    let server = serve(|_| {
        (
            200,
            json!({
                "client_id": "cf",
                "scope": ["openid", "network.admin"],
                "sub": "user-1",
                "user_id": "user-1",
                "user_name": "alice"
            })
            .to_string(),
        )
    });
    let client = client_for(&server.url);
    let info = client.check_token("caller-token").await.unwrap();
    assert!(info.has_scope("network.admin"));
    assert!(!info.has_scope("network.write"));
    assert_eq!(info.user_name, "alice");
    assert_eq!(server.requests()[0].body, "token=caller-token");
    assert_eq!(server.requests()[0].url, "/check_token");
}

#[tokio::test]
async fn rejected_token_reports_status_and_body() {
    let server = serve(|_| (400, r#"{"error":"invalid_token"}"#.to_string()));
    let client = client_for(&server.url);
    let err = client.check_token("bogus").await.unwrap_err();
    assert!(matches!(err, IdentityError::BadResponse { status: 400, .. }));
    assert_eq!(err.to_string(), r#"bad uaa response: 400: {"error":"invalid_token"}"#);
}

#[tokio::test]
async fn malformed_grant_is_decode_error() {
    let server = serve(|_| (200, "not json".to_string()));
    let client = client_for(&server.url);
    let err = client.get_token().await.unwrap_err();
    assert!(matches!(err, IdentityError::Decode(_)));
}
