// netpolicy-cli/src/render/tests.rs
// ============================================================================
// Module: Dry-Run Rendering Tests
// Description: Context file parsing, size limits, and plan output.
// Purpose: Pin the `render` command's input handling.
// Dependencies: netpolicy-rules, tempfile
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions may unwrap."
)]

use std::fs;
use std::path::PathBuf;

use netpolicy_rules::RenderError;
use netpolicy_rules::RenderOptions;
use tempfile::TempDir;

use super::MAX_CONTEXT_BYTES;
use super::RenderCommandError;
use super::read_context;
use super::render_plan;

fn write_context(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("context.json");
    fs::write(&path, body).unwrap();
    path
}

fn context_json(handle: &str) -> String {
    serde_json::json!({
        "handle": handle,
        "overlay_ip": "10.255.0.5",
        "host_interface": "eth0",
        "overlay_cidr": "10.255.0.0/16",
        "ingress_tag": 4_277_009_135_u32,
        "asg_rules": [{"protocol": "tcp", "destination": "10.0.0.0/8", "ports": "443"}]
    })
    .to_string()
}

#[test]
fn plan_lists_every_table_with_commit() {
    let dir = TempDir::new().unwrap();
    let path = write_context(&dir, &context_json("h1"));
    let plan = render_plan(&path, &RenderOptions::default()).unwrap();
    for table in ["*nat", "*mangle", "*filter"] {
        assert!(plan.contains(table), "{table}");
    }
    assert_eq!(plan.matches("COMMIT").count(), 3);
    assert!(plan.contains(":netin--h1 - [0:0]"));
    assert!(plan.contains("-I PREROUTING 1 "));
    assert!(plan.contains(
        "--source 10.255.0.5 -m iprange -p tcp --dst-range 10.0.0.0-10.255.255.255 -m tcp \
         --destination-port 443:443 --jump RETURN"
    ));
}

#[test]
fn optional_fields_take_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_context(&dir, &context_json("h1"));
    let context = read_context(&path).unwrap();
    assert!(context.host_port_mappings.is_empty());
    assert!(context.c2c_policies.is_empty());
    assert_eq!(context.denied_logs_per_sec, 1);
    assert!(!context.asg_logging);
}

#[test]
fn malformed_json_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_context(&dir, "{\"handle\": ");
    assert!(matches!(read_context(&path), Err(RenderCommandError::Parse(_))));
}

#[test]
fn whitespace_handle_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_context(&dir, &context_json("bad handle"));
    let err = render_plan(&path, &RenderOptions::default()).unwrap_err();
    assert!(matches!(err, RenderCommandError::Render(RenderError::InvalidHandle(_))));
}

#[test]
fn oversized_context_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_context(&dir, &" ".repeat(MAX_CONTEXT_BYTES + 1));
    match read_context(&path) {
        Err(RenderCommandError::TooLarge {
            size,
            limit,
            ..
        }) => {
            assert_eq!(limit, MAX_CONTEXT_BYTES);
            assert!(size > 1024 * 1024);
        }
        other => panic!("expected size limit failure, got {}", other.is_ok()),
    }
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = TempDir::new().unwrap();
    let err = read_context(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, RenderCommandError::Read { .. }));
}
