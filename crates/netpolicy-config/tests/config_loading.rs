//! File loading tests for netpolicy-config.
// netpolicy-config/tests/config_loading.rs
// =============================================================================
// Module: Config Loading Tests
// Description: Validate reading configuration files from disk.
// Purpose: Ensure size, encoding, and parse failures are reported distinctly.
// =============================================================================

use std::fs;

use netpolicy_config::ConfigError;
use netpolicy_config::NetPolicyConfig;
use tempfile::TempDir;

mod common;

type TestResult = Result<(), String>;

#[test]
fn load_reads_and_validates_file() -> TestResult {
    let temp = TempDir::new().map_err(|err| err.to_string())?;
    let path = temp.path().join("netpolicy.toml");
    let document = format!("{}\n[asg_sync]\ninterval_seconds = 5\n", common::MINIMAL_TOML);
    fs::write(&path, document).map_err(|err| err.to_string())?;
    let config = NetPolicyConfig::load(Some(&path)).map_err(|err| err.to_string())?;
    if config.asg_sync.interval_seconds != 5 {
        return Err("section override not applied".to_string());
    }
    Ok(())
}

#[test]
fn load_reports_missing_file_as_io() -> TestResult {
    let temp = TempDir::new().map_err(|err| err.to_string())?;
    match NetPolicyConfig::load(Some(&temp.path().join("absent.toml"))) {
        Err(ConfigError::Io(_)) => Ok(()),
        Err(err) => Err(format!("expected io error, got {err}")),
        Ok(_) => Err("expected io error".to_string()),
    }
}

#[test]
fn load_reports_bad_toml_as_parse() -> TestResult {
    let temp = TempDir::new().map_err(|err| err.to_string())?;
    let path = temp.path().join("netpolicy.toml");
    fs::write(&path, "uuid = [").map_err(|err| err.to_string())?;
    match NetPolicyConfig::load(Some(&path)) {
        Err(ConfigError::Parse(_)) => Ok(()),
        Err(err) => Err(format!("expected parse error, got {err}")),
        Ok(_) => Err("expected parse error".to_string()),
    }
}

#[test]
fn load_rejects_non_utf8() -> TestResult {
    let temp = TempDir::new().map_err(|err| err.to_string())?;
    let path = temp.path().join("netpolicy.toml");
    fs::write(&path, [0xff_u8, 0xfe, 0x00]).map_err(|err| err.to_string())?;
    common::assert_invalid(NetPolicyConfig::load(Some(&path)).map(|_| ()), "utf-8")
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let temp = TempDir::new().map_err(|err| err.to_string())?;
    let path = temp.path().join("netpolicy.toml");
    let padding = "#".repeat(1024 * 1024 + 1);
    fs::write(&path, padding).map_err(|err| err.to_string())?;
    common::assert_invalid(NetPolicyConfig::load(Some(&path)).map(|_| ()), "size limit")
}

#[test]
fn load_runs_validation() -> TestResult {
    let temp = TempDir::new().map_err(|err| err.to_string())?;
    let path = temp.path().join("netpolicy.toml");
    let document = format!("{}\n[policy]\ntag_length = 9\n", common::MINIMAL_TOML);
    fs::write(&path, document).map_err(|err| err.to_string())?;
    common::assert_invalid(NetPolicyConfig::load(Some(&path)).map(|_| ()), "policy.tag_length")
}
