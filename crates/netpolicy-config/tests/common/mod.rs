// netpolicy-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across integration tests for netpolicy-config.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use netpolicy_config::ConfigError;
use netpolicy_config::NetPolicyConfig;

/// Smallest document that passes validation.
pub const MINIMAL_TOML: &str = r#"
uuid = "0f5c7f2e-policy-server"

[server]
tls_cert_file = "/var/vcap/jobs/policy-server/config/certs/server.crt"
tls_key_file = "/var/vcap/jobs/policy-server/config/certs/server.key"
tls_ca_file = "/var/vcap/jobs/policy-server/config/certs/ca.crt"

[uaa]
url = "https://uaa.service.internal"
client = "network-policy"
client_secret = "secret"

[cc]
url = "https://cloud-controller-ng.service.internal:9024"

[database]
name = "/var/vcap/store/policy-server/store.sqlite"
"#;

/// Parses a TOML string into a `NetPolicyConfig` for tests.
pub fn config_from_toml(toml_str: &str) -> Result<NetPolicyConfig, toml::de::Error> {
    toml::from_str(toml_str)
}

/// Returns the minimal valid config with all defaults applied.
pub fn minimal_config() -> Result<NetPolicyConfig, toml::de::Error> {
    config_from_toml(MINIMAL_TOML)
}

/// Checks that validation failed with a message containing `needle`.
pub fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> Result<(), String> {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}
