// netpolicy-rules/src/asg/tests.rs
// ============================================================================
// Module: ASG Rule Conversion Tests
// Description: Unit tests for ASG rule expansion.
// Purpose: Validate protocol handling, expansion, and log targets.
// Dependencies: netpolicy-rules
// ============================================================================

//! ## Overview
//! Covers expansion of destinations and ports and the rules that are skipped.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use super::AsgRule;
use super::bulk_convert;
use super::convert;
use super::parse_rules;
use crate::renderer::RenderError;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Overlay address of the container under test.
const IP: &str = "10.255.0.5";

/// Builds a rule without ICMP fields.
fn rule(protocol: &str, destination: &str, ports: &str) -> AsgRule {
    AsgRule {
        protocol: protocol.to_string(),
        destination: destination.to_string(),
        ports: ports.to_string(),
        ..AsgRule::default()
    }
}

/// Renders rules as restore-file lines.
fn rendered(rules: &[crate::renderer::IptablesRule]) -> Vec<String> {
    rules.iter().map(ToString::to_string).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn tcp_rule_expands_networks_by_ports() {
    let rules = convert(&rule("tcp", "10.0.0.1,10.1.0.0/16", "80,8000-8080"), IP, "log", false);
    assert_eq!(rendered(&rules), vec![
        "--source 10.255.0.5 -m iprange -p tcp --dst-range 10.0.0.1-10.0.0.1 -m tcp \
         --destination-port 80:80 --jump RETURN",
        "--source 10.255.0.5 -m iprange -p tcp --dst-range 10.0.0.1-10.0.0.1 -m tcp \
         --destination-port 8000:8080 --jump RETURN",
        "--source 10.255.0.5 -m iprange -p tcp --dst-range 10.1.0.0-10.1.255.255 -m tcp \
         --destination-port 80:80 --jump RETURN",
        "--source 10.255.0.5 -m iprange -p tcp --dst-range 10.1.0.0-10.1.255.255 -m tcp \
         --destination-port 8000:8080 --jump RETURN",
    ]);
}

#[test]
fn every_protocol_matches_the_container_source() {
    let mut icmp = rule("icmp", "3.3.3.3", "");
    icmp.icmp_type = Some(0);
    icmp.icmp_code = Some(0);
    let input = [
        rule("tcp", "10.0.0.1", "80"),
        rule("udp", "10.0.0.1", "53"),
        icmp,
        rule("all", "10.0.0.1", ""),
    ];
    let rules = bulk_convert(&input, "10.255.0.9", "log", false);
    assert_eq!(rules.len(), 4);
    for line in rendered(&rules) {
        assert!(line.starts_with("--source 10.255.0.9 -m iprange "), "{line}");
    }
}

#[test]
fn logging_routes_to_log_chain() {
    let mut logged = rule("udp", "1.1.1.1-1.1.1.9", "53");
    assert_eq!(rendered(&convert(&logged, IP, "netout--h1--log", true)), vec![
        "--source 10.255.0.5 -m iprange -p udp --dst-range 1.1.1.1-1.1.1.9 -m udp \
         --destination-port 53:53 -g netout--h1--log"
    ]);
    logged.log = true;
    let lines = rendered(&convert(&logged, IP, "netout--h1--log", false));
    assert!(lines[0].ends_with("-g netout--h1--log"));
}

#[test]
fn tcp_without_ports_is_skipped() {
    assert!(convert(&rule("tcp", "10.0.0.1", ""), IP, "log", false).is_empty());
}

#[test]
fn icmp_requires_type_and_code() {
    let mut icmp = rule("icmp", "3.3.3.3-4.4.4.4", "");
    assert!(convert(&icmp, IP, "log", false).is_empty());
    icmp.icmp_type = Some(8);
    icmp.icmp_code = Some(0);
    assert_eq!(rendered(&convert(&icmp, IP, "log", false)), vec![
        "--source 10.255.0.5 -m iprange -p icmp --dst-range 3.3.3.3-4.4.4.4 -m icmp --icmp-type \
         8/0 --jump RETURN"
    ]);
    icmp.icmp_type = Some(-1);
    icmp.icmp_code = Some(-1);
    assert!(rendered(&convert(&icmp, IP, "log", false))[0].contains("--icmp-type 255/255"));
    icmp.ports = "80".to_string();
    assert!(convert(&icmp, IP, "log", false).is_empty());
}

#[test]
fn all_forbids_ports() {
    assert_eq!(rendered(&convert(&rule("all", "0.0.0.0/0", ""), IP, "log", false)), vec![
        "--source 10.255.0.5 -m iprange --dst-range 0.0.0.0-255.255.255.255 --jump RETURN"
    ]);
    assert!(convert(&rule("all", "0.0.0.0/0", "80"), IP, "log", false).is_empty());
}

#[test]
fn unknown_protocol_and_bad_destinations_are_skipped() {
    assert!(convert(&rule("sctp", "10.0.0.1", "80"), IP, "log", false).is_empty());
    assert!(convert(&rule("tcp", "10.0.0.300", "80"), IP, "log", false).is_empty());
    assert!(convert(&rule("tcp", "10.0.0.0/40", "80"), IP, "log", false).is_empty());
}

#[test]
fn bulk_convert_keeps_input_order() {
    let rules =
        bulk_convert(&[rule("all", "10.0.0.2", ""), rule("all", "10.0.0.1", "")], IP, "log", false);
    assert_eq!(rendered(&rules), vec![
        "--source 10.255.0.5 -m iprange --dst-range 10.0.0.2-10.0.0.2 --jump RETURN",
        "--source 10.255.0.5 -m iprange --dst-range 10.0.0.1-10.0.0.1 --jump RETURN",
    ]);
}

#[test]
fn parse_rules_reads_registry_shape() {
    let rules = parse_rules(
        r#"[{"protocol":"icmp","destination":"0.0.0.0/0","type":0,"code":0,"log":true},
            {"protocol":"tcp","destination":"10.0.0.0/8","ports":"443","description":"https"}]"#,
    )
    .unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].icmp_type, Some(0));
    assert!(rules[0].log);
    assert_eq!(rules[1].description, "https");
    assert!(matches!(parse_rules("{}"), Err(RenderError::InvalidAsgRules(_))));
}
