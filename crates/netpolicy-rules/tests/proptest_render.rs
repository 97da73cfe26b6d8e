// netpolicy-rules/tests/proptest_render.rs
// ============================================================================
// Module: Render Property Tests
// Description: Property checks over generated container contexts.
// Purpose: Keep jumps unique and names bounded for any usable handle.
// Dependencies: netpolicy-rules, netpolicy-core, proptest
// ============================================================================

//! Property-based tests for chain rendering.

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

use std::collections::HashSet;
use std::net::Ipv4Addr;

use netpolicy_core::PortRange;
use netpolicy_core::Protocol;
use netpolicy_core::Tag;
use netpolicy_rules::C2cAllow;
use netpolicy_rules::ChainApplier;
use netpolicy_rules::PortMapping;
use netpolicy_rules::RenderOptions;
use netpolicy_rules::render;
use proptest::prelude::*;

use crate::common::SimulatedIptables;
use crate::common::busy_context;

fn mapping() -> impl Strategy<Value = PortMapping> {
    (any::<u32>(), any::<u16>(), any::<u32>(), any::<u16>()).prop_map(
        |(host_ip, host_port, container_ip, container_port)| PortMapping {
            host_ip: Ipv4Addr::from(host_ip),
            host_port,
            container_ip: Ipv4Addr::from(container_ip),
            container_port,
        },
    )
}

fn allow() -> impl Strategy<Value = C2cAllow> {
    (1..=0xFFFF_u32, any::<bool>(), 1..=65535_u16).prop_map(|(tag, udp, port)| C2cAllow {
        source_tag: Tag::new(tag).unwrap(),
        protocol: if udp { Protocol::Udp } else { Protocol::Tcp },
        ports: PortRange {
            start: port,
            end: port,
        },
    })
}

proptest! {
    #[test]
    fn render_jumps_are_unique_and_names_bounded(
        handle in "[a-z0-9]{1,40}",
        overlay in any::<u32>(),
        mappings in proptest::collection::vec(mapping(), 0..4),
        allows in proptest::collection::vec(allow(), 0..4),
        dns in proptest::collection::vec(any::<u32>(), 0..3),
        asg_logging in any::<bool>(),
        c2c_logging in any::<bool>(),
    ) {
        let mut ctx = busy_context(&handle);
        ctx.overlay_ip = Ipv4Addr::from(overlay);
        ctx.host_port_mappings = mappings;
        ctx.c2c_policies = allows;
        ctx.dns_servers = dns.into_iter().map(Ipv4Addr::from).collect();
        ctx.asg_logging = asg_logging;
        ctx.c2c_logging = c2c_logging;
        let options = RenderOptions::default();

        let set = render(&ctx, &options).unwrap();
        prop_assert_eq!(set.chains().len(), 6);

        let mut jumps = HashSet::new();
        for chain in set.chains() {
            prop_assert!(chain.name.len() <= options.max_name_length, "{} too long", chain.name);
            if let Some(jump) = chain.jump() {
                prop_assert_eq!(jump.position, 1);
                prop_assert!(jumps.insert((jump.table, jump.parent, chain.name.clone())));
            }
        }
        prop_assert_eq!(render(&ctx, &options).unwrap(), set);
    }

    #[test]
    fn reapply_after_cleanup_matches_fresh_apply(handle in "[a-z0-9]{1,40}") {
        let set = render(&busy_context(&handle), &RenderOptions::default()).unwrap();

        let fresh = ChainApplier::new(SimulatedIptables::new());
        fresh.initialize(&set).unwrap();
        fresh.apply(&set).unwrap();

        let cycled = ChainApplier::new(SimulatedIptables::new());
        cycled.initialize(&set).unwrap();
        cycled.apply(&set).unwrap();
        cycled.cleanup(&set).unwrap();
        cycled.initialize(&set).unwrap();
        cycled.apply(&set).unwrap();

        prop_assert_eq!(fresh.adapter().snapshot(), cycled.adapter().snapshot());
    }
}
