// netpolicy-core/tests/tags.rs
// ============================================================================
// Module: Tag Rendering Tests
// Description: Unit and property tests for tag width and hex rendering.
// Purpose: Ensure rendered tags are fixed-width and parse back losslessly.
// Dependencies: netpolicy-core, proptest
// ============================================================================

//! ## Overview
//! Tags appear in packet marks and API payloads; a width mismatch would make
//! host agents program the wrong mark.

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

// ============================================================================
// SECTION: Imports
// ============================================================================

use netpolicy_core::GroupType;
use netpolicy_core::Tag;
use netpolicy_core::TagWidth;
use proptest::prelude::*;

// ============================================================================
// SECTION: Unit Tests
// ============================================================================

#[test]
fn tag_zero_is_reserved() {
    assert!(Tag::new(0).is_err());
    assert_eq!(Tag::new(1).unwrap().get(), 1);
}

#[test]
fn width_bounds_are_enforced() {
    assert!(TagWidth::new(0).is_err());
    assert!(TagWidth::new(5).is_err());
    assert_eq!(TagWidth::default().bytes(), 2);
    assert_eq!(TagWidth::new(1).unwrap().max_tag(), 0xFF);
    assert_eq!(TagWidth::new(4).unwrap().max_tag(), u32::MAX);
}

#[test]
fn render_pads_uppercase_hex() {
    let width = TagWidth::new(2).unwrap();
    assert_eq!(width.render(Tag::new(1).unwrap()), "0001");
    assert_eq!(width.render(Tag::new(0xBEEF).unwrap()), "BEEF");
    let width = TagWidth::new(3).unwrap();
    assert_eq!(width.render(Tag::new(0xAB).unwrap()), "0000AB");
}

#[test]
fn parse_rejects_wrong_width() {
    let width = TagWidth::new(2).unwrap();
    assert!(width.parse("001").is_err());
    assert!(width.parse("ZZZZ").is_err());
    assert!(width.parse("0000").is_err());
    assert_eq!(width.parse("00FF").unwrap().get(), 0xFF);
}

#[test]
fn group_type_labels_are_stable() {
    for (label, group_type) in [
        ("app", GroupType::App),
        ("space", GroupType::Space),
        ("router", GroupType::Router),
        ("default", GroupType::Default),
    ] {
        assert_eq!(label.parse::<GroupType>().unwrap(), group_type);
        assert_eq!(group_type.as_str(), label);
    }
    assert_eq!("org".parse::<GroupType>().unwrap_err().to_string(), "unknown group type 'org'");
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #[test]
    fn rendered_tags_have_fixed_width(bytes in 1_u8 ..= 4, raw in 1_u32 ..) {
        let width = TagWidth::new(bytes).unwrap();
        let value = raw % width.max_tag() + 1;
        let tag = Tag::new(value).unwrap();
        let rendered = width.render(tag);
        prop_assert_eq!(rendered.len(), usize::from(bytes) * 2);
        prop_assert!(rendered.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        prop_assert_eq!(width.parse(&rendered).unwrap(), tag);
    }
}
