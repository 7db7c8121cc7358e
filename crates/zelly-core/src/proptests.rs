//! Property-based tests for the version ordering.

use proptest::prelude::*;

use crate::version::AppVersion;

/// Generate a version with one to five numeric components.
fn arb_version() -> impl Strategy<Value = AppVersion> {
    prop::collection::vec(0u64..50, 1..5).prop_map(|parts| {
        let raw = parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        AppVersion::parse(&raw).unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Exactly one of <, ==, > holds for any pair.
    #[test]
    fn prop_trichotomy(a in arb_version(), b in arb_version()) {
        let relations = [a < b, a == b, a > b];
        prop_assert_eq!(relations.iter().filter(|r| **r).count(), 1);
    }

    #[test]
    fn prop_antisymmetric(a in arb_version(), b in arb_version()) {
        prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    }

    #[test]
    fn prop_transitive(a in arb_version(), b in arb_version(), c in arb_version()) {
        if a <= b && b <= c {
            prop_assert!(a <= c);
        }
    }

    /// Appending zero components never changes the position of a version.
    #[test]
    fn prop_zero_padding_is_equal(a in arb_version(), zeros in 1usize..4) {
        let padded = format!("{}{}", a, ".0".repeat(zeros));
        let padded = AppVersion::parse(&padded).unwrap();
        prop_assert_eq!(&a, &padded);
    }

    /// Bumping the last component always produces a newer version.
    #[test]
    fn prop_bump_is_newer(a in arb_version()) {
        let mut parts = a.components().to_vec();
        if let Some(last) = parts.last_mut() {
            *last += 1;
        }
        let bumped = parts.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(".");
        let bumped = AppVersion::parse(&bumped).unwrap();
        prop_assert!(bumped.is_newer_than(&a));
        prop_assert!(!a.is_newer_than(&bumped));
    }
}
