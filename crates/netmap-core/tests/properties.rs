//! Property-Based Tests for principal names and content addressing
//!
//! These tests check, for arbitrary inputs:
//! 1. TEXT FORM: a principal's textual form parses back to an equal value
//! 2. SUBTREES: a principal is always within its own subtree without common name,
//!    and never within the subtree of a different organisation
//! 3. CONTENT ADDRESS: hashes are stable and round-trip through their text form
//!
//! Uses proptest for property-based testing with arbitrary inputs.

use proptest::prelude::*;
use netmap_core::{PrincipalIdentity, SecureHash};

fn attribute() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ]{0,20}[A-Za-z0-9]"
}

fn country() -> impl Strategy<Value = String> {
    "[A-Z]{2}"
}

fn principal() -> impl Strategy<Value = PrincipalIdentity> {
    (
        attribute(),
        attribute(),
        country(),
        proptest::option::of(attribute()),
        proptest::option::of(attribute()),
        proptest::option::of(attribute()),
    )
        .prop_map(|(o, l, c, cn, ou, st)| {
            let mut p = PrincipalIdentity::new(o, l, c).expect("valid mandatory attributes");
            if let Some(cn) = cn {
                p = p.with_common_name(cn).expect("valid common name");
            }
            if let Some(ou) = ou {
                p = p.with_organisation_unit(ou).expect("valid unit");
            }
            if let Some(st) = st {
                p = p.with_state(st).expect("valid state");
            }
            p
        })
}

// =============================================================================
// TEXT FORM
// =============================================================================

proptest! {
    #[test]
    fn prop_text_form_roundtrips(p in principal()) {
        let text = p.to_string();
        let parsed = PrincipalIdentity::parse(&text).expect("own text form must parse");
        prop_assert_eq!(parsed, p);
    }

    #[test]
    fn prop_json_form_roundtrips(p in principal()) {
        let json = serde_json::to_string(&p).unwrap();
        let restored: PrincipalIdentity = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(restored, p);
    }

    #[test]
    fn prop_attribute_with_separator_rejected(o in attribute(), sep in "[,=]") {
        let bad = format!("{}{}x", o, sep);
        prop_assert!(PrincipalIdentity::new(bad, "London", "GB").is_err());
    }
}

// =============================================================================
// SUBTREES
// =============================================================================

proptest! {
    #[test]
    fn prop_principal_within_own_subtree(p in principal()) {
        prop_assert!(p.is_within(&p));
        prop_assert!(p.is_within(&p.without_common_name()));
    }

    #[test]
    fn prop_other_organisation_never_within(a in principal(), other in attribute()) {
        prop_assume!(other != a.organisation());
        let b = PrincipalIdentity::new(other, a.locality(), a.country()).unwrap();

        prop_assert!(!b.is_within(&a.without_common_name()));
        prop_assert!(!a.is_within(&b));
    }

    #[test]
    fn prop_stripping_common_name_widens(p in principal(), cn in attribute()) {
        let named = p.without_common_name().with_common_name(cn).unwrap();
        // Any common name is within the stripped subtree
        prop_assert!(named.is_within(&p.without_common_name()));
    }
}

// =============================================================================
// CONTENT ADDRESS
// =============================================================================

proptest! {
    #[test]
    fn prop_hash_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(SecureHash::of(&bytes), SecureHash::of(&bytes));
    }

    #[test]
    fn prop_hash_text_roundtrips(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let hash = SecureHash::of(&bytes);
        let text = hash.to_string();
        prop_assert_eq!(text.len(), 64);
        prop_assert_eq!(SecureHash::parse(&text).unwrap(), hash);
    }
}
