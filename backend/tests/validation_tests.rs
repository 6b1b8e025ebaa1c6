//! Input normalization tests
//!
//! Tests for the normalization applied before anything reaches the ledger:
//! - addresses, lots, taxonomy names and map identifiers
//! - HTML escaping of history descriptions
//! - the history checksum payload

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use shared::{
    checksum_payload, escape_html, is_valid_address, normalize_address, normalize_identifier,
    normalize_lot, normalize_name, validate_canvas, validate_name, validate_quantity,
    MovementType, MAX_QUANTITY,
};
use uuid::Uuid;

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_address_normalization() {
        assert_eq!(normalize_address("a-01").unwrap(), "A-01");
        assert_eq!(normalize_address("  b 2\t3 ").unwrap(), "B-2-3");
        assert!(normalize_address("").is_err());
        assert!(normalize_address("A/01").is_err());
        assert!(normalize_address("Á-01").is_err());
    }

    #[test]
    fn test_identifier_blank_is_none() {
        assert_eq!(normalize_identifier(None).unwrap(), None);
        assert_eq!(normalize_identifier(Some("   ")).unwrap(), None);
        assert_eq!(normalize_identifier(Some("p-3")).unwrap(), Some("P-3".to_string()));
        assert!(normalize_identifier(Some("P.3")).is_err());
    }

    #[test]
    fn test_lot_normalization() {
        assert_eq!(normalize_lot(" soj-2024/01 ").unwrap(), "SOJ-2024/01");
        assert!(normalize_lot("  ").is_err());
        assert!(normalize_lot(&"X".repeat(51)).is_err());
    }

    #[test]
    fn test_taxonomy_names() {
        assert_eq!(normalize_name(" tmg  7062 "), "TMG 7062");
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(101)).is_err());
        assert_eq!(validate_name(&"a".repeat(100)).unwrap().len(), 100);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"Lote" & 'A'</b>"#),
            "&lt;b&gt;&quot;Lote&quot; &amp; &#x27;A&#x27;&lt;/b&gt;"
        );
        assert_eq!(escape_html("P-01"), "P-01");
    }

    #[test]
    fn test_quantity_must_be_positive() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-10).is_err());
        assert!(validate_quantity(MAX_QUANTITY).is_ok());
        assert!(validate_quantity(MAX_QUANTITY + 1).is_err());
        assert!(validate_quantity(i64::MAX).is_err());
    }

    #[test]
    fn test_canvas_bounds() {
        assert!(validate_canvas(1200, 800).is_ok());
        assert!(validate_canvas(0, 800).is_err());
        assert!(validate_canvas(20_001, 800).is_err());
    }

    #[test]
    fn test_checksum_payload_format() {
        let at: DateTime<Utc> = DateTime::parse_from_rfc3339("2024-03-10T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let user = Uuid::from_u128(42);
        let payload = checksum_payload(MovementType::TransferOut, "Lote L1", at, user);
        assert_eq!(
            payload,
            format!("TRANSFER_OUT|Lote L1|{}|{}", at.timestamp_micros(), user)
        );
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Normalized addresses are valid and normalization is idempotent
        #[test]
        fn prop_address_normalization_idempotent(raw in "[a-zA-Z0-9 -]{1,20}") {
            if let Ok(address) = normalize_address(&raw) {
                prop_assert!(is_valid_address(&address));
                prop_assert_eq!(normalize_address(&address).unwrap(), address);
            }
        }

        /// Case and surrounding space never change the normalized address
        #[test]
        fn prop_address_case_insensitive(raw in "[a-z0-9]{1,6}(-[a-z0-9]{1,6}){0,3}") {
            let lower = normalize_address(&format!("  {}  ", raw)).unwrap();
            let upper = normalize_address(&raw.to_uppercase()).unwrap();
            prop_assert_eq!(lower, upper);
        }

        /// Escaped text never contains raw markup characters
        #[test]
        fn prop_escape_html_removes_markup(raw in ".{0,40}") {
            let escaped = escape_html(&raw);
            prop_assert!(!escaped.contains('<'));
            prop_assert!(!escaped.contains('>'));
            prop_assert!(!escaped.contains('"'));
            prop_assert!(!escaped.contains('\''));
        }

        /// Name normalization is idempotent
        #[test]
        fn prop_name_normalization_idempotent(raw in "[a-zA-Z0-9 ]{0,30}") {
            let once = normalize_name(&raw);
            prop_assert_eq!(normalize_name(&once), once.clone());
            prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
        }
    }
}
