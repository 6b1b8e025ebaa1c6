//! Validation and normalization utilities for warehouse inventory input
//!
//! Everything stored in the ledger goes through these functions first, so
//! comparisons on names, lots and addresses are always case-insensitive in
//! practice while the stored text stays canonical.

use rust_decimal::Decimal;

// ============================================================================
// Text Normalization
// ============================================================================

/// Trim, collapse inner whitespace and uppercase a taxonomy name or product code
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Validate and normalize a taxonomy name
pub fn validate_name(raw: &str) -> Result<String, &'static str> {
    let name = normalize_name(raw);
    if name.is_empty() {
        return Err("Name is required");
    }
    if name.chars().count() > 100 {
        return Err("Name must be at most 100 characters");
    }
    Ok(name)
}

/// Normalize a lot code (trimmed, uppercase, non-empty)
pub fn normalize_lot(raw: &str) -> Result<String, &'static str> {
    let lot = raw.trim().to_uppercase();
    if lot.is_empty() {
        return Err("Lot is required");
    }
    if lot.chars().count() > 50 {
        return Err("Lot must be at most 50 characters");
    }
    Ok(lot)
}

/// Check an already-normalized warehouse address against `^[A-Z0-9-]+$`
pub fn is_valid_address(address: &str) -> bool {
    !address.is_empty()
        && address
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}

/// Normalize a warehouse address: trim, uppercase, inner spaces become `-`
pub fn normalize_address(raw: &str) -> Result<String, &'static str> {
    let address = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_uppercase();
    if address.is_empty() {
        return Err("Address is required");
    }
    if !is_valid_address(&address) {
        return Err("Address may only contain letters, digits and '-'");
    }
    Ok(address)
}

/// Normalize an optional map element identifier; blank becomes `None`
pub fn normalize_identifier(raw: Option<&str>) -> Result<Option<String>, &'static str> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => normalize_address(value)
            .map(Some)
            .map_err(|_| "Identifier may only contain letters, digits and '-'"),
    }
}

/// Escape user-supplied text before it is embedded in a history description
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// Quantity Validations
// ============================================================================

/// Largest quantity a single entry, transfer, exit or empenho item may move
pub const MAX_QUANTITY: i64 = 1_000_000_000;

/// Validate a quantity moved by an entry, transfer, exit or empenho item
pub fn validate_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be greater than zero");
    }
    if quantity > MAX_QUANTITY {
        return Err("Quantity must be at most 1000000000");
    }
    Ok(())
}

/// Validate the unit weight of a lot (kg per bag/sack)
pub fn validate_unit_weight(weight: Decimal) -> Result<(), &'static str> {
    if weight < Decimal::ZERO {
        return Err("Unit weight cannot be negative");
    }
    Ok(())
}

// ============================================================================
// Warehouse Layout Validations
// ============================================================================

/// Normalize a rotation in degrees into `[0, 360)`
pub fn normalize_rotation(degrees: f64) -> Result<f64, &'static str> {
    if !degrees.is_finite() {
        return Err("Rotation must be a finite number");
    }
    let normalized = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    Ok(if normalized >= 360.0 { 0.0 } else { normalized })
}

/// Validate a width, height or canvas dimension
pub fn validate_dimension(value: f64) -> Result<(), &'static str> {
    if !value.is_finite() || value < 0.0 {
        return Err("Dimensions must be finite and non-negative");
    }
    Ok(())
}

/// Validate a position coordinate
pub fn validate_coordinate(value: f64) -> Result<(), &'static str> {
    if !value.is_finite() {
        return Err("Coordinates must be finite numbers");
    }
    Ok(())
}

/// Validate a canvas size for a warehouse layout
pub fn validate_canvas(width: i32, height: i32) -> Result<(), &'static str> {
    if width <= 0 || height <= 0 {
        return Err("Canvas dimensions must be positive");
    }
    if width > 20_000 || height > 20_000 {
        return Err("Canvas dimensions must be at most 20000");
    }
    Ok(())
}

/// Parse the warehouse number out of a ledger `az` value ("3", " 03 ")
pub fn parse_warehouse_number(az: &str) -> Option<i32> {
    let trimmed = az.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse::<i32>().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========================================================================
    // Text Normalization Tests
    // ========================================================================

    #[test]
    fn test_normalize_name_collapses_whitespace() {
        assert_eq!(normalize_name("  brs   1003  ipro "), "BRS 1003 IPRO");
    }

    #[test]
    fn test_validate_name_rejects_blank() {
        assert!(validate_name("   ").is_err());
        assert_eq!(validate_name("soja").unwrap(), "SOJA");
    }

    #[test]
    fn test_normalize_lot() {
        assert_eq!(normalize_lot(" l-12a ").unwrap(), "L-12A");
        assert!(normalize_lot("").is_err());
    }

    #[test]
    fn test_normalize_address_uppercases() {
        assert_eq!(normalize_address(" p-01 ").unwrap(), "P-01");
    }

    #[test]
    fn test_normalize_address_joins_inner_spaces() {
        assert_eq!(normalize_address("p 01  02").unwrap(), "P-01-02");
    }

    #[test]
    fn test_normalize_address_rejects_symbols() {
        assert!(normalize_address("P/01").is_err());
        assert!(normalize_address("P_01").is_err());
        assert!(normalize_address("").is_err());
        assert!(normalize_address("ÁREA").is_err());
    }

    #[test]
    fn test_normalize_identifier_blank_is_none() {
        assert_eq!(normalize_identifier(None).unwrap(), None);
        assert_eq!(normalize_identifier(Some("  ")).unwrap(), None);
        assert_eq!(
            normalize_identifier(Some("p-01-02-03")).unwrap(),
            Some("P-01-02-03".to_string())
        );
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"A&B\"</b>"),
            "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;"
        );
        assert_eq!(escape_html("P-01"), "P-01");
    }

    // ========================================================================
    // Quantity Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-5).is_err());
        assert!(validate_quantity(MAX_QUANTITY).is_ok());
        assert!(validate_quantity(MAX_QUANTITY + 1).is_err());
        assert!(validate_quantity(i64::MAX).is_err());
    }

    #[test]
    fn test_validate_unit_weight() {
        assert!(validate_unit_weight(Decimal::ZERO).is_ok());
        assert!(validate_unit_weight(Decimal::new(-1, 1)).is_err());
    }

    // ========================================================================
    // Layout Validation Tests
    // ========================================================================

    #[test]
    fn test_normalize_rotation_wraps() {
        assert_eq!(normalize_rotation(370.0).unwrap(), 10.0);
        assert_eq!(normalize_rotation(-90.0).unwrap(), 270.0);
        assert_eq!(normalize_rotation(360.0).unwrap(), 0.0);
        assert!(normalize_rotation(f64::NAN).is_err());
    }

    #[test]
    fn test_validate_dimension() {
        assert!(validate_dimension(0.0).is_ok());
        assert!(validate_dimension(-1.0).is_err());
        assert!(validate_dimension(f64::INFINITY).is_err());
    }

    #[test]
    fn test_parse_warehouse_number() {
        assert_eq!(parse_warehouse_number("3"), Some(3));
        assert_eq!(parse_warehouse_number(" 03 "), Some(3));
        assert_eq!(parse_warehouse_number("A1"), None);
        assert_eq!(parse_warehouse_number(""), None);
        assert_eq!(parse_warehouse_number("0"), None);
    }
}
