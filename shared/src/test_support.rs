//! Fixtures shared by the unit tests of this crate

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{Packaging, Stock, StockAttributes};

pub(crate) fn sample_stock(entries: i64, exits: i64) -> Stock {
    let now = Utc::now();
    Stock {
        id: Uuid::new_v4(),
        address: "P-01".to_string(),
        attributes: StockAttributes {
            lot: "L1".to_string(),
            product: "SOJA".to_string(),
            cultivar_id: Uuid::nil(),
            screen_id: Uuid::nil(),
            category_id: Uuid::nil(),
            treatment_id: None,
            species_id: None,
            packaging: Packaging::Bag,
            unit_weight: Decimal::new(1000, 0),
            company: "ACME".to_string(),
            origin_destination: String::new(),
            az: "1".to_string(),
            client: String::new(),
            observation: None,
        },
        entries,
        exits,
        operator_id: Uuid::nil(),
        created_at: now,
        updated_at: now,
    }
}
