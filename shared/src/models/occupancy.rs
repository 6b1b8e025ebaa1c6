//! Occupancy resolver: which map elements hold stock, and how much

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::warehouse::MapElement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OccupancyStatus {
    Free,
    Occupied,
    Full,
    Over,
}

impl OccupancyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccupancyStatus::Free => "FREE",
            OccupancyStatus::Occupied => "OCCUPIED",
            OccupancyStatus::Full => "FULL",
            OccupancyStatus::Over => "OVER",
        }
    }
}

/// Aggregate ledger state of one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub address: String,
    pub total_balance: i64,
    pub lot_count: i64,
    pub total_weight: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementOccupancy {
    pub status: OccupancyStatus,
    pub total_balance: i64,
    pub lot_count: i64,
    pub total_weight: Decimal,
}

/// Status of an address given its aggregates and an optional capacity in kg
pub fn occupancy_status(
    total_balance: i64,
    lot_count: i64,
    total_weight: Decimal,
    capacity_kg: Option<Decimal>,
) -> OccupancyStatus {
    if lot_count == 0 || total_balance <= 0 {
        return OccupancyStatus::Free;
    }
    match capacity_kg {
        Some(capacity) if total_weight > capacity => OccupancyStatus::Over,
        Some(capacity) if total_weight == capacity => OccupancyStatus::Full,
        _ => OccupancyStatus::Occupied,
    }
}

/// Map every element whose identifier is a known address to its occupancy.
///
/// Pure: the output depends only on the inputs, and elements without an
/// identifier or with an identifier unknown to the ledger are left out.
pub fn resolve_occupancy(
    elements: &[MapElement],
    addresses: &[AddressBalance],
) -> BTreeMap<Uuid, ElementOccupancy> {
    let by_address: HashMap<&str, &AddressBalance> = addresses
        .iter()
        .map(|a| (a.address.as_str(), a))
        .collect();

    elements
        .iter()
        .filter_map(|element| {
            let identifier = element.spec.identifier.as_deref()?;
            let snapshot = by_address.get(identifier)?;
            let status = occupancy_status(
                snapshot.total_balance,
                snapshot.lot_count,
                snapshot.total_weight,
                element.spec.capacity_kg(),
            );
            Some((
                element.id,
                ElementOccupancy {
                    status,
                    total_balance: snapshot.total_balance,
                    lot_count: snapshot.lot_count,
                    total_weight: snapshot.total_weight,
                },
            ))
        })
        .collect()
}
