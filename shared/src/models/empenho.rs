//! Empenho: a drafted set of movements confirmed and executed as a unit
//!
//! ```text
//! DRAFT ──confirm──▶ CONFIRMED ──execute──▶ EXECUTED
//!   │                    │
//!   └────cancel──────────┴──▶ CANCELLED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

use crate::error::DomainError;
use crate::validation::normalize_address;

/// Lifecycle state of an empenho
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EmpenhoStatus {
    Draft,
    Confirmed,
    Executed,
    Cancelled,
}

/// Effect of deleting a stock row on an empenho item that draws on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOnStockDelete {
    /// The deletion is refused
    Block,
    /// The item is deleted with the row
    Remove,
    /// The item is kept with its source cleared
    Detach,
}

/// Refuse deleting a stock row while a confirmed empenho still draws on it.
///
/// `statuses` holds the status of the empenho of every item referencing the row.
pub fn ensure_stock_deletable<I>(statuses: I) -> Result<(), DomainError>
where
    I: IntoIterator<Item = EmpenhoStatus>,
{
    if statuses
        .into_iter()
        .any(|s| s.on_stock_delete() == ItemOnStockDelete::Block)
    {
        return Err(DomainError::Referenced("Stock in a confirmed empenho"));
    }
    Ok(())
}

/// Operations that move an empenho through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmpenhoAction {
    /// Header or item changes; allowed only while drafting
    Edit,
    Confirm,
    Execute,
    Cancel,
}

impl EmpenhoAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmpenhoAction::Edit => "edit",
            EmpenhoAction::Confirm => "confirm",
            EmpenhoAction::Execute => "execute",
            EmpenhoAction::Cancel => "cancel",
        }
    }
}

impl EmpenhoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmpenhoStatus::Draft => "DRAFT",
            EmpenhoStatus::Confirmed => "CONFIRMED",
            EmpenhoStatus::Executed => "EXECUTED",
            EmpenhoStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(EmpenhoStatus::Draft),
            "CONFIRMED" => Some(EmpenhoStatus::Confirmed),
            "EXECUTED" => Some(EmpenhoStatus::Executed),
            "CANCELLED" => Some(EmpenhoStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EmpenhoStatus::Executed | EmpenhoStatus::Cancelled)
    }

    /// What deleting a source stock row does to an item of an empenho in this status
    pub fn on_stock_delete(&self) -> ItemOnStockDelete {
        match self {
            EmpenhoStatus::Confirmed => ItemOnStockDelete::Block,
            EmpenhoStatus::Draft => ItemOnStockDelete::Remove,
            EmpenhoStatus::Executed | EmpenhoStatus::Cancelled => ItemOnStockDelete::Detach,
        }
    }

    /// Status reached by applying `action`, or `InvalidTransition`
    pub fn apply(self, action: EmpenhoAction) -> Result<EmpenhoStatus, DomainError> {
        let next = match (self, action) {
            (EmpenhoStatus::Draft, EmpenhoAction::Edit) => Some(EmpenhoStatus::Draft),
            (EmpenhoStatus::Draft, EmpenhoAction::Confirm) => Some(EmpenhoStatus::Confirmed),
            (EmpenhoStatus::Confirmed, EmpenhoAction::Execute) => Some(EmpenhoStatus::Executed),
            (EmpenhoStatus::Draft | EmpenhoStatus::Confirmed, EmpenhoAction::Cancel) => {
                Some(EmpenhoStatus::Cancelled)
            }
            _ => None,
        };
        next.ok_or(DomainError::InvalidTransition {
            from: self,
            action: action.as_str(),
        })
    }
}

impl fmt::Display for EmpenhoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the items of an empenho do to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Transfer,
    Exit,
    EntryBulk,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Transfer => "TRANSFER",
            MovementKind::Exit => "EXIT",
            MovementKind::EntryBulk => "ENTRY_BULK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRANSFER" => Some(MovementKind::Transfer),
            "EXIT" => Some(MovementKind::Exit),
            "ENTRY_BULK" => Some(MovementKind::EntryBulk),
            _ => None,
        }
    }

    /// Whether executing an item takes units out of its source stock
    pub fn consumes_balance(&self) -> bool {
        !matches!(self, MovementKind::EntryBulk)
    }
}

/// Load and transport details of an empenho
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmpenhoHeader {
    #[serde(default)]
    pub observation: String,
    #[serde(default)]
    pub load_number: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub plate: String,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub delivery_order: String,
}

impl EmpenhoHeader {
    /// Copy with surrounding whitespace removed and the plate uppercased
    pub fn trimmed(&self) -> Self {
        Self {
            observation: self.observation.trim().to_string(),
            load_number: self.load_number.trim().to_string(),
            driver: self.driver.trim().to_string(),
            plate: self.plate.trim().to_uppercase(),
            client: self.client.trim().to_string(),
            delivery_order: self.delivery_order.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empenho {
    pub id: Uuid,
    pub user_id: Uuid,
    pub movement_type: MovementKind,
    pub status: EmpenhoStatus,
    #[serde(flatten)]
    pub header: EmpenhoHeader,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEmpenho {
    pub id: Uuid,
    pub seq: i64,
    pub empenho_id: Uuid,
    /// `None` once the source stock row has been deleted
    pub source_stock_id: Option<Uuid>,
    pub lot_ref: String,
    pub source_address: String,
    pub quantity: i64,
    pub destination_address: Option<String>,
    pub observation: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An empenho with its items in insertion order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmpenhoDetail {
    #[serde(flatten)]
    pub empenho: Empenho,
    pub items: Vec<ItemEmpenho>,
}

/// A source lot that cannot cover what the empenho asks of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub stock_id: Uuid,
    pub lot: String,
    pub address: String,
    pub requested: i64,
    pub available: i64,
}

/// Current balance of a source stock, read under lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBalance {
    pub stock_id: Uuid,
    pub lot: String,
    pub address: String,
    pub balance: i64,
}

/// Validate the destination of an item against the movement kind.
///
/// Returns the normalized destination. TRANSFER needs one that differs from
/// the source address; EXIT must not have one; ENTRY_BULK may have one.
pub fn validate_item_destination(
    kind: MovementKind,
    source_address: &str,
    destination: Option<&str>,
) -> Result<Option<String>, DomainError> {
    let destination = match destination.map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => Some(
            normalize_address(raw).map_err(|m| DomainError::invalid("destination_address", m))?,
        ),
        None => None,
    };
    match (kind, &destination) {
        (MovementKind::Transfer, None) => Err(DomainError::invalid(
            "destination_address",
            "Transfer items need a destination address",
        )),
        (MovementKind::Transfer, Some(dest)) if dest == source_address => Err(
            DomainError::invalid(
                "destination_address",
                "Destination must differ from the source address",
            ),
        ),
        (MovementKind::Exit, Some(_)) => Err(DomainError::invalid(
            "destination_address",
            "Exit items cannot have a destination address",
        )),
        _ => Ok(destination),
    }
}

/// Total requested quantity per source stock, ordered by stock id.
///
/// Sums saturate at `i64::MAX`, which no balance can cover.
pub fn demand_by_source<I>(items: I) -> BTreeMap<Uuid, i64>
where
    I: IntoIterator<Item = (Uuid, i64)>,
{
    let mut demand = BTreeMap::new();
    for (stock_id, quantity) in items {
        let total: &mut i64 = demand.entry(stock_id).or_insert(0);
        *total = total.saturating_add(quantity);
    }
    demand
}

/// Check that every source stock can cover the summed quantities drawn from it.
///
/// Sources missing from `balances` count as having nothing available.
pub fn check_feasibility(
    demand: &BTreeMap<Uuid, i64>,
    balances: &HashMap<Uuid, SourceBalance>,
) -> Result<(), DomainError> {
    let shortfalls: Vec<Shortfall> = demand
        .iter()
        .filter_map(|(stock_id, requested)| {
            let (lot, address, available) = match balances.get(stock_id) {
                Some(b) => (b.lot.clone(), b.address.clone(), b.balance),
                None => (String::new(), String::new(), 0),
            };
            (*requested > available).then(|| Shortfall {
                stock_id: *stock_id,
                lot,
                address,
                requested: *requested,
                available,
            })
        })
        .collect();

    if shortfalls.is_empty() {
        Ok(())
    } else {
        Err(DomainError::Shortfalls(shortfalls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_delete_guard() {
        assert!(ensure_stock_deletable([]).is_ok());
        assert!(ensure_stock_deletable([
            EmpenhoStatus::Draft,
            EmpenhoStatus::Executed,
            EmpenhoStatus::Cancelled
        ])
        .is_ok());
        assert!(matches!(
            ensure_stock_deletable([EmpenhoStatus::Draft, EmpenhoStatus::Confirmed]),
            Err(DomainError::Referenced(_))
        ));
        assert_eq!(EmpenhoStatus::Draft.on_stock_delete(), ItemOnStockDelete::Remove);
        assert_eq!(EmpenhoStatus::Executed.on_stock_delete(), ItemOnStockDelete::Detach);
    }

    #[test]
    fn test_demand_saturates_instead_of_wrapping() {
        let source = Uuid::from_u128(1);
        let demand = demand_by_source(vec![(source, 5), (source, i64::MAX)]);
        assert_eq!(demand[&source], i64::MAX);

        let balances = HashMap::from([(
            source,
            SourceBalance {
                stock_id: source,
                lot: "L1".to_string(),
                address: "P-01".to_string(),
                balance: 20,
            },
        )]);
        assert!(matches!(
            check_feasibility(&demand, &balances),
            Err(DomainError::Shortfalls(ref s)) if s[0].requested == i64::MAX
        ));
    }

    #[test]
    fn test_happy_path_transitions() {
        let confirmed = EmpenhoStatus::Draft.apply(EmpenhoAction::Confirm).unwrap();
        assert_eq!(confirmed, EmpenhoStatus::Confirmed);
        let executed = confirmed.apply(EmpenhoAction::Execute).unwrap();
        assert_eq!(executed, EmpenhoStatus::Executed);
        assert!(executed.is_terminal());
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for status in [EmpenhoStatus::Executed, EmpenhoStatus::Cancelled] {
            for action in [
                EmpenhoAction::Edit,
                EmpenhoAction::Confirm,
                EmpenhoAction::Execute,
                EmpenhoAction::Cancel,
            ] {
                assert!(status.apply(action).is_err());
            }
        }
    }

    #[test]
    fn test_draft_cannot_execute_directly() {
        assert!(matches!(
            EmpenhoStatus::Draft.apply(EmpenhoAction::Execute),
            Err(DomainError::InvalidTransition {
                from: EmpenhoStatus::Draft,
                action: "execute"
            })
        ));
    }

    #[test]
    fn test_confirmed_is_frozen_but_cancellable() {
        assert!(EmpenhoStatus::Confirmed.apply(EmpenhoAction::Edit).is_err());
        assert_eq!(
            EmpenhoStatus::Confirmed.apply(EmpenhoAction::Cancel).unwrap(),
            EmpenhoStatus::Cancelled
        );
    }

    #[test]
    fn test_destination_rules() {
        assert!(validate_item_destination(MovementKind::Transfer, "P-01", None).is_err());
        assert!(validate_item_destination(MovementKind::Transfer, "P-01", Some("p-01")).is_err());
        assert_eq!(
            validate_item_destination(MovementKind::Transfer, "P-01", Some(" p-02 ")).unwrap(),
            Some("P-02".to_string())
        );
        assert!(validate_item_destination(MovementKind::Exit, "P-01", Some("P-02")).is_err());
        assert_eq!(
            validate_item_destination(MovementKind::Exit, "P-01", Some("  ")).unwrap(),
            None
        );
        assert!(validate_item_destination(MovementKind::EntryBulk, "P-01", None).is_ok());
    }

    #[test]
    fn test_feasibility_sums_per_source() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let demand = demand_by_source(vec![(a, 60), (b, 10), (a, 50)]);
        let balances = HashMap::from([
            (
                a,
                SourceBalance {
                    stock_id: a,
                    lot: "L1".into(),
                    address: "P-01".into(),
                    balance: 100,
                },
            ),
            (
                b,
                SourceBalance {
                    stock_id: b,
                    lot: "L2".into(),
                    address: "P-02".into(),
                    balance: 10,
                },
            ),
        ]);

        match check_feasibility(&demand, &balances) {
            Err(DomainError::Shortfalls(list)) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].stock_id, a);
                assert_eq!(list[0].requested, 110);
                assert_eq!(list[0].available, 100);
            }
            other => panic!("expected shortfall, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_source_counts_as_empty() {
        let a = Uuid::new_v4();
        let demand = demand_by_source(vec![(a, 1)]);
        assert!(check_feasibility(&demand, &HashMap::new()).is_err());
    }

    #[test]
    fn test_header_trimmed() {
        let header = EmpenhoHeader {
            plate: " abc1d23 ".into(),
            driver: " Ana ".into(),
            ..Default::default()
        };
        let trimmed = header.trimmed();
        assert_eq!(trimmed.plate, "ABC1D23");
        assert_eq!(trimmed.driver, "Ana");
    }
}
