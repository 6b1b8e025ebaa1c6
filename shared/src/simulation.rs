//! In-memory replay of ledger movements
//!
//! Applies entries, transfers, exits and whole empenhos to a set of stock
//! rows with the same merge-key and balance rules the server enforces. The
//! canvas client uses it to preview an empenho before confirming it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::{
    check_feasibility, check_merge_key_change, demand_by_source, describe,
    ensure_stock_deletable, validate_item_destination, EmpenhoStatus, MergeKey, MovementKind,
    MovementType, SourceBalance, Stock, StockAttributes, StockEdit,
};
use crate::validation::{normalize_address, validate_quantity};

/// A movement recorded by the simulation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedMovement {
    /// Cleared when the row was deleted
    pub stock_id: Option<Uuid>,
    pub lot_ref: String,
    pub movement_type: MovementType,
    pub quantity: Option<i64>,
}

/// One line of an empenho to replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedItem {
    pub source_stock_id: Uuid,
    pub quantity: i64,
    #[serde(default)]
    pub destination_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LedgerSimulation {
    stocks: Vec<Stock>,
    movements: Vec<SimulatedMovement>,
    operator_id: Uuid,
    now: DateTime<Utc>,
    next_id: u128,
}

impl LedgerSimulation {
    pub fn new(stocks: Vec<Stock>, operator_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            stocks,
            movements: Vec::new(),
            operator_id,
            now,
            next_id: 1,
        }
    }

    pub fn stocks(&self) -> &[Stock] {
        &self.stocks
    }

    pub fn movements(&self) -> &[SimulatedMovement] {
        &self.movements
    }

    pub fn get(&self, stock_id: Uuid) -> Option<&Stock> {
        self.stocks.iter().find(|s| s.id == stock_id)
    }

    pub fn find_by_key(&self, key: &MergeKey) -> Option<&Stock> {
        self.stocks.iter().find(|s| &s.merge_key() == key)
    }

    pub fn total_balance(&self) -> i64 {
        self.stocks.iter().map(Stock::balance).sum()
    }

    fn position(&self, stock_id: Uuid) -> Result<usize, DomainError> {
        self.stocks
            .iter()
            .position(|s| s.id == stock_id)
            .ok_or(DomainError::invalid("stock_id", "Stock not found"))
    }

    fn record(&mut self, stock_id: Uuid, movement_type: MovementType, quantity: i64, tagged: bool) {
        let movement_type = if tagged {
            movement_type.for_empenho()
        } else {
            movement_type
        };
        let lot_ref = self
            .get(stock_id)
            .map(|s| s.attributes.lot.clone())
            .unwrap_or_default();
        self.movements.push(SimulatedMovement {
            stock_id: Some(stock_id),
            lot_ref,
            movement_type,
            quantity: Some(quantity),
        });
    }

    /// Simulated rows get sequential ids so previews are reproducible
    fn allocate_id(&mut self) -> Uuid {
        let id = Uuid::from_u128(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add units at `address`, merging into an existing row with the same key
    fn receive_at(
        &mut self,
        attributes: &StockAttributes,
        address: &str,
        quantity: i64,
        tagged: bool,
        kinds: (MovementType, MovementType),
    ) -> Result<Uuid, DomainError> {
        let key = attributes.merge_key(address);
        let (created_kind, merged_kind) = kinds;
        if let Some(index) = self.stocks.iter().position(|s| s.merge_key() == key) {
            self.stocks[index].receive(quantity)?;
            let id = self.stocks[index].id;
            self.record(id, merged_kind, quantity, tagged);
            return Ok(id);
        }

        let id = self.allocate_id();
        self.stocks.push(Stock {
            id,
            address: address.to_string(),
            attributes: attributes.clone(),
            entries: quantity,
            exits: 0,
            operator_id: self.operator_id,
            created_at: self.now,
            updated_at: self.now,
        });
        self.record(id, created_kind, quantity, tagged);
        Ok(id)
    }

    /// Register an entry, merging by key
    pub fn entry(
        &mut self,
        attributes: &StockAttributes,
        address: &str,
        quantity: i64,
    ) -> Result<Uuid, DomainError> {
        self.entry_inner(attributes, address, quantity, false)
    }

    fn entry_inner(
        &mut self,
        attributes: &StockAttributes,
        address: &str,
        quantity: i64,
        tagged: bool,
    ) -> Result<Uuid, DomainError> {
        validate_quantity(quantity).map_err(|m| DomainError::invalid("quantity", m))?;
        let address = normalize_address(address).map_err(|m| DomainError::invalid("address", m))?;
        self.receive_at(
            attributes,
            &address,
            quantity,
            tagged,
            (MovementType::EntryInitial, MovementType::EntrySum),
        )
    }

    /// Move units to another address; returns `(source_id, destination_id)`
    pub fn transfer(
        &mut self,
        source_id: Uuid,
        quantity: i64,
        new_address: &str,
    ) -> Result<(Uuid, Uuid), DomainError> {
        self.transfer_inner(source_id, quantity, new_address, false)
    }

    fn transfer_inner(
        &mut self,
        source_id: Uuid,
        quantity: i64,
        new_address: &str,
        tagged: bool,
    ) -> Result<(Uuid, Uuid), DomainError> {
        let index = self.position(source_id)?;
        let new_address =
            normalize_address(new_address).map_err(|m| DomainError::invalid("new_address", m))?;
        if new_address == self.stocks[index].address {
            return Err(DomainError::invalid(
                "new_address",
                "Destination must differ from the source address",
            ));
        }
        self.stocks[index].withdraw(quantity)?;
        self.record(source_id, MovementType::TransferOut, quantity, tagged);

        let source_address = self.stocks[index].address.clone();
        let mut attributes = self.stocks[index].attributes.clone();
        let destination_key = attributes.merge_key(&new_address);
        if self.find_by_key(&destination_key).is_none() {
            attributes.origin_destination = format!("Transf. de {}", source_address);
        }
        let destination_id = self.receive_at(
            &attributes,
            &new_address,
            quantity,
            tagged,
            (MovementType::TransferIn, MovementType::TransferInSum),
        )?;
        Ok((source_id, destination_id))
    }

    /// Take units out of the ledger
    pub fn exit(&mut self, source_id: Uuid, quantity: i64) -> Result<(), DomainError> {
        self.exit_inner(source_id, quantity, false)
    }

    fn exit_inner(&mut self, source_id: Uuid, quantity: i64, tagged: bool) -> Result<(), DomainError> {
        let index = self.position(source_id)?;
        self.stocks[index].withdraw(quantity)?;
        self.record(source_id, MovementType::Exit, quantity, tagged);
        Ok(())
    }

    /// Rewrite the descriptive fields of a row.
    ///
    /// Moving the row onto a merge key another row already holds is refused.
    pub fn edit(&mut self, stock_id: Uuid, edit: &StockEdit) -> Result<(), DomainError> {
        let index = self.position(stock_id)?;
        let edited = edit.apply_to(&self.stocks[index])?;
        let holder = self.find_by_key(&edited.merge_key()).map(|s| s.id);
        check_merge_key_change(&self.stocks[index], &edited, holder)?;

        self.stocks[index] = Stock {
            updated_at: self.now,
            ..edited
        };
        self.movements.push(SimulatedMovement {
            stock_id: Some(stock_id),
            lot_ref: self.stocks[index].attributes.lot.clone(),
            movement_type: MovementType::Edit,
            quantity: None,
        });
        Ok(())
    }

    /// Remove a row. `referencing` holds the status of every empenho with an
    /// item drawing on it; a confirmed one blocks the deletion.
    pub fn delete(
        &mut self,
        stock_id: Uuid,
        referencing: &[EmpenhoStatus],
    ) -> Result<(), DomainError> {
        let index = self.position(stock_id)?;
        ensure_stock_deletable(referencing.iter().copied())?;

        let removed = self.stocks.remove(index);
        self.movements.push(SimulatedMovement {
            stock_id: None,
            lot_ref: describe::deleted_lot_ref(&removed.attributes.lot),
            movement_type: MovementType::Exclusion,
            quantity: None,
        });
        Ok(())
    }

    /// Confirm-check then execute an empenho; on any failure nothing changes
    pub fn apply_empenho(
        &mut self,
        kind: MovementKind,
        items: &[PlannedItem],
    ) -> Result<(), DomainError> {
        if items.is_empty() {
            return Err(DomainError::invalid("items", "An empenho needs at least one item"));
        }
        if kind.consumes_balance() {
            let demand =
                demand_by_source(items.iter().map(|i| (i.source_stock_id, i.quantity)));
            let balances: HashMap<Uuid, SourceBalance> = self
                .stocks
                .iter()
                .filter(|s| demand.contains_key(&s.id))
                .map(|s| {
                    (
                        s.id,
                        SourceBalance {
                            stock_id: s.id,
                            lot: s.attributes.lot.clone(),
                            address: s.address.clone(),
                            balance: s.balance(),
                        },
                    )
                })
                .collect();
            check_feasibility(&demand, &balances)?;
        }

        let mut working = self.clone();
        for item in items {
            let source = working
                .get(item.source_stock_id)
                .ok_or(DomainError::invalid("source_stock_id", "Stock not found"))?;
            let source_address = source.address.clone();
            let attributes = source.attributes.clone();
            let destination = validate_item_destination(
                kind,
                &source_address,
                item.destination_address.as_deref(),
            )?;
            match kind {
                MovementKind::Transfer => {
                    let dest = destination.ok_or(DomainError::invalid(
                        "destination_address",
                        "Transfer items need a destination address",
                    ))?;
                    working.transfer_inner(item.source_stock_id, item.quantity, &dest, true)?;
                }
                MovementKind::Exit => {
                    working.exit_inner(item.source_stock_id, item.quantity, true)?;
                }
                MovementKind::EntryBulk => {
                    let address = destination.unwrap_or(source_address);
                    working.entry_inner(&attributes, &address, item.quantity, true)?;
                }
            }
        }
        *self = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_stock;

    fn sim_with(stock: Stock) -> LedgerSimulation {
        LedgerSimulation::new(vec![stock], Uuid::nil(), Utc::now())
    }

    #[test]
    fn test_transfer_split_then_merge() {
        let stock = sample_stock(150, 0);
        let source = stock.id;
        let mut sim = sim_with(stock);

        let (_, dest) = sim.transfer(source, 30, "P-02-02-02").unwrap();
        assert_eq!(sim.get(source).unwrap().balance(), 120);
        assert_eq!(sim.get(dest).unwrap().balance(), 30);
        assert_eq!(
            sim.get(dest).unwrap().attributes.origin_destination,
            "Transf. de P-01"
        );

        let (_, again) = sim.transfer(source, 20, "p-02-02-02").unwrap();
        assert_eq!(again, dest);
        assert_eq!(sim.get(dest).unwrap().entries, 50);
        assert_eq!(
            sim.movements().last().unwrap().movement_type,
            MovementType::TransferInSum
        );
        assert_eq!(sim.total_balance(), 150);
    }

    #[test]
    fn test_failed_empenho_leaves_state_untouched() {
        let stock = sample_stock(100, 0);
        let source = stock.id;
        let mut sim = sim_with(stock);
        let items = vec![
            PlannedItem {
                source_stock_id: source,
                quantity: 60,
                destination_address: None,
            },
            PlannedItem {
                source_stock_id: source,
                quantity: 50,
                destination_address: None,
            },
        ];
        assert!(matches!(
            sim.apply_empenho(MovementKind::Exit, &items),
            Err(DomainError::Shortfalls(_))
        ));
        assert_eq!(sim.get(source).unwrap().balance(), 100);
        assert!(sim.movements().is_empty());
    }

    #[test]
    fn test_entry_bulk_merges_into_source() {
        let stock = sample_stock(10, 0);
        let source = stock.id;
        let mut sim = sim_with(stock);
        let items = vec![PlannedItem {
            source_stock_id: source,
            quantity: 5,
            destination_address: None,
        }];
        sim.apply_empenho(MovementKind::EntryBulk, &items).unwrap();
        assert_eq!(sim.get(source).unwrap().balance(), 15);
        assert_eq!(
            sim.movements()[0].movement_type,
            MovementType::EmpenhoEntrySum
        );
    }
}
