//! Empenho tests
//!
//! Tests for the two-phase movement engine including:
//! - the DRAFT -> CONFIRMED -> EXECUTED / CANCELLED state machine
//! - feasibility of summed demand per source stock
//! - execution equivalence with applying each item on its own
//! - a losing concurrent execution leaves the ledger untouched

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{
    check_feasibility, demand_by_source, validate_item_destination, DomainError, EmpenhoAction,
    EmpenhoStatus, LedgerSimulation, MovementKind, MovementType, Packaging, PlannedItem,
    SourceBalance, StockAttributes,
};
use std::collections::HashMap;
use uuid::Uuid;

fn attributes(lot: &str) -> StockAttributes {
    StockAttributes {
        lot: lot.to_string(),
        product: "MILHO".to_string(),
        cultivar_id: Uuid::from_u128(100),
        screen_id: Uuid::from_u128(200),
        category_id: Uuid::from_u128(300),
        treatment_id: Some(Uuid::from_u128(400)),
        species_id: None,
        packaging: Packaging::Sc,
        unit_weight: Decimal::new(40, 0),
        company: "ACME".to_string(),
        origin_destination: String::new(),
        az: "2".to_string(),
        client: String::new(),
        observation: None,
    }
}

/// Ledger with one row of `balance` units of lot L1 at P-01
fn ledger_with(balance: i64) -> (LedgerSimulation, Uuid) {
    let mut ledger = LedgerSimulation::new(Vec::new(), Uuid::from_u128(9), Utc::now());
    let id = ledger.entry(&attributes("L1"), "P-01", balance).unwrap();
    (ledger, id)
}

fn item(source: Uuid, quantity: i64, destination: Option<&str>) -> PlannedItem {
    PlannedItem {
        source_stock_id: source,
        quantity,
        destination_address: destination.map(str::to_string),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

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
                assert!(matches!(
                    status.apply(action),
                    Err(DomainError::InvalidTransition { .. })
                ));
            }
        }
    }

    #[test]
    fn test_confirmed_is_frozen() {
        assert!(EmpenhoStatus::Confirmed.apply(EmpenhoAction::Edit).is_err());
        assert!(EmpenhoStatus::Confirmed.apply(EmpenhoAction::Confirm).is_err());
        assert_eq!(
            EmpenhoStatus::Confirmed.apply(EmpenhoAction::Cancel).unwrap(),
            EmpenhoStatus::Cancelled
        );
    }

    #[test]
    fn test_draft_cannot_execute() {
        let err = EmpenhoStatus::Draft.apply(EmpenhoAction::Execute).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: EmpenhoStatus::Draft,
                action: "execute",
            }
        );
    }

    #[test]
    fn test_item_destination_rules() {
        assert!(validate_item_destination(MovementKind::Transfer, "P-01", None).is_err());
        assert!(validate_item_destination(MovementKind::Transfer, "P-01", Some("p-01")).is_err());
        assert_eq!(
            validate_item_destination(MovementKind::Transfer, "P-01", Some(" p 02 ")).unwrap(),
            Some("P-02".to_string())
        );
        assert!(validate_item_destination(MovementKind::Exit, "P-01", Some("P-02")).is_err());
        assert_eq!(
            validate_item_destination(MovementKind::Exit, "P-01", Some("  ")).unwrap(),
            None
        );
        assert_eq!(
            validate_item_destination(MovementKind::EntryBulk, "P-01", None).unwrap(),
            None
        );
    }

    #[test]
    fn test_demand_sums_per_source() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let demand = demand_by_source([(b, 5), (a, 10), (b, 7)]);
        assert_eq!(demand.get(&a), Some(&10));
        assert_eq!(demand.get(&b), Some(&12));
        // Ordered by stock id, the order rows are locked in
        assert_eq!(demand.keys().copied().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_feasibility_lists_every_shortfall() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let demand = demand_by_source([(a, 60), (a, 60), (b, 5)]);
        let mut balances = HashMap::new();
        balances.insert(
            a,
            SourceBalance {
                stock_id: a,
                lot: "L1".into(),
                address: "P-01".into(),
                balance: 100,
            },
        );

        match check_feasibility(&demand, &balances).unwrap_err() {
            DomainError::Shortfalls(shortfalls) => {
                assert_eq!(shortfalls.len(), 2);
                assert_eq!(shortfalls[0].requested, 120);
                assert_eq!(shortfalls[0].available, 100);
                // Missing sources count as empty
                assert_eq!(shortfalls[1].stock_id, b);
                assert_eq!(shortfalls[1].available, 0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    /// S4: TRANSFER empenho executes with tagged history
    #[test]
    fn test_transfer_empenho_happy_path() {
        let (mut ledger, source) = ledger_with(150);
        let items = [item(source, 30, Some("P-05")), item(source, 20, Some("P-06"))];

        ledger.apply_empenho(MovementKind::Transfer, &items).unwrap();

        assert_eq!(ledger.get(source).unwrap().balance(), 100);
        assert_eq!(ledger.stocks().len(), 3);
        assert_eq!(ledger.total_balance(), 150);

        let types: Vec<MovementType> = ledger.movements().iter().map(|m| m.movement_type).collect();
        assert_eq!(
            types,
            vec![
                MovementType::EntryInitial,
                MovementType::EmpenhoTransferOut,
                MovementType::EmpenhoTransferIn,
                MovementType::EmpenhoTransferOut,
                MovementType::EmpenhoTransferIn,
            ]
        );
    }

    /// S5: summed demand above the balance is rejected and nothing moves
    #[test]
    fn test_over_commit_rejected() {
        let (mut ledger, source) = ledger_with(100);
        let items = [item(source, 60, None), item(source, 60, None)];

        let err = ledger.apply_empenho(MovementKind::Exit, &items).unwrap_err();

        match err {
            DomainError::Shortfalls(shortfalls) => {
                assert_eq!(shortfalls.len(), 1);
                assert_eq!(shortfalls[0].requested, 120);
                assert_eq!(shortfalls[0].available, 100);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(ledger.get(source).unwrap().balance(), 100);
        assert_eq!(ledger.movements().len(), 1);
    }

    /// S6: two empenhos confirmed against the same lot; the second execution loses
    #[test]
    fn test_concurrent_execute_loser_rolls_back() {
        let (mut ledger, source) = ledger_with(100);
        let first = [item(source, 70, None)];
        let second = [item(source, 50, None)];

        ledger.apply_empenho(MovementKind::Exit, &first).unwrap();
        let snapshot = ledger.stocks().to_vec();
        let movements = ledger.movements().len();

        let err = ledger.apply_empenho(MovementKind::Exit, &second).unwrap_err();
        assert!(matches!(err, DomainError::Shortfalls(_)));
        assert_eq!(ledger.stocks(), snapshot.as_slice());
        assert_eq!(ledger.movements().len(), movements);
        assert_eq!(ledger.get(source).unwrap().balance(), 30);
    }

    /// Quantities large enough to overflow a sum are refused, not wrapped
    #[test]
    fn test_oversized_items_rejected_without_effect() {
        let (mut ledger, source) = ledger_with(20);
        let items = [item(source, 5, None), item(source, i64::MAX, None)];

        let err = ledger.apply_empenho(MovementKind::Exit, &items).unwrap_err();
        match err {
            DomainError::Shortfalls(shortfalls) => {
                assert_eq!(shortfalls[0].requested, i64::MAX);
                assert_eq!(shortfalls[0].available, 20);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(ledger.get(source).unwrap().balance(), 20);

        let bulk = [item(source, i64::MAX, None)];
        assert!(ledger.apply_empenho(MovementKind::EntryBulk, &bulk).is_err());
        assert_eq!(ledger.total_balance(), 20);
    }

    #[test]
    fn test_empty_empenho_rejected() {
        let (mut ledger, _) = ledger_with(10);
        assert!(ledger.apply_empenho(MovementKind::Exit, &[]).is_err());
    }

    /// ENTRY_BULK items add units without consuming the source
    #[test]
    fn test_entry_bulk_adds_units() {
        let (mut ledger, source) = ledger_with(10);
        let items = [item(source, 25, None), item(source, 5, Some("P-09"))];

        ledger.apply_empenho(MovementKind::EntryBulk, &items).unwrap();

        assert_eq!(ledger.get(source).unwrap().balance(), 35);
        assert_eq!(ledger.total_balance(), 40);
        let last = ledger.movements().last().unwrap();
        assert_eq!(last.movement_type, MovementType::EmpenhoEntryInitial);
    }

    #[test]
    fn test_exit_items_reject_destination() {
        let (mut ledger, source) = ledger_with(10);
        let items = [item(source, 5, Some("P-02"))];
        assert!(ledger.apply_empenho(MovementKind::Exit, &items).is_err());
        assert_eq!(ledger.get(source).unwrap().balance(), 10);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

fn quantities_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..50, 1..6)
}

#[cfg(test)]
mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// TRANSFER execution preserves the total balance
        #[test]
        fn prop_transfer_preserves_total(
            balance in 1i64..400,
            quantities in quantities_strategy(),
        ) {
            let (mut ledger, source) = ledger_with(balance);
            let items: Vec<PlannedItem> = quantities
                .iter()
                .enumerate()
                .map(|(i, q)| item(source, *q, Some(&format!("D-{}", i % 3))))
                .collect();

            let before = ledger.total_balance();
            let result = ledger.apply_empenho(MovementKind::Transfer, &items);
            let demand: i64 = quantities.iter().sum();

            prop_assert_eq!(result.is_ok(), demand <= balance);
            prop_assert_eq!(ledger.total_balance(), before);
        }

        /// EXIT execution removes exactly the summed quantities, or nothing
        #[test]
        fn prop_exit_decreases_by_demand(
            balance in 1i64..400,
            quantities in quantities_strategy(),
        ) {
            let (mut ledger, source) = ledger_with(balance);
            let items: Vec<PlannedItem> =
                quantities.iter().map(|q| item(source, *q, None)).collect();
            let demand: i64 = quantities.iter().sum();

            match ledger.apply_empenho(MovementKind::Exit, &items) {
                Ok(()) => prop_assert_eq!(ledger.total_balance(), balance - demand),
                Err(_) => {
                    prop_assert!(demand > balance);
                    prop_assert_eq!(ledger.total_balance(), balance);
                }
            }
        }

        /// Executing an empenho matches applying its items one by one
        #[test]
        fn prop_execute_equals_sequential_items(
            balance in 100i64..400,
            quantities in quantities_strategy(),
        ) {
            let (mut batched, source) = ledger_with(balance);
            let mut sequential = batched.clone();
            let items: Vec<PlannedItem> = quantities
                .iter()
                .enumerate()
                .map(|(i, q)| item(source, *q, Some(&format!("D-{}", i % 2))))
                .collect();

            let batch_result = batched.apply_empenho(MovementKind::Transfer, &items);
            prop_assume!(batch_result.is_ok());

            for planned in &items {
                let destination = planned.destination_address.as_deref().unwrap_or_default();
                sequential.transfer(planned.source_stock_id, planned.quantity, destination).unwrap();
            }

            let balances = |ledger: &LedgerSimulation| {
                let mut rows: Vec<(String, i64, i64)> = ledger
                    .stocks()
                    .iter()
                    .map(|s| (s.address.clone(), s.entries, s.exits))
                    .collect();
                rows.sort();
                rows
            };
            prop_assert_eq!(balances(&batched), balances(&sequential));
        }

        /// Feasibility passes exactly when each source covers its summed demand
        #[test]
        fn prop_feasibility_matches_sums(
            balance in 0i64..300,
            quantities in quantities_strategy(),
        ) {
            let source = Uuid::from_u128(1);
            let demand = demand_by_source(quantities.iter().map(|q| (source, *q)));
            let mut balances = HashMap::new();
            balances.insert(source, SourceBalance {
                stock_id: source,
                lot: "L1".into(),
                address: "P-01".into(),
                balance,
            });
            let total: i64 = quantities.iter().sum();
            prop_assert_eq!(check_feasibility(&demand, &balances).is_ok(), total <= balance);
        }
    }
}
