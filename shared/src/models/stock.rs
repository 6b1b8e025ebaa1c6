//! Stock (lot) ledger models
//!
//! A `Stock` row is one lot of seed stored at one warehouse address. Rows are
//! identified for merging by their [`MergeKey`]; quantities only ever move
//! through `entries` and `exits`, the balance is always derived.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::Shortfall;
use crate::types::double_option;
use crate::validation::{
    normalize_address, normalize_lot, validate_quantity, validate_unit_weight,
};

/// Number of SC units equivalent to one BAG
pub const BAG_TO_SC: i64 = 25;

/// Packaging unit a lot is counted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Packaging {
    /// Big bag
    Bag,
    /// Sack
    Sc,
}

impl Packaging {
    pub fn as_str(&self) -> &'static str {
        match self {
            Packaging::Bag => "BAG",
            Packaging::Sc => "SC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BAG" => Some(Packaging::Bag),
            "SC" => Some(Packaging::Sc),
            _ => None,
        }
    }

    /// SC units represented by one unit of this packaging
    pub fn sc_factor(&self) -> i64 {
        match self {
            Packaging::Bag => BAG_TO_SC,
            Packaging::Sc => 1,
        }
    }
}

impl fmt::Display for Packaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stock status, derived from the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StockStatus {
    Active,
    Depleted,
}

impl StockStatus {
    pub fn from_balance(balance: i64) -> Self {
        if balance == 0 {
            StockStatus::Depleted
        } else {
            StockStatus::Active
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Active => "ACTIVE",
            StockStatus::Depleted => "DEPLETED",
        }
    }
}

/// The compound key under which entries coalesce into one stock row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeKey {
    pub lot: String,
    pub address: String,
    pub cultivar_id: Uuid,
    pub screen_id: Uuid,
    pub category_id: Uuid,
    pub treatment_id: Option<Uuid>,
    pub packaging: Packaging,
    pub company: String,
}

impl MergeKey {
    /// The same key relocated to another address
    pub fn at_address(&self, address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..self.clone()
        }
    }

    /// True when `other` names the same lot, address and cultivar but differs
    /// in a sub-attribute (screen, category, treatment, packaging or company)
    pub fn conflicts_with(&self, other: &MergeKey) -> bool {
        self.lot == other.lot
            && self.address == other.address
            && self.cultivar_id == other.cultivar_id
            && self != other
    }
}

/// Every non-quantitative attribute of a stock row except its address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAttributes {
    pub lot: String,
    pub product: String,
    pub cultivar_id: Uuid,
    pub screen_id: Uuid,
    pub category_id: Uuid,
    pub treatment_id: Option<Uuid>,
    pub species_id: Option<Uuid>,
    pub packaging: Packaging,
    pub unit_weight: Decimal,
    pub company: String,
    pub origin_destination: String,
    pub az: String,
    pub client: String,
    pub observation: Option<String>,
}

impl StockAttributes {
    pub fn merge_key(&self, address: &str) -> MergeKey {
        MergeKey {
            lot: self.lot.clone(),
            address: address.to_string(),
            cultivar_id: self.cultivar_id,
            screen_id: self.screen_id,
            category_id: self.category_id,
            treatment_id: self.treatment_id,
            packaging: self.packaging,
            company: self.company.clone(),
        }
    }
}

/// A lot stored at one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub id: Uuid,
    pub address: String,
    #[serde(flatten)]
    pub attributes: StockAttributes,
    pub entries: i64,
    pub exits: i64,
    pub operator_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stock {
    pub fn balance(&self) -> i64 {
        self.entries - self.exits
    }

    pub fn status(&self) -> StockStatus {
        StockStatus::from_balance(self.balance())
    }

    pub fn total_weight(&self) -> Decimal {
        Decimal::from(self.balance()) * self.attributes.unit_weight
    }

    pub fn merge_key(&self) -> MergeKey {
        self.attributes.merge_key(&self.address)
    }

    /// Check `entries >= exits >= 0`
    pub fn check_quantities(&self) -> Result<(), DomainError> {
        if self.exits < 0 {
            return Err(DomainError::invalid("exits", "Exits cannot be negative"));
        }
        if self.entries < self.exits {
            return Err(DomainError::invalid(
                "entries",
                "Entries cannot be lower than exits",
            ));
        }
        Ok(())
    }

    /// Fails unless `0 < quantity <= balance`
    pub fn ensure_available(&self, quantity: i64) -> Result<(), DomainError> {
        validate_quantity(quantity)
            .map_err(|m| DomainError::invalid("quantity", m))?;
        if quantity > self.balance() {
            return Err(DomainError::InsufficientBalance(Shortfall {
                stock_id: self.id,
                lot: self.attributes.lot.clone(),
                address: self.address.clone(),
                requested: quantity,
                available: self.balance(),
            }));
        }
        Ok(())
    }

    /// Add received units to the row
    pub fn receive(&mut self, quantity: i64) -> Result<(), DomainError> {
        validate_quantity(quantity)
            .map_err(|m| DomainError::invalid("quantity", m))?;
        self.entries = self
            .entries
            .checked_add(quantity)
            .ok_or(DomainError::invalid("quantity", "Entries would exceed the row's capacity"))?;
        Ok(())
    }

    /// Remove units from the row, never letting the balance go negative
    pub fn withdraw(&mut self, quantity: i64) -> Result<(), DomainError> {
        self.ensure_available(quantity)?;
        self.exits += quantity;
        Ok(())
    }
}

/// An edit may move a row onto a new merge key only while no other row holds that key.
///
/// `holder` is the id of the row currently stored under the edited key, if any.
/// Edits never merge rows implicitly.
pub fn check_merge_key_change(
    current: &Stock,
    edited: &Stock,
    holder: Option<Uuid>,
) -> Result<(), DomainError> {
    if edited.merge_key() == current.merge_key() {
        return Ok(());
    }
    match holder {
        Some(id) if id != current.id => Err(DomainError::DuplicateKey("merge key")),
        _ => Ok(()),
    }
}

/// A stock row with derived values and resolved taxonomy names, as listed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockView {
    #[serde(flatten)]
    pub stock: Stock,
    pub balance: i64,
    pub status: StockStatus,
    pub total_weight: Decimal,
    pub cultivar_name: String,
    pub screen_name: String,
    pub category_name: String,
    pub treatment_name: Option<String>,
    pub species_name: Option<String>,
    pub operator_name: Option<String>,
}

impl StockView {
    pub fn new(stock: Stock, names: StockNames) -> Self {
        Self {
            balance: stock.balance(),
            status: stock.status(),
            total_weight: stock.total_weight(),
            stock,
            cultivar_name: names.cultivar,
            screen_name: names.screen,
            category_name: names.category,
            treatment_name: names.treatment,
            species_name: names.species,
            operator_name: names.operator,
        }
    }
}

/// Display names of the taxonomy entries a stock row references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockNames {
    pub cultivar: String,
    pub screen: String,
    pub category: String,
    pub treatment: Option<String>,
    pub species: Option<String>,
    pub operator: Option<String>,
}

/// Balance totals per packaging and their SC equivalent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTotals {
    pub total_bag: i64,
    pub total_sc: i64,
    pub total_sc_equivalent: i64,
}

impl StockTotals {
    pub fn new(total_bag: i64, total_sc: i64) -> Self {
        Self {
            total_bag,
            total_sc,
            total_sc_equivalent: total_bag * BAG_TO_SC + total_sc,
        }
    }

    /// Sum balances grouped by packaging
    pub fn from_balances<I>(balances: I) -> Self
    where
        I: IntoIterator<Item = (Packaging, i64)>,
    {
        let (bag, sc) = balances
            .into_iter()
            .fold((0, 0), |(bag, sc), (packaging, balance)| match packaging {
                Packaging::Bag => (bag + balance, sc),
                Packaging::Sc => (bag, sc + balance),
            });
        Self::new(bag, sc)
    }
}

// ============================================================================
// Inputs
// ============================================================================

fn trimmed(raw: &str) -> String {
    raw.trim().to_string()
}

fn trimmed_opt(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Payload of a stock entry
#[derive(Debug, Clone, Deserialize)]
pub struct EntryInput {
    pub lot: String,
    #[serde(default)]
    pub product: String,
    pub cultivar_id: Uuid,
    pub screen_id: Uuid,
    pub category_id: Uuid,
    pub treatment_id: Option<Uuid>,
    pub species_id: Option<Uuid>,
    pub address: String,
    pub entries: i64,
    pub packaging: Packaging,
    #[serde(default)]
    pub unit_weight: Decimal,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub origin_destination: String,
    #[serde(default)]
    pub az: String,
    #[serde(default)]
    pub client: String,
    pub observation: Option<String>,
    /// Acknowledge that a row for the same lot, address and cultivar already
    /// exists with different sub-attributes
    #[serde(default)]
    pub allow_split: bool,
}

impl EntryInput {
    /// Normalized `(attributes, address)` ready for the merge-key lookup
    pub fn normalized(&self) -> Result<(StockAttributes, String), DomainError> {
        let lot = normalize_lot(&self.lot).map_err(|m| DomainError::invalid("lot", m))?;
        let address =
            normalize_address(&self.address).map_err(|m| DomainError::invalid("address", m))?;
        validate_quantity(self.entries).map_err(|m| DomainError::invalid("entries", m))?;
        validate_unit_weight(self.unit_weight)
            .map_err(|m| DomainError::invalid("unit_weight", m))?;

        let attributes = StockAttributes {
            lot,
            product: trimmed(&self.product),
            cultivar_id: self.cultivar_id,
            screen_id: self.screen_id,
            category_id: self.category_id,
            treatment_id: self.treatment_id,
            species_id: self.species_id,
            packaging: self.packaging,
            unit_weight: self.unit_weight,
            company: trimmed(&self.company).to_uppercase(),
            origin_destination: trimmed(&self.origin_destination),
            az: trimmed(&self.az),
            client: trimmed(&self.client),
            observation: trimmed_opt(self.observation.as_deref()),
        };
        Ok((attributes, address))
    }
}

/// Typed diff of the non-quantitative attributes of a stock row.
///
/// Absent fields are left unchanged; for the nullable ones an explicit `null`
/// clears the value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StockEdit {
    pub lot: Option<String>,
    pub address: Option<String>,
    pub product: Option<String>,
    pub cultivar_id: Option<Uuid>,
    pub screen_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    #[serde(default, deserialize_with = "double_option")]
    pub treatment_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub species_id: Option<Option<Uuid>>,
    pub packaging: Option<Packaging>,
    pub unit_weight: Option<Decimal>,
    pub company: Option<String>,
    pub origin_destination: Option<String>,
    pub az: Option<String>,
    pub client: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub observation: Option<Option<String>>,
}

impl StockEdit {
    /// The edited copy of `stock`; quantities, id and timestamps are untouched
    pub fn apply_to(&self, stock: &Stock) -> Result<Stock, DomainError> {
        let mut edited = stock.clone();
        let attrs = &mut edited.attributes;

        if let Some(lot) = &self.lot {
            attrs.lot = normalize_lot(lot).map_err(|m| DomainError::invalid("lot", m))?;
        }
        if let Some(address) = &self.address {
            edited.address =
                normalize_address(address).map_err(|m| DomainError::invalid("address", m))?;
        }
        if let Some(product) = &self.product {
            attrs.product = trimmed(product);
        }
        if let Some(id) = self.cultivar_id {
            attrs.cultivar_id = id;
        }
        if let Some(id) = self.screen_id {
            attrs.screen_id = id;
        }
        if let Some(id) = self.category_id {
            attrs.category_id = id;
        }
        if let Some(id) = self.treatment_id {
            attrs.treatment_id = id;
        }
        if let Some(id) = self.species_id {
            attrs.species_id = id;
        }
        if let Some(packaging) = self.packaging {
            attrs.packaging = packaging;
        }
        if let Some(weight) = self.unit_weight {
            validate_unit_weight(weight).map_err(|m| DomainError::invalid("unit_weight", m))?;
            attrs.unit_weight = weight;
        }
        if let Some(company) = &self.company {
            attrs.company = trimmed(company).to_uppercase();
        }
        if let Some(origin) = &self.origin_destination {
            attrs.origin_destination = trimmed(origin);
        }
        if let Some(az) = &self.az {
            attrs.az = trimmed(az);
        }
        if let Some(client) = &self.client {
            attrs.client = trimmed(client);
        }
        if let Some(observation) = &self.observation {
            attrs.observation = trimmed_opt(observation.as_deref());
        }
        Ok(edited)
    }

    /// Taxonomy ids the edit points at, for existence checks
    pub fn referenced_ids(&self) -> Vec<(crate::models::TaxonomyKind, Uuid)> {
        use crate::models::TaxonomyKind;
        [
            (TaxonomyKind::Cultivar, self.cultivar_id),
            (TaxonomyKind::Screen, self.screen_id),
            (TaxonomyKind::Category, self.category_id),
            (TaxonomyKind::Treatment, self.treatment_id.flatten()),
            (TaxonomyKind::Species, self.species_id.flatten()),
        ]
        .into_iter()
        .filter_map(|(kind, id)| id.map(|id| (kind, id)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_stock;

    #[test]
    fn test_derived_values() {
        let stock = sample_stock(100, 30);
        assert_eq!(stock.balance(), 70);
        assert_eq!(stock.status(), StockStatus::Active);
        assert_eq!(stock.total_weight(), Decimal::new(70_000, 0));

        let empty = sample_stock(10, 10);
        assert_eq!(empty.status(), StockStatus::Depleted);
    }

    #[test]
    fn test_withdraw_respects_balance() {
        let mut stock = sample_stock(50, 0);
        assert!(stock.withdraw(50).is_ok());
        assert_eq!(stock.balance(), 0);
        assert!(matches!(
            stock.withdraw(1),
            Err(DomainError::InsufficientBalance(ref s)) if s.available == 0 && s.requested == 1
        ));
        assert!(stock.withdraw(0).is_err());
    }

    #[test]
    fn test_receive_never_overflows_entries() {
        let mut stock = sample_stock(i64::MAX - 10, 0);
        assert!(stock.receive(11).is_err());
        assert_eq!(stock.entries, i64::MAX - 10);
        assert!(stock.receive(10).is_ok());
        assert_eq!(stock.entries, i64::MAX);
    }

    #[test]
    fn test_merge_key_change_onto_taken_key() {
        let current = sample_stock(10, 0);
        let mut moved = current.clone();
        moved.address = "P-09".to_string();

        assert!(check_merge_key_change(&current, &moved, None).is_ok());
        assert_eq!(
            check_merge_key_change(&current, &moved, Some(Uuid::from_u128(77))),
            Err(DomainError::DuplicateKey("merge key"))
        );

        let mut relabelled = current.clone();
        relabelled.attributes.client = "COOP".to_string();
        assert!(check_merge_key_change(&current, &relabelled, Some(current.id)).is_ok());
    }

    #[test]
    fn test_merge_key_conflict_detection() {
        let stock = sample_stock(1, 0);
        let key = stock.merge_key();
        let mut other = key.clone();
        assert!(!key.conflicts_with(&other));
        other.packaging = Packaging::Sc;
        assert!(key.conflicts_with(&other));
        let elsewhere = key.at_address("P-02");
        assert!(!key.conflicts_with(&elsewhere));
    }

    #[test]
    fn test_totals_sc_equivalent() {
        let totals = StockTotals::from_balances(vec![
            (Packaging::Bag, 2),
            (Packaging::Sc, 10),
            (Packaging::Bag, 1),
        ]);
        assert_eq!(totals.total_bag, 3);
        assert_eq!(totals.total_sc, 10);
        assert_eq!(totals.total_sc_equivalent, 85);
    }

    #[test]
    fn test_packaging_serde_uppercase() {
        assert_eq!(serde_json::to_string(&Packaging::Bag).unwrap(), "\"BAG\"");
        assert_eq!(Packaging::parse("SC"), Some(Packaging::Sc));
        assert_eq!(Packaging::parse("sc"), None);
    }

    #[test]
    fn test_entry_input_normalizes() {
        let input: EntryInput = serde_json::from_value(serde_json::json!({
            "lot": " l-77 ",
            "cultivar_id": Uuid::nil(),
            "screen_id": Uuid::nil(),
            "category_id": Uuid::nil(),
            "address": " p 01 ",
            "entries": 10,
            "packaging": "SC",
            "company": " acme ",
            "observation": "  "
        }))
        .unwrap();
        let (attrs, address) = input.normalized().unwrap();
        assert_eq!(attrs.lot, "L-77");
        assert_eq!(address, "P-01");
        assert_eq!(attrs.company, "ACME");
        assert_eq!(attrs.observation, None);
        assert!(!input.allow_split);
    }

    #[test]
    fn test_entry_input_rejects_bad_values() {
        let mut input: EntryInput = serde_json::from_value(serde_json::json!({
            "lot": "L1",
            "cultivar_id": Uuid::nil(),
            "screen_id": Uuid::nil(),
            "category_id": Uuid::nil(),
            "address": "P-01",
            "entries": 0,
            "packaging": "BAG"
        }))
        .unwrap();
        assert!(matches!(
            input.normalized(),
            Err(DomainError::Invalid { field: "entries", .. })
        ));
        input.entries = 5;
        input.address = "P/01".into();
        assert!(matches!(
            input.normalized(),
            Err(DomainError::Invalid { field: "address", .. })
        ));
    }

    #[test]
    fn test_stock_edit_absent_null_and_value() {
        let mut stock = sample_stock(10, 2);
        stock.attributes.observation = Some("old".into());
        stock.attributes.treatment_id = Some(Uuid::from_u128(7));

        let edit: StockEdit = serde_json::from_value(serde_json::json!({
            "address": "p 02",
            "observation": null
        }))
        .unwrap();
        let edited = edit.apply_to(&stock).unwrap();
        assert_eq!(edited.address, "P-02");
        assert_eq!(edited.attributes.observation, None);
        assert_eq!(edited.attributes.treatment_id, Some(Uuid::from_u128(7)));
        assert_eq!(edited.balance(), 8);

        let unchanged = StockEdit::default().apply_to(&stock).unwrap();
        assert_eq!(unchanged, stock);
        assert!(StockEdit::default().referenced_ids().is_empty());
    }
}
