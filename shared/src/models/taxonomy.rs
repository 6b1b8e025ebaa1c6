//! Seed taxonomy: cultivars, screens, categories, treatments, species and products

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The five name-keyed taxonomies sharing one CRUD contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyKind {
    Cultivar,
    Screen,
    Category,
    Treatment,
    Species,
}

impl TaxonomyKind {
    pub const ALL: [TaxonomyKind; 5] = [
        TaxonomyKind::Cultivar,
        TaxonomyKind::Screen,
        TaxonomyKind::Category,
        TaxonomyKind::Treatment,
        TaxonomyKind::Species,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonomyKind::Cultivar => "cultivar",
            TaxonomyKind::Screen => "screen",
            TaxonomyKind::Category => "category",
            TaxonomyKind::Treatment => "treatment",
            TaxonomyKind::Species => "species",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Table holding the entries of this taxonomy
    pub fn table(&self) -> &'static str {
        match self {
            TaxonomyKind::Cultivar => "cultivars",
            TaxonomyKind::Screen => "screens",
            TaxonomyKind::Category => "categories",
            TaxonomyKind::Treatment => "treatments",
            TaxonomyKind::Species => "species",
        }
    }

    /// Foreign-key column used by stocks and products to reference this taxonomy
    pub fn reference_column(&self) -> &'static str {
        match self {
            TaxonomyKind::Cultivar => "cultivar_id",
            TaxonomyKind::Screen => "screen_id",
            TaxonomyKind::Category => "category_id",
            TaxonomyKind::Treatment => "treatment_id",
            TaxonomyKind::Species => "species_id",
        }
    }

    /// Human label used in messages (Portuguese, as shown to operators)
    pub fn label_pt(&self) -> &'static str {
        match self {
            TaxonomyKind::Cultivar => "Cultivar",
            TaxonomyKind::Screen => "Peneira",
            TaxonomyKind::Category => "Categoria",
            TaxonomyKind::Treatment => "Tratamento",
            TaxonomyKind::Species => "Espécie",
        }
    }
}

impl fmt::Display for TaxonomyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single taxonomy entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaxonomyEntry {
    pub id: Uuid,
    pub kind: TaxonomyKind,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A sellable seed product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub id: Uuid,
    pub code: String,
    pub description: String,
    pub cultivar_id: Uuid,
    pub product_type: String,
    pub screen_id: Option<Uuid>,
    pub company: String,
    pub species_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub treatment_id: Option<Uuid>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in TaxonomyKind::ALL {
            assert_eq!(TaxonomyKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TaxonomyKind::parse("product"), None);
    }

    #[test]
    fn test_reference_columns_are_distinct() {
        let mut columns: Vec<_> = TaxonomyKind::ALL
            .iter()
            .map(|k| k.reference_column())
            .collect();
        columns.sort();
        columns.dedup();
        assert_eq!(columns.len(), 5);
    }
}
