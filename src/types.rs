//! Domain types shared across the driver, state machine, and mixer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Database id of a pourable ingredient.
pub type IngredientId = u32;

/// Database id of a drink (a named recipe).
pub type DrinkId = u32;

// ---------------------------------------------------------------------------
// Recipe
// ---------------------------------------------------------------------------

/// A pour request: ingredient id → millilitres.
///
/// Zero-volume entries are legal and skipped during the pour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub items: BTreeMap<IngredientId, f32>,
}

impl Recipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a recipe from (ingredient, ml) pairs.  Duplicate ingredients
    /// accumulate.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (IngredientId, f32)>) -> Self {
        let mut items: BTreeMap<IngredientId, f32> = BTreeMap::new();
        for (ingredient, ml) in pairs {
            *items.entry(ingredient).or_insert(0.0) += ml;
        }
        Self { items }
    }

    /// Total requested volume across all ingredients.
    pub fn total_ml(&self) -> f32 {
        self.items.values().sum()
    }

    /// Ingredients with a nonzero requested volume.
    pub fn nonzero(&self) -> impl Iterator<Item = (IngredientId, f32)> + '_ {
        self.items
            .iter()
            .filter(|&(_, &ml)| ml > 0.0)
            .map(|(&ingredient, &ml)| (ingredient, ml))
    }
}

// ---------------------------------------------------------------------------
// Drinks and assignments
// ---------------------------------------------------------------------------

/// A known drink: the set of ingredients it needs.  Volumes live in the
/// per-request [`Recipe`]; availability only depends on the ingredient set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drink {
    pub id: DrinkId,
    pub name: String,
    pub ingredients: Vec<IngredientId>,
}

/// Which ingredient is loaded on which dispenser (by chain position).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Index into the discovered dispenser table.
    pub dispenser: u8,
    pub ingredient: IngredientId,
}

// ---------------------------------------------------------------------------
// Liquid-level classification
// ---------------------------------------------------------------------------

/// Per-dispenser stock classification derived from the level sensor (or
/// set manually on sensorless deployments).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelClass {
    /// Plenty left.
    #[default]
    Ok,
    /// Below the low-volume warning threshold but still pourable.
    Low,
    /// Below the near-empty threshold; pours from this dispenser are
    /// refused until it is refilled.
    Out,
}

impl LevelClass {
    pub fn is_pourable(self) -> bool {
        self != Self::Out
    }
}

impl core::fmt::Display for LevelClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Low => write!(f, "low"),
            Self::Out => write!(f, "out"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pour log
// ---------------------------------------------------------------------------

/// One immutable pour-log entry, appended after a successful pour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PourRecord {
    pub ingredient: IngredientId,
    /// Chain position of the dispenser that poured.
    pub dispenser: u8,
    pub ml: f32,
    /// Unix timestamp, seconds.
    pub at_secs: u64,
}
