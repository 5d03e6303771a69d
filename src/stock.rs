//! Stock satisfiability queries.
//!
//! Pure functions over the persistent store: which dispenser holds an
//! ingredient, and which drinks are currently fully pourable.  Used by
//! the CHECK classification, the pre-pour validation, and the mixer's
//! availability cache.

use crate::ports::Datastore;
use crate::types::{Assignment, DrinkId, IngredientId, LevelClass};

/// The dispenser an ingredient is loaded on, if any.
pub fn dispenser_for(assignments: &[Assignment], ingredient: IngredientId) -> Option<u8> {
    assignments
        .iter()
        .find(|a| a.ingredient == ingredient)
        .map(|a| a.dispenser)
}

/// Drinks whose every ingredient is loaded on a pourable dispenser.
///
/// A drink with an empty ingredient list is never considered
/// satisfiable — it is a data-entry artifact, not a pourable drink.
pub fn satisfiable_drinks<D: Datastore + ?Sized>(store: &D) -> Vec<DrinkId> {
    let assignments = store.assignments();
    store
        .drinks()
        .iter()
        .filter(|drink| !drink.ingredients.is_empty())
        .filter(|drink| {
            drink.ingredients.iter().all(|&ingredient| {
                dispenser_for(&assignments, ingredient)
                    .is_some_and(|d| store.level_class(d) != LevelClass::Out)
            })
        })
        .map(|drink| drink.id)
        .collect()
}
