//! Shared mutable context threaded through every entry action.
//!
//! `PourContext` is the blackboard one FSM run works against: the
//! driver, the persistent store, the shared state cell, the active
//! session, and the outcome that the mixer reads back once the machine
//! has settled.

use crate::config::SystemConfig;
use crate::driver::RouterDriver;
use crate::error::{Broken, CannotPour};
use crate::ports::{Datastore, SelectLine, SerialLink, StateStore};
use crate::types::{IngredientId, Recipe};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// What this FSM run was asked to do.  Created per request, discarded
/// when the machine settles.
#[derive(Debug, Clone, Default)]
pub enum Session {
    /// No pour in flight (level checks, resets).
    #[default]
    Idle,
    /// Full recipe pour.
    Drink { recipe: Recipe },
    /// Single-ingredient shot.
    Shot { dispenser: usize, ml: f32 },
    /// Calibration dispense; never logged.
    Test { dispenser: usize, ml: f32 },
}

/// One dispenser's share of the active pour, resolved during pre-check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PourItem {
    pub dispenser: usize,
    pub ingredient: IngredientId,
    pub ml: f32,
}

/// How the run ended, for the mixer to translate into its return value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Outcome {
    /// Nothing to report (pure level check / reset).
    #[default]
    None,
    /// Motion completed and was logged.
    Completed { total_ml: f32 },
    /// Pre-check refused the request; no hardware moved.
    Denied(CannotPour),
    /// Hardware or storage fault mid-run.
    Faulted(Broken),
}

// ---------------------------------------------------------------------------
// PourContext
// ---------------------------------------------------------------------------

/// Everything an entry action may touch.
pub struct PourContext<'a, L: SerialLink, S: SelectLine> {
    pub driver: &'a mut RouterDriver<L, S>,
    pub store: &'a mut dyn Datastore,
    pub state: &'a dyn StateStore,
    pub config: &'a SystemConfig,

    /// The request this run is serving.
    pub session: Session,
    /// Per-dispenser volumes, filled in by the pre-check action.
    pub plan: Vec<PourItem>,
    /// Filled in by whichever action ends the run.
    pub outcome: Outcome,
    /// Set when the level check persisted a different classification
    /// for any dispenser; the mixer uses it to invalidate its
    /// availability cache.
    pub levels_changed: bool,
}

impl<'a, L: SerialLink, S: SelectLine> PourContext<'a, L, S> {
    pub fn new(
        driver: &'a mut RouterDriver<L, S>,
        store: &'a mut dyn Datastore,
        state: &'a dyn StateStore,
        config: &'a SystemConfig,
        session: Session,
    ) -> Self {
        Self {
            driver,
            store,
            state,
            config,
            session,
            plan: Vec::new(),
            outcome: Outcome::None,
            levels_changed: false,
        }
    }

    /// Total volume across the resolved plan.
    pub fn plan_total_ml(&self) -> f32 {
        self.plan.iter().map(|item| item.ml).sum()
    }
}
