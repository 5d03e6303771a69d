//! Unified error types for the pour controller.
//!
//! The taxonomy mirrors who can do something about the failure:
//!
//! - [`PourError::Busy`] and [`PourError::CannotPour`] are recoverable by
//!   the caller (retry later, pick another recipe).
//! - [`PourError::Broken`] means the hardware or the bus is in a state
//!   that demands an explicit reset; every worker sees it until then.
//!
//! All variants are `Copy` so they can be threaded through the state
//! machine and across worker boundaries without allocation.

use core::fmt;

use crate::driver::DriverError;
use crate::fsm::{Event, State};
use crate::ports::StoreError;
use crate::types::IngredientId;

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, PourError>;

// ---------------------------------------------------------------------------
// Top-level pour error
// ---------------------------------------------------------------------------

/// Every fallible mixer operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PourError {
    /// Another pour holds the advisory lock.  Never retried internally.
    Busy,
    /// The request cannot currently be satisfied.  No hardware moved.
    CannotPour(CannotPour),
    /// Hardware or communication fault; pours are refused until reset.
    Broken(Broken),
}

impl fmt::Display for PourError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "another pour is in progress"),
            Self::CannotPour(e) => write!(f, "cannot pour: {e}"),
            Self::Broken(e) => write!(f, "broken: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Caller-recoverable conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CannotPour {
    /// Every entry in the recipe was zero volume.
    NothingToPour,
    /// The request exceeds the configured per-call volume ceiling.
    OverLimit { requested_ml: f32, max_ml: f32 },
    /// No dispenser is loaded with this ingredient.
    NoDispenser { ingredient: IngredientId },
    /// The named dispenser does not exist or has nothing assigned.
    UnknownDispenser { dispenser: u8 },
    /// The dispenser holding this ingredient is classified out of stock.
    OutOfStock { ingredient: IngredientId, dispenser: u8 },
    /// No known drink is satisfiable at all (machine is HARD_OUT).
    NotSatisfiable,
}

impl fmt::Display for CannotPour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToPour => write!(f, "recipe has no nonzero volumes"),
            Self::OverLimit { requested_ml, max_ml } => {
                write!(f, "requested {requested_ml:.0} ml exceeds limit {max_ml:.0} ml")
            }
            Self::NoDispenser { ingredient } => {
                write!(f, "no dispenser loaded with ingredient {ingredient}")
            }
            Self::UnknownDispenser { dispenser } => {
                write!(f, "no such dispenser: {dispenser}")
            }
            Self::OutOfStock { ingredient, dispenser } => {
                write!(f, "ingredient {ingredient} on dispenser {dispenser} is out of stock")
            }
            Self::NotSatisfiable => write!(f, "no drink is currently satisfiable"),
        }
    }
}

// ---------------------------------------------------------------------------
// Fault conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Broken {
    /// The machine is parked in a fault state; call `reset()` first.
    ResetRequired { state: State },
    /// A packet exchange failed beyond the transient-retry budget.
    Comm(DriverError),
    /// A dispenser reported over-current during a pour.
    OverCurrent { dispenser: u8 },
    /// An event arrived that the transition table does not define for
    /// the current state.  Programmer error; the machine parks in ERROR.
    InvalidTransition { state: State, event: Event },
    /// The persistent store rejected a write.
    Store(StoreError),
}

impl fmt::Display for Broken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResetRequired { state } => {
                write!(f, "machine is in {state:?}; reset required")
            }
            Self::Comm(e) => write!(f, "bus: {e}"),
            Self::OverCurrent { dispenser } => {
                write!(f, "dispenser {dispenser} reported over-current")
            }
            Self::InvalidTransition { state, event } => {
                write!(f, "no transition from {state:?} on {event:?}")
            }
            Self::Store(e) => write!(f, "store: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Funnels
// ---------------------------------------------------------------------------

impl From<CannotPour> for PourError {
    fn from(e: CannotPour) -> Self {
        Self::CannotPour(e)
    }
}

impl From<Broken> for PourError {
    fn from(e: Broken) -> Self {
        Self::Broken(e)
    }
}

impl From<DriverError> for Broken {
    fn from(e: DriverError) -> Self {
        Self::Comm(e)
    }
}

impl From<DriverError> for PourError {
    fn from(e: DriverError) -> Self {
        Self::Broken(Broken::Comm(e))
    }
}

impl From<StoreError> for PourError {
    fn from(e: StoreError) -> Self {
        Self::Broken(Broken::Store(e))
    }
}
