//! Table-driven pour state machine.
//!
//! A static table of `(current state, event) → next state` triples
//! governs when the dispensing hardware may move:
//!
//! ```text
//!  START ──boot──▶ CHECK ──┬─▶ READY ──┐
//!                          ├─▶ LOW   ──┤──make drink──▶ PRE_POUR ──▶ POURING
//!                          ├─▶ OUT   ──┘                   │            │
//!                          └─▶ HARD_OUT              [denied]      [dispensed]
//!                                ▲                        │            ▼
//!                                └────────── CHECK ◀──────┴──── POUR_DONE
//!
//!  POURING ──over-current──▶ CURRENT_SENSE ──reset──▶ CHECK
//!  any action ──fault──▶ ERROR ──reset──▶ CHECK
//! ```
//!
//! [`do_event`] looks up the current shared state, follows the matching
//! triple, runs the entry action for the new state, and loops — entering
//! a state can synthesize the next event (entering `CHECK` probes liquid
//! levels and emits one of the `Ll*` classification events) — until a
//! terminal state is reached.  One external event therefore traverses
//! several internal states atomically from the caller's point of view.
//!
//! There is no wildcard matching: an event with no triple for the
//! current state is a programmer error.  The machine logs it, parks in
//! `ERROR`, and returns a fault — it never silently ignores an event.

pub mod context;
pub mod states;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::error::{Broken, Result};
use crate::ports::{SelectLine, SerialLink};
use context::PourContext;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// The closed set of machine states.
///
/// Stored as a single byte in the shared [`StateStore`](crate::ports::StateStore)
/// so every worker process observes the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum State {
    Start = 0,
    Check = 1,
    Ready = 2,
    Low = 3,
    Out = 4,
    HardOut = 5,
    PrePour = 6,
    Pouring = 7,
    PourDone = 8,
    CurrentSense = 9,
    Error = 10,
    TestDispense = 11,
    PreShot = 12,
    PourShot = 13,
}

impl State {
    pub const COUNT: usize = 14;

    /// Terminal ("at rest") states the machine settles into between
    /// user-visible operations.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Low | Self::Out | Self::HardOut | Self::CurrentSense | Self::Error
        )
    }

    /// A fault state that demands an explicit reset before pours resume.
    pub fn needs_reset(self) -> bool {
        matches!(self, Self::CurrentSense | Self::Error)
    }

    /// Decode a state byte from the shared store.  Unknown bytes map to
    /// `Error` (safe fallback) and trip a debug assertion.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Start,
            1 => Self::Check,
            2 => Self::Ready,
            3 => Self::Low,
            4 => Self::Out,
            5 => Self::HardOut,
            6 => Self::PrePour,
            7 => Self::Pouring,
            8 => Self::PourDone,
            9 => Self::CurrentSense,
            10 => Self::Error,
            11 => Self::TestDispense,
            12 => Self::PreShot,
            13 => Self::PourShot,
            _ => {
                debug_assert!(false, "invalid state byte: {raw}");
                Self::Error
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything that can drive the machine forward — external requests
/// and the events entry actions synthesize internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Power-on / post-reset entry.
    Boot,
    /// Liquid-level classification results from `CHECK`.
    LlOk,
    LlLow,
    LlOut,
    LlHardOut,
    /// External: pour a full recipe.
    MakeDrink,
    /// External: pour a single shot.
    MakeShot,
    /// External: calibration test dispense.
    TestPour,
    /// External: re-run the level check.
    CheckLevels,
    /// External: recover from a fault state.
    Reset,
    /// Pre-check passed; hardware may move.
    Begin,
    /// Pre-check failed; no hardware moved.
    Denied,
    /// All implicated dispensers report idle.
    Dispensed,
    /// Pour logged; cycle complete.
    Done,
    /// A module reported over-current during the pour.
    OverCurrent,
    /// Communication or storage failure.
    Fault,
}

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// The full transition relation.  No wildcards: every legal (state,
/// event) pair is listed, and nothing else is legal.
pub const TRANSITIONS: &[(State, Event, State)] = &[
    // Startup
    (State::Start, Event::Boot, State::Check),
    // Classification out of CHECK
    (State::Check, Event::LlOk, State::Ready),
    (State::Check, Event::LlLow, State::Low),
    (State::Check, Event::LlOut, State::Out),
    (State::Check, Event::LlHardOut, State::HardOut),
    (State::Check, Event::Fault, State::Error),
    // Drink requests from pourable rest states
    (State::Ready, Event::MakeDrink, State::PrePour),
    (State::Low, Event::MakeDrink, State::PrePour),
    (State::Out, Event::MakeDrink, State::PrePour),
    (State::Ready, Event::MakeShot, State::PreShot),
    (State::Low, Event::MakeShot, State::PreShot),
    (State::Out, Event::MakeShot, State::PreShot),
    // Calibration dispense; also available from ERROR as a diagnostic
    (State::Ready, Event::TestPour, State::TestDispense),
    (State::Low, Event::TestPour, State::TestDispense),
    (State::Out, Event::TestPour, State::TestDispense),
    (State::HardOut, Event::TestPour, State::TestDispense),
    (State::Error, Event::TestPour, State::TestDispense),
    // Level re-check; also available from ERROR as a diagnostic
    (State::Ready, Event::CheckLevels, State::Check),
    (State::Low, Event::CheckLevels, State::Check),
    (State::Out, Event::CheckLevels, State::Check),
    (State::HardOut, Event::CheckLevels, State::Check),
    (State::Error, Event::CheckLevels, State::Check),
    // Explicit reset from every rest state
    (State::Ready, Event::Reset, State::Check),
    (State::Low, Event::Reset, State::Check),
    (State::Out, Event::Reset, State::Check),
    (State::HardOut, Event::Reset, State::Check),
    (State::CurrentSense, Event::Reset, State::Check),
    (State::Error, Event::Reset, State::Check),
    // Pre-pour validation
    (State::PrePour, Event::Begin, State::Pouring),
    (State::PrePour, Event::Denied, State::Check),
    (State::PrePour, Event::Fault, State::Error),
    (State::PreShot, Event::Begin, State::PourShot),
    (State::PreShot, Event::Denied, State::Check),
    (State::PreShot, Event::Fault, State::Error),
    // Motion
    (State::Pouring, Event::Dispensed, State::PourDone),
    (State::Pouring, Event::OverCurrent, State::CurrentSense),
    (State::Pouring, Event::Fault, State::Error),
    (State::PourShot, Event::Dispensed, State::PourDone),
    (State::PourShot, Event::OverCurrent, State::CurrentSense),
    (State::PourShot, Event::Fault, State::Error),
    (State::TestDispense, Event::Dispensed, State::Check),
    (State::TestDispense, Event::OverCurrent, State::CurrentSense),
    (State::TestDispense, Event::Fault, State::Error),
    // Wrap-up
    (State::PourDone, Event::Done, State::Check),
    (State::PourDone, Event::Fault, State::Error),
];

/// Find the triple for (state, event), if one is defined.
pub fn lookup(state: State, event: Event) -> Option<State> {
    TRANSITIONS
        .iter()
        .find(|&&(s, e, _)| s == state && e == event)
        .map(|&(_, _, next)| next)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drive the machine from the current shared state until it settles
/// into a terminal state.
///
/// Must be called with the pour lock held: the loop reads and writes the
/// shared state byte and owns the bus for its whole duration.
pub fn do_event<L: SerialLink, S: SelectLine>(
    ctx: &mut PourContext<'_, L, S>,
    event: Event,
) -> Result<State> {
    let mut ev = event;
    loop {
        let current = ctx.state.load();
        let Some(next) = lookup(current, ev) else {
            error!("FSM: no transition from {current:?} on {ev:?}");
            ctx.state.store(State::Error);
            return Err(Broken::InvalidTransition { state: current, event: ev }.into());
        };

        info!("FSM: {current:?} --{ev:?}--> {next:?}");
        // Under the pour lock this can only fail if a peer worker wrote
        // the shared state without holding the lock.
        if !ctx.state.compare_and_swap(current, next) {
            error!("FSM: shared state moved off {current:?} outside the lock");
            ctx.state.store(State::Error);
            return Err(Broken::InvalidTransition { state: current, event: ev }.into());
        }

        match states::enter(next, ctx) {
            Some(synthesized) => ev = synthesized,
            None => {
                if next.is_terminal() {
                    return Ok(next);
                }
                // An entry action for a non-terminal state must produce
                // the event that moves the machine on.
                error!("FSM: {next:?} is not terminal but produced no event");
                ctx.state.store(State::Error);
                return Err(Broken::InvalidTransition { state: next, event: ev }.into());
            }
        }
    }
}
