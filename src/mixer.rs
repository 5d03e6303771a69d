//! Mixer — the single entry point external callers use to pour.
//!
//! ```text
//!  make_drink ─┐
//!  dispense_*  ├─▶ advisory lock ─▶ FSM drive-to-terminal ─▶ outcome
//!  check/reset ┘        │
//!                       └─ held for the whole multi-second sequence:
//!                          partial interleaving of two pours on a
//!                          shared bus is unsafe.
//! ```
//!
//! The lock is coarse by design.  If it cannot be taken the call fails
//! immediately with [`PourError::Busy`]; callers own retry policy.
//! Read-only queries (`state`, `get_available_drink_list`) never take
//! the lock — machine state and level classification live in shared
//! stores precisely so reads stay cheap.

use log::{info, warn};

use crate::config::SystemConfig;
use crate::driver::{Dispenser, RouterDriver};
use crate::error::{Broken, CannotPour, PourError, Result};
use crate::fsm::context::{Outcome, PourContext, Session};
use crate::fsm::{self, Event, State};
use crate::ports::{Datastore, PourLock, SelectLine, SerialLink, StateStore};
use crate::stock;
use crate::types::{DrinkId, Recipe};

/// What a successful pour reports back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PourSummary {
    /// Terminal state the machine settled into.
    pub state: State,
    /// Volume actually dispensed.
    pub total_ml: f32,
}

/// Which rest states a request may start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// Pours: READY / LOW / OUT only.
    Pour,
    /// Diagnostics (test dispense, level check): also allowed from
    /// HARD_OUT and ERROR, but not from CURRENT_SENSE.
    Diagnostic,
    /// Reset: any rest state.
    Rest,
}

pub struct Mixer<L, S, D, St, K>
where
    L: SerialLink,
    S: SelectLine,
    D: Datastore,
    St: StateStore,
    K: PourLock,
{
    driver: RouterDriver<L, S>,
    store: D,
    state: St,
    lock: K,
    config: SystemConfig,
    /// Availability cache, valid for the store epoch it was computed at.
    available: Option<(u64, Vec<DrinkId>)>,
}

impl<L, S, D, St, K> Mixer<L, S, D, St, K>
where
    L: SerialLink,
    S: SelectLine,
    D: Datastore,
    St: StateStore,
    K: PourLock,
{
    pub fn new(
        link: L,
        select: S,
        store: D,
        state: St,
        lock: K,
        config: SystemConfig,
    ) -> core::result::Result<Self, &'static str> {
        config.validate()?;
        Ok(Self {
            driver: RouterDriver::new(link, select, config.clone()),
            store,
            state,
            lock,
            config,
            available: None,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Reset the chain, discover dispensers, and run the first level
    /// check.  The machine settles into READY/LOW/OUT/HARD_OUT.
    pub fn startup(&mut self) -> Result<State> {
        let _guard = LockGuard::acquire(&self.lock)?;
        self.state.store(State::Start);
        if let Err(e) = self.driver.startup() {
            warn!("startup: discovery failed: {e}");
            self.state.store(State::Error);
            return Err(Broken::Comm(e).into());
        }
        let (state, _) = Self::drive(
            &mut self.driver,
            &mut self.store,
            &self.state,
            &self.config,
            &mut self.available,
            Session::Idle,
            Event::Boot,
        );
        state
    }

    // ── Pours ─────────────────────────────────────────────────

    /// Pour a full recipe.  On success one log record per ingredient
    /// has been appended before the lock is released.
    pub fn make_drink(&mut self, recipe: &Recipe) -> Result<PourSummary> {
        self.validate_volume(recipe.total_ml())?;
        if recipe.nonzero().next().is_none() {
            return Err(CannotPour::NothingToPour.into());
        }

        let _guard = LockGuard::acquire(&self.lock)?;
        self.gate(Gate::Pour)?;
        let (state, outcome) = Self::drive(
            &mut self.driver,
            &mut self.store,
            &self.state,
            &self.config,
            &mut self.available,
            Session::Drink { recipe: recipe.clone() },
            Event::MakeDrink,
        );
        Self::summarize(state?, outcome)
    }

    /// Pour a single shot from one dispenser.
    pub fn dispense_shot(&mut self, dispenser: usize, ml: f32) -> Result<PourSummary> {
        self.validate_volume(ml)?;

        let _guard = LockGuard::acquire(&self.lock)?;
        self.gate(Gate::Pour)?;
        let (state, outcome) = Self::drive(
            &mut self.driver,
            &mut self.store,
            &self.state,
            &self.config,
            &mut self.available,
            Session::Shot { dispenser, ml },
            Event::MakeShot,
        );
        Self::summarize(state?, outcome)
    }

    /// Calibration dispense: pour `ml` without writing a log record.
    /// Available from ERROR as a diagnostic.
    pub fn dispense_ml(&mut self, dispenser: usize, ml: f32) -> Result<PourSummary> {
        self.validate_volume(ml)?;
        if dispenser >= self.driver.count() {
            return Err(CannotPour::UnknownDispenser { dispenser: dispenser as u8 }.into());
        }

        let _guard = LockGuard::acquire(&self.lock)?;
        self.gate(Gate::Diagnostic)?;
        let (state, outcome) = Self::drive(
            &mut self.driver,
            &mut self.store,
            &self.state,
            &self.config,
            &mut self.available,
            Session::Test { dispenser, ml },
            Event::TestPour,
        );
        Self::summarize(state?, outcome)
    }

    // ── Maintenance ───────────────────────────────────────────

    /// Force a level re-check (e.g. after a manual refill).
    pub fn check_levels(&mut self) -> Result<State> {
        let _guard = LockGuard::acquire(&self.lock)?;
        self.gate(Gate::Diagnostic)?;
        let (state, _) = Self::drive(
            &mut self.driver,
            &mut self.store,
            &self.state,
            &self.config,
            &mut self.available,
            Session::Idle,
            Event::CheckLevels,
        );
        state
    }

    /// Recover from ERROR / CURRENT_SENSE.  Re-enters CHECK and settles
    /// into whatever the probe reports.
    pub fn reset(&mut self) -> Result<State> {
        let _guard = LockGuard::acquire(&self.lock)?;
        self.gate(Gate::Rest)?;
        let event = if self.state.load() == State::Start { Event::Boot } else { Event::Reset };
        let (state, _) = Self::drive(
            &mut self.driver,
            &mut self.store,
            &self.state,
            &self.config,
            &mut self.available,
            Session::Idle,
            event,
        );
        state
    }

    /// Forcibly stop one dispenser (cleaning cycles), bounded by the
    /// configured stop deadline.
    pub fn halt(&mut self, dispenser: usize) -> Result<()> {
        let _guard = LockGuard::acquire(&self.lock)?;
        self.driver.halt(dispenser).map_err(|e| PourError::Broken(Broken::Comm(e)))
    }

    // ── Read-only queries (no lock) ───────────────────────────

    /// Current machine state, as every worker sees it.
    pub fn state(&self) -> State {
        self.state.load()
    }

    /// The discovered dispenser table.
    pub fn dispensers(&self) -> &[Dispenser] {
        self.driver.dispensers()
    }

    /// Drinks currently satisfiable given per-dispenser stock state.
    ///
    /// Cached against the store's level epoch: any classification write
    /// (by this worker or a peer sharing the store) invalidates it.
    pub fn get_available_drink_list(&mut self) -> Vec<DrinkId> {
        let epoch = self.store.level_epoch();
        if let Some((cached_epoch, ref list)) = self.available {
            if cached_epoch == epoch {
                return list.clone();
            }
        }
        let list = stock::satisfiable_drinks(&self.store);
        info!("availability recomputed at epoch {epoch}: {} drink(s)", list.len());
        self.available = Some((epoch, list.clone()));
        list
    }

    /// Escape hatch for maintenance tooling (threshold calibration,
    /// pattern upload, comm tests).  Takes the pour lock so a running
    /// pour can never be interleaved with maintenance traffic.
    pub fn with_driver<T>(
        &mut self,
        f: impl FnOnce(&mut RouterDriver<L, S>) -> T,
    ) -> Result<T> {
        let _guard = LockGuard::acquire(&self.lock)?;
        Ok(f(&mut self.driver))
    }

    // ── Internals ─────────────────────────────────────────────

    /// Refuse requests the current rest state cannot serve, before any
    /// event is fired (the transition table has no triples for these,
    /// and a missing triple is a programmer error, not a user error).
    fn gate(&self, gate: Gate) -> Result<()> {
        let state = self.state.load();
        match gate {
            Gate::Pour => match state {
                State::Ready | State::Low | State::Out => Ok(()),
                State::HardOut => Err(CannotPour::NotSatisfiable.into()),
                s => Err(Broken::ResetRequired { state: s }.into()),
            },
            Gate::Diagnostic => match state {
                State::Ready | State::Low | State::Out | State::HardOut | State::Error => Ok(()),
                s => Err(Broken::ResetRequired { state: s }.into()),
            },
            Gate::Rest => {
                if state.is_terminal() || state == State::Start {
                    Ok(())
                } else {
                    Err(Broken::ResetRequired { state }.into())
                }
            }
        }
    }

    /// Run one FSM drive under the already-held lock.  An associated
    /// function over disjoint fields so the lock guard can stay alive
    /// across the call.
    fn drive(
        driver: &mut RouterDriver<L, S>,
        store: &mut D,
        state: &St,
        config: &SystemConfig,
        available: &mut Option<(u64, Vec<DrinkId>)>,
        session: Session,
        event: Event,
    ) -> (Result<State>, Outcome) {
        let mut ctx = PourContext::new(driver, store, state, config, session);
        let settled = fsm::do_event(&mut ctx, event);
        let outcome = ctx.outcome;
        let levels_changed = ctx.levels_changed;
        drop(ctx);

        if levels_changed {
            *available = None;
        }
        (settled, outcome)
    }

    fn validate_volume(&self, ml: f32) -> Result<()> {
        if ml <= 0.0 || !ml.is_finite() {
            return Err(CannotPour::NothingToPour.into());
        }
        if ml > self.config.max_drink_ml {
            return Err(CannotPour::OverLimit {
                requested_ml: ml,
                max_ml: self.config.max_drink_ml,
            }
            .into());
        }
        Ok(())
    }

    fn summarize(state: State, outcome: Outcome) -> Result<PourSummary> {
        match outcome {
            Outcome::Completed { total_ml } => Ok(PourSummary { state, total_ml }),
            Outcome::Denied(reason) => Err(PourError::CannotPour(reason)),
            Outcome::Faulted(broken) => Err(PourError::Broken(broken)),
            Outcome::None => {
                // A pour run must end with an outcome; treat silence as
                // a fault so nothing reports success it cannot prove.
                warn!("pour run ended with no outcome in {state:?}");
                Err(Broken::ResetRequired { state }.into())
            }
        }
    }
}

/// Scope guard pairing [`PourLock::try_acquire`] with `release`.
struct LockGuard<'a, K: PourLock> {
    lock: &'a K,
}

impl<'a, K: PourLock> LockGuard<'a, K> {
    fn acquire(lock: &'a K) -> Result<Self> {
        if lock.try_acquire() {
            Ok(Self { lock })
        } else {
            Err(PourError::Busy)
        }
    }
}

impl<K: PourLock> Drop for LockGuard<'_, K> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
