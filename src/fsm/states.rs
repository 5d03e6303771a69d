//! Entry actions for each machine state.
//!
//! An action runs once when its state is entered.  It may touch the
//! driver and the store, and it returns the event that moves the
//! machine on — or `None` for terminal states.  Faults are classified
//! here, at the point where they happen: an action that fails records
//! the reason in [`Outcome`] and synthesizes `Fault`/`OverCurrent`
//! rather than bubbling an error out of the engine loop.
//!
//! LED commands are best-effort: a lighting failure is logged but never
//! turns a good pour into a fault.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};

use super::context::{Outcome, PourContext, PourItem, Session};
use super::{Event, State};
use crate::driver::{DriverError, pause};
use crate::error::{Broken, CannotPour};
use crate::ports::{LinkError, SelectLine, SerialLink};
use crate::stock;
use crate::types::{LevelClass, PourRecord};

/// Run the entry action for `state`.
pub fn enter<L: SerialLink, S: SelectLine>(
    state: State,
    ctx: &mut PourContext<'_, L, S>,
) -> Option<Event> {
    match state {
        // Initial state only; nothing ever transitions back into it.
        State::Start => None,

        State::Check => check(ctx),

        // Pourable rest states
        State::Ready | State::Low | State::Out => {
            if let Err(e) = ctx.driver.led_idle() {
                warn!("{state:?}: idle LED command failed: {e}");
            }
            None
        }

        // Rest states that want attention
        State::HardOut | State::CurrentSense | State::Error => {
            if let Err(e) = ctx.driver.led_off() {
                warn!("{state:?}: LED-off command failed: {e}");
            }
            None
        }

        State::PrePour => pre_pour(ctx),
        State::PreShot => pre_shot(ctx),

        State::Pouring | State::PourShot => dispense(ctx),

        State::TestDispense => {
            let Session::Test { dispenser, ml } = ctx.session else {
                ctx.outcome = Outcome::Faulted(Broken::InvalidTransition {
                    state: State::TestDispense,
                    event: Event::TestPour,
                });
                return Some(Event::Fault);
            };
            ctx.plan = vec![PourItem { dispenser, ingredient: 0, ml }];
            let ev = dispense(ctx);
            if ev == Some(Event::Dispensed) {
                // Calibration runs are reported but never logged.
                ctx.outcome = Outcome::Completed { total_ml: ml };
            }
            ev
        }

        State::PourDone => pour_done(ctx),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CHECK — probe levels, persist classification, classify the machine
// ═══════════════════════════════════════════════════════════════════════════

fn check<L: SerialLink, S: SelectLine>(ctx: &mut PourContext<'_, L, S>) -> Option<Event> {
    let count = ctx.driver.count();
    if count == 0 {
        warn!("CHECK: no dispensers on the bus");
        return Some(Event::LlHardOut);
    }

    if ctx.config.use_liquid_level_sensors {
        if let Err(broken) = probe_levels(ctx) {
            error!("CHECK: level probe failed: {broken}");
            ctx.outcome = Outcome::Faulted(broken);
            return Some(Event::Fault);
        }
    }

    let mut any_low = false;
    let mut any_out = false;
    for dispenser in 0..count as u8 {
        match ctx.store.level_class(dispenser) {
            LevelClass::Ok => {}
            LevelClass::Low => any_low = true,
            LevelClass::Out => any_out = true,
        }
    }

    if any_out {
        if stock::satisfiable_drinks(&*ctx.store).is_empty() {
            info!("CHECK: at least one dispenser out, no drink satisfiable");
            Some(Event::LlHardOut)
        } else {
            info!("CHECK: at least one dispenser out, some drinks remain");
            Some(Event::LlOut)
        }
    } else if any_low {
        Some(Event::LlLow)
    } else {
        Some(Event::LlOk)
    }
}

/// Trigger a chain-wide sensor sample, read every dispenser's cached
/// level, and persist any classification change.
fn probe_levels<L: SerialLink, S: SelectLine>(
    ctx: &mut PourContext<'_, L, S>,
) -> Result<(), Broken> {
    ctx.driver.update_liquid_levels().map_err(Broken::Comm)?;

    for index in 0..ctx.driver.count() {
        let level = ctx.driver.get_liquid_level(index).map_err(Broken::Comm)?;
        let class = if level <= ctx.config.level_out_threshold {
            LevelClass::Out
        } else if level <= ctx.config.level_low_threshold {
            LevelClass::Low
        } else {
            LevelClass::Ok
        };

        let dispenser = index as u8;
        if ctx.store.level_class(dispenser) != class {
            info!("CHECK: dispenser {dispenser} level {level} -> {class}");
            ctx.store
                .set_level_class(dispenser, class)
                .map_err(Broken::Store)?;
            ctx.levels_changed = true;
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
//  PRE_POUR / PRE_SHOT — re-validate immediately before hardware motion
// ═══════════════════════════════════════════════════════════════════════════

fn pre_pour<L: SerialLink, S: SelectLine>(ctx: &mut PourContext<'_, L, S>) -> Option<Event> {
    let Session::Drink { recipe } = ctx.session.clone() else {
        ctx.outcome = Outcome::Faulted(Broken::InvalidTransition {
            state: State::PrePour,
            event: Event::MakeDrink,
        });
        return Some(Event::Fault);
    };

    // State may have changed since the request was queued; check each
    // ingredient against the live classification before committing.
    let assignments = ctx.store.assignments();
    let mut plan: Vec<PourItem> = Vec::new();

    for (ingredient, ml) in recipe.nonzero() {
        let Some(dispenser) = stock::dispenser_for(&assignments, ingredient) else {
            info!("PRE_POUR: ingredient {ingredient} not loaded anywhere");
            ctx.outcome = Outcome::Denied(CannotPour::NoDispenser { ingredient });
            return Some(Event::Denied);
        };
        if usize::from(dispenser) >= ctx.driver.count() {
            warn!("PRE_POUR: ingredient {ingredient} assigned to absent dispenser {dispenser}");
            ctx.outcome = Outcome::Denied(CannotPour::NoDispenser { ingredient });
            return Some(Event::Denied);
        }
        if !ctx.store.level_class(dispenser).is_pourable() {
            info!("PRE_POUR: ingredient {ingredient} on dispenser {dispenser} is out");
            ctx.outcome = Outcome::Denied(CannotPour::OutOfStock { ingredient, dispenser });
            return Some(Event::Denied);
        }

        // Two ingredients sharing a dispenser collapse into one motion.
        match plan.iter_mut().find(|item| item.dispenser == usize::from(dispenser)) {
            Some(item) => item.ml += ml,
            None => plan.push(PourItem { dispenser: usize::from(dispenser), ingredient, ml }),
        }
    }

    if plan.is_empty() {
        ctx.outcome = Outcome::Denied(CannotPour::NothingToPour);
        return Some(Event::Denied);
    }

    ctx.plan = plan;
    Some(Event::Begin)
}

fn pre_shot<L: SerialLink, S: SelectLine>(ctx: &mut PourContext<'_, L, S>) -> Option<Event> {
    let Session::Shot { dispenser, ml } = ctx.session else {
        ctx.outcome = Outcome::Faulted(Broken::InvalidTransition {
            state: State::PreShot,
            event: Event::MakeShot,
        });
        return Some(Event::Fault);
    };

    if dispenser >= ctx.driver.count() {
        ctx.outcome = Outcome::Denied(CannotPour::UnknownDispenser { dispenser: dispenser as u8 });
        return Some(Event::Denied);
    }

    let assignments = ctx.store.assignments();
    let Some(assignment) = assignments.iter().find(|a| usize::from(a.dispenser) == dispenser)
    else {
        info!("PRE_SHOT: dispenser {dispenser} has no ingredient assigned");
        ctx.outcome = Outcome::Denied(CannotPour::UnknownDispenser { dispenser: dispenser as u8 });
        return Some(Event::Denied);
    };

    if !ctx.store.level_class(assignment.dispenser).is_pourable() {
        ctx.outcome = Outcome::Denied(CannotPour::OutOfStock {
            ingredient: assignment.ingredient,
            dispenser: assignment.dispenser,
        });
        return Some(Event::Denied);
    }

    ctx.plan = vec![PourItem { dispenser, ingredient: assignment.ingredient, ml }];
    Some(Event::Begin)
}

// ═══════════════════════════════════════════════════════════════════════════
//  POURING / POUR_SHOT / TEST_DISPENSE — issue motion, poll until idle
// ═══════════════════════════════════════════════════════════════════════════

fn dispense<L: SerialLink, S: SelectLine>(ctx: &mut PourContext<'_, L, S>) -> Option<Event> {
    if let Err(e) = ctx.driver.led_dispense() {
        warn!("POUR: dispense LED command failed: {e}");
    }

    // Issue one tick-dispense per implicated module, with a short gap so
    // the next command never lands while a module is still parsing.
    let mut active: Vec<usize> = Vec::with_capacity(ctx.plan.len());
    for item in ctx.plan.clone() {
        let ticks = ml_to_ticks(item.ml, ctx.config.ticks_per_ml);
        if ticks == 0 {
            continue;
        }
        let speed = if item.ml < ctx.config.slow_dispense_threshold_ml {
            ctx.config.half_speed
        } else {
            ctx.config.full_speed
        };

        info!(
            "POUR: dispenser {} <- {:.1} ml ({} ticks, speed {})",
            item.dispenser, item.ml, ticks, speed
        );
        if let Err(e) = ctx.driver.dispense_ticks(item.dispenser, ticks, speed) {
            error!("POUR: dispense command to {} failed: {e}", item.dispenser);
            quiesce(ctx, &active);
            ctx.outcome = Outcome::Faulted(Broken::Comm(e));
            return Some(Event::Fault);
        }
        active.push(item.dispenser);
        pause(ctx.config.inter_dispense_gap_ms);
    }

    // Busy-wait with a short sleep: the modules expose no push
    // notification, so the router polls each active module until all
    // report idle.
    let mut transient: u8 = 0;
    let deadline =
        Instant::now() + Duration::from_millis(u64::from(ctx.config.max_pour_wait_ms));

    while !active.is_empty() {
        let mut i = 0;
        while i < active.len() {
            let index = active[i];
            match ctx.driver.is_dispensing(index) {
                Ok((_, true)) => {
                    error!("POUR: over-current on dispenser {index}");
                    quiesce(ctx, &active);
                    ctx.outcome =
                        Outcome::Faulted(Broken::OverCurrent { dispenser: index as u8 });
                    return Some(Event::OverCurrent);
                }
                Ok((false, false)) => {
                    active.swap_remove(i);
                    transient = 0;
                }
                Ok((true, false)) => {
                    transient = 0;
                    i += 1;
                }
                Err(e) if e.is_transient() => {
                    // Expected while a motor is loading the line; retry
                    // within the budget instead of escalating.
                    transient += 1;
                    warn!(
                        "POUR: transient poll failure on dispenser {index} ({transient}/{})",
                        ctx.config.max_transient_polls
                    );
                    if transient > ctx.config.max_transient_polls {
                        error!("POUR: transient budget exhausted on dispenser {index}");
                        quiesce(ctx, &active);
                        ctx.outcome = Outcome::Faulted(Broken::Comm(e));
                        return Some(Event::Fault);
                    }
                    i += 1;
                }
                Err(e) => {
                    error!("POUR: status poll on dispenser {index} failed: {e}");
                    quiesce(ctx, &active);
                    ctx.outcome = Outcome::Faulted(Broken::Comm(e));
                    return Some(Event::Fault);
                }
            }
        }

        if active.is_empty() {
            break;
        }
        if Instant::now() >= deadline {
            error!("POUR: motors still busy after {} ms", ctx.config.max_pour_wait_ms);
            quiesce(ctx, &active);
            ctx.outcome =
                Outcome::Faulted(Broken::Comm(DriverError::Link(LinkError::Timeout)));
            return Some(Event::Fault);
        }
        pause(ctx.config.poll_interval_ms);
    }

    Some(Event::Dispensed)
}

/// Best-effort stop of every still-active module on a fault path.
fn quiesce<L: SerialLink, S: SelectLine>(ctx: &mut PourContext<'_, L, S>, active: &[usize]) {
    for &index in active {
        if let Err(e) = ctx.driver.stop_motor(index) {
            warn!("POUR: stop command to dispenser {index} failed: {e}");
        }
    }
}

fn ml_to_ticks(ml: f32, ticks_per_ml: f32) -> u16 {
    let ticks = (ml * ticks_per_ml).round();
    if ticks <= 0.0 {
        0
    } else if ticks >= f32::from(u16::MAX) {
        u16::MAX
    } else {
        ticks as u16
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  POUR_DONE — append the immutable log, report success
// ═══════════════════════════════════════════════════════════════════════════

fn pour_done<L: SerialLink, S: SelectLine>(ctx: &mut PourContext<'_, L, S>) -> Option<Event> {
    if let Err(e) = ctx.driver.led_drink_done() {
        warn!("POUR_DONE: LED command failed: {e}");
    }

    let at_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    for item in &ctx.plan {
        let record = PourRecord {
            ingredient: item.ingredient,
            dispenser: item.dispenser as u8,
            ml: item.ml,
            at_secs,
        };
        if let Err(e) = ctx.store.record_pour(&record) {
            error!("POUR_DONE: log append failed: {e}");
            ctx.outcome = Outcome::Faulted(Broken::Store(e));
            return Some(Event::Fault);
        }
    }

    let total = ctx.plan_total_ml();
    info!("POUR_DONE: {total:.0} ml across {} dispenser(s)", ctx.plan.len());
    ctx.outcome = Outcome::Completed { total_ml: total };
    Some(Event::Done)
}
