//! End-to-end pour scenarios through the mixer, FSM, and driver.

use barback::error::{Broken, CannotPour, PourError};
use barback::fsm::context::{PourContext, Session};
use barback::fsm::{self, Event, State};
use barback::ports::{Datastore, PourLock, StateStore};
use barback::types::Recipe;

use crate::rig::{Rig, TONIC, VODKA, quick_config};

// ── Happy path ────────────────────────────────────────────────

#[test]
fn low_plus_ready_pour_succeeds_and_logs() {
    let rig = Rig::new();
    // Vodka between OUT (450) and LOW (1000) thresholds; tonic full.
    rig.bus.set_level(0, 800);
    let mut mixer = rig.started_mixer();
    assert_eq!(mixer.state(), State::Low);

    let recipe = Recipe::from_pairs([(VODKA, 40.0), (TONIC, 110.0)]);
    let summary = mixer.make_drink(&recipe).unwrap();

    assert_eq!(summary.state, State::Low);
    assert!((summary.total_ml - 150.0).abs() < 0.01);

    let records = rig.store.records();
    assert_eq!(records.len(), 2);
    let total: f32 = records.iter().map(|r| r.ml).sum();
    assert!((total - 150.0).abs() < 0.01);

    // 40 ml -> 111 ticks, 110 ml -> 306 ticks, both at full speed.
    assert_eq!(rig.bus.tick_dispenses(), vec![(0, 111, 255), (1, 306, 255)]);
}

#[test]
fn small_volumes_pour_at_half_speed() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();

    mixer.dispense_shot(0, 10.0).unwrap();
    // 10 ml -> 28 ticks, below the 15 ml threshold -> half speed.
    assert_eq!(rig.bus.tick_dispenses(), vec![(0, 28, 166)]);
    assert_eq!(rig.store.records().len(), 1);
    assert_eq!(rig.store.records()[0].ingredient, VODKA);
}

#[test]
fn zero_volume_entries_are_skipped() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();

    let recipe = Recipe::from_pairs([(VODKA, 0.0), (TONIC, 20.0)]);
    let summary = mixer.make_drink(&recipe).unwrap();

    assert!((summary.total_ml - 20.0).abs() < 0.01);
    assert_eq!(rig.store.records().len(), 1);
    assert_eq!(rig.store.records()[0].ingredient, TONIC);
    assert_eq!(rig.bus.tick_dispenses().len(), 1);
}

// ── Request validation ────────────────────────────────────────

#[test]
fn over_limit_volume_is_refused_before_locking() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();

    let recipe = Recipe::from_pairs([(VODKA, 400.0), (TONIC, 200.0)]);
    let err = mixer.make_drink(&recipe).unwrap_err();
    assert!(matches!(err, PourError::CannotPour(CannotPour::OverLimit { .. })));
    assert!(rig.bus.tick_dispenses().is_empty());
}

#[test]
fn all_zero_recipe_is_nothing_to_pour() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();

    let recipe = Recipe::from_pairs([(VODKA, 0.0)]);
    let err = mixer.make_drink(&recipe).unwrap_err();
    assert!(matches!(err, PourError::CannotPour(CannotPour::NothingToPour)));
}

#[test]
fn unknown_ingredient_is_denied_with_no_motion() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();

    let recipe = Recipe::from_pairs([(99, 30.0)]);
    let err = mixer.make_drink(&recipe).unwrap_err();
    assert!(matches!(
        err,
        PourError::CannotPour(CannotPour::NoDispenser { ingredient: 99 })
    ));
    assert!(rig.bus.tick_dispenses().is_empty());
}

// ── Stock gating ──────────────────────────────────────────────

#[test]
fn out_ingredient_refuses_pour_with_zero_hardware_commands() {
    let rig = Rig::new();
    rig.bus.set_level(0, 300); // vodka below the OUT threshold
    let mut mixer = rig.started_mixer();
    // Tonic water is still satisfiable, so OUT rather than HARD_OUT.
    assert_eq!(mixer.state(), State::Out);

    let recipe = Recipe::from_pairs([(VODKA, 40.0)]);
    let err = mixer.make_drink(&recipe).unwrap_err();
    assert!(matches!(
        err,
        PourError::CannotPour(CannotPour::OutOfStock { ingredient: VODKA, dispenser: 0 })
    ));
    assert!(rig.bus.tick_dispenses().is_empty());
    assert!(rig.store.records().is_empty());
    assert_eq!(mixer.state(), State::Out);
}

#[test]
fn everything_out_settles_hard_out_and_refuses() {
    let rig = Rig::new();
    rig.bus.set_level(0, 300);
    rig.bus.set_level(1, 200);
    let mut mixer = rig.started_mixer();
    assert_eq!(mixer.state(), State::HardOut);

    let recipe = Recipe::from_pairs([(VODKA, 40.0)]);
    let err = mixer.make_drink(&recipe).unwrap_err();
    assert!(matches!(err, PourError::CannotPour(CannotPour::NotSatisfiable)));
    assert!(rig.bus.tick_dispenses().is_empty());
}

#[test]
fn refill_recovers_via_check_levels() {
    let rig = Rig::new();
    rig.bus.set_level(0, 300);
    let mut mixer = rig.started_mixer();
    assert_eq!(mixer.state(), State::Out);

    rig.bus.set_level(0, 3000); // manual refill
    assert_eq!(mixer.check_levels().unwrap(), State::Ready);
    assert!(mixer.make_drink(&Recipe::from_pairs([(VODKA, 40.0)])).is_ok());
}

// ── Fault handling ────────────────────────────────────────────

#[test]
fn over_current_parks_in_current_sense_until_reset() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();
    rig.bus.set_over_current(0, true);

    let recipe = Recipe::from_pairs([(VODKA, 40.0)]);
    let err = mixer.make_drink(&recipe).unwrap_err();
    assert!(matches!(
        err,
        PourError::Broken(Broken::OverCurrent { dispenser: 0 })
    ));
    assert_eq!(mixer.state(), State::CurrentSense);

    // No pour is accepted until an explicit reset.
    let err = mixer.make_drink(&recipe).unwrap_err();
    assert!(matches!(err, PourError::Broken(Broken::ResetRequired { .. })));

    rig.bus.set_over_current(0, false);
    assert_eq!(mixer.reset().unwrap(), State::Ready);
    assert!(mixer.make_drink(&recipe).is_ok());
}

#[test]
fn command_timeout_mid_pour_parks_in_error() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();

    // Swallow the tick-dispense ack: the command exchange times out.
    rig.bus.drop_replies(0, 1);
    let err = mixer.make_drink(&Recipe::from_pairs([(VODKA, 40.0)])).unwrap_err();
    assert!(matches!(err, PourError::Broken(Broken::Comm(_))));
    assert_eq!(mixer.state(), State::Error);
    assert!(rig.store.records().is_empty());
}

#[test]
fn transient_poll_failures_within_budget_do_not_fault() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();

    // Three lost status replies, budget is five: the pour completes.
    rig.bus.drop_status_replies(0, 3);
    let summary = mixer.make_drink(&Recipe::from_pairs([(VODKA, 40.0)])).unwrap();
    assert!((summary.total_ml - 40.0).abs() < 0.01);
}

#[test]
fn transient_poll_failures_beyond_budget_escalate() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();

    rig.bus.drop_status_replies(0, 20);
    let err = mixer.make_drink(&Recipe::from_pairs([(VODKA, 40.0)])).unwrap_err();
    assert!(matches!(err, PourError::Broken(Broken::Comm(_))));
    assert_eq!(mixer.state(), State::Error);
}

#[test]
fn error_state_still_allows_diagnostics() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();

    rig.bus.drop_replies(0, 1);
    let _ = mixer.make_drink(&Recipe::from_pairs([(VODKA, 40.0)]));
    assert_eq!(mixer.state(), State::Error);

    // Calibration dispense works from ERROR and writes no log record.
    let summary = mixer.dispense_ml(1, 20.0).unwrap();
    assert!((summary.total_ml - 20.0).abs() < 0.01);
    assert!(rig.store.records().is_empty());
}

// ── Busy ──────────────────────────────────────────────────────

#[test]
fn held_lock_surfaces_busy_immediately() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();

    assert!(rig.lock.try_acquire());
    let err = mixer.make_drink(&Recipe::from_pairs([(VODKA, 40.0)])).unwrap_err();
    assert!(matches!(err, PourError::Busy));
    rig.lock.release();

    assert!(mixer.make_drink(&Recipe::from_pairs([(VODKA, 40.0)])).is_ok());
}

// ── Availability ──────────────────────────────────────────────

#[test]
fn availability_follows_level_classification() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();
    assert_eq!(mixer.get_available_drink_list(), vec![10, 11, 12]);

    rig.bus.set_level(0, 300);
    mixer.check_levels().unwrap();
    assert_eq!(mixer.get_available_drink_list(), vec![12]);
}

#[test]
fn availability_cache_invalidated_by_peer_writes() {
    let rig = Rig::new();
    let mut mixer = rig.started_mixer();
    assert_eq!(mixer.get_available_drink_list(), vec![10, 11, 12]);

    // A peer worker (sharing the store) marks tonic out of stock.
    let mut peer_store = rig.store.clone();
    peer_store
        .set_level_class(1, barback::types::LevelClass::Out)
        .unwrap();

    assert_eq!(mixer.get_available_drink_list(), vec![11]);
}

// ── FSM totality ──────────────────────────────────────────────

#[test]
fn undefined_event_fails_loudly_and_parks_in_error() {
    let rig = Rig::new();
    let mut driver = barback::driver::RouterDriver::new(
        rig.bus.link(),
        rig.bus.select_line(),
        quick_config(),
    );
    driver.startup().unwrap();

    let mut store = rig.store.clone();
    let config = quick_config();
    rig.state.store(State::Pouring);

    let mut ctx = PourContext::new(&mut driver, &mut store, &rig.state, &config, Session::Idle);
    let err = fsm::do_event(&mut ctx, Event::MakeDrink).unwrap_err();
    assert!(matches!(
        err,
        PourError::Broken(Broken::InvalidTransition { state: State::Pouring, event: Event::MakeDrink })
    ));
    assert_eq!(rig.state.load(), State::Error);
}
