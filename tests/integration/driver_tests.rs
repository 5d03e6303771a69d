//! RouterDriver against the simulated chain: discovery, operations,
//! timeout classification.

use std::time::Duration;

use barback::adapters::sim::SimBus;
use barback::driver::RouterDriver;
use barback::ports::SerialLink;
use barback::protocol::MotorDirection;

use crate::rig::{IDS, quick_config};

fn driver_for(bus: &SimBus) -> RouterDriver<
    barback::adapters::sim::SimLink,
    barback::adapters::sim::SimSelect,
> {
    RouterDriver::new(bus.link(), bus.select_line(), quick_config())
}

// ── Discovery ─────────────────────────────────────────────────

#[test]
fn discovery_finds_every_populated_port() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    assert_eq!(driver.startup().unwrap(), 2);

    let table = driver.dispensers();
    assert_eq!((table[0].port, table[0].id), (0, 0x11));
    assert_eq!((table[1].port, table[1].id), (1, 0x22));
    assert_eq!(table[0].version, 0x0205);
    assert_eq!(bus.reset_count(), 1);
}

#[test]
fn discovery_rejects_inconsistent_probe_ids() {
    let bus = SimBus::new(&IDS);
    // One corrupted reply out of three: the port must be ignored.
    bus.queue_ping_ids(0, &[0x11, 0x7A, 0x11]);
    let mut driver = driver_for(&bus);
    assert_eq!(driver.startup().unwrap(), 1);
    assert_eq!(driver.dispensers()[0].id, 0x22);
}

#[test]
fn duplicate_ids_are_flagged_and_excluded() {
    let bus = SimBus::new(&[0x33, 0x33]);
    let mut driver = driver_for(&bus);
    assert_eq!(driver.startup().unwrap(), 0);
    assert!(bus.dispenser(0).conflicted);
    assert!(bus.dispenser(1).conflicted);
}

// ── Operations ────────────────────────────────────────────────

#[test]
fn level_version_and_comm_queries() {
    let bus = SimBus::new(&IDS);
    bus.set_level(1, 1234);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    assert_eq!(driver.get_liquid_level(1).unwrap(), 1234);
    assert_eq!(driver.get_version(0).unwrap(), 0x0205);
    assert!(driver.comm_test(0).unwrap());
}

#[test]
fn threshold_calibration_round_trips() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    driver.set_liquid_thresholds(0, 900, 400).unwrap();
    assert_eq!(driver.get_liquid_thresholds(0).unwrap(), (900, 400));
    driver.set_cs_threshold(0, 77).unwrap();
    assert_eq!(bus.dispenser(0).cs_threshold, 77);
}

#[test]
fn saved_tick_accounting() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    driver.dispense_ticks(0, 200, 255).unwrap();
    assert_eq!(driver.saved_tick_count(0).unwrap(), 200);
    driver.reset_saved_tick_count(0).unwrap();
    assert_eq!(driver.saved_tick_count(0).unwrap(), 0);
}

#[test]
fn motor_direction_and_time_dispense() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    driver.set_motor_direction(0, MotorDirection::Backward).unwrap();
    assert_eq!(bus.dispenser(0).direction, MotorDirection::Backward);
    driver.dispense_time(0, 1500).unwrap();
    assert!(bus.dispenser(0).busy_polls > 0);
}

#[test]
fn halt_stops_a_running_motor() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    driver.start(0).unwrap();
    assert!(bus.dispenser(0).busy_polls > 0);
    driver.halt(0).unwrap();
    assert_eq!(bus.dispenser(0).busy_polls, 0);
}

#[test]
fn dispense_commands_are_logged_with_speed() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    driver.dispense_ticks(1, 306, 166).unwrap();
    assert_eq!(bus.tick_dispenses(), vec![(1, 306, 166)]);
}

#[test]
fn pattern_upload_sequences_three_commands() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    driver.upload_pattern(0, 2, &[(255, 0, 0, 10), (0, 0, 255, 10)]).unwrap();
    let pattern_cmds = bus
        .commands()
        .iter()
        .filter(|c| (23..=25).contains(&c.command))
        .count();
    assert_eq!(pattern_cmds, 4); // define + 2 segments + finish
}

// ── Failure classification ────────────────────────────────────

#[test]
fn status_poll_timeout_is_transient() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    bus.drop_status_replies(0, 1);
    let err = driver.is_dispensing(0).unwrap_err();
    assert!(err.is_transient());

    // The next poll gets through.
    assert_eq!(driver.is_dispensing(0).unwrap(), (false, false));
}

#[test]
fn corrupted_reply_is_not_transient() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    bus.corrupt_next_reply();
    let err = driver.get_liquid_level(0).unwrap_err();
    assert!(!err.is_transient());
}

#[test]
fn unknown_index_is_rejected_without_bus_traffic() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    let before = bus.commands().len();
    assert!(driver.get_liquid_level(7).is_err());
    assert_eq!(bus.commands().len(), before);
}

// ── Broadcast paths ───────────────────────────────────────────

#[test]
fn led_broadcasts_expect_no_reply() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    driver.led_idle().unwrap();
    driver.led_dispense().unwrap();
    driver.led_clean().unwrap();

    // Nothing queued: a follow-up read must time out.
    let mut link = bus.link();
    let mut buf = [0u8; barback::protocol::FRAME_SIZE];
    assert!(link.recv_exact(&mut buf, Duration::from_millis(1)).is_err());
}

#[test]
fn led_sync_line_toggles() {
    let bus = SimBus::new(&IDS);
    let mut driver = driver_for(&bus);
    driver.startup().unwrap();

    driver.led_sync(true);
    assert!(bus.sync_line());
    driver.led_sync(false);
    assert!(!bus.sync_line());
}
