//! Simulated dispenser chain.
//!
//! A faithful in-memory model of the bus topology: packets sent on the
//! link are heard by every module and filtered by destination id, but
//! only the module on the currently *selected* port can be heard
//! replying.  The model answers with real wire frames (same codec, same
//! CRC), so the driver exercises its full encode/verify path against it.
//!
//! This adapter is both the software-only deployment mode (no serial
//! hardware required) and the test double — tests inject faults
//! (over-current, dropped or corrupted replies, inconsistent probe ids)
//! and assert on the recorded command log.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::ports::{LinkError, SelectLine, SerialLink};
use crate::protocol::codec::{decode_frame, encode_packet};
use crate::protocol::{BROADCAST_ID, CommandCode, MotorDirection, RawPacket};

/// How many status polls a tick/time dispense stays "running" for.
const DEFAULT_BUSY_POLLS: u32 = 2;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// One simulated module.
#[derive(Debug, Clone)]
pub struct SimDispenser {
    pub id: u8,
    /// Raw liquid-level reading returned by the level query.
    pub level: u16,
    /// Remaining status polls that report the motor running.
    pub busy_polls: u32,
    /// Next status polls report over-current.
    pub over_current: bool,
    /// Received an id-conflict notification.
    pub conflicted: bool,
    pub version: u16,
    pub direction: MotorDirection,
    pub cs_threshold: u16,
    pub thresholds: (u16, u16),
    pub saved_ticks: u32,
    /// Total ticks this module was commanded to dispense.
    pub ticks_total: u32,
}

impl SimDispenser {
    fn new(id: u8) -> Self {
        Self {
            id,
            level: 3000,
            busy_polls: 0,
            over_current: false,
            conflicted: false,
            version: 0x0205,
            direction: MotorDirection::Forward,
            cs_threshold: 0,
            thresholds: (1000, 450),
            saved_ticks: 0,
            ticks_total: 0,
        }
    }
}

/// One packet as the chain saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggedCommand {
    /// Port selected when the packet was sent (None right after reset).
    pub selected: Option<u8>,
    pub dest: u8,
    pub command: u8,
    pub values: [u8; 4],
}

struct SimState {
    dispensers: Vec<SimDispenser>,
    selected: Option<u8>,
    sync_line: bool,
    resets: u32,
    /// Reply frames waiting for the router to read.
    pending: VecDeque<Vec<u8>>,
    log: Vec<LoggedCommand>,
    busy_polls_per_dispense: u32,
    /// Swallow the next N replies per port (timeout injection).
    drop_replies: Vec<u32>,
    /// Swallow the next N *status* replies per port, leaving command
    /// acks intact (transient-poll-failure injection).
    drop_status: Vec<u32>,
    /// Flip a bit in the next reply frame (CRC-failure injection).
    corrupt_next: bool,
    /// Ids reported by upcoming Ping replies, per port (noise injection).
    ping_id_overrides: Vec<VecDeque<u8>>,
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Owner handle for building and inspecting the simulated chain.
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

/// [`SerialLink`] view of the chain.
#[derive(Clone)]
pub struct SimLink {
    state: Arc<Mutex<SimState>>,
}

/// [`SelectLine`] view of the chain.
#[derive(Clone)]
pub struct SimSelect {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    /// One module per entry of `ids`, at ports 0, 1, 2, …  Levels start
    /// well above the default LOW threshold.
    pub fn new(ids: &[u8]) -> Self {
        let state = SimState {
            dispensers: ids.iter().map(|&id| SimDispenser::new(id)).collect(),
            selected: None,
            sync_line: false,
            resets: 0,
            pending: VecDeque::new(),
            log: Vec::new(),
            busy_polls_per_dispense: DEFAULT_BUSY_POLLS,
            drop_replies: vec![0; ids.len()],
            drop_status: vec![0; ids.len()],
            corrupt_next: false,
            ping_id_overrides: ids.iter().map(|_| VecDeque::new()).collect(),
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub fn link(&self) -> SimLink {
        SimLink { state: Arc::clone(&self.state) }
    }

    pub fn select_line(&self) -> SimSelect {
        SimSelect { state: Arc::clone(&self.state) }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().expect("sim bus poisoned")
    }

    // ── Test knobs ────────────────────────────────────────────

    pub fn set_level(&self, port: usize, level: u16) {
        self.lock().dispensers[port].level = level;
    }

    pub fn set_over_current(&self, port: usize, on: bool) {
        self.lock().dispensers[port].over_current = on;
    }

    pub fn set_busy_polls(&self, polls: u32) {
        self.lock().busy_polls_per_dispense = polls;
    }

    /// Swallow the next `count` replies from `port`.
    pub fn drop_replies(&self, port: usize, count: u32) {
        self.lock().drop_replies[port] = count;
    }

    /// Swallow the next `count` is-dispensing replies from `port` while
    /// command acks keep flowing — the motor-busy line-disruption case.
    pub fn drop_status_replies(&self, port: usize, count: u32) {
        self.lock().drop_status[port] = count;
    }

    /// Corrupt the next reply frame (driver sees a CRC mismatch).
    pub fn corrupt_next_reply(&self) {
        self.lock().corrupt_next = true;
    }

    /// Make upcoming Ping replies from `port` report these ids in order
    /// (models a noisy bus during discovery).
    pub fn queue_ping_ids(&self, port: usize, ids: &[u8]) {
        self.lock().ping_id_overrides[port].extend(ids.iter().copied());
    }

    // ── Inspection ────────────────────────────────────────────

    pub fn dispenser(&self, port: usize) -> SimDispenser {
        self.lock().dispensers[port].clone()
    }

    pub fn commands(&self) -> Vec<LoggedCommand> {
        self.lock().log.clone()
    }

    /// Every tick-dispense command in issue order: (module port, ticks,
    /// speed).  Speed 0 marks the plain (default-speed) variant.
    pub fn tick_dispenses(&self) -> Vec<(u8, u16, u8)> {
        let state = self.lock();
        state
            .log
            .iter()
            .filter_map(|entry| {
                let code = CommandCode::from_u8(entry.command)?;
                let port = state.dispensers.iter().position(|d| d.id == entry.dest)? as u8;
                match code {
                    CommandCode::TickDispense => {
                        let ticks = u16::from_le_bytes([entry.values[0], entry.values[1]]);
                        Some((port, ticks, 0))
                    }
                    CommandCode::TickSpeedDispense => {
                        let ticks = u16::from_le_bytes([entry.values[0], entry.values[1]]);
                        Some((port, ticks, entry.values[2]))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    pub fn reset_count(&self) -> u32 {
        self.lock().resets
    }

    pub fn sync_line(&self) -> bool {
        self.lock().sync_line
    }
}

// ---------------------------------------------------------------------------
// SerialLink
// ---------------------------------------------------------------------------

impl SerialLink for SimLink {
    fn send(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let mut state = self.state.lock().map_err(|_| LinkError::Io("sim poisoned"))?;

        // A frame the codec rejects would be ignored by every module.
        let Ok(packet) = decode_frame(frame) else {
            return Ok(());
        };

        let selected_at_send = state.selected;
        state.log.push(LoggedCommand {
            selected: selected_at_send,
            dest: packet.dest,
            command: packet.command,
            values: packet.values,
        });

        let Some(code) = CommandCode::from_u8(packet.command) else {
            return Ok(());
        };

        // The transmit pair fans out: every module hears the packet and
        // filters on `dest`.
        let selected = state.selected;
        let busy = state.busy_polls_per_dispense;
        let mut reply: Option<(usize, RawPacket)> = None;

        for port in 0..state.dispensers.len() {
            let module = &mut state.dispensers[port];
            let addressed = packet.dest == module.id;
            let broadcast = packet.dest == BROADCAST_ID;
            if !addressed && !broadcast {
                continue;
            }

            apply_effect(module, code, &packet, busy);

            // Only an addressed module replies — except Ping, which also
            // answers broadcast so discovery can learn ids.  The receive
            // pair is routed, so only the selected port is audible.
            let answers = addressed || code == CommandCode::Ping;
            if answers && !matches!(code, CommandCode::UpdateLiquidLevel | CommandCode::IdConflict)
            {
                if selected == Some(port as u8) {
                    let ping_id = if code == CommandCode::Ping {
                        state.ping_id_overrides[port].pop_front()
                    } else {
                        None
                    };
                    let module = &mut state.dispensers[port];
                    reply = Some((port, build_reply(module, code, ping_id)));
                }
            }
        }

        if let Some((port, raw)) = reply {
            if state.drop_replies[port] > 0 {
                state.drop_replies[port] -= 1;
                return Ok(());
            }
            if code == CommandCode::IsDispensing && state.drop_status[port] > 0 {
                state.drop_status[port] -= 1;
                return Ok(());
            }
            let mut frame = encode_packet(&raw).to_vec();
            if state.corrupt_next {
                state.corrupt_next = false;
                frame[5] ^= 0x01;
            }
            state.pending.push_back(frame);
        }
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), LinkError> {
        let mut state = self.state.lock().map_err(|_| LinkError::Io("sim poisoned"))?;
        match state.pending.pop_front() {
            Some(frame) if frame.len() == buf.len() => {
                buf.copy_from_slice(&frame);
                Ok(())
            }
            Some(_) => Err(LinkError::Io("frame size mismatch")),
            None => Err(LinkError::Timeout),
        }
    }

    fn purge(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.pending.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// SelectLine
// ---------------------------------------------------------------------------

impl SelectLine for SimSelect {
    fn select(&mut self, port: u8) {
        if let Ok(mut state) = self.state.lock() {
            state.selected = Some(port);
        }
    }

    fn pulse_reset(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.selected = None;
            state.resets += 1;
            state.pending.clear();
            for module in &mut state.dispensers {
                module.busy_polls = 0;
            }
        }
    }

    fn set_sync(&mut self, on: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.sync_line = on;
        }
    }
}

// ---------------------------------------------------------------------------
// Module behaviour
// ---------------------------------------------------------------------------

fn apply_effect(module: &mut SimDispenser, code: CommandCode, packet: &RawPacket, busy: u32) {
    match code {
        CommandCode::TickDispense => {
            let ticks = packet.value_u16(0);
            module.ticks_total += u32::from(ticks);
            module.saved_ticks += u32::from(ticks);
            module.busy_polls = busy;
        }
        CommandCode::TickSpeedDispense => {
            let ticks = packet.value_u16(0);
            module.ticks_total += u32::from(ticks);
            module.saved_ticks += u32::from(ticks);
            module.busy_polls = busy;
        }
        CommandCode::TimeDispense => {
            module.busy_polls = busy;
        }
        CommandCode::SetMotorSpeed => {
            if packet.values[0] == 0 {
                module.busy_polls = 0;
            } else {
                module.busy_polls = u32::MAX;
            }
        }
        CommandCode::SetMotorDirection => {
            module.direction = if packet.values[0] == 0 {
                MotorDirection::Backward
            } else {
                MotorDirection::Forward
            };
        }
        CommandCode::SetCsThreshold => {
            module.cs_threshold = packet.value_u16(0);
        }
        CommandCode::SetLiquidThresholds => {
            module.thresholds = (packet.value_u16(0), packet.value_u16(2));
        }
        CommandCode::ResetSavedTickCount => {
            module.saved_ticks = 0;
        }
        CommandCode::IdConflict => {
            module.conflicted = true;
        }
        // Level sampling, LED commands, pattern upload: state the model
        // does not need to track.
        _ => {}
    }
}

fn build_reply(module: &mut SimDispenser, code: CommandCode, ping_id: Option<u8>) -> RawPacket {
    let values = match code {
        CommandCode::IsDispensing => {
            let running = if module.busy_polls > 0 {
                module.busy_polls -= 1;
                1
            } else {
                0
            };
            [0, running, u8::from(module.over_current), 0]
        }
        CommandCode::LiquidLevel => {
            let [lo, hi] = module.level.to_le_bytes();
            [0, lo, hi, 0]
        }
        CommandCode::GetVersion => {
            let [lo, hi] = module.version.to_le_bytes();
            [0, lo, hi, 0]
        }
        CommandCode::SavedTickCount => {
            let bytes = module.saved_ticks.to_le_bytes();
            [0, bytes[0], bytes[1], bytes[2]]
        }
        CommandCode::GetLiquidThresholds => {
            let [low_lo, low_hi] = module.thresholds.0.to_le_bytes();
            let [out_lo, out_hi] = module.thresholds.1.to_le_bytes();
            [low_lo, low_hi, out_lo, out_hi]
        }
        CommandCode::CommTest => [0, 0x55, 0, 0],
        _ => [0, 0, 0, 0],
    };

    RawPacket {
        dest: ping_id.unwrap_or(module.id),
        command: code as u8,
        values,
    }
}
