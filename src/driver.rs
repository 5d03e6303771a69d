//! Router driver: high-level operations against the dispenser chain.
//!
//! The bus topology is asymmetric.  The router's transmit pair fans out
//! to every module, so each packet is heard chain-wide and filtered by
//! its `dest` id; the receive pair is routed through the select
//! side-channel, so the router only ever hears the module on the
//! currently selected port.  Every addressed operation is therefore a
//! fixed ritual:
//!
//! ```text
//!   select(port) ──▶ purge ──▶ send frame ──▶ recv 12 bytes ──▶ verify
//! ```
//!
//! One exchange completes (acknowledged or timed out) before the next is
//! issued; there is no multiplexing to exploit.
//!
//! Discovery at startup pulses the reset line, then walks every port and
//! pings it three times, accepting a device id only when all three
//! replies agree — a noisy or unterminated bus will happily report a
//! corrupted id once.  Duplicate ids across ports are flagged with an
//! id-conflict packet and both ports are excluded until resolved.

use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::bus::DispenserSelect;
use crate::config::{MAX_DISPENSERS, SystemConfig};
use crate::ports::{LinkError, SelectLine, SerialLink};
use crate::protocol::codec::{self, DecodeError};
use crate::protocol::{
    AckCode, BROADCAST_ID, FRAME_SIZE, MotorDirection, Reply, ReplyError, Request,
};

/// How many agreeing replies discovery demands per port.
const PROBE_ATTEMPTS: usize = 3;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The serial line failed (including receive timeout).
    Link(LinkError),
    /// The reply frame could not be decoded.
    Decode(DecodeError),
    /// The reply decoded but did not answer the request.
    Reply(ReplyError),
    /// The module answered with a non-OK ack code.
    Nak { port: u8, ack: AckCode },
    /// The reply was well-formed but of the wrong shape for the command.
    UnexpectedReply { port: u8 },
    /// The dispenser index is not in the discovered table.
    NoSuchDispenser { index: usize },
    /// A forced halt did not reach idle within the stop deadline.
    StopTimeout { port: u8 },
}

impl core::fmt::Display for DriverError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Reply(e) => write!(f, "reply: {e}"),
            Self::Nak { port, ack } => write!(f, "port {port} nak: {ack}"),
            Self::UnexpectedReply { port } => write!(f, "port {port}: unexpected reply shape"),
            Self::NoSuchDispenser { index } => write!(f, "no dispenser at index {index}"),
            Self::StopTimeout { port } => write!(f, "port {port}: motor did not stop in time"),
        }
    }
}

impl DriverError {
    /// True for the short-timeout failures that are expected while a
    /// motor is running and should be retried, not escalated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Link(LinkError::Timeout))
    }
}

impl From<LinkError> for DriverError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<DecodeError> for DriverError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<ReplyError> for DriverError {
    fn from(e: ReplyError) -> Self {
        Self::Reply(e)
    }
}

// ---------------------------------------------------------------------------
// Dispenser table
// ---------------------------------------------------------------------------

/// One discovered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispenser {
    /// Physical position in the daisy chain (select-line address).
    pub port: u8,
    /// Device id burned into the module firmware.
    pub id: u8,
    /// Module firmware version (0 if the query failed).
    pub version: u16,
}

// ---------------------------------------------------------------------------
// RouterDriver
// ---------------------------------------------------------------------------

pub struct RouterDriver<L: SerialLink, S: SelectLine> {
    link: L,
    select: DispenserSelect<S>,
    config: SystemConfig,
    dispensers: heapless::Vec<Dispenser, MAX_DISPENSERS>,
}

impl<L: SerialLink, S: SelectLine> RouterDriver<L, S> {
    pub fn new(link: L, select_line: S, config: SystemConfig) -> Self {
        Self {
            link,
            select: DispenserSelect::new(select_line),
            config,
            dispensers: heapless::Vec::new(),
        }
    }

    // ── Discovery ─────────────────────────────────────────────

    /// Reset the chain and discover every populated port.
    /// Returns the number of addressable dispensers.
    pub fn startup(&mut self) -> Result<usize, DriverError> {
        self.select.reset();
        pause(self.config.reset_settle_ms);

        self.dispensers.clear();
        let mut found: Vec<Dispenser> = Vec::new();
        for port in 0..MAX_DISPENSERS as u8 {
            if let Some(id) = self.probe_port(port) {
                info!("dispenser found: port {port}, id {id:#04x}");
                found.push(Dispenser { port, id, version: 0 });
            }
        }

        let found = self.exclude_conflicts(found);
        for mut d in found {
            d.version = self.query_version(d).unwrap_or_else(|e| {
                warn!("port {}: version query failed: {e}", d.port);
                0
            });
            // Table capacity equals the port count, so this cannot fail.
            let _ = self.dispensers.push(d);
        }

        info!("discovery complete: {} dispenser(s)", self.dispensers.len());
        Ok(self.dispensers.len())
    }

    /// Ping one port [`PROBE_ATTEMPTS`] times; accept the id only if
    /// every reply agrees.
    fn probe_port(&mut self, port: u8) -> Option<u8> {
        let mut ids = [0u8; PROBE_ATTEMPTS];
        for slot in &mut ids {
            // Address the probe to broadcast: the id is not known yet,
            // and only the selected port's module is audible anyway.
            match self.exchange_on_port(port, BROADCAST_ID, &Request::Ping) {
                Ok(raw) => *slot = raw.dest,
                Err(DriverError::Link(LinkError::Timeout)) => return None,
                Err(e) => {
                    warn!("port {port}: probe failed: {e}");
                    return None;
                }
            }
        }
        if ids.iter().any(|&id| id != ids[0]) {
            warn!("port {port}: inconsistent ids {ids:02x?}, port ignored");
            return None;
        }
        // A module reporting the broadcast id is misflashed, not usable.
        (ids[0] != BROADCAST_ID).then_some(ids[0])
    }

    /// Drop every dispenser whose id appears on more than one port, and
    /// tell the affected modules so they can show a conflict warning.
    fn exclude_conflicts(&mut self, found: Vec<Dispenser>) -> Vec<Dispenser> {
        let mut keep = Vec::with_capacity(found.len());
        for d in &found {
            let dup = found.iter().any(|o| o.id == d.id && o.port != d.port);
            if dup {
                error!("id conflict: id {:#04x} also present elsewhere, port {} excluded", d.id, d.port);
                // Fire-and-forget notification; no reply is defined.
                let _ = self.exchange_on_port(d.port, d.id, &Request::IdConflict);
            } else {
                keep.push(*d);
            }
        }
        keep
    }

    fn query_version(&mut self, d: Dispenser) -> Result<u16, DriverError> {
        let raw = self.exchange_on_port(d.port, d.id, &Request::GetVersion)?;
        match crate::protocol::parse_reply(Request::GetVersion.code(), &raw)? {
            Reply::Version { version } => Ok(version),
            Reply::Ack(ack) => Err(DriverError::Nak { port: d.port, ack }),
            _ => Err(DriverError::UnexpectedReply { port: d.port }),
        }
    }

    // ── Table access ──────────────────────────────────────────

    pub fn dispensers(&self) -> &[Dispenser] {
        &self.dispensers
    }

    pub fn count(&self) -> usize {
        self.dispensers.len()
    }

    fn lookup(&self, index: usize) -> Result<Dispenser, DriverError> {
        self.dispensers
            .get(index)
            .copied()
            .ok_or(DriverError::NoSuchDispenser { index })
    }

    // ── Motor operations ──────────────────────────────────────

    /// Run the motor continuously at full speed.
    pub fn start(&mut self, index: usize) -> Result<(), DriverError> {
        let speed = self.config.full_speed;
        self.command(index, Request::SetMotorSpeed { speed })
    }

    /// Stop the motor and wait (bounded) until the module reports idle.
    pub fn halt(&mut self, index: usize) -> Result<(), DriverError> {
        let d = self.lookup(index)?;
        self.command(index, Request::SetMotorSpeed { speed: 0 })?;

        let deadline = Instant::now() + Duration::from_millis(u64::from(self.config.stop_wait_ms));
        loop {
            match self.is_dispensing(index) {
                Ok((false, _)) => return Ok(()),
                Ok((true, _)) => {}
                Err(e) if e.is_transient() => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(DriverError::StopTimeout { port: d.port });
            }
            pause(self.config.poll_interval_ms);
        }
    }

    /// Command the motor off without waiting for idle.  Used on fault
    /// paths where the bus may already be unreliable; [`halt`] is the
    /// polite variant.
    pub fn stop_motor(&mut self, index: usize) -> Result<(), DriverError> {
        self.command(index, Request::SetMotorSpeed { speed: 0 })
    }

    pub fn set_motor_direction(
        &mut self,
        index: usize,
        direction: MotorDirection,
    ) -> Result<(), DriverError> {
        self.command(index, Request::SetMotorDirection { direction })
    }

    /// Dispense an exact tick count at the given motor speed.
    pub fn dispense_ticks(&mut self, index: usize, ticks: u16, speed: u8) -> Result<(), DriverError> {
        self.command(index, Request::TickSpeedDispense { ticks, speed })
    }

    /// Run the motor for a fixed duration (cleaning cycles).
    pub fn dispense_time(&mut self, index: usize, millis: u16) -> Result<(), DriverError> {
        self.command(index, Request::TimeDispense { millis })
    }

    // ── Status queries ────────────────────────────────────────

    /// Query (motor-running, over-current) with the short poll timeout.
    ///
    /// A running motor can transiently disrupt the line, so a timeout
    /// here is *expected* and surfaces as a transient error for the
    /// caller to retry — never escalated inside the driver.
    pub fn is_dispensing(&mut self, index: usize) -> Result<(bool, bool), DriverError> {
        let d = self.lookup(index)?;
        let timeout = Duration::from_millis(u64::from(self.config.poll_timeout_ms));
        let raw = self.exchange_with_timeout(d.port, d.id, &Request::IsDispensing, timeout)?;
        match crate::protocol::parse_reply(Request::IsDispensing.code(), &raw)? {
            Reply::Dispensing { running, over_current } => Ok((running, over_current)),
            Reply::Ack(ack) => Err(DriverError::Nak { port: d.port, ack }),
            _ => Err(DriverError::UnexpectedReply { port: d.port }),
        }
    }

    /// Read a module's cached liquid-level sample.
    pub fn get_liquid_level(&mut self, index: usize) -> Result<u16, DriverError> {
        match self.query(index, Request::LiquidLevel)? {
            Reply::LiquidLevel { level } => Ok(level),
            _ => Err(DriverError::UnexpectedReply { port: self.lookup(index)?.port }),
        }
    }

    /// Broadcast: every module samples its level sensor and caches the
    /// result for a later [`get_liquid_level`] read.  No ack; a settle
    /// pause covers the sampling window.
    pub fn update_liquid_levels(&mut self) -> Result<(), DriverError> {
        self.broadcast(&Request::UpdateLiquidLevel)?;
        pause(self.config.level_sample_settle_ms);
        Ok(())
    }

    pub fn get_version(&mut self, index: usize) -> Result<u16, DriverError> {
        match self.query(index, Request::GetVersion)? {
            Reply::Version { version } => Ok(version),
            _ => Err(DriverError::UnexpectedReply { port: self.lookup(index)?.port }),
        }
    }

    pub fn comm_test(&mut self, index: usize) -> Result<bool, DriverError> {
        match self.query(index, Request::CommTest)? {
            Reply::CommTest { ok } => Ok(ok),
            _ => Err(DriverError::UnexpectedReply { port: self.lookup(index)?.port }),
        }
    }

    // ── Maintenance operations ────────────────────────────────

    /// Lifetime dispensed-tick counter kept in module EEPROM.
    pub fn saved_tick_count(&mut self, index: usize) -> Result<u32, DriverError> {
        match self.query(index, Request::SavedTickCount)? {
            Reply::SavedTicks { ticks } => Ok(ticks),
            _ => Err(DriverError::UnexpectedReply { port: self.lookup(index)?.port }),
        }
    }

    pub fn reset_saved_tick_count(&mut self, index: usize) -> Result<(), DriverError> {
        self.command(index, Request::ResetSavedTickCount)
    }

    pub fn flush_saved_tick_count(&mut self, index: usize) -> Result<(), DriverError> {
        self.command(index, Request::FlushSavedTickCount)
    }

    pub fn set_cs_threshold(&mut self, index: usize, threshold: u16) -> Result<(), DriverError> {
        self.command(index, Request::SetCsThreshold { threshold })
    }

    pub fn get_liquid_thresholds(&mut self, index: usize) -> Result<(u16, u16), DriverError> {
        match self.query(index, Request::GetLiquidThresholds)? {
            Reply::LiquidThresholds { low, out } => Ok((low, out)),
            _ => Err(DriverError::UnexpectedReply { port: self.lookup(index)?.port }),
        }
    }

    pub fn set_liquid_thresholds(
        &mut self,
        index: usize,
        low: u16,
        out: u16,
    ) -> Result<(), DriverError> {
        self.command(index, Request::SetLiquidThresholds { low, out })
    }

    // ── LED control ───────────────────────────────────────────

    pub fn led_off(&mut self) -> Result<(), DriverError> {
        self.broadcast(&Request::LedOff)
    }

    pub fn led_idle(&mut self) -> Result<(), DriverError> {
        self.broadcast(&Request::LedIdle)
    }

    pub fn led_dispense(&mut self) -> Result<(), DriverError> {
        self.broadcast(&Request::LedDispense)
    }

    pub fn led_drink_done(&mut self) -> Result<(), DriverError> {
        self.broadcast(&Request::LedDrinkDone)
    }

    pub fn led_clean(&mut self) -> Result<(), DriverError> {
        self.broadcast(&Request::LedClean)
    }

    /// Toggle the chain-wide animation sync line.
    pub fn led_sync(&mut self, on: bool) {
        self.select.sync(on);
    }

    /// Upload a custom LED pattern to one module: define, segments, finish.
    pub fn upload_pattern(
        &mut self,
        index: usize,
        pattern: u8,
        segments: &[(u8, u8, u8, u8)],
    ) -> Result<(), DriverError> {
        self.command(index, Request::PatternDefine { pattern })?;
        for &(red, green, blue, steps) in segments {
            self.command(index, Request::PatternAddSegment { red, green, blue, steps })?;
        }
        self.command(index, Request::PatternFinish)
    }

    // ── Exchange plumbing ─────────────────────────────────────

    /// Addressed command expecting a bare OK ack.  Non-OK acks are
    /// already rejected inside [`query`].
    fn command(&mut self, index: usize, req: Request) -> Result<(), DriverError> {
        match self.query(index, req)? {
            Reply::Ack(AckCode::Ok) => Ok(()),
            _ => Err(DriverError::UnexpectedReply { port: self.lookup(index)?.port }),
        }
    }

    /// Addressed exchange returning the parsed reply.
    fn query(&mut self, index: usize, req: Request) -> Result<Reply, DriverError> {
        let d = self.lookup(index)?;
        let raw = self.exchange_on_port(d.port, d.id, &req)?;
        let reply = crate::protocol::parse_reply(req.code(), &raw)?;
        if let Reply::Ack(ack) = reply {
            if ack != AckCode::Ok {
                return Err(DriverError::Nak { port: d.port, ack });
            }
        }
        Ok(reply)
    }

    /// Broadcast send: heard by every module, acknowledged by none.
    fn broadcast(&mut self, req: &Request) -> Result<(), DriverError> {
        let frame = codec::encode_request(BROADCAST_ID, req);
        self.link.send(&frame)?;
        Ok(())
    }

    fn exchange_on_port(
        &mut self,
        port: u8,
        dest: u8,
        req: &Request,
    ) -> Result<crate::protocol::RawPacket, DriverError> {
        let timeout = Duration::from_millis(u64::from(self.config.exchange_timeout_ms));
        self.exchange_with_timeout(port, dest, req, timeout)
    }

    /// One full select → purge → send → receive → verify cycle.
    fn exchange_with_timeout(
        &mut self,
        port: u8,
        dest: u8,
        req: &Request,
        timeout: Duration,
    ) -> Result<crate::protocol::RawPacket, DriverError> {
        self.select.select(port);
        self.link.purge();

        let frame = codec::encode_request(dest, req);
        self.link.send(&frame)?;

        if !req.expects_reply() {
            // Covered by the broadcast-only commands; nothing to read.
            return Ok(crate::protocol::RawPacket { dest, command: req.code() as u8, values: [0; 4] });
        }

        let mut buf = [0u8; FRAME_SIZE];
        self.link.recv_exact(&mut buf, timeout)?;

        match codec::decode_frame(&buf) {
            Ok(raw) => Ok(raw),
            Err(e) => {
                // The stream may be out of sync; drop whatever is left.
                self.link.purge();
                Err(e.into())
            }
        }
    }
}

/// Sleep helper; zero is a no-op so tests can collapse all waits.
pub(crate) fn pause(ms: u32) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}
