//! Dispenser bus wire protocol.
//!
//! Every exchange on the shared serial line is one fixed-size packet in
//! each direction:
//!
//! ```text
//! ┌──────┬──────┬─────────┬──────┬──────┬──────┬──────┬────────┬────────┐
//! │ 0xFF │ 0xFF │  dest   │ cmd  │ val0 │ val1 │ val2 │ val3   │ CRC16  │
//! │ sync │ sync │         │      │      │      │      │        │ LE     │
//! └──────┴──────┴─────────┴──────┴──────┴──────┴──────┴────────┴────────┘
//!                └────────────── 7-bit packed on the wire ──────────────┘
//! ```
//!
//! Requests are a tagged union ([`Request`]) with exactly one encoding
//! per command; replies are parsed per command into [`Reply`].  Some
//! commands reinterpret the four value bytes as little-endian u16
//! fields — the command code decides the layout, never the caller.
//!
//! A reply echoes the request's command code and carries the responding
//! module's device id in the `dest` field.  For command-style requests
//! `val0` is the ack code; query replies pack their data after it.

pub mod codec;
pub mod crc;
pub mod pack7;

pub use pack7::{PACKED_PACKET_SIZE, RAW_PACKET_SIZE};

/// Frame synchronisation byte; two in a row start a packet.
pub const SYNC_BYTE: u8 = 0xFF;

/// Length of the sync header.
pub const SYNC_LEN: usize = 2;

/// Total frame length on the wire: sync header + packed packet.
pub const FRAME_SIZE: usize = SYNC_LEN + PACKED_PACKET_SIZE;

/// Destination id that addresses every module at once.  Broadcast
/// packets are never acknowledged.
pub const BROADCAST_ID: u8 = 0xFF;

// ---------------------------------------------------------------------------
// Command codes
// ---------------------------------------------------------------------------

/// On-wire command codes understood by the dispenser firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    Ping = 3,
    SetMotorSpeed = 4,
    TickDispense = 5,
    TimeDispense = 6,
    LedOff = 7,
    LedIdle = 8,
    LedDispense = 9,
    LedDrinkDone = 10,
    IsDispensing = 11,
    LiquidLevel = 12,
    UpdateLiquidLevel = 13,
    IdConflict = 14,
    LedClean = 15,
    SetCsThreshold = 16,
    SavedTickCount = 17,
    ResetSavedTickCount = 18,
    GetLiquidThresholds = 19,
    SetLiquidThresholds = 20,
    FlushSavedTickCount = 21,
    TickSpeedDispense = 22,
    PatternDefine = 23,
    PatternAddSegment = 24,
    PatternFinish = 25,
    SetMotorDirection = 26,
    GetVersion = 27,
    CommTest = 0xFE,
}

impl CommandCode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            3 => Some(Self::Ping),
            4 => Some(Self::SetMotorSpeed),
            5 => Some(Self::TickDispense),
            6 => Some(Self::TimeDispense),
            7 => Some(Self::LedOff),
            8 => Some(Self::LedIdle),
            9 => Some(Self::LedDispense),
            10 => Some(Self::LedDrinkDone),
            11 => Some(Self::IsDispensing),
            12 => Some(Self::LiquidLevel),
            13 => Some(Self::UpdateLiquidLevel),
            14 => Some(Self::IdConflict),
            15 => Some(Self::LedClean),
            16 => Some(Self::SetCsThreshold),
            17 => Some(Self::SavedTickCount),
            18 => Some(Self::ResetSavedTickCount),
            19 => Some(Self::GetLiquidThresholds),
            20 => Some(Self::SetLiquidThresholds),
            21 => Some(Self::FlushSavedTickCount),
            22 => Some(Self::TickSpeedDispense),
            23 => Some(Self::PatternDefine),
            24 => Some(Self::PatternAddSegment),
            25 => Some(Self::PatternFinish),
            26 => Some(Self::SetMotorDirection),
            27 => Some(Self::GetVersion),
            0xFE => Some(Self::CommTest),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ack codes
// ---------------------------------------------------------------------------

/// Acknowledgement codes a module can return in `val0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AckCode {
    Ok = 0,
    CrcFail = 1,
    Timeout = 2,
    Invalid = 3,
    InvalidHeader = 4,
    HeaderInPacket = 5,
}

impl AckCode {
    /// Decode a raw ack byte.  Code 6 is a legacy duplicate of the CRC
    /// failure code still emitted by old module firmware.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Ok),
            1 | 6 => Some(Self::CrcFail),
            2 => Some(Self::Timeout),
            3 => Some(Self::Invalid),
            4 => Some(Self::InvalidHeader),
            5 => Some(Self::HeaderInPacket),
            _ => None,
        }
    }
}

impl core::fmt::Display for AckCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::CrcFail => write!(f, "CRC failure"),
            Self::Timeout => write!(f, "ack timeout"),
            Self::Invalid => write!(f, "invalid packet"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::HeaderInPacket => write!(f, "header inside packet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Motor direction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MotorDirection {
    Backward = 0,
    Forward = 1,
}

// ---------------------------------------------------------------------------
// Raw packet
// ---------------------------------------------------------------------------

/// A decoded packet body: destination, command byte, and the four value
/// bytes.  The CRC has already been verified and stripped by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPacket {
    pub dest: u8,
    pub command: u8,
    pub values: [u8; 4],
}

impl RawPacket {
    /// The two value bytes starting at `offset`, little-endian.
    pub fn value_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.values[offset], self.values[offset + 1]])
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Every request the router can put on the bus, with its typed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Liveness / identification probe; the reply's `dest` field carries
    /// the responding module's device id.
    Ping,
    /// Run the motor continuously at `speed` (0 stops it).
    SetMotorSpeed { speed: u8 },
    /// Dispense exactly `ticks` encoder ticks at the default speed.
    TickDispense { ticks: u16 },
    /// Run the motor for `millis` milliseconds.
    TimeDispense { millis: u16 },
    /// Dispense `ticks` encoder ticks at an explicit speed.
    TickSpeedDispense { ticks: u16, speed: u8 },
    LedOff,
    LedIdle,
    LedDispense,
    LedDrinkDone,
    LedClean,
    /// Query motor-running and over-current flags.
    IsDispensing,
    /// Query the cached liquid-level reading.
    LiquidLevel,
    /// Broadcast: every module samples its level sensor and caches the
    /// result locally.  No ack.
    UpdateLiquidLevel,
    /// Notify a module that its device id collides with another port.
    IdConflict,
    /// Set the over-current comparator threshold.
    SetCsThreshold { threshold: u16 },
    /// Query the lifetime dispensed-tick counter kept in module EEPROM.
    SavedTickCount,
    ResetSavedTickCount,
    FlushSavedTickCount,
    GetLiquidThresholds,
    SetLiquidThresholds { low: u16, out: u16 },
    /// Begin uploading LED pattern `pattern`.
    PatternDefine { pattern: u8 },
    PatternAddSegment { red: u8, green: u8, blue: u8, steps: u8 },
    PatternFinish,
    SetMotorDirection { direction: MotorDirection },
    GetVersion,
    /// Echo test used by bring-up diagnostics.
    CommTest,
}

impl Request {
    pub fn code(&self) -> CommandCode {
        match self {
            Self::Ping => CommandCode::Ping,
            Self::SetMotorSpeed { .. } => CommandCode::SetMotorSpeed,
            Self::TickDispense { .. } => CommandCode::TickDispense,
            Self::TimeDispense { .. } => CommandCode::TimeDispense,
            Self::TickSpeedDispense { .. } => CommandCode::TickSpeedDispense,
            Self::LedOff => CommandCode::LedOff,
            Self::LedIdle => CommandCode::LedIdle,
            Self::LedDispense => CommandCode::LedDispense,
            Self::LedDrinkDone => CommandCode::LedDrinkDone,
            Self::LedClean => CommandCode::LedClean,
            Self::IsDispensing => CommandCode::IsDispensing,
            Self::LiquidLevel => CommandCode::LiquidLevel,
            Self::UpdateLiquidLevel => CommandCode::UpdateLiquidLevel,
            Self::IdConflict => CommandCode::IdConflict,
            Self::SetCsThreshold { .. } => CommandCode::SetCsThreshold,
            Self::SavedTickCount => CommandCode::SavedTickCount,
            Self::ResetSavedTickCount => CommandCode::ResetSavedTickCount,
            Self::FlushSavedTickCount => CommandCode::FlushSavedTickCount,
            Self::GetLiquidThresholds => CommandCode::GetLiquidThresholds,
            Self::SetLiquidThresholds { .. } => CommandCode::SetLiquidThresholds,
            Self::PatternDefine { .. } => CommandCode::PatternDefine,
            Self::PatternAddSegment { .. } => CommandCode::PatternAddSegment,
            Self::PatternFinish => CommandCode::PatternFinish,
            Self::SetMotorDirection { .. } => CommandCode::SetMotorDirection,
            Self::GetVersion => CommandCode::GetVersion,
            Self::CommTest => CommandCode::CommTest,
        }
    }

    /// Encode the four value bytes for this request.
    pub fn values(&self) -> [u8; 4] {
        match *self {
            Self::SetMotorSpeed { speed } => [speed, 0, 0, 0],
            Self::TickDispense { ticks } => {
                let [lo, hi] = ticks.to_le_bytes();
                [lo, hi, 0, 0]
            }
            Self::TimeDispense { millis } => {
                let [lo, hi] = millis.to_le_bytes();
                [lo, hi, 0, 0]
            }
            Self::TickSpeedDispense { ticks, speed } => {
                let [lo, hi] = ticks.to_le_bytes();
                [lo, hi, speed, 0]
            }
            Self::SetCsThreshold { threshold } => {
                let [lo, hi] = threshold.to_le_bytes();
                [lo, hi, 0, 0]
            }
            Self::SetLiquidThresholds { low, out } => {
                let [low_lo, low_hi] = low.to_le_bytes();
                let [out_lo, out_hi] = out.to_le_bytes();
                [low_lo, low_hi, out_lo, out_hi]
            }
            Self::PatternDefine { pattern } => [pattern, 0, 0, 0],
            Self::PatternAddSegment { red, green, blue, steps } => [red, green, blue, steps],
            Self::SetMotorDirection { direction } => [direction as u8, 0, 0, 0],
            // Everything else carries no payload.
            _ => [0, 0, 0, 0],
        }
    }

    /// Whether a reply packet is expected for this request when it is
    /// addressed to a single module.  Broadcast sends never expect one.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Self::UpdateLiquidLevel | Self::IdConflict)
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// A reply, parsed according to the command it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Plain acknowledgement (also the shape of `Ping` replies).
    Ack(AckCode),
    /// `IsDispensing`: motor running flag and over-current flag.
    Dispensing { running: bool, over_current: bool },
    /// `LiquidLevel`: cached sensor reading.
    LiquidLevel { level: u16 },
    /// `GetVersion`: module firmware version.
    Version { version: u16 },
    /// `SavedTickCount`: lifetime tick counter.
    SavedTicks { ticks: u32 },
    /// `GetLiquidThresholds`: per-module calibration pair.  This reply
    /// uses all four value bytes; there is no ack byte.
    LiquidThresholds { low: u16, out: u16 },
    /// `CommTest`: echoed check byte matched.
    CommTest { ok: bool },
}

/// Error from [`parse_reply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    /// The reply's command byte does not echo the request.
    CommandMismatch { sent: u8, got: u8 },
    /// `val0` is not a known ack code.
    UnknownAck { raw: u8 },
}

impl core::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CommandMismatch { sent, got } => {
                write!(f, "reply command {got:#04x} does not echo request {sent:#04x}")
            }
            Self::UnknownAck { raw } => write!(f, "unknown ack code {raw:#04x}"),
        }
    }
}

/// Parse a verified reply packet against the request that produced it.
///
/// A module that could not decode the request (bad CRC, framing slip)
/// answers with a bare ack packet instead of an echo; that surfaces here
/// as `Reply::Ack(non-ok)` so the driver can classify the failure.
pub fn parse_reply(sent: CommandCode, raw: &RawPacket) -> Result<Reply, ReplyError> {
    if raw.command != sent as u8 {
        // Not an echo: the module is reporting a receive failure.
        return match AckCode::from_u8(raw.values[0]) {
            Some(ack) if ack != AckCode::Ok => Ok(Reply::Ack(ack)),
            _ => Err(ReplyError::CommandMismatch { sent: sent as u8, got: raw.command }),
        };
    }

    match sent {
        CommandCode::IsDispensing => Ok(Reply::Dispensing {
            running: raw.values[1] != 0,
            over_current: raw.values[2] != 0,
        }),
        CommandCode::LiquidLevel => Ok(Reply::LiquidLevel { level: raw.value_u16(1) }),
        CommandCode::GetVersion => Ok(Reply::Version { version: raw.value_u16(1) }),
        CommandCode::SavedTickCount => Ok(Reply::SavedTicks {
            ticks: u32::from(raw.value_u16(1)) | (u32::from(raw.values[3]) << 16),
        }),
        CommandCode::GetLiquidThresholds => Ok(Reply::LiquidThresholds {
            low: raw.value_u16(0),
            out: raw.value_u16(2),
        }),
        CommandCode::CommTest => Ok(Reply::CommTest { ok: raw.values[1] == 0x55 }),
        _ => {
            let ack = AckCode::from_u8(raw.values[0])
                .ok_or(ReplyError::UnknownAck { raw: raw.values[0] })?;
            Ok(Reply::Ack(ack))
        }
    }
}
