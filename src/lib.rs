//! Barback pour-cycle controller.
//!
//! A finite-state machine governs when dispensing hardware may move,
//! layered over a CRC-checked binary wire protocol that addresses one
//! of several daisy-chained dispenser modules on a shared serial bus.
//!
//! ```text
//!  Mixer ──▶ FSM ──▶ RouterDriver ──▶ DispenserSelect + codec ──▶ bus
//!    │                                                             │
//!    └── advisory lock, pour log, availability cache  ◀────────────┘
//! ```
//!
//! All hardware access goes through the port traits in [`ports`]; the
//! [`adapters::sim`] chain model makes the whole stack runnable (and
//! testable) with no hardware attached.

#![deny(unused_must_use)]

pub mod adapters;
pub mod bus;
pub mod config;
pub mod driver;
pub mod error;
pub mod fsm;
pub mod mixer;
pub mod ports;
pub mod protocol;
pub mod stock;
pub mod types;

pub use config::SystemConfig;
pub use error::{Broken, CannotPour, PourError};
pub use fsm::State;
pub use mixer::{Mixer, PourSummary};
