//! Adapters implementing the port traits.
//!
//! - [`sim`] — in-memory model of the dispenser chain; the software-only
//!   deployment mode and the test double.
//! - [`memstore`] — shared-handle in-memory datastore, state cell, and
//!   advisory lock (one process, many workers).
//! - [`gpio`] — `embedded-hal` GPIO implementation of the select
//!   side-channel for real hardware.

pub mod gpio;
pub mod memstore;
pub mod sim;
