//! Port traits — the boundary between the pour logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ driver / FSM / mixer (domain)
//! ```
//!
//! Driven adapters (serial line, GPIO select lines, persistent store,
//! cross-worker lock) implement these traits.  The domain consumes them
//! via generics or trait objects, so the core never touches hardware
//! directly — which is also how the software-only deployment mode works:
//! swap in the simulated adapters and every hardware call is served from
//! an in-memory model.

use std::time::Duration;

use crate::fsm::State;
use crate::types::{Assignment, Drink, LevelClass, PourRecord};

// ───────────────────────────────────────────────────────────────
// Serial link (driven adapter: bus ↔ driver)
// ───────────────────────────────────────────────────────────────

/// Byte-level access to the shared serial line.
///
/// One request frame goes out, one reply frame comes back; the driver
/// never has more than one exchange in flight (the bus has no
/// multiplexing).
pub trait SerialLink {
    /// Transmit a complete frame.
    fn send(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Block until `buf` is filled or `timeout` elapses.
    fn recv_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), LinkError>;

    /// Drop any unread bytes.  Called before each exchange so a stale
    /// or half-received reply cannot be matched to a fresh request.
    fn purge(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Select side-channel (driven adapter: GPIO ↔ driver)
// ───────────────────────────────────────────────────────────────

/// The side-channel lines that steer the shared bus.
///
/// All three operations are fire-and-forget: no acknowledgment exists
/// on this sub-channel.  Correctness of the following packet exchange
/// depends on the caller having selected the right port first.
pub trait SelectLine {
    /// Route the bus to one physical port.
    fn select(&mut self, port: u8);

    /// Pulse the broadcast reset line (all modules restart).
    fn pulse_reset(&mut self);

    /// Toggle the LED-animation synchronisation line.
    fn set_sync(&mut self, on: bool);
}

// ───────────────────────────────────────────────────────────────
// Shared machine state (driven adapter: domain ↔ shared memory)
// ───────────────────────────────────────────────────────────────

/// The process-wide (or cross-process) cell holding the FSM state byte.
///
/// Every request-handling worker must observe the same machine state,
/// so the cell lives behind this trait rather than in any one worker.
pub trait StateStore {
    fn load(&self) -> State;
    fn store(&self, next: State);

    /// Atomically replace `current` with `next`.  Returns `false` if the
    /// cell no longer holds `current`.
    fn compare_and_swap(&self, current: State, next: State) -> bool;
}

/// Advisory lock serialising pours system-wide.
///
/// Deliberately not a guard-returning API: implementations may live in
/// shared memory where no RAII scope exists.  The mixer wraps acquire
/// and release in its own scope guard.
pub trait PourLock {
    /// Try to take the lock.  Never blocks.
    fn try_acquire(&self) -> bool;
    fn release(&self);
}

// ───────────────────────────────────────────────────────────────
// Persistent store (driven adapter: domain ↔ database)
// ───────────────────────────────────────────────────────────────

/// The slice of the persistent store the pour core needs: ingredient
/// assignments and drink definitions to read, the append-only pour log
/// and per-dispenser level classification to write.
///
/// Level classes are persisted (not merely cached) so that read-only
/// workers observe consistent stock state without taking the pour lock.
pub trait Datastore {
    /// Which ingredient is loaded on which dispenser.
    fn assignments(&self) -> Vec<Assignment>;

    /// All known drinks.
    fn drinks(&self) -> Vec<Drink>;

    /// Append one immutable pour-log record.
    fn record_pour(&mut self, record: &PourRecord) -> Result<(), StoreError>;

    /// Current stock classification for a dispenser (defaults to `Ok`
    /// for dispensers never classified).
    fn level_class(&self, dispenser: u8) -> LevelClass;

    /// Persist a new stock classification.  Implementations must bump
    /// [`level_epoch`](Self::level_epoch) on every call.
    fn set_level_class(&mut self, dispenser: u8, class: LevelClass) -> Result<(), StoreError>;

    /// Monotonic counter of classification writes, shared by every
    /// worker on the same store.  Cached availability results are valid
    /// only while this value is unchanged.
    fn level_epoch(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`SerialLink`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// No (or not enough) bytes arrived within the timeout.
    Timeout,
    /// The underlying device failed.
    Io(&'static str),
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Timeout => write!(f, "receive timeout"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

/// Errors from [`Datastore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Generic I/O error from the storage backend.
    Io,
    /// Storage is full.
    Full,
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Io => write!(f, "I/O error"),
            Self::Full => write!(f, "storage full"),
        }
    }
}
