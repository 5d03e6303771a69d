//! In-memory store, state cell, and lock.
//!
//! Each type is a cheap-to-clone handle over shared interior state, so
//! several workers (threads) constructed around the same handles observe
//! one datastore, one machine-state byte, and one advisory lock — the
//! single-process analogue of the shared-memory deployment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::fsm::State;
use crate::ports::{Datastore, PourLock, StateStore, StoreError};
use crate::types::{Assignment, Drink, LevelClass, PourRecord};

// ───────────────────────────────────────────────────────────────
// Datastore
// ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    assignments: Vec<Assignment>,
    drinks: Vec<Drink>,
    records: Vec<PourRecord>,
    classes: HashMap<u8, LevelClass>,
    epoch: u64,
}

/// Shared-handle in-memory [`Datastore`].
#[derive(Clone, Default)]
pub struct MemDatastore {
    inner: Arc<Mutex<Inner>>,
}

/// JSON fixture shape accepted by [`MemDatastore::from_json`].
#[derive(Deserialize)]
struct Fixture {
    #[serde(default)]
    assignments: Vec<Assignment>,
    #[serde(default)]
    drinks: Vec<Drink>,
}

impl MemDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_setup(assignments: Vec<Assignment>, drinks: Vec<Drink>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock().expect("memstore poisoned");
            inner.assignments = assignments;
            inner.drinks = drinks;
        }
        store
    }

    /// Load assignments and drinks from a JSON fixture:
    /// `{"assignments": [{"dispenser": 0, "ingredient": 1}], "drinks": [...]}`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let fixture: Fixture = serde_json::from_str(json)?;
        Ok(Self::with_setup(fixture.assignments, fixture.drinks))
    }

    /// Snapshot of the append-only pour log.
    pub fn records(&self) -> Vec<PourRecord> {
        self.inner.lock().expect("memstore poisoned").records.clone()
    }
}

impl Datastore for MemDatastore {
    fn assignments(&self) -> Vec<Assignment> {
        self.inner.lock().expect("memstore poisoned").assignments.clone()
    }

    fn drinks(&self) -> Vec<Drink> {
        self.inner.lock().expect("memstore poisoned").drinks.clone()
    }

    fn record_pour(&mut self, record: &PourRecord) -> Result<(), StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Io)?
            .records
            .push(record.clone());
        Ok(())
    }

    fn level_class(&self, dispenser: u8) -> LevelClass {
        self.inner
            .lock()
            .expect("memstore poisoned")
            .classes
            .get(&dispenser)
            .copied()
            .unwrap_or_default()
    }

    fn set_level_class(&mut self, dispenser: u8, class: LevelClass) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Io)?;
        inner.classes.insert(dispenser, class);
        inner.epoch += 1;
        Ok(())
    }

    fn level_epoch(&self) -> u64 {
        self.inner.lock().expect("memstore poisoned").epoch
    }
}

// ───────────────────────────────────────────────────────────────
// State cell
// ───────────────────────────────────────────────────────────────

/// Shared-handle machine-state cell backed by one atomic byte.
#[derive(Clone)]
pub struct MemStateStore {
    cell: Arc<AtomicU8>,
}

impl Default for MemStateStore {
    fn default() -> Self {
        Self { cell: Arc::new(AtomicU8::new(State::Start as u8)) }
    }
}

impl MemStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemStateStore {
    fn load(&self) -> State {
        State::from_u8(self.cell.load(Ordering::SeqCst))
    }

    fn store(&self, next: State) {
        self.cell.store(next as u8, Ordering::SeqCst);
    }

    fn compare_and_swap(&self, current: State, next: State) -> bool {
        self.cell
            .compare_exchange(current as u8, next as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

// ───────────────────────────────────────────────────────────────
// Advisory lock
// ───────────────────────────────────────────────────────────────

/// Shared-handle advisory lock.  Non-reentrant, never blocks.
#[derive(Clone, Default)]
pub struct InProcessLock {
    held: Arc<AtomicBool>,
}

impl InProcessLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PourLock for InProcessLock {
    fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}
