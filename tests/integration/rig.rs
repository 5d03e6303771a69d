//! Shared test rig: a simulated two-dispenser chain plus a mixer wired
//! to shared in-memory store / state / lock handles.

use barback::SystemConfig;
use barback::adapters::memstore::{InProcessLock, MemDatastore, MemStateStore};
use barback::adapters::sim::{SimBus, SimLink, SimSelect};
use barback::mixer::Mixer;
use barback::types::{Assignment, Drink};

/// Ingredient ids used throughout the tests.
pub const VODKA: u32 = 1;
pub const TONIC: u32 = 2;

/// Device ids of the two simulated modules (ports 0 and 1).
pub const IDS: [u8; 2] = [0x11, 0x22];

pub type TestMixer = Mixer<SimLink, SimSelect, MemDatastore, MemStateStore, InProcessLock>;

/// A config with every sleep zeroed so tests run instantly.
pub fn quick_config() -> SystemConfig {
    SystemConfig {
        poll_interval_ms: 0,
        inter_dispense_gap_ms: 0,
        reset_settle_ms: 0,
        level_sample_settle_ms: 0,
        ..SystemConfig::default()
    }
}

/// Vodka on port 0, tonic on port 1; three drinks so single-ingredient
/// availability stays distinguishable from HARD_OUT.
pub fn fixture_store() -> MemDatastore {
    MemDatastore::with_setup(
        vec![
            Assignment { dispenser: 0, ingredient: VODKA },
            Assignment { dispenser: 1, ingredient: TONIC },
        ],
        vec![
            Drink { id: 10, name: "vodka tonic".into(), ingredients: vec![VODKA, TONIC] },
            Drink { id: 11, name: "vodka shot".into(), ingredients: vec![VODKA] },
            Drink { id: 12, name: "tonic water".into(), ingredients: vec![TONIC] },
        ],
    )
}

pub struct Rig {
    pub bus: SimBus,
    pub store: MemDatastore,
    pub state: MemStateStore,
    pub lock: InProcessLock,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            bus: SimBus::new(&IDS),
            store: fixture_store(),
            state: MemStateStore::new(),
            lock: InProcessLock::new(),
        }
    }

    /// Build a mixer over this rig's shared handles.  Call repeatedly
    /// to model several workers on one machine.
    pub fn mixer(&self) -> TestMixer {
        Mixer::new(
            self.bus.link(),
            self.bus.select_line(),
            self.store.clone(),
            self.state.clone(),
            self.lock.clone(),
            quick_config(),
        )
        .expect("test config must validate")
    }

    /// Mixer with discovery already run and the machine settled.
    pub fn started_mixer(&self) -> TestMixer {
        let mut mixer = self.mixer();
        mixer.startup().expect("startup against the sim chain");
        mixer
    }
}
