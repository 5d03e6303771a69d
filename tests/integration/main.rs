//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a subsystem against
//! the simulated dispenser chain.  No hardware, no real delays: the rig
//! zeroes every configured sleep.

mod driver_tests;
mod mutual_exclusion_tests;
mod pour_flow_tests;
mod rig;
