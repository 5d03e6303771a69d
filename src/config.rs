//! System configuration parameters
//!
//! All tunable parameters for the pour controller.  Values are loaded by
//! the embedding application (database row, config file) and validated
//! before use; the defaults match the reference hardware build.

use serde::{Deserialize, Serialize};

/// Highest number of dispensers one router can address.  The select
/// side-channel has four address lines; position 15 is reserved.
pub const MAX_DISPENSERS: usize = 15;

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Pour conversion ---
    /// Encoder ticks per millilitre of dispensed liquid.
    pub ticks_per_ml: f32,
    /// Pours below this volume run at half speed for accuracy.
    pub slow_dispense_threshold_ml: f32,
    /// Motor PWM value for normal pours (0-255).
    pub full_speed: u8,
    /// Motor PWM value for small pours (0-255).
    pub half_speed: u8,
    /// Sanity ceiling on the total volume of one request.
    pub max_drink_ml: f32,

    // --- Liquid level sensing ---
    /// Whether this deployment has level sensors fitted.
    pub use_liquid_level_sensors: bool,
    /// Raw sensor reading below which a dispenser is classified LOW.
    pub level_low_threshold: u16,
    /// Raw sensor reading below which a dispenser is classified OUT.
    pub level_out_threshold: u16,

    // --- Bus timing ---
    /// Timeout for a normal packet exchange (milliseconds).
    pub exchange_timeout_ms: u32,
    /// Short timeout for the is-dispensing status poll; a busy motor can
    /// transiently disrupt communication, so this one trips often and is
    /// retried rather than escalated.
    pub poll_timeout_ms: u32,
    /// Sleep between consecutive status polls (milliseconds).
    pub poll_interval_ms: u32,
    /// Consecutive failed status polls tolerated before the pour is
    /// declared broken.
    pub max_transient_polls: u8,
    /// Gap between dispense commands to different modules, to keep the
    /// shared bus quiet while a module is still parsing (milliseconds).
    pub inter_dispense_gap_ms: u32,
    /// Settle time after a bus-level reset pulse (milliseconds).
    pub reset_settle_ms: u32,
    /// Settle time after the update-liquid-level broadcast, while every
    /// module samples its sensor (milliseconds).
    pub level_sample_settle_ms: u32,
    /// Upper bound on waiting for all motors to go idle during a pour.
    pub max_pour_wait_ms: u32,
    /// Upper bound on waiting for a motor to stop after a forced halt.
    pub stop_wait_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // Pour conversion
            ticks_per_ml: 2.78,
            slow_dispense_threshold_ml: 15.0,
            full_speed: 255,
            half_speed: 166,
            max_drink_ml: 500.0,

            // Levels (raw 12-bit sensor counts)
            use_liquid_level_sensors: true,
            level_low_threshold: 1000,
            level_out_threshold: 450,

            // Bus timing
            exchange_timeout_ms: 2000,
            poll_timeout_ms: 250,
            poll_interval_ms: 100,
            max_transient_polls: 5,
            inter_dispense_gap_ms: 20,
            reset_settle_ms: 250,
            level_sample_settle_ms: 200,
            max_pour_wait_ms: 60_000,
            stop_wait_ms: 3000,
        }
    }
}

impl SystemConfig {
    /// Reject configurations that would make the controller misbehave in
    /// ways no runtime check would catch.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.ticks_per_ml <= 0.0 {
            return Err("ticks_per_ml must be positive");
        }
        if self.full_speed == 0 || self.half_speed == 0 {
            return Err("motor speeds must be nonzero");
        }
        if self.half_speed > self.full_speed {
            return Err("half_speed must not exceed full_speed");
        }
        if self.max_drink_ml <= 0.0 {
            return Err("max_drink_ml must be positive");
        }
        if self.level_low_threshold <= self.level_out_threshold {
            return Err("low threshold must be above out threshold");
        }
        if self.exchange_timeout_ms == 0 {
            return Err("exchange timeout must be nonzero");
        }
        if self.poll_timeout_ms >= self.exchange_timeout_ms {
            return Err("poll timeout must be shorter than the exchange timeout");
        }
        if self.max_transient_polls == 0 {
            return Err("at least one transient poll retry is required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = SystemConfig::default();
        assert!(c.validate().is_ok());
        assert!(c.level_low_threshold > c.level_out_threshold);
        assert!(c.half_speed <= c.full_speed);
        assert!(c.poll_timeout_ms < c.exchange_timeout_ms);
    }

    #[test]
    fn serde_roundtrip() {
        let c = SystemConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: SystemConfig = serde_json::from_str(&json).unwrap();
        assert!((c.ticks_per_ml - c2.ticks_per_ml).abs() < 0.001);
        assert_eq!(c.full_speed, c2.full_speed);
        assert_eq!(c.level_out_threshold, c2.level_out_threshold);
    }

    #[test]
    fn postcard_roundtrip() {
        let c = SystemConfig::default();
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: SystemConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c.exchange_timeout_ms, c2.exchange_timeout_ms);
        assert!((c.max_drink_ml - c2.max_drink_ml).abs() < 0.001);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut c = SystemConfig::default();
        c.level_low_threshold = 100;
        c.level_out_threshold = 200;
        assert!(c.validate().is_err());
    }

    #[test]
    fn poll_timeout_must_stay_short() {
        let mut c = SystemConfig::default();
        c.poll_timeout_ms = c.exchange_timeout_ms;
        assert!(c.validate().is_err());
    }
}
