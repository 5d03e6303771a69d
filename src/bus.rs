//! Dispenser selection over the shared bus.
//!
//! Every module on the chain listens on the same serial pair; a
//! side-channel select line routes the bus to exactly one physical port
//! before a packet exchange.  [`DispenserSelect`] owns that side channel
//! and adds the defensive port-range bound on top of the raw
//! [`SelectLine`] adapter.
//!
//! The select write is never skipped as redundant: another worker
//! process may have moved the latch since this worker last wrote it,
//! and the side channel has no way to read it back.

use log::{debug, info};

use crate::config::MAX_DISPENSERS;
use crate::ports::SelectLine;

pub struct DispenserSelect<S: SelectLine> {
    line: S,
}

impl<S: SelectLine> DispenserSelect<S> {
    pub fn new(line: S) -> Self {
        Self { line }
    }

    /// Route the bus to `port`.
    ///
    /// Out-of-range ports are ignored (defensive bound, not an error):
    /// the side channel has no failure reporting, so a bad index here
    /// would otherwise silently steer packets to a random module.
    pub fn select(&mut self, port: u8) {
        if usize::from(port) >= MAX_DISPENSERS {
            debug!("select: port {port} out of range, ignored");
            return;
        }
        self.line.select(port);
    }

    /// Pulse the broadcast reset.  All modules restart; the caller must
    /// select again before the next exchange.
    pub fn reset(&mut self) {
        info!("bus reset pulse");
        self.line.pulse_reset();
    }

    /// Toggle the LED-animation sync line (independent of addressing).
    pub fn sync(&mut self, on: bool) {
        self.line.set_sync(on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingLine {
        selects: Vec<u8>,
        resets: usize,
        syncs: Vec<bool>,
    }

    impl SelectLine for &mut RecordingLine {
        fn select(&mut self, port: u8) {
            self.selects.push(port);
        }
        fn pulse_reset(&mut self) {
            self.resets += 1;
        }
        fn set_sync(&mut self, on: bool) {
            self.syncs.push(on);
        }
    }

    #[test]
    fn out_of_range_port_is_a_no_op() {
        let mut line = RecordingLine::default();
        let mut sel = DispenserSelect::new(&mut line);
        sel.select(MAX_DISPENSERS as u8);
        sel.select(200);
        drop(sel);
        assert!(line.selects.is_empty());
    }

    #[test]
    fn select_always_writes_the_line() {
        // Never cached: a peer worker may have moved the latch.
        let mut line = RecordingLine::default();
        let mut sel = DispenserSelect::new(&mut line);
        sel.select(3);
        sel.select(3);
        sel.select(4);
        drop(sel);
        assert_eq!(line.selects, vec![3, 3, 4]);
    }

    #[test]
    fn reset_and_sync_pass_through() {
        let mut line = RecordingLine::default();
        let mut sel = DispenserSelect::new(&mut line);
        sel.reset();
        sel.sync(true);
        sel.sync(false);
        drop(sel);
        assert_eq!(line.resets, 1);
        assert_eq!(line.syncs, vec![true, false]);
    }
}
