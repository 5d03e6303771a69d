//! GPIO select-line adapter.
//!
//! Drives the select side-channel through `embedded-hal` digital output
//! pins: four binary address lines, one broadcast reset line, one LED
//! sync line.  The sub-channel is fire-and-forget by contract, so pin
//! errors are logged and swallowed — there is nothing useful a caller
//! could do with them, and the following packet exchange will surface
//! any real routing failure as a timeout.

use embedded_hal::digital::OutputPin;
use log::warn;

use crate::ports::SelectLine;

pub struct GpioSelect<P: OutputPin> {
    /// Address lines, least-significant bit first.
    address: [P; 4],
    reset: P,
    sync: P,
}

impl<P: OutputPin> GpioSelect<P> {
    pub fn new(address: [P; 4], reset: P, sync: P) -> Self {
        Self { address, reset, sync }
    }

    fn set_pin(pin: &mut P, high: bool, what: &'static str) {
        let result = if high { pin.set_high() } else { pin.set_low() };
        if let Err(e) = result {
            warn!("select: {what} write failed: {e:?}");
        }
    }
}

impl<P: OutputPin> SelectLine for GpioSelect<P> {
    fn select(&mut self, port: u8) {
        for (bit, pin) in self.address.iter_mut().enumerate() {
            Self::set_pin(pin, port & (1 << bit) != 0, "address line");
        }
    }

    fn pulse_reset(&mut self) {
        // Modules latch the rising edge; pulse width is not critical.
        Self::set_pin(&mut self.reset, true, "reset line");
        Self::set_pin(&mut self.reset, false, "reset line");
    }

    fn set_sync(&mut self, on: bool) {
        Self::set_pin(&mut self.sync, on, "sync line");
    }
}
