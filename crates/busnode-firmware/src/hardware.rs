//! esp-hal drivers behind busnode-core's [`Converter`] and [`Bus`] traits.

use busnode_core::frame::BusFrame;
use busnode_core::hal::{Bus, Converter};
use busnode_core::sample::Sample;
use embedded_can::{Frame, Id, StandardId};
use esp_hal::{Async, Blocking};
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::peripherals::{ADC1, GPIO1, GPIO2};
use esp_hal::twai::{EspTwaiError, EspTwaiFrame, TwaiTx};
use log::warn;
use thiserror_no_std::Error;

pub type Adc1 = Adc<'static, ADC1<'static>, Blocking>;
pub type Channel0 = AdcPin<GPIO1<'static>, ADC1<'static>>;
pub type Channel1 = AdcPin<GPIO2<'static>, ADC1<'static>>;

/// One-shot conversions on ADC1, one or two channels per sweep.
///
/// The ESP32-S3 converts one channel at a time, so the second channel is
/// started once the first has produced its value.
pub struct AdcConverter {
    adc: Adc1,
    first: Channel0,
    second: Option<Channel1>,
    values: [Option<u16>; 2],
}

impl AdcConverter {
    pub fn new(adc: Adc1, first: Channel0, second: Option<Channel1>) -> Self {
        Self {
            adc,
            first,
            second,
            values: [None; 2],
        }
    }
}

impl Converter for AdcConverter {
    fn start(&mut self) {
        self.values = [None; 2];
        // Kicks off the conversion of the first channel.
        self.values[0] = self.adc.read_oneshot(&mut self.first).ok();
    }

    fn is_complete(&mut self) -> bool {
        if self.values[0].is_none() {
            self.values[0] = self.adc.read_oneshot(&mut self.first).ok();
            return false;
        }
        let Some(pin) = self.second.as_mut() else {
            return true;
        };
        if self.values[1].is_none() {
            self.values[1] = self.adc.read_oneshot(pin).ok();
        }
        self.values[1].is_some()
    }

    fn clear(&mut self) {
        // The one-shot driver drops its done flag when the value is read.
    }

    fn read(&mut self) -> Sample {
        let first = self.values[0].unwrap_or(0);
        match self.second {
            Some(_) => Sample::dual(first, self.values[1].unwrap_or(0)),
            None => Sample::single(first),
        }
    }
}

#[derive(Error, Debug)]
pub enum TwaiBusError {
    #[error("bus id {id:#x} is not a standard identifier")]
    InvalidId { id: u16 },
    #[error("controller error: {0:?}")]
    Controller(EspTwaiError),
}

/// Transmit half of the TWAI controller.
///
/// The controller runs in async mode so the receive half can be awaited;
/// transmission uses the non-blocking hand-over.
///
/// A frame handed to [`Bus::start_transmit`] is queued until the controller's
/// transmit buffer takes it; [`Bus::transmit_pending`] retries the hand-over.
pub struct TwaiBus {
    tx: TwaiTx<'static, Async>,
    queued: Option<EspTwaiFrame>,
}

impl TwaiBus {
    pub fn new(tx: TwaiTx<'static, Async>) -> Self {
        Self { tx, queued: None }
    }
}

impl Bus for TwaiBus {
    type Error = TwaiBusError;

    fn start_transmit(&mut self, frame: &BusFrame) -> Result<(), Self::Error> {
        let id = StandardId::new(frame.id).ok_or(TwaiBusError::InvalidId { id: frame.id })?;
        let esp_frame = EspTwaiFrame::new(Id::Standard(id), &frame.data)
            .ok_or(TwaiBusError::InvalidId { id: frame.id })?;

        match self.tx.transmit(&esp_frame) {
            Ok(()) => {
                self.queued = None;
                Ok(())
            }
            Err(nb::Error::WouldBlock) => {
                self.queued = Some(esp_frame);
                Ok(())
            }
            Err(nb::Error::Other(e)) => Err(TwaiBusError::Controller(e)),
        }
    }

    fn transmit_pending(&mut self) -> bool {
        let Some(frame) = self.queued.as_ref() else {
            return false;
        };
        match self.tx.transmit(frame) {
            Ok(()) => {
                self.queued = None;
                false
            }
            Err(nb::Error::WouldBlock) => true,
            Err(nb::Error::Other(e)) => {
                warn!("TWAI: dropping frame for {:?}: {:?}", frame.id(), e);
                self.queued = None;
                false
            }
        }
    }
}

/// Convert a received TWAI frame into the core's representation.
///
/// Extended-id frames and frames with a payload other than eight bytes are
/// not commands for this node.
pub fn to_bus_frame(frame: &EspTwaiFrame) -> Option<BusFrame> {
    let Id::Standard(id) = frame.id() else {
        return None;
    };
    BusFrame::from_payload(id.as_raw(), frame.data()).ok()
}
