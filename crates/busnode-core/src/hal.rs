//! Narrow hardware boundary used by the core.
//!
//! The firmware implements these over the real peripherals; the [`mock`]
//! module implements them for host tests and the simulator. Storage goes
//! through `embedded_storage::nor_flash::NorFlash` directly.
//!
//! [`mock`]: crate::mock

use embedded_hal::delay::DelayNs;
use log::warn;

use crate::error::BusError;
use crate::frame::BusFrame;
use crate::sample::Sample;

/// Analog converter driven by the Sampler, one sweep per tick.
pub trait Converter {
    /// Trigger a conversion sweep.
    fn start(&mut self);

    /// Whether the sweep has finished. Polled a bounded number of times.
    fn is_complete(&mut self) -> bool;

    /// Clear the completion flag.
    fn clear(&mut self);

    /// Fetch the converted channel(s) of a completed sweep.
    fn read(&mut self) -> Sample;
}

/// Outbound side of the bus controller.
///
/// Inbound frames arrive through the receive interrupt and
/// [`DeviceContext::on_frame_received`](crate::context::DeviceContext::on_frame_received).
pub trait Bus {
    type Error: core::fmt::Debug;

    /// Queue a frame for transmission.
    fn start_transmit(&mut self, frame: &BusFrame) -> Result<(), Self::Error>;

    /// Whether the last queued frame is still waiting to go out.
    fn transmit_pending(&mut self) -> bool;
}

/// Send a frame and wait for it to leave, polling at most `budget` times
/// with `interval_us` between polls.
///
/// The frame is not retried on timeout.
pub fn send_bounded<B, D>(
    bus: &mut B,
    delay: &mut D,
    frame: &BusFrame,
    budget: u32,
    interval_us: u32,
) -> Result<(), BusError>
where
    B: Bus,
    D: DelayNs,
{
    bus.start_transmit(frame).map_err(|e| {
        warn!("Bus: controller refused frame for {:#x}: {:?}", frame.id, e);
        BusError::Controller
    })?;

    let mut polls = 0;
    while bus.transmit_pending() {
        polls += 1;
        if polls > budget {
            return Err(BusError::Timeout { polls: budget });
        }
        delay.delay_us(interval_us);
    }

    Ok(())
}
