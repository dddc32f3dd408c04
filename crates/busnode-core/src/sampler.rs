//! Periodic acquisition, run from the tick interrupt.
//!
//! Each tick triggers one conversion sweep and polls for completion a fixed
//! number of times. A sweep that does not complete in time is dropped: the
//! completion flag is cleared, a counter is bumped and nothing else happens
//! until the next tick. A completed sweep is routed to:
//!
//! - the latest-sample slot, always;
//! - the realtime outbound slot in `RealTime` mode, or the queue in
//!   `Buffered` mode;
//! - the log, while a session has room.

use embedded_storage::nor_flash::NorFlash;

use crate::context::DeviceContext;
use crate::error::LogError;
use crate::frame::realtime_frame;
use crate::hal::Converter;
use crate::sample::Sample;
use crate::streaming::StreamingMode;

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Sampled(Sample),
    /// The sweep did not complete within the poll budget.
    TimedOut,
}

pub struct Sampler<C> {
    converter: C,
    poll_budget: u32,
}

impl<C: Converter> Sampler<C> {
    pub const fn new(converter: C, poll_budget: u32) -> Self {
        Self {
            converter,
            poll_budget,
        }
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub fn converter_mut(&mut self) -> &mut C {
        &mut self.converter
    }

    /// Run one tick. Interrupt context; never blocks beyond the poll budget.
    pub fn on_tick<F: NorFlash>(&mut self, ctx: &DeviceContext<F>) -> TickOutcome {
        ctx.advance_tick();

        let Some(sample) = self.convert() else {
            ctx.diagnostics.conversion_timeout();
            return TickOutcome::TimedOut;
        };

        ctx.set_latest_sample(sample);

        match ctx.mode.get() {
            StreamingMode::RealTime => {
                let frame = realtime_frame(ctx.config.broadcast_id, ctx.config.sensor_id, &sample);
                if ctx.realtime.produce(frame) {
                    ctx.diagnostics.realtime_overwrite();
                }
            }
            StreamingMode::Buffered => {
                if !ctx.queue.push(sample.to_word()) {
                    ctx.diagnostics.buffer_overflow();
                }
            }
            StreamingMode::Stopped => {}
        }

        match ctx.log.append(&sample) {
            Ok(()) | Err(LogError::Inactive) => {}
            Err(LogError::Full) => ctx.diagnostics.log_refused(),
            Err(LogError::Flash { .. }) => ctx.diagnostics.log_fault(),
        }

        TickOutcome::Sampled(sample)
    }

    fn convert(&mut self) -> Option<Sample> {
        self.converter.start();

        let mut polls = 0;
        while !self.converter.is_complete() {
            polls += 1;
            if polls > self.poll_budget {
                self.converter.clear();
                return None;
            }
        }

        self.converter.clear();
        Some(self.converter.read())
    }
}
