//! Command interpretation and responses, run from the main loop.
//!
//! Dispatch is stateless: every command reads or updates the streaming mode,
//! the sample queue or the log in the shared [`DeviceContext`] and answers
//! with one response frame (or, for `FlashGetData`, a stream of them). The
//! response goes to the id named in the request, not to the sender.

use embedded_hal::delay::DelayNs;
use embedded_storage::nor_flash::NorFlash;
use log::{debug, error, info, warn};

use crate::context::DeviceContext;
use crate::error::BusError;
use crate::frame::{BusFrame, Command, Opcode, Response};
use crate::hal::{Bus, send_bounded};
use crate::log_store::ReadBackError;
use crate::streaming::{StreamingMode, clamp_buffer_capacity};

/// Response value sent when a flash erase fails.
pub const ERASE_FAILED: u32 = u32::MAX;

/// What one dispatched command led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A single response was sent.
    Replied(Response),
    /// A log read-back was streamed; `words` data frames sat between the
    /// header and the zero terminator.
    Streamed { words: u32 },
    /// Unknown opcode, nothing was sent.
    Ignored(u8),
}

pub struct Dispatcher<B, D> {
    bus: B,
    delay: D,
    send_budget: u32,
    send_interval_us: u32,
}

impl<B: Bus, D: DelayNs> Dispatcher<B, D> {
    pub fn new(bus: B, delay: D, send_budget: u32, send_interval_us: u32) -> Self {
        Self {
            bus,
            delay,
            send_budget,
            send_interval_us,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Send one frame with the bounded wait, counting failures.
    pub fn send<F>(&mut self, ctx: &DeviceContext<F>, frame: &BusFrame) -> Result<(), BusError> {
        send_bounded(
            &mut self.bus,
            &mut self.delay,
            frame,
            self.send_budget,
            self.send_interval_us,
        )
        .inspect_err(|e| {
            ctx.diagnostics.send_failure();
            warn!("Bus: send to {:#x} failed: {}", frame.id, e);
        })
    }

    /// Drain the command mailbox and dispatch what was in it.
    ///
    /// Returns `None` when no command was pending.
    pub fn poll<F: NorFlash>(
        &mut self,
        ctx: &DeviceContext<F>,
    ) -> Option<Result<Outcome, BusError>> {
        let delivery = ctx.commands.consume()?;
        if delivery.overrun {
            ctx.diagnostics.mailbox_overrun();
            warn!(
                "Dispatcher: command overrun, earlier command(s) lost before {:#04x}",
                delivery.message.opcode
            );
        }
        Some(self.dispatch(ctx, &delivery.message))
    }

    /// Execute one command and send its response.
    pub fn dispatch<F: NorFlash>(
        &mut self,
        ctx: &DeviceContext<F>,
        command: &Command,
    ) -> Result<Outcome, BusError> {
        let opcode = match command.opcode() {
            Ok(opcode) => opcode,
            Err(raw) => {
                warn!("Dispatcher: ignoring unknown opcode {:#04x}", raw);
                return Ok(Outcome::Ignored(raw));
            }
        };
        debug!(
            "Dispatcher: {:?} arg={} reply_to={:#x}",
            opcode, command.argument, command.reply_to
        );

        if opcode == Opcode::FlashGetData {
            return self.stream_log(ctx, command);
        }

        let value = execute(ctx, opcode, command.argument);
        let response = Response {
            source: ctx.config.node_id,
            opcode: command.opcode,
            value,
        };
        self.send(ctx, &response.to_frame(command.reply_to))?;
        Ok(Outcome::Replied(response))
    }

    /// Header with the region size, one frame per logged word, then a zero
    /// frame.
    fn stream_log<F: NorFlash>(
        &mut self,
        ctx: &DeviceContext<F>,
        command: &Command,
    ) -> Result<Outcome, BusError> {
        let reply = |value: u32| {
            Response {
                source: ctx.config.node_id,
                opcode: command.opcode,
                value,
            }
            .to_frame(command.reply_to)
        };

        let size = ctx.log.region_size();
        info!("Log: read-back of {} bytes to {:#x}", size, command.reply_to);
        self.send(ctx, &reply(size))?;

        let words = match ctx.log.read_back(|word| self.send(ctx, &reply(word))) {
            Ok(words) => words,
            Err(ReadBackError::Emit(e)) => return Err(e),
            Err(ReadBackError::Log(e)) => {
                // Terminate the stream so the requester is not left waiting.
                ctx.diagnostics.log_fault();
                error!("Log: read-back aborted: {}", e);
                0
            }
        };

        self.send(ctx, &reply(0))?;
        Ok(Outcome::Streamed { words })
    }
}

/// Apply a single-response command and compute its value.
fn execute<F: NorFlash>(ctx: &DeviceContext<F>, opcode: Opcode, argument: u32) -> u32 {
    match opcode {
        Opcode::ReadVersion => ctx.config.build_version,
        Opcode::ReadData => match ctx.mode.get() {
            StreamingMode::Buffered => ctx.queue.pop().unwrap_or(0),
            _ => ctx.latest_sample().map_or(0, |sample| sample.to_word()),
        },
        Opcode::FlashStart => ctx.log.start(),
        Opcode::FlashReadPos => ctx.log.cursor(),
        Opcode::FlashEraseFull => match ctx.log.erase_all() {
            Ok(start) => start,
            Err(e) => {
                ctx.diagnostics.log_fault();
                error!("Log: full erase failed: {}", e);
                ERASE_FAILED
            }
        },
        Opcode::FlashSetSampleSize => ctx.log.set_region_size(argument),
        Opcode::FlashStatus => ctx.log.status(),
        // CSV generation happens on the requesting side.
        Opcode::FlashGenCsv => 0,
        Opcode::StreamRealtime => set_mode(ctx, StreamingMode::RealTime),
        Opcode::StreamBuffered => {
            ctx.queue.clear();
            set_mode(ctx, StreamingMode::Buffered)
        }
        Opcode::StopStreaming => set_mode(ctx, StreamingMode::Stopped),
        Opcode::StreamingStatus => ctx.mode.get() as u32,
        Opcode::SetBufferSize => {
            let capacity = clamp_buffer_capacity(
                argument,
                ctx.config.default_buffer_capacity,
                ctx.config.max_buffer_capacity,
            );
            if capacity != argument {
                info!("Buffer: size {} out of range, using {}", argument, capacity);
            }
            ctx.queue.set_capacity(capacity as usize);
            capacity
        }
        Opcode::FlashGetData => ctx.log.region_size(),
    }
}

fn set_mode<F>(ctx: &DeviceContext<F>, mode: StreamingMode) -> u32 {
    if ctx.mode.get() != mode {
        info!("Streaming: {} -> {}", ctx.mode.get().label(), mode.label());
    }
    ctx.mode.set(mode);
    mode as u32
}
