//! The cooperative main loop.
//!
//! One [`Node::poll`] call does a single pass over the main-loop duties:
//! flush a pending realtime frame, dispatch a pending command, emit a due
//! heartbeat, and report any new silent failures. The firmware calls it in
//! a loop; the simulator calls it after every simulated tick.

use embedded_hal::delay::DelayNs;
use embedded_storage::nor_flash::NorFlash;
use log::warn;

use crate::context::{DeviceContext, DiagnosticsSnapshot};
use crate::dispatcher::{Dispatcher, Outcome};
use crate::error::BusError;
use crate::hal::Bus;
use crate::heartbeat::Heartbeat;

/// What one pass of the main loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopReport {
    pub realtime_sent: bool,
    pub command: Option<Result<Outcome, BusError>>,
    pub heartbeat_sent: bool,
}

impl LoopReport {
    pub fn is_idle(&self) -> bool {
        !self.realtime_sent && self.command.is_none() && !self.heartbeat_sent
    }
}

pub struct Node<B, D> {
    dispatcher: Dispatcher<B, D>,
    heartbeat: Heartbeat,
    reported: DiagnosticsSnapshot,
}

impl<B: Bus, D: DelayNs> Node<B, D> {
    pub fn new<F>(ctx: &DeviceContext<F>, bus: B, delay: D) -> Self {
        let config = &ctx.config;
        Self {
            dispatcher: Dispatcher::new(
                bus,
                delay,
                config.send_poll_budget,
                config.send_poll_interval_us,
            ),
            heartbeat: Heartbeat::new(ctx.now(), config.heartbeat_interval()),
            reported: DiagnosticsSnapshot::default(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<B, D> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<B, D> {
        &mut self.dispatcher
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// One pass of the main loop.
    pub fn poll<F: NorFlash>(&mut self, ctx: &DeviceContext<F>) -> LoopReport {
        let mut report = LoopReport::default();

        if let Some(delivery) = ctx.realtime.consume() {
            // Overwrites were counted by the sampler when they happened.
            report.realtime_sent = self.dispatcher.send(ctx, &delivery.message).is_ok();
        }

        if let Some(result) = self.dispatcher.poll(ctx) {
            self.heartbeat.defer(ctx.now());
            report.command = Some(result);
        }

        if let Some(frame) = self.heartbeat.poll(ctx) {
            report.heartbeat_sent = self.dispatcher.send(ctx, &frame).is_ok();
        }

        self.report_diagnostics(ctx);
        report
    }

    /// Log counters that moved since the last report.
    fn report_diagnostics<F>(&mut self, ctx: &DeviceContext<F>) {
        let now = ctx.diagnostics.snapshot();
        if now == self.reported {
            return;
        }
        let last = self.reported;
        self.reported = now;

        let counters = [
            ("conversion timeouts", last.conversion_timeouts, now.conversion_timeouts),
            ("send failures", last.send_failures, now.send_failures),
            ("log writes refused", last.log_refused, now.log_refused),
            ("log faults", last.log_faults, now.log_faults),
            ("buffer overflows", last.buffer_overflows, now.buffer_overflows),
            ("realtime overwrites", last.realtime_overwrites, now.realtime_overwrites),
            ("foreign frames", last.foreign_frames, now.foreign_frames),
        ];
        for (name, before, after) in counters {
            if after != before {
                warn!("Diagnostics: {} {} (+{})", name, after, after.wrapping_sub(before));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::frame::{BusFrame, Command, Opcode};
    use crate::mock::{MockBus, MockConverter, NoDelay, RamFlash};
    use crate::sampler::Sampler;
    use crate::streaming::StreamingMode;

    fn context() -> DeviceContext<RamFlash> {
        let config = NodeConfig::default();
        DeviceContext::new(
            config,
            RamFlash::new(config.log_region_base, config.log_region_max_size),
        )
    }

    fn command(opcode: Opcode) -> BusFrame {
        BusFrame::new(0x107, Command::new(opcode as u8, 0x600, 0).encode())
    }

    #[test]
    fn test_idle_pass_does_nothing() {
        let ctx = context();
        let mut node = Node::new(&ctx, MockBus::new(), NoDelay);
        assert!(node.poll(&ctx).is_idle());
        assert!(node.dispatcher().bus().sent().is_empty());
    }

    #[test]
    fn test_realtime_frames_are_flushed_before_commands() {
        let ctx = context();
        let mut node = Node::new(&ctx, MockBus::new(), NoDelay);
        let mut sampler = Sampler::new(MockConverter::new(false), 100);

        ctx.mode.set(StreamingMode::RealTime);
        sampler.on_tick(&ctx);
        ctx.on_frame_received(&command(Opcode::StreamingStatus));

        let report = node.poll(&ctx);
        assert!(report.realtime_sent);
        assert!(matches!(report.command, Some(Ok(Outcome::Replied(_)))));

        let sent = node.dispatcher().bus().sent();
        assert_eq!(sent[0].id, 0x7DF);
        assert_eq!(sent[0].data[0], 0x05);
        assert_eq!(sent[1].id, 0x600);
    }

    #[test]
    fn test_command_defers_heartbeat() {
        let ctx = context();
        let mut node = Node::new(&ctx, MockBus::new(), NoDelay);
        let mut sampler = Sampler::new(MockConverter::new(false), 100);
        let interval = ctx.config.heartbeat_interval();

        for _ in 0..interval - 10 {
            sampler.on_tick(&ctx);
            node.poll(&ctx);
        }
        ctx.on_frame_received(&command(Opcode::ReadVersion));
        node.poll(&ctx);
        assert_eq!(node.heartbeat().deadline(), ctx.now() + interval);

        let mut heartbeats = 0;
        for _ in 0..interval + 1 {
            sampler.on_tick(&ctx);
            if node.poll(&ctx).heartbeat_sent {
                heartbeats += 1;
            }
        }
        assert_eq!(heartbeats, 1);
        let last = node.dispatcher().bus().sent().last().copied().unwrap();
        assert_eq!(last.data[3], 0x7F);
    }

    #[test]
    fn test_failed_realtime_send_is_counted() {
        let ctx = context();
        let mut node = Node::new(&ctx, MockBus::new(), NoDelay);
        node.dispatcher_mut().bus_mut().refuse = true;
        let mut sampler = Sampler::new(MockConverter::new(false), 100);

        ctx.mode.set(StreamingMode::RealTime);
        sampler.on_tick(&ctx);
        let report = node.poll(&ctx);
        assert!(!report.realtime_sent);
        assert_eq!(ctx.diagnostics.snapshot().send_failures, 1);
    }
}
