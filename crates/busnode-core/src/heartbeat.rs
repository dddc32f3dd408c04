//! Idle liveness broadcast.
//!
//! While streaming is stopped the node broadcasts a heartbeat once the tick
//! counter passes the deadline, then reschedules it one interval later.
//! Deadlines compare with wrapping arithmetic, so the cadence is unaffected
//! when the tick counter overflows.

use log::debug;

use crate::context::DeviceContext;
use crate::frame::{BusFrame, heartbeat_frame};
use crate::streaming::StreamingMode;

pub struct Heartbeat {
    interval: u32,
    deadline: u32,
}

impl Heartbeat {
    pub const fn new(now: u32, interval: u32) -> Self {
        Self {
            interval,
            deadline: now.wrapping_add(interval),
        }
    }

    pub const fn deadline(&self) -> u32 {
        self.deadline
    }

    /// Push the deadline one full interval past `now`.
    pub fn defer(&mut self, now: u32) {
        self.deadline = now.wrapping_add(self.interval);
    }

    /// The frame to broadcast if a heartbeat is due.
    ///
    /// Streaming suppresses the heartbeat and keeps re-arming the deadline,
    /// so the first heartbeat after streaming stops comes one interval later.
    pub fn poll<F>(&mut self, ctx: &DeviceContext<F>) -> Option<BusFrame> {
        let now = ctx.now();
        if ctx.mode.get() != StreamingMode::Stopped {
            self.defer(now);
            return None;
        }
        if !is_past(now, self.deadline) {
            return None;
        }

        self.defer(now);
        debug!("Heartbeat at tick {}, next at {}", now, self.deadline);
        Some(heartbeat_frame(
            ctx.config.broadcast_id,
            ctx.config.node_id,
            now,
        ))
    }
}

/// `now > deadline` on a wrapping counter.
const fn is_past(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::mock::RamFlash;

    const INTERVAL: u32 = 10_000;

    fn context() -> DeviceContext<RamFlash> {
        let config = NodeConfig::default();
        DeviceContext::new(
            config,
            RamFlash::new(config.log_region_base, config.log_region_max_size),
        )
    }

    fn run_ticks(ctx: &DeviceContext<RamFlash>, heartbeat: &mut Heartbeat, ticks: u32) -> u32 {
        let mut fired = 0;
        for _ in 0..ticks {
            ctx.advance_tick();
            if heartbeat.poll(ctx).is_some() {
                fired += 1;
            }
        }
        fired
    }

    #[test]
    fn test_fires_once_after_deadline() {
        let ctx = context();
        let mut heartbeat = Heartbeat::new(ctx.now(), INTERVAL);

        assert_eq!(run_ticks(&ctx, &mut heartbeat, INTERVAL), 0);
        ctx.advance_tick();
        let frame = heartbeat.poll(&ctx).unwrap();
        assert_eq!(frame.id, 0x7DF);
        assert_eq!(frame.data[3], 0x7F);
        let tick = u32::from_be_bytes([frame.data[4], frame.data[5], frame.data[6], frame.data[7]]);
        assert_eq!(tick, INTERVAL + 1);
        assert_eq!(heartbeat.poll(&ctx), None);
    }

    #[test]
    fn test_at_most_once_per_interval_while_stopped() {
        let ctx = context();
        let mut heartbeat = Heartbeat::new(ctx.now(), INTERVAL);
        assert_eq!(run_ticks(&ctx, &mut heartbeat, 5 * INTERVAL), 4);
    }

    #[test]
    fn test_never_fires_while_streaming() {
        let ctx = context();
        let mut heartbeat = Heartbeat::new(ctx.now(), INTERVAL);

        for mode in [StreamingMode::RealTime, StreamingMode::Buffered] {
            ctx.mode.set(mode);
            assert_eq!(run_ticks(&ctx, &mut heartbeat, 3 * INTERVAL), 0);
        }

        ctx.mode.set(StreamingMode::Stopped);
        assert_eq!(run_ticks(&ctx, &mut heartbeat, INTERVAL), 0);
        assert_eq!(run_ticks(&ctx, &mut heartbeat, 1), 1);
    }

    #[test]
    fn test_defer_postpones() {
        let ctx = context();
        let mut heartbeat = Heartbeat::new(ctx.now(), INTERVAL);
        run_ticks(&ctx, &mut heartbeat, INTERVAL - 1);
        heartbeat.defer(ctx.now());
        assert_eq!(run_ticks(&ctx, &mut heartbeat, INTERVAL), 0);
        assert_eq!(run_ticks(&ctx, &mut heartbeat, 1), 1);
    }

    #[test]
    fn test_cadence_survives_tick_wrap() {
        let ctx = context();
        ctx.set_now(u32::MAX - 15_000);
        let mut heartbeat = Heartbeat::new(ctx.now(), INTERVAL);

        // Fires at MAX - 4999, then 5001 and 15002 after the wrap.
        assert_eq!(run_ticks(&ctx, &mut heartbeat, 3 * INTERVAL + 3), 3);
        assert_eq!(ctx.now(), 15_002);
        assert_eq!(heartbeat.deadline(), 25_002);
    }

    #[test]
    fn test_wrapping_comparison() {
        assert!(is_past(5, 3));
        assert!(!is_past(3, 3));
        assert!(is_past(2, u32::MAX - 1));
        assert!(!is_past(u32::MAX - 1, 2));
    }
}
