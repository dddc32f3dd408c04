//! State shared between the interrupt handlers and the main loop.
//!
//! One [`DeviceContext`] exists per node, normally in a `StaticCell`, and is
//! handed by reference to the Sampler, the Dispatcher and the Heartbeat.
//!
//! | Field | Writer | Guard |
//! |-------|--------|-------|
//! | `ticks` | tick interrupt | atomic |
//! | `mode` | main loop | atomic |
//! | `commands` | bus-receive interrupt produces, main loop consumes | critical section |
//! | `realtime` | tick interrupt produces, main loop consumes | critical section |
//! | `latest` | tick interrupt | critical section |
//! | `queue` | tick interrupt pushes, main loop pops/resizes | critical section |
//! | `log` | tick interrupt appends, main loop controls | critical section |

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embedded_storage::nor_flash::NorFlash;

use crate::config::NodeConfig;
use crate::frame::{BusFrame, Command};
use crate::log_store::{SampleLog, SharedLog};
use crate::mailbox::Mailbox;
use crate::sample::Sample;
use crate::streaming::{ModeCell, SampleQueue, StreamingMode};

/// Counters for failures that are otherwise handled silently.
#[derive(Default)]
pub struct Diagnostics {
    conversion_timeouts: AtomicU32,
    mailbox_overruns: AtomicU32,
    send_failures: AtomicU32,
    log_refused: AtomicU32,
    log_faults: AtomicU32,
    buffer_overflows: AtomicU32,
    realtime_overwrites: AtomicU32,
    foreign_frames: AtomicU32,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagnosticsSnapshot {
    pub conversion_timeouts: u32,
    pub mailbox_overruns: u32,
    pub send_failures: u32,
    pub log_refused: u32,
    pub log_faults: u32,
    pub buffer_overflows: u32,
    pub realtime_overwrites: u32,
    pub foreign_frames: u32,
}

fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Diagnostics {
    pub const fn new() -> Self {
        Self {
            conversion_timeouts: AtomicU32::new(0),
            mailbox_overruns: AtomicU32::new(0),
            send_failures: AtomicU32::new(0),
            log_refused: AtomicU32::new(0),
            log_faults: AtomicU32::new(0),
            buffer_overflows: AtomicU32::new(0),
            realtime_overwrites: AtomicU32::new(0),
            foreign_frames: AtomicU32::new(0),
        }
    }

    pub fn conversion_timeout(&self) {
        bump(&self.conversion_timeouts);
    }

    pub fn mailbox_overrun(&self) {
        bump(&self.mailbox_overruns);
    }

    pub fn send_failure(&self) {
        bump(&self.send_failures);
    }

    pub fn log_refused(&self) {
        bump(&self.log_refused);
    }

    pub fn log_fault(&self) {
        bump(&self.log_faults);
    }

    pub fn buffer_overflow(&self) {
        bump(&self.buffer_overflows);
    }

    pub fn realtime_overwrite(&self) {
        bump(&self.realtime_overwrites);
    }

    pub fn foreign_frame(&self) {
        bump(&self.foreign_frames);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let read = |counter: &AtomicU32| counter.load(Ordering::Relaxed);
        DiagnosticsSnapshot {
            conversion_timeouts: read(&self.conversion_timeouts),
            mailbox_overruns: read(&self.mailbox_overruns),
            send_failures: read(&self.send_failures),
            log_refused: read(&self.log_refused),
            log_faults: read(&self.log_faults),
            buffer_overflows: read(&self.buffer_overflows),
            realtime_overwrites: read(&self.realtime_overwrites),
            foreign_frames: read(&self.foreign_frames),
        }
    }
}

/// The node's shared state.
pub struct DeviceContext<F> {
    pub config: NodeConfig,
    ticks: AtomicU32,
    pub mode: ModeCell,
    /// Inbound commands, bus-receive interrupt to main loop.
    pub commands: Mailbox<Command>,
    /// Realtime frames, tick interrupt to main loop.
    pub realtime: Mailbox<BusFrame>,
    latest: CriticalSectionMutex<Cell<Option<Sample>>>,
    pub queue: SampleQueue,
    pub log: SharedLog<F>,
    pub diagnostics: Diagnostics,
}

impl<F: NorFlash> DeviceContext<F> {
    /// Build the context around the log flash. Main loop, before interrupts
    /// are enabled.
    pub fn new(config: NodeConfig, flash: F) -> Self {
        let config = config.validated();
        let queue = SampleQueue::new();
        queue.set_capacity(config.default_buffer_capacity as usize);

        Self {
            config,
            ticks: AtomicU32::new(0),
            mode: ModeCell::new(StreamingMode::Stopped),
            commands: Mailbox::new(),
            realtime: Mailbox::new(),
            latest: CriticalSectionMutex::new(Cell::new(None)),
            queue,
            log: SharedLog::new(SampleLog::new(
                flash,
                config.log_region_base,
                config.log_region_max_size,
            )),
            diagnostics: Diagnostics::new(),
        }
    }
}

impl<F> DeviceContext<F> {
    /// Bus-receive interrupt: hand a frame to the main loop if it is
    /// addressed to this node.
    pub fn on_frame_received(&self, frame: &BusFrame) -> bool {
        if frame.id != self.config.node_id {
            self.diagnostics.foreign_frame();
            return false;
        }
        self.commands.produce(Command::decode(&frame.data));
        true
    }

    /// Tick counter. Wraps at `u32::MAX`.
    pub fn now(&self) -> u32 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Tick interrupt only.
    pub(crate) fn advance_tick(&self) -> u32 {
        self.ticks.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    #[cfg(test)]
    pub(crate) fn set_now(&self, tick: u32) {
        self.ticks.store(tick, Ordering::Release);
    }

    pub fn latest_sample(&self) -> Option<Sample> {
        self.latest.lock(Cell::get)
    }

    pub(crate) fn set_latest_sample(&self, sample: Sample) {
        self.latest.lock(|latest| latest.set(Some(sample)));
    }
}
