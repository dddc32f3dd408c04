//! State handed to the interrupt handlers.
//!
//! The node's [`DeviceContext`] lives in a `StaticCell`; the tick handler
//! reaches it, its timer and its [`Sampler`] through the critical-section
//! protected slots below, which `main` fills before enabling the timer.

use core::cell::{Cell, RefCell};

use busnode_core::context::DeviceContext;
use busnode_core::sampler::Sampler;
use critical_section::Mutex;
use esp_hal::Blocking;
use esp_hal::handler;
use esp_hal::time::Duration;
use esp_hal::timer::{self, PeriodicTimer};
use esp_storage::FlashStorage;

use crate::hardware::AdcConverter;

pub type LogFlash = FlashStorage<'static>;
pub type NodeContext = DeviceContext<LogFlash>;

/// Everything the tick handler owns.
pub struct TickState {
    pub timer: PeriodicTimer<'static, Blocking>,
    pub sampler: Sampler<AdcConverter>,
}

static CONTEXT: Mutex<Cell<Option<&'static NodeContext>>> = Mutex::new(Cell::new(None));
static TICK: Mutex<RefCell<Option<TickState>>> = Mutex::new(RefCell::new(None));

/// Publish the context and the tick state, then start ticking every
/// `period`.
pub fn install(
    ctx: &'static NodeContext,
    mut tick: TickState,
    period: Duration,
) -> Result<(), timer::Error> {
    tick.timer.set_interrupt_handler(on_tick);
    critical_section::with(|cs| {
        CONTEXT.borrow(cs).set(Some(ctx));
        let mut slot = TICK.borrow_ref_mut(cs);
        let tick = slot.insert(tick);
        tick.timer.start(period)?;
        tick.timer.listen();
        Ok(())
    })
}

#[handler]
fn on_tick() {
    critical_section::with(|cs| {
        let mut tick = TICK.borrow_ref_mut(cs);
        let Some(tick) = tick.as_mut() else {
            return;
        };
        tick.timer.clear_interrupt();
        if let Some(ctx) = CONTEXT.borrow(cs).get() {
            tick.sampler.on_tick(ctx);
        }
    });
}
