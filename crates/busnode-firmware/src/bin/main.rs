#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use busnode_core::context::DeviceContext;
use busnode_core::node::Node;
use busnode_core::sampler::Sampler;
use busnode_firmware::app_state::{self, NodeContext, TickState};
use busnode_firmware::hardware::{AdcConverter, TwaiBus, to_bus_frame};
use busnode_firmware::storage::load_config;
use embassy_executor::Spawner;
use esp_hal::Async;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::time::Duration;
use esp_hal::timer::PeriodicTimer;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::twai::{BaudRate, TwaiConfiguration, TwaiMode, TwaiRx};
use esp_storage::FlashStorage;
use log::{LevelFilter, error, info, warn};
use static_cell::StaticCell;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static CONTEXT: StaticCell<NodeContext> = StaticCell::new();

/// Feeds received frames to the command mailbox.
#[embassy_executor::task]
async fn bus_receive(mut rx: TwaiRx<'static, Async>, ctx: &'static NodeContext) {
    loop {
        match rx.receive_async().await {
            Ok(frame) => {
                if let Some(frame) = to_bus_frame(&frame) {
                    ctx.on_frame_received(&frame);
                }
            }
            Err(e) => warn!("TWAI: receive error {:?}", e),
        }
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(LevelFilter::Info);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);
    // The buffered-mode queue can grow to 128 KiB.
    esp_alloc::psram_allocator!(peripherals.PSRAM, esp_hal::psram);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    // 1. Config page, then hand the flash over to the log
    let mut flash = FlashStorage::new(peripherals.FLASH);
    let node_config = load_config(&mut flash);
    let ctx: &'static NodeContext = CONTEXT.init(DeviceContext::new(node_config, flash));
    let config = ctx.config;
    info!(
        "Node {:#x} build {} ({} channel(s))",
        config.node_id, config.build_version, config.channels
    );

    // 2. ADC channels on GPIO1 and, for dual-channel nodes, GPIO2
    let mut adc_config = AdcConfig::new();
    let first = adc_config.enable_pin(peripherals.GPIO1, Attenuation::_11dB);
    let second = (config.channels == 2)
        .then(|| adc_config.enable_pin(peripherals.GPIO2, Attenuation::_11dB));
    let adc = Adc::new(peripherals.ADC1, adc_config);

    // 3. TWAI controller at 500 kbit/s, RX on GPIO4 and TX on GPIO5
    let twai = TwaiConfiguration::new(
        peripherals.TWAI0,
        peripherals.GPIO4,
        peripherals.GPIO5,
        BaudRate::B500K,
        TwaiMode::Normal,
    )
    .into_async()
    .start();
    let (rx, tx) = twai.split();

    spawner.spawn(bus_receive(rx, ctx).expect("Failed to allocate bus receive task"));

    // 4. Tick interrupt running the sampler
    let timg1 = TimerGroup::new(peripherals.TIMG1);
    let tick = TickState {
        timer: PeriodicTimer::new(timg1.timer0),
        sampler: Sampler::new(
            AdcConverter::new(adc, first, second),
            config.conversion_poll_budget,
        ),
    };
    let period = Duration::from_micros(1_000_000 / u64::from(config.tick_hz));
    if let Err(e) = app_state::install(ctx, tick, period) {
        error!("Tick timer failed to start: {:?}", e);
    }

    info!("Node running");

    let mut node = Node::new(ctx, TwaiBus::new(tx), Delay::new());
    loop {
        node.poll(ctx);
        embassy_futures::yield_now().await;
    }
}
