//! Desktop simulator for the busnode acquisition node.
//!
//! Runs busnode-core against the host doubles from `busnode_core::mock`: a
//! ramping converter, a bus that records every outbound frame and a RAM
//! backed flash. A scripted requester sends commands at fixed ticks, and
//! the script also injects conversion timeouts, mailbox overruns and frames
//! addressed to other nodes.
//!
//! # Usage
//!
//! ```text
//! RUST_LOG=info cargo run -p busnode-simulator -- [ticks] [--realtime]
//! ```
//!
//! | Argument     | Effect                                        |
//! |--------------|-----------------------------------------------|
//! | `ticks`      | Number of ticks to simulate (default 30 000)  |
//! | `--realtime` | Pace ticks at the configured tick rate        |
//!
//! Realtime sample broadcasts are logged at `trace` level, everything else
//! at `info`.

use std::time::{Duration, Instant};

use log::{info, trace, warn};

use busnode_core::config::{CONFIG_PAGE_SIZE, NodeConfig};
use busnode_core::context::DeviceContext;
use busnode_core::frame::{
    BusFrame, Command, HEARTBEAT_MARKER, Opcode, REALTIME_FRAME_TYPE, Response,
};
use busnode_core::mock::{MockBus, MockConverter, NoDelay, RamFlash};
use busnode_core::node::Node;
use busnode_core::sampler::{Sampler, TickOutcome};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Ticks simulated when no count is given.
const DEFAULT_TICKS: u32 = 30_000;

/// Bus id the scripted requester asks responses to be sent to.
const HOST_ID: u16 = 0x600;

/// Bus id of some other node sharing the bus.
const OTHER_NODE_ID: u16 = 0x108;

// ---------------------------------------------------------------------------
// Scripted bus traffic
// ---------------------------------------------------------------------------

/// Something injected into the node at a given tick.
#[derive(Debug, Clone, Copy)]
enum Event {
    /// A command from the requester.
    Command(Opcode, u32),
    /// A command with an opcode the node does not know.
    Unknown(u8),
    /// A frame for a different node.
    Foreign,
    /// The next conversion sweep never completes.
    Stall,
}

/// `(tick, event)` pairs, in tick order. Several events on one tick land
/// before the main loop runs, which is how overruns are produced.
const SCRIPT: &[(u32, Event)] = &[
    (5, Event::Command(Opcode::ReadVersion, 0)),
    (10, Event::Command(Opcode::FlashSetSampleSize, 64)),
    (11, Event::Command(Opcode::FlashEraseFull, 0)),
    (20, Event::Command(Opcode::FlashStatus, 0)),
    (40, Event::Command(Opcode::FlashStatus, 0)),
    (41, Event::Command(Opcode::FlashReadPos, 0)),
    (50, Event::Command(Opcode::FlashGetData, 0)),
    (60, Event::Command(Opcode::FlashGenCsv, 0)),
    (100, Event::Command(Opcode::StreamRealtime, 0)),
    (105, Event::Stall),
    (106, Event::Stall),
    (120, Event::Command(Opcode::StreamBuffered, 0)),
    (121, Event::Command(Opcode::SetBufferSize, 0)),
    (122, Event::Command(Opcode::SetBufferSize, 50_000)),
    (123, Event::Command(Opcode::SetBufferSize, 16)),
    (200, Event::Command(Opcode::StreamingStatus, 0)),
    (201, Event::Command(Opcode::ReadData, 0)),
    (202, Event::Command(Opcode::ReadData, 0)),
    (210, Event::Command(Opcode::StreamingStatus, 0)),
    (210, Event::Command(Opcode::ReadData, 0)),
    (220, Event::Unknown(0x55)),
    (230, Event::Foreign),
    (240, Event::Command(Opcode::StopStreaming, 0)),
    (241, Event::Command(Opcode::ReadData, 0)),
    (250, Event::Command(Opcode::FlashStart, 0)),
    (251, Event::Command(Opcode::FlashSetSampleSize, 0)),
    (252, Event::Command(Opcode::FlashReadPos, 0)),
];

fn inject(ctx: &DeviceContext<RamFlash>, sampler: &mut Sampler<MockConverter>, event: Event) {
    let node_id = ctx.config.node_id;
    match event {
        Event::Command(opcode, argument) => {
            info!("Host -> node: {:?} arg={}", opcode, argument);
            let command = Command::new(opcode as u8, HOST_ID, argument);
            ctx.on_frame_received(&BusFrame::new(node_id, command.encode()));
        }
        Event::Unknown(opcode) => {
            info!("Host -> node: unknown opcode {:#04x}", opcode);
            let command = Command::new(opcode, HOST_ID, 0);
            ctx.on_frame_received(&BusFrame::new(node_id, command.encode()));
        }
        Event::Foreign => {
            info!("Host -> {:#x}: ReadVersion", OTHER_NODE_ID);
            let command = Command::new(Opcode::ReadVersion as u8, HOST_ID, 0);
            ctx.on_frame_received(&BusFrame::new(OTHER_NODE_ID, command.encode()));
        }
        Event::Stall => sampler.converter_mut().push_timeout(),
    }
}

// ---------------------------------------------------------------------------
// Outbound frame logging
// ---------------------------------------------------------------------------

fn log_outbound(frame: &BusFrame) {
    let data = &frame.data;
    match data[0] {
        REALTIME_FRAME_TYPE => trace!(
            "Node -> {:#x}: realtime sensor={:#04x} ch0={} ch1={}",
            frame.id,
            data[1],
            u16::from_be_bytes([data[2], data[3]]),
            u16::from_be_bytes([data[4], data[5]]),
        ),
        _ => {
            let response = Response::decode(data);
            if response.opcode == HEARTBEAT_MARKER {
                info!("Node -> {:#x}: heartbeat tick={}", frame.id, response.value);
            } else {
                let name = Opcode::try_from(response.opcode)
                    .map(|opcode| format!("{:?}", opcode))
                    .unwrap_or_else(|raw| format!("{:#04x}", raw));
                info!(
                    "Node -> {:#x}: {} = {} ({:#x})",
                    frame.id, name, response.value, response.value
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Boot
// ---------------------------------------------------------------------------

/// Round-trip the config through a flash-sized page, as the firmware does
/// at boot.
fn load_config() -> NodeConfig {
    let mut page = [0xFFu8; CONFIG_PAGE_SIZE];
    let defaults = NodeConfig::default();
    if let Err(e) = defaults.encode(&mut page) {
        warn!("Config: encode failed ({}), using defaults", e);
        return defaults;
    }
    NodeConfig::decode(&page).unwrap_or_else(|e| {
        warn!("Config: decode failed ({}), using defaults", e);
        defaults
    })
}

struct Options {
    ticks: u32,
    realtime: bool,
}

fn parse_args() -> Options {
    let mut options = Options {
        ticks: DEFAULT_TICKS,
        realtime: false,
    };
    for arg in std::env::args().skip(1) {
        if arg == "--realtime" {
            options.realtime = true;
        } else if let Ok(ticks) = arg.parse() {
            options.ticks = ticks;
        } else {
            warn!("Ignoring argument {:?}", arg);
        }
    }
    options
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    let options = parse_args();
    let config = load_config();

    info!("Starting busnode simulator");
    info!(
        "Node {:#x}, broadcast {:#x}, build {}, {} channel(s)",
        config.node_id, config.broadcast_id, config.build_version, config.channels
    );
    info!(
        "Log region {:#x}..{:#x}, heartbeat every {} ticks, {} ticks to run",
        config.log_region_base,
        config.log_region_base + config.log_region_max_size,
        config.heartbeat_interval(),
        options.ticks
    );

    let flash = RamFlash::new(config.log_region_base, config.log_region_max_size);
    let ctx = DeviceContext::new(config, flash);
    let mut sampler = Sampler::new(
        MockConverter::new(config.channels == 2),
        config.conversion_poll_budget,
    );
    let mut node = Node::new(&ctx, MockBus::new(), NoDelay);

    let tick_duration = Duration::from_secs(1) / config.tick_hz;
    let mut script = SCRIPT.iter().peekable();
    let mut realtime_frames = 0u32;
    let mut timed_out = 0u32;

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------
    for _ in 0..options.ticks {
        let tick_start = Instant::now();

        // --- Bus receive interrupt ----------------------------------------
        let now = ctx.now();
        while let Some((_, event)) = script.next_if(|(at, _)| *at <= now) {
            inject(&ctx, &mut sampler, *event);
        }

        // --- Tick interrupt -----------------------------------------------
        if sampler.on_tick(&ctx) == TickOutcome::TimedOut {
            timed_out += 1;
        }

        // --- Main loop pass -----------------------------------------------
        node.poll(&ctx);
        for frame in node.dispatcher_mut().bus_mut().take_sent() {
            if frame.data[0] == REALTIME_FRAME_TYPE {
                realtime_frames += 1;
            }
            log_outbound(&frame);
        }

        // --- Tick pacing --------------------------------------------------
        if options.realtime {
            let elapsed = tick_start.elapsed();
            if elapsed < tick_duration {
                std::thread::sleep(tick_duration - elapsed);
            }
        }
    }

    let diagnostics = ctx.diagnostics.snapshot();
    info!(
        "Ran {} ticks: {} realtime frames, {} timed-out sweeps, log cursor {:#x} ({}%)",
        ctx.now(),
        realtime_frames,
        timed_out,
        ctx.log.cursor(),
        ctx.log.status()
    );
    info!("Diagnostics: {:?}", diagnostics);
    info!("Simulator exiting");
}
