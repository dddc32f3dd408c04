//! End-to-end runs of the node: tick interrupt, bus-receive interrupt and
//! main loop interleaved the way the firmware runs them.

use busnode_core::config::NodeConfig;
use busnode_core::context::DeviceContext;
use busnode_core::dispatcher::Outcome;
use busnode_core::frame::{BusFrame, Command, Opcode, Response};
use busnode_core::mock::{MockBus, MockConverter, NoDelay, RamFlash};
use busnode_core::node::Node;
use busnode_core::sample::Sample;
use busnode_core::sampler::Sampler;
use busnode_core::streaming::StreamingMode;

const HOST: u16 = 0x600;

struct Harness {
    ctx: DeviceContext<RamFlash>,
    sampler: Sampler<MockConverter>,
    node: Node<MockBus, NoDelay>,
}

impl Harness {
    fn new(config: NodeConfig) -> Self {
        let ctx = DeviceContext::new(
            config,
            RamFlash::new(config.log_region_base, config.log_region_max_size),
        );
        let sampler = Sampler::new(
            MockConverter::new(config.channels == 2),
            config.conversion_poll_budget,
        );
        let node = Node::new(&ctx, MockBus::new(), NoDelay);
        Self { ctx, sampler, node }
    }

    fn send(&self, opcode: Opcode, argument: u32) {
        let command = Command::new(opcode as u8, HOST, argument);
        self.ctx
            .on_frame_received(&BusFrame::new(self.ctx.config.node_id, command.encode()));
    }

    fn tick(&mut self) {
        self.sampler.on_tick(&self.ctx);
        self.node.poll(&self.ctx);
    }

    fn ticks(&mut self, count: u32) {
        for _ in 0..count {
            self.tick();
        }
    }

    /// Send a command, run the main loop once and return the response value.
    fn request(&mut self, opcode: Opcode, argument: u32) -> u32 {
        self.send(opcode, argument);
        self.node.poll(&self.ctx);
        let frame = self
            .take_sent()
            .into_iter()
            .filter(|frame| frame.id == HOST)
            .next_back()
            .unwrap();
        let response = Response::decode(&frame.data);
        assert_eq!(response.opcode, opcode as u8);
        response.value
    }

    fn take_sent(&mut self) -> Vec<BusFrame> {
        self.node.dispatcher_mut().bus_mut().take_sent()
    }
}

#[test]
fn logging_session_records_and_reads_back() {
    let mut harness = Harness::new(NodeConfig::default());
    let base = harness.ctx.config.log_region_base;

    assert_eq!(harness.request(Opcode::FlashSetSampleSize, 40), 40);
    assert_eq!(harness.request(Opcode::FlashEraseFull, 0), base);
    harness.ticks(4);
    assert_eq!(harness.request(Opcode::FlashReadPos, 0), base + 16);
    assert_eq!(harness.request(Opcode::FlashStatus, 0), 40);

    harness.ticks(20);
    assert_eq!(harness.request(Opcode::FlashStatus, 0), 100);
    assert_eq!(harness.ctx.diagnostics.snapshot().log_refused, 14);

    harness.send(Opcode::FlashGetData, 0);
    harness.node.poll(&harness.ctx);
    let values: Vec<u32> = harness
        .take_sent()
        .iter()
        .map(|frame| Response::decode(&frame.data).value)
        .collect();
    assert_eq!(values.len(), 1 + 10 + 1);
    assert_eq!(values[0], 40);
    assert_eq!(values[11], 0);
    // The ramp converter produces 1, 2, 3, ... one per tick.
    assert_eq!(&values[1..11], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
}

#[test]
fn erase_then_three_appends_reports_truncated_status() {
    let mut harness = Harness::new(NodeConfig::default());
    let region = harness.request(Opcode::FlashSetSampleSize, 0);
    harness.request(Opcode::FlashEraseFull, 0);
    harness.ticks(3);
    assert_eq!(harness.request(Opcode::FlashStatus, 0), 12 * 100 / region);
}

#[test]
fn buffered_mode_serves_oldest_first() {
    let mut harness = Harness::new(NodeConfig::default());
    assert_eq!(harness.request(Opcode::SetBufferSize, 4), 4);
    assert_eq!(harness.request(Opcode::StreamBuffered, 0), 2);

    for value in [100, 200, 300, 400, 500, 600] {
        harness.sampler.converter_mut().push_sample(Sample::single(value));
    }
    for _ in 0..6 {
        harness.sampler.on_tick(&harness.ctx);
    }

    assert_eq!(harness.ctx.diagnostics.snapshot().buffer_overflows, 2);
    for expected in [100, 200, 300, 400, 0] {
        assert_eq!(harness.request(Opcode::ReadData, 0), expected);
    }
}

#[test]
fn realtime_streaming_broadcasts_and_suppresses_heartbeat() {
    let config = NodeConfig {
        heartbeat_interval_ticks: 50,
        channels: 2,
        ..NodeConfig::default()
    };
    let mut harness = Harness::new(config);
    assert_eq!(harness.request(Opcode::StreamRealtime, 0), 1);

    harness.ticks(200);
    let sent = harness.take_sent();
    assert_eq!(sent.len(), 200);
    assert!(sent.iter().all(|frame| frame.id == 0x7DF && frame.data[0] == 0x05));

    assert_eq!(harness.request(Opcode::StopStreaming, 0), 0);
    harness.ticks(200);
    let heartbeats = harness
        .take_sent()
        .iter()
        .filter(|frame| frame.data[3] == 0x7F)
        .count();
    assert!((3..=4).contains(&heartbeats));
}

#[test]
fn conversion_timeouts_leave_no_trace_in_outputs() {
    let mut harness = Harness::new(NodeConfig::default());
    harness.request(Opcode::FlashStart, 0);
    harness.request(Opcode::StreamBuffered, 0);

    harness.sampler.converter_mut().push_sample(Sample::single(1));
    harness.sampler.converter_mut().push_timeout();
    harness.sampler.converter_mut().push_timeout();
    harness.sampler.converter_mut().push_sample(Sample::single(4));
    harness.ticks(4);

    assert_eq!(harness.ctx.now(), 4);
    assert_eq!(harness.ctx.diagnostics.snapshot().conversion_timeouts, 2);
    assert_eq!(harness.ctx.queue.len(), 2);
    assert_eq!(harness.request(Opcode::FlashReadPos, 0), harness.ctx.log.region_start() + 8);
    assert_eq!(harness.request(Opcode::ReadData, 0), 1);
    assert_eq!(harness.request(Opcode::ReadData, 0), 4);
}

#[test]
fn burst_of_commands_keeps_only_the_last() {
    let mut harness = Harness::new(NodeConfig::default());
    harness.send(Opcode::StreamRealtime, 0);
    harness.send(Opcode::StreamBuffered, 0);
    harness.send(Opcode::ReadVersion, 0);

    let report = harness.node.poll(&harness.ctx);
    let Some(Ok(Outcome::Replied(response))) = report.command else {
        panic!("expected a reply, got {:?}", report.command);
    };
    assert_eq!(response.value, 1002);
    assert_eq!(harness.ctx.mode.get(), StreamingMode::Stopped);
    assert_eq!(harness.ctx.diagnostics.snapshot().mailbox_overruns, 1);
}

#[test]
fn config_survives_a_flash_page_round_trip() {
    let config = NodeConfig {
        node_id: 0x120,
        channels: 2,
        default_buffer_capacity: 1024,
        ..NodeConfig::default()
    };
    let mut page = [0xFF; busnode_core::config::CONFIG_PAGE_SIZE];
    config.encode(&mut page).unwrap();

    let loaded = NodeConfig::decode(&page).unwrap();
    assert_eq!(loaded, config);

    let mut harness = Harness::new(loaded);
    assert_eq!(harness.ctx.queue.capacity(), 1024);
    harness.ctx.on_frame_received(&BusFrame::new(
        0x120,
        Command::new(Opcode::ReadVersion as u8, HOST, 0).encode(),
    ));
    harness.node.poll(&harness.ctx);
    let sent = harness.take_sent();
    assert_eq!(Response::decode(&sent[0].data).source, 0x120);
}
