//! Boundary constants and the persisted node configuration.
//!
//! Every value a deployment may want to change lives in [`NodeConfig`]. The
//! firmware keeps a postcard-encoded copy in a dedicated flash page and falls
//! back to [`NodeConfig::default`] when the page is blank or unreadable.

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bus id the node answers to.
pub const NODE_ID: u16 = 0x107;
/// Bus id used for heartbeats and realtime frames.
pub const BROADCAST_ID: u16 = 0x7DF;
/// Sensor id carried in realtime frames.
pub const SENSOR_ID: u8 = 0x07;
/// Firmware build number reported by `ReadVersion`.
pub const BUILD_VERSION: u32 = 1002;

/// Sampler tick rate (1 ms period).
pub const TICK_HZ: u32 = 1000;
/// Heartbeat period in ticks (10 s at 1 kHz).
pub const HEARTBEAT_INTERVAL_TICKS: u32 = 10_000;

/// Completion polls allowed per conversion before the sample is dropped.
pub const CONVERSION_POLL_BUDGET: u32 = 100;
/// Transmit-pending polls allowed before a send is reported as timed out.
pub const SEND_POLL_BUDGET: u32 = 0x1000;
/// Pause between transmit-pending polls.
pub const SEND_POLL_INTERVAL_US: u32 = 100;

/// First byte of the log region (absolute flash address).
pub const LOG_REGION_BASE: u32 = 0x30000;
/// Log region size, also the largest size `FlashSetSampleSize` accepts.
pub const LOG_REGION_MAX_SIZE: u32 = 0x10000;
/// Flash erase granularity; the log region base must sit on a page boundary.
pub const FLASH_PAGE_SIZE: u32 = 4096;

/// Buffered-mode queue capacity used when a requested size is out of range.
pub const DEFAULT_BUFFER_CAPACITY: u32 = 8192;
/// Largest buffered-mode queue capacity.
pub const MAX_BUFFER_CAPACITY: u32 = 32768;

/// Size of the flash page reserved for the encoded config.
pub const CONFIG_PAGE_SIZE: usize = 256;

/// Runtime configuration of a node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub node_id: u16,
    pub broadcast_id: u16,
    pub sensor_id: u8,
    pub build_version: u32,
    /// Channels converted per sweep, 1 or 2.
    pub channels: u8,
    pub tick_hz: u32,
    pub heartbeat_interval_ticks: u32,
    pub conversion_poll_budget: u32,
    pub send_poll_budget: u32,
    pub send_poll_interval_us: u32,
    pub log_region_base: u32,
    pub log_region_max_size: u32,
    pub default_buffer_capacity: u32,
    pub max_buffer_capacity: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NODE_ID,
            broadcast_id: BROADCAST_ID,
            sensor_id: SENSOR_ID,
            build_version: BUILD_VERSION,
            channels: 1,
            tick_hz: TICK_HZ,
            heartbeat_interval_ticks: HEARTBEAT_INTERVAL_TICKS,
            conversion_poll_budget: CONVERSION_POLL_BUDGET,
            send_poll_budget: SEND_POLL_BUDGET,
            send_poll_interval_us: SEND_POLL_INTERVAL_US,
            log_region_base: LOG_REGION_BASE,
            log_region_max_size: LOG_REGION_MAX_SIZE,
            default_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_buffer_capacity: MAX_BUFFER_CAPACITY,
        }
    }
}

impl NodeConfig {
    /// Decode a config previously written with [`NodeConfig::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)?;
        Ok(config.validated())
    }

    /// Encode into `buf`, returning the used prefix.
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|_| ConfigError::Encode)
    }

    /// Clamp values that would break the core's invariants.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if !(1..=2).contains(&self.channels) {
            info!("Config: channel count {} out of range, using 1", self.channels);
            self.channels = 1;
        }
        if self.tick_hz == 0 {
            self.tick_hz = defaults.tick_hz;
        }
        if self.heartbeat_interval_ticks == 0 {
            self.heartbeat_interval_ticks = defaults.heartbeat_interval_ticks;
        }
        if self.conversion_poll_budget == 0 {
            self.conversion_poll_budget = defaults.conversion_poll_budget;
        }
        if self.send_poll_budget == 0 {
            self.send_poll_budget = defaults.send_poll_budget;
        }
        if self.log_region_max_size < crate::sample::SAMPLE_WIDTH {
            self.log_region_max_size = defaults.log_region_max_size;
        }
        let misaligned = self.log_region_base % FLASH_PAGE_SIZE != 0;
        if misaligned || self.log_region_base.checked_add(self.log_region_max_size).is_none() {
            info!(
                "Config: log region {:#x}+{:#x} unusable, using defaults",
                self.log_region_base, self.log_region_max_size
            );
            self.log_region_base = defaults.log_region_base;
            self.log_region_max_size = defaults.log_region_max_size;
        }
        if self.max_buffer_capacity == 0 {
            self.max_buffer_capacity = defaults.max_buffer_capacity;
        }
        if self.default_buffer_capacity == 0
            || self.default_buffer_capacity > self.max_buffer_capacity
        {
            self.default_buffer_capacity = self.max_buffer_capacity.min(DEFAULT_BUFFER_CAPACITY);
        }

        self
    }

    /// Heartbeat period in ticks.
    pub const fn heartbeat_interval(&self) -> u32 {
        self.heartbeat_interval_ticks
    }
}
