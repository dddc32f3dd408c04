//! Hardware-independent core of the busnode acquisition node.
//!
//! The node samples one or two analog channels on a periodic tick, streams
//! or buffers the samples, records them into a bounded flash log and answers
//! 8-byte commands on a CAN-style bus. Everything here is platform-agnostic:
//! the firmware supplies the peripherals through the traits in [`hal`] and
//! `embedded_storage::nor_flash::NorFlash`, the simulator and tests use the
//! doubles in `mock`.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod hal;
pub mod heartbeat;
pub mod log_store;
pub mod mailbox;
pub mod mock;
pub mod node;
pub mod sample;
pub mod sampler;
pub mod streaming;
