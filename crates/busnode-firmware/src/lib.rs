//! ESP32-S3 firmware-specific modules for busnode
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: the ADC and TWAI drivers behind busnode-core's hardware traits,
//! the interrupt handlers and the config page in flash.

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod hardware;
pub mod storage;
