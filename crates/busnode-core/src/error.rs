//! Error types shared by the core modules.
//!
//! None of these escalate to a reset: every caller handles them locally and,
//! where the failure would otherwise be silent, bumps a [`Diagnostics`]
//! counter.
//!
//! [`Diagnostics`]: crate::context::Diagnostics

use thiserror_no_std::Error;

/// Outbound bus failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("transmit still pending after {polls} polls")]
    Timeout { polls: u32 },
    #[error("bus controller rejected the frame")]
    Controller,
}

/// Persistent log failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogError {
    #[error("no log session is active")]
    Inactive,
    #[error("log region is full")]
    Full,
    #[error("flash operation failed at {address:#x}")]
    Flash { address: u32 },
}

/// Config page failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config page could not be decoded")]
    Decode,
    #[error("config does not fit the config page")]
    Encode,
}

/// Malformed bus payloads.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload is {len} bytes, expected 8")]
    Length { len: usize },
}
