//! Host-side hardware doubles for tests and the simulator.

#![cfg(any(test, feature = "mock"))]

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

use crate::frame::BusFrame;
use crate::hal::{Bus, Converter};
use crate::sample::Sample;

/// What the next conversion sweep does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Completes after this many polls with the given sample.
    Ready { polls: u32, sample: Sample },
    /// Never completes.
    Stuck,
}

/// Converter that plays back a script, then repeats a ramp.
pub struct MockConverter {
    script: VecDeque<Conversion>,
    current: Conversion,
    polls: u32,
    ramp: u16,
    dual: bool,
    pending_flag: bool,
    clears: u32,
}

impl MockConverter {
    pub fn new(dual: bool) -> Self {
        Self {
            script: VecDeque::new(),
            current: Conversion::Stuck,
            polls: 0,
            ramp: 0,
            dual,
            pending_flag: false,
            clears: 0,
        }
    }

    /// Queue a scripted sweep.
    pub fn push(&mut self, conversion: Conversion) {
        self.script.push_back(conversion);
    }

    /// Queue a sweep that never completes.
    pub fn push_timeout(&mut self) {
        self.push(Conversion::Stuck);
    }

    /// Queue a sweep that completes immediately.
    pub fn push_sample(&mut self, sample: Sample) {
        self.push(Conversion::Ready { polls: 0, sample });
    }

    /// Times the completion flag was cleared.
    pub fn clears(&self) -> u32 {
        self.clears
    }

    /// Whether a completion flag is still raised.
    pub fn flag_pending(&self) -> bool {
        self.pending_flag
    }

    fn next_ramp(&mut self) -> Sample {
        self.ramp = self.ramp.wrapping_add(1) & 0x0FFF;
        if self.dual {
            Sample::dual(self.ramp, 0x0FFF - self.ramp)
        } else {
            Sample::single(self.ramp)
        }
    }
}

impl Converter for MockConverter {
    fn start(&mut self) {
        self.polls = 0;
        self.current = match self.script.pop_front() {
            Some(conversion) => conversion,
            None => Conversion::Ready {
                polls: 0,
                sample: self.next_ramp(),
            },
        };
    }

    fn is_complete(&mut self) -> bool {
        match self.current {
            Conversion::Ready { polls, .. } => {
                let done = self.polls >= polls;
                self.polls += 1;
                self.pending_flag = done;
                done
            }
            Conversion::Stuck => {
                self.polls += 1;
                false
            }
        }
    }

    fn clear(&mut self) {
        self.pending_flag = false;
        self.clears += 1;
    }

    fn read(&mut self) -> Sample {
        match self.current {
            Conversion::Ready { sample, .. } => sample,
            Conversion::Stuck => Sample::default(),
        }
    }
}

/// Bus that records every transmitted frame.
#[derive(Default)]
pub struct MockBus {
    sent: Vec<BusFrame>,
    /// Polls each transmission stays pending for.
    pub pending_polls: u32,
    remaining: u32,
    /// Refuse every frame at the controller.
    pub refuse: bool,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> &[BusFrame] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<BusFrame> {
        core::mem::take(&mut self.sent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refused;

impl Bus for MockBus {
    type Error = Refused;

    fn start_transmit(&mut self, frame: &BusFrame) -> Result<(), Self::Error> {
        if self.refuse {
            return Err(Refused);
        }
        self.sent.push(*frame);
        self.remaining = self.pending_polls;
        Ok(())
    }

    fn transmit_pending(&mut self) -> bool {
        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }
}

/// `DelayNs` that returns immediately.
#[derive(Default, Clone, Copy)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamFlashError {
    OutOfBounds,
    NotAligned,
    /// Programming a cell that has not been erased since its last write.
    NotErased,
    /// Injected with [`RamFlash::fail_erases`] or [`RamFlash::fail_reads_from`].
    Fault,
}

impl NorFlashError for RamFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Self::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Self::NotAligned => NorFlashErrorKind::NotAligned,
            Self::NotErased | Self::Fault => NorFlashErrorKind::Other,
        }
    }
}

/// NOR flash in RAM covering `[base, base + size)`.
///
/// Writes may only clear bits of erased cells, as on real NOR flash, so a
/// missing erase shows up as [`RamFlashError::NotErased`].
pub struct RamFlash {
    base: u32,
    cells: Vec<u8>,
    erases: u32,
    fail_erases: bool,
    fail_reads_from: Option<u32>,
}

impl RamFlash {
    pub const PAGE_SIZE: u32 = crate::config::FLASH_PAGE_SIZE;

    /// `base` and `size` should be page aligned.
    pub fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            cells: vec![0xFF; size as usize],
            erases: 0,
            fail_erases: false,
            fail_reads_from: None,
        }
    }

    /// Pages erased so far.
    pub fn erase_count(&self) -> u32 {
        self.erases
    }

    /// Make every erase fail.
    pub fn fail_erases(mut self) -> Self {
        self.fail_erases = true;
        self
    }

    /// Make reads at or above `address` fail.
    pub fn fail_reads_from(mut self, address: u32) -> Self {
        self.fail_reads_from = Some(address);
        self
    }

    fn range(&self, offset: u32, len: usize) -> Option<core::ops::Range<usize>> {
        let start = offset.checked_sub(self.base)? as usize;
        let end = start.checked_add(len)?;
        (end <= self.cells.len()).then_some(start..end)
    }
}

impl ErrorType for RamFlash {
    type Error = RamFlashError;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if self.fail_reads_from.is_some_and(|from| offset >= from) {
            return Err(RamFlashError::Fault);
        }
        let range = self
            .range(offset, bytes.len())
            .ok_or(RamFlashError::OutOfBounds)?;
        bytes.copy_from_slice(&self.cells[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.base as usize + self.cells.len()
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = Self::PAGE_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if self.fail_erases {
            return Err(RamFlashError::Fault);
        }
        if from % Self::PAGE_SIZE != 0 || to % Self::PAGE_SIZE != 0 || to < from {
            return Err(RamFlashError::NotAligned);
        }
        let range = self
            .range(from, (to - from) as usize)
            .ok_or(RamFlashError::OutOfBounds)?;
        self.cells[range].fill(0xFF);
        self.erases += (to - from) / Self::PAGE_SIZE;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(RamFlashError::NotAligned);
        }
        let range = self
            .range(offset, bytes.len())
            .ok_or(RamFlashError::OutOfBounds)?;
        let cells = &mut self.cells[range];
        if cells.iter().any(|&cell| cell != 0xFF) {
            return Err(RamFlashError::NotErased);
        }
        cells.copy_from_slice(bytes);
        Ok(())
    }
}
