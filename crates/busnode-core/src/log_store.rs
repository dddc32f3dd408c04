//! Bounded append-only sample log in NOR flash.
//!
//! The log owns one contiguous region `[start, start + size)`. A session
//! begins with [`SampleLog::start`] (nothing erased, pages are erased lazily
//! the first time the cursor enters them) or with a full erase. The cursor
//! only moves forward, one sample width per append, and never wraps: once it
//! reaches the end of the region further samples are refused. Resizing the
//! region ends the session.
//!
//! [`SharedLog`] wraps the log for use from both the tick interrupt (appends)
//! and the main loop (session control, status, read-back). The full erase is
//! split into one critical section per page so the tick interrupt is held off
//! for at most a single page erase.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use embedded_storage::nor_flash::NorFlash;
use log::{debug, info};

use crate::error::LogError;
use crate::sample::{SAMPLE_WIDTH, Sample};

/// Log state plus the flash driver it writes through.
pub struct SampleLog<F> {
    flash: F,
    region_start: u32,
    region_size: u32,
    max_size: u32,
    cursor: u32,
    /// Everything below this address has been erased in the current session.
    erased_until: u32,
    session: bool,
}

impl<F: NorFlash> SampleLog<F> {
    /// Create an idle log. The cursor starts at the region end, so nothing is
    /// written until a session is opened.
    pub fn new(flash: F, region_start: u32, max_size: u32) -> Self {
        let region_size = align_down(max_size);
        Self {
            flash,
            region_start,
            region_size,
            max_size: region_size,
            cursor: region_start + region_size,
            erased_until: region_start,
            session: false,
        }
    }

    pub const fn region_start(&self) -> u32 {
        self.region_start
    }

    pub const fn region_size(&self) -> u32 {
        self.region_size
    }

    pub const fn region_end(&self) -> u32 {
        self.region_start + self.region_size
    }

    /// Absolute address of the next write.
    pub const fn cursor(&self) -> u32 {
        self.cursor
    }

    pub const fn in_session(&self) -> bool {
        self.session
    }

    /// Open a session at the region start without erasing anything.
    pub fn start(&mut self) -> u32 {
        self.cursor = self.region_start;
        self.erased_until = self.region_start;
        self.session = true;
        self.cursor
    }

    /// Percentage of the region written so far, truncated.
    pub fn status(&self) -> u32 {
        if self.region_size == 0 {
            return 0;
        }
        let written = u64::from(self.cursor - self.region_start);
        (written * 100 / u64::from(self.region_size)) as u32
    }

    /// Resize the region. Zero or anything above the maximum selects the
    /// maximum; other sizes are rounded down to whole samples.
    ///
    /// Resizing ends any open session and parks the cursor at the new end,
    /// so the next session has to begin with `start` or a full erase.
    pub fn set_region_size(&mut self, requested: u32) -> u32 {
        let size = align_down(requested);
        self.region_size = if size == 0 || size > self.max_size {
            self.max_size
        } else {
            size
        };

        self.session = false;
        self.cursor = self.region_end();
        self.region_size
    }

    /// Append one sample at the cursor.
    ///
    /// Erases the page under the cursor first if this session has not
    /// touched it yet.
    pub fn append(&mut self, sample: &Sample) -> Result<(), LogError> {
        if !self.session {
            return Err(LogError::Inactive);
        }
        if self.cursor >= self.region_end() {
            return Err(LogError::Full);
        }

        if self.cursor >= self.erased_until {
            let page = page_of::<F>(self.cursor);
            self.erase_page(page)?;
        }

        let address = self.cursor;
        self.flash
            .write(address, &sample.to_log_bytes())
            .map_err(|_| LogError::Flash { address })?;
        self.cursor += SAMPLE_WIDTH;
        Ok(())
    }

    /// Read the logged word at `address`.
    pub fn read_word(&mut self, address: u32) -> Result<u32, LogError> {
        let mut bytes = [0u8; SAMPLE_WIDTH as usize];
        self.flash
            .read(address, &mut bytes)
            .map_err(|_| LogError::Flash { address })?;
        Ok(u32::from_be_bytes(bytes))
    }

    fn erase_page(&mut self, page: u32) -> Result<(), LogError> {
        let end = page + F::ERASE_SIZE as u32;
        self.flash
            .erase(page, end)
            .map_err(|_| LogError::Flash { address: page })?;
        self.erased_until = self.erased_until.max(end);
        Ok(())
    }

    /// First step of a full erase: close the session and list the pages.
    fn begin_erase(&mut self) -> (u32, u32) {
        self.session = false;
        self.cursor = self.region_end();
        (page_of::<F>(self.region_start), self.region_end())
    }

    /// Last step of a full erase: reopen at the start with every page clean.
    fn finish_erase(&mut self) -> u32 {
        self.cursor = self.region_start;
        self.erased_until = self.region_end();
        self.session = true;
        self.cursor
    }
}

const fn align_down(size: u32) -> u32 {
    size - size % SAMPLE_WIDTH
}

fn page_of<F: NorFlash>(address: u32) -> u32 {
    let page_size = F::ERASE_SIZE as u32;
    address - address % page_size
}

/// A [`SampleLog`] shared between the tick interrupt and the main loop.
pub struct SharedLog<F> {
    inner: CriticalSectionMutex<RefCell<SampleLog<F>>>,
}

impl<F: NorFlash> SharedLog<F> {
    pub fn new(log: SampleLog<F>) -> Self {
        Self {
            inner: CriticalSectionMutex::new(RefCell::new(log)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SampleLog<F>) -> R) -> R {
        self.inner.lock(|log| f(&mut log.borrow_mut()))
    }

    /// Tick interrupt: append the sample if a session has room for it.
    pub fn append(&self, sample: &Sample) -> Result<(), LogError> {
        self.with(|log| log.append(sample))
    }

    pub fn start(&self) -> u32 {
        let cursor = self.with(SampleLog::start);
        info!("Log: session started at {:#x}", cursor);
        cursor
    }

    /// Erase the whole region and open a session at its start.
    ///
    /// Main loop only. Returns the region start.
    pub fn erase_all(&self) -> Result<u32, LogError> {
        let (first_page, end) = self.with(SampleLog::begin_erase);
        let page_size = F::ERASE_SIZE as u32;
        info!("Log: erasing {:#x}..{:#x}", first_page, end);

        let mut page = first_page;
        while page < end {
            self.with(|log| log.erase_page(page))?;
            page += page_size;
        }

        Ok(self.with(SampleLog::finish_erase))
    }

    pub fn status(&self) -> u32 {
        self.with(|log| log.status())
    }

    pub fn cursor(&self) -> u32 {
        self.with(|log| log.cursor())
    }

    pub fn region_start(&self) -> u32 {
        self.with(|log| log.region_start())
    }

    pub fn region_size(&self) -> u32 {
        self.with(|log| log.region_size())
    }

    pub fn set_region_size(&self, requested: u32) -> u32 {
        let (closed, size) = self.with(|log| {
            let closed = log.in_session();
            (closed, log.set_region_size(requested))
        });
        if closed {
            info!("Log: session closed by resize to {} bytes", size);
        }
        debug!("Log: region size {} (requested {})", size, requested);
        size
    }

    /// Feed every word of the region to `emit`, in address order.
    ///
    /// Main loop only. Each word is read in its own critical section; the
    /// first error from `emit` or the flash stops the read-back.
    pub fn read_back<E>(
        &self,
        mut emit: impl FnMut(u32) -> Result<(), E>,
    ) -> Result<u32, ReadBackError<E>> {
        let (start, end) = self.with(|log| (log.region_start(), log.region_end()));
        let mut address = start;
        let mut words = 0;

        while address < end {
            let word = self
                .with(|log| log.read_word(address))
                .map_err(ReadBackError::Log)?;
            emit(word).map_err(ReadBackError::Emit)?;
            address += SAMPLE_WIDTH;
            words += 1;
        }

        Ok(words)
    }
}

/// Why a read-back stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadBackError<E> {
    Log(LogError),
    Emit(E),
}
