//! One-deep, overrun-aware handoff from interrupt context to the main loop.
//!
//! The slot always holds the most recent message. A second `produce` before
//! the consumer drains the slot overwrites the first and marks an overrun;
//! the overwritten message is gone for good.
//!
//! Both sides run inside a critical section, so the consumer never sees a
//! state flag that disagrees with the stored message.

use core::cell::Cell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

/// Occupancy of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    New,
    /// New, and at least one earlier message was overwritten unread.
    NewOverrun,
}

/// What the consumer gets out of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery<T> {
    pub message: T,
    pub overrun: bool,
}

#[derive(Clone, Copy)]
struct Slot<T> {
    state: SlotState,
    message: Option<T>,
}

pub struct Mailbox<T: Copy> {
    slot: CriticalSectionMutex<Cell<Slot<T>>>,
}

impl<T: Copy> Mailbox<T> {
    pub const fn new() -> Self {
        Self {
            slot: CriticalSectionMutex::new(Cell::new(Slot {
                state: SlotState::Empty,
                message: None,
            })),
        }
    }

    /// Store `message`, replacing any unread one.
    ///
    /// Interrupt context only. Returns `true` when an unread message was
    /// overwritten.
    pub fn produce(&self, message: T) -> bool {
        self.slot.lock(|cell| {
            let previous = cell.get().state;
            let state = match previous {
                SlotState::Empty => SlotState::New,
                SlotState::New | SlotState::NewOverrun => SlotState::NewOverrun,
            };
            cell.set(Slot {
                state,
                message: Some(message),
            });
            previous != SlotState::Empty
        })
    }

    /// Take the pending message, clearing both the new and overrun marks.
    ///
    /// Main loop only.
    pub fn consume(&self) -> Option<Delivery<T>> {
        self.slot.lock(|cell| {
            let slot = cell.get();
            if slot.state == SlotState::Empty {
                return None;
            }
            cell.set(Slot {
                state: SlotState::Empty,
                message: None,
            });
            slot.message.map(|message| Delivery {
                message,
                overrun: slot.state == SlotState::NewOverrun,
            })
        })
    }

    pub fn state(&self) -> SlotState {
        self.slot.lock(|cell| cell.get().state)
    }
}

impl<T: Copy> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mailbox_yields_nothing() {
        let mailbox: Mailbox<u32> = Mailbox::new();
        assert_eq!(mailbox.consume(), None);
        assert_eq!(mailbox.state(), SlotState::Empty);
    }

    #[test]
    fn test_single_produce_is_not_an_overrun() {
        let mailbox = Mailbox::new();
        assert!(!mailbox.produce(7u32));
        assert_eq!(mailbox.state(), SlotState::New);
        assert_eq!(
            mailbox.consume(),
            Some(Delivery {
                message: 7,
                overrun: false
            })
        );
        assert_eq!(mailbox.consume(), None);
    }

    #[test]
    fn test_overrun_iff_two_or_more_produces_and_last_wins() {
        for produced in 1u32..=6 {
            let mailbox = Mailbox::new();
            for value in 1..=produced {
                mailbox.produce(value);
            }

            let delivery = mailbox.consume().unwrap();
            assert_eq!(delivery.message, produced);
            assert_eq!(delivery.overrun, produced >= 2, "after {produced} produces");
        }
    }

    #[test]
    fn test_consume_clears_overrun() {
        let mailbox = Mailbox::new();
        mailbox.produce(1u8);
        assert!(mailbox.produce(2u8));
        assert_eq!(mailbox.state(), SlotState::NewOverrun);
        assert!(mailbox.consume().unwrap().overrun);

        mailbox.produce(3u8);
        assert_eq!(
            mailbox.consume(),
            Some(Delivery {
                message: 3,
                overrun: false
            })
        );
    }
}
