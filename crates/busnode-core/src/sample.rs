//! Converted readings from one conversion sweep.

/// Bytes one sample occupies in the log and in a response value.
pub const SAMPLE_WIDTH: u32 = 4;

/// Most channels a single sweep can carry.
pub const MAX_CHANNELS: usize = 2;

/// One or two raw converter readings taken in a single sweep.
///
/// Tick order is the only timestamp; nothing else is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sample {
    channels: [u16; MAX_CHANNELS],
    count: u8,
}

impl Sample {
    /// A single-channel sample.
    pub const fn single(value: u16) -> Self {
        Self {
            channels: [value, 0],
            count: 1,
        }
    }

    /// A two-channel sample.
    pub const fn dual(first: u16, second: u16) -> Self {
        Self {
            channels: [first, second],
            count: 2,
        }
    }

    /// Number of channels in this sample.
    pub const fn channel_count(&self) -> usize {
        self.count as usize
    }

    /// Reading of channel `index`, if that channel was converted.
    pub fn channel(&self, index: usize) -> Option<u16> {
        if index < self.channel_count() {
            self.channels.get(index).copied()
        } else {
            None
        }
    }

    /// Packs the sample into the 4-byte word used by the log and responses.
    ///
    /// One channel is zero-extended; two channels are packed first-high.
    pub const fn to_word(&self) -> u32 {
        if self.count >= 2 {
            ((self.channels[0] as u32) << 16) | self.channels[1] as u32
        } else {
            self.channels[0] as u32
        }
    }

    /// Big-endian bytes of [`Sample::to_word`], as written to flash.
    pub const fn to_log_bytes(&self) -> [u8; SAMPLE_WIDTH as usize] {
        self.to_word().to_be_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_channel_word_is_zero_extended() {
        let sample = Sample::single(0x0ABC);
        assert_eq!(sample.to_word(), 0x0000_0ABC);
        assert_eq!(sample.channel(1), None);
    }

    #[test]
    fn test_dual_channel_word_packs_first_high() {
        let sample = Sample::dual(0x0123, 0x0FED);
        assert_eq!(sample.to_word(), 0x0123_0FED);
        assert_eq!(sample.to_log_bytes(), [0x01, 0x23, 0x0F, 0xED]);
        assert_eq!(sample.channel(1), Some(0x0FED));
    }
}
