//! Decoding of continuous conversion frames.
//!
//! A frame is a run of little-endian 32-bit records in the ESP-IDF TYPE2
//! output format: raw code in bits 0..12, channel in bits 13..17, unit in
//! bit 17. Channels appear in the ascending order of the session's pattern
//! table, repeated once per sample.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::channel::Channel;
use crate::consts::{BYTES_PER_CONVERSION, MAX_CHANNELS};

const RAW_BITS: u32 = 0x0FFF;
const CHANNEL_SHIFT: u32 = 13;
const CHANNEL_BITS: u32 = 0x0F;
const UNIT_SHIFT: u32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub unit: u8,
    pub channel: u8,
    pub raw: u16,
}

impl Conversion {
    pub fn from_word(word: u32) -> Self {
        Self {
            unit: ((word >> UNIT_SHIFT) & 1) as u8,
            channel: ((word >> CHANNEL_SHIFT) & CHANNEL_BITS) as u8,
            raw: (word & RAW_BITS) as u16,
        }
    }

    pub fn to_word(self) -> u32 {
        (self.raw as u32 & RAW_BITS)
            | ((self.channel as u32 & CHANNEL_BITS) << CHANNEL_SHIFT)
            | ((self.unit as u32 & 1) << UNIT_SHIFT)
    }

    /// Record bytes as the driver writes them into a frame.
    pub fn encode(self) -> [u8; BYTES_PER_CONVERSION] {
        self.to_word().to_le_bytes()
    }

    /// `None` when the record names a channel the unit does not have.
    pub fn channel(&self) -> Option<Channel> {
        Channel::try_from(self.channel).ok()
    }
}

/// Iterate the conversion records of `frame`; a trailing partial record is ignored.
pub fn decode_frame(frame: &[u8]) -> impl Iterator<Item = Conversion> + '_ {
    frame
        .chunks_exact(BYTES_PER_CONVERSION)
        .map(|record| Conversion::from_word(u32::from_le_bytes([record[0], record[1], record[2], record[3]])))
}

/// Per-channel running sums fed from a frame callback.
///
/// Lives in a `static`; feeding it neither blocks nor allocates. Sums are
/// 32-bit so they stay lock-free on targets without 64-bit atomics. Once a
/// channel's sum is full (about a million 12-bit samples) further samples
/// for it are skipped until the next take, so the average stays exact.
pub struct ChannelAccumulator {
    sums: [AtomicU32; MAX_CHANNELS],
    counts: [AtomicU32; MAX_CHANNELS],
}

impl ChannelAccumulator {
    pub const fn new() -> Self {
        Self {
            sums: [const { AtomicU32::new(0) }; MAX_CHANNELS],
            counts: [const { AtomicU32::new(0) }; MAX_CHANNELS],
        }
    }

    /// Add every valid record of `frame`, returning how many were counted.
    pub fn accumulate(&self, frame: &[u8]) -> usize {
        let mut counted = 0;
        for conversion in decode_frame(frame) {
            let Some(channel) = conversion.channel() else {
                continue;
            };
            let idx = channel.index() as usize;
            let added = self.sums[idx].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |sum| {
                sum.checked_add(conversion.raw as u32)
            });
            if added.is_ok() {
                self.counts[idx].fetch_add(1, Ordering::Relaxed);
                counted += 1;
            }
        }
        counted
    }

    /// Floor average of everything accumulated for `channel` since the last take.
    ///
    /// Sum and count are swapped out separately, so a frame landing in
    /// between is split across two averages.
    pub fn take_average(&self, channel: Channel) -> Option<u16> {
        let idx = channel.index() as usize;
        let count = self.counts[idx].swap(0, Ordering::Relaxed);
        let sum = self.sums[idx].swap(0, Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        Some((sum / count) as u16)
    }

    pub fn reset(&self) {
        for (sum, count) in self.sums.iter().zip(self.counts.iter()) {
            sum.store(0, Ordering::Relaxed);
            count.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for ChannelAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
