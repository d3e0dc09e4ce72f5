//! Channel identifiers, channel masks and per-channel conversion settings.

use core::fmt;

use crate::consts::MAX_CHANNELS;
use crate::error::AdcError;

/// A single input channel of the ADC unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Channel {
    Ch0 = 0,
    Ch1,
    Ch2,
    Ch3,
    Ch4,
    Ch5,
    Ch6,
    Ch7,
    Ch8,
    Ch9,
}

impl Channel {
    pub const ALL: [Channel; MAX_CHANNELS] = [
        Channel::Ch0,
        Channel::Ch1,
        Channel::Ch2,
        Channel::Ch3,
        Channel::Ch4,
        Channel::Ch5,
        Channel::Ch6,
        Channel::Ch7,
        Channel::Ch8,
        Channel::Ch9,
    ];

    pub const fn index(self) -> u8 {
        self as u8
    }

    /// The mask holding only this channel.
    pub const fn mask(self) -> ChannelMask {
        ChannelMask(1 << self as u8)
    }
}

impl TryFrom<u8> for Channel {
    type Error = AdcError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Channel::ALL
            .get(index as usize)
            .copied()
            .ok_or(AdcError::InvalidArgument("channel index out of range"))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.index())
    }
}

/// Set of channels taking part in a sampling session.
///
/// Bit `n` stands for [`Channel`] `n`. Bits above [`MAX_CHANNELS`] can be
/// represented so that a caller-supplied mask can be checked, but they never
/// name a real channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelMask(u16);

impl ChannelMask {
    pub const EMPTY: ChannelMask = ChannelMask(0);

    const VALID_BITS: u16 = (1 << MAX_CHANNELS) - 1;

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of real channels in the mask.
    pub const fn channel_count(self) -> usize {
        (self.0 & Self::VALID_BITS).count_ones() as usize
    }

    /// True when the mask only names channels that exist on the unit.
    pub const fn is_within_unit(self) -> bool {
        self.0 & !Self::VALID_BITS == 0
    }

    pub const fn contains(self, channel: Channel) -> bool {
        self.0 & (1 << channel as u8) != 0
    }

    #[must_use]
    pub const fn with(self, channel: Channel) -> Self {
        Self(self.0 | (1 << channel as u8))
    }

    #[must_use]
    pub const fn without(self, channel: Channel) -> Self {
        Self(self.0 & !(1 << channel as u8))
    }

    /// Channels of the mask in ascending index order.
    ///
    /// This is the order in which a continuous frame interleaves its samples.
    pub fn iter(self) -> impl Iterator<Item = Channel> {
        Channel::ALL.into_iter().filter(move |ch| self.contains(*ch))
    }
}

impl From<Channel> for ChannelMask {
    fn from(channel: Channel) -> Self {
        channel.mask()
    }
}

impl FromIterator<Channel> for ChannelMask {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        iter.into_iter().fold(ChannelMask::EMPTY, ChannelMask::with)
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Input attenuation, selecting the usable voltage range of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Attenuation {
    Db0 = 0,
    Db2_5 = 1,
    Db6 = 2,
    #[default]
    Db12 = 3,
}

impl Attenuation {
    /// Upper end of the input range in millivolts.
    pub const fn full_scale_mv(self) -> u16 {
        match self {
            Attenuation::Db0 => 950,
            Attenuation::Db2_5 => 1250,
            Attenuation::Db6 => 1750,
            Attenuation::Db12 => 3100,
        }
    }
}

impl TryFrom<u8> for Attenuation {
    type Error = AdcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Attenuation::Db0),
            1 => Ok(Attenuation::Db2_5),
            2 => Ok(Attenuation::Db6),
            3 => Ok(Attenuation::Db12),
            _ => Err(AdcError::InvalidArgument("attenuation out of range")),
        }
    }
}

/// Conversion resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitWidth {
    Bits9,
    Bits10,
    Bits11,
    Bits12,
    Bits13,
}

impl BitWidth {
    pub const fn bits(self) -> u8 {
        match self {
            BitWidth::Bits9 => 9,
            BitWidth::Bits10 => 10,
            BitWidth::Bits11 => 11,
            BitWidth::Bits12 => 12,
            BitWidth::Bits13 => 13,
        }
    }

    /// Largest raw code at this resolution.
    pub const fn max_raw(self) -> u16 {
        (1 << self.bits()) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_iterates_in_ascending_order() {
        let mask: ChannelMask = [Channel::Ch6, Channel::Ch0, Channel::Ch3].into_iter().collect();
        let channels: Vec<_> = mask.iter().collect();
        assert_eq!(channels, vec![Channel::Ch0, Channel::Ch3, Channel::Ch6]);
        assert_eq!(mask.channel_count(), 3);
    }

    #[test]
    fn test_stray_bits_are_not_channels() {
        let mask = ChannelMask::from_bits(0x8000);
        assert!(!mask.is_empty());
        assert_eq!(mask.channel_count(), 0);
        assert!(!mask.is_within_unit());
        assert_eq!(mask.iter().count(), 0);
    }

    #[test]
    fn test_channel_index_range() {
        assert_eq!(Channel::try_from(9).unwrap(), Channel::Ch9);
        assert!(matches!(
            Channel::try_from(10),
            Err(AdcError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_attenuation_range() {
        assert_eq!(Attenuation::try_from(2).unwrap(), Attenuation::Db6);
        assert!(Attenuation::try_from(4).is_err());
    }

    #[test]
    fn test_bit_width_max_raw() {
        assert_eq!(BitWidth::Bits12.max_raw(), 4095);
        assert_eq!(BitWidth::Bits9.max_raw(), 511);
    }
}
