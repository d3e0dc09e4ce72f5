//! Compile-time limits of the ADC unit driven by the controller.
//!
//! Values match ADC1 of the ESP32-S3.

use crate::channel::BitWidth;

/// Number of input channels on the unit (`SOC_ADC_MAX_CHANNEL_NUM`).
pub const MAX_CHANNELS: usize = 10;

/// Size of one conversion record in a continuous frame (`SOC_ADC_DIGI_DATA_BYTES_PER_CONV`).
pub const BYTES_PER_CONVERSION: usize = 4;

/// Highest hardware-paced sampling rate (`SOC_ADC_SAMPLE_FREQ_THRES_HIGH`).
pub const MAX_SAMPLE_RATE_HZ: u32 = 83_333;

pub const DEFAULT_BIT_WIDTH: BitWidth = BitWidth::Bits12;
