use crate::channel::BitWidth;
use crate::consts;

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Resolution used for one-shot channels, pattern entries and calibration
    pub bit_width: BitWidth,
    /// Size of one conversion record in a continuous frame
    pub bytes_per_sample: usize,
    /// Upper bound accepted for `sample_rate_hz` of a continuous session
    pub max_sample_rate_hz: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            bit_width: consts::DEFAULT_BIT_WIDTH,
            bytes_per_sample: consts::BYTES_PER_CONVERSION,
            max_sample_rate_hz: consts::MAX_SAMPLE_RATE_HZ,
        }
    }
}
