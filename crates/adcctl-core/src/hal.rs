//! Hardware abstraction consumed by the controller.
//!
//! An implementation wraps the vendor ADC driver of one unit: a one-shot path,
//! a hardware-paced continuous path and the calibration scheme. All methods
//! take `&self`; the controller guarantees that only the session owning the
//! unit calls into the matching path, so implementations only need enough
//! interior mutability to store their driver handles.

use alloc::sync::Arc;

use crate::channel::{Attenuation, BitWidth, Channel};
use crate::continuous::FrameSlot;
use crate::error::HalError;

/// One entry of the continuous sampling pattern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PatternEntry {
    pub channel: Channel,
    pub attenuation: Attenuation,
    pub bit_width: BitWidth,
}

pub trait AdcHal: Send + Sync {
    /// Scoped calibration handle, see [`crate::calibration`].
    type Calibration;

    fn create_oneshot_unit(&self) -> Result<(), HalError>;

    fn configure_oneshot_channel(
        &self,
        channel: Channel,
        attenuation: Attenuation,
        bit_width: BitWidth,
    ) -> Result<(), HalError>;

    /// Blocking single conversion. Must be callable from a restricted
    /// execution context: no allocation, no logging.
    fn read_oneshot(&self, channel: Channel) -> Result<u16, HalError>;

    fn delete_oneshot_unit(&self) -> Result<(), HalError>;

    /// Allocate the continuous driver. `buffer_bytes` and `frame_bytes` are
    /// always passed the same value.
    fn create_continuous(&self, buffer_bytes: u32, frame_bytes: u32) -> Result<(), HalError>;

    fn configure_continuous(
        &self,
        sample_rate_hz: u32,
        pattern: &[PatternEntry],
    ) -> Result<(), HalError>;

    /// Route every completed conversion frame to [`FrameSlot::deliver`].
    ///
    /// The implementation keeps the slot alive until `deinit_continuous`.
    fn register_frame_slot(&self, slot: Arc<FrameSlot>) -> Result<(), HalError>;

    fn start_continuous(&self) -> Result<(), HalError>;

    fn stop_continuous(&self) -> Result<(), HalError>;

    fn deinit_continuous(&self) -> Result<(), HalError>;

    fn create_calibration(
        &self,
        channel: Channel,
        attenuation: Attenuation,
        bit_width: BitWidth,
    ) -> Result<Self::Calibration, HalError>;

    /// Convert one raw code to millivolts.
    fn apply_calibration(
        &self,
        calibration: &Self::Calibration,
        raw: u16,
    ) -> Result<u16, HalError>;

    fn delete_calibration(&self, calibration: Self::Calibration);
}
