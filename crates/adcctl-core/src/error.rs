use thiserror::Error;

use crate::channel::ChannelMask;

/// Hardware call that failed, as reported by an [`AdcHal`](crate::hal::AdcHal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalOp {
    CreateOneShotUnit,
    ConfigureOneShotChannel,
    ReadOneShot,
    DeleteOneShotUnit,
    CreateContinuous,
    ConfigureContinuous,
    RegisterFrameSlot,
    StartContinuous,
    StopContinuous,
    DeinitContinuous,
    CreateCalibration,
    ApplyCalibration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("{op:?} failed (code {code})")]
pub struct HalError {
    pub op: HalOp,
    /// Vendor status code, `esp_err_t` on ESP-IDF.
    pub code: i32,
}

impl HalError {
    pub const fn new(op: HalOp, code: i32) -> Self {
        Self { op, code }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcError {
    /// Rejected before any state was touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("ADC busy: {requested} conflicts with active {active}")]
    ResourceBusy {
        active: ChannelMask,
        requested: ChannelMask,
    },

    /// The reservation has already been rolled back when this is returned.
    #[error("hardware failure: {0}")]
    Hardware(#[from] HalError),

    #[error("state mismatch: {requested} does not own active {active}")]
    StateMismatch {
        active: ChannelMask,
        requested: ChannelMask,
    },
}

impl AdcError {
    /// Busy and mismatch rejections leave the active session untouched, so
    /// the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdcError::ResourceBusy { .. } | AdcError::StateMismatch { .. }
        )
    }

    /// The hardware path should be re-initialised before retrying.
    pub fn requires_reinit(&self) -> bool {
        matches!(self, AdcError::Hardware(_))
    }
}
