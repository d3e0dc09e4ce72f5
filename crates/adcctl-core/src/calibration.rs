//! Calibration Adapter - raw codes to millivolts
//!
//! Each call opens one calibration context for its (channel, attenuation,
//! bit width) and closes it before returning, on every path. Nothing is
//! cached between calls.

use core::mem::ManuallyDrop;

use crate::channel::{Attenuation, BitWidth, Channel};
use crate::controller::AdcController;
use crate::error::{AdcError, HalError};
use crate::hal::AdcHal;

/// A calibration context that is deleted when dropped.
pub struct CalibrationScope<'a, H: AdcHal> {
    hal: &'a H,
    handle: ManuallyDrop<H::Calibration>,
}

impl<'a, H: AdcHal> CalibrationScope<'a, H> {
    pub fn open(
        hal: &'a H,
        channel: Channel,
        attenuation: Attenuation,
        bit_width: BitWidth,
    ) -> Result<Self, HalError> {
        let handle = hal.create_calibration(channel, attenuation, bit_width)?;
        Ok(Self {
            hal,
            handle: ManuallyDrop::new(handle),
        })
    }

    pub fn convert(&self, raw: u16) -> Result<u16, HalError> {
        self.hal.apply_calibration(&self.handle, raw)
    }
}

impl<H: AdcHal> Drop for CalibrationScope<'_, H> {
    fn drop(&mut self) {
        // SAFETY: the handle is never touched again after drop
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        self.hal.delete_calibration(handle);
    }
}

impl<H: AdcHal> AdcController<H> {
    /// Convert `samples` in place from raw codes to millivolts.
    ///
    /// Samples are converted independently and in order. A sample whose
    /// conversion fails keeps its raw code; every other sample is still
    /// converted and the first failure is returned afterwards.
    pub fn calibrate(
        &self,
        channel: Channel,
        attenuation: Attenuation,
        samples: &mut [u16],
    ) -> Result<(), AdcError> {
        if samples.is_empty() {
            return Err(AdcError::InvalidArgument("empty sample buffer"));
        }

        let scope = CalibrationScope::open(&self.hal, channel, attenuation, self.config.bit_width)?;
        let mut first_error = None;
        for sample in samples.iter_mut() {
            match scope.convert(*sample) {
                Ok(mv) => *sample = mv,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// [`calibrate`](Self::calibrate) for a raw channel index, as handed in by
    /// callers that keep channels as plain numbers.
    pub fn calibrate_index(
        &self,
        channel: u8,
        attenuation: Attenuation,
        samples: &mut [u16],
    ) -> Result<(), AdcError> {
        let channel = Channel::try_from(channel)?;
        self.calibrate(channel, attenuation, samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::error::HalOp;
    use crate::testing::{Call, RecordingHal};

    fn controller() -> AdcController<RecordingHal> {
        AdcController::new(RecordingHal::new(), ControllerConfig::default())
    }

    #[test]
    fn test_converts_in_place_and_in_order() {
        let ctrl = controller();
        let mut samples = [0, 4095, 2048];

        ctrl.calibrate(Channel::Ch1, Attenuation::Db12, &mut samples).unwrap();

        // linear model of the recording double: raw * 3100 / 4095
        assert_eq!(samples, [0, 3100, 1550]);
        assert_eq!(ctrl.hal().count(&Call::DeleteCalibration), 1);
        assert_eq!(ctrl.hal().live_calibrations(), 0);
    }

    #[test]
    fn test_empty_buffer_creates_no_context() {
        let ctrl = controller();

        assert!(matches!(
            ctrl.calibrate(Channel::Ch1, Attenuation::Db12, &mut []),
            Err(AdcError::InvalidArgument(_))
        ));
        assert!(ctrl.hal().calls().is_empty());
    }

    #[test]
    fn test_bad_channel_index_creates_no_context() {
        let ctrl = controller();
        let mut samples = [1, 2, 3];

        assert!(matches!(
            ctrl.calibrate_index(42, Attenuation::Db0, &mut samples),
            Err(AdcError::InvalidArgument(_))
        ));
        assert!(ctrl.hal().calls().is_empty());
        assert_eq!(samples, [1, 2, 3]);
    }

    #[test]
    fn test_context_released_on_conversion_failure() {
        let ctrl = controller();
        ctrl.hal().fail_on(HalOp::ApplyCalibration);
        let mut samples = [100, 200];

        let err = ctrl
            .calibrate(Channel::Ch0, Attenuation::Db6, &mut samples)
            .unwrap_err();
        assert!(matches!(err, AdcError::Hardware(HalError { op: HalOp::ApplyCalibration, .. })));
        assert_eq!(ctrl.hal().live_calibrations(), 0);
        assert_eq!(samples, [100, 200]);
        // every sample was still attempted
        assert_eq!(ctrl.hal().count(&Call::ApplyCalibration(200)), 1);
    }

    #[test]
    fn test_failed_sample_does_not_stop_the_rest() {
        let ctrl = controller();
        ctrl.hal().fail_on_raw(2048);
        let mut samples = [0, 2048, 4095];

        let err = ctrl
            .calibrate(Channel::Ch1, Attenuation::Db12, &mut samples)
            .unwrap_err();
        assert!(matches!(err, AdcError::Hardware(HalError { op: HalOp::ApplyCalibration, .. })));
        // the failed sample keeps its raw code, the one after it is converted
        assert_eq!(samples, [0, 2048, 3100]);
        assert_eq!(ctrl.hal().count(&Call::DeleteCalibration), 1);
        assert_eq!(ctrl.hal().live_calibrations(), 0);
    }

    #[test]
    fn test_calibration_ignores_reservations() {
        let ctrl = controller();
        ctrl.try_reserve(Channel::Ch4.mask()).unwrap();
        let mut samples = [4095];

        ctrl.calibrate(Channel::Ch2, Attenuation::Db0, &mut samples).unwrap();
        assert_eq!(samples, [950]);
    }
}
