//! ADC Controller - the shared unit and everything that arbitrates it
//!
//! One `AdcController` owns the hardware layer, the arbiter and the frame
//! slot. Callers share it by reference (usually behind an `Arc`) and go
//! through it for every sampling discipline. The per-discipline operations
//! live next to their helpers in [`crate::oneshot`], [`crate::continuous`]
//! and [`crate::calibration`].

use alloc::sync::Arc;

use crate::arbiter::{ChannelArbiter, SessionKind, Snapshot};
use crate::channel::ChannelMask;
use crate::config::ControllerConfig;
use crate::continuous::FrameSlot;
use crate::error::{AdcError, HalError};
use crate::hal::AdcHal;
use crate::oneshot::ArmedChannel;
use crate::request::{Outcome, Request as _, SamplingRequest};

pub struct AdcController<H: AdcHal> {
    pub(crate) hal: H,
    pub(crate) config: ControllerConfig,
    pub(crate) arbiter: ChannelArbiter,
    pub(crate) slot: Arc<FrameSlot>,
    pub(crate) armed: ArmedChannel,
}

impl<H: AdcHal> AdcController<H> {
    /// Create an idle controller around `hal`.
    pub fn new(hal: H, config: ControllerConfig) -> Self {
        log::info!("ADC controller initialized ({:?})", config.bit_width);
        Self {
            hal,
            config,
            arbiter: ChannelArbiter::new(),
            slot: Arc::new(FrameSlot::new()),
            armed: ArmedChannel::new(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Slot the hardware layer delivers continuous frames through.
    pub fn frame_slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    pub fn is_available(&self) -> bool {
        self.arbiter.is_available()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.arbiter.snapshot()
    }

    /// Reserve `mask` without configuring any hardware path.
    ///
    /// Re-reserving the mask already held succeeds and changes nothing.
    pub fn try_reserve(&self, mask: ChannelMask) -> Result<(), AdcError> {
        check_mask(mask)?;
        self.arbiter
            .with_state(|state| state.admit(mask).map(|_| ()))
            .inspect(|_| log::debug!("reserved {}", mask))
            .inspect_err(|e| log::warn!("reserve {} rejected: {}", mask, e))
    }

    /// Release `mask`, tearing down whatever hardware path its session owns.
    ///
    /// Only the exact active mask is accepted. The reservation is cleared even
    /// when the teardown itself fails; the error is still reported.
    pub fn release(&self, mask: ChannelMask) -> Result<(), AdcError> {
        check_mask(mask)?;
        self.arbiter
            .with_state(|state| {
                if state.active_mask != mask {
                    return Err(state.mismatch(mask));
                }
                // a one-shot bracket releases itself when its conversions finish
                if state.session == SessionKind::OneShot {
                    return Err(state.busy(mask));
                }
                let result = self.teardown(state.session);
                state.clear();
                result.map_err(AdcError::from)
            })
            .inspect(|_| log::debug!("released {}", mask))
            .inspect_err(|e| log::warn!("release {} failed: {}", mask, e))
    }

    /// Forcibly return to the idle state, tearing down any live session.
    ///
    /// Recovery path after [`AdcError::Hardware`]. The controller is idle
    /// afterwards whatever the teardown reports. A one-shot burst still
    /// converting owns its unit until it finishes, so it is refused with
    /// [`AdcError::ResourceBusy`] and nothing is touched.
    pub fn reinit(&self) -> Result<(), AdcError> {
        let result = self.arbiter.with_state(|state| {
            if state.session == SessionKind::OneShot {
                return Err(state.busy(state.active_mask));
            }
            let result = self.teardown(state.session).map_err(AdcError::from);
            // nothing may stay armed, even for a session the state lost track of
            self.slot.clear();
            self.armed.disarm();
            state.clear();
            result
        });
        match result {
            Ok(()) => log::info!("ADC controller re-initialized"),
            Err(AdcError::ResourceBusy { .. }) => {
                log::warn!("ADC re-init refused while a one-shot burst is converting")
            }
            Err(e) => log::error!("ADC controller re-initialized with teardown error: {}", e),
        }
        result
    }

    /// Submit a tagged sampling request.
    pub fn start_sampling(&self, request: SamplingRequest) -> Result<Outcome, AdcError> {
        request.check(&self.config)?;
        log::debug!(
            "sampling request on {} at {:?}",
            request.channel_mask(),
            request.attenuation()
        );
        match request {
            SamplingRequest::OneShot(req) => self
                .sample_once(req.channel, req.attenuation, req.sample_count)
                .map(Outcome::Sample),
            SamplingRequest::Continuous(req) => {
                self.start_continuous(&req).map(|()| Outcome::Streaming)
            }
        }
    }

    /// Tear down the hardware path owned by `session`. Call under the arbiter lock.
    pub(crate) fn teardown(&self, session: SessionKind) -> Result<(), HalError> {
        match session {
            SessionKind::Continuous => {
                // clear first so a racing delivery sees the callback or nothing
                self.slot.clear();
                let stopped = self.hal.stop_continuous();
                let deinit = self.hal.deinit_continuous();
                stopped.and(deinit)
            }
            SessionKind::TimeCritical(_) => {
                self.armed.disarm();
                self.hal.delete_oneshot_unit()
            }
            // the bracket in `sample_once` deletes its own unit
            SessionKind::OneShot | SessionKind::Idle | SessionKind::Reserved => Ok(()),
        }
    }
}

pub(crate) fn check_mask(mask: ChannelMask) -> Result<(), AdcError> {
    if mask.is_empty() {
        return Err(AdcError::InvalidArgument("empty channel mask"));
    }
    if !mask.is_within_unit() {
        return Err(AdcError::InvalidArgument("channel mask names no valid channel"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Attenuation, Channel};
    use crate::continuous::ContinuousRequest;
    use crate::error::HalOp;
    use crate::oneshot::OneShotRequest;
    use crate::testing::{Call, RecordingHal};

    fn controller(hal: RecordingHal) -> AdcController<RecordingHal> {
        AdcController::new(hal, ControllerConfig::default())
    }

    fn mask(bits: u16) -> ChannelMask {
        ChannelMask::from_bits(bits)
    }

    fn on_frame(_frame: &[u8]) -> bool {
        false
    }

    #[test]
    fn test_reserve_and_release() {
        let ctrl = controller(RecordingHal::new());

        ctrl.try_reserve(mask(0b0110)).unwrap();
        ctrl.try_reserve(mask(0b0110)).unwrap();
        assert_eq!(
            ctrl.try_reserve(mask(0b0010)),
            Err(AdcError::ResourceBusy {
                active: mask(0b0110),
                requested: mask(0b0010)
            })
        );

        assert_eq!(ctrl.snapshot().session, SessionKind::Reserved);
        ctrl.release(mask(0b0110)).unwrap();
        assert!(ctrl.is_available());

        // a plain reservation never touches hardware
        assert!(ctrl.hal().calls().is_empty());
    }

    #[test]
    fn test_release_mismatch_keeps_session() {
        let ctrl = controller(RecordingHal::new());

        assert!(matches!(
            ctrl.release(mask(0b1)),
            Err(AdcError::StateMismatch { .. })
        ));

        ctrl.try_reserve(mask(0b11)).unwrap();
        let err = ctrl.release(mask(0b01)).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ctrl.snapshot().active_mask, mask(0b11));
    }

    #[test]
    fn test_empty_or_stray_mask_is_invalid() {
        let ctrl = controller(RecordingHal::new());
        assert!(matches!(
            ctrl.try_reserve(ChannelMask::EMPTY),
            Err(AdcError::InvalidArgument(_))
        ));
        assert!(matches!(
            ctrl.try_reserve(mask(0x0400)),
            Err(AdcError::InvalidArgument(_))
        ));
        assert!(ctrl.is_available());
    }

    #[test]
    fn test_release_tears_down_continuous() {
        let ctrl = controller(RecordingHal::new());
        let request = ContinuousRequest {
            channel_mask: mask(0b101),
            attenuation: Attenuation::Db6,
            samples_per_channel: 4,
            sample_rate_hz: 10_000,
            frame_callback: Some(on_frame),
        };
        ctrl.start_continuous(&request).unwrap();

        ctrl.release(mask(0b101)).unwrap();
        assert!(ctrl.is_available());
        assert!(!ctrl.frame_slot().is_armed());
        assert_eq!(ctrl.hal().count(&Call::StopContinuous), 1);
        assert_eq!(ctrl.hal().count(&Call::DeinitContinuous), 1);
    }

    #[test]
    fn test_reinit_recovers_from_failed_teardown() {
        let ctrl = controller(RecordingHal::new());
        ctrl.setup_time_critical(Channel::Ch2, Attenuation::Db12).unwrap();

        ctrl.hal().fail_on(HalOp::DeleteOneShotUnit);
        let err = ctrl.reinit().unwrap_err();
        assert!(err.requires_reinit());

        // idle regardless, and the fast path is disarmed
        assert!(ctrl.is_available());
        assert!(ctrl.sample_time_critical(Channel::Ch2, 1).is_err());

        ctrl.hal().heal();
        ctrl.sample_once(Channel::Ch3, Attenuation::Db0, 1).unwrap();
    }

    #[test]
    fn test_start_sampling_dispatches_by_variant() {
        let ctrl = controller(RecordingHal::with_reads(&[100, 200]));

        let outcome = ctrl
            .start_sampling(SamplingRequest::OneShot(OneShotRequest {
                channel: Channel::Ch1,
                attenuation: Attenuation::Db12,
                sample_count: 2,
            }))
            .unwrap();
        assert_eq!(outcome, Outcome::Sample(150));
        assert!(ctrl.is_available());

        let outcome = ctrl
            .start_sampling(SamplingRequest::Continuous(ContinuousRequest {
                channel_mask: mask(0b11),
                attenuation: Attenuation::Db12,
                samples_per_channel: 16,
                sample_rate_hz: 1_000,
                frame_callback: Some(on_frame),
            }))
            .unwrap();
        assert_eq!(outcome, Outcome::Streaming);
        assert_eq!(ctrl.snapshot().session, SessionKind::Continuous);
    }
}
