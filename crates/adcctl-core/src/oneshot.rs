//! One-shot and time-critical sampling
//!
//! Both disciplines drive the unit's one-shot path and average a burst of
//! blocking conversions on a single channel:
//!
//! - `sample_once` reserves, configures, converts and releases in one call.
//!   Only the configure and teardown steps hold the arbiter lock; the
//!   conversions run outside it.
//! - `setup_time_critical` configures once, after which
//!   `sample_time_critical` can be called repeatedly from a latency-sensitive
//!   context. It never takes the lock, logs or allocates; it checks a
//!   lock-free copy of the armed channel instead.

use core::sync::atomic::{AtomicU8, Ordering};

use crate::arbiter::SessionKind;
use crate::channel::{Attenuation, Channel, ChannelMask};
use crate::controller::AdcController;
use crate::error::{AdcError, HalError};
use crate::hal::AdcHal;

const NOT_ARMED: u8 = u8::MAX;

/// Parameters of a single-phase one-shot read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneShotRequest {
    pub channel: Channel,
    pub attenuation: Attenuation,
    pub sample_count: u32,
}

impl OneShotRequest {
    pub fn validate(&self) -> Result<(), AdcError> {
        check_count(self.sample_count)
    }
}

/// Channel the time-critical path is configured for, readable without the lock.
pub(crate) struct ArmedChannel(AtomicU8);

impl ArmedChannel {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(NOT_ARMED))
    }

    pub(crate) fn arm(&self, channel: Channel) {
        self.0.store(channel.index(), Ordering::Release);
    }

    pub(crate) fn disarm(&self) {
        self.0.store(NOT_ARMED, Ordering::Release);
    }

    pub(crate) fn get(&self) -> Option<Channel> {
        Channel::try_from(self.0.load(Ordering::Acquire)).ok()
    }
}

fn check_count(sample_count: u32) -> Result<(), AdcError> {
    if sample_count == 0 {
        return Err(AdcError::InvalidArgument("sample_count must be non-zero"));
    }
    Ok(())
}

/// Floor mean of `sample_count` conversions. `sample_count` must be non-zero.
pub(crate) fn read_average<H: AdcHal>(
    hal: &H,
    channel: Channel,
    sample_count: u32,
) -> Result<u16, HalError> {
    let mut sum: u64 = 0;
    for _ in 0..sample_count {
        sum += hal.read_oneshot(channel)? as u64;
    }
    Ok((sum / sample_count as u64).min(u16::MAX as u64) as u16)
}

impl<H: AdcHal> AdcController<H> {
    /// Reserve `channel`, average `sample_count` conversions and release it.
    ///
    /// A caller that reserved exactly this channel beforehand keeps its
    /// reservation afterwards. On any failure after admission the
    /// reservation is rolled back before the error is returned. While the
    /// conversions run, the session can be neither released nor reinitialised.
    pub fn sample_once(
        &self,
        channel: Channel,
        attenuation: Attenuation,
        sample_count: u32,
    ) -> Result<u16, AdcError> {
        check_count(sample_count)?;
        let mask = channel.mask();

        let prior = self
            .arbiter
            .with_state(|state| {
                let prior = state.admit(mask)?;
                if !matches!(prior, SessionKind::Idle | SessionKind::Reserved) {
                    return Err(state.busy(mask));
                }
                if let Err(e) = self.configure_oneshot(channel, attenuation) {
                    state.restore(mask, prior);
                    return Err(AdcError::from(e));
                }
                state.session = SessionKind::OneShot;
                Ok(prior)
            })
            .inspect_err(|e| log::warn!("one-shot on {} rejected: {}", channel, e))?;

        let reading = read_average(&self.hal, channel, sample_count);

        let teardown = self.arbiter.with_state(|state| {
            // the unit and the mask belong to someone else now
            if state.active_mask != mask || state.session != SessionKind::OneShot {
                return Err(state.mismatch(mask));
            }
            let result = self.hal.delete_oneshot_unit();
            state.restore(mask, prior);
            result.map_err(AdcError::from)
        });

        let value = reading.inspect_err(|e| log::error!("one-shot read on {} failed: {}", channel, e))?;
        teardown.inspect_err(|e| log::error!("one-shot teardown on {} failed: {}", channel, e))?;
        log::trace!("one-shot {} x{} -> {}", channel, sample_count, value);
        Ok(value)
    }

    /// Reserve `channel` and configure the one-shot path for repeated
    /// [`sample_time_critical`](Self::sample_time_critical) calls.
    ///
    /// Calling it again for the armed channel only reprograms the attenuation.
    pub fn setup_time_critical(
        &self,
        channel: Channel,
        attenuation: Attenuation,
    ) -> Result<(), AdcError> {
        let mask = channel.mask();
        self.arbiter
            .with_state(|state| {
                let prior = state.admit(mask)?;
                let configured = match prior {
                    SessionKind::Idle | SessionKind::Reserved => {
                        self.configure_oneshot(channel, attenuation)
                    }
                    SessionKind::TimeCritical(armed) if armed == channel => self
                        .hal
                        .configure_oneshot_channel(channel, attenuation, self.config.bit_width)
                        .inspect_err(|_| {
                            // the unit is in an unknown state; drop the whole session
                            self.armed.disarm();
                            let _ = self.hal.delete_oneshot_unit();
                        }),
                    _ => return Err(state.busy(mask)),
                };
                if let Err(e) = configured {
                    match prior {
                        SessionKind::TimeCritical(_) => state.clear(),
                        _ => state.restore(mask, prior),
                    }
                    return Err(AdcError::from(e));
                }
                state.session = SessionKind::TimeCritical(channel);
                self.armed.arm(channel);
                Ok(())
            })
            .inspect(|_| log::debug!("time-critical sampling armed on {}", channel))
            .inspect_err(|e| log::warn!("time-critical setup on {} failed: {}", channel, e))
    }

    /// Average `sample_count` conversions on the armed channel.
    ///
    /// No reconfiguration, no lock, no logging, no allocation.
    pub fn sample_time_critical(&self, channel: Channel, sample_count: u32) -> Result<u16, AdcError> {
        check_count(sample_count)?;
        match self.armed.get() {
            Some(armed) if armed == channel => {}
            Some(armed) => {
                return Err(AdcError::ResourceBusy {
                    active: armed.mask(),
                    requested: channel.mask(),
                });
            }
            None => {
                return Err(AdcError::StateMismatch {
                    active: ChannelMask::EMPTY,
                    requested: channel.mask(),
                });
            }
        }
        read_average(&self.hal, channel, sample_count).map_err(AdcError::from)
    }

    /// End a time-critical session on `channel` and delete the one-shot unit.
    pub fn release_time_critical(&self, channel: Channel) -> Result<(), AdcError> {
        let mask = channel.mask();
        self.arbiter
            .with_state(|state| {
                if state.active_mask != mask || state.session != SessionKind::TimeCritical(channel) {
                    return Err(state.mismatch(mask));
                }
                self.armed.disarm();
                let result = self.hal.delete_oneshot_unit();
                state.clear();
                result.map_err(AdcError::from)
            })
            .inspect(|_| log::debug!("time-critical sampling released on {}", channel))
            .inspect_err(|e| log::warn!("time-critical release on {} failed: {}", channel, e))
    }

    fn configure_oneshot(&self, channel: Channel, attenuation: Attenuation) -> Result<(), HalError> {
        self.hal.create_oneshot_unit()?;
        if let Err(e) = self
            .hal
            .configure_oneshot_channel(channel, attenuation, self.config.bit_width)
        {
            let _ = self.hal.delete_oneshot_unit();
            return Err(e);
        }
        Ok(())
    }
}
