//! Channel Arbiter - admission control over the shared ADC unit
//!
//! The arbiter owns the set of channels currently reserved. A request is
//! admitted when nothing is reserved, or when it names exactly the reserved
//! set (re-entry by the session that already owns it). Every read and write
//! of the reservation goes through one `critical_section::Mutex`.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::channel::{Channel, ChannelMask};
use crate::error::AdcError;

/// Which sampling discipline owns the hardware path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionKind {
    Idle,
    /// Channels reserved with no hardware path configured yet.
    Reserved,
    /// A one-shot bracket is converting.
    OneShot,
    TimeCritical(Channel),
    Continuous,
}

/// Point-in-time copy of the reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Snapshot {
    pub active_mask: ChannelMask,
    pub session: SessionKind,
}

#[derive(Debug)]
pub(crate) struct ReservationState {
    pub(crate) active_mask: ChannelMask,
    pub(crate) session: SessionKind,
}

impl ReservationState {
    const IDLE: ReservationState = ReservationState {
        active_mask: ChannelMask::EMPTY,
        session: SessionKind::Idle,
    };

    pub(crate) fn is_idle(&self) -> bool {
        self.active_mask.is_empty()
    }

    pub(crate) fn set(&mut self, mask: ChannelMask, session: SessionKind) {
        self.active_mask = mask;
        self.session = session;
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::IDLE;
    }

    /// The admission rule shared by every discipline.
    ///
    /// On success returns the session that held `requested` beforehand,
    /// `Idle` when the unit was free (the mask is then marked `Reserved`).
    pub(crate) fn admit(&mut self, requested: ChannelMask) -> Result<SessionKind, AdcError> {
        if self.is_idle() {
            self.set(requested, SessionKind::Reserved);
            Ok(SessionKind::Idle)
        } else if self.active_mask == requested {
            Ok(self.session)
        } else {
            Err(self.busy(requested))
        }
    }

    /// Undo an admission, returning `mask` to the session it had before.
    pub(crate) fn restore(&mut self, mask: ChannelMask, prior: SessionKind) {
        match prior {
            SessionKind::Idle => self.clear(),
            session => self.set(mask, session),
        }
    }

    pub(crate) fn busy(&self, requested: ChannelMask) -> AdcError {
        AdcError::ResourceBusy {
            active: self.active_mask,
            requested,
        }
    }

    pub(crate) fn mismatch(&self, requested: ChannelMask) -> AdcError {
        AdcError::StateMismatch {
            active: self.active_mask,
            requested,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            active_mask: self.active_mask,
            session: self.session,
        }
    }
}

pub struct ChannelArbiter {
    state: Mutex<RefCell<ReservationState>>,
}

impl ChannelArbiter {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(ReservationState::IDLE)),
        }
    }

    /// Reserve `requested`, or re-enter a reservation of exactly `requested`.
    pub fn try_reserve(&self, requested: ChannelMask) -> bool {
        if requested.is_empty() {
            return false;
        }
        self.with_state(|state| state.admit(requested).is_ok())
    }

    /// Clear the reservation if `requested` is exactly what is reserved.
    pub fn release(&self, requested: ChannelMask) -> bool {
        if requested.is_empty() {
            return false;
        }
        self.with_state(|state| {
            if state.active_mask == requested {
                state.clear();
                true
            } else {
                false
            }
        })
    }

    pub fn is_available(&self) -> bool {
        self.with_state(|state| state.is_idle())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.with_state(|state| state.snapshot())
    }

    /// Run `f` with exclusive access to the reservation.
    ///
    /// Must not be nested.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ReservationState) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }
}

impl Default for ChannelArbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn mask(bits: u16) -> ChannelMask {
        ChannelMask::from_bits(bits)
    }

    #[test]
    fn test_overlapping_mask_is_rejected() {
        let arbiter = ChannelArbiter::new();
        assert!(arbiter.try_reserve(mask(0b0011)));

        // overlaps but differs
        assert!(!arbiter.try_reserve(mask(0b0110)));
        // strict subset
        assert!(!arbiter.try_reserve(mask(0b0001)));
        // disjoint
        assert!(!arbiter.try_reserve(mask(0b1000)));

        assert_eq!(arbiter.snapshot().active_mask, mask(0b0011));
    }

    #[test]
    fn test_reentry_is_idempotent() {
        let arbiter = ChannelArbiter::new();
        assert!(arbiter.try_reserve(mask(0b0101)));
        assert!(arbiter.try_reserve(mask(0b0101)));
        assert!(!arbiter.is_available());

        assert!(arbiter.release(mask(0b0101)));
        assert!(arbiter.is_available());
        assert_eq!(arbiter.snapshot().session, SessionKind::Idle);
    }

    #[test]
    fn test_release_requires_exact_mask() {
        let arbiter = ChannelArbiter::new();

        // nothing reserved
        assert!(!arbiter.release(mask(0b0001)));
        assert!(arbiter.is_available());

        assert!(arbiter.try_reserve(mask(0b0011)));
        assert!(!arbiter.release(mask(0b0001)));
        assert!(!arbiter.release(mask(0b0111)));
        assert_eq!(arbiter.snapshot().active_mask, mask(0b0011));
    }

    #[test]
    fn test_empty_mask_never_reserves() {
        let arbiter = ChannelArbiter::new();
        assert!(!arbiter.try_reserve(ChannelMask::EMPTY));
        assert!(!arbiter.release(ChannelMask::EMPTY));
        assert!(arbiter.is_available());
    }

    #[test]
    fn test_concurrent_reserve_admits_one() {
        let arbiter = Arc::new(ChannelArbiter::new());

        let handles: Vec<_> = (0..8u16)
            .map(|i| {
                let arbiter = Arc::clone(&arbiter);
                thread::spawn(move || arbiter.try_reserve(mask(1 << i)))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(arbiter.snapshot().active_mask.channel_count(), 1);
    }
}
