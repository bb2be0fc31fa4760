//! # ISP processor
//!
//! [`IspProcessor`] represents one image signal processor instance. It owns
//! the [`IspHal`] implementation and records which controller currently owns
//! each of its single-instance statistics blocks.
//!
//! Claiming is the only way to obtain exclusive access to the AWB block: a
//! claim succeeds only while the slot is empty, and the returned [`AwbClaim`]
//! guard empties the slot again when dropped.

use core::cell::Cell;

use critical_section::Mutex;
use portable_atomic::{AtomicU32, Ordering};

use crate::{Error, hal::IspHal};

/// Identity of a controller, used to tag the claim slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerId(u32);

impl ControllerId {
    /// Returns a process-wide unique id.
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU32 = AtomicU32::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// An image signal processor and its statistics block ownership.
pub struct IspProcessor<H> {
    hal: H,
    awb_owner: Mutex<Cell<Option<ControllerId>>>,
}

impl<H: IspHal> IspProcessor<H> {
    /// Wraps the register access of one ISP instance.
    pub const fn new(hal: H) -> Self {
        Self {
            hal,
            awb_owner: Mutex::new(Cell::new(None)),
        }
    }

    /// Register access to this ISP.
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// The controller currently owning the AWB block, if any.
    pub fn awb_owner(&self) -> Option<ControllerId> {
        critical_section::with(|cs| self.awb_owner.borrow(cs).get())
    }

    /// Claims the AWB block for `id`.
    ///
    /// Fails with [`Error::NoResource`] if another controller owns it.
    pub(crate) fn claim_awb(&self, id: ControllerId) -> Result<AwbClaim<'_, H>, Error> {
        let claimed = critical_section::with(|cs| {
            let owner = self.awb_owner.borrow(cs);
            if owner.get().is_none() {
                owner.set(Some(id));
                true
            } else {
                false
            }
        });

        if claimed {
            Ok(AwbClaim { isp: self, id })
        } else {
            Err(Error::NoResource)
        }
    }

    /// Empties the AWB slot if it still belongs to `id`.
    fn release_awb(&self, id: ControllerId) {
        critical_section::with(|cs| {
            let owner = self.awb_owner.borrow(cs);
            if owner.get() == Some(id) {
                owner.set(None);
            }
        });
    }
}

/// Ownership of the AWB block of an [`IspProcessor`].
///
/// The block is released when the guard is dropped.
pub(crate) struct AwbClaim<'d, H: IspHal> {
    isp: &'d IspProcessor<H>,
    id: ControllerId,
}

impl<'d, H: IspHal> AwbClaim<'d, H> {
    pub(crate) fn isp(&self) -> &'d IspProcessor<H> {
        self.isp
    }

    pub(crate) fn id(&self) -> ControllerId {
        self.id
    }
}

impl<H: IspHal> Drop for AwbClaim<'_, H> {
    fn drop(&mut self) {
        self.isp.release_awb(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockIsp;

    #[test]
    fn claim_is_exclusive() {
        let isp = IspProcessor::new(MockIsp::new());
        let first = ControllerId::next();
        let second = ControllerId::next();

        let claim = isp.claim_awb(first).unwrap();
        assert_eq!(isp.awb_owner(), Some(first));
        assert_eq!(claim.id(), first);

        assert_eq!(isp.claim_awb(second).err(), Some(Error::NoResource));
        assert_eq!(isp.awb_owner(), Some(first));

        drop(claim);
        assert_eq!(isp.awb_owner(), None);

        let claim = isp.claim_awb(second).unwrap();
        assert_eq!(claim.id(), second);
    }

    #[test]
    fn release_ignores_foreign_owner() {
        let isp = IspProcessor::new(MockIsp::new());
        let owner = ControllerId::next();
        let stranger = ControllerId::next();

        let _claim = isp.claim_awb(owner).unwrap();
        isp.release_awb(stranger);

        assert_eq!(isp.awb_owner(), Some(owner));
    }

    #[test]
    fn ids_are_unique() {
        let a = ControllerId::next();
        let b = ControllerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn concurrent_claims_admit_one_owner() {
        const THREADS: usize = 8;
        let isp = IspProcessor::new(MockIsp::new());
        let barrier = std::sync::Barrier::new(THREADS);

        let winners = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        let claim = isp.claim_awb(ControllerId::next());
                        // Hold the claim until every thread has tried.
                        barrier.wait();
                        claim.is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });

        assert_eq!(winners, 1);
    }
}
