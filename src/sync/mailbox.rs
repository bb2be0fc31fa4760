use core::cell::Cell;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;

use super::{Timeout, poll_until};

/// Single-slot channel with overwrite semantics.
///
/// [`Mailbox::overwrite`] always succeeds and replaces whatever was stored;
/// an unread value is lost. Only the latest value is ever observable.
pub struct Mailbox<T> {
    slot: Mutex<Cell<Option<T>>>,
}

impl<T: Copy> Mailbox<T> {
    /// Creates an empty mailbox.
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(None)),
        }
    }

    /// Stores `value`, discarding any unread one. Never blocks.
    pub fn overwrite(&self, value: T) {
        critical_section::with(|cs| self.slot.borrow(cs).set(Some(value)));
    }

    /// Discards the stored value, if any.
    pub fn reset(&self) {
        critical_section::with(|cs| self.slot.borrow(cs).set(None));
    }

    /// Removes and returns the stored value without waiting.
    pub fn try_receive(&self) -> Option<T> {
        critical_section::with(|cs| self.slot.borrow(cs).take())
    }

    /// Removes and returns the stored value, waiting up to `timeout` for one
    /// to arrive.
    pub fn receive(&self, timeout: Timeout, delay: &mut impl DelayNs) -> Option<T> {
        poll_until(timeout, delay, || self.try_receive())
    }

    /// Whether a value is waiting to be received.
    pub fn is_full(&self) -> bool {
        critical_section::with(|cs| self.slot.borrow(cs).get().is_some())
    }
}

impl<T: Copy> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StdDelay;

    #[test]
    fn latest_value_wins() {
        let mailbox = Mailbox::new();
        mailbox.overwrite(1u32);
        mailbox.overwrite(2);
        assert_eq!(mailbox.try_receive(), Some(2));
        assert_eq!(mailbox.try_receive(), None);
    }

    #[test]
    fn reset_discards() {
        let mailbox = Mailbox::new();
        mailbox.overwrite(7u32);
        assert!(mailbox.is_full());
        mailbox.reset();
        assert!(!mailbox.is_full());
        assert_eq!(mailbox.receive(Timeout::NoWait, &mut StdDelay), None);
    }

    #[test]
    fn receive_waits_for_writer() {
        let mailbox = Mailbox::new();

        let value = std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(5));
                mailbox.overwrite(99u32);
            });
            mailbox.receive(Timeout::Millis(1_000), &mut StdDelay)
        });

        assert_eq!(value, Some(99));
    }

    #[test]
    fn receive_times_out_when_empty() {
        let mailbox = Mailbox::<u32>::new();
        assert_eq!(mailbox.receive(Timeout::Millis(2), &mut StdDelay), None);
    }
}
