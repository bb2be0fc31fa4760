//! # Interrupt-safe handoff primitives
//!
//! The AWB driver hands results from its interrupt handler to tasks through
//! two tiny primitives:
//!
//! - [`Gate`]: a binary token meaning "no measurement is outstanding".
//! - [`Mailbox`]: a single-slot channel whose writes always succeed and
//!   replace the previous value.
//!
//! Neither allocates. Writers never block, readers wait by polling with an
//! [`embedded_hal::delay::DelayNs`] time base until a [`Timeout`] expires.
//!
//! Waits are counted in ticks of one millisecond. A wait of `n` ms polls
//! `n + 1` times with a one-tick delay in between, so the overshoot is bounded
//! by the polling overhead of `n` ticks rather than dominated by it.

use embedded_hal::delay::DelayNs;

pub use self::{gate::Gate, mailbox::Mailbox};

mod gate;
mod mailbox;

/// Interval between two polls of a blocking wait, in milliseconds.
const TICK_MS: u32 = 1;

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Check once and return immediately.
    NoWait,
    /// Wait up to the given number of milliseconds.
    Millis(u32),
    /// Wait until the operation completes.
    Forever,
}

impl Timeout {
    /// Whether waiting is allowed at all.
    pub fn may_block(self) -> bool {
        self != Timeout::NoWait
    }
}

impl From<i32> for Timeout {
    /// Converts a signed millisecond count: negative waits forever, zero
    /// doesn't wait.
    fn from(ms: i32) -> Self {
        match ms {
            ms if ms < 0 => Timeout::Forever,
            0 => Timeout::NoWait,
            ms => Timeout::Millis(ms as u32),
        }
    }
}

/// Calls `poll` until it yields a value or `timeout` expires.
///
/// `poll` is always called at least once.
pub(crate) fn poll_until<T>(
    timeout: Timeout,
    delay: &mut impl DelayNs,
    mut poll: impl FnMut() -> Option<T>,
) -> Option<T> {
    let mut remaining_ticks = match timeout {
        Timeout::NoWait => return poll(),
        Timeout::Millis(ms) => Some(ms.div_ceil(TICK_MS)),
        Timeout::Forever => None,
    };

    loop {
        if let Some(value) = poll() {
            return Some(value);
        }

        if let Some(remaining) = remaining_ticks.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        delay.delay_ms(TICK_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StdDelay;

    #[test]
    fn timeout_from_signed_millis() {
        assert_eq!(Timeout::from(-1), Timeout::Forever);
        assert_eq!(Timeout::from(i32::MIN), Timeout::Forever);
        assert_eq!(Timeout::from(0), Timeout::NoWait);
        assert_eq!(Timeout::from(250), Timeout::Millis(250));
        assert!(!Timeout::NoWait.may_block());
        assert!(Timeout::Millis(1).may_block());
    }

    #[test]
    fn no_wait_polls_exactly_once() {
        let mut calls = 0;
        let result: Option<()> = poll_until(Timeout::NoWait, &mut StdDelay, || {
            calls += 1;
            None
        });
        assert_eq!(result, None);
        assert_eq!(calls, 1);
    }

    #[test]
    fn bounded_wait_gives_up() {
        let start = std::time::Instant::now();
        let result: Option<()> = poll_until(Timeout::Millis(5), &mut StdDelay, || None);
        assert_eq!(result, None);
        assert!(start.elapsed() >= std::time::Duration::from_millis(5));
    }

    #[test]
    fn bounded_wait_does_not_overrun() {
        let mut polls = 0;
        let start = std::time::Instant::now();
        let result: Option<()> = poll_until(Timeout::Millis(50), &mut StdDelay, || {
            polls += 1;
            None
        });
        let elapsed = start.elapsed();

        assert_eq!(result, None);
        assert_eq!(polls, 51);
        assert!(elapsed >= std::time::Duration::from_millis(50));
        assert!(
            elapsed < std::time::Duration::from_millis(250),
            "waited {elapsed:?}"
        );
    }

    #[test]
    fn wait_returns_first_value() {
        let mut countdown = 3;
        let result = poll_until(Timeout::Forever, &mut StdDelay, || {
            countdown -= 1;
            (countdown == 0).then_some(42)
        });
        assert_eq!(result, Some(42));
    }
}
