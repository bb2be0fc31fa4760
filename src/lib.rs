//! # Auto White Balance (AWB) statistics driver for the ESP image signal processor
//!
//! ## Overview
//!
//! The image signal processor (ISP) contains a single white-patch statistics
//! block. Every frame it can accumulate the red, green and blue sums of the
//! pixels that fall into a configurable window and acceptance ranges, and
//! raise an interrupt when the accumulation is done.
//!
//! This crate arbitrates exclusive access to that block, programs it, and
//! hands the per-frame [`awb::AwbStatistics`] from interrupt context to the
//! task that is waiting for it. Two operating modes are supported:
//!
//! - one-shot: [`awb::AwbController::oneshot_statistics`] triggers one
//!   measurement and blocks (optionally with a timeout) until it completes.
//! - continuous: [`awb::AwbController::start_continuous`] keeps the block
//!   re-arming from the interrupt handler until
//!   [`awb::AwbController::stop_continuous`] is called.
//!
//! Register-level programming is delegated to an [`hal::IspHal`]
//! implementation, and wiring the interrupt vector to
//! [`awb::AwbInterruptHandler::on_interrupt`] is up to the application.
//!
//! ## Example
//!
//! ```rust, ignore
//! use esp_isp_awb::{awb::{AwbConfig, AwbController}, processor::IspProcessor};
//!
//! let isp = IspProcessor::new(hal);
//! let awb = AwbController::new(&isp, &AwbConfig::default(), delay)?;
//!
//! awb.enable()?;
//! let stats = awb.oneshot_statistics(100)?;
//! awb.disable()?;
//! awb.delete().map_err(|(_, err)| err)?;
//! ```
//!
//! ## Feature Flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]
#![doc(html_logo_url = "https://avatars.githubusercontent.com/u/46717278")]
#![deny(missing_docs, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

// MUST be the first module
mod fmt;

pub mod awb;
pub mod hal;
pub mod processor;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_utils;

/// AWB driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// An argument or a configuration value is malformed or out of range.
    InvalidArgument,
    /// The operation is not allowed in the current controller state, or the
    /// statistics block is busy with another measurement.
    InvalidState,
    /// The statistics block is already owned by another controller, or a
    /// resource such as the interrupt could not be allocated.
    NoResource,
    /// The statistics did not become available before the deadline.
    Timeout,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::InvalidState => write!(f, "invalid state"),
            Error::NoResource => write!(f, "no resource available"),
            Error::Timeout => write!(f, "timed out"),
        }
    }
}

impl core::error::Error for Error {}
