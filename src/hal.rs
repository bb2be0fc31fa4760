//! # ISP hardware control surface
//!
//! ## Overview
//!
//! The AWB driver never touches registers itself. Everything it needs from the
//! image signal processor goes through [`IspHal`]: toggling the statistics
//! block, programming its window and acceptance ranges, reading the
//! accumulators and managing the ISP interrupt.
//!
//! Methods take `&self` because they are called both from task context and
//! from the interrupt handler. Implementations are expected to be thin
//! wrappers around volatile register accesses.

use enumset::{EnumSet, EnumSetType};

use crate::Error;

/// Interrupt allocation flag selecting any of the low and medium priority
/// levels (1 to 3).
pub const INTR_FLAG_LOWMED: u32 = 0b1110;

/// Interrupt events raised by the image signal processor.
#[derive(Debug, EnumSetType)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IspInterrupt {
    /// The auto-exposure block finished a frame.
    AeFrameDone,
    /// The auto-focus block detected an environment change.
    AfEnvChange,
    /// The auto white balance block finished accumulating a frame.
    AwbFrameDone,
    /// The histogram block finished a frame.
    HistogramDone,
}

impl IspInterrupt {
    /// Events owned by the AWB statistics block.
    pub fn awb_mask() -> EnumSet<IspInterrupt> {
        IspInterrupt::AwbFrameDone.into()
    }
}

/// Interrupt priority requested when allocating the ISP interrupt.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    /// Let the allocator pick a low or medium priority level.
    #[default]
    None = 0,
    /// Priority level 1.
    Priority1,
    /// Priority level 2.
    Priority2,
    /// Priority level 3.
    Priority3,
    /// Priority level 4.
    Priority4,
    /// Priority level 5.
    Priority5,
    /// Priority level 6.
    Priority6,
    /// Priority level 7.
    Priority7,
}

impl Priority {
    /// Maximum interrupt priority
    pub const fn max() -> Priority {
        Priority::Priority7
    }

    /// Interrupt allocation flags for this priority.
    ///
    /// An explicit level `n` selects the single priority bit `1 << n`,
    /// [`Priority::None`] selects [`INTR_FLAG_LOWMED`].
    pub const fn alloc_flags(self) -> u32 {
        match self {
            Priority::None => INTR_FLAG_LOWMED,
            level => 1 << level as u32,
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Ok(match level {
            0 => Priority::None,
            1 => Priority::Priority1,
            2 => Priority::Priority2,
            3 => Priority::Priority3,
            4 => Priority::Priority4,
            5 => Priority::Priority5,
            6 => Priority::Priority6,
            7 => Priority::Priority7,
            _ => return Err(Error::InvalidArgument),
        })
    }
}

/// Where in the pipeline the AWB block samples the pixels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SamplePoint {
    /// Sample before the color correction matrix.
    #[default]
    BeforeCcm,
    /// Sample after the color correction matrix.
    AfterCcm,
}

/// A pixel coordinate in the frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Coordinate {
    /// Column
    pub x: u32,
    /// Row
    pub y: u32,
}

impl Coordinate {
    /// Creates a coordinate.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Rectangular statistics window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Window {
    /// Top left pixel of the window.
    pub top_left: Coordinate,
    /// Bottom right pixel of the window.
    pub btm_right: Coordinate,
}

impl Window {
    /// Creates a window spanning `top_left` to `btm_right`.
    pub const fn new(top_left: Coordinate, btm_right: Coordinate) -> Self {
        Self {
            top_left,
            btm_right,
        }
    }

    /// Whether the corners describe a non-empty rectangle.
    pub fn is_valid(&self) -> bool {
        self.top_left.x < self.btm_right.x && self.top_left.y < self.btm_right.y
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::new(Coordinate::new(0, 0), Coordinate::new(1920, 1080))
    }
}

/// Register-level access to the image signal processor.
///
/// Methods named `awb_*` act on the AWB statistics block only. The
/// `interrupt_*` methods manage the ISP interrupt source shared by all ISP
/// sub-blocks; the AWB driver allocates it once per controller.
///
/// Every method that is reachable from [`crate::awb::AwbInterruptHandler`]
/// (`check_clear_interrupts`, the accumulator reads and `awb_enable`) must not
/// block.
pub trait IspHal {
    /// Starts (`true`) or stops (`false`) the white patch accumulation.
    fn awb_enable(&self, enable: bool);

    /// Switches the block between the white patch algorithm and bypass.
    fn awb_enable_algorithm_mode(&self, enable: bool);

    /// Gates the clock of the AWB block.
    fn awb_clk_enable(&self, enable: bool);

    /// Selects the sampling point.
    fn awb_set_sample_point(&self, sample_point: SamplePoint);

    /// Programs the statistics window.
    ///
    /// Returns `false` if the window exceeds the hardware limits.
    fn awb_set_window_range(&self, window: &Window) -> bool;

    /// Programs the accepted luminance (R+G+B) range.
    ///
    /// Returns `false` if the range exceeds the hardware limits.
    fn awb_set_luminance_range(&self, min: u32, max: u32) -> bool;

    /// Programs the accepted red to green ratio range.
    ///
    /// Returns `false` if the range can't be represented by the hardware.
    fn awb_set_rg_ratio_range(&self, min: f32, max: f32) -> bool;

    /// Programs the accepted blue to green ratio range.
    ///
    /// Returns `false` if the range can't be represented by the hardware.
    fn awb_set_bg_ratio_range(&self, min: f32, max: f32) -> bool;

    /// Number of pixels that passed the white patch filter in the last frame.
    fn awb_white_patch_count(&self) -> u32;

    /// Accumulated red value of the last frame.
    fn awb_accumulated_r(&self) -> u32;

    /// Accumulated green value of the last frame.
    fn awb_accumulated_g(&self) -> u32;

    /// Accumulated blue value of the last frame.
    fn awb_accumulated_b(&self) -> u32;

    /// Arms or disarms the given interrupt events.
    fn enable_interrupts(&self, events: EnumSet<IspInterrupt>, enable: bool);

    /// Returns the pending events among `mask` and clears them.
    fn check_clear_interrupts(&self, mask: EnumSet<IspInterrupt>) -> EnumSet<IspInterrupt>;

    /// Allocates the ISP interrupt for the events in `mask`.
    ///
    /// The interrupt starts out disabled.
    fn interrupt_allocate(&self, priority: Priority, mask: EnumSet<IspInterrupt>)
    -> Result<(), Error>;

    /// Enables the allocated interrupt line.
    fn interrupt_enable(&self);

    /// Disables the allocated interrupt line.
    fn interrupt_disable(&self);

    /// Releases the allocated interrupt.
    fn interrupt_free(&self);

    /// Whether code at `addr` can run while the flash cache is disabled.
    fn is_isr_safe_code(&self, addr: usize) -> bool {
        let _ = addr;
        true
    }

    /// Whether data at `addr` lives in internal RAM.
    fn is_internal_ram(&self, addr: usize) -> bool {
        let _ = addr;
        true
    }
}
