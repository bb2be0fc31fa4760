//! # Auto White Balance (AWB) statistics
//!
//! ## Overview
//!
//! [`AwbController`] owns the AWB statistics block of an [`IspProcessor`] for
//! as long as it lives. It moves through three states:
//!
//! ```text
//!            enable()               oneshot_statistics() / start_continuous()
//!   Init  ------------>  Enabled  -------------------------------------------->  Measuring
//!         <------------           <--------------------------------------------
//!            disable()              result delivered / timeout / stop_continuous()
//! ```
//!
//! Operations called from any other state fail with [`Error::InvalidState`]
//! and leave the controller untouched.
//!
//! Every finished frame raises the ISP interrupt. The application forwards it
//! to [`AwbInterruptHandler::on_interrupt`], which reads the accumulators,
//! calls the registered [`AwbCallbacks`] and publishes the result into a
//! single-slot mailbox. Only the latest result is kept.
//!
//! ## Configuration
//!
//! [`AwbConfig`] selects the sampling point, the interrupt priority, the
//! statistics window and the white patch acceptance ranges. It is applied
//! once, by [`AwbController::new`].
//!
//! ## Examples
//!
//! ### One-shot measurement
//!
//! ```rust, ignore
//! let awb = AwbController::new(&isp, &AwbConfig::default(), delay)?;
//! awb.enable()?;
//!
//! // Wait at most 100 ms for one frame of statistics.
//! let stats = awb.oneshot_statistics(100)?;
//! ```
//!
//! ### Continuous measurement
//!
//! ```rust, ignore
//! awb.enable()?;
//! awb.start_continuous()?;
//! loop {
//!     let stats = awb.continuous_statistics(Timeout::Forever)?;
//!     adjust_gains(&stats);
//! }
//! ```

use core::cell::Cell;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;
use portable_atomic::{AtomicU8, Ordering};

use crate::{
    Error,
    hal::{IspHal, IspInterrupt, Priority, SamplePoint, Window},
    processor::{AwbClaim, ControllerId, IspProcessor},
    sync::{Gate, Mailbox, Timeout, poll_until},
};


/// An inclusive `min..=max` range of a statistics acceptance criterion.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IspRange<T> {
    /// Lower bound
    pub min: T,
    /// Upper bound
    pub max: T,
}

impl<T> IspRange<T> {
    /// Creates a range.
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl IspRange<f32> {
    /// A ratio range must be non-negative and not empty.
    fn is_valid_ratio(&self) -> bool {
        self.min >= 0.0 && self.min < self.max
    }
}

/// White patch acceptance criteria.
///
/// A pixel contributes to the statistics only if its luminance (R+G+B) and
/// both of its color ratios fall into the configured ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WhitePatchConfig {
    /// Luminance range.
    pub luminance: IspRange<u32>,
    /// Red to green ratio range.
    pub red_green_ratio: IspRange<f32>,
    /// Blue to green ratio range.
    pub blue_green_ratio: IspRange<f32>,
}

impl Default for WhitePatchConfig {
    fn default() -> Self {
        Self {
            luminance: IspRange::new(0, 220 * 3),
            red_green_ratio: IspRange::new(0.0, 3.999),
            blue_green_ratio: IspRange::new(0.0, 3.999),
        }
    }
}

/// AWB controller configuration
#[derive(Debug, Default, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub struct AwbConfig {
    /// Where in the pipeline the statistics are sampled.
    pub sample_point: SamplePoint,
    /// Priority of the statistics interrupt.
    pub intr_priority: Priority,
    /// The statistics window.
    pub window: Window,
    /// White patch acceptance criteria.
    pub white_patch: WhitePatchConfig,
}

impl AwbConfig {
    /// Sets the sampling point.
    pub fn with_sample_point(mut self, sample_point: SamplePoint) -> Self {
        self.sample_point = sample_point;
        self
    }

    /// Sets the interrupt priority.
    pub fn with_intr_priority(mut self, intr_priority: Priority) -> Self {
        self.intr_priority = intr_priority;
        self
    }

    /// Sets the statistics window.
    pub fn with_window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    /// Sets the luminance range.
    pub fn with_luminance(mut self, luminance: IspRange<u32>) -> Self {
        self.white_patch.luminance = luminance;
        self
    }

    /// Sets the red to green ratio range.
    pub fn with_red_green_ratio(mut self, ratio: IspRange<f32>) -> Self {
        self.white_patch.red_green_ratio = ratio;
        self
    }

    /// Sets the blue to green ratio range.
    pub fn with_blue_green_ratio(mut self, ratio: IspRange<f32>) -> Self {
        self.white_patch.blue_green_ratio = ratio;
        self
    }
}

/// Statistics of one frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AwbStatistics {
    /// Number of pixels that passed the white patch criteria.
    pub white_patch_count: u32,
    /// Sum of the red channel of the white patch pixels.
    pub sum_r: u32,
    /// Sum of the green channel of the white patch pixels.
    pub sum_g: u32,
    /// Sum of the blue channel of the white patch pixels.
    pub sum_b: u32,
}

/// Data passed to [`AwbCallbacks::on_statistics_done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AwbEventData {
    /// The statistics of the frame that just finished.
    pub statistics: AwbStatistics,
}

/// Opaque user pointer handed back to the callbacks.
///
/// The driver never dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserContext(*mut ());

// SAFETY: the pointer is only stored and passed back to user code, which
// is responsible for synchronizing access to the pointee.
unsafe impl Send for UserContext {}
unsafe impl Sync for UserContext {}

impl UserContext {
    /// No user context.
    pub const fn null() -> Self {
        Self(core::ptr::null_mut())
    }

    /// Wraps a user pointer.
    pub const fn new<T>(ptr: *mut T) -> Self {
        Self(ptr.cast())
    }

    /// The wrapped pointer.
    pub const fn as_ptr(self) -> *mut () {
        self.0
    }

    /// Whether no context was supplied.
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::null()
    }
}

/// Called from interrupt context when a frame of statistics is ready.
///
/// `controller` identifies the controller that measured the frame, so one
/// callback can serve several processors.
///
/// Returns whether a higher priority task was woken and a context switch
/// should happen on interrupt exit.
pub type StatisticsDoneCallback =
    fn(controller: ControllerId, event: &AwbEventData, user_data: UserContext) -> bool;

/// Event callbacks of the AWB controller.
#[derive(Debug, Default, Clone, Copy)]
pub struct AwbCallbacks {
    /// Invoked when a statistics frame is done.
    pub on_statistics_done: Option<StatisticsDoneCallback>,
}

/// A callback that passed the interrupt placement checks.
#[derive(Clone, Copy)]
struct IsrCallback {
    on_statistics_done: StatisticsDoneCallback,
    user_data: UserContext,
}

impl IsrCallback {
    fn check(
        hal: &impl IspHal,
        callbacks: AwbCallbacks,
        user_data: UserContext,
    ) -> Result<Option<Self>, Error> {
        let Some(on_statistics_done) = callbacks.on_statistics_done else {
            return Ok(None);
        };

        if !hal.is_isr_safe_code(on_statistics_done as usize) {
            warn!("on_statistics_done callback is not placed in internal RAM");
            return Err(Error::InvalidArgument);
        }
        if !user_data.is_null() && !hal.is_internal_ram(user_data.as_ptr() as usize) {
            warn!("user context is not placed in internal RAM");
            return Err(Error::InvalidArgument);
        }

        Ok(Some(Self {
            on_statistics_done,
            user_data,
        }))
    }
}

/// Externally observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Created, interrupt and clock off.
    Init,
    /// Interrupt and clock on, no measurement outstanding.
    Enabled,
    /// A one-shot or continuous measurement is in flight.
    Measuring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
enum Fsm {
    Init = 0,
    Enabled,
    OneShot,
    Continuous,
}

impl Fsm {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Fsm::Init,
            1 => Fsm::Enabled,
            2 => Fsm::OneShot,
            3 => Fsm::Continuous,
            _ => unreachable!("invalid AWB state {}", bits),
        }
    }

    fn state(self) -> State {
        match self {
            Fsm::Init => State::Init,
            Fsm::Enabled => State::Enabled,
            Fsm::OneShot | Fsm::Continuous => State::Measuring,
        }
    }
}

/// State shared between the controller and its interrupt handler.
struct Shared {
    id: ControllerId,
    fsm: AtomicU8,
    gate: Gate,
    mailbox: Mailbox<AwbStatistics>,
    callback: Mutex<Cell<Option<IsrCallback>>>,
}

impl Shared {
    const fn new(id: ControllerId) -> Self {
        Self {
            id,
            fsm: AtomicU8::new(Fsm::Init as u8),
            gate: Gate::new(),
            mailbox: Mailbox::new(),
            callback: Mutex::new(Cell::new(None)),
        }
    }

    fn fsm(&self) -> Fsm {
        Fsm::from_bits(self.fsm.load(Ordering::Acquire))
    }

    fn set_fsm(&self, fsm: Fsm) {
        self.fsm.store(fsm as u8, Ordering::Release);
    }

    fn callback(&self) -> Option<IsrCallback> {
        critical_section::with(|cs| self.callback.borrow(cs).get())
    }
}

/// Registration of the ISP interrupt, freed on drop.
struct InterruptRegistration<'d, H: IspHal> {
    hal: &'d H,
}

impl<'d, H: IspHal> InterruptRegistration<'d, H> {
    fn allocate(hal: &'d H, priority: Priority) -> Result<Self, Error> {
        hal.interrupt_allocate(priority, IspInterrupt::awb_mask())?;
        Ok(Self { hal })
    }

    fn enable(&self) {
        self.hal.interrupt_enable();
    }

    fn disable(&self) {
        self.hal.interrupt_disable();
    }
}

impl<H: IspHal> Drop for InterruptRegistration<'_, H> {
    fn drop(&mut self) {
        self.hal.interrupt_free();
    }
}

/// Programs the block according to `config`.
fn configure(hal: &impl IspHal, config: &AwbConfig) -> Result<(), Error> {
    hal.awb_enable(false);
    hal.awb_set_sample_point(config.sample_point);
    hal.awb_enable_algorithm_mode(true);

    if !(config.window.is_valid() && hal.awb_set_window_range(&config.window)) {
        error!("invalid window: {:?}", config.window);
        return Err(Error::InvalidArgument);
    }

    let luminance = config.white_patch.luminance;
    if !(luminance.min <= luminance.max
        && hal.awb_set_luminance_range(luminance.min, luminance.max))
    {
        error!("invalid luminance range: {:?}", luminance);
        return Err(Error::InvalidArgument);
    }

    let rg = config.white_patch.red_green_ratio;
    if !(rg.is_valid_ratio() && hal.awb_set_rg_ratio_range(rg.min, rg.max)) {
        error!("invalid range of red to green ratio: {:?}", rg);
        return Err(Error::InvalidArgument);
    }

    let bg = config.white_patch.blue_green_ratio;
    if !(bg.is_valid_ratio() && hal.awb_set_bg_ratio_range(bg.min, bg.max)) {
        error!("invalid range of blue to green ratio: {:?}", bg);
        return Err(Error::InvalidArgument);
    }

    Ok(())
}

/// AWB statistics controller.
///
/// At most one controller exists per [`IspProcessor`] at any time.
pub struct AwbController<'d, H: IspHal, D> {
    // Freed before `claim` drops, so a successor can't claim the block while
    // this interrupt is still allocated.
    interrupt: InterruptRegistration<'d, H>,
    claim: AwbClaim<'d, H>,
    shared: Shared,
    delay: D,
}

impl<'d, H: IspHal, D: DelayNs + Clone> AwbController<'d, H, D> {
    /// Claims the AWB block of `isp`, registers the interrupt and programs
    /// the block.
    ///
    /// `delay` is the time base of the blocking statistics calls.
    ///
    /// Fails with [`Error::NoResource`] if another controller owns the block
    /// or the interrupt can't be allocated, and with
    /// [`Error::InvalidArgument`] if the configuration is rejected. Nothing
    /// stays claimed or allocated on failure.
    pub fn new(isp: &'d IspProcessor<H>, config: &AwbConfig, delay: D) -> Result<Self, Error> {
        let id = ControllerId::next();
        let claim = isp.claim_awb(id).inspect_err(|_| {
            error!("no available AWB controller");
        })?;

        let hal = isp.hal();
        let interrupt = InterruptRegistration::allocate(hal, config.intr_priority)
            .inspect_err(|err| error!("allocate interrupt failed: {:?}", err))?;

        if let Err(err) = configure(hal, config) {
            hal.awb_enable_algorithm_mode(false);
            return Err(err);
        }

        info!("AWB controller {:?} created", id);

        Ok(Self {
            interrupt,
            claim,
            shared: Shared::new(id),
            delay,
        })
    }

    /// Triggers a single measurement and waits for its result.
    ///
    /// `timeout` bounds both the wait for a concurrent measurement to finish
    /// and the wait for the result. Plain integers are interpreted as
    /// milliseconds: negative waits forever, `0` only checks once.
    ///
    /// Only valid in [`State::Enabled`]. The controller is back in
    /// [`State::Enabled`] when this returns, including on
    /// [`Error::Timeout`].
    pub fn oneshot_statistics(&self, timeout: impl Into<Timeout>) -> Result<AwbStatistics, Error> {
        let timeout = timeout.into();
        self.check_state(Fsm::Enabled, "oneshot_statistics")?;

        let mut delay = self.delay.clone();
        if !self.shared.gate.take(timeout, &mut delay) {
            warn!("statistics are busy, timed out waiting for the block");
            return Err(Error::Timeout);
        }

        let hal = self.hal();
        self.shared.set_fsm(Fsm::OneShot);
        // Drop anything left over from an earlier measurement.
        self.shared.mailbox.reset();
        hal.awb_enable(true);

        let result = self
            .shared
            .mailbox
            .receive(timeout, &mut delay)
            .ok_or(Error::Timeout);

        hal.awb_enable(false);
        self.shared.set_fsm(Fsm::Enabled);
        self.shared.gate.give();

        result
    }

    /// Waits for the next statistics published while continuous measurement
    /// runs.
    ///
    /// Only valid after [`AwbController::start_continuous`]. Returns the most
    /// recent unread result; older unread results are lost.
    ///
    /// Fails with [`Error::InvalidState`] as soon as continuous measurement is
    /// stopped while waiting.
    pub fn continuous_statistics(
        &self,
        timeout: impl Into<Timeout>,
    ) -> Result<AwbStatistics, Error> {
        self.check_state(Fsm::Continuous, "continuous_statistics")?;

        let mut delay = self.delay.clone();
        poll_until(timeout.into(), &mut delay, || {
            if let Some(statistics) = self.shared.mailbox.try_receive() {
                Some(Ok(statistics))
            } else if self.shared.fsm() != Fsm::Continuous {
                warn!("continuous_statistics: measurement stopped while waiting");
                Some(Err(Error::InvalidState))
            } else {
                None
            }
        })
        .unwrap_or(Err(Error::Timeout))
    }
}

impl<'d, H: IspHal, D> AwbController<'d, H, D> {
    fn hal(&self) -> &'d H {
        self.claim.isp().hal()
    }

    fn check_state(&self, expected: Fsm, operation: &'static str) -> Result<(), Error> {
        let current = self.shared.fsm();
        if current != expected {
            warn!(
                "{}: controller is in {:?} state, expected {:?}",
                operation, current, expected
            );
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    /// The id this controller holds its claim with.
    pub fn id(&self) -> ControllerId {
        self.claim.id()
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.shared.fsm().state()
    }

    /// Registers the event callbacks.
    ///
    /// Only valid in [`State::Init`], while the interrupt can't fire.
    /// Registering [`AwbCallbacks::default()`] removes the callback.
    ///
    /// Fails with [`Error::InvalidArgument`] if the callback or a non-null
    /// `user_data` is not placed where the interrupt handler may access it.
    pub fn register_callbacks(
        &self,
        callbacks: AwbCallbacks,
        user_data: UserContext,
    ) -> Result<(), Error> {
        self.check_state(Fsm::Init, "register_callbacks")?;

        let callback = IsrCallback::check(self.hal(), callbacks, user_data)?;
        critical_section::with(|cs| self.shared.callback.borrow(cs).set(callback));

        Ok(())
    }

    /// Turns on the interrupt and the clock of the block.
    ///
    /// Only valid in [`State::Init`].
    pub fn enable(&self) -> Result<(), Error> {
        self.check_state(Fsm::Init, "enable")?;

        let hal = self.hal();
        self.interrupt.enable();
        hal.awb_clk_enable(true);
        hal.enable_interrupts(IspInterrupt::awb_mask(), true);
        self.shared.gate.give();
        self.shared.set_fsm(Fsm::Enabled);

        debug!("AWB controller {:?} enabled", self.id());
        Ok(())
    }

    /// Turns off the interrupt and the clock of the block.
    ///
    /// Only valid in [`State::Enabled`].
    pub fn disable(&self) -> Result<(), Error> {
        self.check_state(Fsm::Enabled, "disable")?;

        let hal = self.hal();
        critical_section::with(|_| {
            hal.enable_interrupts(IspInterrupt::awb_mask(), false);
            hal.awb_clk_enable(false);
            self.interrupt.disable();
            self.shared.set_fsm(Fsm::Init);
        });
        self.shared.gate.try_take();

        debug!("AWB controller {:?} disabled", self.id());
        Ok(())
    }

    /// Starts measuring every frame.
    ///
    /// Only valid in [`State::Enabled`]. Fails with [`Error::InvalidState`]
    /// without touching the hardware if another measurement holds the block.
    pub fn start_continuous(&self) -> Result<(), Error> {
        self.check_state(Fsm::Enabled, "start_continuous")?;

        if !self.shared.gate.try_take() {
            warn!("statistics lock is not acquired, controller is busy");
            return Err(Error::InvalidState);
        }

        let hal = self.hal();
        self.shared.mailbox.reset();
        critical_section::with(|_| {
            self.shared.set_fsm(Fsm::Continuous);
            hal.awb_enable(true);
        });

        debug!("AWB controller {:?} started continuous statistics", self.id());
        Ok(())
    }

    /// Stops a measurement started by [`AwbController::start_continuous`].
    ///
    /// Fails with [`Error::InvalidState`] in any other state, including
    /// while a one-shot measurement is in flight.
    pub fn stop_continuous(&self) -> Result<(), Error> {
        self.check_state(Fsm::Continuous, "stop_continuous")?;

        let hal = self.hal();
        // The interrupt handler re-arms based on the state, so both change
        // together.
        critical_section::with(|_| {
            hal.awb_enable(false);
            self.shared.set_fsm(Fsm::Enabled);
        });
        self.shared.gate.give();

        debug!("AWB controller {:?} stopped continuous statistics", self.id());
        Ok(())
    }

    /// The interrupt-context view of this controller.
    ///
    /// Call [`AwbInterruptHandler::on_interrupt`] from the ISP interrupt
    /// vector.
    pub fn interrupt_handler(&self) -> AwbInterruptHandler<'_, H> {
        AwbInterruptHandler {
            hal: self.hal(),
            shared: &self.shared,
        }
    }

    /// Releases the block and frees the interrupt.
    ///
    /// Only valid in [`State::Init`]. On failure the controller is handed back
    /// with the error.
    pub fn delete(self) -> Result<(), (Self, Error)> {
        if let Err(err) = self.check_state(Fsm::Init, "delete") {
            return Err((self, err));
        }

        debug!("AWB controller {:?} deleted", self.id());
        Ok(())
    }
}

impl<H: IspHal, D> Drop for AwbController<'_, H, D> {
    fn drop(&mut self) {
        let hal = self.hal();
        if self.shared.fsm() != Fsm::Init {
            critical_section::with(|_| {
                hal.awb_enable(false);
                hal.enable_interrupts(IspInterrupt::awb_mask(), false);
                hal.awb_clk_enable(false);
                self.interrupt.disable();
                self.shared.set_fsm(Fsm::Init);
            });
        }
        hal.awb_enable_algorithm_mode(false);
    }
}

impl<H: IspHal, D> core::fmt::Debug for AwbController<'_, H, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AwbController")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// The part of an [`AwbController`] that runs in interrupt context.
///
/// It can only read the accumulators, invoke the callback, publish the
/// result and re-arm continuous measurement; none of these block.
pub struct AwbInterruptHandler<'a, H: IspHal> {
    hal: &'a H,
    shared: &'a Shared,
}

impl<H: IspHal> Clone for AwbInterruptHandler<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: IspHal> Copy for AwbInterruptHandler<'_, H> {}

impl<H: IspHal> AwbInterruptHandler<'_, H> {
    /// Handles the AWB events of the ISP interrupt.
    ///
    /// Returns whether the callback asked for a context switch on interrupt
    /// exit.
    pub fn on_interrupt(&self) -> bool {
        let events = self.hal.check_clear_interrupts(IspInterrupt::awb_mask());
        if !events.contains(IspInterrupt::AwbFrameDone) {
            return false;
        }

        let event = AwbEventData {
            statistics: AwbStatistics {
                white_patch_count: self.hal.awb_white_patch_count(),
                sum_r: self.hal.awb_accumulated_r(),
                sum_g: self.hal.awb_accumulated_g(),
                sum_b: self.hal.awb_accumulated_b(),
            },
        };
        trace!(
            "AWB frame done, {} white patches",
            event.statistics.white_patch_count
        );

        let mut need_yield = false;
        if let Some(callback) = self.shared.callback() {
            need_yield |=
                (callback.on_statistics_done)(self.shared.id, &event, callback.user_data);
        }

        self.shared.mailbox.overwrite(event.statistics);

        critical_section::with(|_| {
            if self.shared.fsm() == Fsm::Continuous {
                self.hal.awb_enable(true);
            }
        });

        need_yield
    }
}
