//! Host doubles for the ISP registers and the delay provider.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use embedded_hal::delay::DelayNs;
use enumset::EnumSet;

use crate::{
    Error,
    awb::AwbStatistics,
    hal::{IspHal, IspInterrupt, Priority, SamplePoint, Window},
};

/// Largest window coordinate the mock accepts.
pub const MAX_COORDINATE: u32 = 4096;

/// [`DelayNs`] backed by the host scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Ranges {
    pub window: Option<Window>,
    pub luminance: Option<(u32, u32)>,
    pub rg_ratio: Option<(f32, f32)>,
    pub bg_ratio: Option<(f32, f32)>,
}

/// Register-level model of the ISP used by the unit tests.
#[derive(Default)]
pub struct MockIsp {
    pub awb_running: AtomicBool,
    pub arm_count: AtomicU32,
    pub algorithm_mode: AtomicBool,
    pub clock: AtomicBool,
    pub sample_point: Mutex<Option<SamplePoint>>,
    pub ranges: Mutex<Ranges>,
    pub armed: Mutex<EnumSet<IspInterrupt>>,
    pub pending: Mutex<EnumSet<IspInterrupt>>,
    pub accumulators: Mutex<AwbStatistics>,

    pub fail_interrupt_allocation: AtomicBool,
    pub interrupt_allocated: AtomicBool,
    pub interrupt_priority: Mutex<Option<Priority>>,
    pub interrupt_enabled: AtomicBool,
    /// Time `interrupt_free` takes, in milliseconds.
    pub interrupt_free_delay_ms: AtomicU32,

    pub reject_isr_code: AtomicBool,
    pub reject_user_data: AtomicBool,
}

impl MockIsp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches a finished frame with `statistics` into the accumulators.
    pub fn complete_frame(&self, statistics: AwbStatistics) {
        *self.accumulators.lock().unwrap() = statistics;
        self.awb_running.store(false, Ordering::SeqCst);
        self.raise(IspInterrupt::AwbFrameDone);
    }

    pub fn raise(&self, event: IspInterrupt) {
        *self.pending.lock().unwrap() |= event;
    }

    pub fn pending(&self) -> EnumSet<IspInterrupt> {
        *self.pending.lock().unwrap()
    }

    pub fn is_running(&self) -> bool {
        self.awb_running.load(Ordering::SeqCst)
    }

    pub fn arm_count(&self) -> u32 {
        self.arm_count.load(Ordering::SeqCst)
    }

    pub fn awb_armed(&self) -> bool {
        self.armed
            .lock()
            .unwrap()
            .contains(IspInterrupt::AwbFrameDone)
    }
}

impl IspHal for MockIsp {
    fn awb_enable(&self, enable: bool) {
        self.awb_running.store(enable, Ordering::SeqCst);
        if enable {
            self.arm_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn awb_enable_algorithm_mode(&self, enable: bool) {
        self.algorithm_mode.store(enable, Ordering::SeqCst);
    }

    fn awb_clk_enable(&self, enable: bool) {
        self.clock.store(enable, Ordering::SeqCst);
    }

    fn awb_set_sample_point(&self, sample_point: SamplePoint) {
        *self.sample_point.lock().unwrap() = Some(sample_point);
    }

    fn awb_set_window_range(&self, window: &Window) -> bool {
        if window.btm_right.x > MAX_COORDINATE || window.btm_right.y > MAX_COORDINATE {
            return false;
        }
        self.ranges.lock().unwrap().window = Some(*window);
        true
    }

    fn awb_set_luminance_range(&self, min: u32, max: u32) -> bool {
        if max > 255 * 3 {
            return false;
        }
        self.ranges.lock().unwrap().luminance = Some((min, max));
        true
    }

    fn awb_set_rg_ratio_range(&self, min: f32, max: f32) -> bool {
        if max >= 4.0 {
            return false;
        }
        self.ranges.lock().unwrap().rg_ratio = Some((min, max));
        true
    }

    fn awb_set_bg_ratio_range(&self, min: f32, max: f32) -> bool {
        if max >= 4.0 {
            return false;
        }
        self.ranges.lock().unwrap().bg_ratio = Some((min, max));
        true
    }

    fn awb_white_patch_count(&self) -> u32 {
        self.accumulators.lock().unwrap().white_patch_count
    }

    fn awb_accumulated_r(&self) -> u32 {
        self.accumulators.lock().unwrap().sum_r
    }

    fn awb_accumulated_g(&self) -> u32 {
        self.accumulators.lock().unwrap().sum_g
    }

    fn awb_accumulated_b(&self) -> u32 {
        self.accumulators.lock().unwrap().sum_b
    }

    fn enable_interrupts(&self, events: EnumSet<IspInterrupt>, enable: bool) {
        let mut armed = self.armed.lock().unwrap();
        if enable {
            *armed |= events;
        } else {
            *armed -= events;
        }
    }

    fn check_clear_interrupts(&self, mask: EnumSet<IspInterrupt>) -> EnumSet<IspInterrupt> {
        let mut pending = self.pending.lock().unwrap();
        let events = *pending & mask;
        *pending -= events;
        events
    }

    fn interrupt_allocate(
        &self,
        priority: Priority,
        _mask: EnumSet<IspInterrupt>,
    ) -> Result<(), Error> {
        if self.fail_interrupt_allocation.load(Ordering::SeqCst) {
            return Err(Error::NoResource);
        }
        *self.interrupt_priority.lock().unwrap() = Some(priority);
        self.interrupt_allocated.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn interrupt_enable(&self) {
        self.interrupt_enabled.store(true, Ordering::SeqCst);
    }

    fn interrupt_disable(&self) {
        self.interrupt_enabled.store(false, Ordering::SeqCst);
    }

    fn interrupt_free(&self) {
        let delay_ms = self.interrupt_free_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(u64::from(delay_ms)));
        }
        self.interrupt_enabled.store(false, Ordering::SeqCst);
        self.interrupt_allocated.store(false, Ordering::SeqCst);
    }

    fn is_isr_safe_code(&self, _addr: usize) -> bool {
        !self.reject_isr_code.load(Ordering::SeqCst)
    }

    fn is_internal_ram(&self, _addr: usize) -> bool {
        !self.reject_user_data.load(Ordering::SeqCst)
    }
}
