//! Per-axis interrupt-driven step pulse generation.
//!
//! Each [`Axis`] owns one motor's step/dir/enable lines and turns a signed
//! feed request into a precisely timed pulse train, using only integer work
//! inside the fixed-period tick interrupt. A fractional ideal ticks-per-step
//! interval is approximated by a repeating dither cycle that alternates
//! between two adjacent whole-tick intervals.
//!
//! The interrupt and the main loop share the position counter, the dither
//! schedule and the output lines; all of it lives behind `critical-section`
//! guarded cells, and the schedule is always replaced whole so the interrupt
//! never observes a half-updated cycle.

use core::cell::{Cell, RefCell};

use critical_section::{CriticalSection, Mutex};
use embedded_hal::digital::v2::OutputPin;

/// Interval loaded while stopped, long enough that the pulse logic all but
/// never runs. When it does fire, the Stopped arm resets the counter without
/// touching position.
const IDLE_TICKS_PER_STEP: u32 = 65_535;

/// An axis is allowed at most one step per three ticks, so the rising and
/// falling edge of every pulse land on separate ticks with one to spare.
const MAX_STEP_TICK_SHARE: f32 = 0.333;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Positive,
    Negative,
    Stopped,
}

/// Output lines of one motor driver.
///
/// This is the GPIO capability the board crate provides; the core only ever
/// asks for levels to be set.
pub trait MotorOutputs {
    fn set_step(&mut self, high: bool);
    fn set_dir(&mut self, forward: bool);
    fn set_enable(&mut self, enabled: bool);
}

/// [`MotorOutputs`] over three push-pull GPIO pins.
///
/// The enable line is driven active-low, which is what the usual step/dir
/// driver boards expect.
pub struct MotorPins<S, D, E> {
    step: S,
    dir: D,
    enable: E,
}

impl<S, D, E> MotorPins<S, D, E> {
    pub fn new(step: S, dir: D, enable: E) -> Self {
        Self { step, dir, enable }
    }
}

impl<S: OutputPin, D: OutputPin, E: OutputPin> MotorOutputs for MotorPins<S, D, E> {
    fn set_step(&mut self, high: bool) {
        if high {
            self.step.set_high().ok();
        } else {
            self.step.set_low().ok();
        }
    }

    fn set_dir(&mut self, forward: bool) {
        if forward {
            self.dir.set_high().ok();
        } else {
            self.dir.set_low().ok();
        }
    }

    fn set_enable(&mut self, enabled: bool) {
        if enabled {
            self.enable.set_low().ok();
        } else {
            self.enable.set_high().ok();
        }
    }
}

/// One dither cycle plus the direction it applies to.
///
/// `cycle_len` steps repeat forever; the first `long_steps` of each cycle
/// take the `ticks_per_step + 1` interval and the rest take `ticks_per_step`.
/// Replaced whole, inside a critical section.
#[derive(Clone, Copy, Debug)]
struct Schedule {
    ticks_per_step: u32,
    cycle_len: u16,
    long_steps: u16,
    direction: Direction,
}

impl Schedule {
    const fn idle() -> Self {
        Self {
            ticks_per_step: IDLE_TICKS_PER_STEP,
            cycle_len: 1,
            long_steps: 0,
            direction: Direction::Stopped,
        }
    }
}

/// Decompose a fractional ticks-per-step interval into a baseline whole-tick
/// interval and a repeating dither cycle whose average approximates it.
///
/// The cycle length is the rounded reciprocal of the fractional remainder;
/// the small epsilon keeps the reciprocal finite (and the cycle length inside
/// 16 bits) when the remainder approaches zero.
fn plan_schedule(ideal_ticks_per_step: f32, direction: Direction) -> Schedule {
    let ticks_per_step = ideal_ticks_per_step as u32;
    let mut offset = ideal_ticks_per_step - ticks_per_step as f32;

    let (cycle_len, long_steps);
    if offset < 0.499_969_5 {
        offset += 0.000_030_6;
        cycle_len = (1.0 / offset + 0.5) as u16;
        long_steps = 1;
    } else {
        offset = 1.000_030_6 - offset;
        cycle_len = (1.0 / offset + 0.5) as u16;
        long_steps = cycle_len - 1;
    }

    Schedule {
        ticks_per_step,
        cycle_len,
        long_steps,
        direction,
    }
}

/// Interrupt-context scratch: the free-running tick counter, the position in
/// the dither cycle, and the current level of the step line.
#[derive(Clone, Copy, Debug)]
struct IsrState {
    tick: u32,
    dither: u16,
    pulse_high: bool,
}

/// One motor's pulse generator.
///
/// `set_speed`, `enable`/`disable` and the position accessors run in the main
/// loop; `step` runs in the tick interrupt. Both instances are driven from a
/// single [`StepTicker`].
pub struct Axis<O> {
    steps_per_mm: f32,
    mm_per_step: f32,
    ticks_per_min: f32,
    max_feed: i32,
    min_feed: i32,
    invert_dir: bool,

    outputs: Mutex<RefCell<O>>,
    schedule: Mutex<Cell<Schedule>>,
    position: Mutex<Cell<i32>>,
    isr: Mutex<Cell<IsrState>>,
    velocity: Mutex<Cell<f32>>,
    enabled: Mutex<Cell<bool>>,
}

impl<O: MotorOutputs> Axis<O> {
    /// Create an axis bound to one motor's output lines. Starts disabled, at
    /// position zero, with the step line low.
    pub fn new(steps_per_mm: f32, invert_dir: bool, tick_rate_hz: u32, mut outputs: O) -> Self {
        let ticks_per_min = tick_rate_hz as f32 * 60.0;
        let mm_per_step = 1.0 / steps_per_mm;

        // Cap feeds so the dither interval always fits: at the top end one
        // step per three ticks, at the bottom end an interval that would
        // overflow the idle sentinel.
        let max_feed = (ticks_per_min * mm_per_step * MAX_STEP_TICK_SHARE).clamp(0.0, 32_767.0) as i32;
        let min_feed = (ticks_per_min / (65_537.0 * steps_per_mm)) as i32;

        outputs.set_step(false);
        outputs.set_dir(!invert_dir);
        outputs.set_enable(false);

        Self {
            steps_per_mm,
            mm_per_step,
            ticks_per_min,
            max_feed,
            min_feed,
            invert_dir,
            outputs: Mutex::new(RefCell::new(outputs)),
            schedule: Mutex::new(Cell::new(Schedule::idle())),
            position: Mutex::new(Cell::new(0)),
            isr: Mutex::new(Cell::new(IsrState {
                tick: 0,
                dither: 1,
                pulse_high: false,
            })),
            velocity: Mutex::new(Cell::new(0.0)),
            enabled: Mutex::new(Cell::new(false)),
        }
    }

    /// Command a new signed speed, in mm/min. Main-loop context.
    ///
    /// The magnitude is clamped to the derived maximum; anything inside the
    /// deadband (including every request while disabled) stops the axis
    /// instead of running with an unbounded interval. The dither cycle is
    /// computed out here and written into the shared schedule in one critical
    /// section.
    pub fn set_speed(&self, feed: i32) {
        let feed = if self.is_enabled() {
            feed.clamp(-self.max_feed, self.max_feed)
        } else {
            0
        };

        let direction = if feed > self.min_feed {
            Direction::Positive
        } else if feed < -self.min_feed {
            Direction::Negative
        } else {
            critical_section::with(|cs| {
                self.schedule.borrow(cs).set(Schedule::idle());
                self.velocity.borrow(cs).set(0.0);
            });
            return;
        };

        let steps_per_min = feed.unsigned_abs() as f32 * self.steps_per_mm;
        let ideal_ticks_per_step = self.ticks_per_min / steps_per_min;
        let schedule = plan_schedule(ideal_ticks_per_step, direction);

        critical_section::with(|cs| {
            let forward = (direction == Direction::Positive) != self.invert_dir;
            self.outputs.borrow_ref_mut(cs).set_dir(forward);
            self.schedule.borrow(cs).set(schedule);
            self.velocity.borrow(cs).set(feed as f32);
        });
    }

    /// Advance one interrupt tick.
    ///
    /// Bounded, small time: on most ticks this is an increment and a compare.
    /// The caller holds the critical section for the whole tick, which also
    /// locks out the main loop's schedule and position accesses.
    #[inline]
    pub fn step(&self, cs: CriticalSection) {
        let mut isr = self.isr.borrow(cs).get();
        isr.tick += 1;

        let schedule = self.schedule.borrow(cs).get();
        if isr.tick >= schedule.ticks_per_step {
            // Reached twice per pulse: first to raise the step line, then to
            // drop it on the following tick, so every pulse is at least one
            // interrupt period wide.
            if isr.pulse_high {
                self.pulse_off(cs, &mut isr, &schedule);
            } else {
                self.pulse_on(cs, &mut isr, &schedule);
            }
        }

        self.isr.borrow(cs).set(isr);
    }

    /// Rising edge: position moves by exactly one step, in the scheduled
    /// direction. While stopped no pulse is emitted and the counter is reset
    /// so it does not immediately re-trigger.
    fn pulse_on(&self, cs: CriticalSection, isr: &mut IsrState, schedule: &Schedule) {
        match schedule.direction {
            Direction::Positive => {
                let position = self.position.borrow(cs);
                position.set(position.get() + 1);
                self.outputs.borrow_ref_mut(cs).set_step(true);
                isr.pulse_high = true;
            }
            Direction::Negative => {
                let position = self.position.borrow(cs);
                position.set(position.get() - 1);
                self.outputs.borrow_ref_mut(cs).set_step(true);
                isr.pulse_high = true;
            }
            Direction::Stopped => {
                isr.tick = 0;
            }
        }
    }

    /// Falling edge: pick the interval for the upcoming step. Resetting the
    /// tick counter to 1 shortens the next interval to the baseline; 0 gives
    /// the long (baseline + 1) interval.
    fn pulse_off(&self, cs: CriticalSection, isr: &mut IsrState, schedule: &Schedule) {
        self.outputs.borrow_ref_mut(cs).set_step(false);
        isr.pulse_high = false;

        if isr.dither > schedule.long_steps {
            isr.tick = 1;
            if isr.dither >= schedule.cycle_len {
                isr.dither = 0;
            }
        } else {
            isr.tick = 0;
        }
        isr.dither += 1;
    }

    pub fn position_steps(&self) -> i32 {
        critical_section::with(|cs| self.position.borrow(cs).get())
    }

    pub fn position_mm(&self) -> f32 {
        self.position_steps() as f32 * self.mm_per_step
    }

    pub fn set_position_steps(&self, steps: i32) {
        critical_section::with(|cs| self.position.borrow(cs).set(steps));
    }

    pub fn set_position_mm(&self, mm: f32) {
        self.set_position_steps((mm * self.steps_per_mm + 0.5) as i32);
    }

    /// Live commanded speed, in mm/s.
    pub fn speed_mm_s(&self) -> f32 {
        critical_section::with(|cs| self.velocity.borrow(cs).get()) / 60.0
    }

    pub fn max_feed(&self) -> i32 {
        self.max_feed
    }

    pub fn min_feed(&self) -> i32 {
        self.min_feed
    }

    pub fn is_enabled(&self) -> bool {
        critical_section::with(|cs| self.enabled.borrow(cs).get())
    }

    pub fn enable(&self) {
        critical_section::with(|cs| {
            self.outputs.borrow_ref_mut(cs).set_enable(true);
            self.schedule.borrow(cs).set(Schedule::idle());
            self.enabled.borrow(cs).set(true);
        });
    }

    /// Gate the driver off and force an immediate stop; a disabled axis never
    /// advances position even though the tick interrupt keeps firing.
    pub fn disable(&self) {
        critical_section::with(|cs| {
            self.outputs.borrow_ref_mut(cs).set_enable(false);
            self.schedule.borrow(cs).set(Schedule::idle());
            self.enabled.borrow(cs).set(false);
        });
    }
}

/// The interrupt entry point: services exactly the two axis generators it was
/// built over. Register [`StepTicker::tick`] with the board's fixed-period
/// timer callback (50us reference period).
pub struct StepTicker<'a, OA, OB> {
    a: &'a Axis<OA>,
    b: &'a Axis<OB>,
}

impl<'a, OA: MotorOutputs, OB: MotorOutputs> StepTicker<'a, OA, OB> {
    pub fn new(a: &'a Axis<OA>, b: &'a Axis<OB>) -> Self {
        Self { a, b }
    }

    pub fn tick(&self) {
        critical_section::with(|cs| {
            self.a.step(cs);
            self.b.step(cs);
        });
    }
}
