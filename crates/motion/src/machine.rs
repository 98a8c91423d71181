//! Machine state and the main-loop executor.
//!
//! The executor owns the sequencing side of the controller: it watches the
//! two axis generators, retires axes as they arrive, and when the in-flight
//! block is finished pops the next one, runs the inverse kinematics and
//! hands each axis a speed proportioned so that both arrive together.

use core::fmt::Write;

use libm::{round, sqrt};
use vplot_geom::{Config, Point, StepperPositions};

use crate::axis::{Axis, MotorOutputs};
use crate::config::{LINE_CAPACITY, MAX_FEED, QUEUE_SLOTS};
use crate::intake::LineBuffer;
use crate::parse::{self, LineStatus};
use crate::queue::LookaheadQueue;

/// Pen-lift actuator capability. The physical positioning (servo angles,
/// travel time) lives outside the core.
pub trait PenLift {
    fn set_lifted(&mut self, lifted: bool);
}

/// Live control register.
///
/// The intake fields (`feed`, `rapid`, `lift`) are written by the parser and
/// the executor; the position fields by the executor. The live step counters
/// stay with the axis generators, and those counters, not the floating-point
/// point here, are the system of record for position.
pub struct Machine {
    pub feed: i32,
    pub rapid: bool,
    pub lift: bool,
    /// Cartesian position at the end of the last dequeued block.
    pub pt: Point,
    /// Destination step counts of the in-flight block.
    pub dest: StepperPositions,
}

impl Machine {
    /// Cold-start state: carriage at the home position, pen lifted.
    pub fn new(config: &Config) -> Self {
        let home = config.home_lengths();
        Self {
            feed: MAX_FEED,
            rapid: false,
            lift: true,
            pt: config.lengths_to_point(&home),
            dest: config.lengths_to_steps(&home),
        }
    }
}

/// The `M0` diagnostic line: destination step counts, live commanded speeds
/// (mm/s) and live positions for both axes, in fixed field order.
pub(crate) fn write_diagnostics<OA, OB, W>(
    machine: &Machine,
    axis_a: &Axis<OA>,
    axis_b: &Axis<OB>,
    out: &mut W,
) where
    OA: MotorOutputs,
    OB: MotorOutputs,
    W: Write,
{
    let _ = write!(
        out,
        "{} {} {} {} {} {}\r\n",
        machine.dest.a,
        axis_a.speed_mm_s(),
        machine.dest.b,
        axis_b.speed_mm_s(),
        axis_a.position_steps(),
        axis_b.position_steps(),
    );
}

/// `true` once the axis needs no further attention for the current block.
///
/// A moving axis has arrived when it reaches or crosses its destination (the
/// dither approximation lets one axis get there slightly before the other);
/// it is stopped on arrival. An axis that is not moving cannot get any
/// closer, so it counts as arrived too; that absorbs the residual of a
/// speed request rejected by the deadband.
fn retire_if_arrived<O: MotorOutputs>(axis: &Axis<O>, dest: i32) -> bool {
    let v = axis.speed_mm_s();
    if v == 0.0 {
        return true;
    }
    let pos = axis.position_steps();
    let arrived = if v > 0.0 { pos >= dest } else { pos <= dest };
    if arrived {
        axis.set_speed(0);
    }
    arrived
}

/// The whole controller: machine register, lookahead queue, line intake and
/// the two axis generator handles, plus the pen capability.
///
/// The tick interrupt does not go through this type; it closes over the two
/// axes alone (see [`crate::axis::StepTicker`]).
pub struct Controller<'a, OA, OB, P> {
    config: Config,
    pub machine: Machine,
    queue: LookaheadQueue<QUEUE_SLOTS>,
    axis_a: &'a Axis<OA>,
    axis_b: &'a Axis<OB>,
    pen: P,
    line: LineBuffer<LINE_CAPACITY>,
}

impl<'a, OA, OB, P> Controller<'a, OA, OB, P>
where
    OA: MotorOutputs,
    OB: MotorOutputs,
    P: PenLift,
{
    /// Build the controller at the cold-start position: both axis counters
    /// are seeded with the home step counts, the drivers enabled, the pen
    /// lifted.
    pub fn new(config: Config, axis_a: &'a Axis<OA>, axis_b: &'a Axis<OB>, mut pen: P) -> Self {
        let machine = Machine::new(&config);
        axis_a.set_position_steps(machine.dest.a);
        axis_b.set_position_steps(machine.dest.b);
        axis_a.enable();
        axis_b.enable();
        pen.set_lifted(machine.lift);

        Self {
            config,
            machine,
            queue: LookaheadQueue::new(),
            axis_a,
            axis_b,
            pen,
            line: LineBuffer::new(),
        }
    }

    /// The boot banner the host waits for before sending its first line.
    pub fn announce_ready<W: Write>(&self, out: &mut W) {
        let _ = out.write_str("Ready\r\n");
    }

    /// Feed one serial byte; parses and answers a line when it completes.
    pub fn feed_byte<W: Write>(&mut self, byte: u8, out: &mut W) -> Option<LineStatus> {
        let line = self.line.feed(byte)?;
        Some(parse::parse_line(
            line,
            &mut self.machine,
            &mut self.queue,
            self.axis_a,
            self.axis_b,
            out,
        ))
    }

    /// Parse one complete command line.
    pub fn process_line<W: Write>(&mut self, line: &str, out: &mut W) -> LineStatus {
        parse::parse_line(
            line,
            &mut self.machine,
            &mut self.queue,
            self.axis_a,
            self.axis_b,
            out,
        )
    }

    /// Main-loop sequencing; call continuously.
    ///
    /// Retires axes that have arrived, and once the in-flight block is done
    /// starts the next queued one: applies the pen flag if it changed,
    /// converts the target to destination step counts, and commands each
    /// axis with the block feed scaled by that axis's share of the travel so
    /// both arrive together. The kinematics run outside any critical
    /// section; only the individual counter reads and speed writes are
    /// guarded.
    pub fn poll<W: Write>(&mut self, out: &mut W) {
        let a_done = retire_if_arrived(self.axis_a, self.machine.dest.a);
        let b_done = retire_if_arrived(self.axis_b, self.machine.dest.b);
        if !(a_done && b_done) || self.queue.is_empty() {
            return;
        }

        let was_full = self.queue.is_full();
        let block = match self.queue.pop() {
            Some(block) => block,
            None => return,
        };
        if was_full {
            // The push that filled the queue went unanswered; this is the
            // drain signal the host resumes on.
            let _ = out.write_str("Ready\r\n");
        }

        if block.lift != self.machine.lift {
            self.machine.lift = block.lift;
            self.pen.set_lifted(block.lift);
        }

        let dest = self.config.point_to_steps(&block.target);
        let mm_per_step = self.config.mm_per_step();
        let da = (dest.a - self.axis_a.position_steps()) as f64 * mm_per_step;
        let db = (dest.b - self.axis_b.position_steps()) as f64 * mm_per_step;
        let dx = block.target.x - self.machine.pt.x;
        let dy = block.target.y - self.machine.pt.y;
        let travel = sqrt(dx * dx + dy * dy);

        let (feed_a, feed_b) = if travel > 0.0 {
            let scale = block.feed as f64 / travel;
            (round(da * scale) as i32, round(db * scale) as i32)
        } else {
            (0, 0)
        };

        self.machine.feed = block.feed;
        self.machine.pt = block.target;
        self.machine.dest = dest;

        self.axis_a.set_speed(feed_a);
        self.axis_b.set_speed(feed_b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use vplot_geom::{ConfigBuilder, LenExt};

    struct NullOutputs;

    impl MotorOutputs for NullOutputs {
        fn set_step(&mut self, _high: bool) {}
        fn set_dir(&mut self, _forward: bool) {}
        fn set_enable(&mut self, _enabled: bool) {}
    }

    #[derive(Clone, Default)]
    struct PenLog(Rc<RefCell<Vec<bool>>>);

    impl PenLift for PenLog {
        fn set_lifted(&mut self, lifted: bool) {
            self.0.borrow_mut().push(lifted);
        }
    }

    // A small test machine keeps the simulated move times short.
    fn test_config() -> Config {
        ConfigBuilder::default()
            .with_pulley_distance(100.0.mm())
            .build()
    }

    fn test_axis(config: &Config) -> Axis<NullOutputs> {
        Axis::new(config.steps_per_mm as f32, false, 20_000, NullOutputs)
    }

    /// Run the main loop against a simulated tick interrupt until the queue
    /// drains and both axes stop.
    fn run_to_idle(
        ctrl: &mut Controller<NullOutputs, NullOutputs, PenLog>,
        a: &Axis<NullOutputs>,
        b: &Axis<NullOutputs>,
        out: &mut String,
    ) {
        for _ in 0..100_000 {
            ctrl.poll(out);
            if ctrl.queue.is_empty() && a.speed_mm_s() == 0.0 && b.speed_mm_s() == 0.0 {
                return;
            }
            for _ in 0..16 {
                critical_section::with(|cs| {
                    a.step(cs);
                    b.step(cs);
                });
            }
        }
        panic!("controller did not settle");
    }

    #[test]
    fn executes_a_move_to_the_commanded_steps() {
        let cfg = test_config();
        let a = test_axis(&cfg);
        let b = test_axis(&cfg);
        let mut ctrl = Controller::new(cfg, &a, &b, PenLog::default());
        let mut out = String::new();

        let status = ctrl.process_line("X0 Y-10 F600", &mut out);
        assert_eq!(status, LineStatus::Queued { full_after: false });
        assert_eq!(out, "ok\r\n");

        run_to_idle(&mut ctrl, &a, &b, &mut out);

        let dest = cfg.point_to_steps(&Point::new(0.0, -10.0));
        assert!((a.position_steps() - dest.a).abs() <= 2, "{}", a.position_steps());
        assert!((b.position_steps() - dest.b).abs() <= 2, "{}", b.position_steps());
        assert_eq!(ctrl.machine.pt, Point::new(0.0, -10.0));
        assert_eq!(ctrl.machine.dest, dest);
    }

    #[test]
    fn blocks_run_in_order_and_inherit_fields() {
        let cfg = test_config();
        let a = test_axis(&cfg);
        let b = test_axis(&cfg);
        let mut ctrl = Controller::new(cfg, &a, &b, PenLog::default());
        let mut out = String::new();

        ctrl.process_line("X0 Y-10 F600", &mut out);
        ctrl.process_line("X5", &mut out);
        run_to_idle(&mut ctrl, &a, &b, &mut out);

        // The second block inherited Y and F from the first.
        assert_eq!(ctrl.machine.pt, Point::new(5.0, -10.0));
        assert_eq!(ctrl.machine.feed, 600);

        let dest = cfg.point_to_steps(&Point::new(5.0, -10.0));
        assert!((a.position_steps() - dest.a).abs() <= 2);
        assert!((b.position_steps() - dest.b).abs() <= 2);
    }

    #[test]
    fn speeds_are_proportioned_to_arrive_together() {
        let cfg = test_config();
        let a = test_axis(&cfg);
        let b = test_axis(&cfg);
        let mut ctrl = Controller::new(cfg, &a, &b, PenLog::default());
        let mut out = String::new();

        ctrl.process_line("X3 Y-10 F600", &mut out);
        ctrl.poll(&mut out);

        let target = Point::new(3.0, -10.0);
        let dest = cfg.point_to_steps(&target);
        let home = cfg.lengths_to_steps(&cfg.home_lengths());
        let da = (dest.a - home.a) as f64 * cfg.mm_per_step();
        let db = (dest.b - home.b) as f64 * cfg.mm_per_step();
        let home_pt = cfg.lengths_to_point(&cfg.home_lengths());
        let travel = ((target.x - home_pt.x).powi(2) + (target.y - home_pt.y).powi(2)).sqrt();

        let va = round(600.0 * da / travel) as f32 / 60.0;
        let vb = round(600.0 * db / travel) as f32 / 60.0;
        assert!((a.speed_mm_s() - va).abs() < 1e-4);
        assert!((b.speed_mm_s() - vb).abs() < 1e-4);
        // An asymmetric target really does split the feed unevenly.
        assert!((va - vb).abs() > 0.01);
    }

    #[test]
    fn lift_changes_reach_the_pen_once() {
        let cfg = test_config();
        let a = test_axis(&cfg);
        let b = test_axis(&cfg);
        let pen = PenLog::default();
        let mut ctrl = Controller::new(cfg, &a, &b, pen.clone());
        let mut out = String::new();

        // Initial state: lifted.
        assert_eq!(*pen.0.borrow(), vec![true]);

        ctrl.process_line("M5 X0 Y-10 F600", &mut out);
        ctrl.process_line("X2", &mut out);
        run_to_idle(&mut ctrl, &a, &b, &mut out);

        // Dropped once for the first block; the second block's unchanged
        // flag causes no further actuation.
        assert_eq!(*pen.0.borrow(), vec![true, false]);
    }

    #[test]
    fn ready_is_emitted_when_a_full_queue_drains() {
        let cfg = test_config();
        let a = test_axis(&cfg);
        let b = test_axis(&cfg);
        let mut ctrl = Controller::new(cfg, &a, &b, PenLog::default());
        let mut out = String::new();

        // Three "ok"s, a silent queue-filling push, then a drop.
        for _ in 0..3 {
            assert_eq!(
                ctrl.process_line("X0 Y-10 F600", &mut out),
                LineStatus::Queued { full_after: false }
            );
        }
        assert_eq!(
            ctrl.process_line("X0 Y-10", &mut out),
            LineStatus::Queued { full_after: true }
        );
        assert_eq!(ctrl.process_line("X0 Y-10", &mut out), LineStatus::Dropped);
        assert_eq!(out, "ok\r\nok\r\nok\r\ndropped\r\n");

        // The first pop frees the slot and announces it.
        out.clear();
        ctrl.poll(&mut out);
        assert_eq!(out, "Ready\r\n");
    }

    #[test]
    fn byte_intake_parses_complete_lines() {
        let cfg = test_config();
        let a = test_axis(&cfg);
        let b = test_axis(&cfg);
        let mut ctrl = Controller::new(cfg, &a, &b, PenLog::default());
        let mut out = String::new();

        let mut statuses = Vec::new();
        for byte in b"X0 Y-10 F600\r\nX5\r\n" {
            if let Some(status) = ctrl.feed_byte(*byte, &mut out) {
                statuses.push(status);
            }
        }
        assert_eq!(
            statuses,
            vec![
                LineStatus::Queued { full_after: false },
                LineStatus::Queued { full_after: false },
            ]
        );
        assert_eq!(out, "ok\r\nok\r\n");
        assert_eq!(ctrl.queue.len(), 2);
    }

    #[test]
    fn boot_banner() {
        let cfg = test_config();
        let a = test_axis(&cfg);
        let b = test_axis(&cfg);
        let ctrl = Controller::new(cfg, &a, &b, PenLog::default());
        let mut out = String::new();
        ctrl.announce_ready(&mut out);
        assert_eq!(out, "Ready\r\n");
    }
}
