use vplot_geom::Point;

use crate::config::MAX_FEED;

/// One queued motion/state command, parsed from a serial line.
///
/// The parser seeds each new block as a copy of the most recently queued one,
/// so fields a line does not mention keep their previous values. A block is
/// never modified once it is in the queue.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Block {
    /// Absolute move target, in plotter-plane millimeters.
    pub target: Point,
    /// Requested feed rate in mm/min, never above [`MAX_FEED`].
    pub feed: i32,
    /// Pen state to apply before the move.
    pub lift: bool,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            target: Point::new(0.0, 0.0),
            feed: MAX_FEED,
            lift: true,
        }
    }
}
