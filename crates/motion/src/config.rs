//! Fixed machine parameters that are not part of the geometry.

/// Highest feed rate a block may request, in mm/min.
pub const MAX_FEED: i32 = 800;

/// Period of the step interrupt, in microseconds.
pub const INTERRUPT_PERIOD_US: u32 = 50;

/// Step interrupt rate implied by the period.
pub const TICK_RATE_HZ: u32 = 1_000_000 / INTERRUPT_PERIOD_US;

/// Slots in the lookahead queue. One slot is a sentinel distinguishing full
/// from empty, so the usable depth is one less.
pub const QUEUE_SLOTS: usize = 5;

/// Longest accepted command line, in bytes.
pub const LINE_CAPACITY: usize = 128;
