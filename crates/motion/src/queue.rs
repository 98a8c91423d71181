//! Fixed-capacity lookahead queue decoupling command intake from execution.

use crate::block::Block;

/// Circular buffer of pending motion blocks.
///
/// A fixed arena of `N` slots with front/back cursors; one slot stays empty
/// as a sentinel distinguishing full from empty, so at most `N - 1` blocks
/// are ever queued. The buffer never grows and never blocks: pushing into a
/// full queue is refused and the command gets a "dropped" reply instead.
pub struct LookaheadQueue<const N: usize = 5> {
    slots: [Block; N],
    front: usize,
    back: usize,
}

impl<const N: usize> LookaheadQueue<N> {
    pub fn new() -> Self {
        Self {
            slots: [Block::default(); N],
            front: 0,
            back: 0,
        }
    }

    fn next_back(&self) -> usize {
        if self.back >= N - 1 {
            0
        } else {
            self.back + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.front == self.back
    }

    pub fn is_full(&self) -> bool {
        self.front == self.next_back()
    }

    pub fn len(&self) -> usize {
        (self.back + N - self.front) % N
    }

    /// A copy of the most recently queued block, or the default block if
    /// nothing was ever queued. Seeds the parser so that omitted fields
    /// inherit their previous values.
    pub fn last(&self) -> Block {
        let idx = if self.back == 0 { N - 1 } else { self.back - 1 };
        self.slots[idx]
    }

    /// Enqueue a block; `false` (queue unchanged) when full.
    pub fn push(&mut self, block: Block) -> bool {
        if self.is_full() {
            return false;
        }
        self.slots[self.back] = block;
        self.back = self.next_back();
        true
    }

    pub fn pop(&mut self) -> Option<Block> {
        if self.is_empty() {
            return None;
        }
        let block = self.slots[self.front];
        self.front += 1;
        if self.front >= N {
            self.front = 0;
        }
        Some(block)
    }
}

impl<const N: usize> Default for LookaheadQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vplot_geom::Point;

    fn block(x: f64) -> Block {
        Block {
            target: Point::new(x, 0.0),
            ..Block::default()
        }
    }

    #[test]
    fn usable_depth_is_slots_minus_one() {
        let mut q = LookaheadQueue::<5>::new();
        for i in 0..4 {
            assert_eq!(q.len(), i);
            assert!(q.push(block(i as f64)));
        }
        assert!(q.is_full());
        assert!(!q.push(block(99.0)));
        assert_eq!(q.len(), 4);

        // One pop makes room for exactly one more.
        assert_eq!(q.pop().unwrap(), block(0.0));
        assert!(q.push(block(4.0)));
        assert!(!q.push(block(99.0)));
    }

    #[test]
    fn fifo_across_wraparound() {
        let mut q = LookaheadQueue::<5>::new();
        for i in 0..20 {
            assert!(q.push(block(i as f64)));
            assert!(q.push(block(i as f64 + 0.5)));
            assert_eq!(q.pop().unwrap(), block(i as f64));
            assert_eq!(q.pop().unwrap(), block(i as f64 + 0.5));
        }
        assert!(q.is_empty());
        assert!(q.pop().is_none());
    }

    #[test]
    fn last_tracks_most_recent_push() {
        let mut q = LookaheadQueue::<5>::new();
        assert_eq!(q.last(), Block::default());

        q.push(block(1.0));
        q.push(block(2.0));
        assert_eq!(q.last(), block(2.0));

        // Popping does not change what "most recently queued" means.
        q.pop();
        q.pop();
        assert!(q.is_empty());
        assert_eq!(q.last(), block(2.0));
    }
}
