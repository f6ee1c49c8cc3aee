//! Frame sources: what fills a buffer once the queue engine picks it.

use tracing::warn;

/// Outcome of one fill attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillResult {
    /// The region was written; `usize` is the payload length.
    Done(usize),
    Error,
}

/// Backend that writes one image into a buffer per call.
///
/// The synthetic [`TestPattern`] is the only implementation shipped; a real
/// capture backend slots in here without touching the queue engine.
pub trait FrameSource: Send {
    /// Write one image of `size` bytes into `mem`.
    fn fill(&mut self, mem: &mut [u8], size: usize) -> FillResult;
}

/// Fills the whole image with one byte value that advances by one per
/// successful frame, wrapping at 256.
#[derive(Debug, Default, Clone)]
pub struct TestPattern {
    next: u8,
}

impl TestPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the cycle at `value` instead of 0.
    pub fn starting_at(value: u8) -> Self {
        Self { next: value }
    }

    /// Value the next successful fill will write.
    pub fn next_value(&self) -> u8 {
        self.next
    }
}

impl FrameSource for TestPattern {
    fn fill(&mut self, mem: &mut [u8], size: usize) -> FillResult {
        let Some(image) = mem.get_mut(..size) else {
            warn!(region = mem.len(), size, "buffer smaller than image size");
            return FillResult::Error;
        };
        image.fill(self.next);
        self.next = self.next.wrapping_add(1);
        FillResult::Done(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_whole_region_with_counter() {
        let mut src = TestPattern::new();
        let mut mem = vec![0xAAu8; 64];

        assert_eq!(src.fill(&mut mem, 64), FillResult::Done(64));
        assert!(mem.iter().all(|&b| b == 0));

        assert_eq!(src.fill(&mut mem, 64), FillResult::Done(64));
        assert!(mem.iter().all(|&b| b == 1));
    }

    #[test]
    fn counter_wraps_at_256() {
        let mut src = TestPattern::starting_at(254);
        let mut mem = [0u8; 4];
        for expected in [254u8, 255, 0, 1] {
            assert_eq!(src.fill(&mut mem, 4), FillResult::Done(4));
            assert_eq!(mem, [expected; 4]);
        }
    }

    #[test]
    fn undersized_region_fails_without_advancing() {
        let mut src = TestPattern::new();
        let mut small = [7u8; 8];

        assert_eq!(src.fill(&mut small, 16), FillResult::Error);
        assert_eq!(small, [7u8; 8]);
        assert_eq!(src.next_value(), 0);
    }

    #[test]
    fn larger_region_only_writes_image() {
        let mut src = TestPattern::starting_at(9);
        let mut mem = [0u8; 6];
        assert_eq!(src.fill(&mut mem, 4), FillResult::Done(4));
        assert_eq!(mem, [9, 9, 9, 9, 0, 0]);
    }
}
