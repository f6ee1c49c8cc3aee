//! Buffer pool and the state transitions between its slots.
//!
//! The engine is not synchronized on its own; the owning device holds it
//! behind its single lock and every method here runs inside that scope.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use super::buffer::{page_align, Buffer, BufferInfo, BufferState};
use crate::capture::{FillResult, Format, Frame, FrameMetadata, FrameSource, FrameStatus};
use crate::error::{DeviceError, Result};

/// Smallest number of queued buffers needed before streaming may start.
pub const MIN_BUFFERS: usize = 1;

/// Hard ceiling on pool size.
pub const MAX_BUFFERS: usize = 32;

/// What one engine tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOutcome {
    pub index: usize,
    pub status: FrameStatus,
}

#[derive(Debug)]
pub struct BufferQueue {
    format: Format,
    max_buffers: usize,
    buffers: Vec<Buffer>,
    /// Queued slots in enqueue order.
    queued: VecDeque<usize>,
    /// Done/Error slots in completion order.
    done: VecDeque<usize>,
    sequence: u64,
    epoch: Instant,
}

impl BufferQueue {
    pub fn new(format: Format, max_buffers: usize) -> Self {
        Self {
            format,
            max_buffers: max_buffers.clamp(MIN_BUFFERS, MAX_BUFFERS),
            buffers: Vec::new(),
            queued: VecDeque::new(),
            done: VecDeque::new(),
            sequence: 0,
            epoch: Instant::now(),
        }
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn min_buffers(&self) -> usize {
        MIN_BUFFERS
    }

    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn state(&self, index: usize) -> Option<BufferState> {
        self.buffers.get(index).map(Buffer::state)
    }

    pub fn all_free(&self) -> bool {
        self.buffers.iter().all(|b| b.state == BufferState::Free)
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn has_ready(&self) -> bool {
        !self.done.is_empty()
    }

    /// Allocate `requested` buffers sized to the current format.
    ///
    /// The count is clamped to `[MIN_BUFFERS, max_buffers]`. Asking for the
    /// count the pool already has keeps the existing buffers.
    #[instrument(skip(self))]
    pub fn configure(&mut self, requested: usize) -> Result<usize> {
        if !self.all_free() {
            return Err(DeviceError::InvalidState(
                "cannot reallocate while buffers are in use".into(),
            ));
        }

        let count = requested.clamp(MIN_BUFFERS, self.max_buffers);
        if count == self.buffers.len() && self.buffers.iter().all(|b| b.len() == self.format.size())
        {
            debug!(count, "pool already configured");
            return Ok(count);
        }

        let size = self.format.size();
        self.buffers = (0..count).map(|index| Buffer::new(index, size)).collect();
        self.queued.clear();
        self.done.clear();
        debug!(count, size, "pool allocated");
        Ok(count)
    }

    /// Append `count` buffers of `size` bytes to the pool.
    pub fn create(&mut self, count: usize, size: usize) -> Result<Range<usize>> {
        if size < self.format.size() {
            return Err(DeviceError::InvalidArgument(format!(
                "buffer size {size} smaller than image size {}",
                self.format.size()
            )));
        }
        let room = self.max_buffers - self.buffers.len();
        if room == 0 {
            return Err(DeviceError::InvalidArgument(format!(
                "pool already holds {} buffers",
                self.max_buffers
            )));
        }

        let start = self.buffers.len();
        let end = start + count.clamp(1, room);
        self.buffers
            .extend((start..end).map(|index| Buffer::new(index, size)));
        debug!(start, end, size, "buffers appended");
        Ok(start..end)
    }

    /// Drop every buffer. Only allowed while all of them are free.
    pub fn release(&mut self) -> Result<()> {
        if !self.all_free() {
            return Err(DeviceError::InvalidState(
                "cannot free buffers that are in use".into(),
            ));
        }
        self.buffers.clear();
        self.queued.clear();
        self.done.clear();
        Ok(())
    }

    /// Move a free buffer to the queued list.
    pub fn enqueue(&mut self, index: usize) -> Result<()> {
        let count = self.buffers.len();
        let buffer = self.buffers.get_mut(index).ok_or_else(|| {
            DeviceError::InvalidArgument(format!("buffer index {index} out of range ({count})"))
        })?;
        if buffer.state != BufferState::Free {
            return Err(DeviceError::InvalidArgument(format!(
                "buffer {index} is {:?}, not Free",
                buffer.state
            )));
        }

        buffer.state = BufferState::Queued;
        buffer.bytes_used = 0;
        self.queued.push_back(index);
        Ok(())
    }

    /// Hand the oldest Done/Error buffer to the caller and return it to Free.
    ///
    /// The payload is copied out; the slot's memory keeps the same bytes
    /// until the index is enqueued again.
    pub fn dequeue(&mut self) -> Result<Frame> {
        let index = self.done.pop_front().ok_or(DeviceError::NoBufferReady)?;
        let format = self.format;
        let buffer = &mut self.buffers[index];

        let status = match buffer.state {
            BufferState::Done => FrameStatus::Done,
            _ => FrameStatus::Error,
        };
        let data = Bytes::copy_from_slice(buffer.payload());
        let meta = FrameMetadata {
            index,
            sequence: buffer.sequence,
            bytes_used: data.len(),
            status,
            width: format.width,
            height: format.height,
            stride: format.bytes_per_line,
            format: format.pixel_format,
            timestamp: buffer.timestamp,
        };
        buffer.state = BufferState::Free;

        Ok(Frame {
            data,
            meta: Arc::new(meta),
        })
    }

    /// Fill the oldest queued buffer from `source`.
    ///
    /// Returns `None` when nothing is queued.
    pub fn drive_once(&mut self, source: &mut dyn FrameSource) -> Option<FillOutcome> {
        let index = self.queued.pop_front()?;
        let size = self.format.size();
        let sequence = self.sequence;
        self.sequence += 1;
        let timestamp = self.epoch.elapsed();

        let buffer = &mut self.buffers[index];
        buffer.state = BufferState::InFlight;

        let status = match source.fill(&mut buffer.mem, size) {
            FillResult::Done(len) => {
                buffer.bytes_used = len.min(buffer.mem.len());
                buffer.state = BufferState::Done;
                FrameStatus::Done
            }
            FillResult::Error => {
                warn!(index, "fill failed");
                buffer.bytes_used = 0;
                buffer.state = BufferState::Error;
                FrameStatus::Error
            }
        };
        buffer.sequence = sequence;
        buffer.timestamp = timestamp;
        self.done.push_back(index);

        Some(FillOutcome { index, status })
    }

    /// Force every buffer back to Free, discarding queued and finished work.
    pub fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.state = BufferState::Free;
            buffer.bytes_used = 0;
        }
        self.queued.clear();
        self.done.clear();
    }

    /// Restart frame numbering; called when streaming starts.
    pub fn restart_sequence(&mut self) {
        self.sequence = 0;
    }

    pub fn query(&self, index: usize) -> Result<BufferInfo> {
        let buffer = self.buffers.get(index).ok_or_else(|| {
            DeviceError::InvalidArgument(format!("buffer index {index} out of range"))
        })?;
        Ok(buffer.info(self.mmap_offset(index)))
    }

    /// Snapshot of a buffer's whole memory region.
    pub fn memory(&self, index: usize) -> Result<Bytes> {
        self.buffers
            .get(index)
            .map(|b| Bytes::copy_from_slice(&b.mem))
            .ok_or_else(|| DeviceError::InvalidArgument(format!("buffer index {index} out of range")))
    }

    fn mmap_offset(&self, index: usize) -> usize {
        self.buffers[..index].iter().map(|b| page_align(b.len())).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::TestPattern;

    struct Failing;

    impl FrameSource for Failing {
        fn fill(&mut self, _mem: &mut [u8], _size: usize) -> FillResult {
            FillResult::Error
        }
    }

    fn queue() -> BufferQueue {
        BufferQueue::new(Format::FIXED, MAX_BUFFERS)
    }

    #[test]
    fn configure_yields_free_buffers() {
        for n in [1usize, 2, 5, 32] {
            let mut q = queue();
            assert_eq!(q.configure(n).unwrap(), n);
            assert_eq!(q.len(), n);
            assert!(q.all_free());
            assert!(q.buffers().iter().all(|b| b.len() == 76_800));
        }
    }

    #[test]
    fn configure_clamps_count() {
        let mut q = queue();
        assert_eq!(q.configure(0).unwrap(), 1);
        assert_eq!(q.configure(1000).unwrap(), MAX_BUFFERS);

        let mut small = BufferQueue::new(Format::FIXED, 4);
        assert_eq!(small.configure(8).unwrap(), 4);
    }

    #[test]
    fn configure_rejected_while_in_use() {
        let mut q = queue();
        q.configure(2).unwrap();
        q.enqueue(1).unwrap();

        assert!(matches!(q.configure(3), Err(DeviceError::InvalidState(_))));
        assert_eq!(q.len(), 2);
        assert_eq!(q.state(1), Some(BufferState::Queued));
    }

    #[test]
    fn enqueue_validates_index_and_state() {
        let mut q = queue();
        q.configure(2).unwrap();

        assert!(matches!(q.enqueue(2), Err(DeviceError::InvalidArgument(_))));
        q.enqueue(0).unwrap();
        assert!(matches!(q.enqueue(0), Err(DeviceError::InvalidArgument(_))));
        assert_eq!(q.queued_count(), 1);
    }

    #[test]
    fn drive_once_fills_in_fifo_order() {
        let mut q = queue();
        let mut src = TestPattern::new();
        q.configure(3).unwrap();
        q.enqueue(2).unwrap();
        q.enqueue(0).unwrap();

        let first = q.drive_once(&mut src).unwrap();
        let second = q.drive_once(&mut src).unwrap();
        assert_eq!(first.index, 2);
        assert_eq!(second.index, 0);
        assert!(q.drive_once(&mut src).is_none());

        let frame = q.dequeue().unwrap();
        assert_eq!(frame.index(), 2);
        assert_eq!(frame.data.len(), 76_800);
        assert_eq!(frame.uniform_value(), Some(0));
        assert_eq!(q.state(2), Some(BufferState::Free));

        let frame = q.dequeue().unwrap();
        assert_eq!(frame.index(), 0);
        assert_eq!(frame.uniform_value(), Some(1));
        assert_eq!(frame.meta.sequence, 1);
    }

    #[test]
    fn dequeue_empty_is_no_buffer_ready() {
        let mut q = queue();
        q.configure(1).unwrap();
        q.enqueue(0).unwrap();
        assert!(matches!(q.dequeue(), Err(DeviceError::NoBufferReady)));
    }

    #[test]
    fn failed_fill_is_dequeued_as_error() {
        let mut q = queue();
        q.configure(1).unwrap();
        q.enqueue(0).unwrap();

        let outcome = q.drive_once(&mut Failing).unwrap();
        assert_eq!(outcome.status, FrameStatus::Error);
        assert_eq!(q.state(0), Some(BufferState::Error));

        let frame = q.dequeue().unwrap();
        assert!(frame.is_error());
        assert!(frame.data.is_empty());
        assert_eq!(q.state(0), Some(BufferState::Free));
    }

    #[test]
    fn reset_frees_everything() {
        let mut q = queue();
        let mut src = TestPattern::new();
        q.configure(3).unwrap();
        q.enqueue(0).unwrap();
        q.enqueue(1).unwrap();
        q.drive_once(&mut src);

        q.reset();
        assert!(q.all_free());
        assert_eq!(q.queued_count(), 0);
        assert!(!q.has_ready());
    }

    #[test]
    fn create_rejects_undersized_buffers() {
        let mut q = queue();
        assert!(matches!(
            q.create(1, 76_799),
            Err(DeviceError::InvalidArgument(_))
        ));
        let range = q.create(2, 80_000).unwrap();
        assert_eq!(range, 0..2);
        assert_eq!(q.buffers()[1].len(), 80_000);
    }

    #[test]
    fn query_reports_page_aligned_offsets() {
        let mut q = queue();
        q.configure(3).unwrap();
        let aligned = page_align(76_800);

        let info = q.query(2).unwrap();
        assert_eq!(info.offset, 2 * aligned);
        assert_eq!(info.length, 76_800);
        assert_eq!(info.state, BufferState::Free);
        assert!(q.query(3).is_err());
    }

    #[test]
    fn memory_keeps_payload_after_dequeue() {
        let mut q = queue();
        let mut src = TestPattern::starting_at(42);
        q.configure(1).unwrap();
        q.enqueue(0).unwrap();
        q.drive_once(&mut src);
        q.dequeue().unwrap();

        let mem = q.memory(0).unwrap();
        assert!(mem.iter().all(|&b| b == 42));
    }
}
