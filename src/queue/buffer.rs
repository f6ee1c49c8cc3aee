use std::time::Duration;

/// Page granularity used to space out mmap offsets.
pub const PAGE_SIZE: usize = 4096;

/// Ownership state of a buffer slot.
///
/// `Free -> Queued -> InFlight -> Done | Error -> Free`; a stream stop sends
/// every slot straight back to `Free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Free,
    Queued,
    InFlight,
    Done,
    Error,
}

impl BufferState {
    /// Done and Error buffers are claimable by a dequeue.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// One slot of the pool and its backing memory.
#[derive(Debug)]
pub struct Buffer {
    pub(crate) index: usize,
    pub(crate) state: BufferState,
    pub(crate) mem: Vec<u8>,
    /// Payload length, meaningful only in `Done`.
    pub(crate) bytes_used: usize,
    pub(crate) sequence: u64,
    pub(crate) timestamp: Duration,
}

impl Buffer {
    pub(crate) fn new(index: usize, len: usize) -> Self {
        Self {
            index,
            state: BufferState::Free,
            mem: vec![0; len],
            bytes_used: 0,
            sequence: 0,
            timestamp: Duration::ZERO,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Produced bytes, or an empty slice unless the buffer is `Done`.
    pub fn payload(&self) -> &[u8] {
        match self.state {
            BufferState::Done => &self.mem[..self.bytes_used],
            _ => &[],
        }
    }

    pub(crate) fn info(&self, offset: usize) -> BufferInfo {
        BufferInfo {
            index: self.index,
            length: self.mem.len(),
            offset,
            state: self.state,
            bytes_used: self.bytes_used,
            sequence: self.sequence,
        }
    }
}

/// Snapshot returned by a buffer query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: usize,
    pub length: usize,
    /// Cookie a consumer passes to map this buffer.
    pub offset: usize,
    pub state: BufferState,
    pub bytes_used: usize,
    pub sequence: u64,
}

pub(crate) fn page_align(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE) * PAGE_SIZE
}
