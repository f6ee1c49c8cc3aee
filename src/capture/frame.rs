use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use super::format::{Format, PixelFormat};

/// Terminal state of a dequeued buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Payload fully written.
    Done,
    /// The frame source failed; payload is empty.
    Error,
}

/// Frame data handed to the consumer on dequeue
#[derive(Debug, Clone)]
pub struct Frame {
    /// Copy of the buffer payload, `meta.bytes_used` long
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Buffer slot the frame was produced into
    pub index: usize,
    pub sequence: u64,
    pub bytes_used: usize,
    pub status: FrameStatus,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    /// Completion time, relative to device creation
    pub timestamp: Duration,
}

impl Frame {
    /// Wrap a whole frame pulled through read(), which reports no buffer
    /// slot or timestamp.
    pub fn from_read(data: Bytes, sequence: u64, format: &Format) -> Self {
        Self {
            meta: Arc::new(FrameMetadata {
                index: 0,
                sequence,
                bytes_used: data.len(),
                status: FrameStatus::Done,
                width: format.width,
                height: format.height,
                stride: format.bytes_per_line,
                format: format.pixel_format,
                timestamp: Duration::ZERO,
            }),
            data,
        }
    }

    pub fn index(&self) -> usize {
        self.meta.index
    }

    pub fn is_error(&self) -> bool {
        self.meta.status == FrameStatus::Error
    }

    /// The byte every pixel was filled with, if the payload is a single
    /// repeated value.
    pub fn uniform_value(&self) -> Option<u8> {
        let first = *self.data.first()?;
        self.data.iter().all(|&b| b == first).then_some(first)
    }
}
