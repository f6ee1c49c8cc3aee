//! Streaming state machine.
//!
//! The queue and frame source are passed in by the caller, who holds the
//! device lock for the whole transition.

use tracing::{debug, info};

use crate::capture::FrameSource;
use crate::error::{DeviceError, Result};
use crate::queue::{BufferQueue, FillOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Stopped,
    Streaming,
}

impl StreamState {
    pub fn is_streaming(self) -> bool {
        self == Self::Streaming
    }

    /// `Stopped -> Streaming`, then fill every buffer queued so far in FIFO
    /// order. Starting an already running stream is a no-op.
    pub fn start(
        &mut self,
        queue: &mut BufferQueue,
        source: &mut dyn FrameSource,
    ) -> Result<Vec<FillOutcome>> {
        if self.is_streaming() {
            debug!("stream already running");
            return Ok(Vec::new());
        }

        let queued = queue.queued_count();
        if queued < queue.min_buffers() {
            return Err(DeviceError::InvalidState(format!(
                "{queued} buffers queued, need at least {}",
                queue.min_buffers()
            )));
        }

        queue.restart_sequence();
        *self = Self::Streaming;
        info!(queued, "streaming started");

        Ok(std::iter::from_fn(|| queue.drive_once(source)).collect())
    }

    /// `Streaming -> Stopped`. Always succeeds and returns every buffer to Free.
    pub fn stop(&mut self, queue: &mut BufferQueue) {
        if self.is_streaming() {
            info!("streaming stopped");
        }
        *self = Self::Stopped;
        queue.reset();
    }

    /// Production hook for a freshly queued buffer: fills it only while streaming.
    pub fn on_enqueue(
        self,
        queue: &mut BufferQueue,
        source: &mut dyn FrameSource,
    ) -> Option<FillOutcome> {
        if self.is_streaming() {
            queue.drive_once(source)
        } else {
            None
        }
    }
}
