//! Control surface: capability, format, input, buffer and stream requests.

use std::ops::Range;

use tracing::{debug, info, instrument};

use super::{DequeueMode, Device, IoOwner};
use crate::capture::{self, Format, FormatDesc, Frame};
use crate::error::{DeviceError, Result};
use crate::queue::BufferInfo;
use crate::DeviceConfig;

/// Fixed capability set reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub capture: bool,
    pub read_write: bool,
    pub streaming: bool,
}

impl Capabilities {
    pub(crate) fn from_config(config: &DeviceConfig) -> Self {
        Self {
            driver: config.driver.clone(),
            card: config.card.clone(),
            bus_info: config.bus_info.clone(),
            capture: true,
            read_write: true,
            streaming: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Camera,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputInfo {
    pub index: u32,
    pub name: String,
    pub kind: InputKind,
}

/// Requests an external actor issues against a capture device.
///
/// Every call takes the device lock for its whole duration, except that a
/// blocking dequeue releases it while parked.
pub trait CaptureControl {
    fn query_capability(&self) -> Capabilities;

    fn enum_format(&self, index: u32) -> Result<FormatDesc>;
    fn format(&self) -> Format;
    /// Returns the format that would be applied; never changes anything.
    fn try_format(&self, requested: &Format) -> Format;
    /// Returns the format actually in effect, which is always the fixed one.
    fn set_format(&self, requested: &Format) -> Format;

    fn enum_input(&self, index: u32) -> Result<InputInfo>;
    fn input(&self) -> u32;
    fn set_input(&self, index: u32) -> Result<()>;

    /// Allocate the pool; returns the count actually allocated.
    fn request_buffers(&self, count: usize) -> Result<usize>;
    /// Append buffers of at least the image size; returns their indices.
    fn create_buffers(&self, count: usize, size: usize) -> Result<Range<usize>>;
    fn query_buffer(&self, index: usize) -> Result<BufferInfo>;
    fn queue_buffer(&self, index: usize) -> Result<()>;
    fn dequeue_buffer(&self, mode: DequeueMode) -> Result<Frame>;

    fn stream_on(&self) -> Result<()>;
    fn stream_off(&self) -> Result<()>;
}

impl CaptureControl for Device {
    fn query_capability(&self) -> Capabilities {
        self.shared.caps.clone()
    }

    fn enum_format(&self, index: u32) -> Result<FormatDesc> {
        capture::enum_format(index)
    }

    fn format(&self) -> Format {
        *self.lock().queue.format()
    }

    fn try_format(&self, requested: &Format) -> Format {
        Format::negotiate(requested)
    }

    fn set_format(&self, requested: &Format) -> Format {
        let applied = Format::negotiate(requested);
        if applied != *requested {
            debug!(?requested, "format request adjusted to fixed format");
        }
        applied
    }

    fn enum_input(&self, index: u32) -> Result<InputInfo> {
        if index != 0 {
            return Err(DeviceError::InvalidArgument(format!(
                "input index {index} out of range"
            )));
        }
        Ok(InputInfo {
            index,
            name: self.shared.caps.card.clone(),
            kind: InputKind::Camera,
        })
    }

    fn input(&self) -> u32 {
        0
    }

    fn set_input(&self, index: u32) -> Result<()> {
        match index {
            0 => Ok(()),
            _ => Err(DeviceError::InvalidArgument(format!(
                "input index {index} out of range"
            ))),
        }
    }

    #[instrument(skip(self))]
    fn request_buffers(&self, count: usize) -> Result<usize> {
        let mut state = self.lock();
        if state.stream.is_streaming() {
            return Err(DeviceError::InvalidState(
                "cannot reallocate buffers while streaming".into(),
            ));
        }
        state.claim_streaming()?;
        let allocated = state.queue.configure(count)?;
        info!(requested = count, allocated, "buffers requested");
        Ok(allocated)
    }

    #[instrument(skip(self))]
    fn create_buffers(&self, count: usize, size: usize) -> Result<Range<usize>> {
        let mut state = self.lock();
        if state.stream.is_streaming() {
            return Err(DeviceError::InvalidState(
                "cannot add buffers while streaming".into(),
            ));
        }
        state.check_streaming_owner()?;
        let range = state.queue.create(count, size)?;
        state.owner = IoOwner::Streaming;
        Ok(range)
    }

    fn query_buffer(&self, index: usize) -> Result<BufferInfo> {
        self.lock().queue.query(index)
    }

    #[instrument(skip(self))]
    fn queue_buffer(&self, index: usize) -> Result<()> {
        let mut state = self.lock();
        state.check_streaming_owner()?;
        let outcome = state.enqueue_and_drive(index)?;
        drop(state);
        self.record_fills(outcome);
        Ok(())
    }

    fn dequeue_buffer(&self, mode: DequeueMode) -> Result<Frame> {
        let frame = self.dequeue_buffer_with(mode)?;
        debug!(index = frame.index(), sequence = frame.meta.sequence, "buffer dequeued");
        Ok(frame)
    }

    #[instrument(skip(self))]
    fn stream_on(&self) -> Result<()> {
        let mut state = self.lock();
        state.check_streaming_owner()?;
        let state = &mut *state;
        let filled = state.stream.start(&mut state.queue, state.source.as_mut())?;
        self.record_fills(filled);
        Ok(())
    }

    #[instrument(skip(self))]
    fn stream_off(&self) -> Result<()> {
        let mut state = self.lock();
        state.stop();
        if state.owner == IoOwner::Read {
            // read() set the pool up implicitly, so it goes away with the stream.
            state.queue.release()?;
            state.owner = IoOwner::Unclaimed;
        }
        drop(state);
        // Parked dequeuers re-check and bail out now that nothing will complete.
        self.wake();
        Ok(())
    }
}
