//! Access paths on top of the control surface: direct read(), buffer
//! mapping and readiness polling.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, instrument};

use super::{DequeueMode, Device, DeviceState, IoOwner};
use crate::capture::Frame;
use crate::error::{DeviceError, Result};

/// Partially consumed frame held between read() calls.
#[derive(Debug)]
pub(crate) struct ReadCursor {
    frame: Frame,
    pos: usize,
}

/// Result of a readiness query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    /// At least one Done/Error buffer can be dequeued.
    pub readable: bool,
    /// Nothing is readable and nothing will become readable (not streaming).
    pub error: bool,
}

impl Readiness {
    fn of(state: &DeviceState) -> Self {
        let readable = state.queue.has_ready() || state.read_cursor.is_some();
        Self {
            readable,
            error: !readable && !state.stream.is_streaming(),
        }
    }

    fn settled(self) -> bool {
        self.readable || self.error
    }
}

impl Device {
    /// Non-blocking readiness query. Never changes device state, so a
    /// fresh device reports `error` here until something starts I/O.
    pub fn poll(&self) -> Readiness {
        Readiness::of(&self.lock())
    }

    /// Wait until a buffer is readable or the device reports an error.
    ///
    /// On a device nobody has claimed yet this starts read I/O first, so
    /// waiting for data and then calling [`read`](Self::read) works.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> Result<Readiness> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        self.prime_read_io(&mut state)?;
        loop {
            let readiness = Readiness::of(&state);
            if readiness.settled() {
                return Ok(readiness);
            }
            state = match deadline {
                None => self
                    .shared
                    .frame_ready
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(DeviceError::Timeout);
                    }
                    self.shared
                        .frame_ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Async readiness wait; dropping the future cancels it. Starts read
    /// I/O on an unclaimed device, like [`wait_readable`](Self::wait_readable).
    pub async fn readable(&self) -> Readiness {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let readiness = {
                let mut state = self.lock();
                match self.prime_read_io(&mut state) {
                    Ok(()) => Readiness::of(&state),
                    Err(_) => Readiness {
                        readable: false,
                        error: true,
                    },
                }
            };
            if readiness.settled() {
                return readiness;
            }
            notified.await;
        }
    }

    /// Snapshot of buffer `index`'s memory, as a mapping consumer sees it.
    pub fn map_buffer(&self, index: usize) -> Result<Bytes> {
        self.lock().queue.memory(index)
    }

    /// Free the pool. Fails while streaming or while any buffer is in use.
    #[instrument(skip(self))]
    pub fn release_buffers(&self) -> Result<()> {
        let mut state = self.lock();
        if state.stream.is_streaming() {
            return Err(DeviceError::InvalidState(
                "cannot free buffers while streaming".into(),
            ));
        }
        state.check_streaming_owner()?;
        state.queue.release()?;
        state.owner = IoOwner::Unclaimed;
        Ok(())
    }

    /// Tear down whatever read() set up. No-op for other owners.
    pub fn release_io(&self) -> Result<()> {
        let mut state = self.lock();
        if state.owner != IoOwner::Read {
            return Ok(());
        }
        state.stop();
        state.queue.release()?;
        state.owner = IoOwner::Unclaimed;
        drop(state);
        self.wake();
        Ok(())
    }

    /// Pull the next frame into `out`, returning the bytes copied.
    ///
    /// The first call allocates a single buffer, queues it and starts
    /// streaming. A frame longer than `out` is handed out across several
    /// calls; its buffer is queued again once fully consumed.
    pub fn read(&self, out: &mut [u8], mode: DequeueMode) -> Result<usize> {
        let mut state = self.lock();
        match state.owner {
            IoOwner::Streaming => {
                return Err(DeviceError::Busy("buffers owned by streaming I/O".into()))
            }
            IoOwner::Unclaimed => self.start_read_io(&mut state)?,
            IoOwner::Read => {}
        }

        let pending = state.read_cursor.take();
        let mut cursor = match pending {
            Some(cursor) => cursor,
            None => {
                let (guard, frame) = self.wait_for_frame(state, mode)?;
                state = guard;
                if frame.is_error() {
                    let index = frame.index();
                    let outcome = state.enqueue_and_drive(index)?;
                    drop(state);
                    self.record_fills(outcome);
                    return Err(DeviceError::FillFailed { index });
                }
                ReadCursor { frame, pos: 0 }
            }
        };

        let remaining = &cursor.frame.data[cursor.pos..];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        cursor.pos += n;

        if cursor.pos < cursor.frame.data.len() {
            state.read_cursor = Some(cursor);
            return Ok(n);
        }

        let outcome = state.enqueue_and_drive(cursor.frame.index())?;
        drop(state);
        self.record_fills(outcome);
        Ok(n)
    }

    /// Start read I/O if no access path owns the pool and none is allocated.
    fn prime_read_io(&self, state: &mut DeviceState) -> Result<()> {
        if state.owner == IoOwner::Unclaimed && state.queue.is_empty() {
            self.start_read_io(state)?;
        }
        Ok(())
    }

    #[instrument(skip(self, state))]
    fn start_read_io(&self, state: &mut DeviceState) -> Result<()> {
        state.queue.configure(1)?;
        state.owner = IoOwner::Read;
        state.queue.enqueue(0)?;
        let filled = state.stream.start(&mut state.queue, state.source.as_mut())?;
        debug!("read I/O started");
        self.record_fills(filled);
        Ok(())
    }
}
