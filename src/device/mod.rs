//! The emulated capture device.
//!
//! One [`Device`] owns the buffer queue, the streaming state and the frame
//! source behind a single mutex. Handles are cheap clones of the same
//! device, so several actors can issue control calls concurrently.

pub mod control;
pub mod io;
pub mod stats;
pub mod stream;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info, instrument};

use crate::capture::{Format, Frame, FrameSource, TestPattern};
use crate::error::{DeviceError, Result};
use crate::queue::{BufferQueue, FillOutcome};
use crate::Config;

pub use control::{Capabilities, CaptureControl, InputInfo, InputKind};
pub use io::Readiness;
pub use stats::{DeviceStats, StatsSnapshot};
pub use stream::StreamState;

/// How a dequeue behaves when no buffer is Done/Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueMode {
    /// Fail with [`DeviceError::NoBufferReady`].
    NonBlocking,
    /// Park until a buffer completes; `None` waits without a deadline.
    Blocking { timeout: Option<Duration> },
}

/// Which access path currently owns the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum IoOwner {
    #[default]
    Unclaimed,
    Streaming,
    Read,
}

/// Everything the device lock guards.
pub(crate) struct DeviceState {
    pub(crate) stream: StreamState,
    pub(crate) queue: BufferQueue,
    pub(crate) source: Box<dyn FrameSource>,
    pub(crate) owner: IoOwner,
    pub(crate) read_cursor: Option<io::ReadCursor>,
}

impl DeviceState {
    fn claim_streaming(&mut self) -> Result<()> {
        match self.owner {
            IoOwner::Read => Err(DeviceError::Busy("buffers owned by read()".into())),
            _ => {
                self.owner = IoOwner::Streaming;
                Ok(())
            }
        }
    }

    fn check_streaming_owner(&self) -> Result<()> {
        match self.owner {
            IoOwner::Read => Err(DeviceError::Busy("buffers owned by read()".into())),
            _ => Ok(()),
        }
    }

    /// Queue `index` and, while streaming, fill it straight away.
    pub(crate) fn enqueue_and_drive(&mut self, index: usize) -> Result<Option<FillOutcome>> {
        self.queue.enqueue(index)?;
        Ok(self.stream.on_enqueue(&mut self.queue, self.source.as_mut()))
    }

    /// Stop streaming and hand the pool back to nobody if it is empty.
    fn stop(&mut self) {
        self.stream.stop(&mut self.queue);
        self.read_cursor = None;
        if self.queue.is_empty() {
            self.owner = IoOwner::Unclaimed;
        }
    }
}

struct Shared {
    state: Mutex<DeviceState>,
    /// Signalled whenever a buffer completes or the stream stops.
    frame_ready: Condvar,
    /// Async counterpart of `frame_ready`.
    notify: Notify,
    stats: DeviceStats,
    caps: Capabilities,
    dequeue_timeout: Option<Duration>,
}

/// Handle to the emulated capture device.
#[derive(Clone)]
pub struct Device {
    shared: Arc<Shared>,
}

impl Device {
    /// Build a device producing the synthetic test pattern.
    pub fn new(config: &Config) -> Self {
        Self::with_source(config, Box::new(TestPattern::new()))
    }

    /// Build a device around any frame source.
    pub fn with_source(config: &Config, source: Box<dyn FrameSource>) -> Self {
        let dequeue_timeout = match config.capture.dequeue_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        info!(card = %config.device.card, max_buffers = config.capture.max_buffers, "creating capture device");

        let state = DeviceState {
            stream: StreamState::Stopped,
            queue: BufferQueue::new(Format::FIXED, config.capture.max_buffers),
            source,
            owner: IoOwner::Unclaimed,
            read_cursor: None,
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                frame_ready: Condvar::new(),
                notify: Notify::new(),
                stats: DeviceStats::default(),
                caps: Capabilities::from_config(&config.device),
                dequeue_timeout,
            }),
        }
    }

    /// Blocking dequeue mode with the configured timeout.
    pub fn blocking(&self) -> DequeueMode {
        DequeueMode::Blocking {
            timeout: self.shared.dequeue_timeout,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn stream_state(&self) -> StreamState {
        self.lock().stream
    }

    /// Current state of every buffer in the pool.
    pub fn buffer_states(&self) -> Vec<crate::queue::BufferState> {
        self.lock()
            .queue
            .buffers()
            .iter()
            .map(|b| b.state())
            .collect()
    }

    /// Async dequeue. Dropping the returned future cancels the wait.
    pub async fn dequeue_async(&self) -> Result<Frame> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not missed.
            notified.as_mut().enable();

            match self.dequeue_buffer_with(DequeueMode::NonBlocking) {
                Err(DeviceError::NoBufferReady) => {}
                other => return other,
            }
            let streaming = self.lock().stream.is_streaming();
            if !streaming {
                return Err(DeviceError::InvalidState(
                    "not streaming, nothing will complete".into(),
                ));
            }
            notified.await;
        }
    }

    /// Stop streaming and free the pool. Used on teardown.
    #[instrument(skip(self))]
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.stop();
        // Every buffer is Free after stop, so release cannot fail.
        if state.queue.release().is_ok() {
            state.owner = IoOwner::Unclaimed;
        }
        drop(state);
        self.wake();
        debug!("device shut down");
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wake(&self) {
        self.shared.frame_ready.notify_all();
        self.shared.notify.notify_waiters();
    }

    pub(crate) fn record_fills(&self, outcomes: impl IntoIterator<Item = FillOutcome>) {
        let mut any = false;
        for outcome in outcomes {
            debug!(index = outcome.index, status = ?outcome.status, "buffer completed");
            self.shared.stats.record_fill(outcome.status);
            any = true;
        }
        if any {
            self.wake();
        }
    }

    pub(crate) fn dequeue_buffer_with(&self, mode: DequeueMode) -> Result<Frame> {
        let state = self.lock();
        state.check_streaming_owner()?;
        let (_state, frame) = self.wait_for_frame(state, mode)?;
        Ok(frame)
    }

    /// Take the oldest finished buffer, parking on the condvar (lock
    /// released) while none is ready.
    pub(crate) fn wait_for_frame<'a>(
        &'a self,
        mut state: MutexGuard<'a, DeviceState>,
        mode: DequeueMode,
    ) -> Result<(MutexGuard<'a, DeviceState>, Frame)> {
        let deadline = match mode {
            DequeueMode::Blocking { timeout: Some(t) } => Some(Instant::now() + t),
            _ => None,
        };

        loop {
            match state.queue.dequeue() {
                Ok(frame) => {
                    self.shared.stats.record_dequeue();
                    return Ok((state, frame));
                }
                Err(DeviceError::NoBufferReady) => {}
                Err(e) => return Err(e),
            }

            if mode == DequeueMode::NonBlocking {
                return Err(DeviceError::NoBufferReady);
            }
            if !state.stream.is_streaming() {
                return Err(DeviceError::InvalidState(
                    "not streaming, nothing will complete".into(),
                ));
            }

            state = match deadline {
                None => self
                    .shared
                    .frame_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(DeviceError::Timeout);
                    }
                    self.shared
                        .frame_ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("card", &self.shared.caps.card)
            .finish_non_exhaustive()
    }
}
