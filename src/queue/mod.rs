pub mod buffer;
pub mod engine;

pub use buffer::{BufferInfo, BufferState, PAGE_SIZE};
pub use engine::{BufferQueue, FillOutcome, MAX_BUFFERS, MIN_BUFFERS};
