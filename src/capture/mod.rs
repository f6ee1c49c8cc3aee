pub mod format;
pub mod frame;
pub mod source;

pub use format::{enum_format, ColorSpace, Field, Format, FormatDesc, PixelFormat};
pub use frame::{Frame, FrameMetadata, FrameStatus};
pub use source::{FillResult, FrameSource, TestPattern};
