pub mod capture;
pub mod device;
pub mod error;
pub mod queue;
pub mod registry;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{Format, Frame, FrameSource, PixelFormat, TestPattern};
pub use device::{CaptureControl, DequeueMode, Device, Readiness, StreamState};
pub use error::{DeviceError, RegistryError, Result};
pub use queue::{BufferInfo, BufferState};
pub use registry::{DeviceRegistry, MemoryRegistry, Registration};

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub capture: CaptureConfig,
    pub logging: LoggingConfig,
    pub demo: DemoConfig,
}

/// Identity strings reported to consumers and the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub node_name: String,
    pub preferred_node: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub buffer_count: u32,
    pub max_buffers: usize,
    /// Blocking dequeue deadline; 0 waits forever.
    pub dequeue_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    /// Explicit request/queue/dequeue/stream calls.
    Mmap,
    /// Direct read() of whole frames.
    Read,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    pub frames: u64,
    pub io_mode: IoMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                driver: "synthcam".into(),
                card: "Synthetic Capture Device".into(),
                bus_info: "platform:synthcam".into(),
                node_name: "synthcam video".into(),
                preferred_node: None,
            },
            capture: CaptureConfig {
                buffer_count: 4,
                max_buffers: queue::MAX_BUFFERS,
                dequeue_timeout_ms: 1000,
            },
            logging: LoggingConfig {
                filter: "synthcam=info".into(),
            },
            demo: DemoConfig {
                frames: 300,
                io_mode: IoMode::Mmap,
            },
        }
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by
    /// `SYNTHCAM__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("SYNTHCAM")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
