//! Synthetic capture device, driven by a demo consumer

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use flume::bounded;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use synthcam::{
    capture::Format, CaptureControl, Config, DequeueMode, Device, DeviceError, Frame, IoMode,
    MemoryRegistry, Registration,
};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("synthcam launching...");

    let device = Device::new(&config);
    let registry = Arc::new(MemoryRegistry::new());
    let registration = Registration::register(registry, device.clone(), &config.device)?;
    info!(node = registration.node(), "device available");

    let caps = device.query_capability();
    let format = device.format();
    info!(
        "{} ({}) on {}: {}x{} {:?}, {} bytes/frame",
        caps.card, caps.driver, caps.bus_info, format.width, format.height, format.pixel_format,
        format.size_image
    );

    let (tx, rx) = bounded::<Frame>(config.capture.buffer_count as usize);
    let (stop_tx, stop_rx) = watch::channel(false);

    // Capture task
    let capture_device = device.clone();
    let capture_config = config.clone();
    let mut capture_handle = tokio::spawn(async move {
        let result = match capture_config.demo.io_mode {
            IoMode::Mmap => stream_frames(&capture_device, &capture_config, tx, stop_rx).await,
            IoMode::Read => {
                read_frames(capture_device.clone(), &capture_config, tx, stop_rx).await
            }
        };
        if let Err(e) = result {
            error!("Capture error: {}", e);
        }
    });

    // Consumer task
    let consumer = tokio::spawn(async move {
        let mut received = 0u64;
        let mut errors = 0u64;
        while let Ok(frame) = rx.recv_async().await {
            received += 1;
            if frame.is_error() {
                errors += 1;
                warn!(index = frame.index(), "received failed frame");
                continue;
            }
            debug!(
                index = frame.index(),
                sequence = frame.meta.sequence,
                value = ?frame.uniform_value(),
                "frame"
            );
        }
        (received, errors)
    });

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        done = &mut capture_handle => {
            done?;
            false
        }
    };
    if interrupted {
        info!("interrupted, stopping stream");
        // Raise the flag first so the capture loop cannot start I/O again.
        stop_tx.send_replace(true);
        device.stream_off()?;
        capture_handle.await?;
    }

    let (received, errors) = consumer.await?;
    let stats = device.stats();
    info!(
        received,
        errors,
        produced = stats.frames_produced,
        dequeued = stats.frames_dequeued,
        "synthcam shutting down"
    );

    registration.unregister();
    Ok(())
}

/// Streaming I/O: allocate, queue everything, then dequeue and re-queue.
async fn stream_frames(
    device: &Device,
    config: &Config,
    tx: flume::Sender<Frame>,
    stop: watch::Receiver<bool>,
) -> Result<()> {
    let count = device.request_buffers(config.capture.buffer_count as usize)?;
    for index in 0..count {
        device.queue_buffer(index)?;
    }
    device.stream_on()?;
    info!("Capture stream started with {} buffers", count);

    for _ in 0..config.demo.frames {
        if *stop.borrow() {
            break;
        }
        let frame = match device.dequeue_async().await {
            Ok(frame) => frame,
            Err(DeviceError::InvalidState(_)) if *stop.borrow() => break,
            Err(e) => return Err(e.into()),
        };
        let index = frame.index();
        if tx.send_async(frame).await.is_err() {
            break;
        }
        device.queue_buffer(index)?;
    }

    device.stream_off()?;
    Ok(())
}

/// Read I/O: each read() pulls one whole frame.
async fn read_frames(
    device: Device,
    config: &Config,
    tx: flume::Sender<Frame>,
    stop: watch::Receiver<bool>,
) -> Result<()> {
    let frames = config.demo.frames;
    let mode = device.blocking();
    let reader = device.clone();

    let collected =
        tokio::task::spawn_blocking(move || read_loop(&reader, frames, mode, &tx, &stop).map(drop))
            .await?;

    device.release_io()?;
    collected
}

/// Pull up to `frames` frames, stopping early once `stop` is raised.
/// Returns how many frames were forwarded.
fn read_loop(
    device: &Device,
    frames: u64,
    mode: DequeueMode,
    tx: &flume::Sender<Frame>,
    stop: &watch::Receiver<bool>,
) -> Result<u64> {
    let mut buf = vec![0u8; Format::FIXED.size()];
    let mut sent = 0;
    while sent < frames {
        if *stop.borrow() {
            break;
        }
        let n = match device.read(&mut buf, mode) {
            Ok(n) => n,
            Err(DeviceError::InvalidState(_)) if *stop.borrow() => break,
            Err(e) => return Err(e.into()),
        };
        // A read racing the stop may have started I/O again; release_io undoes it.
        if *stop.borrow() {
            break;
        }
        if n != buf.len() {
            return Err(eyre!("short read: {} of {} bytes", n, buf.len()));
        }
        let frame = Frame::from_read(bytes::Bytes::copy_from_slice(&buf), sent, &Format::FIXED);
        if tx.send(frame).is_err() {
            break;
        }
        sent += 1;
    }
    Ok(sent)
}
