//! Direct read() access mode.

use synthcam::capture::{FillResult, FrameSource};
use synthcam::{
    BufferState, CaptureControl, Config, DequeueMode, Device, DeviceError, Format,
};

fn device() -> Device {
    Device::new(&Config::default())
}

fn wait() -> DequeueMode {
    DequeueMode::Blocking {
        timeout: Some(std::time::Duration::from_secs(5)),
    }
}

#[test]
fn read_pulls_successive_frames() {
    let dev = device();
    let mut buf = vec![0u8; Format::FIXED.size()];

    for expected in 0u8..5 {
        let n = dev.read(&mut buf, wait()).unwrap();
        assert_eq!(n, 76_800);
        assert!(buf.iter().all(|&b| b == expected));
    }
    assert!(dev.stream_state().is_streaming());
    assert_eq!(dev.buffer_states().len(), 1);
}

#[test]
fn partial_reads_continue_the_same_frame() {
    let dev = device();
    let mut half = vec![0u8; Format::FIXED.size() / 2];

    assert_eq!(dev.read(&mut half, wait()).unwrap(), 38_400);
    assert!(half.iter().all(|&b| b == 0));
    assert!(dev.poll().readable);

    assert_eq!(dev.read(&mut half, wait()).unwrap(), 38_400);
    assert!(half.iter().all(|&b| b == 0));

    assert_eq!(dev.read(&mut half, wait()).unwrap(), 38_400);
    assert!(half.iter().all(|&b| b == 1));
}

#[test]
fn read_and_streaming_exclude_each_other() {
    let dev = device();
    dev.request_buffers(2).unwrap();
    let mut buf = vec![0u8; 16];
    assert!(matches!(dev.read(&mut buf, wait()), Err(DeviceError::Busy(_))));

    let other = device();
    other.read(&mut buf, wait()).unwrap();
    assert!(matches!(other.request_buffers(2), Err(DeviceError::InvalidState(_))));
    assert!(matches!(other.queue_buffer(0), Err(DeviceError::Busy(_))));
    assert!(matches!(
        other.dequeue_buffer(DequeueMode::NonBlocking),
        Err(DeviceError::Busy(_))
    ));
}

#[test]
fn stream_off_tears_read_mode_down() {
    let dev = device();
    let mut buf = vec![0u8; Format::FIXED.size()];
    dev.read(&mut buf, wait()).unwrap();

    dev.stream_off().unwrap();
    assert!(dev.buffer_states().is_empty());

    // the pool is free for streaming I/O again
    assert_eq!(dev.request_buffers(2).unwrap(), 2);
    assert_eq!(dev.buffer_states(), vec![BufferState::Free; 2]);
}

#[test]
fn release_io_frees_read_buffers() {
    let dev = device();
    let mut buf = vec![0u8; 8];
    dev.read(&mut buf, DequeueMode::NonBlocking).unwrap();

    dev.release_io().unwrap();
    assert!(dev.buffer_states().is_empty());
    assert!(!dev.stream_state().is_streaming());
}

struct Broken;

impl FrameSource for Broken {
    fn fill(&mut self, _mem: &mut [u8], _size: usize) -> FillResult {
        FillResult::Error
    }
}

#[test]
fn failed_fill_is_reported_by_read() {
    let dev = Device::with_source(&Config::default(), Box::new(Broken));
    let mut buf = vec![0u8; Format::FIXED.size()];
    assert!(matches!(
        dev.read(&mut buf, wait()),
        Err(DeviceError::FillFailed { index: 0 })
    ));
    // the buffer went straight back into the queue
    assert!(matches!(
        dev.read(&mut buf, wait()),
        Err(DeviceError::FillFailed { index: 0 })
    ));
}

#[test]
fn waiting_for_data_on_a_fresh_device_starts_read_io() {
    let dev = device();
    let fresh = dev.poll();
    assert!(fresh.error && !fresh.readable);

    let readiness = dev.wait_readable(Some(std::time::Duration::from_millis(10))).unwrap();
    assert!(readiness.readable);
    assert!(!readiness.error);
    assert!(dev.stream_state().is_streaming());

    let mut buf = vec![0u8; Format::FIXED.size()];
    assert_eq!(dev.read(&mut buf, DequeueMode::NonBlocking).unwrap(), 76_800);
    assert!(buf.iter().all(|&b| b == 0));
}

#[tokio::test]
async fn async_readiness_on_a_fresh_device_starts_read_io() {
    let dev = device();
    assert!(dev.readable().await.readable);

    let mut buf = vec![0u8; Format::FIXED.size()];
    assert_eq!(dev.read(&mut buf, DequeueMode::NonBlocking).unwrap(), 76_800);
    assert!(buf.iter().all(|&b| b == 0));
}

#[test]
fn waiting_for_data_leaves_streaming_pools_alone() {
    let dev = device();
    dev.request_buffers(2).unwrap();
    let readiness = dev.wait_readable(Some(std::time::Duration::from_millis(10))).unwrap();
    assert!(readiness.error);
    assert!(!dev.stream_state().is_streaming());
}
