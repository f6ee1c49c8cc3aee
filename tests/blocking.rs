//! Dequeue waits across threads and tasks.

use std::thread;
use std::time::Duration;

use synthcam::{CaptureControl, Config, DequeueMode, Device, DeviceError};

const WAIT: DequeueMode = DequeueMode::Blocking {
    timeout: Some(Duration::from_secs(5)),
};

/// Streaming device with `count` buffers, none of them queued.
fn streaming_idle(count: usize) -> Device {
    let dev = Device::new(&Config::default());
    dev.request_buffers(count).unwrap();
    dev.queue_buffer(0).unwrap();
    dev.stream_on().unwrap();
    dev.dequeue_buffer(DequeueMode::NonBlocking).unwrap();
    dev
}

#[test]
fn non_blocking_dequeue_reports_nothing_ready() {
    let dev = streaming_idle(2);
    assert!(matches!(
        dev.dequeue_buffer(DequeueMode::NonBlocking),
        Err(DeviceError::NoBufferReady)
    ));
}

#[test]
fn blocking_dequeue_completes_after_concurrent_enqueue() {
    let dev = streaming_idle(2);

    let waiter = {
        let dev = dev.clone();
        thread::spawn(move || dev.dequeue_buffer(WAIT))
    };

    thread::sleep(Duration::from_millis(50));
    dev.queue_buffer(1).unwrap();

    let frame = waiter.join().unwrap().unwrap();
    assert_eq!(frame.index(), 1);
    assert_eq!(frame.uniform_value(), Some(1));
}

#[test]
fn blocking_dequeue_times_out() {
    let dev = streaming_idle(1);
    let result = dev.dequeue_buffer(DequeueMode::Blocking {
        timeout: Some(Duration::from_millis(20)),
    });
    assert!(matches!(result, Err(DeviceError::Timeout)));
}

#[test]
fn blocking_dequeue_refused_while_stopped() {
    let dev = Device::new(&Config::default());
    dev.request_buffers(1).unwrap();
    dev.queue_buffer(0).unwrap();
    assert!(matches!(
        dev.dequeue_buffer(WAIT),
        Err(DeviceError::InvalidState(_))
    ));
}

#[test]
fn stream_off_wakes_parked_waiter() {
    let dev = streaming_idle(1);

    let waiter = {
        let dev = dev.clone();
        thread::spawn(move || dev.dequeue_buffer(DequeueMode::Blocking { timeout: None }))
    };

    thread::sleep(Duration::from_millis(50));
    // the waiter does not hold the lock, so this goes through
    dev.stream_off().unwrap();

    assert!(matches!(
        waiter.join().unwrap(),
        Err(DeviceError::InvalidState(_))
    ));
}

#[test]
fn wait_readable_returns_once_a_buffer_completes() {
    let dev = streaming_idle(2);

    let waiter = {
        let dev = dev.clone();
        thread::spawn(move || dev.wait_readable(Some(Duration::from_secs(5))))
    };
    thread::sleep(Duration::from_millis(50));
    dev.queue_buffer(0).unwrap();

    let readiness = waiter.join().unwrap().unwrap();
    assert!(readiness.readable);
}

#[test]
fn consumer_and_requeuer_threads_share_the_device() {
    let dev = Device::new(&Config::default());
    dev.request_buffers(4).unwrap();
    for i in 0..4 {
        dev.queue_buffer(i).unwrap();
    }
    dev.stream_on().unwrap();

    let (tx, rx) = flume::unbounded::<usize>();

    // hands every dequeued index to the other thread instead of requeueing it
    let consumer = {
        let dev = dev.clone();
        thread::spawn(move || {
            let mut values = Vec::new();
            for _ in 0..200 {
                let frame = dev.dequeue_buffer(WAIT).unwrap();
                values.push(frame.uniform_value().unwrap());
                tx.send(frame.index()).unwrap();
            }
            values
        })
    };

    let requeuer = {
        let dev = dev.clone();
        thread::spawn(move || {
            for index in rx.iter() {
                dev.queue_buffer(index).unwrap();
            }
        })
    };

    let values = consumer.join().unwrap();
    requeuer.join().unwrap();

    let expected: Vec<u8> = (0..200u32).map(|v| (v % 256) as u8).collect();
    assert_eq!(values, expected);
    // 4 at stream-on, then one per requeued buffer
    assert_eq!(dev.stats().frames_produced, 204);
}

#[tokio::test]
async fn async_dequeue_wakes_on_enqueue() {
    let dev = streaming_idle(2);

    let task = {
        let dev = dev.clone();
        tokio::spawn(async move { dev.dequeue_async().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    dev.queue_buffer(1).unwrap();

    let frame = task.await.unwrap().unwrap();
    assert_eq!(frame.index(), 1);
}

#[tokio::test]
async fn dropping_async_dequeue_cancels_the_wait() {
    let dev = streaming_idle(1);

    let waited = tokio::time::timeout(Duration::from_millis(20), dev.dequeue_async()).await;
    assert!(waited.is_err());

    // nothing was claimed by the cancelled wait
    dev.queue_buffer(0).unwrap();
    let frame = dev.dequeue_async().await.unwrap();
    assert_eq!(frame.index(), 0);
}

#[tokio::test]
async fn async_dequeue_fails_when_stream_stops() {
    let dev = streaming_idle(1);

    let task = {
        let dev = dev.clone();
        tokio::spawn(async move { dev.dequeue_async().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    dev.stream_off().unwrap();

    assert!(matches!(
        task.await.unwrap(),
        Err(DeviceError::InvalidState(_))
    ));
}

#[tokio::test]
async fn readable_resolves_after_fill() {
    let dev = streaming_idle(1);
    let task = {
        let dev = dev.clone();
        tokio::spawn(async move { dev.readable().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    dev.queue_buffer(0).unwrap();
    assert!(task.await.unwrap().readable);
}
