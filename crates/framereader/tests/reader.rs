//! End-to-end tests over the software context: producer writes, render
//! thread processing, stage fan-out and pull-based acquisition.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use framereader::{FrameReader, ReaderConfig, ReaderError};
use glpipeline::{EffectKind, FrameCollector, SoftwareFactory, SurfaceBinding};

fn reader(width: u32, height: u32, max_images: usize) -> FrameReader {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
    let config = ReaderConfig::new(width, height, max_images);
    FrameReader::with_factory(config, SoftwareFactory::default()).unwrap()
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn solid_frame(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    rgba.repeat((width * height) as usize)
}

#[test]
fn produced_frames_reach_the_acquisition_pool() {
    let reader = reader(4, 4, 2);
    let surface = reader.surface().unwrap();

    surface
        .write_frame(&solid_frame(4, 4, [255, 0, 0, 255]), None)
        .unwrap();
    wait_until("first frame", || reader.frames_produced() >= 1);

    let image = reader.acquire_latest().unwrap().expect("image pending");
    assert_eq!((image.width, image.height), (4, 4));
    assert_eq!(&image.data[..4], &[255, 0, 0, 255]);
    assert_eq!(image.sequence, 1);

    // Nothing new was produced, so a second acquire comes back empty.
    assert!(reader.acquire_latest().unwrap().is_none());
    reader.recycle(image);
    reader.release();
}

#[test]
fn acquire_latest_returns_the_newest_of_a_backlog() {
    let reader = reader(1, 1, 2);
    let surface = reader.surface().unwrap();

    for (i, shade) in [10u8, 20, 30].iter().enumerate() {
        surface
            .write_frame(&[*shade, 0, 0, 255], None)
            .unwrap();
        wait_until("frame production", || {
            reader.frames_produced() >= (i + 1) as u64
        });
    }

    let image = reader.acquire_latest().unwrap().expect("image pending");
    assert_eq!(image.sequence, 3);
    assert_eq!(image.data[0], 30);
    // The backlog was drained by acquire_latest, so in-order acquisition
    // finds nothing left.
    assert!(reader.acquire_next().unwrap().is_none());
    reader.recycle(image);
    reader.release();
}

#[test]
fn holding_the_whole_budget_is_a_capacity_error() {
    let reader = reader(1, 1, 1);
    let surface = reader.surface().unwrap();

    surface.write_frame(&[1, 2, 3, 4], None).unwrap();
    wait_until("first frame", || reader.frames_produced() >= 1);
    let held = reader.acquire_latest().unwrap().expect("image pending");

    assert!(matches!(
        reader.acquire_latest(),
        Err(ReaderError::Capacity(_))
    ));
    assert!(matches!(
        reader.acquire_next(),
        Err(ReaderError::Capacity(_))
    ));

    reader.recycle(held);
    assert!(reader.acquire_latest().unwrap().is_none());
    reader.release();
}

#[test]
fn image_listener_fires_off_thread_and_can_acquire() {
    let reader = reader(2, 2, 2);
    let (tx, rx) = mpsc::channel();
    reader
        .set_on_image_available(
            Some(Box::new(move |handle| {
                if let Ok(Some(image)) = handle.acquire_latest() {
                    let sequence = image.sequence;
                    handle.recycle(image);
                    let _ = tx.send(sequence);
                }
            })),
            None,
        )
        .unwrap();

    let surface = reader.surface().unwrap();
    surface
        .write_frame(&solid_frame(2, 2, [9, 9, 9, 255]), None)
        .unwrap();
    let sequence = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(sequence, 1);

    reader.set_on_image_available(None, None).unwrap();
    reader.release();
}

#[test]
fn effect_stage_presents_styled_frames_to_its_target() {
    let reader = reader(2, 2, 2);
    let collector = FrameCollector::new(8);
    let effect = reader.attach_effect(EffectKind::Invert).unwrap();
    effect
        .set_surface(Some(SurfaceBinding::Collector(collector.clone())), None)
        .unwrap();

    let surface = reader.surface().unwrap();
    surface
        .write_frame(&solid_frame(2, 2, [255, 0, 0, 255]), None)
        .unwrap();
    wait_until("effect output", || collector.received() >= 1);

    let frames = collector.take_frames();
    assert_eq!(&frames[0].data[..4], &[0, 255, 255, 255]);
    // The effect propagates, so the pool saw the frame too.
    wait_until("pool deposit", || reader.frames_produced() >= 1);

    effect.release();
    reader.release();
}

#[test]
fn rebinding_a_sink_redirects_following_frames() {
    let reader = reader(1, 1, 2);
    let a = FrameCollector::new(8);
    let b = FrameCollector::new(8);
    let sink = reader
        .attach_sink(Some(SurfaceBinding::Collector(a.clone())), None)
        .unwrap();

    let surface = reader.surface().unwrap();
    surface.write_frame(&[1, 1, 1, 255], None).unwrap();
    wait_until("first sink frame", || a.received() >= 1);

    sink.set_surface(Some(SurfaceBinding::Collector(b.clone())), None)
        .unwrap();
    surface.write_frame(&[2, 2, 2, 255], None).unwrap();
    wait_until("second sink frame", || b.received() >= 1);

    // Nothing landed on the old surface after the switch.
    assert_eq!(a.received(), 1);
    assert_eq!(b.received(), 1);

    sink.release();
    reader.release();
}

#[test]
fn proxy_listener_observes_without_consuming() {
    let reader = reader(1, 1, 2);
    let (tx, rx) = mpsc::channel();
    let proxy = reader
        .attach_proxy(Some(Box::new(move |frame| {
            let _ = tx.send(frame.external);
        })))
        .unwrap();

    let surface = reader.surface().unwrap();
    surface.write_frame(&[5, 5, 5, 255], None).unwrap();
    let external = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(external);
    // The frame continued past the proxy into the pool.
    wait_until("pool deposit", || reader.frames_produced() >= 1);

    proxy.release();
    reader.release();
}

#[test]
fn resize_applies_to_later_frames() {
    let reader = reader(1, 1, 2);
    let surface = reader.surface().unwrap();
    surface.write_frame(&[1, 1, 1, 255], None).unwrap();
    wait_until("first frame", || reader.frames_produced() >= 1);

    reader.resize(2, 2);
    wait_until("resized surface", || surface.size() == (2, 2));
    surface
        .write_frame(&solid_frame(2, 2, [7, 7, 7, 255]), None)
        .unwrap();
    wait_until("resized frame", || reader.frames_produced() >= 2);

    let image = reader.acquire_latest().unwrap().expect("image pending");
    assert_eq!((image.width, image.height), (2, 2));
    reader.recycle(image);
    reader.release();
}
