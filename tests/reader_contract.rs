//! Contract tests for the reader facade, driven through the synthetic
//! source so the full acquisition-thread / queue / allocator pipeline runs
//! without a media file or camera attached.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use videoreader::{AllocateFn, DeallocateFn, ImageDesc, Reader};

fn stub(frames: u64, width: i64, height: i64) -> Result<Reader> {
    let frames = frames.to_string();
    let width = width.to_string();
    let height = height.to_string();
    Ok(Reader::create(
        "stub://",
        &[
            "frames", &frames, "width", &width, "height", &height, "fps", "25",
        ],
        &[],
        None,
        None,
        None,
    )?)
}

#[test]
fn offline_stream_delivers_every_frame_in_order() -> Result<()> {
    let mut reader = stub(145, 640, 480)?;
    assert_eq!(reader.size(), 145);
    assert!(reader.is_seekable());

    let mut count = 0u64;
    while let Some(frame) = reader.next_frame(true)? {
        assert_eq!(frame.number, count);
        let expected = 0.04 * count as f64;
        assert!(
            (frame.timestamp_s - expected).abs() < 1e-9,
            "frame {count} timestamp {} != {expected}",
            frame.timestamp_s
        );
        assert_eq!(frame.image.width, 640);
        assert_eq!(frame.image.height, 480);
        assert_eq!(frame.image.channels, 3);
        assert!(!frame.image.data.is_null());
        count += 1;
    }
    assert_eq!(count, 145);

    // The stream has ended; further pulls keep reporting end of stream.
    assert!(reader.next_frame(true)?.is_none());
    assert!(reader.next_frame(true)?.is_none());
    Ok(())
}

#[test]
fn offline_backpressure_preserves_every_frame() -> Result<()> {
    // More frames than the queue bound, with a consumer that lags behind
    // the unpaced producer.
    let mut reader = stub(300, 32, 24)?;
    let mut expected = 0u64;
    while let Some(frame) = reader.next_frame(true)? {
        assert_eq!(frame.number, expected, "offline sources must not drop");
        expected += 1;
        if expected % 50 == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
    assert_eq!(expected, 300);
    Ok(())
}

#[test]
fn realtime_backpressure_drops_but_stays_monotone() -> Result<()> {
    let mut reader = Reader::create(
        "stub://",
        &[
            "frames", "2000", "width", "32", "height", "24", "realtime", "1",
        ],
        &[],
        None,
        None,
        None,
    )?;
    assert_eq!(reader.size(), 0);
    assert!(!reader.is_seekable());

    let mut numbers = Vec::new();
    let mut last_timestamp = -1.0f64;
    while let Some(frame) = reader.next_frame(true)? {
        numbers.push(frame.number);
        if frame.timestamp_s >= 0.0 {
            assert!(frame.timestamp_s >= last_timestamp);
            last_timestamp = frame.timestamp_s;
        }
        // Lag behind the producer so the overflow policy has to act.
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!numbers.is_empty());
    assert!(
        numbers.windows(2).all(|w| w[0] < w[1]),
        "frame numbers regressed"
    );
    assert!(
        numbers.len() < 2000,
        "realtime overflow never dropped anything"
    );
    Ok(())
}

#[test]
fn skipping_returns_the_same_metadata() -> Result<()> {
    let mut decoded = stub(20, 64, 48)?;
    let mut skipped = stub(20, 64, 48)?;
    loop {
        let a = decoded.next_frame(true)?;
        let b = skipped.next_frame(false)?;
        match (a, b) {
            (None, None) => return Ok(()),
            (Some(a), Some(b)) => {
                assert_eq!(a.number, b.number);
                assert_eq!(a.timestamp_s, b.timestamp_s);
                assert_eq!(a.image.width, b.image.width);
                assert_eq!(a.image.height, b.image.height);
                assert_eq!(a.image.channels, b.image.channels);
                assert_eq!(a.extras.is_some(), b.extras.is_some());
            }
            (a, b) => panic!(
                "streams diverged: decoded={:?} skipped={:?}",
                a.map(|f| f.number),
                b.map(|f| f.number)
            ),
        }
    }
}

#[test]
fn extras_blob_decodes_to_the_configured_scalars() -> Result<()> {
    let mut reader = Reader::create(
        "stub://",
        &["frames", "5", "width", "32", "height", "24"],
        &["exposure", "gain"],
        None,
        None,
        None,
    )?;
    let mut seen = 0;
    while let Some(frame) = reader.next_frame(true)? {
        let blob = frame.extras.as_deref().expect("extras configured");
        let values = decode_f64_array(blob);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], 10_000.0);
        assert_eq!(values[1], 6.0);
        seen += 1;
    }
    assert_eq!(seen, 5);
    Ok(())
}

#[test]
fn every_allocation_is_released_exactly_once() -> Result<()> {
    let allocations = Arc::new(AtomicUsize::new(0));
    let deallocations = Arc::new(AtomicUsize::new(0));

    let allocate: Arc<AllocateFn> = Arc::new({
        let allocations = Arc::clone(&allocations);
        move |image: &mut ImageDesc| {
            allocations.fetch_add(1, Ordering::SeqCst);
            let size = image.stride as usize * image.height as usize;
            image.data = Box::into_raw(vec![0u8; size].into_boxed_slice()) as *mut u8;
        }
    });
    let deallocate: Arc<DeallocateFn> = Arc::new({
        let deallocations = Arc::clone(&deallocations);
        move |image: &mut ImageDesc| {
            deallocations.fetch_add(1, Ordering::SeqCst);
            let size = image.stride as usize * image.height as usize;
            unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                    image.data, size,
                )));
            }
            image.data = ptr::null_mut();
        }
    });

    let mut reader = Reader::create(
        "stub://",
        &["frames", "50", "width", "32", "height", "24"],
        &[],
        Some(allocate),
        Some(deallocate),
        None,
    )?;

    // Pull a few frames, then drop the reader with more still queued.
    for _ in 0..5 {
        let frame = reader.next_frame(true)?.expect("stream has 50 frames");
        assert!(!frame.image.data.is_null());
    }
    drop(reader);

    let allocated = allocations.load(Ordering::SeqCst);
    let released = deallocations.load(Ordering::SeqCst);
    assert!(allocated >= 5);
    assert_eq!(allocated, released);
    Ok(())
}

#[test]
fn stop_ends_an_endless_stream_promptly() -> Result<()> {
    let mut reader = Reader::create(
        "stub://",
        &["frames", "0", "width", "32", "height", "24"],
        &[],
        None,
        None,
        None,
    )?;
    for _ in 0..3 {
        assert!(reader.next_frame(true)?.is_some());
    }
    reader.stop();
    assert!(reader.next_frame(true)?.is_none());
    assert!(reader.next_frame(true)?.is_none());
    Ok(())
}

#[test]
fn configuration_errors_surface_at_create() {
    // Odd parameter list.
    let err = Reader::create("stub://", &["single"], &[], None, None, None).unwrap_err();
    assert_eq!(err.to_string(), "invalid parameters size");

    // Unknown key, reported as key=value.
    let err = Reader::create("stub://", &["single", "1"], &[], None, None, None).unwrap_err();
    assert!(err.to_string().contains("single=1"), "{err}");

    // Unknown extra, listing the valid names.
    let err = Reader::create("stub://", &[], &["iso"], None, None, None).unwrap_err();
    assert!(err.to_string().contains("exposure"), "{err}");

    // Mis-paired allocators.
    let allocate: Arc<AllocateFn> = Arc::new(|_image: &mut ImageDesc| {});
    let err = Reader::create("stub://", &[], &[], Some(allocate), None, None).unwrap_err();
    assert_eq!(err.to_string(), "all or no allocators MUST be specified");
}

#[cfg(feature = "ffmpeg")]
#[test]
fn invalid_media_path_reports_the_url() {
    let err = Reader::create("invalid_path.mp4", &[], &[], None, None, None).unwrap_err();
    assert!(matches!(err, videoreader::Error::Open { .. }));
    assert!(err.to_string().contains("invalid_path.mp4"), "{err}");
}

/// Minimal decoder for the extras blob: a fixarray of f64 scalars.
fn decode_f64_array(blob: &[u8]) -> Vec<f64> {
    assert_eq!(blob[0] & 0xf0, 0x90, "expected a fixarray header");
    let count = (blob[0] & 0x0f) as usize;
    let mut values = Vec::with_capacity(count);
    let mut offset = 1;
    for _ in 0..count {
        assert_eq!(blob[offset], 0xcb, "expected a float64 tag");
        let bytes: [u8; 8] = blob[offset + 1..offset + 9].try_into().unwrap();
        values.push(f64::from_be_bytes(bytes));
        offset += 9;
    }
    assert_eq!(offset, blob.len(), "trailing bytes in extras blob");
    values
}
