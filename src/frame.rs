//! Frame values and image-memory ownership.
//!
//! A [`Frame`] owns one decoded image plus metadata. Image memory is
//! obtained through the reader's [`FrameAllocator`] — on the acquisition
//! thread for camera sources, on the caller thread for the media backend —
//! and released through the same allocator exactly once when the frame is
//! dropped, from whichever thread drops it. Allocators must therefore be
//! thread-safe.

use std::os::raw::c_void;
use std::ptr;
use std::sync::Arc;

/// Pixel scalar type. The discriminants are part of the binary surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ScalarType {
    U8 = 0,
    U16 = 1,
}

impl ScalarType {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            ScalarType::U8 => 1,
            ScalarType::U16 => 2,
        }
    }
}

/// Image descriptor exposed at the library boundary.
///
/// Rows are laid out top-down with interleaved channels. `stride` is the
/// number of bytes between rows; `0` means unknown. `user_data` is free for
/// the allocator, useful for locating its own bookkeeping in `deallocate`.
#[derive(Debug)]
pub struct ImageDesc {
    pub height: i32,
    pub width: i32,
    pub channels: i32,
    pub scalar_type: ScalarType,
    pub stride: i32,
    pub data: *mut u8,
    pub user_data: *mut c_void,
}

impl ImageDesc {
    pub(crate) fn new(
        height: i32,
        width: i32,
        channels: i32,
        scalar_type: ScalarType,
        stride: i32,
    ) -> Self {
        Self {
            height,
            width,
            channels,
            scalar_type,
            stride,
            data: ptr::null_mut(),
            user_data: ptr::null_mut(),
        }
    }
}

/// Row stride padded up to a 16-byte boundary.
pub(crate) fn aligned_stride(row_bytes: i32) -> i32 {
    const ALIGNMENT: i32 = 16;
    (row_bytes + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

// ----------------------------------------------------------------------------
// Allocator seam
// ----------------------------------------------------------------------------

/// Caller-supplied allocation callback. Must fill `data` (and optionally
/// `user_data`); leaving `data` null is treated as allocation failure.
pub type AllocateFn = dyn Fn(&mut ImageDesc) + Send + Sync;
/// Caller-supplied deallocation callback. Releases `data`/`user_data`.
pub type DeallocateFn = dyn Fn(&mut ImageDesc) + Send + Sync;

/// Bring-your-own-buffer extension point. Both methods may be invoked from
/// either the caller thread or an acquisition thread.
pub trait FrameAllocator: Send + Sync {
    fn allocate(&self, image: &mut ImageDesc);
    fn deallocate(&self, image: &mut ImageDesc);
}

/// Default allocator: a heap byte buffer sized by `stride × height`.
pub(crate) struct DefaultAllocator;

impl FrameAllocator for DefaultAllocator {
    fn allocate(&self, image: &mut ImageDesc) {
        let size = image.stride as usize * image.height as usize;
        let buf = vec![0u8; size].into_boxed_slice();
        image.data = Box::into_raw(buf) as *mut u8;
    }

    fn deallocate(&self, image: &mut ImageDesc) {
        if image.data.is_null() {
            return;
        }
        let size = image.stride as usize * image.height as usize;
        // Reconstructs the box allocated above; the descriptor geometry is
        // immutable for the lifetime of the frame, so the length matches.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                image.data, size,
            )));
        }
        image.data = ptr::null_mut();
    }
}

/// Adapter pairing two caller callbacks into the allocator seam.
pub(crate) struct CallbackAllocator {
    pub allocate: Arc<AllocateFn>,
    pub deallocate: Arc<DeallocateFn>,
}

impl FrameAllocator for CallbackAllocator {
    fn allocate(&self, image: &mut ImageDesc) {
        (self.allocate)(image);
    }

    fn deallocate(&self, image: &mut ImageDesc) {
        (self.deallocate)(image);
    }
}

pub(crate) type SharedAllocator = Arc<dyn FrameAllocator>;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded image with metadata and an optional extras blob.
///
/// Frames are not clonable; moving a frame transfers ownership of the image
/// memory. The deallocator runs exactly once, on drop.
pub struct Frame {
    /// Zero-indexed, monotonically non-decreasing. Gaps occur when the
    /// source reports dropped or invalid frames.
    pub number: u64,
    /// Seconds since stream start, `-1.0` when the source provides none.
    pub timestamp_s: f64,
    /// Length-prefixed binary array of the configured per-frame extras.
    pub extras: Option<Vec<u8>>,
    pub image: ImageDesc,
    allocator: Option<SharedAllocator>,
}

impl Frame {
    pub(crate) fn new(
        allocator: SharedAllocator,
        image: ImageDesc,
        number: u64,
        timestamp_s: f64,
        extras: Option<Vec<u8>>,
    ) -> Self {
        Self {
            number,
            timestamp_s,
            extras,
            image,
            allocator: Some(allocator),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("number", &self.number)
            .field("timestamp_s", &self.timestamp_s)
            .field("extras", &self.extras)
            .field("image", &self.image)
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            if !self.image.data.is_null() {
                allocator.deallocate(&mut self.image);
            }
        }
    }
}

// Frames cross the acquisition-thread/caller boundary with exclusive
// ownership of their image memory; allocators are required to be
// thread-safe by contract.
unsafe impl Send for Frame {}

// ----------------------------------------------------------------------------
// Frame numbering
// ----------------------------------------------------------------------------

/// Adjusts device frame ids for wrap-around so the exposed number never
/// decreases across a counter reset.
#[derive(Default)]
pub(crate) struct FrameNumberTracker {
    previous: u64,
    offset: u64,
}

impl FrameNumberTracker {
    pub(crate) fn observe(&mut self, device_id: u64) -> u64 {
        if device_id < self.previous {
            self.offset += (self.previous - device_id) + 1;
        }
        self.previous = device_id;
        device_id + self.offset
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAllocator {
        allocations: AtomicUsize,
        deallocations: AtomicUsize,
    }

    impl CountingAllocator {
        fn new() -> Self {
            Self {
                allocations: AtomicUsize::new(0),
                deallocations: AtomicUsize::new(0),
            }
        }
    }

    impl FrameAllocator for CountingAllocator {
        fn allocate(&self, image: &mut ImageDesc) {
            self.allocations.fetch_add(1, Ordering::SeqCst);
            DefaultAllocator.allocate(image);
        }

        fn deallocate(&self, image: &mut ImageDesc) {
            self.deallocations.fetch_add(1, Ordering::SeqCst);
            DefaultAllocator.deallocate(image);
        }
    }

    fn allocated_frame(allocator: SharedAllocator) -> Frame {
        let mut image = ImageDesc::new(4, 4, 3, ScalarType::U8, aligned_stride(4 * 3));
        allocator.allocate(&mut image);
        assert!(!image.data.is_null());
        Frame::new(allocator, image, 0, 0.0, None)
    }

    #[test]
    fn deallocator_runs_exactly_once() {
        let allocator = Arc::new(CountingAllocator::new());
        let frame = allocated_frame(allocator.clone());

        // A move must not introduce a second deallocation.
        let moved = frame;
        drop(moved);

        assert_eq!(allocator.allocations.load(Ordering::SeqCst), 1);
        assert_eq!(allocator.deallocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frame_dropped_on_another_thread_releases_memory() {
        let allocator = Arc::new(CountingAllocator::new());
        let frame = allocated_frame(allocator.clone());

        std::thread::spawn(move || drop(frame)).join().unwrap();

        assert_eq!(allocator.deallocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stride_is_padded_to_sixteen_bytes() {
        assert_eq!(aligned_stride(1), 16);
        assert_eq!(aligned_stride(16), 16);
        assert_eq!(aligned_stride(640 * 3), 1920);
        assert_eq!(aligned_stride(641 * 3), 1936);
    }

    #[test]
    fn frame_numbers_stay_monotone_across_wraps() {
        let mut tracker = FrameNumberTracker::default();
        assert_eq!(tracker.observe(0), 0);
        assert_eq!(tracker.observe(1), 1);
        assert_eq!(tracker.observe(2), 2);
        // Device counter reset.
        assert_eq!(tracker.observe(0), 3);
        assert_eq!(tracker.observe(1), 4);
    }
}
