//! Unified video-frame ingestion.
//!
//! One pull-based reader contract over heterogeneous frame sources:
//! compressed files and network streams decoded through the media
//! framework, two industrial-camera SDKs, and an in-process synthetic
//! source for tests. A companion [`VideoWriter`] encodes frames back into a
//! compressed container.
//!
//! # Architecture
//!
//! Every reader owns one acquisition thread that drives the blocking
//! external API and feeds a bounded queue; `next_frame` pulls from the
//! queue on the caller thread. Back-pressure follows the source kind:
//! seekable sources wait, realtime sources shed the oldest entries. Errors
//! raised on the acquisition thread are captured and rethrown from the
//! next caller operation, and dropping a reader always stops and joins its
//! thread.
//!
//! # Module structure
//!
//! - `frame`: frame values, image descriptors, the allocator seam
//! - `queue`: the bounded queue with pluggable overflow policies
//! - `worker`: the acquisition-thread harness and deferred-error slot
//! - `extras`: per-frame metadata packing
//! - `reader`: backend selection and the reader facade
//! - `writer`: the encoder path
//!
//! # Example
//!
//! ```no_run
//! # fn main() -> videoreader::Result<()> {
//! let mut reader = videoreader::Reader::create(
//!     "footage.mkv",
//!     &["threads", "2"],
//!     &["pts", "pkt_dts"],
//!     None,
//!     None,
//!     None,
//! )?;
//! while let Some(frame) = reader.next_frame(true)? {
//!     println!("frame {} at {:.3}s", frame.number, frame.timestamp_s);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod extras;
mod frame;
mod log;
mod queue;
mod reader;
mod worker;
#[cfg(feature = "ffmpeg")]
mod writer;

pub use error::{Error, Result};
pub use frame::{AllocateFn, DeallocateFn, Frame, FrameAllocator, ImageDesc, ScalarType};
pub use log::{LogFn, LogLevel};
pub use reader::Reader;
#[cfg(feature = "ffmpeg")]
pub use writer::VideoWriter;
