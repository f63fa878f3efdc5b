//! Synthetic frame source (`stub://`).
//!
//! Generates frames in-process through the same acquisition-thread, queue
//! and allocator machinery as the hardware backends, so the full reader
//! contract can be exercised without a media file or camera attached.
//!
//! Parameters: `width` (640), `height` (480), `channels` (1 or 3, default
//! 3), `frames` (250, `0` = endless), `fps` (25, used for timestamps only)
//! and `realtime` (`0`/`1`). Offline mode is seekable with a known size and
//! waits for the consumer when the queue fills; realtime mode reports size
//! zero and drops the oldest queued frames instead.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::extras::{self, ExtraValue};
use crate::frame::{aligned_stride, Frame, ImageDesc, ScalarType, SharedAllocator};
use crate::log::LogSink;
use crate::queue::{OverflowPolicy, Slot};
use crate::reader::join_pairs;
use crate::worker::{Shared, Worker};

const DEFAULT_WIDTH: i32 = 640;
const DEFAULT_HEIGHT: i32 = 480;
const DEFAULT_FRAMES: u64 = 250;
const DEFAULT_FPS: f64 = 25.0;

/// Simulated sensor readouts for the `exposure` / `gain` extras.
const EXPOSURE_US: f64 = 10_000.0;
const GAIN_DB: f64 = 6.0;

const VALID_EXTRAS: &[&str] = &["exposure", "gain"];

#[derive(Clone, Copy)]
enum Extra {
    Exposure,
    Gain,
}

#[derive(Debug)]
pub(crate) struct SyntheticReader {
    shared: Arc<Shared<Frame>>,
    worker: Worker,
    frames: u64,
    realtime: bool,
    ended: bool,
}

impl SyntheticReader {
    pub(crate) fn open(
        url: &str,
        pairs: &[(String, String)],
        extras: &[&str],
        allocator: SharedAllocator,
        log: LogSink,
    ) -> Result<Self> {
        let mut width = DEFAULT_WIDTH;
        let mut height = DEFAULT_HEIGHT;
        let mut channels = 3i32;
        let mut frames = DEFAULT_FRAMES;
        let mut fps = DEFAULT_FPS;
        let mut realtime = false;
        let mut unknown = Vec::new();

        for (key, value) in pairs {
            match key.as_str() {
                "width" => width = parse_int(key, value)? as i32,
                "height" => height = parse_int(key, value)? as i32,
                "channels" => channels = parse_int(key, value)? as i32,
                "frames" => frames = parse_int(key, value)? as u64,
                "fps" => fps = parse_int(key, value)? as f64,
                "realtime" => realtime = parse_int(key, value)? != 0,
                _ => unknown.push((key.clone(), value.clone())),
            }
        }
        if !unknown.is_empty() {
            return Err(Error::configuration(format!(
                "unknown options: {}",
                join_pairs(&unknown)
            )));
        }
        if !(channels == 1 || channels == 3) {
            return Err(Error::configuration(format!(
                "`{channels}` is not a valid channel count (1 or 3)"
            )));
        }
        if fps <= 0.0 {
            return Err(Error::configuration("`fps` must be positive"));
        }

        let pushers = parse_extras(extras)?;

        let policy = if realtime {
            OverflowPolicy::DropOldest { high: 100, drop: 90 }
        } else {
            OverflowPolicy::WaitForSpace { high: 100, low: 80 }
        };
        let shared = Shared::new(policy);
        log.info(&format!("synthetic source `{url}` ({width}x{height})"));

        let worker = Worker::spawn("videoreader-synthetic", Arc::clone(&shared), {
            let shared = Arc::clone(&shared);
            move || run(&shared, width, height, channels, frames, fps, &pushers, &allocator)
        })?;

        Ok(Self {
            shared,
            worker,
            frames,
            realtime,
            ended: false,
        })
    }

    pub(crate) fn size(&self) -> u64 {
        if self.realtime {
            0
        } else {
            self.frames
        }
    }

    pub(crate) fn is_seekable(&self) -> bool {
        !self.realtime
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.ended {
            return Ok(None);
        }
        match self.shared.queue.pop_blocking() {
            Slot::Item(frame) => Ok(Some(frame)),
            Slot::End | Slot::Drained => {
                self.ended = true;
                self.worker.join();
                match self.shared.take_error() {
                    Some(error) => Err(error),
                    None => Ok(None),
                }
            }
        }
    }

    pub(crate) fn stop(&self) {
        self.shared.queue.request_stop();
    }
}

impl Drop for SyntheticReader {
    fn drop(&mut self) {
        self.shared.queue.request_stop();
        self.worker.join();
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    shared: &Shared<Frame>,
    width: i32,
    height: i32,
    channels: i32,
    frames: u64,
    fps: f64,
    pushers: &[Extra],
    allocator: &SharedAllocator,
) -> Result<()> {
    let stride = aligned_stride(width * channels);
    let mut produced = 0u64;

    while !shared.queue.stop_requested() && (frames == 0 || produced < frames) {
        let mut image = ImageDesc::new(height, width, channels, ScalarType::U8, stride);
        allocator.allocate(&mut image);
        if image.data.is_null() {
            return Err(Error::runtime("allocation callback failed: data is null"));
        }

        fill_pattern(&image, produced);

        let extras = if pushers.is_empty() {
            None
        } else {
            let values: Vec<ExtraValue> = pushers
                .iter()
                .map(|extra| match extra {
                    Extra::Exposure => ExtraValue::F64(EXPOSURE_US),
                    Extra::Gain => ExtraValue::F64(GAIN_DB),
                })
                .collect();
            Some(extras::encode(&values))
        };

        let timestamp_s = produced as f64 / fps;
        let frame = Frame::new(
            Arc::clone(allocator),
            image,
            produced,
            timestamp_s,
            extras,
        );
        shared.queue.push(frame);
        produced += 1;
    }
    Ok(())
}

/// Deterministic position/frame pattern, cheap and different per frame.
fn fill_pattern(image: &ImageDesc, number: u64) {
    let stride = image.stride as usize;
    let row_bytes = (image.width * image.channels) as usize;
    for row in 0..image.height as usize {
        let line = unsafe {
            std::slice::from_raw_parts_mut(image.data.add(row * stride), row_bytes)
        };
        for (column, pixel) in line.iter_mut().enumerate() {
            *pixel = ((row + column) as u64 + number) as u8;
        }
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|_| Error::configuration(format!("`{value}` is not a valid int64 for `{key}`")))
}

fn parse_extras(extras: &[&str]) -> Result<Vec<Extra>> {
    extras
        .iter()
        .map(|name| match *name {
            "exposure" => Ok(Extra::Exposure),
            "gain" => Ok(Extra::Gain),
            _ => Err(Error::configuration(format!(
                "unknown extra `{name}`; valid extras are: {}",
                VALID_EXTRAS.join(", ")
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(url: &str, pairs: &[(String, String)]) -> Result<SyntheticReader> {
        SyntheticReader::open(
            url,
            pairs,
            &[],
            Arc::new(crate::frame::DefaultAllocator),
            LogSink::default(),
        )
    }

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn unknown_keys_are_rejected_with_their_values() {
        let err = open("stub://", &pairs(&[("single", "1")])).unwrap_err();
        assert!(err.to_string().contains("single=1"), "{err}");
    }

    #[test]
    fn malformed_integers_are_rejected() {
        let err = open("stub://", &pairs(&[("width", "wide")])).unwrap_err();
        assert!(err.to_string().contains("`wide`"), "{err}");
    }

    #[test]
    fn unknown_extras_list_the_valid_names() {
        let err = SyntheticReader::open(
            "stub://",
            &[],
            &["iso"],
            Arc::new(crate::frame::DefaultAllocator),
            LogSink::default(),
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`iso`"), "{message}");
        assert!(message.contains("exposure"), "{message}");
        assert!(message.contains("gain"), "{message}");
    }

    #[test]
    fn offline_source_reports_size_and_seekability() {
        let reader = open("stub://", &pairs(&[("frames", "3")])).unwrap();
        assert_eq!(reader.size(), 3);
        assert!(reader.is_seekable());
    }

    #[test]
    fn realtime_source_reports_unknown_size() {
        let reader = open("stub://", &pairs(&[("realtime", "1"), ("frames", "3")])).unwrap();
        assert_eq!(reader.size(), 0);
        assert!(!reader.is_seekable());
    }
}
