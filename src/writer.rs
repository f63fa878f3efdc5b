//! Compressed-video writer, the inverse of the media reader.
//!
//! Accepts packed RGB24 frames, converts them to the encoder's planar
//! format and writes a matroska container through `libx264`. In realtime
//! mode a dedicated writer thread drains a small bounded queue and `push`
//! signals back-pressure by returning `false`; in synchronous mode frames
//! are encoded on the caller thread.

use std::collections::VecDeque;
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;

use crate::error::{Error, Result};
use crate::frame::{Frame, ImageDesc, ScalarType};
use crate::log::{LogFn, LogSink};
use crate::reader::join_pairs;

const DEFAULT_BIT_RATE: i64 = 4_000_000;
/// Stream time base denominator, the historical MPEG-4 limit.
const TIME_BASE_DEN: i32 = 65535;
/// Realtime queue bound; `push` reports `false` past this.
const REALTIME_QUEUE_LIMIT: usize = 9;

/// Writes frames to a compressed container.
pub struct VideoWriter {
    scaler: ffmpeg::software::scaling::Context,
    yuv: ffmpeg::util::frame::Video,
    width: i32,
    height: i32,
    mode: Option<Mode>,
}

enum Mode {
    Sync(EncoderCore),
    Realtime {
        queue: Arc<WriteQueue>,
        thread: Option<JoinHandle<()>>,
    },
}

impl VideoWriter {
    /// Opens `uri` for writing frames shaped like `format` (packed RGB24).
    ///
    /// Recognized parameter: `br`, the bit rate in bits per second (default
    /// 4,000,000). Remaining keys are offered to the encoder; keys the
    /// encoder does not consume are an error.
    pub fn create(
        uri: &str,
        format: &ImageDesc,
        parameter_pairs: &[&str],
        realtime: bool,
        log: Option<Arc<LogFn>>,
    ) -> Result<VideoWriter> {
        if parameter_pairs.len() % 2 != 0 {
            return Err(Error::configuration("invalid parameters size"));
        }
        let mut bit_rate = DEFAULT_BIT_RATE;
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        for pair in parameter_pairs.chunks_exact(2) {
            if pair[0] == "br" {
                bit_rate = pair[1].parse().map_err(|_| {
                    Error::configuration(format!("`{}` is not a valid int64", pair[1]))
                })?;
            } else {
                pairs.push((pair[0], pair[1]));
            }
        }
        if format.channels != 3 || format.scalar_type != ScalarType::U8 {
            return Err(Error::configuration(
                "writer input must be packed 8-bit RGB",
            ));
        }
        let sink = LogSink::new(log);
        let width = format.width;
        let height = format.height;

        ffmpeg::init().map_err(|err| Error::runtime(format!("ffmpeg init failed: {err}")))?;

        let scaler = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGB24,
            width as u32,
            height as u32,
            ffmpeg::format::Pixel::YUV420P,
            width as u32,
            height as u32,
            ffmpeg::software::scaling::flag::Flags::BICUBIC,
        )
        .map_err(|err| Error::stream(format!("converter initialization failed: {err}")))?;

        let mut octx = ffmpeg::format::output_as(&uri, "matroska")
            .map_err(|err| Error::open(uri, err.to_string()))?;

        let codec = ffmpeg::encoder::find_by_name("libx264")
            .ok_or_else(|| Error::stream("encoder `libx264` not found"))?;
        sink.info(&format!("using encoder `{}`", codec.description()));

        let global_header = octx
            .format()
            .flags()
            .contains(ffmpeg::format::flag::Flags::GLOBAL_HEADER);

        let mut stream = octx
            .add_stream(codec)
            .map_err(|err| Error::stream(format!("add_stream failed: {err}")))?;
        let stream_index = stream.index();
        stream.set_time_base(ffmpeg::Rational::new(1, TIME_BASE_DEN));

        let mut builder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|err| Error::stream(format!("video encoder setup failed: {err}")))?;
        builder.set_width(width as u32);
        builder.set_height(height as u32);
        builder.set_format(ffmpeg::format::Pixel::YUV420P);
        builder.set_bit_rate(bit_rate as usize);
        builder.set_time_base(ffmpeg::Rational::new(1, TIME_BASE_DEN));
        builder.set_frame_rate(Some(ffmpeg::Rational::new(0, 1)));
        builder.set_gop(12);
        if global_header {
            builder.set_flags(ffmpeg::codec::flag::Flags::GLOBAL_HEADER);
        }

        // Offer the caller's remaining keys to the encoder (including its
        // private layer); whatever survives was understood by nobody.
        let mut leftover: Vec<(String, String)> = Vec::new();
        if !pairs.is_empty() {
            let mut user_opts = ffmpeg::Dictionary::new();
            for (key, value) in &pairs {
                user_opts.set(key, value);
            }
            let mut dict_ptr = user_opts.disown();
            let ret = unsafe {
                ffi::av_opt_set_dict2(
                    builder.as_mut_ptr() as *mut c_void,
                    &mut dict_ptr,
                    ffi::AV_OPT_SEARCH_CHILDREN as c_int,
                )
            };
            let remaining = unsafe { ffmpeg::Dictionary::own(dict_ptr) };
            if ret < 0 {
                return Err(Error::configuration(format!(
                    "error applying options: {}",
                    ffmpeg::Error::from(ret)
                )));
            }
            leftover = remaining
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect();
        }
        if !leftover.is_empty() {
            return Err(Error::configuration(format!(
                "unknown options: {}",
                join_pairs(&leftover)
            )));
        }

        let mut codec_opts = ffmpeg::Dictionary::new();
        codec_opts.set("quality", "7");
        codec_opts.set("qp", "18");
        let encoder = builder
            .open_with(codec_opts)
            .map_err(|err| Error::stream(format!("encoder open failed: {err}")))?;

        octx.stream_mut(stream_index)
            .ok_or_else(|| Error::stream("output stream vanished"))?
            .set_parameters(&encoder);

        octx.write_header()
            .map_err(|err| Error::runtime(format!("write_header failed: {err}")))?;

        let yuv = ffmpeg::util::frame::Video::new(
            ffmpeg::format::Pixel::YUV420P,
            width as u32,
            height as u32,
        );

        let core = EncoderCore {
            encoder,
            octx,
            stream_index,
            encoder_time_base: ffmpeg::Rational::new(1, TIME_BASE_DEN),
        };
        let mode = if realtime {
            let queue = Arc::new(WriteQueue::default());
            let thread = std::thread::Builder::new()
                .name("videoreader-writer".to_string())
                .spawn({
                    let queue = Arc::clone(&queue);
                    move || write_loop(core, &queue)
                })
                .map_err(|err| Error::runtime(format!("failed to spawn writer thread: {err}")))?;
            Mode::Realtime {
                queue,
                thread: Some(thread),
            }
        } else {
            Mode::Sync(core)
        };

        Ok(VideoWriter {
            scaler,
            yuv,
            width,
            height,
            mode: Some(mode),
        })
    }

    /// Encodes one frame. In realtime mode, returns `false` when the writer
    /// queue is full: the frame is dropped and the caller should slow down.
    pub fn push(&mut self, frame: &Frame) -> Result<bool> {
        let mode = self
            .mode
            .as_mut()
            .ok_or_else(|| Error::runtime("video was closed"))?;
        if frame.image.width != self.width || frame.image.height != self.height {
            return Err(Error::runtime("can't change video frame size"));
        }

        convert_rgb(&mut self.scaler, &frame.image, &mut self.yuv)?;
        self.yuv
            .set_pts(Some((frame.timestamp_s * f64::from(TIME_BASE_DEN)).round() as i64));

        match mode {
            Mode::Sync(core) => {
                core.send(Some(&self.yuv))?;
                Ok(true)
            }
            Mode::Realtime { queue, .. } => {
                if let Some(error) = queue.take_error() {
                    return Err(error);
                }
                let mut copy = ffmpeg::util::frame::Video::empty();
                copy.clone_from(&self.yuv);
                Ok(queue.push_frame(QueuedFrame(copy)))
            }
        }
    }

    /// Flushes the encoder, writes the trailer and closes the output. In
    /// realtime mode this joins the writer thread first and rethrows any
    /// error it captured.
    pub fn close(&mut self) -> Result<()> {
        let mode = self
            .mode
            .take()
            .ok_or_else(|| Error::runtime("already closed"))?;
        match mode {
            Mode::Sync(mut core) => core.send(None),
            Mode::Realtime { queue, mut thread } => {
                queue.push_close();
                if let Some(thread) = thread.take() {
                    let _ = thread.join();
                }
                match queue.take_error() {
                    Some(error) => Err(error),
                    None => Ok(()),
                }
            }
        }
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        if self.mode.is_some() {
            let _ = self.close();
        }
    }
}

// ----------------------------------------------------------------------------
// Encoder core
// ----------------------------------------------------------------------------

/// Encoder plus muxer. Used from the caller thread in synchronous mode or
/// moved wholesale into the writer thread in realtime mode.
struct EncoderCore {
    encoder: ffmpeg::codec::encoder::Video,
    octx: ffmpeg::format::context::Output,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
}
unsafe impl Send for EncoderCore {}

impl EncoderCore {
    /// Submits one frame (`None` = end of stream), drains encoded packets
    /// into the container, and finalizes the file after the flush.
    fn send(&mut self, frame: Option<&ffmpeg::util::frame::Video>) -> Result<()> {
        match frame {
            Some(frame) => self
                .encoder
                .send_frame(frame)
                .map_err(|err| Error::runtime(format!("send_frame failed: {err}")))?,
            None => self
                .encoder
                .send_eof()
                .map_err(|err| Error::runtime(format!("send_eof failed: {err}")))?,
        }

        let mut packet = ffmpeg::Packet::empty();
        loop {
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(self.stream_index);
                    let stream_time_base = self
                        .octx
                        .stream(self.stream_index)
                        .map(|stream| stream.time_base())
                        .unwrap_or(self.encoder_time_base);
                    packet.rescale_ts(self.encoder_time_base, stream_time_base);
                    packet
                        .write_interleaved(&mut self.octx)
                        .map_err(|err| Error::runtime(format!("packet write failed: {err}")))?;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffi::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(err) => {
                    return Err(Error::runtime(format!("receive_packet failed: {err}")))
                }
            }
        }

        if frame.is_none() {
            self.octx
                .write_trailer()
                .map_err(|err| Error::runtime(format!("write_trailer failed: {err}")))?;
        }
        Ok(())
    }
}

/// Converts the caller's packed RGB24 image into the reusable YUV frame.
fn convert_rgb(
    scaler: &mut ffmpeg::software::scaling::Context,
    image: &ImageDesc,
    yuv: &mut ffmpeg::util::frame::Video,
) -> Result<()> {
    let src_data: [*const u8; 4] = [
        image.data as *const u8,
        ptr::null(),
        ptr::null(),
        ptr::null(),
    ];
    let src_stride: [c_int; 4] = [image.stride, 0, 0, 0];
    let ret = unsafe {
        ffi::sws_scale(
            scaler.as_mut_ptr(),
            src_data.as_ptr(),
            src_stride.as_ptr(),
            0,
            image.height,
            (*yuv.as_mut_ptr()).data.as_ptr(),
            (*yuv.as_mut_ptr()).linesize.as_ptr(),
        )
    };
    if ret < 0 {
        return Err(Error::runtime(format!(
            "sws_scale failed: {}",
            ffmpeg::Error::from(ret)
        )));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Realtime queue and writer thread
// ----------------------------------------------------------------------------

/// The converted frame moves to the writer thread with exclusive ownership.
struct QueuedFrame(ffmpeg::util::frame::Video);
unsafe impl Send for QueuedFrame {}

#[derive(Default)]
struct WriteQueue {
    inner: Mutex<VecDeque<Option<QueuedFrame>>>,
    available: Condvar,
    error: Mutex<Option<Error>>,
}

impl WriteQueue {
    /// Appends a frame unless the queue is at its bound. Returns whether the
    /// frame was accepted.
    fn push_frame(&self, frame: QueuedFrame) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.len() > REALTIME_QUEUE_LIMIT {
            return false;
        }
        inner.push_back(Some(frame));
        drop(inner);
        self.available.notify_one();
        true
    }

    fn push_close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.push_back(None);
        drop(inner);
        self.available.notify_one();
    }

    fn pop_blocking(&self) -> Option<QueuedFrame> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.pop_front() {
                return item;
            }
            inner = self.available.wait(inner).unwrap();
        }
    }

    fn store_error(&self, error: Error) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    fn take_error(&self) -> Option<Error> {
        self.error.lock().unwrap().take()
    }
}

fn write_loop(mut core: EncoderCore, queue: &WriteQueue) {
    loop {
        let item = queue.pop_blocking();
        let done = item.is_none();
        if let Err(error) = core.send(item.as_ref().map(|frame| &frame.0)) {
            queue.store_error(error);
            return;
        }
        if done {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_format(width: i32, height: i32) -> ImageDesc {
        ImageDesc::new(height, width, 3, ScalarType::U8, width * 3)
    }

    #[test]
    fn odd_parameter_count_is_rejected() {
        let err =
            VideoWriter::create("out.mkv", &rgb_format(64, 48), &["br"], false, None).unwrap_err();
        assert_eq!(err.to_string(), "invalid parameters size");
    }

    #[test]
    fn malformed_bit_rate_is_rejected() {
        let err = VideoWriter::create(
            "out.mkv",
            &rgb_format(64, 48),
            &["br", "fast"],
            false,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("`fast`"), "{err}");
    }

    #[test]
    fn non_rgb_input_is_rejected() {
        let format = ImageDesc::new(48, 64, 1, ScalarType::U8, 64);
        let err = VideoWriter::create("out.mkv", &format, &[], false, None).unwrap_err();
        assert!(err.to_string().contains("RGB"), "{err}");
    }
}
