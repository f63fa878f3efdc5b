//! Media-framework backend: compressed files and network streams.
//!
//! The acquisition thread only demuxes: it reads raw packets and feeds the
//! bounded queue, stalling (seekable inputs) or shedding the oldest packets
//! (realtime inputs) under back-pressure. Decoding and pixel conversion to
//! packed RGB24 happen on the caller thread inside `next_frame`.
//!
//! The safe wrapper is used wherever it can express the contract; the raw
//! `ffi` layer fills the gaps: input-format hints for `scheme://` demuxer
//! names, detection of configuration keys nobody consumed, and scaling
//! straight into caller-allocated image memory.

use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;

use crate::error::{Error, Result};
use crate::extras::{self, ExtraValue};
use crate::frame::{aligned_stride, Frame, ImageDesc, ScalarType, SharedAllocator};
use crate::log::LogSink;
use crate::queue::{OverflowPolicy, Slot};
use crate::reader::{join_pairs, BUILTIN_SCHEMES};
use crate::worker::{Shared, Worker};

const VALID_EXTRAS: &[&str] = &["pkt_pos", "quality", "pts", "pkt_dts"];

#[derive(Clone, Copy)]
enum MediaExtra {
    PktPos,
    Quality,
    Pts,
    PktDts,
}

/// Packet ownership moves wholesale from the acquisition thread to the
/// caller; the payload is reference-counted and touched by one thread at a
/// time.
struct MediaPacket(ffmpeg::Packet);
unsafe impl Send for MediaPacket {}

/// The demuxer is driven exclusively by the acquisition thread after
/// construction.
struct Demuxer(ffmpeg::format::context::Input);
unsafe impl Send for Demuxer {}

pub(crate) struct MediaReader {
    shared: Arc<Shared<MediaPacket>>,
    worker: Worker,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    allocator: SharedAllocator,
    pushers: Vec<MediaExtra>,
    /// Stream time base in seconds per tick.
    time_base: f64,
    nb_frames: u64,
    seekable: bool,
    width: i32,
    height: i32,
    current_frame: u64,
}

impl MediaReader {
    pub(crate) fn open(
        url: &str,
        pairs: &[(String, String)],
        extras: &[&str],
        allocator: SharedAllocator,
        log: LogSink,
    ) -> Result<Self> {
        ffmpeg::init().map_err(|err| Error::runtime(format!("ffmpeg init failed: {err}")))?;

        let pushers = parse_extras(extras)?;

        let mut options = ffmpeg::Dictionary::new();
        for (key, value) in pairs {
            options.set(key, value);
        }

        // A `scheme://` prefix naming a demuxer is an input-format hint, not
        // a protocol; everything else is handed to the framework untouched.
        let (input_format, path) = match url.split_once("://") {
            Some((prefix, rest)) => match find_input_format(prefix) {
                Some(format) => (format, rest),
                None => (ptr::null(), url),
            },
            None => (ptr::null(), url),
        };

        let (input, mut options) = open_input(url, path, input_format, options)?;
        let seekable = unsafe {
            let ctx = input.as_ptr();
            !(*ctx).pb.is_null() && (*(*ctx).pb).seekable != 0
        };

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| Error::stream("video stream not found"))?;
        let stream_index = stream.index();
        let tb = stream.time_base();
        let time_base = tb.numerator() as f64 / tb.denominator() as f64;
        let nb_frames = stream.frames().max(0) as u64;

        let mut codec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|err| Error::stream(format!("decoder parameters failed: {err}")))?;

        // Offer the keys the format layer left over to the codec layer;
        // whatever survives both was understood by nobody.
        if options.iter().next().is_some() {
            let mut dict_ptr = options.disown();
            let ret = unsafe {
                ffi::av_opt_set_dict2(
                    codec_ctx.as_mut_ptr() as *mut c_void,
                    &mut dict_ptr,
                    ffi::AV_OPT_SEARCH_CHILDREN as c_int,
                )
            };
            options = unsafe { ffmpeg::Dictionary::own(dict_ptr) };
            if ret < 0 {
                return Err(Error::configuration(format!(
                    "error applying options: {}",
                    ffmpeg::Error::from(ret)
                )));
            }
        }
        let leftover: Vec<(String, String)> = options
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        if !leftover.is_empty() {
            return Err(Error::configuration(format!(
                "unknown options: {}",
                join_pairs(&leftover)
            )));
        }

        let decoder = codec_ctx
            .decoder()
            .video()
            .map_err(|err| Error::stream(format!("unsupported codec: {err}")))?;
        let width = decoder.width() as i32;
        let height = decoder.height() as i32;

        let scaler = if decoder.format() == ffmpeg::format::Pixel::None {
            None // broken files report their format with the first frame
        } else {
            Some(create_converter(decoder.format(), width, height)?)
        };

        let policy = if seekable {
            OverflowPolicy::WaitForSpace { high: 100, low: 80 }
        } else {
            OverflowPolicy::DropOldest { high: 100, drop: 90 }
        };
        let shared = Shared::new(policy);
        log.info(&format!("media source `{url}` opened ({width}x{height})"));

        let worker = Worker::spawn("videoreader-media", Arc::clone(&shared), {
            let shared = Arc::clone(&shared);
            let demuxer = Demuxer(input);
            move || read_loop(demuxer, stream_index, seekable, &shared)
        })?;

        Ok(Self {
            shared,
            worker,
            decoder,
            scaler,
            allocator,
            pushers,
            time_base,
            nb_frames,
            seekable,
            width,
            height,
            current_frame: 0,
        })
    }

    pub(crate) fn size(&self) -> u64 {
        self.nb_frames
    }

    pub(crate) fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub(crate) fn stop(&self) {
        self.shared.queue.request_stop();
    }

    pub(crate) fn next_frame(&mut self, decode: bool) -> Result<Option<Frame>> {
        loop {
            let packet = match self.shared.queue.pop_blocking() {
                Slot::Item(MediaPacket(packet)) => packet,
                Slot::End => {
                    self.worker.join();
                    if let Some(error) = self.shared.take_error() {
                        return Err(error);
                    }
                    self.shared.queue.push_drained();
                    return Ok(None);
                }
                Slot::Drained => {
                    self.shared.queue.push_drained();
                    return Err(Error::UseAfterEnd);
                }
            };

            if self.decoder.send_packet(&packet).is_err() {
                // One declined packet counts as roughly one source frame so
                // downstream numbering keeps advancing.
                self.current_frame += 1;
                continue;
            }

            let mut decoded = ffmpeg::util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {}
                Err(ffmpeg::Error::Other { errno }) if errno == ffi::EAGAIN => continue,
                Err(err) => {
                    return Err(Error::runtime(format!("receive_frame failed: {err}")))
                }
            }

            if self.scaler.is_none() {
                self.scaler = Some(create_converter(
                    decoded.format(),
                    self.width,
                    self.height,
                )?);
            }

            let stride = aligned_stride(self.width * 3);
            let mut image = ImageDesc::new(self.height, self.width, 3, ScalarType::U8, stride);
            self.allocator.allocate(&mut image);
            if image.data.is_null() {
                return Err(Error::runtime("allocation callback failed: data is null"));
            }

            let number = self.current_frame;
            self.current_frame += 1;
            let timestamp_s = decoded
                .timestamp()
                .map(|ts| ts as f64 * self.time_base)
                .unwrap_or(-1.0);
            let extras = pack_extras(&self.pushers, &decoded);

            let frame = Frame::new(
                Arc::clone(&self.allocator),
                image,
                number,
                timestamp_s,
                extras,
            );
            if decode {
                if let Some(scaler) = self.scaler.as_mut() {
                    convert_into(scaler, &decoded, &frame.image)?;
                }
            }
            return Ok(Some(frame));
        }
    }
}

impl Drop for MediaReader {
    fn drop(&mut self) {
        self.shared.queue.request_stop();
        self.worker.join();
    }
}

// ----------------------------------------------------------------------------
// Acquisition loop
// ----------------------------------------------------------------------------

fn read_loop(
    demuxer: Demuxer,
    stream_index: usize,
    seekable: bool,
    shared: &Shared<MediaPacket>,
) -> Result<()> {
    let mut input = demuxer.0;
    if seekable {
        // Seeking to timestamp zero avoids leading compression artifacts on
        // broken files. Never seek a non-seekable source; it may hang.
        let _ = input.seek(0, ..=0);
    }
    let mut packets = input.packets();
    while !shared.queue.stop_requested() {
        match packets.next() {
            Some((stream, packet)) => {
                if stream.index() == stream_index {
                    shared.queue.push(MediaPacket(packet));
                }
            }
            None => break, // end of stream, or a read error the demuxer ate
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Open helpers
// ----------------------------------------------------------------------------

fn find_input_format(name: &str) -> Option<*const ffi::AVInputFormat> {
    let name = CString::new(name).ok()?;
    let format = unsafe { ffi::av_find_input_format(name.as_ptr()) };
    if format.is_null() {
        None
    } else {
        Some(format)
    }
}

/// Opens the demuxer with the caller's option dictionary and returns the
/// wrapped input plus whatever options the format layer did not consume.
fn open_input(
    url: &str,
    path: &str,
    input_format: *const ffi::AVInputFormat,
    options: ffmpeg::Dictionary,
) -> Result<(ffmpeg::format::context::Input, ffmpeg::Dictionary<'static>)> {
    let path_c = CString::new(path)
        .map_err(|_| Error::configuration("url must not contain NUL bytes"))?;

    let mut ctx: *mut ffi::AVFormatContext = ptr::null_mut();
    let mut dict_ptr = options.disown();
    let open_ret =
        unsafe { ffi::avformat_open_input(&mut ctx, path_c.as_ptr(), input_format, &mut dict_ptr) };
    let options = unsafe { ffmpeg::Dictionary::own(dict_ptr) };
    if open_ret < 0 {
        let base = ffmpeg::Error::from(open_ret);
        let reason = if matches!(base, ffmpeg::Error::ProtocolNotFound) {
            format!("{base}; available protocols: {}", available_protocols())
        } else {
            base.to_string()
        };
        return Err(Error::open(url, reason));
    }

    let info_ret = unsafe { ffi::avformat_find_stream_info(ctx, ptr::null_mut()) };
    if info_ret < 0 {
        unsafe { ffi::avformat_close_input(&mut ctx) };
        return Err(Error::stream(format!(
            "avformat_find_stream_info failed: {}",
            ffmpeg::Error::from(info_ret)
        )));
    }

    let input = unsafe { ffmpeg::format::context::Input::wrap(ctx) };
    Ok((input, options))
}

/// The builtin camera schemes plus every demuxer of the video-input-device
/// category, for the "unknown protocol" diagnostic.
fn available_protocols() -> String {
    let mut names: Vec<String> = BUILTIN_SCHEMES.iter().map(|s| s.to_string()).collect();
    for device in ffmpeg::device::input::video() {
        names.push(device.name().to_string());
    }
    names.join(", ")
}

// ----------------------------------------------------------------------------
// Pixel conversion
// ----------------------------------------------------------------------------

/// Full-range YUV formats are rewritten to their limited-range equivalents
/// to keep the converter from warning on every frame.
fn limited_range(format: ffmpeg::format::Pixel) -> ffmpeg::format::Pixel {
    use ffmpeg::format::Pixel;
    match format {
        Pixel::YUVJ420P => Pixel::YUV420P,
        Pixel::YUVJ422P => Pixel::YUV422P,
        Pixel::YUVJ444P => Pixel::YUV444P,
        Pixel::YUVJ440P => Pixel::YUV440P,
        other => other,
    }
}

fn create_converter(
    format: ffmpeg::format::Pixel,
    width: i32,
    height: i32,
) -> Result<ffmpeg::software::scaling::Context> {
    ffmpeg::software::scaling::Context::get(
        limited_range(format),
        width as u32,
        height as u32,
        ffmpeg::format::Pixel::RGB24,
        width as u32,
        height as u32,
        ffmpeg::software::scaling::flag::Flags::BICUBIC,
    )
    .map_err(|err| Error::stream(format!("converter initialization failed: {err}")))
}

/// Scales the decoded frame straight into caller-allocated image memory.
fn convert_into(
    scaler: &mut ffmpeg::software::scaling::Context,
    decoded: &ffmpeg::util::frame::Video,
    image: &ImageDesc,
) -> Result<()> {
    let dst_data: [*mut u8; 4] = [image.data, ptr::null_mut(), ptr::null_mut(), ptr::null_mut()];
    let dst_stride: [c_int; 4] = [image.stride, 0, 0, 0];
    let ret = unsafe {
        ffi::sws_scale(
            scaler.as_mut_ptr(),
            (*decoded.as_ptr()).data.as_ptr() as *const *const u8,
            (*decoded.as_ptr()).linesize.as_ptr(),
            0,
            decoded.height() as c_int,
            dst_data.as_ptr(),
            dst_stride.as_ptr(),
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
// Extras
// ----------------------------------------------------------------------------

fn parse_extras(extras: &[&str]) -> Result<Vec<MediaExtra>> {
    extras
        .iter()
        .map(|name| match *name {
            "pkt_pos" => Ok(MediaExtra::PktPos),
            "quality" => Ok(MediaExtra::Quality),
            "pts" => Ok(MediaExtra::Pts),
            "pkt_dts" => Ok(MediaExtra::PktDts),
            _ => Err(Error::configuration(format!(
                "unknown extra `{name}`; valid extras are: {}",
                VALID_EXTRAS.join(", ")
            ))),
        })
        .collect()
}

fn pack_extras(
    pushers: &[MediaExtra],
    decoded: &ffmpeg::util::frame::Video,
) -> Option<Vec<u8>> {
    if pushers.is_empty() {
        return None;
    }
    let values: Vec<ExtraValue> = pushers
        .iter()
        .map(|extra| {
            let raw = decoded.as_ptr();
            let value = unsafe {
                match extra {
                    MediaExtra::PktPos => (*raw).pkt_pos,
                    MediaExtra::Quality => i64::from((*raw).quality),
                    MediaExtra::Pts => (*raw).pts,
                    MediaExtra::PktDts => (*raw).pkt_dts,
                }
            };
            ExtraValue::I64(value)
        })
        .collect();
    Some(extras::encode(&values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DefaultAllocator;

    fn open(url: &str, extras: &[&str]) -> Result<MediaReader> {
        MediaReader::open(
            url,
            &[],
            extras,
            Arc::new(DefaultAllocator),
            LogSink::default(),
        )
    }

    #[test]
    fn invalid_path_reports_the_url() {
        let err = open("invalid_path.mp4", &[]).unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
        assert!(err.to_string().contains("invalid_path.mp4"), "{err}");
    }

    #[test]
    fn unknown_protocol_lists_alternatives() {
        let err = open("no-such-protocol://camera0", &[]).unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::Open { .. }));
        // The camera schemes are always listed, whatever devices exist.
        if message.contains("available protocols") {
            assert!(message.contains("galaxy"), "{message}");
            assert!(message.contains("idatum"), "{message}");
        }
    }

    #[test]
    fn unknown_extras_list_the_valid_names() {
        let err = open("invalid_path.mp4", &["shutter"]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`shutter`"), "{message}");
        assert!(message.contains("pkt_pos"), "{message}");
        assert!(message.contains("pkt_dts"), "{message}");
    }

    #[test]
    fn yuvj_formats_map_to_limited_range() {
        use ffmpeg::format::Pixel;
        assert_eq!(limited_range(Pixel::YUVJ420P), Pixel::YUV420P);
        assert_eq!(limited_range(Pixel::YUVJ444P), Pixel::YUV444P);
        assert_eq!(limited_range(Pixel::RGB24), Pixel::RGB24);
    }
}
