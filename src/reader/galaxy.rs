//! Industrial-camera SDK A backend (`pylon` and `galaxy://<device-id>`).
//!
//! Opens a device by identifier (IP, serial, MAC, index or user-defined
//! name, tried in that order), applies name-keyed configuration against the
//! SDK's typed feature tables, and acquires raw mono buffers on a dedicated
//! thread. Frames are fully populated on the acquisition thread — allocator
//! call, pixel copy, extras — and handed across the bounded queue.

use std::ffi::CString;
use std::os::raw::c_char;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::extras::{self, ExtraValue};
use crate::frame::{
    aligned_stride, Frame, FrameNumberTracker, ImageDesc, ScalarType, SharedAllocator,
};
use crate::log::LogSink;
use crate::queue::{OverflowPolicy, Slot};
use crate::worker::{Shared, Worker};

/// Buffer-pull timeout and the ≈3 s consecutive-timeout ceiling.
const TIMEOUT_MS: u32 = 250;
const MAX_TIMEOUT_HITS: u32 = 3000 / TIMEOUT_MS;

const VALID_EXTRAS: &[&str] = &["exposure", "gain"];

#[derive(Clone, Copy)]
enum Extra {
    Exposure,
    Gain,
}

/// The SDK handle is used by the acquisition thread for grabbing and by the
/// owning thread for open/close and runtime reconfiguration; the SDK
/// documents its control interface as safe for that split.
struct Device(sdk::GxDevHandle);
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Device").finish()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            sdk::GXCloseDevice(self.0);
        }
    }
}

#[derive(Debug)]
pub(crate) struct GalaxyReader {
    device: Arc<Device>,
    shared: Arc<Shared<Frame>>,
    worker: Worker,
    log: LogSink,
    ended: bool,
}

impl GalaxyReader {
    /// `pylon`: attach to the first camera the SDK enumerates.
    pub(crate) fn first_device(
        pairs: &[(String, String)],
        extras: &[&str],
        allocator: SharedAllocator,
        log: LogSink,
    ) -> Result<Self> {
        Self::open_with_modes("1", &[sdk::GX_OPEN_INDEX], "pylon", pairs, extras, allocator, log)
    }

    /// `galaxy://<device-id>`: the id may be an IP, serial, MAC, index or
    /// user-defined name; each open mode is tried in order.
    pub(crate) fn open(
        device_id: &str,
        pairs: &[(String, String)],
        extras: &[&str],
        allocator: SharedAllocator,
        log: LogSink,
    ) -> Result<Self> {
        const MODES: &[i32] = &[
            sdk::GX_OPEN_IP,
            sdk::GX_OPEN_SN,
            sdk::GX_OPEN_MAC,
            sdk::GX_OPEN_INDEX,
            sdk::GX_OPEN_USERID,
        ];
        Self::open_with_modes(device_id, MODES, device_id, pairs, extras, allocator, log)
    }

    fn open_with_modes(
        device_id: &str,
        modes: &[i32],
        url: &str,
        pairs: &[(String, String)],
        extras: &[&str],
        allocator: SharedAllocator,
        log: LogSink,
    ) -> Result<Self> {
        let pushers = parse_extras(extras)?;

        if unsafe { sdk::GXInitLib() } != sdk::GX_STATUS_SUCCESS {
            return Err(Error::open(url, "GXInitLib was not successful"));
        }

        let content = CString::new(device_id)
            .map_err(|_| Error::configuration("device id must not contain NUL bytes"))?;
        let mut handle: sdk::GxDevHandle = std::ptr::null_mut();
        let mut opened = false;
        for &mode in modes {
            let mut param = sdk::GxOpenParam {
                content: content.as_ptr() as *mut c_char,
                open_mode: mode,
                access_mode: sdk::GX_ACCESS_EXCLUSIVE,
            };
            if unsafe { sdk::GXOpenDevice(&mut param, &mut handle) } == sdk::GX_STATUS_SUCCESS {
                opened = true;
                break;
            }
        }
        if !opened {
            unsafe { sdk::GXCloseLib() };
            return Err(Error::open(
                url,
                format!("Galaxy device `{device_id}` not found"),
            ));
        }
        let device = Arc::new(Device(handle));

        let mut ticks_per_second = 0i64;
        check(
            unsafe {
                sdk::GXGetInt(
                    device.0,
                    features::GX_INT_TIMESTAMP_TICK_FREQUENCY,
                    &mut ticks_per_second,
                )
            },
            "read timestamp tick frequency",
        )?;
        let tick_frequency = ticks_per_second as f64;

        // Sensible acquisition defaults; parameter pairs may override them.
        check(
            unsafe { sdk::GXSetEnum(device.0, features::GX_ENUM_EXPOSURE_AUTO, 1) },
            "enable auto exposure",
        )?;
        check(
            unsafe { sdk::GXSetEnum(device.0, features::GX_ENUM_GAIN_AUTO, 1) },
            "enable auto gain",
        )?;
        check(
            unsafe { sdk::GXSetInt(device.0, features::GX_INT_BINNING_HORIZONTAL, 2) },
            "set horizontal binning",
        )?;
        check(
            unsafe { sdk::GXSetInt(device.0, features::GX_INT_BINNING_VERTICAL, 2) },
            "set vertical binning",
        )?;

        apply_pairs(&device, pairs, &log)?;

        let shared = Shared::new(OverflowPolicy::ThinByHalf { high: 9 });
        let worker = Worker::spawn("videoreader-galaxy", Arc::clone(&shared), {
            let shared = Arc::clone(&shared);
            let device = Arc::clone(&device);
            let log = log.clone();
            move || acquire(&device, &shared, &pushers, &allocator, tick_frequency, &log)
        })?;

        Ok(Self {
            device,
            shared,
            worker,
            log,
            ended: false,
        })
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

    /// Runtime reconfiguration with the same key shapes as construction.
    pub(crate) fn set(&mut self, pairs: &[(String, String)]) -> Result<()> {
        apply_pairs(&self.device, pairs, &self.log)
    }

    pub(crate) fn stop(&self) {
        self.shared.queue.request_stop();
    }
}

impl Drop for GalaxyReader {
    fn drop(&mut self) {
        self.shared.queue.request_stop();
        self.worker.join();
        // Device handle closes when the last Arc drops (the worker holds one
        // until it exits, which the join above guarantees).
        unsafe { sdk::GXCloseLib() };
    }
}

// ----------------------------------------------------------------------------
// Acquisition loop
// ----------------------------------------------------------------------------

const GRAB_BATCH: usize = 5;

fn acquire(
    device: &Device,
    shared: &Shared<Frame>,
    pushers: &[Extra],
    allocator: &SharedAllocator,
    tick_frequency: f64,
    log: &LogSink,
) -> Result<()> {
    check(unsafe { sdk::GXStreamOn(device.0) }, "start stream")?;
    let result = grab_loop(device, shared, pushers, allocator, tick_frequency, log);
    unsafe { sdk::GXStreamOff(device.0) };
    result
}

fn grab_loop(
    device: &Device,
    shared: &Shared<Frame>,
    pushers: &[Extra],
    allocator: &SharedAllocator,
    tick_frequency: f64,
    log: &LogSink,
) -> Result<()> {
    let mut buffers: [*mut sdk::GxFrameBuffer; GRAB_BATCH] = [std::ptr::null_mut(); GRAB_BATCH];
    let mut timeout_hits = 0u32;
    let mut tracker = FrameNumberTracker::default();

    while !shared.queue.stop_requested() {
        let mut count = 0u32;
        let status = unsafe {
            sdk::GXDQAllBufs(
                device.0,
                buffers.as_mut_ptr(),
                GRAB_BATCH as u32,
                &mut count,
                TIMEOUT_MS,
            )
        };
        if status == sdk::GX_STATUS_TIMEOUT {
            timeout_hits += 1;
            if timeout_hits > MAX_TIMEOUT_HITS {
                return Err(Error::runtime("no camera data for 3 seconds"));
            }
            continue;
        }
        if status != sdk::GX_STATUS_SUCCESS {
            return Err(Error::runtime(sdk::last_error_message(status)));
        }
        timeout_hits = 0;
        if count == 0 {
            unsafe { sdk::GXQAllBufs(device.0) };
            continue;
        }

        // A bad status on the newest buffer poisons the whole batch.
        let newest = unsafe { &*buffers[count as usize - 1] };
        if newest.status != sdk::GX_FRAME_STATUS_SUCCESS {
            unsafe { sdk::GXQAllBufs(device.0) };
            continue;
        }

        for index in 0..count as usize {
            let buffer = unsafe { &*buffers[index] };
            if buffer.status != sdk::GX_FRAME_STATUS_SUCCESS {
                log.warning(&format!("buffer status is {}", buffer.status));
                continue;
            }

            let width = buffer.width;
            let height = buffer.height;
            let stride = aligned_stride(width);
            let timestamp_s = buffer.timestamp as f64 / tick_frequency;
            // Device ids start at 1 and may wrap; the exposed number must
            // not decrease.
            let number = tracker.observe(buffer.frame_id.wrapping_sub(1));

            let extras_blob = pack_extras(device, pushers);

            let mut image = ImageDesc::new(height, width, 1, ScalarType::U8, stride);
            allocator.allocate(&mut image);
            if image.data.is_null() {
                return Err(Error::runtime("allocation callback failed: data is null"));
            }
            let frame = Frame::new(
                Arc::clone(allocator),
                image,
                number,
                timestamp_s,
                extras_blob,
            );
            unsafe {
                std::ptr::copy_nonoverlapping(
                    buffer.img_buf as *const u8,
                    frame.image.data,
                    (width * height) as usize,
                );
            }
            shared.queue.push(frame);
        }
        unsafe { sdk::GXQAllBufs(device.0) };
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

fn apply_pairs(device: &Device, pairs: &[(String, String)], log: &LogSink) -> Result<()> {
    for (key, value) in pairs {
        apply_pair(device, &key.to_lowercase(), value, log)?;
    }
    Ok(())
}

fn apply_pair(device: &Device, key: &str, value: &str, log: &LogSink) -> Result<()> {
    if let Some(feature) = lookup(features::INT_FEATURES, key) {
        let parsed: i64 = value.parse().map_err(|_| {
            Error::configuration(format!("`{value}` is not a valid int64 for `{key}`"))
        })?;
        return check(
            unsafe { sdk::GXSetInt(device.0, feature, parsed) },
            &format!("set `{key}`"),
        );
    }
    if let Some(feature) = lookup(features::FLOAT_FEATURES, key) {
        let parsed: f64 = value.parse().map_err(|_| {
            Error::configuration(format!("`{value}` is not a valid double for `{key}`"))
        })?;
        return check(
            unsafe { sdk::GXSetFloat(device.0, feature, parsed) },
            &format!("set `{key}`"),
        );
    }
    if let Some(feature) = lookup(features::ENUM_FEATURES, key) {
        return set_enum_by_name(device, feature, key, value);
    }

    log.warning(&format!(
        "unknown key `{key}`. Available keys: {}",
        all_feature_names()
    ));
    Ok(())
}

/// Enumeration values are matched by symbolic name against the device's
/// live list of permitted values.
fn set_enum_by_name(device: &Device, feature: i32, key: &str, value: &str) -> Result<()> {
    let mut count = 0u32;
    check(
        unsafe { sdk::GXGetEnumEntryNums(device.0, feature, &mut count) },
        &format!("enumerate `{key}`"),
    )?;
    let mut entries = vec![sdk::GxEnumDescription::default(); count as usize];
    let mut size = count as usize * std::mem::size_of::<sdk::GxEnumDescription>();
    check(
        unsafe { sdk::GXGetEnumDescription(device.0, feature, entries.as_mut_ptr(), &mut size) },
        &format!("describe `{key}`"),
    )?;

    for entry in &entries {
        if entry.symbolic() == value {
            return check(
                unsafe { sdk::GXSetEnum(device.0, feature, entry.value) },
                &format!("set `{key}`"),
            );
        }
    }
    let permitted = entries
        .iter()
        .map(|entry| format!("`{}`", entry.symbolic()))
        .collect::<Vec<_>>()
        .join(", ");
    Err(Error::configuration(format!(
        "Failed to set `{key}` to `{value}`. Valid values are: {permitted}."
    )))
}

fn lookup(table: &[(&str, i32)], key: &str) -> Option<i32> {
    table
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, id)| *id)
}

fn all_feature_names() -> String {
    features::INT_FEATURES
        .iter()
        .chain(features::FLOAT_FEATURES)
        .chain(features::ENUM_FEATURES)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn check(status: sdk::GxStatus, what: &str) -> Result<()> {
    if status == sdk::GX_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(Error::runtime(format!(
            "{what}: {}",
            sdk::last_error_message(status)
        )))
    }
}

// ----------------------------------------------------------------------------
// Extras
// ----------------------------------------------------------------------------

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

fn pack_extras(device: &Device, pushers: &[Extra]) -> Option<Vec<u8>> {
    if pushers.is_empty() {
        return None;
    }
    let values: Vec<ExtraValue> = pushers
        .iter()
        .map(|extra| {
            let feature = match extra {
                Extra::Exposure => features::GX_FLOAT_EXPOSURE_TIME,
                Extra::Gain => features::GX_FLOAT_GAIN,
            };
            let mut value = 0.0f64;
            let status = unsafe { sdk::GXGetFloat(device.0, feature, &mut value) };
            if status != sdk::GX_STATUS_SUCCESS {
                value = 0.0;
            }
            ExtraValue::F64(value)
        })
        .collect();
    Some(extras::encode(&values))
}

// ----------------------------------------------------------------------------
// Feature tables
// ----------------------------------------------------------------------------

mod features {
    //! Lower-cased configuration names mapped to SDK feature ids. The id
    //! values compose the header's type tag with the feature ordinal.

    const INT: i32 = 0x1000_0000;
    const FLOAT: i32 = 0x2000_0000;
    const ENUM: i32 = 0x3000_0000;
    const STREAM: i32 = 0x0400_0000;

    const fn int_id(ordinal: i32) -> i32 {
        INT | ordinal
    }
    const fn float_id(ordinal: i32) -> i32 {
        FLOAT | ordinal
    }
    const fn enum_id(ordinal: i32) -> i32 {
        ENUM | ordinal
    }

    pub(super) const GX_INT_TIMESTAMP_TICK_FREQUENCY: i32 = int_id(3);
    pub(super) const GX_INT_BINNING_HORIZONTAL: i32 = int_id(19);
    pub(super) const GX_INT_BINNING_VERTICAL: i32 = int_id(20);
    pub(super) const GX_FLOAT_EXPOSURE_TIME: i32 = float_id(4);
    pub(super) const GX_FLOAT_GAIN: i32 = float_id(14);
    pub(super) const GX_ENUM_EXPOSURE_AUTO: i32 = enum_id(22);
    pub(super) const GX_ENUM_GAIN_AUTO: i32 = enum_id(42);

    pub(super) const INT_FEATURES: &[(&str, i32)] = &[
        ("device_link_selector", int_id(0)),
        ("device_link_throughput_limit", int_id(1)),
        ("device_link_current_throughput", int_id(2)),
        ("timestamp_tick_frequency", GX_INT_TIMESTAMP_TICK_FREQUENCY),
        ("timestamp_latch_value", int_id(4)),
        ("revision", int_id(5)),
        ("versions_supported", int_id(6)),
        ("version_used", int_id(7)),
        ("temperature_detection_status", int_id(8)),
        ("fan_speed", int_id(9)),
        ("air_change_detection_status", int_id(10)),
        ("air_tightness_detection_status", int_id(11)),
        ("sensor_width", int_id(12)),
        ("sensor_height", int_id(13)),
        ("width_max", int_id(14)),
        ("height_max", int_id(15)),
        ("offset_x", int_id(16)),
        ("offset_y", int_id(17)),
        ("width", int_id(18)),
        ("height", int_id(21)),
        ("binning_horizontal", GX_INT_BINNING_HORIZONTAL),
        ("binning_vertical", GX_INT_BINNING_VERTICAL),
        ("decimation_horizontal", int_id(22)),
        ("decimation_vertical", int_id(23)),
        ("center_width", int_id(24)),
        ("center_height", int_id(25)),
        ("decimation_linenumber", int_id(26)),
        ("sensor_decimation_horizontal", int_id(27)),
        ("sensor_decimation_vertical", int_id(28)),
        ("current_sensor_width", int_id(29)),
        ("current_sensor_height", int_id(30)),
        ("current_sensor_offsetx", int_id(31)),
        ("current_sensor_offsety", int_id(32)),
        ("current_sensor_widthmax", int_id(33)),
        ("current_sensor_heightmax", int_id(34)),
        ("payload_size", int_id(35)),
        ("estimated_bandwidth", int_id(36)),
        ("gev_heartbeat_timeout", int_id(37)),
        ("gev_packetsize", int_id(38)),
        ("gev_packetdelay", int_id(39)),
        ("gev_link_speed", int_id(40)),
        ("acquisition_speed_level", int_id(41)),
        ("acquisition_frame_count", int_id(42)),
        ("transfer_block_count", int_id(43)),
        ("acquisition_burst_frame_count", int_id(44)),
        ("line_status_all", int_id(45)),
        ("line_range", int_id(46)),
        ("line_delay", int_id(47)),
        ("line_filter_raising_edge", int_id(48)),
        ("line_filter_falling_edge", int_id(49)),
        ("digital_shift", int_id(50)),
        ("blacklevel_calib_value", int_id(51)),
        ("adc_level", int_id(52)),
        ("h_blanking", int_id(53)),
        ("v_blanking", int_id(54)),
        ("gray_value", int_id(55)),
        ("aaroi_offsetx", int_id(56)),
        ("aaroi_offsety", int_id(57)),
        ("aaroi_width", int_id(58)),
        ("aaroi_height", int_id(59)),
        ("contrast_param", int_id(60)),
        ("color_correction_param", int_id(61)),
        ("awbroi_offsetx", int_id(62)),
        ("awbroi_offsety", int_id(63)),
        ("awbroi_width", int_id(64)),
        ("awbroi_height", int_id(65)),
        ("static_defect_correction_finish", int_id(66)),
        ("ffc_expected_gray", int_id(67)),
        ("ffc_coefficients_size", int_id(68)),
        ("static_defect_correction_calib_status", int_id(69)),
        ("ffc_factory_status", int_id(70)),
        ("dsnu_factory_status", int_id(71)),
        ("prnu_factory_status", int_id(72)),
        ("data_field_value_all_used_status", int_id(73)),
        ("event_exposureend", int_id(74)),
        ("event_exposureend_timestamp", int_id(75)),
        ("event_exposureend_frameid", int_id(76)),
        ("event_block_discard", int_id(77)),
        ("event_block_discard_timestamp", int_id(78)),
        ("event_overrun", int_id(79)),
        ("event_overrun_timestamp", int_id(80)),
        ("event_framestart_overtrigger", int_id(81)),
        ("event_framestart_overtrigger_timestamp", int_id(82)),
        ("event_block_not_empty", int_id(83)),
        ("event_block_not_empty_timestamp", int_id(84)),
        ("event_internal_error", int_id(85)),
        ("event_internal_error_timestamp", int_id(86)),
        ("event_frameburststart_overtrigger", int_id(87)),
        ("event_frameburststart_overtrigger_frameid", int_id(88)),
        ("event_frameburststart_overtrigger_timestamp", int_id(89)),
        ("event_framestart_wait", int_id(90)),
        ("event_framestart_wait_timestamp", int_id(91)),
        ("event_frameburststart_wait", int_id(92)),
        ("event_frameburststart_wait_timestamp", int_id(93)),
        ("event_block_discard_frameid", int_id(94)),
        ("event_framestart_overtrigger_frameid", int_id(95)),
        ("event_block_not_empty_frameid", int_id(96)),
        ("event_framestart_wait_frameid", int_id(97)),
        ("event_frameburststart_wait_frameid", int_id(98)),
        ("lut_index", int_id(99)),
        ("lut_value", int_id(100)),
        ("lut_factory_status", int_id(101)),
        ("saturation", int_id(102)),
        ("counter_duration", int_id(103)),
        ("counter_value", int_id(104)),
        ("hdr_target_long_value", int_id(105)),
        ("hdr_target_short_value", int_id(106)),
        ("hdr_target_main_value", int_id(107)),
        ("mgc_selector", int_id(108)),
        ("frame_buffer_count", int_id(109)),
        ("serialport_data_bits", int_id(110)),
        ("transmit_queue_max_character_count", int_id(111)),
        ("transmit_queue_current_character_count", int_id(112)),
        ("receive_queue_max_character_count", int_id(113)),
        ("receive_queue_current_character_count", int_id(114)),
        ("receive_framing_error_count", int_id(115)),
        ("receive_parity_error_count", int_id(116)),
        ("serialport_data_length", int_id(117)),
        ("serial_port_detection_status", int_id(118)),
        ("image1_stream_id", int_id(119)),
        ("cxp_connection_test_error_count", int_id(120)),
        ("cxp_connection_test_packet_rx_count", int_id(121)),
        ("cxp_connection_test_packet_tx_count", int_id(122)),
        ("sequencer_set_selector", int_id(123)),
        ("sequencer_set_count", int_id(124)),
        ("sequencer_set_active", int_id(125)),
        ("sequencer_path_selector", int_id(126)),
        ("sequencer_set_next", int_id(127)),
        ("encoder_value", int_id(128)),
    ];

    pub(super) const FLOAT_FEATURES: &[(&str, i32)] = &[
        ("device_temperature", float_id(0)),
        ("tec_target_temperature", float_id(1)),
        ("device_humidity", float_id(2)),
        ("device_pressure", float_id(3)),
        ("exposure_time", GX_FLOAT_EXPOSURE_TIME),
        ("trigger_filter_raising", float_id(5)),
        ("trigger_filter_falling", float_id(6)),
        ("trigger_delay", float_id(7)),
        ("acquisition_frame_rate", float_id(8)),
        ("current_acquisition_frame_rate", float_id(9)),
        ("exposure_delay", float_id(10)),
        ("exposure_overlap_time_max", float_id(11)),
        ("pulse_width", float_id(12)),
        ("balance_ratio", float_id(13)),
        ("gain", GX_FLOAT_GAIN),
        ("blacklevel", float_id(15)),
        ("gamma", float_id(16)),
        ("pga_gain", float_id(17)),
        ("auto_gain_min", float_id(18)),
        ("auto_gain_max", float_id(19)),
        ("auto_exposure_time_min", float_id(20)),
        ("auto_exposure_time_max", float_id(21)),
        ("gamma_param", float_id(22)),
        ("sharpness", float_id(23)),
        ("noise_reduction", float_id(24)),
        ("color_transformation_value", float_id(25)),
        ("timer_duration", float_id(26)),
        ("timer_delay", float_id(27)),
        ("mgc_exposure_time", float_id(28)),
        ("mgc_gain", float_id(29)),
        ("contrast", float_id(30)),
        ("imu_room_temperature", float_id(31)),
    ];

    pub(super) const ENUM_FEATURES: &[(&str, i32)] = &[
        ("device_link_throughput_limit_mode", enum_id(0)),
        ("device_temperature_selector", enum_id(1)),
        ("lowpower_mode", enum_id(2)),
        ("close_ccd", enum_id(3)),
        ("pixel_size", enum_id(4)),
        ("pixel_color_filter", enum_id(5)),
        ("pixel_format", enum_id(6)),
        ("test_pattern", enum_id(7)),
        ("test_pattern_generator_selector", enum_id(8)),
        ("region_send_mode", enum_id(9)),
        ("region_mode", enum_id(10)),
        ("rregion_selector", enum_id(11)),
        ("binning_horizontal_mode", enum_id(12)),
        ("binning_vertical_mode", enum_id(13)),
        ("sensor_shutter_mode", enum_id(14)),
        ("sensor_selector", enum_id(15)),
        ("sensor_bit_depth", enum_id(16)),
        ("device_tap_geometry", enum_id(17)),
        ("acquisition_mode", enum_id(18)),
        ("trigger_mode", enum_id(19)),
        ("trigger_activation", enum_id(20)),
        ("trigger_switch", enum_id(21)),
        ("exposure_auto", GX_ENUM_EXPOSURE_AUTO),
        ("trigger_source", enum_id(23)),
        ("exposure_mode", enum_id(24)),
        ("trigger_selector", enum_id(25)),
        ("transfer_control_mode", enum_id(26)),
        ("transfer_operation_mode", enum_id(27)),
        ("acquisition_frame_rate_mode", enum_id(28)),
        ("fixed_pattern_noise_correct_mode", enum_id(29)),
        ("acquisition_status_selector", enum_id(30)),
        ("exposure_time_mode", enum_id(31)),
        ("acquisition_burst_mode", enum_id(32)),
        ("overlap_mode", enum_id(33)),
        ("multisource_selector", enum_id(34)),
        ("user_output_selector", enum_id(35)),
        ("user_output_mode", enum_id(36)),
        ("strobe_switch", enum_id(37)),
        ("line_selector", enum_id(38)),
        ("line_mode", enum_id(39)),
        ("line_source", enum_id(40)),
        ("gain_selector", enum_id(41)),
        ("gain_auto", GX_ENUM_GAIN_AUTO),
        ("blacklevel_auto", enum_id(43)),
        ("blacklevel_selector", enum_id(44)),
        ("balance_white_auto", enum_id(45)),
        ("balance_ratio_selector", enum_id(46)),
        ("color_correct", enum_id(47)),
        ("dead_pixel_correct", enum_id(48)),
        ("gamma_mode", enum_id(49)),
        ("light_source_preset", enum_id(50)),
        ("aa_light_environment", enum_id(51)),
        ("image_gray_raise_switch", enum_id(52)),
        ("awb_lamp_house", enum_id(53)),
        ("sharpness_mode", enum_id(54)),
        ("user_data_filed_selector", enum_id(55)),
        ("flat_field_correction", enum_id(56)),
        ("noise_reduction_mode", enum_id(57)),
        ("static_defect_correction", enum_id(58)),
        ("2d_noise_reduction_mode", enum_id(59)),
        ("3d_noise_reduction_mode", enum_id(60)),
        ("shading_correction_mode", enum_id(61)),
        ("ffc_generate_status", enum_id(62)),
        ("ffc_expected_gray_value_enable", enum_id(63)),
        ("dsnu_selector", enum_id(64)),
        ("dsnu_generate_status", enum_id(65)),
        ("prnu_selector", enum_id(66)),
        ("prnu_generate_status", enum_id(67)),
        ("ffc_coefficient", enum_id(68)),
        ("user_set_selector", enum_id(69)),
        ("user_set_default", enum_id(70)),
        ("event_selector", enum_id(71)),
        ("event_notification", enum_id(72)),
        ("event_simple_mode", enum_id(73)),
        ("lut_selector", enum_id(74)),
        ("chunk_selector", enum_id(75)),
        ("color_transformation_mode", enum_id(76)),
        ("color_transformation_value_selector", enum_id(77)),
        ("saturation_mode", enum_id(78)),
        ("timer_selector", enum_id(79)),
        ("timer_trigger_source", enum_id(80)),
        ("counter_selector", enum_id(81)),
        ("counter_event_source", enum_id(82)),
        ("counter_reset_source", enum_id(83)),
        ("counter_reset_activation", enum_id(84)),
        ("counter_trigger_source", enum_id(85)),
        ("timer_trigger_activation", enum_id(86)),
        ("remove_parameter_limit", enum_id(87)),
        ("hdr_mode", enum_id(88)),
        ("mgc_mode", enum_id(89)),
        ("imu_config_acc_range", enum_id(90)),
        ("imu_config_acc_odr_low_pass_filter_switch", enum_id(91)),
        ("imu_config_acc_odr", enum_id(92)),
        ("imu_config_acc_odr_low_pass_filter_frequency", enum_id(93)),
        ("imu_config_gyro_xrange", enum_id(94)),
        ("imu_config_gyro_yrange", enum_id(95)),
        ("imu_config_gyro_zrange", enum_id(96)),
        ("imu_config_gyro_odr_low_pass_filter_switch", enum_id(97)),
        ("imu_config_gyro_odr", enum_id(98)),
        ("imu_config_gyro_odr_low_pass_filter_frequency", enum_id(99)),
        ("imu_temperature_odr", enum_id(100)),
        ("serialport_selector", enum_id(101)),
        ("serialport_source", enum_id(102)),
        ("serialport_baudrate", enum_id(103)),
        ("serialport_stop_bits", enum_id(104)),
        ("serialport_parity", enum_id(105)),
        ("cxp_link_configuration", enum_id(106)),
        ("cxp_link_configuration_preferred", enum_id(107)),
        ("cxp_link_configuration_status", enum_id(108)),
        ("cxp_connection_selector", enum_id(109)),
        ("cxp_connection_test_mode", enum_id(110)),
        ("sequencer_mode", enum_id(111)),
        ("sequencer_configuration_mode", enum_id(112)),
        ("sequencer_feature_selector", enum_id(113)),
        ("sequencer_trigger_source", enum_id(114)),
        ("encoder_selector", enum_id(115)),
        ("encoder_direction", enum_id(116)),
        ("encoder_sourcea", enum_id(117)),
        ("encoder_sourceb", enum_id(118)),
        ("encoder_mode", enum_id(119)),
        ("um_resend_mode", STREAM | enum_id(120)),
        ("um_stop_acquisition_mode", STREAM | enum_id(121)),
        ("um_stream_buffer_handling_mode", STREAM | enum_id(122)),
    ];
}

// ----------------------------------------------------------------------------
// SDK surface
// ----------------------------------------------------------------------------

mod sdk {
    //! Minimal hand-declared binding to the vendor acquisition library,
    //! limited to the calls this backend makes.

    use std::os::raw::{c_char, c_void};

    pub(super) type GxStatus = i32;
    pub(super) type GxDevHandle = *mut c_void;

    pub(super) const GX_STATUS_SUCCESS: GxStatus = 0;
    pub(super) const GX_STATUS_TIMEOUT: GxStatus = -11;

    pub(super) const GX_OPEN_SN: i32 = 0;
    pub(super) const GX_OPEN_IP: i32 = 1;
    pub(super) const GX_OPEN_MAC: i32 = 2;
    pub(super) const GX_OPEN_INDEX: i32 = 3;
    pub(super) const GX_OPEN_USERID: i32 = 4;
    pub(super) const GX_ACCESS_EXCLUSIVE: i32 = 3;

    pub(super) const GX_FRAME_STATUS_SUCCESS: i32 = 0;

    #[repr(C)]
    pub(super) struct GxOpenParam {
        pub content: *mut c_char,
        pub open_mode: i32,
        pub access_mode: i32,
    }

    #[repr(C)]
    #[allow(dead_code)] // layout mirrors the vendor header
    pub(super) struct GxFrameBuffer {
        pub status: i32,
        pub img_buf: *mut c_void,
        pub width: i32,
        pub height: i32,
        pub pixel_format: i32,
        pub img_size: i32,
        pub frame_id: u64,
        pub timestamp: u64,
        pub offset_x: i32,
        pub offset_y: i32,
        pub reserved: [i32; 1],
    }

    pub(super) const SYMBOLIC_LEN: usize = 64;

    #[repr(C)]
    #[derive(Clone)]
    pub(super) struct GxEnumDescription {
        pub value: i64,
        pub symbolic: [c_char; SYMBOLIC_LEN],
    }

    impl Default for GxEnumDescription {
        fn default() -> Self {
            Self {
                value: 0,
                symbolic: [0; SYMBOLIC_LEN],
            }
        }
    }

    impl GxEnumDescription {
        pub(super) fn symbolic(&self) -> String {
            let bytes: Vec<u8> = self
                .symbolic
                .iter()
                .take_while(|&&c| c != 0)
                .map(|&c| c as u8)
                .collect();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    #[link(name = "gxiapi")]
    extern "C" {
        pub(super) fn GXInitLib() -> GxStatus;
        pub(super) fn GXCloseLib() -> GxStatus;
        pub(super) fn GXOpenDevice(param: *mut GxOpenParam, handle: *mut GxDevHandle) -> GxStatus;
        pub(super) fn GXCloseDevice(handle: GxDevHandle) -> GxStatus;
        pub(super) fn GXGetLastError(
            error_code: *mut GxStatus,
            message: *mut c_char,
            size: *mut usize,
        ) -> GxStatus;
        pub(super) fn GXGetInt(handle: GxDevHandle, feature: i32, value: *mut i64) -> GxStatus;
        pub(super) fn GXSetInt(handle: GxDevHandle, feature: i32, value: i64) -> GxStatus;
        pub(super) fn GXGetFloat(handle: GxDevHandle, feature: i32, value: *mut f64) -> GxStatus;
        pub(super) fn GXSetFloat(handle: GxDevHandle, feature: i32, value: f64) -> GxStatus;
        pub(super) fn GXSetEnum(handle: GxDevHandle, feature: i32, value: i64) -> GxStatus;
        pub(super) fn GXGetEnumEntryNums(
            handle: GxDevHandle,
            feature: i32,
            count: *mut u32,
        ) -> GxStatus;
        pub(super) fn GXGetEnumDescription(
            handle: GxDevHandle,
            feature: i32,
            entries: *mut GxEnumDescription,
            size: *mut usize,
        ) -> GxStatus;
        pub(super) fn GXStreamOn(handle: GxDevHandle) -> GxStatus;
        pub(super) fn GXStreamOff(handle: GxDevHandle) -> GxStatus;
        pub(super) fn GXDQAllBufs(
            handle: GxDevHandle,
            buffers: *mut *mut GxFrameBuffer,
            capacity: u32,
            count: *mut u32,
            timeout_ms: u32,
        ) -> GxStatus;
        pub(super) fn GXQAllBufs(handle: GxDevHandle) -> GxStatus;
    }

    /// Fetches the SDK's own description of the most recent failure. The
    /// two-call pattern sizes the message buffer first.
    pub(super) fn last_error_message(status: GxStatus) -> String {
        let mut code = status;
        let mut size = 0usize;
        let probed = unsafe { GXGetLastError(&mut code, std::ptr::null_mut(), &mut size) };
        if probed != GX_STATUS_SUCCESS || size == 0 {
            return format!("camera SDK error {status}");
        }
        let mut buffer = vec![0u8; size];
        let fetched =
            unsafe { GXGetLastError(&mut code, buffer.as_mut_ptr() as *mut c_char, &mut size) };
        if fetched != GX_STATUS_SUCCESS {
            return format!("camera SDK error {status}");
        }
        let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
        String::from_utf8_lossy(&buffer[..end]).into_owned()
    }
}
