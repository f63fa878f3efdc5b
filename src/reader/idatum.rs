//! Industrial-camera SDK B backend (`idatum://<device-id>`).
//!
//! Enumerates GigE and USB devices, matches the requested identifier
//! against each device's name (IP address for GigE, user-defined name for
//! USB), and pulls raw buffers on the acquisition thread. The device writes
//! directly into caller-allocated image memory.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::frame::{Frame, FrameNumberTracker, ImageDesc, ScalarType, SharedAllocator};
use crate::log::LogSink;
use crate::queue::{OverflowPolicy, Slot};
use crate::worker::{Shared, Worker};

const TIMEOUT_MS: u32 = 250;
const MAX_TIMEOUT_HITS: u32 = 3000 / TIMEOUT_MS;

/// The SDK handle is owned here and driven only by the acquisition thread
/// after construction.
struct Device(sdk::MvHandle);
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
            sdk::MV_CC_CloseDevice(self.0);
            sdk::MV_CC_DestroyHandle(self.0);
        }
    }
}

#[derive(Debug)]
pub(crate) struct IDatumReader {
    shared: Arc<Shared<Frame>>,
    worker: Worker,
    ended: bool,
}

impl IDatumReader {
    pub(crate) fn open(
        device_id: &str,
        pairs: &[(String, String)],
        extras: &[&str],
        allocator: SharedAllocator,
        log: LogSink,
    ) -> Result<Self> {
        if !extras.is_empty() {
            return Err(Error::configuration(
                "extras are not yet implemented for this backend",
            ));
        }
        if !pairs.is_empty() {
            log.warning("configuration keys are ignored by this backend");
        }

        let device = Arc::new(open_device(device_id)?);

        let shared = Shared::new(OverflowPolicy::ThinByHalf { high: 9 });
        let worker = Worker::spawn("videoreader-idatum", Arc::clone(&shared), {
            let shared = Arc::clone(&shared);
            let device = Arc::clone(&device);
            move || acquire(&device, &shared, &allocator)
        })?;

        Ok(Self {
            shared,
            worker,
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

    pub(crate) fn stop(&self) {
        self.shared.queue.request_stop();
    }
}

impl Drop for IDatumReader {
    fn drop(&mut self) {
        self.shared.queue.request_stop();
        self.worker.join();
    }
}

// ----------------------------------------------------------------------------
// Device lookup
// ----------------------------------------------------------------------------

fn open_device(device_id: &str) -> Result<Device> {
    let mut infos = sdk::MvDeviceInfoList::default();
    check(
        unsafe { sdk::MV_CC_EnumDevices(sdk::MV_GIGE_DEVICE | sdk::MV_USB_DEVICE, &mut infos) },
        "device enumeration",
    )?;
    if infos.device_num == 0 {
        return Err(Error::open(device_id, "no devices found"));
    }

    let mut all_names = Vec::new();
    for index in 0..infos.device_num as usize {
        let info = infos.device_info[index];
        if info.is_null() {
            continue;
        }
        let name = unsafe { device_name(&*info) };
        if name == device_id {
            let mut handle: sdk::MvHandle = std::ptr::null_mut();
            check(
                unsafe { sdk::MV_CC_CreateHandleWithoutLog(&mut handle, info) },
                "create device handle",
            )?;
            let device = Device(handle);
            check(
                unsafe { sdk::MV_CC_OpenDevice(device.0, sdk::MV_ACCESS_EXCLUSIVE, 0) },
                "open device",
            )?;
            return Ok(device);
        }
        all_names.push(name);
    }

    let joined = all_names
        .iter()
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(", ");
    Err(Error::open(
        device_id,
        format!("requested device not found, available devices are {joined}"),
    ))
}

/// GigE devices answer to their IP address; USB devices to their
/// user-defined name.
unsafe fn device_name(info: &sdk::MvDeviceInfo) -> String {
    match info.transport_layer_type {
        sdk::MV_GIGE_DEVICE => {
            let ip = info.special_info.gige.current_ip;
            format!(
                "{}.{}.{}.{}",
                (ip >> 24) & 0xff,
                (ip >> 16) & 0xff,
                (ip >> 8) & 0xff,
                ip & 0xff
            )
        }
        sdk::MV_USB_DEVICE => {
            let raw = &info.special_info.usb.user_defined_name;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            String::from_utf8_lossy(&raw[..end]).into_owned()
        }
        _ => "device not implemented".to_string(),
    }
}

// ----------------------------------------------------------------------------
// Acquisition loop
// ----------------------------------------------------------------------------

fn acquire(device: &Device, shared: &Shared<Frame>, allocator: &SharedAllocator) -> Result<()> {
    check(
        unsafe { sdk::MV_CC_StartGrabbing(device.0) },
        "start grabbing",
    )?;
    let result = grab_loop(device, shared, allocator);
    unsafe { sdk::MV_CC_StopGrabbing(device.0) };
    result
}

fn grab_loop(device: &Device, shared: &Shared<Frame>, allocator: &SharedAllocator) -> Result<()> {
    let mut width_value = sdk::MvIntValue::default();
    check(
        unsafe { sdk::MV_CC_GetWidth(device.0, &mut width_value) },
        "get width",
    )?;
    let mut height_value = sdk::MvIntValue::default();
    check(
        unsafe { sdk::MV_CC_GetHeight(device.0, &mut height_value) },
        "get height",
    )?;
    let mut pixel_value = sdk::MvEnumValue::default();
    check(
        unsafe { sdk::MV_CC_GetPixelFormat(device.0, &mut pixel_value) },
        "get pixel type",
    )?;

    let pixel_type = pixel_value.cur_value;
    let channels: i32 = if pixel_type & sdk::MV_GVSP_PIX_MONO != 0 {
        1
    } else if pixel_type & sdk::MV_GVSP_PIX_COLOR != 0 {
        3
    } else {
        return Err(Error::stream("not implemented pixel type"));
    };
    let _scalar_type = match sdk::pixel_bit_count(pixel_type) {
        8 => ScalarType::U8,
        16 => ScalarType::U16,
        _ => return Err(Error::stream("not implemented pixel depth")),
    };

    let width = width_value.cur_value as i32;
    let height = height_value.cur_value as i32;
    let stride = width * channels;
    let buffer_size = (stride * height) as u32;

    let mut tracker = FrameNumberTracker::default();
    let mut timeout_hits = 0u32;
    let mut out_info = sdk::MvFrameOutInfoEx::default();

    while !shared.queue.stop_requested() {
        let mut image = ImageDesc::new(height, width, channels, ScalarType::U8, stride);
        allocator.allocate(&mut image);
        if image.data.is_null() {
            return Err(Error::runtime("allocation callback failed: data is null"));
        }
        let mut frame = Frame::new(Arc::clone(allocator), image, 0, 0.0, None);

        let status = unsafe {
            sdk::MV_CC_GetOneFrameTimeout(
                device.0,
                frame.image.data,
                buffer_size,
                &mut out_info,
                TIMEOUT_MS,
            )
        };
        if status == sdk::MV_E_GC_TIMEOUT || status == sdk::MV_E_NODATA {
            timeout_hits += 1;
            if timeout_hits > MAX_TIMEOUT_HITS {
                return Err(Error::runtime("no camera data for 3 seconds"));
            }
            continue; // dropping the frame releases the image
        }
        check(status, "get image buffer")?;
        timeout_hits = 0;

        let ticks = (u64::from(out_info.dev_timestamp_high) << 32)
            | u64::from(out_info.dev_timestamp_low);
        frame.timestamp_s = ticks as f64 * 1e-8;
        frame.number = tracker.observe(u64::from(out_info.frame_num));

        shared.queue.push(frame);
    }
    Ok(())
}

fn check(status: i32, what: &str) -> Result<()> {
    if status == sdk::MV_OK {
        Ok(())
    } else {
        let described = sdk::error_description(status)
            .map(str::to_string)
            .unwrap_or_else(|| format!("code {status:#x}"));
        Err(Error::runtime(format!("iDatum: {what}: {described}")))
    }
}

// ----------------------------------------------------------------------------
// SDK surface
// ----------------------------------------------------------------------------

mod sdk {
    //! Minimal hand-declared binding to the vendor camera-control library,
    //! limited to the calls this backend makes.

    use std::os::raw::c_void;

    pub(super) type MvHandle = *mut c_void;

    pub(super) const MV_OK: i32 = 0;

    pub(super) const MV_GIGE_DEVICE: u32 = 0x0000_0001;
    pub(super) const MV_USB_DEVICE: u32 = 0x0000_0004;
    pub(super) const MV_ACCESS_EXCLUSIVE: u32 = 1;

    pub(super) const MV_GVSP_PIX_MONO: u32 = 0x0100_0000;
    pub(super) const MV_GVSP_PIX_COLOR: u32 = 0x0200_0000;

    /// Bits 16..24 of a pixel-type value carry the bits-per-pixel count.
    pub(super) fn pixel_bit_count(pixel_type: u32) -> u32 {
        (pixel_type >> 16) & 0xff
    }

    pub(super) const MAX_DEVICE_NUM: usize = 256;

    #[repr(C)]
    #[derive(Clone, Copy)]
    #[allow(dead_code)] // layout mirrors the vendor header
    pub(super) struct MvGigeDeviceInfo {
        pub ip_cfg_option: u32,
        pub ip_cfg_current: u32,
        pub current_ip: u32,
        pub current_subnet_mask: u32,
        pub default_gateway: u32,
        pub manufacturer_name: [u8; 32],
        pub model_name: [u8; 32],
        pub device_version: [u8; 32],
        pub manufacturer_specific: [u8; 48],
        pub serial_number: [u8; 16],
        pub user_defined_name: [u8; 16],
        pub net_export: u32,
        pub reserved: [u32; 4],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    #[allow(dead_code)] // layout mirrors the vendor header
    pub(super) struct MvUsbDeviceInfo {
        pub device_guid: [u8; 64],
        pub vendor_name: [u8; 64],
        pub model_name: [u8; 64],
        pub family_name: [u8; 64],
        pub device_version: [u8; 64],
        pub manufacturer_name: [u8; 64],
        pub serial_number: [u8; 64],
        pub user_defined_name: [u8; 64],
        pub bcd_usb: u32,
        pub device_address: u32,
        pub reserved: [u32; 2],
    }

    #[repr(C)]
    pub(super) union MvSpecialInfo {
        pub gige: MvGigeDeviceInfo,
        pub usb: MvUsbDeviceInfo,
    }

    #[repr(C)]
    #[allow(dead_code)] // layout mirrors the vendor header
    pub(super) struct MvDeviceInfo {
        pub major_ver: u16,
        pub minor_ver: u16,
        pub mac_addr_high: u32,
        pub mac_addr_low: u32,
        pub transport_layer_type: u32,
        pub reserved: [u32; 4],
        pub special_info: MvSpecialInfo,
    }

    #[repr(C)]
    pub(super) struct MvDeviceInfoList {
        pub device_num: u32,
        pub device_info: [*const MvDeviceInfo; MAX_DEVICE_NUM],
    }

    impl Default for MvDeviceInfoList {
        fn default() -> Self {
            Self {
                device_num: 0,
                device_info: [std::ptr::null(); MAX_DEVICE_NUM],
            }
        }
    }

    #[repr(C)]
    #[derive(Default)]
    #[allow(dead_code)] // layout mirrors the vendor header
    pub(super) struct MvIntValue {
        pub cur_value: u32,
        pub max: u32,
        pub min: u32,
        pub inc: u32,
        pub reserved: [u32; 4],
    }

    #[repr(C)]
    #[allow(dead_code)] // layout mirrors the vendor header
    pub(super) struct MvEnumValue {
        pub cur_value: u32,
        pub supported_num: u32,
        pub supported: [u32; 64],
        pub reserved: [u32; 4],
    }

    impl Default for MvEnumValue {
        fn default() -> Self {
            Self {
                cur_value: 0,
                supported_num: 0,
                supported: [0; 64],
                reserved: [0; 4],
            }
        }
    }

    #[repr(C)]
    #[derive(Default)]
    #[allow(dead_code)] // layout mirrors the vendor header
    pub(super) struct MvFrameOutInfoEx {
        pub width: u16,
        pub height: u16,
        pub pixel_type: u32,
        pub frame_num: u32,
        pub dev_timestamp_high: u32,
        pub dev_timestamp_low: u32,
        pub host_timestamp: i64,
        pub frame_len: u32,
        pub second_count: u32,
        pub cycle_count: u32,
        pub cycle_offset: u32,
        pub gain: f32,
        pub exposure_time: f32,
        pub reserved: [u32; 16],
    }

    #[link(name = "MvCameraControl")]
    extern "C" {
        pub(super) fn MV_CC_EnumDevices(layer_types: u32, list: *mut MvDeviceInfoList) -> i32;
        pub(super) fn MV_CC_CreateHandleWithoutLog(
            handle: *mut MvHandle,
            info: *const MvDeviceInfo,
        ) -> i32;
        pub(super) fn MV_CC_DestroyHandle(handle: MvHandle) -> i32;
        pub(super) fn MV_CC_OpenDevice(
            handle: MvHandle,
            access_mode: u32,
            switchover_key: u16,
        ) -> i32;
        pub(super) fn MV_CC_CloseDevice(handle: MvHandle) -> i32;
        pub(super) fn MV_CC_StartGrabbing(handle: MvHandle) -> i32;
        pub(super) fn MV_CC_StopGrabbing(handle: MvHandle) -> i32;
        pub(super) fn MV_CC_GetWidth(handle: MvHandle, value: *mut MvIntValue) -> i32;
        pub(super) fn MV_CC_GetHeight(handle: MvHandle, value: *mut MvIntValue) -> i32;
        pub(super) fn MV_CC_GetPixelFormat(handle: MvHandle, value: *mut MvEnumValue) -> i32;
        pub(super) fn MV_CC_GetOneFrameTimeout(
            handle: MvHandle,
            data: *mut u8,
            size: u32,
            info: *mut MvFrameOutInfoEx,
            timeout_ms: u32,
        ) -> i32;
    }

    // Error codes, as the vendor header numbers them.
    pub(super) const MV_E_HANDLE: i32 = 0x8000_0000u32 as i32;
    pub(super) const MV_E_SUPPORT: i32 = 0x8000_0001u32 as i32;
    pub(super) const MV_E_BUFOVER: i32 = 0x8000_0002u32 as i32;
    pub(super) const MV_E_CALLORDER: i32 = 0x8000_0003u32 as i32;
    pub(super) const MV_E_PARAMETER: i32 = 0x8000_0004u32 as i32;
    pub(super) const MV_E_RESOURCE: i32 = 0x8000_0006u32 as i32;
    pub(super) const MV_E_NODATA: i32 = 0x8000_0007u32 as i32;
    pub(super) const MV_E_PRECONDITION: i32 = 0x8000_0008u32 as i32;
    pub(super) const MV_E_VERSION: i32 = 0x8000_0009u32 as i32;
    pub(super) const MV_E_NOENOUGH_BUF: i32 = 0x8000_000Au32 as i32;
    pub(super) const MV_E_ABNORMAL_IMAGE: i32 = 0x8000_000Bu32 as i32;
    pub(super) const MV_E_LOAD_LIBRARY: i32 = 0x8000_000Cu32 as i32;
    pub(super) const MV_E_NOOUTBUF: i32 = 0x8000_000Du32 as i32;
    pub(super) const MV_E_UNKNOW: i32 = 0x8000_00FFu32 as i32;
    pub(super) const MV_E_GC_GENERIC: i32 = 0x8000_0100u32 as i32;
    pub(super) const MV_E_GC_ARGUMENT: i32 = 0x8000_0101u32 as i32;
    pub(super) const MV_E_GC_RANGE: i32 = 0x8000_0102u32 as i32;
    pub(super) const MV_E_GC_PROPERTY: i32 = 0x8000_0103u32 as i32;
    pub(super) const MV_E_GC_RUNTIME: i32 = 0x8000_0104u32 as i32;
    pub(super) const MV_E_GC_LOGICAL: i32 = 0x8000_0105u32 as i32;
    pub(super) const MV_E_GC_ACCESS: i32 = 0x8000_0106u32 as i32;
    pub(super) const MV_E_GC_TIMEOUT: i32 = 0x8000_0107u32 as i32;
    pub(super) const MV_E_GC_DYNAMICCAST: i32 = 0x8000_0108u32 as i32;
    pub(super) const MV_E_GC_UNKNOW: i32 = 0x8000_01FFu32 as i32;
    pub(super) const MV_E_NOT_IMPLEMENTED: i32 = 0x8000_0200u32 as i32;
    pub(super) const MV_E_INVALID_ADDRESS: i32 = 0x8000_0201u32 as i32;
    pub(super) const MV_E_WRITE_PROTECT: i32 = 0x8000_0202u32 as i32;
    pub(super) const MV_E_ACCESS_DENIED: i32 = 0x8000_0203u32 as i32;
    pub(super) const MV_E_BUSY: i32 = 0x8000_0204u32 as i32;
    pub(super) const MV_E_PACKET: i32 = 0x8000_0205u32 as i32;
    pub(super) const MV_E_NETER: i32 = 0x8000_0206u32 as i32;
    pub(super) const MV_E_IP_CONFLICT: i32 = 0x8000_0221u32 as i32;
    pub(super) const MV_E_USB_READ: i32 = 0x8000_0300u32 as i32;
    pub(super) const MV_E_USB_WRITE: i32 = 0x8000_0301u32 as i32;
    pub(super) const MV_E_USB_DEVICE: i32 = 0x8000_0302u32 as i32;
    pub(super) const MV_E_USB_GENICAM: i32 = 0x8000_0303u32 as i32;
    pub(super) const MV_E_USB_BANDWIDTH: i32 = 0x8000_0304u32 as i32;
    pub(super) const MV_E_USB_DRIVER: i32 = 0x8000_0305u32 as i32;
    pub(super) const MV_E_USB_UNKNOW: i32 = 0x8000_03FFu32 as i32;
    pub(super) const MV_E_UPG_FILE_MISMATCH: i32 = 0x8000_0400u32 as i32;
    pub(super) const MV_E_UPG_LANGUSGE_MISMATCH: i32 = 0x8000_0401u32 as i32;
    pub(super) const MV_E_UPG_CONFLICT: i32 = 0x8000_0402u32 as i32;
    pub(super) const MV_E_UPG_INNER_ERR: i32 = 0x8000_0403u32 as i32;
    pub(super) const MV_E_UPG_UNKNOW: i32 = 0x8000_04FFu32 as i32;

    pub(super) fn error_description(code: i32) -> Option<&'static str> {
        Some(match code {
            MV_E_HANDLE => "Error or invalid handle",
            MV_E_SUPPORT => "Not supported function",
            MV_E_BUFOVER => "Buffer overflow",
            MV_E_CALLORDER => "Function calling order error",
            MV_E_PARAMETER => "Incorrect parameter",
            MV_E_RESOURCE => "Applying resource failed",
            MV_E_NODATA => "No data",
            MV_E_PRECONDITION => "Precondition error, or running environment changed",
            MV_E_VERSION => "Version mismatches",
            MV_E_NOENOUGH_BUF => "Insufficient memory",
            MV_E_ABNORMAL_IMAGE => "Abnormal image, maybe incomplete image because of lost packet",
            MV_E_LOAD_LIBRARY => "Load library failed",
            MV_E_NOOUTBUF => "No available buffer",
            MV_E_UNKNOW => "Unknown error",
            MV_E_GC_GENERIC => "General error",
            MV_E_GC_ARGUMENT => "Illegal parameters",
            MV_E_GC_RANGE => "The value is out of range",
            MV_E_GC_PROPERTY => "Property error",
            MV_E_GC_RUNTIME => "Running environment error",
            MV_E_GC_LOGICAL => "Logical error",
            MV_E_GC_ACCESS => "Node accessing condition error",
            MV_E_GC_TIMEOUT => "Timeout",
            MV_E_GC_DYNAMICCAST => "Transformation exception",
            MV_E_GC_UNKNOW => "GenICam unknown error",
            MV_E_NOT_IMPLEMENTED => "The command is not supported by device",
            MV_E_INVALID_ADDRESS => "The target address being accessed does not exist",
            MV_E_WRITE_PROTECT => "The target address is not writable",
            MV_E_ACCESS_DENIED => "No permission",
            MV_E_BUSY => "Device is busy, or network disconnected",
            MV_E_PACKET => "Network data packet error",
            MV_E_NETER => "Network error",
            MV_E_IP_CONFLICT => "Device IP conflict",
            MV_E_USB_READ => "Reading USB error",
            MV_E_USB_WRITE => "Writing USB error",
            MV_E_USB_DEVICE => "Device exception",
            MV_E_USB_GENICAM => "GenICam error",
            MV_E_USB_BANDWIDTH => "Insufficient bandwidth",
            MV_E_USB_DRIVER => "Driver mismatch or unmounted drive",
            MV_E_USB_UNKNOW => "USB unknown error",
            MV_E_UPG_FILE_MISMATCH => "Firmware mismatches",
            MV_E_UPG_LANGUSGE_MISMATCH => "Firmware language mismatches",
            MV_E_UPG_CONFLICT => "Upgrading conflicted",
            MV_E_UPG_INNER_ERR => "Camera internal error during upgrade",
            MV_E_UPG_UNKNOW => "Unknown error during upgrade",
            _ => return None,
        })
    }
}
