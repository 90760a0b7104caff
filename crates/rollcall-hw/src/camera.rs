//! V4L2 video capture via the `v4l` crate.
//!
//! A [`Camera`] keeps one memory-mapped stream open for its whole lifetime,
//! so consecutive frames come straight from the driver's buffer ring.

use crate::frame::{self, Frame, FrameError};
use image::RgbImage;
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Preferred capture size; the driver may negotiate something else.
const PREFERRED_WIDTH: u32 = 640;
const PREFERRED_HEIGHT: u32 = 480;

/// Buffers queued in the mmap ring.
const STREAM_BUFFERS: u32 = 4;

const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device {0} is in use by another process")]
    DeviceBusy(String),
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} is not a video capture device")]
    NotCaptureDevice(String),
    #[error("no supported pixel format (offered: {0})")]
    UnsupportedFormat(String),
    #[error("format negotiation failed: {0}")]
    Negotiation(#[source] io::Error),
    #[error("capture stream error: {0}")]
    Stream(#[source] io::Error),
    #[error("frame conversion failed: {0}")]
    Conversion(#[from] FrameError),
}

/// A V4L2 capture node found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts this crate can turn into RGB, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb3,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    const PREFERENCE: [PixelFormat; 3] = [Self::Yuyv, Self::Rgb3, Self::Grey];

    pub fn fourcc(self) -> FourCC {
        match self {
            Self::Yuyv => FourCC::new(b"YUYV"),
            Self::Rgb3 => FourCC::new(b"RGB3"),
            Self::Grey => FourCC::new(b"GREY"),
        }
    }

    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::PREFERENCE.into_iter().find(|f| f.fourcc() == fourcc)
    }

    /// Best supported format among those a device offers.
    pub fn choose(offered: &[FourCC]) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|f| offered.contains(&f.fourcc()))
    }

    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            Self::Rgb3 => frame::rgb24(buf, width, height),
            Self::Grey => frame::grey_to_rgb(buf, width, height),
        }
    }
}

/// An open camera with a running capture stream.
pub struct Camera {
    stream: MmapStream<'static>,
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Camera {
    /// Open `device_path`, negotiate a format and start streaming.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.raw_os_error() {
            Some(EBUSY) => CameraError::DeviceBusy(device_path.to_string()),
            _ => CameraError::Open {
                path: device_path.to_string(),
                source: e,
            },
        })?;

        let caps = device.query_caps().map_err(|e| CameraError::Open {
            path: device_path.to_string(),
            source: e,
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCaptureDevice(device_path.to_string()));
        }

        let offered: Vec<FourCC> = device
            .enum_formats()
            .map_err(CameraError::Negotiation)?
            .into_iter()
            .map(|d| d.fourcc)
            .collect();
        let wanted = PixelFormat::choose(&offered).ok_or_else(|| {
            let names: Vec<String> = offered.iter().map(|f| f.to_string()).collect();
            CameraError::UnsupportedFormat(names.join(", "))
        })?;

        let mut fmt = device.format().map_err(CameraError::Negotiation)?;
        fmt.fourcc = wanted.fourcc();
        fmt.width = PREFERRED_WIDTH;
        fmt.height = PREFERRED_HEIGHT;
        let negotiated = device.set_format(&fmt).map_err(CameraError::Negotiation)?;

        // Drivers may silently substitute a format they prefer.
        let format = PixelFormat::from_fourcc(negotiated.fourcc)
            .ok_or_else(|| CameraError::UnsupportedFormat(negotiated.fourcc.to_string()))?;

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(CameraError::Stream)?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            ?format,
            "camera streaming"
        );

        Ok(Self {
            stream,
            device_path: device_path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            format,
        })
    }

    /// Dequeue the next frame, converted to RGB.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self.stream.next().map_err(CameraError::Stream)?;
        let image = self.format.to_rgb(buf, self.width, self.height)?;
        Ok(Frame::new(image, meta.sequence))
    }

    /// Video capture nodes known to the V4L2 subsystem, by index.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(|n| n.index());

        nodes
            .into_iter()
            .filter_map(|node| {
                let path = node.path().to_string_lossy().into_owned();
                let caps = Device::with_path(&path).and_then(|d| d.query_caps()).ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_preference() {
        let offered = [FourCC::new(b"MJPG"), FourCC::new(b"GREY"), FourCC::new(b"YUYV")];
        assert_eq!(PixelFormat::choose(&offered), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::choose(&[FourCC::new(b"GREY")]), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::choose(&[FourCC::new(b"MJPG")]), None);
    }

    #[test]
    fn test_fourcc_round_trip() {
        for format in PixelFormat::PREFERENCE {
            assert_eq!(PixelFormat::from_fourcc(format.fourcc()), Some(format));
        }
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/rollcall-no-such-camera"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
