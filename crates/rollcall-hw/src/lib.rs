//! rollcall-hw: Camera capture for the attendance pipeline.
//!
//! Provides V4L2 camera access delivering RGB frames, behind the
//! [`CaptureSource`] trait the pipeline pulls frames from.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{CameraSource, CaptureSource};
