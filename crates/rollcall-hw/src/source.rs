//! The capture collaborator the pipeline pulls frames from.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;

/// A frame source that holds an exclusive resource while acquired.
pub trait CaptureSource: Send {
    /// Take the underlying device. Calling it while acquired is a no-op.
    fn acquire(&mut self) -> Result<(), CameraError>;

    /// Next frame, or `None` when the source is not acquired.
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Give the device back. Never fails; safe to call when not acquired.
    fn release(&mut self);

    fn is_acquired(&self) -> bool;
}

/// A V4L2 camera opened on `acquire` and closed on `release`.
pub struct CameraSource {
    device_path: String,
    warmup_frames: usize,
    camera: Option<Camera>,
}

impl CameraSource {
    pub fn new(device_path: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device_path: device_path.into(),
            warmup_frames,
            camera: None,
        }
    }
}

impl CaptureSource for CameraSource {
    fn acquire(&mut self) -> Result<(), CameraError> {
        if self.camera.is_some() {
            return Ok(());
        }

        let mut camera = Camera::open(&self.device_path)?;

        // Let auto-exposure settle before frames are used.
        if self.warmup_frames > 0 {
            tracing::debug!(count = self.warmup_frames, "discarding warmup frames");
            for _ in 0..self.warmup_frames {
                let _ = camera.next_frame();
            }
        }

        self.camera = Some(camera);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.camera.as_mut() {
            Some(camera) => camera.next_frame().map(Some),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        if self.camera.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }

    fn is_acquired(&self) -> bool {
        self.camera.is_some()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unacquired_source_yields_nothing() {
        let mut source = CameraSource::new("/dev/rollcall-test-missing", 0);
        assert!(!source.is_acquired());
        assert!(source.next_frame().unwrap().is_none());
        source.release();
        assert!(!source.is_acquired());
    }

    #[test]
    fn test_acquire_missing_device_fails() {
        let mut source = CameraSource::new("/dev/rollcall-test-missing", 0);
        assert!(matches!(source.acquire(), Err(CameraError::DeviceNotFound(_))));
        assert!(!source.is_acquired());
    }
}
