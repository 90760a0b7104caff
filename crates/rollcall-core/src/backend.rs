//! Face detector collaborators.
//!
//! The matcher only sees two traits: [`FaceEmbedder`], the primary
//! whole-frame detector that returns boxes with their embeddings, and
//! [`RegionDetector`], the independent re-detection used by the fallback
//! pass. [`OnnxBackend`] implements both on top of SCRFD + ArcFace.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::{DynamicImage, RgbImage};
use thiserror::Error;

/// Margin added around a fallback region before re-detecting inside it.
const REGION_MARGIN: f32 = 0.25;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Primary detector: every face in the frame with its embedding.
pub trait FaceEmbedder {
    fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<(BoundingBox, Embedding)>, BackendError>;
}

/// Fallback detector: candidate face regions, embedded one at a time.
pub trait RegionDetector {
    fn detect_regions(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, BackendError>;

    /// Embed the face inside `region`, or `None` if no face is found there.
    fn embed_region(
        &mut self,
        frame: &RgbImage,
        region: &BoundingBox,
    ) -> Result<Option<Embedding>, BackendError>;
}

/// A backend providing both detection passes.
pub trait FaceBackend: FaceEmbedder + RegionDetector {}

impl<T: FaceEmbedder + RegionDetector> FaceBackend for T {}

/// SCRFD + ArcFace backend.
///
/// The fallback pass runs the detector on a histogram-equalized copy of the
/// frame with a relaxed confidence, then re-detects inside each widened
/// region before embedding it.
pub struct OnnxBackend {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    detection_confidence: f32,
    fallback_confidence: f32,
}

impl OnnxBackend {
    pub fn load(
        scrfd_path: &str,
        arcface_path: &str,
        detection_confidence: f32,
        fallback_confidence: f32,
    ) -> Result<Self, BackendError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self {
            detector,
            recognizer,
            detection_confidence,
            fallback_confidence,
        })
    }
}

impl FaceEmbedder for OnnxBackend {
    fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<(BoundingBox, Embedding)>, BackendError> {
        let faces = self.detector.detect(frame, self.detection_confidence)?;
        let mut embedded = Vec::with_capacity(faces.len());
        for face in faces {
            let embedding = self.recognizer.embed(frame, &face)?;
            embedded.push((face, embedding));
        }
        Ok(embedded)
    }
}

impl RegionDetector for OnnxBackend {
    fn detect_regions(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, BackendError> {
        let enhanced = equalized(frame);
        Ok(self.detector.detect(&enhanced, self.fallback_confidence)?)
    }

    fn embed_region(
        &mut self,
        frame: &RgbImage,
        region: &BoundingBox,
    ) -> Result<Option<Embedding>, BackendError> {
        let Some((x, y, w, h)) = region.crop_rect(REGION_MARGIN, frame.width(), frame.height()) else {
            return Ok(None);
        };
        let roi = image::imageops::crop_imm(frame, x, y, w, h).to_image();

        let faces = self.detector.detect(&roi, self.fallback_confidence)?;
        let Some(face) = faces.first() else {
            tracing::trace!(x, y, w, h, "no face inside fallback region");
            return Ok(None);
        };
        Ok(Some(self.recognizer.embed(&roi, face)?))
    }
}

/// Grayscale histogram equalization, replicated back to three channels.
fn equalized(frame: &RgbImage) -> RgbImage {
    let gray = image::imageops::grayscale(frame);
    let gray = imageproc::contrast::equalize_histogram(&gray);
    DynamicImage::ImageLuma8(gray).to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equalized_keeps_dimensions_and_gray_channels() {
        let mut frame = RgbImage::new(8, 4);
        for (x, _, pixel) in frame.enumerate_pixels_mut() {
            *pixel = image::Rgb([100 + x as u8, 100, 100]);
        }
        let out = equalized(&frame);
        assert_eq!(out.dimensions(), (8, 4));
        for pixel in out.pixels() {
            assert_eq!(pixel[0], pixel[1]);
            assert_eq!(pixel[1], pixel[2]);
        }
    }
}
