//! Nearest-neighbor face matcher with a fallback re-detection pass.
//!
//! A face is accepted when its nearest gallery entry is strictly closer than
//! the threshold. Otherwise the fallback detector re-scans the whole frame
//! and the single best candidate region decides the label.

use crate::backend::{BackendError, FaceBackend};
use crate::gallery::{Gallery, Nearest};
use crate::types::{BoundingBox, Detection, Embedding};
use image::RgbImage;
use std::sync::Arc;

/// Default Euclidean distance below which a probe matches.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.4;

/// Which detection pass produces the probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// The embedding model's own whole-frame detector.
    Primary,
    /// The independent region detector, each region re-embedded.
    Fallback,
}

pub struct FaceMatcher {
    gallery: Arc<Gallery>,
    threshold: f32,
}

impl FaceMatcher {
    pub fn new(gallery: Arc<Gallery>, threshold: f32) -> Self {
        Self { gallery, threshold }
    }

    /// Label every face in `frame`. Faces are matched independently and
    /// several may resolve to the same identity.
    pub fn identify<B: FaceBackend + ?Sized>(
        &self,
        backend: &mut B,
        frame: &RgbImage,
    ) -> Result<Vec<Detection>, BackendError> {
        let faces = self.probes(MatchStrategy::Primary, backend, frame)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        // Fallback candidates depend only on the frame; scan at most once.
        let mut fallback: Option<Option<Nearest>> = None;
        let mut detections = Vec::with_capacity(faces.len());

        for (bbox, embedding) in &faces {
            let primary = self.gallery.nearest(embedding);
            let (nearest, strategy) = match primary {
                Some(n) if self.accepts(n) => (Some(n), MatchStrategy::Primary),
                _ if self.gallery.is_empty() => (None, MatchStrategy::Primary),
                _ => {
                    let best = match fallback {
                        Some(best) => best,
                        None => {
                            let candidates = self.probes(MatchStrategy::Fallback, backend, frame)?;
                            let best = self.best_of(&candidates);
                            fallback = Some(best);
                            best
                        }
                    };
                    (best, MatchStrategy::Fallback)
                }
            };

            let identity = nearest
                .filter(|n| self.accepts(*n))
                .and_then(|n| self.gallery.get(n.index))
                .map(|entry| entry.identity.clone());
            let distance = match (strategy, nearest, primary) {
                (MatchStrategy::Fallback, Some(n), _) => n.distance,
                (_, _, Some(p)) => p.distance,
                _ => f32::INFINITY,
            };

            tracing::trace!(
                label = identity.as_ref().map(|i| i.full_name.as_str()).unwrap_or("unknown"),
                distance,
                ?strategy,
                "face matched"
            );
            detections.push(Detection {
                bbox: *bbox,
                identity,
                distance,
                strategy,
            });
        }

        Ok(detections)
    }

    fn accepts(&self, nearest: Nearest) -> bool {
        nearest.distance < self.threshold
    }

    /// Boxes and embeddings produced by one detection pass.
    fn probes<B: FaceBackend + ?Sized>(
        &self,
        strategy: MatchStrategy,
        backend: &mut B,
        frame: &RgbImage,
    ) -> Result<Vec<(BoundingBox, Embedding)>, BackendError> {
        match strategy {
            MatchStrategy::Primary => backend.detect_faces(frame),
            MatchStrategy::Fallback => {
                let regions = backend.detect_regions(frame)?;
                let mut probes = Vec::with_capacity(regions.len());
                for region in regions {
                    if let Some(embedding) = backend.embed_region(frame, &region)? {
                        probes.push((region, embedding));
                    }
                }
                tracing::debug!(candidates = probes.len(), "fallback pass");
                Ok(probes)
            }
        }
    }

    /// Closest match over all probes; ties keep the earliest probe.
    fn best_of(&self, probes: &[(BoundingBox, Embedding)]) -> Option<Nearest> {
        let mut best: Option<Nearest> = None;
        for (_, embedding) in probes {
            if let Some(n) = self.gallery.nearest(embedding) {
                if best.map_or(true, |b| n.distance < b.distance) {
                    best = Some(n);
                }
            }
        }
        best
    }
}
