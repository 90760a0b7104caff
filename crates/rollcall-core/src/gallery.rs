//! The embedding store: one reference embedding per enrolled identity.
//!
//! Built once at startup and never mutated afterwards. Entries keep their
//! insertion order, which is also the nearest-neighbor tie-break order.

use crate::backend::FaceEmbedder;
use crate::enrollment::ReferenceImage;
use crate::types::{Embedding, Identity};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GalleryError {
    #[error("identity {0:?} is already enrolled")]
    DuplicateIdentity(String),
    #[error("embedding has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("empty embedding")]
    EmptyEmbedding,
}

#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub identity: Identity,
    pub embedding: Embedding,
}

/// Closest gallery entry to a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub index: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll every reference image through `embedder`.
    ///
    /// Images with an invalid label, no detectable face, a backend failure
    /// or a conflicting embedding are skipped with a warning. When an image
    /// holds several faces the strongest one is used.
    pub fn enroll<E: FaceEmbedder + ?Sized>(embedder: &mut E, references: Vec<ReferenceImage>) -> Self {
        let mut gallery = Self::new();

        for reference in references {
            let identity = match Identity::from_label(&reference.label) {
                Ok(identity) => identity,
                Err(e) => {
                    tracing::warn!(label = %reference.label, error = %e, "skipping reference image");
                    continue;
                }
            };

            let faces = match embedder.detect_faces(&reference.image) {
                Ok(faces) => faces,
                Err(e) => {
                    tracing::warn!(label = %reference.label, error = %e, "face extraction failed; skipping");
                    continue;
                }
            };

            let Some((_, embedding)) = faces.into_iter().next() else {
                tracing::warn!(label = %reference.label, "no face detected in reference image; skipping");
                continue;
            };

            if let Err(e) = gallery.insert(identity, embedding) {
                tracing::warn!(label = %reference.label, error = %e, "skipping reference image");
            }
        }

        tracing::info!(
            count = gallery.len(),
            names = ?gallery.identities().map(|i| i.full_name.as_str()).collect::<Vec<_>>(),
            "gallery enrolled"
        );
        gallery
    }

    /// Add one identity. All embeddings must share the first entry's length.
    pub fn insert(&mut self, identity: Identity, embedding: Embedding) -> Result<(), GalleryError> {
        if embedding.values.is_empty() {
            return Err(GalleryError::EmptyEmbedding);
        }
        if let Some(expected) = self.dim() {
            if embedding.dim() != expected {
                return Err(GalleryError::DimensionMismatch {
                    expected,
                    actual: embedding.dim(),
                });
            }
        }
        if self.entries.iter().any(|e| e.identity.full_name == identity.full_name) {
            return Err(GalleryError::DuplicateIdentity(identity.full_name));
        }

        self.entries.push(GalleryEntry { identity, embedding });
        Ok(())
    }

    /// Embedding length shared by every entry, if any are enrolled.
    pub fn dim(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.dim())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&GalleryEntry> {
        self.entries.get(index)
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.entries.iter().map(|e| &e.identity)
    }

    /// Nearest entry by Euclidean distance; ties keep the earliest entry.
    ///
    /// Returns `None` for an empty gallery or a probe of the wrong length.
    pub fn nearest(&self, probe: &Embedding) -> Option<Nearest> {
        if self.dim() != Some(probe.dim()) {
            if !self.is_empty() {
                tracing::debug!(probe = probe.dim(), gallery = ?self.dim(), "probe dimension mismatch");
            }
            return None;
        }

        let mut best: Option<Nearest> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            let distance = probe.euclidean_distance(&entry.embedding);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Nearest { index, distance });
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::types::BoundingBox;
    use image::RgbImage;

    fn id(label: &str) -> Identity {
        Identity::from_label(label).unwrap()
    }

    /// Reads the embedding from the reference image's first pixel;
    /// a black pixel means "no face".
    struct PixelEmbedder;

    impl FaceEmbedder for PixelEmbedder {
        fn detect_faces(&mut self, frame: &RgbImage) -> Result<Vec<(BoundingBox, Embedding)>, BackendError> {
            let p = frame.get_pixel(0, 0);
            if p.0 == [0, 0, 0] {
                return Ok(Vec::new());
            }
            let bbox = BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: 1.0 };
            Ok(vec![(bbox, Embedding::new(p.0.iter().map(|&v| v as f32).collect()))])
        }
    }

    fn reference(label: &str, rgb: [u8; 3]) -> ReferenceImage {
        ReferenceImage {
            label: label.to_string(),
            image: RgbImage::from_pixel(2, 2, image::Rgb(rgb)),
        }
    }

    #[test]
    fn test_enroll_skips_faceless_and_invalid_images() {
        let gallery = Gallery::enroll(
            &mut PixelEmbedder,
            vec![
                reference("Alice_Doe", [1, 0, 0]),
                reference("Nobody_Here", [0, 0, 0]),
                reference("_Doe", [2, 0, 0]),
                reference("Bob_Smith", [0, 1, 0]),
                reference("Alice_Doe", [0, 0, 9]),
            ],
        );
        let names: Vec<&str> = gallery.identities().map(|i| i.full_name.as_str()).collect();
        assert_eq!(names, vec!["Alice_Doe", "Bob_Smith"]);
        assert_eq!(gallery.dim(), Some(3));
    }

    #[test]
    fn test_insert_rejects_dimension_mismatch() {
        let mut gallery = Gallery::new();
        gallery.insert(id("Alice_Doe"), Embedding::new(vec![0.0, 1.0])).unwrap();
        assert_eq!(
            gallery.insert(id("Bob_Smith"), Embedding::new(vec![0.0, 1.0, 2.0])),
            Err(GalleryError::DimensionMismatch { expected: 2, actual: 3 })
        );
        assert_eq!(
            gallery.insert(id("Carol_King"), Embedding::new(vec![])),
            Err(GalleryError::EmptyEmbedding)
        );
    }

    #[test]
    fn test_nearest_picks_minimum_distance() {
        let mut gallery = Gallery::new();
        gallery.insert(id("Alice_Doe"), Embedding::new(vec![0.0, 0.0])).unwrap();
        gallery.insert(id("Bob_Smith"), Embedding::new(vec![1.0, 0.0])).unwrap();

        let nearest = gallery.nearest(&Embedding::new(vec![0.9, 0.0])).unwrap();
        assert_eq!(nearest.index, 1);
        assert!((nearest.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_tie_keeps_first_enrolled() {
        let mut gallery = Gallery::new();
        gallery.insert(id("Alice_Doe"), Embedding::new(vec![-1.0, 0.0])).unwrap();
        gallery.insert(id("Bob_Smith"), Embedding::new(vec![1.0, 0.0])).unwrap();

        let nearest = gallery.nearest(&Embedding::new(vec![0.0, 0.0])).unwrap();
        assert_eq!(nearest.index, 0);
    }

    #[test]
    fn test_nearest_empty_or_mismatched() {
        let mut gallery = Gallery::new();
        assert!(gallery.nearest(&Embedding::new(vec![0.0])).is_none());
        gallery.insert(id("Alice_Doe"), Embedding::new(vec![0.0, 0.0])).unwrap();
        assert!(gallery.nearest(&Embedding::new(vec![0.0])).is_none());
    }
}
