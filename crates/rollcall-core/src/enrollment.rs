//! Enrollment collaborator: labeled reference images loaded at startup.

use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Accepted reference image extensions (lower-case).
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("cannot read enrollment directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One labeled reference image, e.g. `Alice_Doe` from `Alice_Doe.jpg`.
pub struct ReferenceImage {
    pub label: String,
    pub image: RgbImage,
}

/// Source of labeled reference images.
pub trait EnrollmentSource {
    fn list_reference_images(&self) -> Result<Vec<ReferenceImage>, EnrollmentError>;
}

/// Reference images stored as files in one directory, labeled by file stem.
///
/// Files are visited in sorted name order so gallery order is stable
/// across runs.
pub struct ImageDirectory {
    path: PathBuf,
}

impl ImageDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn is_reference_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl EnrollmentSource for ImageDirectory {
    fn list_reference_images(&self) -> Result<Vec<ReferenceImage>, EnrollmentError> {
        if !self.path.is_dir() {
            tracing::warn!(path = %self.path.display(), "enrollment directory not found; no one enrolled");
            return Ok(Vec::new());
        }

        let read_dir = |source| EnrollmentError::ReadDir {
            path: self.path.clone(),
            source,
        };
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.path)
            .map_err(read_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_reference_image(path))
            .collect();
        paths.sort();

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(label) = path.file_stem().and_then(|s| s.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping file with non UTF-8 name");
                continue;
            };
            match image::open(&path) {
                Ok(decoded) => images.push(ReferenceImage {
                    label: label.to_string(),
                    image: decoded.to_rgb8(),
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable reference image");
                }
            }
        }

        tracing::debug!(path = %self.path.display(), count = images.len(), "reference images loaded");
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = ImageDirectory::new(dir.path().join("nope"));
        assert!(source.list_reference_images().unwrap().is_empty());
    }

    #[test]
    fn test_lists_images_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        img.save(dir.path().join("Bob_Smith.png")).unwrap();
        img.save(dir.path().join("Alice_Doe.PNG")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        std::fs::write(dir.path().join("Broken_File.jpg"), "not a jpeg").unwrap();

        let images = ImageDirectory::new(dir.path()).list_reference_images().unwrap();
        let labels: Vec<&str> = images.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Alice_Doe", "Bob_Smith"]);
        assert_eq!(images[0].image.dimensions(), (4, 4));
    }
}
