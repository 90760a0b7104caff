use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::matcher::MatchStrategy;

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Integer crop rectangle `(x, y, w, h)` grown by `margin` (fraction of the
    /// box size on each side) and clamped to a `frame_w` x `frame_h` frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn crop_rect(&self, margin: f32, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let dx = self.width * margin;
        let dy = self.height * margin;
        let x0 = (self.x - dx).max(0.0).floor() as u32;
        let y0 = (self.y - dy).max(0.0).floor() as u32;
        let x1 = ((self.x + self.width + dx).ceil().max(0.0) as u32).min(frame_w);
        let y1 = ((self.y + self.height + dy).ceil().max(0.0) as u32).min(frame_h);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentityError {
    #[error("empty enrollment label")]
    EmptyLabel,
    #[error("enrollment label {0:?} has an empty first name")]
    EmptyFirstName(String),
}

/// An enrolled person, derived from a raw label such as `Alice_Doe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// The raw label; unique across the gallery.
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
}

impl Identity {
    /// Label separator between first and last name.
    pub const SEPARATOR: char = '_';

    /// Parse a label, splitting on the first separator. Everything after it
    /// is the last name; a label without separator has an empty last name.
    pub fn from_label(label: &str) -> Result<Self, IdentityError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(IdentityError::EmptyLabel);
        }

        let (first, last) = match label.split_once(Self::SEPARATOR) {
            Some((first, last)) => (first, last),
            None => (label, ""),
        };
        if first.is_empty() {
            return Err(IdentityError::EmptyFirstName(label.to_string()));
        }

        Ok(Self {
            full_name: label.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.last_name.is_empty() {
            f.write_str(&self.first_name)
        } else {
            write!(f, "{} {}", self.first_name, self.last_name)
        }
    }
}

/// One face found in a frame, resolved against the gallery.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// `None` when no enrolled identity is within the match threshold.
    pub identity: Option<Identity>,
    /// Distance of the best candidate considered (infinite for an empty gallery).
    pub distance: f32,
    /// Which pass produced the final decision.
    pub strategy: MatchStrategy,
}

impl Detection {
    pub fn is_known(&self) -> bool {
        self.identity.is_some()
    }

    /// Display label: the identity's name or "unknown".
    pub fn label(&self) -> String {
        match &self.identity {
            Some(identity) => identity.to_string(),
            None => "unknown".to_string(),
        }
    }
}

/// Presence status for one identity on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Late => "late",
            Self::Absent => "absent",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Self::Present),
            "late" => Ok(Self::Late),
            "absent" => Ok(Self::Absent),
            other => Err(format!("unknown attendance status: {other:?}")),
        }
    }
}

/// A persisted attendance row, unique on (first_name, last_name, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub first_name: String,
    pub last_name: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub lateness_minutes: u32,
}

/// Aggregate counts over all persisted rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceStats {
    /// Distinct identities with at least one row.
    pub total: u64,
    #[serde(rename = "presents")]
    pub present: u64,
    #[serde(rename = "retards")]
    pub late: u64,
    #[serde(rename = "absents")]
    pub absent: u64,
}
