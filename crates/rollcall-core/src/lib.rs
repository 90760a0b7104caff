//! rollcall-core: Face matching and attendance rules.
//!
//! Holds the enrolled gallery, the nearest-neighbor matcher with its
//! fallback re-detection pass, the on-time/late/absent schedule, and the
//! ONNX face backend (SCRFD detection + ArcFace embeddings).

pub mod backend;
pub mod clock;
pub mod detector;
pub mod enrollment;
pub mod gallery;
pub mod matcher;
pub mod recognizer;
pub mod schedule;
pub mod types;

pub use backend::{BackendError, FaceBackend, FaceEmbedder, OnnxBackend, RegionDetector};
pub use clock::{Clock, SystemClock};
pub use enrollment::{EnrollmentError, EnrollmentSource, ImageDirectory, ReferenceImage};
pub use gallery::{Gallery, GalleryError, Nearest};
pub use matcher::{FaceMatcher, MatchStrategy, DEFAULT_MATCH_THRESHOLD};
pub use schedule::{classify, Classification, SchedulePolicy, SessionHalf};
pub use types::{
    AttendanceRecord, AttendanceStats, AttendanceStatus, BoundingBox, Detection, Embedding,
    Identity, IdentityError,
};

/// Default directory holding the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}
