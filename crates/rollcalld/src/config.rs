use rollcall_core::SchedulePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default Euclidean match distance for L2-normalized ArcFace embeddings.
///
/// For unit vectors `d = sqrt(2 - 2 * cos)`, so 1.1 accepts pairs with
/// cosine similarity above about 0.40. Same-person ArcFace pairs typically
/// score 0.5 to 0.8 (d of 1.0 down to 0.63).
pub const ARCFACE_MATCH_THRESHOLD: f32 = 1.1;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory of labeled reference images (`First_Last.jpg`).
    pub enrollment_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Euclidean distance below which a face matches an enrolled identity
    /// (default: [`ARCFACE_MATCH_THRESHOLD`]).
    pub match_threshold: f32,
    /// Minimum detector score for the primary pass.
    pub detection_confidence: f32,
    /// Minimum detector score for the fallback region pass.
    pub fallback_confidence: f32,
    /// How the morning/afternoon schedule table is chosen.
    pub schedule_policy: SchedulePolicy,
    /// Pause between processed frames, in milliseconds.
    pub frame_interval_ms: u64,
    /// Number of warmup frames to discard after opening the camera.
    pub warmup_frames: usize,
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            enrollment_dir: data_dir.join("faces"),
            model_dir: rollcall_core::default_model_dir(),
            db_path: data_dir.join("attendance.db"),
            match_threshold: ARCFACE_MATCH_THRESHOLD,
            detection_confidence: 0.5,
            fallback_confidence: 0.3,
            schedule_policy: SchedulePolicy::Observed,
            frame_interval_ms: 0,
            warmup_frames: 4,
        }
    }
}

impl Config {
    /// Load the config file (`$ROLLCALL_CONFIG`, else
    /// `$XDG_CONFIG_HOME/rollcall/config.toml` if it exists) and apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(default_config_path);

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_ENROLLMENT_DIR") {
            self.enrollment_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        self.match_threshold = env_parse("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.detection_confidence = env_parse("ROLLCALL_DETECTION_CONFIDENCE", self.detection_confidence);
        self.fallback_confidence = env_parse("ROLLCALL_FALLBACK_CONFIDENCE", self.fallback_confidence);
        self.frame_interval_ms = env_parse("ROLLCALL_FRAME_INTERVAL_MS", self.frame_interval_ms);
        self.warmup_frames = env_parse("ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
        match std::env::var("ROLLCALL_SCHEDULE_POLICY").as_deref() {
            Ok("observed") => self.schedule_policy = SchedulePolicy::Observed,
            Ok("evaluation") => self.schedule_policy = SchedulePolicy::Evaluation,
            Ok(other) => tracing::warn!(value = other, "ignoring unknown ROLLCALL_SCHEDULE_POLICY"),
            Err(_) => {}
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("rollcall/config.toml")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
