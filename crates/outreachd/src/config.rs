use outreach_core::embedder::DEFAULT_MAX_IMAGE_BYTES;
use outreach_core::enroll::RECOMMENDED_MIN_SAMPLES;
use outreach_core::DEFAULT_MATCH_THRESHOLD;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which message bus the service registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root directory for archived enrollment photos.
    pub photo_dir: PathBuf,
    /// Face descriptor ONNX model.
    pub model_path: PathBuf,
    /// Maximum Euclidean distance for a positive identification.
    pub match_threshold: f32,
    /// Upper bound on one embedder call; a timed-out sample is rejected.
    pub detect_timeout: Duration,
    /// Upload size limit in bytes.
    pub max_image_bytes: usize,
    /// Model face score below which an image counts as faceless.
    pub min_face_score: f32,
    /// Samples needed before an identity is reported as usable.
    pub min_usable_samples: usize,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `OUTREACH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("outreach");

        Self {
            db_path: var("OUTREACH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("gallery.db")),
            photo_dir: var("OUTREACH_PHOTO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("photos")),
            model_path: var("OUTREACH_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("models/face_descriptor.onnx")),
            match_threshold: parse(&var, "OUTREACH_MATCH_THRESHOLD")
                .filter(|t: &f32| t.is_finite() && *t >= 0.0)
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            detect_timeout: Duration::from_millis(
                parse(&var, "OUTREACH_DETECT_TIMEOUT_MS").unwrap_or(5000),
            ),
            max_image_bytes: parse(&var, "OUTREACH_MAX_IMAGE_BYTES").unwrap_or(DEFAULT_MAX_IMAGE_BYTES),
            min_face_score: parse(&var, "OUTREACH_MIN_FACE_SCORE").unwrap_or(0.5),
            min_usable_samples: parse(&var, "OUTREACH_MIN_USABLE_SAMPLES")
                .unwrap_or(RECOMMENDED_MIN_SAMPLES),
            bus: match var("OUTREACH_BUS").as_deref() {
                Some("system") => BusKind::System,
                _ => BusKind::Session,
            },
        }
    }
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}
