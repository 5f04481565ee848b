use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::pipeline::face::FaceSelection;
use crate::pipeline::similarity::DEFAULT_MATCH_THRESHOLD;

#[derive(Clone, Debug)]
pub struct ModelSettings {
    pub models_dir: PathBuf,
    pub auto_download: bool,
    pub detection_threshold: f32,
    pub nms_iou_threshold: f32,
    pub selection: FaceSelection,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data: PathBuf,
    pub db_pool_size: u32,
    pub match_threshold: f64,
    pub extract_timeout: Duration,
    pub model: ModelSettings,
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "1" | "true" | "TRUE" | "yes" => Some(true),
        "0" | "false" | "FALSE" | "no" => Some(false),
        _ => None,
    }
}

/// Cosine scores live in [-1, 1]; anything else would grant or deny everything.
fn parse_match_threshold(raw: Option<String>) -> f64 {
    let Some(raw) = raw else { return DEFAULT_MATCH_THRESHOLD };
    match raw.trim().parse::<f64>() {
        Ok(t) if t.is_finite() && (-1.0..=1.0).contains(&t) => t,
        _ => {
            warn!(
                "Ignoring FACEGATE_MATCH_THRESHOLD={:?}: expected a number in [-1, 1], using {}",
                raw, DEFAULT_MATCH_THRESHOLD
            );
            DEFAULT_MATCH_THRESHOLD
        }
    }
}

fn parse_selection(raw: Option<String>) -> FaceSelection {
    let Some(raw) = raw else { return FaceSelection::default() };
    FaceSelection::parse(&raw).unwrap_or_else(|| {
        let fallback = FaceSelection::default();
        warn!("Unknown FACEGATE_FACE_SELECTION={:?}, using {:?}", raw, fallback);
        fallback
    })
}

impl Config {
    pub fn from_env() -> Self {
        let host = env::var("FACEGATE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("FACEGATE_PORT")
            .or_else(|_| env::var("PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8000);
        let data = PathBuf::from(env::var("FACEGATE_DATA").unwrap_or_else(|_| "./facegate-data".to_string()));
        let db_pool_size = env::var("FACEGATE_DB_POOL_SIZE").ok().and_then(|v| v.parse().ok()).filter(|n| *n > 0).unwrap_or(8);
        let match_threshold = parse_match_threshold(env::var("FACEGATE_MATCH_THRESHOLD").ok());
        let timeout_ms = env::var("FACEGATE_EXTRACT_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(10_000u64);
        let models_dir = env::var("FACEGATE_MODELS_DIR").map(PathBuf::from).unwrap_or_else(|_| data.join("models"));
        let auto_download = env::var("FACEGATE_AUTO_DOWNLOAD").ok().and_then(|v| parse_bool(&v)).unwrap_or(true);
        let detection_threshold = env::var("FACEGATE_DETECTION_THRESHOLD").ok().and_then(|v| v.parse().ok()).unwrap_or(0.5);
        let nms_iou_threshold = env::var("FACEGATE_NMS_IOU_THRESHOLD").ok().and_then(|v| v.parse().ok()).unwrap_or(0.4);
        let selection = parse_selection(env::var("FACEGATE_FACE_SELECTION").ok());
        Self {
            host,
            port,
            data,
            db_pool_size,
            match_threshold,
            extract_timeout: Duration::from_millis(timeout_ms),
            model: ModelSettings {
                models_dir,
                auto_download,
                detection_threshold,
                nms_iou_threshold,
                selection,
            },
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data.join("db").join("facegate.db")
    }
}
