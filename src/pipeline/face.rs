use std::cmp::Ordering;
use std::sync::Arc;
use tracing::warn;

use crate::errors::{FaceIdError, FaceIdResult};
use crate::pipeline::extractor::{EmbeddingExtractor, SharedExtractor};
#[cfg(feature = "facial-recognition")]
use crate::pipeline::extractor::Deadline;
use crate::utils::config::ModelSettings;

#[cfg(feature = "facial-recognition")]
use anyhow::{Context, Result};
#[cfg(feature = "facial-recognition")]
use image::DynamicImage;
#[cfg(feature = "facial-recognition")]
use ndarray::Array4;
#[cfg(feature = "facial-recognition")]
use ort::session::Session;
#[cfg(feature = "facial-recognition")]
use ort::value::Value;
#[cfg(feature = "facial-recognition")]
use parking_lot::Mutex;
#[cfg(feature = "facial-recognition")]
use std::path::Path;
#[cfg(feature = "facial-recognition")]
use tracing::{debug, info};

// Model URLs
#[cfg(feature = "facial-recognition")]
const SCRFD_MODEL_URL_HF: &str = "https://huggingface.co/ykk648/face_lib/resolve/main/face_detect/scrfd_onnx/scrfd_500m_bnkps.onnx";
#[cfg(feature = "facial-recognition")]
const SCRFD_MODEL_URL_GH: &str = "https://github.com/deepinsight/insightface/releases/download/v0.7/scrfd_500m_bnkps.onnx";
#[cfg(feature = "facial-recognition")]
const ARCFACE_MODEL_URL_PRIMARY: &str = "https://huggingface.co/maze/faceX/resolve/e010b5098c3685fd00b22dd2aec6f37320e3d850/w600k_r50.onnx";

#[cfg(feature = "facial-recognition")]
const SCRFD_MODEL_FILE: &str = "scrfd_500m_bnkps.onnx";
#[cfg(feature = "facial-recognition")]
const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

pub const SCRFD_INPUT: u32 = 640;
pub const ARCFACE_INPUT: u32 = 112;
#[cfg(feature = "facial-recognition")]
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const MIN_FACE_PX: f32 = 8.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBbox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBbox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// Which face to embed when the detector reports more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaceSelection {
    /// First face after NMS, i.e. highest detector confidence; equal scores keep scan order.
    #[default]
    HighestConfidence,
    /// Largest bounding box; equal areas fall back to confidence order.
    LargestArea,
}

impl FaceSelection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confidence" | "first" | "highest_confidence" => Some(FaceSelection::HighestConfidence),
            "largest" | "area" | "largest_area" => Some(FaceSelection::LargestArea),
            _ => None,
        }
    }
}

/// `faces` must be in detector order (as returned by [`nms_wrapper`]).
pub fn select_face(faces: &[FaceBbox], policy: FaceSelection) -> Option<&FaceBbox> {
    match policy {
        FaceSelection::HighestConfidence => faces.first(),
        FaceSelection::LargestArea => faces
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.area()
                    .partial_cmp(&b.area())
                    .unwrap_or(Ordering::Equal)
                    .then(ib.cmp(ia))
            })
            .map(|(_, face)| face),
    }
}

/// Decode one SCRFD stride into boxes in original image coordinates.
///
/// `scores` holds one value per (grid cell, anchor), `boxes` four ltrb
/// distances per entry in stride units. `scale` maps original pixels to the
/// 640x640 letterboxed input.
#[allow(clippy::too_many_arguments)]
pub fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: u32,
    scale: f32,
    img_w: f32,
    img_h: f32,
    threshold: f32,
    out: &mut Vec<FaceBbox>,
) {
    let side = (SCRFD_INPUT / stride) as usize;
    let grid = side * side;
    if grid == 0 || scores.is_empty() || scores.len() % grid != 0 || boxes.len() < scores.len() * 4 {
        warn!(
            "SCRFD stride {}: unexpected tensor sizes (scores={}, boxes={}, grid={})",
            stride,
            scores.len(),
            boxes.len(),
            grid
        );
        return;
    }
    let anchors = scores.len() / grid;
    let s = stride as f32;
    for (idx, &conf) in scores.iter().enumerate() {
        if conf < threshold {
            continue;
        }
        let cell = idx / anchors;
        let cx = (cell % side) as f32 * s;
        let cy = (cell / side) as f32 * s;
        let b = idx * 4;
        let x1 = ((cx - boxes[b] * s) / scale).clamp(0.0, img_w);
        let y1 = ((cy - boxes[b + 1] * s) / scale).clamp(0.0, img_h);
        let x2 = ((cx + boxes[b + 2] * s) / scale).clamp(0.0, img_w);
        let y2 = ((cy + boxes[b + 3] * s) / scale).clamp(0.0, img_h);
        if x2 - x1 < MIN_FACE_PX || y2 - y1 < MIN_FACE_PX {
            continue;
        }
        out.push(FaceBbox { x1, y1, x2, y2, confidence: conf });
    }
}

// NMS helpers
pub fn nms_wrapper(boxes: &[FaceBbox], iou_threshold: f32) -> Vec<usize> {
    if boxes.is_empty() {
        return vec![];
    }
    let mut indices: Vec<usize> = (0..boxes.len()).collect();
    // Stable sort: equal confidences keep scan order.
    indices.sort_by(|&a, &b| {
        boxes[b]
            .confidence
            .partial_cmp(&boxes[a].confidence)
            .unwrap_or(Ordering::Equal)
    });
    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for i in 0..indices.len() {
        let ia = indices[i];
        if suppressed[ia] {
            continue;
        }
        keep.push(ia);
        for &ib in indices.iter().skip(i + 1) {
            if !suppressed[ib] && calculate_iou(&boxes[ia], &boxes[ib]) > iou_threshold {
                suppressed[ib] = true;
            }
        }
    }
    keep
}

fn calculate_iou(a: &FaceBbox, b: &FaceBbox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

#[cfg(feature = "facial-recognition")]
pub struct FaceProcessor {
    settings: ModelSettings,
    scrfd_session: Option<Mutex<Session>>,
    arcface_session: Option<Mutex<Session>>,
}

#[cfg(feature = "facial-recognition")]
fn inference_err(e: impl std::fmt::Display) -> FaceIdError {
    FaceIdError::Inference(e.to_string())
}

#[cfg(feature = "facial-recognition")]
impl FaceProcessor {
    pub fn new(settings: ModelSettings) -> Self {
        Self {
            settings,
            scrfd_session: None,
            arcface_session: None,
        }
    }

    pub fn scrfd_loaded(&self) -> bool { self.scrfd_session.is_some() }
    pub fn arcface_loaded(&self) -> bool { self.arcface_session.is_some() }

    /// Blocking: may download model files. Call from a blocking thread.
    pub fn initialize(&mut self) -> FaceIdResult<()> {
        std::fs::create_dir_all(&self.settings.models_dir).map_err(|e| {
            FaceIdError::ModelInitialization(format!(
                "failed to create models directory {:?}: {}",
                self.settings.models_dir, e
            ))
        })?;

        if self.settings.auto_download {
            if let Err(e) = self.download_models() {
                warn!("Face model auto-download failed: {:#}", e);
            }
        } else {
            info!("Face model auto-download disabled.");
        }

        self.load_models()
            .map_err(|e| FaceIdError::ModelInitialization(format!("{:#}", e)))
    }

    fn download_models(&self) -> Result<()> {
        let scrfd_path = self.settings.models_dir.join(SCRFD_MODEL_FILE);
        let arcface_path = self.settings.models_dir.join(ARCFACE_MODEL_FILE);
        if scrfd_path.exists() && arcface_path.exists() {
            return Ok(());
        }
        let client = create_http_client()?;

        if !scrfd_path.exists() {
            info!("Downloading SCRFD face detection model...");
            if let Err(e) = download_file(&client, SCRFD_MODEL_URL_HF, &scrfd_path) {
                warn!("Failed to download from Hugging Face: {}. Trying GitHub...", e);
                download_file(&client, SCRFD_MODEL_URL_GH, &scrfd_path)?;
            }
        }

        if !arcface_path.exists() {
            info!("Downloading ArcFace recognition model ({})...", ARCFACE_MODEL_FILE);
            download_file(&client, ARCFACE_MODEL_URL_PRIMARY, &arcface_path)?;
        }

        Ok(())
    }

    fn load_models(&mut self) -> Result<()> {
        let scrfd_path = self.settings.models_dir.join(SCRFD_MODEL_FILE);
        let arcface_path = self.settings.models_dir.join(ARCFACE_MODEL_FILE);

        if !scrfd_path.exists() || !arcface_path.exists() {
            anyhow::bail!(
                "Face models missing; expected SCRFD at {:?} and ArcFace at {:?}",
                scrfd_path, arcface_path
            );
        }

        let scrfd = Session::builder()?
            .commit_from_file(&scrfd_path)
            .context("Failed to create SCRFD session")?;
        let arc = Session::builder()?
            .commit_from_file(&arcface_path)
            .context("Failed to create ArcFace session")?;

        self.scrfd_session = Some(Mutex::new(scrfd));
        self.arcface_session = Some(Mutex::new(arc));
        info!("Face models loaded: SCRFD={:?} ArcFace={:?}", scrfd_path, arcface_path);
        Ok(())
    }

    /// Letterbox to 640x640 (top-left anchored), BGR, NCHW, normalised to about [-1, 1].
    fn preprocess_scrfd(&self, image: &DynamicImage) -> (Vec<i64>, Vec<f32>, f32) {
        let (ow, oh) = (image.width() as f32, image.height() as f32);
        let scale = SCRFD_INPUT as f32 / ow.max(oh);
        let nw = ((ow * scale) as u32).clamp(1, SCRFD_INPUT);
        let nh = ((oh * scale) as u32).clamp(1, SCRFD_INPUT);
        let resized = image
            .resize_exact(nw, nh, image::imageops::FilterType::Triangle)
            .to_rgb8();
        let side = SCRFD_INPUT as usize;
        let tensor = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let v = if (x as u32) < nw && (y as u32) < nh {
                let p = resized.get_pixel(x as u32, y as u32);
                // InsightFace detectors expect BGR
                let channel = match c { 0 => p[2], 1 => p[1], _ => p[0] };
                channel as f32
            } else {
                0.0
            };
            (v - 127.5) / 128.0
        });
        let shape = tensor.shape().iter().map(|&d| d as i64).collect();
        (shape, tensor.into_raw_vec(), scale)
    }

    fn preprocess_arcface(&self, face_crop: &DynamicImage) -> (Vec<i64>, Vec<f32>) {
        let side = ARCFACE_INPUT as usize;
        let rgb = face_crop
            .resize_exact(ARCFACE_INPUT, ARCFACE_INPUT, image::imageops::FilterType::Triangle)
            .to_rgb8();
        let tensor = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let p = rgb.get_pixel(x as u32, y as u32);
            (p[c] as f32 - 127.5) / 128.0
        });
        let shape = tensor.shape().iter().map(|&d| d as i64).collect();
        (shape, tensor.into_raw_vec())
    }

    /// Faces after NMS, highest confidence first. With a deadline, gives up
    /// if it passed while waiting for the session.
    pub fn detect_faces(&self, image: &DynamicImage, deadline: Option<&Deadline>) -> FaceIdResult<Vec<FaceBbox>> {
        let mut session = self
            .scrfd_session
            .as_ref()
            .ok_or(FaceIdError::ModelNotReady)?
            .lock();
        if let Some(deadline) = deadline {
            deadline.check()?;
        }
        let (shape, data, scale) = self.preprocess_scrfd(image);
        let img_w = image.width() as f32;
        let img_h = image.height() as f32;

        let input_name = session.inputs[0].name.clone();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let input = Value::from_array((shape, data)).map_err(inference_err)?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .map_err(inference_err)?;

        let mut raw: Vec<FaceBbox> = Vec::new();
        for (i, stride) in SCRFD_STRIDES.iter().enumerate() {
            let score_key = format!("score_{}", stride);
            let bbox_key = format!("bbox_{}", stride);
            // Exports without named outputs keep the order
            // [score_8, score_16, score_32, bbox_8, bbox_16, bbox_32, kps_*].
            let score_val = outputs
                .get(score_key.as_str())
                .or_else(|| output_names.get(i).and_then(|n| outputs.get(n.as_str())));
            let bbox_val = outputs
                .get(bbox_key.as_str())
                .or_else(|| output_names.get(i + SCRFD_STRIDES.len()).and_then(|n| outputs.get(n.as_str())));
            let (Some(sv), Some(bv)) = (score_val, bbox_val) else {
                warn!("SCRFD: no outputs found for stride {}", stride);
                continue;
            };
            let (Ok((_, scores)), Ok((_, boxes))) = (sv.try_extract_tensor::<f32>(), bv.try_extract_tensor::<f32>()) else {
                warn!("SCRFD: failed to extract tensors for stride {}", stride);
                continue;
            };
            decode_stride(
                scores,
                boxes,
                *stride,
                scale,
                img_w,
                img_h,
                self.settings.detection_threshold,
                &mut raw,
            );
        }

        let keep = nms_wrapper(&raw, self.settings.nms_iou_threshold);
        let faces: Vec<FaceBbox> = keep.into_iter().map(|idx| raw[idx].clone()).collect();
        debug!(
            "SCRFD: {} candidates above {:.2}, {} after NMS",
            raw.len(),
            self.settings.detection_threshold,
            faces.len()
        );
        Ok(faces)
    }

    /// L2-normalised ArcFace embedding of a face crop.
    pub fn recognize_face(&self, face_crop: &DynamicImage, deadline: Option<&Deadline>) -> FaceIdResult<Vec<f32>> {
        let mut session = self
            .arcface_session
            .as_ref()
            .ok_or(FaceIdError::ModelNotReady)?
            .lock();
        if let Some(deadline) = deadline {
            deadline.check()?;
        }
        let (shape, data) = self.preprocess_arcface(face_crop);

        let input_name = session.inputs[0].name.clone();
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| FaceIdError::Inference("ArcFace model has no outputs".into()))?;
        let input = Value::from_array((shape, data)).map_err(inference_err)?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .map_err(inference_err)?;
        let value = outputs
            .get(output_name.as_str())
            .ok_or_else(|| FaceIdError::Inference(format!("ArcFace output '{}' missing", output_name)))?;
        let (_, slice) = value.try_extract_tensor::<f32>().map_err(inference_err)?;
        if slice.is_empty() {
            return Err(FaceIdError::Inference("ArcFace produced an empty embedding".into()));
        }

        let mut v = slice.to_vec();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Err(FaceIdError::InvalidEmbedding("ArcFace embedding has zero norm".into()));
        }
        for x in &mut v {
            *x /= norm;
        }
        Ok(v)
    }

    pub fn extract_embedding(&self, image: &DynamicImage, deadline: Option<&Deadline>) -> FaceIdResult<Vec<f32>> {
        let faces = self.detect_faces(image, deadline)?;
        let face = select_face(&faces, self.settings.selection).ok_or(FaceIdError::NoFaceDetected)?;
        if faces.len() > 1 {
            debug!("{} faces detected, using {:?} policy -> {:?}", faces.len(), self.settings.selection, face);
        }

        let x1 = face.x1.max(0.0) as u32;
        let y1 = face.y1.max(0.0) as u32;
        let x2 = (face.x2.min(image.width() as f32)) as u32;
        let y2 = (face.y2.min(image.height() as f32)) as u32;
        if x2 <= x1 || y2 <= y1 {
            return Err(FaceIdError::NoFaceDetected);
        }
        let crop = image.crop_imm(x1, y1, x2 - x1, y2 - y1);
        self.recognize_face(&crop, deadline)
    }
}

#[cfg(feature = "facial-recognition")]
impl EmbeddingExtractor for FaceProcessor {
    fn extract(&self, image: &DynamicImage) -> FaceIdResult<Vec<f32>> {
        self.extract_embedding(image, None)
    }

    fn extract_within(&self, image: &DynamicImage, deadline: &Deadline) -> FaceIdResult<Vec<f32>> {
        deadline.check()?;
        self.extract_embedding(image, Some(deadline))
    }

    fn name(&self) -> &str {
        "scrfd+arcface"
    }

    fn is_ready(&self) -> bool {
        self.scrfd_loaded() && self.arcface_loaded()
    }
}

#[cfg(feature = "facial-recognition")]
fn create_http_client() -> Result<reqwest::blocking::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(token) = std::env::var("HF_TOKEN") {
        if !token.is_empty() {
            info!("Using Hugging Face token for model download.");
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
    }
    reqwest::blocking::Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(600))
        .build()
        .context("Failed to create HTTP client")
}

#[cfg(feature = "facial-recognition")]
fn download_file(client: &reqwest::blocking::Client, url: &str, path: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("Failed to download model from {}", url))?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }
    let bytes = response.bytes().context("Failed to read response body")?;

    // ONNX files should be at least a few KB
    if bytes.len() < 1024 {
        anyhow::bail!("Downloaded file is suspiciously small ({} bytes), may be corrupted", bytes.len());
    }

    // Write beside the target and rename so a half-written file is never loaded.
    let partial = path.with_extension("onnx.part");
    std::fs::write(&partial, &bytes).with_context(|| format!("Failed to write file: {:?}", partial))?;
    std::fs::rename(&partial, path).with_context(|| format!("Failed to move {:?} into place", partial))?;

    info!("Downloaded model to {:?} ({} bytes)", path, bytes.len());
    Ok(())
}

static SHARED_PROCESSOR: SharedExtractor = SharedExtractor::new();

/// The process-wide face model, loaded on first use.
#[cfg(feature = "facial-recognition")]
pub fn shared_processor(settings: &ModelSettings) -> FaceIdResult<Arc<dyn EmbeddingExtractor>> {
    SHARED_PROCESSOR.get_or_try_init(|| {
        let mut processor = FaceProcessor::new(settings.clone());
        processor.initialize()?;
        Ok(Arc::new(processor) as Arc<dyn EmbeddingExtractor>)
    })
}

#[cfg(not(feature = "facial-recognition"))]
pub fn shared_processor(_settings: &ModelSettings) -> FaceIdResult<Arc<dyn EmbeddingExtractor>> {
    SHARED_PROCESSOR.get_or_try_init(|| {
        Err(FaceIdError::ModelInitialization(
            "built without the facial-recognition feature".into(),
        ))
    })
}
