#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use facegate_backend::api::routes;
use facegate_backend::db::store::IdentityStore;
use facegate_backend::errors::{FaceIdError, FaceIdResult};
use facegate_backend::pipeline::engine::VerificationEngine;
use facegate_backend::pipeline::extractor::{Deadline, EmbeddingExtractor};
use facegate_backend::stats::Stats;
use facegate_backend::AppState;
use image::DynamicImage;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Deterministic stand-in for the ONNX pipeline: the colour of pixel (0,0)
/// becomes the embedding, and a black pixel means "no face".
pub struct ColorExtractor {
    pub dim: usize,
}

impl ColorExtractor {
    pub fn new() -> Self {
        Self { dim: 4 }
    }

    pub fn with_dim(dim: usize) -> Self {
        assert!(dim >= 3);
        Self { dim }
    }
}

impl EmbeddingExtractor for ColorExtractor {
    fn extract(&self, image: &DynamicImage) -> FaceIdResult<Vec<f32>> {
        let rgb = image.to_rgb8();
        let p = rgb.get_pixel(0, 0).0;
        if p == [0, 0, 0] {
            return Err(FaceIdError::NoFaceDetected);
        }
        let mut v = vec![p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0];
        v.resize(self.dim, 0.5);
        Ok(v)
    }

    fn name(&self) -> &str {
        "color-fake"
    }
}

/// Wraps another extractor and stalls every call.
pub struct SlowExtractor {
    pub inner: ColorExtractor,
    pub delay: Duration,
}

impl EmbeddingExtractor for SlowExtractor {
    fn extract(&self, image: &DynamicImage) -> FaceIdResult<Vec<f32>> {
        std::thread::sleep(self.delay);
        self.inner.extract(image)
    }

    fn name(&self) -> &str {
        "slow-fake"
    }
}

/// Calls queue on one lock, the way requests queue on an ONNX session, and
/// `finished` counts the inferences that actually ran.
pub struct QueuedExtractor {
    pub inner: ColorExtractor,
    pub work: Duration,
    pub session: parking_lot::Mutex<()>,
    pub finished: Arc<AtomicUsize>,
}

impl QueuedExtractor {
    pub fn new(work: Duration) -> Self {
        Self {
            inner: ColorExtractor::new(),
            work,
            session: parking_lot::Mutex::new(()),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl EmbeddingExtractor for QueuedExtractor {
    fn extract(&self, image: &DynamicImage) -> FaceIdResult<Vec<f32>> {
        self.extract_within(image, &Deadline::after(Duration::from_secs(3600)))
    }

    fn extract_within(&self, image: &DynamicImage, deadline: &Deadline) -> FaceIdResult<Vec<f32>> {
        deadline.check()?;
        let _session = self.session.lock();
        deadline.check()?;
        std::thread::sleep(self.work);
        self.finished.fetch_add(1, Ordering::SeqCst);
        self.inner.extract(image)
    }

    fn name(&self) -> &str {
        "queued-fake"
    }
}

/// Extractor whose model never finished loading.
pub struct UnreadyExtractor;

impl EmbeddingExtractor for UnreadyExtractor {
    fn extract(&self, _image: &DynamicImage) -> FaceIdResult<Vec<f32>> {
        Err(FaceIdError::ModelNotReady)
    }

    fn name(&self) -> &str {
        "unready-fake"
    }

    fn is_ready(&self) -> bool {
        false
    }
}

/// A small solid-colour PNG.
pub fn png(r: u8, g: u8, b: u8) -> Bytes {
    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([r, g, b]));
    let mut buf = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageOutputFormat::Png)
        .unwrap();
    Bytes::from(buf.into_inner())
}

pub fn test_db_path(tmp: &TempDir) -> std::path::PathBuf {
    tmp.path().join("db").join("facegate.db")
}

/// Create an identity store in a temporary directory.
pub fn setup_test_store() -> (TempDir, IdentityStore) {
    let tmp = TempDir::new().unwrap();
    let store = IdentityStore::open(test_db_path(&tmp), 4).unwrap();
    (tmp, store)
}

/// Run raw SQL against the store's database from outside the pool.
pub fn sabotage_db(tmp: &TempDir, sql: &str) {
    let conn = rusqlite::Connection::open(test_db_path(tmp)).unwrap();
    conn.execute_batch(sql).unwrap();
}

pub fn engine_with(extractor: impl EmbeddingExtractor + 'static, store: IdentityStore) -> VerificationEngine {
    VerificationEngine::new(Arc::new(extractor), store, Arc::new(Stats::new()))
}

/// Serve `engine` on an ephemeral port.
pub async fn spawn_server(engine: VerificationEngine) -> TestClient {
    let state = Arc::new(AppState::new(engine));
    let app = routes::router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = TcpListener::bind(&addr).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    TestClient::new(port)
}

/// Helper to make HTTP requests to test server
pub struct TestClient {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl TestClient {
    pub fn new(port: u16) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::new(),
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(&format!("{}{}", self.base_url, path)).send().await
    }

    pub async fn delete(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.delete(&format!("{}{}", self.base_url, path)).send().await
    }

    pub async fn post_form(&self, path: &str, form: reqwest::multipart::Form) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(&format!("{}{}", self.base_url, path))
            .multipart(form)
            .send()
            .await
    }
}

pub fn image_part(data: &Bytes, file_name: &str) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(data.to_vec())
        .file_name(file_name.to_string())
        .mime_str("image/png")
        .unwrap()
}

pub fn register_form(username: &str, image1: &Bytes, image2: &Bytes) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("username", username.to_string())
        .part("image1", image_part(image1, "image1.png"))
        .part("image2", image_part(image2, "image2.png"))
}

pub fn verify_form(username: &str, live: &Bytes) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("username", username.to_string())
        .part("live_image", image_part(live, "live.png"))
}
