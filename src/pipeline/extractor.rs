use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use once_cell::sync::OnceCell;

use crate::errors::{FaceIdError, FaceIdResult};

/// Turns one decoded image into one identity embedding.
///
/// Implementations are called from blocking worker threads and may be shared
/// across requests, hence `Send + Sync` and `&self`.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract(&self, image: &DynamicImage) -> FaceIdResult<Vec<f32>>;

    /// Like `extract`, but gives up with `ExtractionTimeout` once `deadline`
    /// has passed. Implementations that wait on shared resources should
    /// re-check after each wait.
    fn extract_within(&self, image: &DynamicImage, deadline: &Deadline) -> FaceIdResult<Vec<f32>> {
        deadline.check()?;
        self.extract(image)
    }

    fn name(&self) -> &str;

    fn is_ready(&self) -> bool {
        true
    }
}

/// Point in time after which an extraction result is no longer wanted.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self { at: Instant::now() + budget, budget }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn check(&self) -> FaceIdResult<()> {
        if self.expired() {
            return Err(FaceIdError::ExtractionTimeout {
                millis: self.budget.as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// Decode an uploaded payload into an RGB image.
pub fn decode_image(bytes: &[u8]) -> FaceIdResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(FaceIdError::ImageDecode("empty image payload".into()));
    }
    let img = image::load_from_memory(bytes).map_err(|e| FaceIdError::ImageDecode(e.to_string()))?;
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Process-wide holder for an expensive extractor.
///
/// The first caller runs `init`; concurrent first callers block until it
/// finishes and then reuse the same instance. A failed init leaves the cell
/// empty so a later call can try again.
pub struct SharedExtractor {
    cell: OnceCell<Arc<dyn EmbeddingExtractor>>,
}

impl SharedExtractor {
    pub const fn new() -> Self {
        Self { cell: OnceCell::new() }
    }

    pub fn get_or_try_init<F>(&self, init: F) -> FaceIdResult<Arc<dyn EmbeddingExtractor>>
    where
        F: FnOnce() -> FaceIdResult<Arc<dyn EmbeddingExtractor>>,
    {
        self.cell.get_or_try_init(init).map(Arc::clone)
    }

    pub fn get(&self) -> Option<Arc<dyn EmbeddingExtractor>> {
        self.cell.get().cloned()
    }
}

impl Default for SharedExtractor {
    fn default() -> Self {
        Self::new()
    }
}
