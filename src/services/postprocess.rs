use crate::core::error::ProcessingError;
use crate::core::media::ImageData;
use crate::utils::chroma;
use async_trait::async_trait;

#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn remove_background(&self, raw: &ImageData) -> Result<ImageData, ProcessingError>;
}

/// Runs the chroma key engine off the async scheduler and returns a PNG.
#[derive(Debug, Default)]
pub struct ChromaKeyRemover;

impl ChromaKeyRemover {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BackgroundRemover for ChromaKeyRemover {
    async fn remove_background(&self, raw: &ImageData) -> Result<ImageData, ProcessingError> {
        let raw = raw.clone();
        tokio::task::spawn_blocking(move || {
            let image = chroma::remove_background(&raw)?;
            ImageData::from_rgba(&image)
        })
        .await
        .map_err(|e| ProcessingError::Worker(e.to_string()))?
    }
}
