use crate::core::catalog::TaskKey;
use crate::core::error::GenerationError;
use crate::core::io::Storage;
use crate::core::media::ImageData;
use crate::core::state::{CharacterAttributes, ReferenceSheet};
use crate::services::generation::ImageGenerator;
use async_trait::async_trait;
use log::{debug, warn};
use std::path::Path;
use std::sync::Arc;

/// Keeps raw part images on disk, keyed by the attribute fingerprint.
///
/// Reference sheets are never cached. Only successful generations are
/// written, so a failed part is always retried against the service.
pub struct CachedGenerator {
    inner: Arc<dyn ImageGenerator>,
    storage: Arc<dyn Storage>,
    root: String,
}

impl CachedGenerator {
    pub fn new(inner: Arc<dyn ImageGenerator>, storage: Arc<dyn Storage>, root: String) -> Self {
        Self {
            inner,
            storage,
            root,
        }
    }

    fn entry_path(&self, attributes: &CharacterAttributes, key: TaskKey) -> String {
        Path::new(&self.root)
            .join(attributes.fingerprint())
            .join(format!("{}.img", key))
            .to_string_lossy()
            .to_string()
    }

    async fn lookup(&self, path: &str) -> Option<ImageData> {
        match self.storage.exists(path).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!("Failed to check cache entry {}: {}", path, e);
                return None;
            }
        }

        let usable = match self.storage.read(path).await {
            Ok(bytes) => {
                let image = ImageData::sniff(bytes);
                image.mime_type().starts_with("image/").then_some(image)
            }
            Err(e) => {
                warn!("Failed to read cache entry {}: {}", path, e);
                None
            }
        };

        if usable.is_none() {
            warn!("Discarding corrupt cache entry {}", path);
            if let Err(e) = self.storage.delete(path).await {
                warn!("Failed to delete cache entry {}: {}", path, e);
            }
        }
        usable
    }
}

#[async_trait]
impl ImageGenerator for CachedGenerator {
    async fn generate_reference(
        &self,
        attributes: &CharacterAttributes,
    ) -> Result<ReferenceSheet, GenerationError> {
        self.inner.generate_reference(attributes).await
    }

    async fn generate_part(
        &self,
        attributes: &CharacterAttributes,
        key: TaskKey,
        reference: &ReferenceSheet,
    ) -> Result<ImageData, GenerationError> {
        let path = self.entry_path(attributes, key);

        if let Some(image) = self.lookup(&path).await {
            debug!("Cache hit for {}", key);
            return Ok(image);
        }

        let image = self.inner.generate_part(attributes, key, reference).await?;
        if let Err(e) = self.storage.write(&path, image.bytes()).await {
            warn!("Failed to write cache entry {}: {}", path, e);
        }
        Ok(image)
    }
}
