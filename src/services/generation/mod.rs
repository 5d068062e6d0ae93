use crate::core::catalog::TaskKey;
use crate::core::config::Config;
use crate::core::error::GenerationError;
use crate::core::io::Storage;
use crate::core::media::ImageData;
use crate::core::state::{CharacterAttributes, ReferenceSheet};
use crate::services::cache::CachedGenerator;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

pub mod gemini;
pub mod prompts;

/// The external image generation service.
///
/// Implementations must eventually return for every call; the scheduler waits
/// on each one.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_reference(
        &self,
        attributes: &CharacterAttributes,
    ) -> Result<ReferenceSheet, GenerationError>;

    async fn generate_part(
        &self,
        attributes: &CharacterAttributes,
        key: TaskKey,
        reference: &ReferenceSheet,
    ) -> Result<ImageData, GenerationError>;
}

pub fn create_generator(
    config: &Config,
    storage: Arc<dyn Storage>,
) -> Result<Arc<dyn ImageGenerator>> {
    info!(
        "Initializing image generator for provider: {}",
        config.generation.provider
    );
    let generator: Arc<dyn ImageGenerator> = match config.generation.provider.as_str() {
        "gemini" => {
            let gemini_config = config
                .generation
                .gemini
                .clone()
                .context("Gemini config missing")?;
            Arc::new(gemini::GeminiImageClient::new(
                gemini_config,
                &config.generation,
            )?)
        }
        _ => {
            return Err(anyhow!(
                "Unknown image generation provider: {}",
                config.generation.provider
            ))
        }
    };

    if config.cache.enabled {
        info!("Part cache enabled at {}", config.cache_folder());
        Ok(Arc::new(CachedGenerator::new(
            generator,
            storage,
            config.cache_folder(),
        )))
    } else {
        Ok(generator)
    }
}
