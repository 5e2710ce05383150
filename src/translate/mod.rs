// Block translation: providers behind one trait, driven by the block engine.
//
// - Echo: returns the input unchanged (tests and dry runs)
// - Local: llama.cpp style binary, indexed plain-text output
// - Api: JSON HTTP endpoint
// - Ollama: local Ollama server with JSON-format generation

pub mod common;
pub mod engine;
pub mod glossary;
pub mod local;
pub mod api;
pub mod ollama;

use async_trait::async_trait;
use std::sync::Arc;

pub use common::{BlockContext, Pass};
pub use engine::{BlockEngine, BlockState, DraftLayer, EngineOptions, LanguageReport};
pub use glossary::Glossary;
use crate::config::{ProviderKind, TranslateConfig};
use crate::error::{Jp2SubsError, Result};

/// A backend that turns one block of lines into the same number of translated lines.
///
/// Implementations may return a different count; the engine reconciles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate_block(&self, lines: &[String], context: &BlockContext) -> Result<Vec<String>>;
}

/// Identity provider. During post-edit it returns the drafts.
#[derive(Debug, Default, Clone)]
pub struct EchoProvider;

#[async_trait]
impl TranslationProvider for EchoProvider {
    async fn translate_block(&self, lines: &[String], context: &BlockContext) -> Result<Vec<String>> {
        match (context.pass, &context.drafts) {
            (Pass::PostEdit, Some(drafts)) => Ok(drafts.clone()),
            _ => Ok(lines.to_vec()),
        }
    }
}

/// Factory for translation providers
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create(kind: ProviderKind, config: &TranslateConfig) -> Result<Arc<dyn TranslationProvider>> {
        let provider: Arc<dyn TranslationProvider> = match kind {
            ProviderKind::Echo => Arc::new(EchoProvider),
            ProviderKind::Local => Arc::new(local::LocalProvider::new(config.local.clone())),
            ProviderKind::Api => {
                if config.api.url.trim().is_empty() {
                    return Err(Jp2SubsError::Config(
                        "translate.api.url (or JP2SUBS_API_URL) is required for the api provider".into(),
                    ));
                }
                Arc::new(api::ApiProvider::new(config.api.clone())?)
            }
            ProviderKind::Ollama => Arc::new(ollama::OllamaProvider::new(config.ollama.clone())?),
        };
        Ok(provider)
    }

    /// Draft (or single-pass) provider and, in draft+post-edit mode, the post-edit provider.
    pub fn create_for_mode(
        config: &TranslateConfig,
    ) -> Result<(Arc<dyn TranslationProvider>, Option<Arc<dyn TranslationProvider>>)> {
        let draft = Self::create(config.provider, config)?;
        let postedit = match config.mode {
            crate::config::TranslationMode::Single => None,
            crate::config::TranslationMode::DraftPostEdit => {
                let kind = config.postedit_provider.unwrap_or(config.provider);
                Some(Self::create(kind, config)?)
            }
        };
        Ok((draft, postedit))
    }
}
