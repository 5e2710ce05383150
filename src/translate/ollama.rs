use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::common::{build_instructions, render_numbered_input, BlockContext};
use super::TranslationProvider;
use crate::config::OllamaProviderConfig;
use crate::error::{Jp2SubsError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    lines: Vec<String>,
}

/// Local Ollama server; asks for `{"lines": [...]}` in JSON mode.
pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn build_prompt(lines: &[String], context: &BlockContext) -> String {
        format!(
            "{}\nEach input line is prefixed with its 0-based index and a tab.\n\
             Return a JSON object {{\"lines\": [...]}} with exactly {} strings, one per input line, in order.\n\
             INPUT:\n{}",
            build_instructions(context, lines.len()).trim(),
            lines.len(),
            render_numbered_input(lines, context)
        )
    }

    /// Check that the server answers and has the configured model pulled.
    pub async fn check_availability(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.config.endpoint.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Jp2SubsError::Provider(format!("Ollama returned {}", response.status())));
        }
        let tags: serde_json::Value = response.json().await?;
        let found = tags["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .any(|name| name == self.config.model || name.starts_with(&format!("{}:", self.config.model)))
            })
            .unwrap_or(false);
        if found {
            Ok(())
        } else {
            Err(Jp2SubsError::Provider(format!(
                "model '{}' is not available; run `ollama pull {}`",
                self.config.model, self.config.model
            )))
        }
    }
}

fn parse_block_result(raw: &str) -> Result<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Jp2SubsError::Provider("empty response from Ollama".into()));
    }
    if let Ok(result) = serde_json::from_str::<BlockResult>(raw) {
        return Ok(result.lines.into_iter().map(|l| l.trim().to_string()).collect());
    }
    let lines: Vec<String> = serde_json::from_str(raw)
        .map_err(|e| Jp2SubsError::Provider(format!("unexpected Ollama response '{}': {}", raw, e)))?;
    Ok(lines.into_iter().map(|l| l.trim().to_string()).collect())
}

#[async_trait]
impl TranslationProvider for OllamaProvider {
    async fn translate_block(&self, lines: &[String], context: &BlockContext) -> Result<Vec<String>> {
        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: Self::build_prompt(lines, context),
            stream: false,
            format: "json".to_string(),
        };
        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        debug!("Sending translation request to: {}", url);

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Jp2SubsError::from_provider_status(status.as_u16(), error_text));
        }

        let body: GenerateResponse = response.json().await?;
        debug!("Raw Ollama response: {}", body.response);
        parse_block_result(&body.response)
    }
}
