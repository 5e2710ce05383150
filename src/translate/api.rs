use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::common::{build_instructions, BlockContext, Pass};
use super::TranslationProvider;
use crate::config::ApiProviderConfig;
use crate::error::{Jp2SubsError, Result};

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    source_lang: &'a str,
    target_lang: &'a str,
    lines: &'a [String],
    prompt: String,
    glossary: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    drafts: Option<&'a [String]>,
    pass: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    translations: Vec<String>,
}

/// Generic JSON endpoint: `{lines, ...}` in, `{translations}` out.
pub struct ApiProvider {
    client: Client,
    config: ApiProviderConfig,
}

impl ApiProvider {
    /// Per-call deadlines come from the engine, not the HTTP client.
    pub fn new(config: ApiProviderConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn request<'a>(&self, lines: &'a [String], context: &'a BlockContext) -> ApiRequest<'a> {
        ApiRequest {
            source_lang: &context.source_lang,
            target_lang: &context.target_lang,
            lines,
            prompt: build_instructions(context, lines.len()),
            glossary: context.glossary.to_map(),
            drafts: context.drafts.as_deref(),
            pass: match context.pass {
                Pass::Single => "single",
                Pass::Draft => "draft",
                Pass::PostEdit => "postedit",
            },
        }
    }
}

#[async_trait]
impl TranslationProvider for ApiProvider {
    async fn translate_block(&self, lines: &[String], context: &BlockContext) -> Result<Vec<String>> {
        let payload = self.request(lines, context);
        debug!("Sending {} lines to {}", lines.len(), self.config.url);

        let mut request = self.client.post(&self.config.url).json(&payload);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Jp2SubsError::from_provider_status(status.as_u16(), error_text));
        }

        let body: ApiResponse = response.json().await?;
        Ok(body.translations)
    }
}
