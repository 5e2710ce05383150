use async_trait::async_trait;
use tracing::debug;

use super::common::{build_text_prompt, parse_indexed_output, BlockContext};
use super::TranslationProvider;
use crate::config::LocalProviderConfig;
use crate::error::Result;
use crate::media::ToolCommand;

/// llama.cpp style completion binary, one process per block.
pub struct LocalProvider {
    config: LocalProviderConfig,
}

impl LocalProvider {
    pub fn new(config: LocalProviderConfig) -> Self {
        Self { config }
    }

    fn command(&self, prompt: String) -> ToolCommand {
        ToolCommand::new(&self.config.binary_path, "llama.cpp translation")
            .arg("-m")
            .arg(&self.config.model_path)
            .args(self.config.extra_args.iter().cloned())
            .arg("-p")
            .arg(prompt)
    }
}

#[async_trait]
impl TranslationProvider for LocalProvider {
    async fn translate_block(&self, lines: &[String], context: &BlockContext) -> Result<Vec<String>> {
        let prompt = build_text_prompt(lines, context, self.config.chat_template);
        let stdout = self.command(prompt).execute_capture().await?;
        let parsed = parse_indexed_output(&stdout)?;
        debug!("llama.cpp returned {} lines for {} inputs", parsed.len(), lines.len());
        Ok(parsed)
    }
}
