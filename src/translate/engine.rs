//! Block engine: chunk segments, dispatch blocks to a provider with a bounded
//! worker pool, reconcile line counts and write results back onto the record.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::common::{BlockContext, Pass};
use super::glossary::Glossary;
use super::TranslationProvider;
use crate::cancel::CancelToken;
use crate::config::{SourceField, TranslateConfig};
use crate::error::{Jp2SubsError, Result};
use crate::master::MasterRecord;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub source_lang: String,
    pub source_field: SourceField,
    pub block_size: usize,
    pub max_concurrent_blocks: usize,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub call_timeout: Duration,
    /// Re-dispatch blocks that are already fully translated
    pub force: bool,
}

impl EngineOptions {
    pub fn from_config(config: &TranslateConfig) -> Self {
        Self {
            source_lang: config.source_lang.clone(),
            source_field: config.source_field,
            block_size: config.block_size.max(1),
            max_concurrent_blocks: config.max_concurrent_blocks.max(1),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            call_timeout: Duration::from_secs(config.call_timeout_secs.max(1)),
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&TranslateConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockState {
    Pending,
    Chunked,
    ProviderCalled,
    Reconciled,
    Done,
    Failed(String),
}

/// Contiguous run of segments sent to the provider in one call.
#[derive(Debug, Clone)]
pub struct Block {
    pub index: usize,
    pub segment_ids: Vec<u32>,
    pub lines: Vec<String>,
}

/// Scratch output of the draft pass, keyed by segment id. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct DraftLayer {
    pub lang: String,
    pub drafts: BTreeMap<u32, String>,
}

impl DraftLayer {
    fn for_block(&self, block: &Block) -> Option<Vec<String>> {
        block
            .segment_ids
            .iter()
            .map(|id| self.drafts.get(id).cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LanguageReport {
    pub lang: String,
    pub blocks_total: usize,
    /// Blocks already complete and not dispatched
    pub blocks_skipped: usize,
    pub blocks_done: usize,
    pub blocks_failed: usize,
    pub block_states: Vec<BlockState>,
    pub failed_segment_ids: Vec<u32>,
    /// Segments whose block was never attempted because of cancellation
    pub cancelled_segment_ids: Vec<u32>,
}

impl LanguageReport {
    pub fn is_complete(&self) -> bool {
        self.failed_segment_ids.is_empty() && self.cancelled_segment_ids.is_empty()
    }

    pub fn untranslated_segment_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .failed_segment_ids
            .iter()
            .chain(self.cancelled_segment_ids.iter())
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

pub struct BlockEngine {
    provider: Arc<dyn TranslationProvider>,
    postedit: Option<Arc<dyn TranslationProvider>>,
    glossary: Arc<Glossary>,
    options: EngineOptions,
    cancel: CancelToken,
}

impl BlockEngine {
    pub fn new(provider: Arc<dyn TranslationProvider>, options: EngineOptions) -> Self {
        Self {
            provider,
            postedit: None,
            glossary: Arc::new(Glossary::default()),
            options,
            cancel: CancelToken::new(),
        }
    }

    /// Enables draft+post-edit: `provider` drafts, `postedit` refines.
    pub fn with_postedit(mut self, postedit: Option<Arc<dyn TranslationProvider>>) -> Self {
        self.postedit = postedit;
        self
    }

    pub fn with_glossary(mut self, glossary: Arc<Glossary>) -> Self {
        self.glossary = glossary;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Partition every segment into contiguous blocks of at most `block_size`.
    pub fn chunk(&self, record: &MasterRecord) -> Vec<Block> {
        record
            .segments
            .chunks(self.options.block_size)
            .enumerate()
            .map(|(index, segments)| Block {
                index,
                segment_ids: segments.iter().map(|s| s.id).collect(),
                lines: segments
                    .iter()
                    .map(|s| match self.options.source_field {
                        SourceField::Raw => s.ja_raw.clone(),
                        SourceField::Romaji => s.romaji.clone().unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect()
    }

    fn needs_dispatch(&self, record: &MasterRecord, block: &Block, lang: &str) -> bool {
        self.options.force
            || record
                .segments
                .iter()
                .filter(|s| block.segment_ids.contains(&s.id))
                .any(|s| !s.translations.contains_key(lang))
    }

    fn check_sources(&self, record: &MasterRecord, blocks: &[Block]) -> Result<()> {
        if self.options.source_field != SourceField::Romaji {
            return Ok(());
        }
        for block in blocks {
            for id in &block.segment_ids {
                let missing = record
                    .segments
                    .iter()
                    .find(|s| s.id == *id)
                    .map(|s| s.romaji.is_none())
                    .unwrap_or(true);
                if missing {
                    return Err(Jp2SubsError::validation(
                        Some(*id),
                        "romaji is the translation source but the segment has no romaji",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Translate one language, calling `checkpoint` after each block written back.
    ///
    /// Block failures are reported, not returned; only invalid input or a
    /// failing checkpoint is an error.
    pub async fn translate_language<F>(
        &self,
        record: &mut MasterRecord,
        lang: &str,
        mut checkpoint: F,
    ) -> Result<LanguageReport>
    where
        F: FnMut(&MasterRecord) -> Result<()>,
    {
        let all_blocks = self.chunk(record);
        let mut report = LanguageReport {
            lang: lang.to_string(),
            blocks_total: all_blocks.len(),
            block_states: vec![BlockState::Pending; all_blocks.len()],
            ..Default::default()
        };

        let mut pending = Vec::new();
        for block in all_blocks {
            if self.needs_dispatch(record, &block, lang) {
                report.block_states[block.index] = BlockState::Chunked;
                pending.push(block);
            } else {
                report.block_states[block.index] = BlockState::Done;
                report.blocks_skipped += 1;
            }
        }
        if pending.is_empty() {
            info!("Translation to {} already complete, skipped", lang);
            return Ok(report);
        }
        self.check_sources(record, &pending)?;

        info!(
            "Translating {} of {} blocks to {} ({} in flight max)",
            pending.len(),
            report.blocks_total,
            lang,
            self.options.max_concurrent_blocks
        );

        match &self.postedit {
            None => {
                self.final_pass(record, pending, lang, Pass::Single, None, report, &mut checkpoint)
                    .await
            }
            Some(_) => {
                let layer = self.draft_pass(&pending, lang, &mut report).await?;
                let ready: Vec<Block> = pending
                    .into_iter()
                    .filter(|b| layer.for_block(b).is_some())
                    .collect();
                debug!("{} blocks drafted for {}", ready.len(), lang);
                self.final_pass(record, ready, lang, Pass::PostEdit, Some(&layer), report, &mut checkpoint)
                    .await
            }
        }
    }

    /// Translate every language in order; each gets its own report.
    pub async fn translate_all<F>(
        &self,
        record: &mut MasterRecord,
        langs: &[String],
        mut checkpoint: F,
    ) -> Result<Vec<LanguageReport>>
    where
        F: FnMut(&MasterRecord) -> Result<()>,
    {
        let mut reports = Vec::with_capacity(langs.len());
        for lang in langs {
            reports.push(self.translate_language(record, lang, &mut checkpoint).await?);
        }
        Ok(reports)
    }

    /// First pass of draft+post-edit; successful blocks land in the scratch layer.
    async fn draft_pass(&self, blocks: &[Block], lang: &str, report: &mut LanguageReport) -> Result<DraftLayer> {
        let mut layer = DraftLayer {
            lang: lang.to_string(),
            drafts: BTreeMap::new(),
        };
        let mut results = std::pin::pin!(self.dispatch(blocks, lang, Pass::Draft, None));
        while let Some((pos, result)) = results.next().await {
            let block = &blocks[pos];
            match result {
                Ok(lines) => {
                    layer.drafts.extend(block.segment_ids.iter().copied().zip(lines));
                }
                Err(e) => self.record_failure(report, block, &e, "draft"),
            }
        }
        Ok(layer)
    }

    #[allow(clippy::too_many_arguments)]
    async fn final_pass<F>(
        &self,
        record: &mut MasterRecord,
        blocks: Vec<Block>,
        lang: &str,
        pass: Pass,
        layer: Option<&DraftLayer>,
        mut report: LanguageReport,
        checkpoint: &mut F,
    ) -> Result<LanguageReport>
    where
        F: FnMut(&MasterRecord) -> Result<()>,
    {
        let mut results = std::pin::pin!(self.dispatch(&blocks, lang, pass, layer));
        while let Some((pos, result)) = results.next().await {
            let block = &blocks[pos];
            report.block_states[block.index] = BlockState::ProviderCalled;
            match result {
                Ok(lines) => {
                    report.block_states[block.index] = BlockState::Reconciled;
                    for ((id, source), text) in block.segment_ids.iter().zip(&block.lines).zip(lines) {
                        let text = self.glossary.enforce(source, &text);
                        record.set_translation(*id, lang, text)?;
                    }
                    checkpoint(record)?;
                    report.block_states[block.index] = BlockState::Done;
                    report.blocks_done += 1;
                    debug!("Block {} ({}) written back", block.index + 1, lang);
                }
                Err(e) => self.record_failure(&mut report, block, &e, "translation"),
            }
        }

        report.failed_segment_ids.sort_unstable();
        report.cancelled_segment_ids.sort_unstable();
        if report.is_complete() {
            info!("Translation to {} complete ({} blocks)", lang, report.blocks_done);
        } else {
            warn!(
                "Translation to {} incomplete: {} blocks failed, segments without translation: {:?}",
                lang,
                report.blocks_failed,
                report.untranslated_segment_ids()
            );
        }
        Ok(report)
    }

    fn record_failure(&self, report: &mut LanguageReport, block: &Block, error: &Jp2SubsError, pass: &str) {
        if matches!(error, Jp2SubsError::Cancelled) {
            report.cancelled_segment_ids.extend(&block.segment_ids);
            report.block_states[block.index] = BlockState::Failed("cancelled".into());
        } else {
            warn!(
                "Block {} {} failed for {}: {} (segments {:?})",
                block.index + 1,
                pass,
                report.lang,
                error,
                block.segment_ids
            );
            report.failed_segment_ids.extend(&block.segment_ids);
            report.block_states[block.index] = BlockState::Failed(error.to_string());
        }
        report.blocks_failed += 1;
    }

    /// Bounded worker pool over `blocks`; yields `(position, result)` as calls finish.
    fn dispatch<'a>(
        &'a self,
        blocks: &'a [Block],
        lang: &'a str,
        pass: Pass,
        layer: Option<&'a DraftLayer>,
    ) -> impl futures::Stream<Item = (usize, Result<Vec<String>>)> + 'a {
        stream::iter(blocks.iter().enumerate())
            .map(move |(pos, block)| async move {
                let mut ctx = BlockContext::new(&self.options.source_lang, lang, self.glossary.clone()).with_pass(pass);
                if let Some(drafts) = layer.and_then(|l| l.for_block(block)) {
                    ctx = ctx.with_drafts(drafts);
                }
                (pos, self.run_block(block, ctx).await)
            })
            .buffer_unordered(self.options.max_concurrent_blocks)
    }

    /// One provider call plus a single reminder retry on a line-count mismatch.
    async fn run_block(&self, block: &Block, ctx: BlockContext) -> Result<Vec<String>> {
        let provider = match ctx.pass {
            Pass::PostEdit => self.postedit.as_ref().unwrap_or(&self.provider),
            Pass::Single | Pass::Draft => &self.provider,
        };
        let expected = block.lines.len();

        let output = self.call_with_backoff(provider.as_ref(), &block.lines, &ctx).await?;
        if output.len() == expected {
            return Ok(output);
        }
        warn!(
            "Block {} returned {} lines for {}; retrying with a line-count reminder",
            block.index + 1,
            output.len(),
            expected
        );

        let mut ctx = ctx;
        ctx.reminder = true;
        let output = self.call_with_backoff(provider.as_ref(), &block.lines, &ctx).await?;
        if output.len() == expected {
            Ok(output)
        } else {
            Err(Jp2SubsError::LineCountMismatch {
                expected,
                actual: output.len(),
            })
        }
    }

    /// Timeout each attempt; retry transport-class errors with exponential backoff.
    async fn call_with_backoff(
        &self,
        provider: &dyn TranslationProvider,
        lines: &[String],
        ctx: &BlockContext,
    ) -> Result<Vec<String>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.cancel.check()?;

            let result = match tokio::time::timeout(self.options.call_timeout, provider.translate_block(lines, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(Jp2SubsError::ProviderTimeout(self.options.call_timeout.as_secs())),
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < self.options.max_attempts => {
                    let delay = self.options.backoff_base * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Provider call failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt, self.options.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
