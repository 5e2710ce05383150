//! Pipeline driver.
//!
//! Sequences ingest, transcribe, romanize, translate, export and delivery for
//! one input file. Every stage asks the cache gate first, and every stage that
//! changes the master record saves it before the next one starts. Batch mode
//! runs independent files concurrently, each with its own workdir and record.

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::config::{Config, OutputMode, SourceField, SubtitleFormat};
use crate::error::{Jp2SubsError, Result};
use crate::gate::{self, Stage};
use crate::master::{master_path, MasterRecord};
use crate::media::{media_kind, MediaKind, MediaProcessorFactory, MediaProcessorTrait, ToolCommand};
use crate::paths::{coerce_workdir, default_workdir_for_input, workdir_for_media};
use crate::romanize::{create_romanizer, romanize_record, Romanizer};
use crate::subtitle::{render, subtitle_file_name, write_subtitles, write_transcript, ExportOptions, TranscriptKind};
use crate::transcribe::{Transcriber, TranscriberFactory, WhisperUtils};
use crate::translate::{BlockEngine, EngineOptions, Glossary, ProviderFactory, TranslationProvider};

/// Collaborators the driver delegates to.
pub struct Components {
    pub media: Arc<dyn MediaProcessorTrait>,
    pub transcriber: Arc<dyn Transcriber>,
    pub romanizer: Arc<dyn Romanizer>,
    pub provider: Arc<dyn TranslationProvider>,
    pub postedit: Option<Arc<dyn TranslationProvider>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Ran,
    Skipped(String),
    Failed(String),
}

/// What happened to one input file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub input: PathBuf,
    pub workdir: PathBuf,
    pub stages: Vec<(String, StageOutcome)>,
    pub outputs: Vec<PathBuf>,
    /// Segment ids left without a translation, per language
    pub untranslated: BTreeMap<String, Vec<u32>>,
    /// Fatal error that stopped this file
    pub error: Option<String>,
}

impl FileReport {
    pub fn new(input: &Path, workdir: &Path) -> Self {
        Self {
            input: input.to_path_buf(),
            workdir: workdir.to_path_buf(),
            stages: Vec::new(),
            outputs: Vec::new(),
            untranslated: BTreeMap::new(),
            error: None,
        }
    }

    fn push(&mut self, stage: &Stage, outcome: StageOutcome) {
        self.stages.push((stage.to_string(), outcome));
    }

    pub fn ran(&mut self, stage: &Stage) {
        self.push(stage, StageOutcome::Ran);
    }

    pub fn skipped(&mut self, stage: &Stage, reason: &str) {
        self.push(stage, StageOutcome::Skipped(reason.to_string()));
    }

    /// Record `err` against `stage` and hand it back for propagation.
    pub fn fail(&mut self, stage: &Stage, err: Jp2SubsError) -> Jp2SubsError {
        self.push(stage, StageOutcome::Failed(err.to_string()));
        err
    }

    /// Last outcome recorded for a stage name such as `translate[en]`.
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.stages.iter().rev().find(|(name, _)| name == stage).map(|(_, o)| o)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self.stages.iter().all(|(_, o)| !matches!(o, StageOutcome::Failed(_)))
    }

    fn names_where(&self, pred: impl Fn(&StageOutcome) -> bool) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn ran_stages(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, StageOutcome::Ran))
    }

    pub fn skipped_stages(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, StageOutcome::Skipped(_)))
    }

    pub fn failed_stages(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, StageOutcome::Failed(_)))
    }
}

/// Per-run switches that are not part of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Ignore the cache gate
    pub force: bool,
    /// Explicit workdir for a single file; batch uses it as the base directory
    pub workdir: Option<PathBuf>,
    /// Where muxed, burned or sidecar files go; defaults to the input's directory
    pub output_dir: Option<PathBuf>,
}

/// Working state of one file while its stages run.
pub struct Job {
    pub input: Option<PathBuf>,
    pub workdir: PathBuf,
    pub force: bool,
    pub record: Option<MasterRecord>,
    audio: Option<PathBuf>,
    pub report: FileReport,
}

impl Job {
    /// Open `workdir`, reading `master.json` when it exists.
    pub fn open(input: Option<&Path>, workdir: &Path, force: bool) -> Result<Self> {
        let record = MasterRecord::load_if_exists(master_path(workdir))?;
        let report_input = input.unwrap_or(workdir);
        Ok(Self {
            input: input.map(Path::to_path_buf),
            workdir: workdir.to_path_buf(),
            force,
            record,
            audio: None,
            report: FileReport::new(report_input, workdir),
        })
    }

    pub fn master_path(&self) -> PathBuf {
        master_path(&self.workdir)
    }

    pub fn audio(&self) -> Option<&Path> {
        self.audio.as_deref()
    }

    fn save(&self) -> Result<()> {
        match &self.record {
            Some(record) => record.save(self.master_path()),
            None => Ok(()),
        }
    }

    fn require_input(&self) -> Result<&Path> {
        self.input
            .as_deref()
            .ok_or_else(|| Jp2SubsError::Config("this stage needs an input media file".to_string()))
    }

    fn require_record(&mut self) -> Result<&mut MasterRecord> {
        let path = self.master_path();
        self.record
            .as_mut()
            .ok_or_else(|| Jp2SubsError::FileNotFound(path.display().to_string()))
    }
}

/// Result of one `doctor` probe.
#[derive(Debug, Clone)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

pub struct Workflow {
    config: Config,
    media: Arc<dyn MediaProcessorTrait>,
    transcriber: Arc<dyn Transcriber>,
    romanizer: Arc<dyn Romanizer>,
    provider: Arc<dyn TranslationProvider>,
    postedit: Option<Arc<dyn TranslationProvider>>,
    glossary: Arc<Glossary>,
    cancel: CancelToken,
}

impl Workflow {
    pub fn new(config: Config) -> Result<Self> {
        let media = MediaProcessorFactory::create_processor(config.media.clone());
        let transcriber = TranscriberFactory::create(config.asr.clone());
        let romanizer = create_romanizer(&config.pipeline)?;
        let (provider, postedit) = ProviderFactory::create_for_mode(&config.translate)?;

        Self::with_components(
            config,
            Components {
                media,
                transcriber,
                romanizer,
                provider,
                postedit,
            },
        )
    }

    pub fn with_components(config: Config, components: Components) -> Result<Self> {
        let glossary = match &config.translate.glossary_path {
            Some(path) => {
                let glossary = Glossary::load(path)?;
                info!("Loaded glossary with {} entries from {}", glossary.len(), path.display());
                glossary
            }
            None => Glossary::default(),
        };

        Ok(Self {
            config,
            media: components.media,
            transcriber: components.transcriber,
            romanizer: components.romanizer,
            provider: components.provider,
            postedit: components.postedit,
            glossary: Arc::new(glossary),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn media(&self) -> &Arc<dyn MediaProcessorTrait> {
        &self.media
    }

    fn engine(&self, force: bool) -> BlockEngine {
        let options = EngineOptions::from_config(&self.config.translate).with_force(force);
        BlockEngine::new(self.provider.clone(), options)
            .with_postedit(self.postedit.clone())
            .with_glossary(self.glossary.clone())
            .with_cancel(self.cancel.clone())
    }

    /// Ask the gate; skipped stages are logged and recorded.
    fn admit(&self, job: &mut Job, stage: &Stage) -> bool {
        let decision = gate::decide(stage, job.record.as_ref(), job.force);
        if decision.run {
            debug!("{}: running ({})", stage, decision.reason);
            true
        } else {
            info!("{}: skipped ({})", stage, decision.reason);
            job.report.skipped(stage, decision.reason);
            false
        }
    }

    fn romaji_needed(&self) -> bool {
        self.config.pipeline.generate_romaji || self.config.translate.source_field == SourceField::Romaji
    }

    /// Languages that get a subtitle file; the source language when nothing is translated.
    pub fn export_languages(&self, langs: &[String]) -> Vec<String> {
        if langs.is_empty() {
            vec![self.config.translate.source_lang.clone()]
        } else {
            langs.to_vec()
        }
    }

    async fn ensure_audio(&self, job: &mut Job) -> Result<PathBuf> {
        if let Some(audio) = &job.audio {
            return Ok(audio.clone());
        }
        let input = job.require_input()?.to_path_buf();
        let audio = self
            .media
            .extract_audio(&input, &job.workdir, self.config.media.mono)
            .await?;
        job.audio = Some(audio.clone());
        Ok(audio)
    }

    pub async fn ingest(&self, job: &mut Job) -> Result<()> {
        let stage = Stage::Ingest;
        self.cancel.check()?;
        if !self.admit(job, &stage) {
            return Ok(());
        }
        let audio = self.ensure_audio(job).await.map_err(|e| job.report.fail(&stage, e))?;
        info!("Audio ready: {}", audio.display());
        job.report.ran(&stage);
        Ok(())
    }

    pub async fn transcribe(&self, job: &mut Job) -> Result<()> {
        let stage = Stage::Transcribe;
        self.cancel.check()?;
        if !self.admit(job, &stage) {
            return Ok(());
        }
        self.run_transcription(job).await.map_err(|e| job.report.fail(&stage, e))?;
        job.report.ran(&stage);
        Ok(())
    }

    async fn run_transcription(&self, job: &mut Job) -> Result<()> {
        let audio = self.ensure_audio(job).await?;
        let transcript = self.transcriber.transcribe(&audio).await?;
        if transcript.language != self.config.asr.language && transcript.language != "unknown" {
            warn!(
                "Recognizer reported language '{}' (expected '{}')",
                transcript.language, self.config.asr.language
            );
        }

        let source = job
            .input
            .as_deref()
            .unwrap_or(audio.as_path())
            .display()
            .to_string();
        let mut record =
            MasterRecord::from_transcript(source, transcript.segments, self.config.settings_snapshot());
        let asr_version = if transcript.model_info.is_empty() {
            self.transcriber.name()
        } else {
            format!("{} ({})", self.transcriber.name(), transcript.model_info)
        };
        record.meta.tool_versions.insert("asr".to_string(), asr_version);
        record
            .meta
            .tool_versions
            .insert("jp2subs".to_string(), env!("CARGO_PKG_VERSION").to_string());

        info!("Transcription produced {} segments", record.segments.len());
        job.record = Some(record);
        job.save()?;
        if let Some(record) = &job.record {
            write_transcript(record, &job.workdir, TranscriptKind::Japanese)?;
        }
        Ok(())
    }

    pub async fn romanize(&self, job: &mut Job) -> Result<()> {
        let stage = Stage::Romanize;
        self.cancel.check()?;
        if !self.admit(job, &stage) {
            return Ok(());
        }
        self.run_romanization(job).await.map_err(|e| job.report.fail(&stage, e))?;
        job.report.ran(&stage);
        Ok(())
    }

    async fn run_romanization(&self, job: &mut Job) -> Result<()> {
        let record = job.require_record()?;
        romanize_record(self.romanizer.as_ref(), record, &self.cancel).await?;
        job.save()?;
        if let Some(record) = &job.record {
            write_transcript(record, &job.workdir, TranscriptKind::Romaji)?;
        }
        Ok(())
    }

    /// Translate into each language. Block failures are reported per language
    /// and do not stop the remaining languages.
    pub async fn translate(&self, job: &mut Job, langs: &[String]) -> Result<()> {
        let engine = self.engine(job.force);
        let master = job.master_path();

        for lang in langs {
            let stage = Stage::Translate(lang.clone());
            self.cancel.check()?;
            if !self.admit(job, &stage) {
                continue;
            }
            let Some(record) = job.record.as_mut() else {
                let err = Jp2SubsError::FileNotFound(master.display().to_string());
                return Err(job.report.fail(&stage, err));
            };
            let outcome = engine
                .translate_language(record, lang, |r: &MasterRecord| r.save(&master))
                .await;
            let outcome = outcome.and_then(|report| job.save().map(|_| report));

            match outcome {
                Ok(report) if report.is_complete() => {
                    info!("{}: {} blocks done", stage, report.blocks_done + report.blocks_skipped);
                    job.report.ran(&stage);
                }
                Ok(report) => {
                    let missing = report.untranslated_segment_ids();
                    warn!("{}: {} segment(s) left untranslated: {:?}", stage, missing.len(), missing);
                    job.report.push(
                        &stage,
                        StageOutcome::Failed(format!("{} segment(s) untranslated", missing.len())),
                    );
                    job.report.untranslated.insert(lang.clone(), missing);
                    if !report.cancelled_segment_ids.is_empty() {
                        return Err(Jp2SubsError::Cancelled);
                    }
                }
                Err(Jp2SubsError::Cancelled) => {
                    return Err(job.report.fail(&stage, Jp2SubsError::Cancelled));
                }
                Err(e) => {
                    error!("{} failed: {}", stage, e);
                    job.report.fail(&stage, e);
                }
            }
        }
        Ok(())
    }

    /// Render one subtitle file per language into the workdir.
    pub fn export(
        &self,
        job: &mut Job,
        langs: &[String],
        format: Option<SubtitleFormat>,
    ) -> Result<Vec<(PathBuf, String)>> {
        let stage = Stage::Export;
        self.cancel.check()?;
        if !self.admit(job, &stage) {
            return Ok(Vec::new());
        }
        let result = self.write_exports(job, langs, format);
        let written = result.map_err(|e| job.report.fail(&stage, e))?;
        job.report.outputs.extend(written.iter().map(|(p, _)| p.clone()));
        job.report.ran(&stage);
        Ok(written)
    }

    fn write_exports(
        &self,
        job: &Job,
        langs: &[String],
        format: Option<SubtitleFormat>,
    ) -> Result<Vec<(PathBuf, String)>> {
        let record = job
            .record
            .as_ref()
            .ok_or_else(|| Jp2SubsError::FileNotFound(job.master_path().display().to_string()))?;
        let mut written = Vec::new();
        for lang in self.export_languages(langs) {
            let mut opts =
                ExportOptions::from_config(&self.config.export, &lang, &self.config.translate.source_lang);
            if let Some(format) = format {
                opts.format = format;
            }
            let path = job.workdir.join(subtitle_file_name(&lang, opts.format));
            written.push((write_subtitles(record, path, &opts)?, lang));
        }
        Ok(written)
    }

    /// Hand the rendered subtitles to the media collaborator per the output mode.
    pub async fn deliver(
        &self,
        job: &mut Job,
        subtitles: &[(PathBuf, String)],
        mode: OutputMode,
        output_dir: Option<&Path>,
    ) -> Result<()> {
        if mode == OutputMode::Subtitles || subtitles.is_empty() {
            return Ok(());
        }
        let stage = Stage::Mux;
        self.cancel.check()?;
        if !self.admit(job, &stage) {
            return Ok(());
        }
        let Some(input) = job.input.clone() else {
            let err = Jp2SubsError::Config("delivery needs the input video".to_string());
            return Err(job.report.fail(&stage, err));
        };
        if media_kind(&input) != Some(MediaKind::Video) {
            job.report.skipped(&stage, "input is not a video");
            return Ok(());
        }

        let out_dir = output_dir
            .map(Path::to_path_buf)
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let result = self.run_delivery(job, &input, subtitles, mode, &out_dir).await;

        let delivered = result.map_err(|e| job.report.fail(&stage, e))?;
        for path in &delivered {
            info!("Delivered {}", path.display());
        }
        job.report.outputs.extend(delivered);
        job.report.ran(&stage);
        Ok(())
    }

    async fn run_delivery(
        &self,
        job: &Job,
        input: &Path,
        subtitles: &[(PathBuf, String)],
        mode: OutputMode,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        let container = &self.config.media.container;

        match mode {
            OutputMode::Subtitles => Ok(Vec::new()),
            OutputMode::SoftMux => {
                let output = out_dir.join(format!("{}.subs.{}", stem, container));
                Ok(vec![self.media.soft_mux(input, subtitles, &output).await?])
            }
            OutputMode::HardBurn => {
                let (subs, lang) = &subtitles[0];
                let ass = self.ass_for_burn(job, subs, lang)?;
                let output = out_dir.join(format!("{}.{}.hardsub.{}", stem, lang, container));
                Ok(vec![self.media.hard_burn(input, &ass, &output).await?])
            }
            OutputMode::Sidecar => {
                let mut placed = Vec::with_capacity(subtitles.len());
                for (subs, lang) in subtitles {
                    placed.push(self.media.sidecar(input, subs, lang, out_dir).await?);
                }
                Ok(placed)
            }
        }
    }

    /// Burning goes through libass, so non-ASS exports get an ASS rendering.
    fn ass_for_burn(&self, job: &Job, subs: &Path, lang: &str) -> Result<PathBuf> {
        let is_ass = subs
            .extension()
            .map(|e| e.eq_ignore_ascii_case("ass"))
            .unwrap_or(false);
        if is_ass {
            return Ok(subs.to_path_buf());
        }
        let record = job
            .record
            .as_ref()
            .ok_or_else(|| Jp2SubsError::FileNotFound(job.master_path().display().to_string()))?;
        let mut opts = ExportOptions::from_config(&self.config.export, lang, &self.config.translate.source_lang);
        opts.format = SubtitleFormat::Ass;
        let path = job.workdir.join(subtitle_file_name(lang, SubtitleFormat::Ass));
        std::fs::write(&path, render(record, &opts)?)?;
        Ok(path)
    }

    async fn run_stages(&self, job: &mut Job, opts: &RunOptions) -> Result<()> {
        let langs = self.config.translate.target_languages.clone();

        self.ingest(job).await?;
        self.transcribe(job).await?;
        if self.romaji_needed() {
            self.romanize(job).await?;
        }
        self.translate(job, &langs).await?;
        let subtitles = self.export(job, &langs, None)?;
        self.deliver(job, &subtitles, self.config.pipeline.output, opts.output_dir.as_deref())
            .await?;
        Ok(())
    }

    /// Run the whole pipeline for `input` inside `workdir`. Never returns an
    /// error; failures end up in the report.
    pub async fn process_in(&self, input: &Path, workdir: &Path, opts: &RunOptions) -> FileReport {
        info!("Processing {} (workdir {})", input.display(), workdir.display());
        let mut job = match Job::open(Some(input), workdir, opts.force) {
            Ok(job) => job,
            Err(e) => {
                let mut report = FileReport::new(input, workdir);
                report.error = Some(e.to_string());
                return report;
            }
        };

        if let Err(e) = self.run_stages(&mut job, opts).await {
            error!("{}: {}", input.display(), e);
            job.report.error = Some(e.to_string());
        }
        job.report
    }

    /// Single file with the workdir from `opts` or `<parent>/_jobs/<stem>-<ext>`.
    pub async fn process_file(&self, input: &Path, opts: &RunOptions) -> FileReport {
        let workdir = opts
            .workdir
            .as_deref()
            .map(coerce_workdir)
            .unwrap_or_else(|| default_workdir_for_input(input));
        self.process_in(input, &workdir, opts).await
    }

    /// Media files under `dir` with a configured extension, skipping `exclude`.
    pub fn discover_media(&self, dir: &Path, exclude: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(Jp2SubsError::Config(format!("{} is not a directory", dir.display())));
        }
        let extensions: Vec<String> = self
            .config
            .pipeline
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_entry(|e| e.path() != exclude)
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase()))
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Run `files` with `pipeline.batch_jobs` in flight. One file failing never
    /// affects another; reports come back in input order.
    pub async fn process_batch(
        &self,
        files: &[PathBuf],
        base: &Path,
        opts: &RunOptions,
        on_done: &(dyn Fn(&FileReport) + Sync),
    ) -> Vec<FileReport> {
        let jobs = self.config.pipeline.batch_jobs.max(1);
        info!("Batch of {} file(s), {} at a time", files.len(), jobs);

        let mut reports = Vec::with_capacity(files.len());
        {
            let mut results = std::pin::pin!(stream::iter(files.iter().enumerate())
                .map(|(idx, file)| async move {
                    let workdir = workdir_for_media(base, file);
                    (idx, self.process_in(file, &workdir, opts).await)
                })
                .buffer_unordered(jobs));

            while let Some((idx, report)) = results.next().await {
                on_done(&report);
                reports.push((idx, report));
            }
        }
        reports.sort_by_key(|(idx, _)| *idx);
        reports.into_iter().map(|(_, r)| r).collect()
    }

    /// Discover and process every media file under `dir`.
    pub async fn process_directory(&self, dir: &Path, opts: &RunOptions) -> Result<Vec<FileReport>> {
        let base = opts.workdir.clone().unwrap_or_else(|| dir.join("_jobs"));
        let files = self.discover_media(dir, &base)?;
        info!("Found {} media file(s) in {}", files.len(), dir.display());
        Ok(self.process_batch(&files, &base, opts, &|_| {}).await)
    }

    /// Probe the external tools this configuration needs.
    pub async fn doctor(&self) -> Vec<DoctorCheck> {
        let mut checks = Vec::new();

        checks.push(match self.media.check_availability().await {
            Ok(version) => DoctorCheck { name: "ffmpeg".into(), ok: true, detail: version },
            Err(e) => DoctorCheck { name: "ffmpeg".into(), ok: false, detail: e.to_string() },
        });

        checks.push(probe_binary("whisper.cpp", &self.config.asr.binary_path, "-h").await);
        let model = WhisperUtils::resolve_model_path(&self.config.asr);
        checks.push(DoctorCheck {
            name: "whisper model".into(),
            ok: model.exists(),
            detail: model.display().to_string(),
        });

        let uses_local = self.config.translate.provider == crate::config::ProviderKind::Local
            || self.config.translate.postedit_provider == Some(crate::config::ProviderKind::Local);
        if uses_local {
            let local = &self.config.translate.local;
            checks.push(probe_binary("llama.cpp", &local.binary_path, "--version").await);
            checks.push(DoctorCheck {
                name: "llama model".into(),
                ok: Path::new(&local.model_path).exists(),
                detail: local.model_path.clone(),
            });
        }

        if let Some(argv) = &self.config.pipeline.romanizer_command {
            if let Some(program) = argv.first() {
                checks.push(probe_binary("romanizer", program, "--help").await);
            }
        }
        checks
    }
}

async fn probe_binary(name: &str, binary: &str, flag: &str) -> DoctorCheck {
    match ToolCommand::new(binary, format!("{} probe", name)).arg(flag).execute_capture().await {
        Ok(_) => DoctorCheck {
            name: name.to_string(),
            ok: true,
            detail: binary.to_string(),
        },
        Err(e) => DoctorCheck {
            name: name.to_string(),
            ok: false,
            detail: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::RawSegment;
    use crate::media::MockMediaProcessorTrait;
    use crate::romanize::KanaRomanizer;
    use crate::transcribe::{MockTranscriber, Transcript};
    use crate::translate::{EchoProvider, MockTranslationProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn example_transcript() -> Transcript {
        Transcript {
            segments: vec![
                RawSegment { start: 0.0, end: 2.5, text: "あの、おはよう".into() },
                RawSegment { start: 2.5, end: 4.0, text: "元気？".into() },
            ],
            language: "ja".into(),
            model_info: "ggml-test.bin".into(),
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.translate.target_languages = vec!["en".into()];
        config.translate.backoff_base_ms = 1;
        config.pipeline.batch_jobs = 2;
        config
    }

    fn extracting_media() -> MockMediaProcessorTrait {
        let mut media = MockMediaProcessorTrait::new();
        media
            .expect_extract_audio()
            .returning(|_, workdir, _| Ok(workdir.join("audio.flac")));
        media
    }

    fn example_transcriber() -> MockTranscriber {
        let mut asr = MockTranscriber::new();
        asr.expect_transcribe().returning(|_| Ok(example_transcript()));
        asr.expect_name().return_const("mock-asr".to_string());
        asr
    }

    fn example_provider() -> MockTranslationProvider {
        let mut provider = MockTranslationProvider::new();
        provider
            .expect_translate_block()
            .returning(|_, _| Ok(vec!["Um, good morning".to_string(), "How are you?".to_string()]));
        provider
    }

    fn workflow(
        config: Config,
        media: MockMediaProcessorTrait,
        asr: MockTranscriber,
        provider: Arc<dyn TranslationProvider>,
    ) -> Workflow {
        Workflow::with_components(
            config,
            Components {
                media: Arc::new(media),
                transcriber: Arc::new(asr),
                romanizer: Arc::new(KanaRomanizer),
                provider,
                postedit: None,
            },
        )
        .unwrap()
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"media").unwrap();
    }

    const EXPECTED_SRT: &str = "1\n00:00:00,000 --> 00:00:02,500\nUm, good morning\n\n\
                                2\n00:00:02,500 --> 00:00:04,000\nHow are you?\n";

    #[tokio::test]
    async fn test_example_file_exports_srt() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ep01.mkv");
        touch(&input);

        let wf = workflow(test_config(), extracting_media(), example_transcriber(), Arc::new(example_provider()));
        let report = wf.process_file(&input, &RunOptions::default()).await;

        assert!(report.is_success(), "{:?}", report);
        let workdir = dir.path().join("_jobs").join("ep01-mkv");
        assert_eq!(report.workdir, workdir);
        let srt = std::fs::read_to_string(workdir.join("subs_en.srt")).unwrap();
        assert_eq!(srt, EXPECTED_SRT);
        assert!(workdir.join("transcript_ja.txt").exists());

        let record = MasterRecord::load(master_path(&workdir)).unwrap();
        assert_eq!(record.segments[1].translation("en"), Some("How are you?"));
        assert_eq!(record.meta.tool_versions.get("asr").map(String::as_str), Some("mock-asr (ggml-test.bin)"));
        assert_eq!(record.meta.settings.get("beam_size").map(String::as_str), Some("5"));
    }

    #[tokio::test]
    async fn test_second_run_skips_cached_stages() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ep01.mkv");
        touch(&input);

        let mut media = MockMediaProcessorTrait::new();
        media
            .expect_extract_audio()
            .times(1)
            .returning(|_, workdir, _| Ok(workdir.join("audio.flac")));
        let mut asr = MockTranscriber::new();
        asr.expect_transcribe().times(1).returning(|_| Ok(example_transcript()));
        asr.expect_name().return_const("mock-asr".to_string());
        let mut provider = MockTranslationProvider::new();
        provider
            .expect_translate_block()
            .times(1)
            .returning(|_, _| Ok(vec!["Um, good morning".to_string(), "How are you?".to_string()]));

        let wf = workflow(test_config(), media, asr, Arc::new(provider));
        let first = wf.process_file(&input, &RunOptions::default()).await;
        let srt_first = std::fs::read(first.workdir.join("subs_en.srt")).unwrap();
        assert_eq!(first.ran_stages(), vec!["ingest", "transcribe", "translate[en]", "export"]);

        let second = wf.process_file(&input, &RunOptions::default()).await;
        assert!(second.is_success());
        assert_eq!(second.skipped_stages(), vec!["ingest", "transcribe", "translate[en]"]);
        assert_eq!(second.ran_stages(), vec!["export"]);
        let srt_second = std::fs::read(second.workdir.join("subs_en.srt")).unwrap();
        assert_eq!(srt_first, srt_second);
    }

    #[tokio::test]
    async fn test_batch_isolates_failing_file() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.mkv", "b.mkv", "c.mkv"] {
            touch(&dir.path().join(name));
        }
        touch(&dir.path().join("notes.txt"));

        let mut media = MockMediaProcessorTrait::new();
        media.expect_extract_audio().returning(|input, workdir, _| {
            if input.file_stem().map(|s| s == "b").unwrap_or(false) {
                Err(Jp2SubsError::ExternalTool("ffmpeg audio extraction failed".into()))
            } else {
                Ok(workdir.join("audio.flac"))
            }
        });

        let wf = workflow(test_config(), media, example_transcriber(), Arc::new(EchoProvider));
        let done = AtomicUsize::new(0);
        let base = dir.path().join("_jobs");
        let files = wf.discover_media(dir.path(), &base).unwrap();
        assert_eq!(files.len(), 3);

        let reports = wf
            .process_batch(&files, &base, &RunOptions::default(), &|_| {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(reports.len(), 3);
        assert!(reports[0].is_success());
        assert!(!reports[1].is_success());
        assert!(matches!(reports[1].outcome("ingest"), Some(StageOutcome::Failed(_))));
        assert!(reports[2].is_success());
        for report in [&reports[0], &reports[2]] {
            assert!(report.workdir.starts_with(&base));
            assert!(report.workdir.join("subs_en.srt").exists());
        }
        assert_ne!(reports[0].workdir, reports[2].workdir);
    }

    #[tokio::test]
    async fn test_batch_same_stem_files_get_separate_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = Vec::new();
        for folder in ["s1", "s2"] {
            std::fs::create_dir_all(dir.path().join(folder)).unwrap();
            let file = dir.path().join(folder).join("ep01.mkv");
            touch(&file);
            files.push(file);
        }

        // the extracted "audio" carries the name of the folder it came from
        let mut media = MockMediaProcessorTrait::new();
        media.expect_extract_audio().returning(|input, workdir, _| {
            std::fs::create_dir_all(workdir)?;
            let audio = workdir.join("audio.flac");
            let folder = input.parent().and_then(Path::file_name).unwrap_or_default();
            std::fs::write(&audio, folder.to_string_lossy().as_bytes())?;
            Ok(audio)
        });
        let mut asr = MockTranscriber::new();
        asr.expect_transcribe().times(2).returning(|audio| {
            Ok(Transcript {
                segments: vec![RawSegment { start: 0.0, end: 1.0, text: std::fs::read_to_string(audio)? }],
                language: "ja".into(),
                model_info: String::new(),
            })
        });
        asr.expect_name().return_const("mock-asr".to_string());

        let wf = workflow(test_config(), media, asr, Arc::new(EchoProvider));
        let base = dir.path().join("_jobs");
        let reports = wf.process_batch(&files, &base, &RunOptions::default(), &|_| {}).await;

        assert_eq!(reports.len(), 2);
        assert_ne!(reports[0].workdir, reports[1].workdir);
        for (report, folder) in reports.iter().zip(["s1", "s2"]) {
            assert!(report.is_success(), "{:?}", report);
            assert_eq!(report.ran_stages(), vec!["ingest", "transcribe", "translate[en]", "export"]);
            let srt = std::fs::read_to_string(report.workdir.join("subs_en.srt")).unwrap();
            assert_eq!(srt, format!("1\n00:00:00,000 --> 00:00:01,000\n{}\n", folder));
        }
    }

    #[tokio::test]
    async fn test_cancel_during_translate_keeps_finished_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ep01.mkv");
        touch(&input);

        let mut config = test_config();
        config.translate.block_size = 1;
        config.translate.max_concurrent_blocks = 1;

        let cancel = CancelToken::new();
        let trip = cancel.clone();
        let mut provider = MockTranslationProvider::new();
        provider.expect_translate_block().times(1).returning(move |_, _| {
            trip.cancel();
            Ok(vec!["Um, good morning".to_string()])
        });

        let wf = workflow(config, extracting_media(), example_transcriber(), Arc::new(provider)).with_cancel(cancel);
        let report = wf.process_file(&input, &RunOptions::default()).await;

        assert!(!report.is_success());
        assert_eq!(report.error.as_deref(), Some(Jp2SubsError::Cancelled.to_string().as_str()));
        assert!(matches!(report.outcome("translate[en]"), Some(StageOutcome::Failed(_))));
        assert_eq!(report.untranslated.get("en"), Some(&vec![2]));
        assert_eq!(report.outcome("export"), None);

        let record = MasterRecord::load(master_path(&report.workdir)).unwrap();
        assert_eq!(record.segments[0].translation("en"), Some("Um, good morning"));
        assert_eq!(record.segments[1].translation("en"), None);
    }

    #[tokio::test]
    async fn test_untranslated_ids_are_reported_and_export_continues() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ep01.mkv");
        touch(&input);

        let mut provider = MockTranslationProvider::new();
        provider
            .expect_translate_block()
            .returning(|_, _| Ok(vec!["only one line".to_string()]));

        let wf = workflow(test_config(), extracting_media(), example_transcriber(), Arc::new(provider));
        let report = wf.process_file(&input, &RunOptions::default()).await;

        assert!(!report.is_success());
        assert!(report.error.is_none());
        assert_eq!(report.untranslated.get("en"), Some(&vec![1, 2]));
        assert_eq!(report.outcome("export"), Some(&StageOutcome::Ran));

        let record = MasterRecord::load(master_path(&report.workdir)).unwrap();
        assert!(record.segments.iter().all(|s| s.translation("en").is_none()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_calls_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ep01.mkv");
        touch(&input);

        let cancel = CancelToken::new();
        cancel.cancel();
        let wf = workflow(
            test_config(),
            MockMediaProcessorTrait::new(),
            MockTranscriber::new(),
            Arc::new(MockTranslationProvider::new()),
        )
        .with_cancel(cancel);

        let report = wf.process_file(&input, &RunOptions::default()).await;
        assert_eq!(report.error.as_deref(), Some(Jp2SubsError::Cancelled.to_string().as_str()));
        assert!(report.stages.is_empty());
    }

    #[tokio::test]
    async fn test_soft_mux_receives_every_export() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ep01.mkv");
        touch(&input);

        let mut config = test_config();
        config.translate.target_languages = vec!["en".into(), "pt-BR".into()];
        config.pipeline.output = OutputMode::SoftMux;

        let mut media = extracting_media();
        media
            .expect_soft_mux()
            .times(1)
            .withf(|_, subs, output| subs.len() == 2 && subs[1].1 == "pt-BR" && output.ends_with("ep01.subs.mkv"))
            .returning(|_, _, output| Ok(output.to_path_buf()));

        let wf = workflow(config, media, example_transcriber(), Arc::new(EchoProvider));
        let out_dir = dir.path().join("out");
        let opts = RunOptions {
            output_dir: Some(out_dir.clone()),
            ..Default::default()
        };
        let report = wf.process_file(&input, &opts).await;

        assert!(report.is_success(), "{:?}", report);
        assert!(report.outputs.contains(&out_dir.join("ep01.subs.mkv")));
        assert_eq!(report.outputs.len(), 3);
    }

    #[tokio::test]
    async fn test_hard_burn_renders_ass_and_audio_input_skips_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("ep01.mp4");
        let audio = dir.path().join("ep02.flac");
        touch(&video);
        touch(&audio);

        let mut config = test_config();
        config.pipeline.output = OutputMode::HardBurn;

        let mut media = extracting_media();
        media
            .expect_hard_burn()
            .times(1)
            .withf(|_, subs, _| subs.extension().map(|e| e == "ass").unwrap_or(false) && subs.exists())
            .returning(|_, _, output| Ok(output.to_path_buf()));

        let wf = workflow(config, media, example_transcriber(), Arc::new(EchoProvider));
        let burned = wf.process_file(&video, &RunOptions::default()).await;
        assert!(burned.is_success(), "{:?}", burned);
        assert!(burned.outputs.contains(&dir.path().join("ep01.en.hardsub.mkv")));

        let audio_only = wf.process_file(&audio, &RunOptions::default()).await;
        assert!(audio_only.is_success());
        assert_eq!(
            audio_only.outcome("mux"),
            Some(&StageOutcome::Skipped("input is not a video".into()))
        );
    }

    #[tokio::test]
    async fn test_romanize_stage_writes_romaji_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ep01.mkv");
        touch(&input);

        let mut config = test_config();
        config.pipeline.generate_romaji = true;
        config.translate.target_languages.clear();

        let wf = workflow(config, extracting_media(), example_transcriber(), Arc::new(EchoProvider));
        let report = wf.process_file(&input, &RunOptions::default()).await;
        assert!(report.is_success(), "{:?}", report);
        assert_eq!(report.outcome("romanize"), Some(&StageOutcome::Ran));
        assert!(report.workdir.join("transcript_romaji.txt").exists());
        assert!(report.workdir.join("subs_ja.srt").exists());

        let record = MasterRecord::load(master_path(&report.workdir)).unwrap();
        assert!(record.segments.iter().all(|s| s.romaji.is_some()));
    }

    #[tokio::test]
    async fn test_standalone_export_needs_master() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow(
            test_config(),
            MockMediaProcessorTrait::new(),
            MockTranscriber::new(),
            Arc::new(EchoProvider),
        );
        let mut job = Job::open(None, dir.path(), false).unwrap();
        let err = wf.export(&mut job, &["en".to_string()], None).unwrap_err();
        assert!(matches!(err, Jp2SubsError::FileNotFound(_)));
        assert!(matches!(job.report.outcome("export"), Some(StageOutcome::Failed(_))));
    }
}
