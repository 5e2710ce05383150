//! jp2subs - Japanese media to subtitles
//!
//! Command-line entry point. Each stage command reads and writes the
//! workdir's `master.json`; `process` and `batch` run the whole pipeline.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jp2subs::cli::{Args, Commands, ModeArg, PipelineArgs};
use jp2subs::config::{Config, SubtitleFormat, TranslationMode};
use jp2subs::error::Jp2SubsError;
use jp2subs::master::{master_path, MasterRecord};
use jp2subs::paths::{coerce_workdir, default_workdir_for_input, display_relative, normalize_input_path};
use jp2subs::subtitle::{write_subtitles, ExportOptions};
use jp2subs::workflow::{FileReport, Job, RunOptions, StageOutcome, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the file writer alive until exit
    let log_guard = setup_logging(args.verbose)?;
    info!("Starting jp2subs {}", env!("CARGO_PKG_VERSION"));

    if let Commands::InitConfig { path, force } = &args.command {
        return init_config(path.as_deref(), *force);
    }

    let mut config = Config::load(args.config.as_deref())?;

    let ok = match args.command {
        Commands::Ingest { input, workdir, force } => {
            let input = normalize_input_path(&input.to_string_lossy());
            let workflow = build_workflow(config)?;
            let mut job = Job::open(Some(&input), &resolve_workdir(&input, workdir), force)?;
            workflow.ingest(&mut job).await?;
            if let Some(audio) = job.audio() {
                println!("Audio: {}", audio.display());
            }
            print_summary(&[job.report]);
            true
        }
        Commands::Transcribe { input, workdir, force } => {
            let input = normalize_input_path(&input.to_string_lossy());
            let workflow = build_workflow(config)?;
            let mut job = Job::open(Some(&input), &resolve_workdir(&input, workdir), force)?;
            workflow.transcribe(&mut job).await?;
            println!("Master record: {}", job.master_path().display());
            print_summary(&[job.report]);
            true
        }
        Commands::Romanize { workdir, force } => {
            let workflow = build_workflow(config)?;
            let mut job = Job::open(None, &workdir, force)?;
            workflow.romanize(&mut job).await?;
            print_summary(&[job.report]);
            true
        }
        Commands::Translate { workdir, to, mode, force } => {
            if let Some(mode) = mode {
                config.translate.mode = translation_mode(mode);
            }
            let langs = if to.is_empty() { config.translate.target_languages.clone() } else { to };
            let workflow = build_workflow(config)?;
            let mut job = Job::open(None, &workdir, force)?;
            workflow.translate(&mut job, &langs).await?;
            let ok = job.report.is_success();
            print_summary(&[job.report]);
            ok
        }
        Commands::Export { workdir, lang, format, bilingual, out } => {
            if bilingual.is_some() {
                config.export.bilingual = bilingual;
            }
            let format: Option<SubtitleFormat> = format.map(Into::into);
            match out {
                Some(out) => {
                    export_single(&config, &workdir, &lang, format, &out)?;
                }
                None => {
                    let workflow = build_workflow(config)?;
                    let mut job = Job::open(None, &workdir, false)?;
                    for (path, _) in workflow.export(&mut job, &lang, format)? {
                        println!("{}", path.display());
                    }
                }
            }
            true
        }
        Commands::Softcode { video, subs, lang, out } => {
            let workflow = build_workflow(config)?;
            let output = workflow.media().soft_mux(&video, &[(subs, lang)], &out).await?;
            println!("{}", output.display());
            true
        }
        Commands::Hardcode { video, subs, out } => {
            let workflow = build_workflow(config)?;
            let output = workflow.media().hard_burn(&video, &subs, &out).await?;
            println!("{}", output.display());
            true
        }
        Commands::Sidecar { video, subs, lang, out_dir } => {
            let workflow = build_workflow(config)?;
            let out_dir = out_dir
                .or_else(|| video.parent().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from("."));
            let output = workflow.media().sidecar(&video, &subs, &lang, &out_dir).await?;
            println!("{}", output.display());
            true
        }
        Commands::Process { input, workdir, pipeline } => {
            let input = normalize_input_path(&input.to_string_lossy());
            let opts = apply_pipeline_args(&mut config, &pipeline, workdir);
            let workflow = build_workflow(config)?;
            let report = workflow.process_file(&input, &opts).await;
            let ok = report.is_success();
            print_summary(&[report]);
            ok
        }
        Commands::Batch { input_dir, workdir, jobs, pipeline } => {
            let input_dir = normalize_input_path(&input_dir.to_string_lossy());
            if let Some(jobs) = jobs {
                config.pipeline.batch_jobs = jobs.max(1);
            }
            let opts = apply_pipeline_args(&mut config, &pipeline, workdir);
            let workflow = build_workflow(config)?;
            let reports = run_batch(&workflow, &input_dir, &opts).await?;
            let ok = reports.iter().all(FileReport::is_success);
            print_summary(&reports);
            ok
        }
        Commands::Doctor => {
            let workflow = build_workflow(config)?;
            let checks = workflow.doctor().await;
            println!("\n{:<16} {:<6} {}", "Check", "OK", "Detail");
            println!("{}", "-".repeat(72));
            for check in &checks {
                println!("{:<16} {:<6} {}", check.name, if check.ok { "yes" } else { "NO" }, check.detail);
            }
            checks.iter().all(|c| c.ok)
        }
        Commands::InitConfig { .. } => true,
    };

    if ok {
        info!("jp2subs finished");
        Ok(())
    } else {
        warn!("jp2subs finished with failures");
        drop(log_guard);
        std::process::exit(1);
    }
}

/// Build the workflow and route Ctrl-C to its cancel token.
fn build_workflow(config: Config) -> Result<Workflow> {
    let workflow = Workflow::new(config)?;
    let cancel = workflow.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the current step and stopping");
            cancel.cancel();
        }
    });
    Ok(workflow)
}

fn resolve_workdir(input: &Path, workdir: Option<PathBuf>) -> PathBuf {
    workdir
        .map(|w| coerce_workdir(&w))
        .unwrap_or_else(|| default_workdir_for_input(input))
}

fn translation_mode(mode: ModeArg) -> TranslationMode {
    match mode {
        ModeArg::Llm => TranslationMode::Single,
        ModeArg::DraftPostedit => TranslationMode::DraftPostEdit,
    }
}

fn apply_pipeline_args(config: &mut Config, pipeline: &PipelineArgs, workdir: Option<PathBuf>) -> RunOptions {
    if let Some(to) = &pipeline.to {
        config.translate.target_languages = to.iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    }
    if let Some(output) = pipeline.output {
        config.pipeline.output = output.into();
    }
    if let Some(format) = pipeline.format {
        config.export.format = format.into();
    }
    if pipeline.bilingual.is_some() {
        config.export.bilingual = pipeline.bilingual.clone();
    }
    if pipeline.romaji {
        config.pipeline.generate_romaji = true;
    }
    if let Some(mode) = pipeline.mode {
        config.translate.mode = translation_mode(mode);
    }

    RunOptions {
        force: pipeline.force,
        workdir,
        output_dir: pipeline.out_dir.clone(),
    }
}

/// Export straight to a chosen path, bypassing the workdir naming.
fn export_single(
    config: &Config,
    workdir: &Path,
    langs: &[String],
    format: Option<SubtitleFormat>,
    out: &Path,
) -> Result<()> {
    let record = MasterRecord::load(master_path(workdir))?;
    let lang = match langs {
        [] => config.translate.source_lang.clone(),
        [lang] => lang.clone(),
        _ => {
            return Err(Jp2SubsError::Config("--out takes a single --lang".to_string()).into());
        }
    };
    let mut opts = ExportOptions::from_config(&config.export, &lang, &config.translate.source_lang);
    if let Some(format) = format {
        opts.format = format;
    }
    let path = write_subtitles(&record, out, &opts)?;
    println!("{}", path.display());
    Ok(())
}

async fn run_batch(workflow: &Workflow, input_dir: &Path, opts: &RunOptions) -> Result<Vec<FileReport>> {
    let base = opts.workdir.clone().unwrap_or_else(|| input_dir.join("_jobs"));
    let files = workflow.discover_media(input_dir, &base)?;
    info!("Found {} media file(s) in {}", files.len(), input_dir.display());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_err(|e| anyhow::anyhow!("Invalid progress template: {}", e))?
            .progress_chars("#>-"),
    );

    let reports = workflow
        .process_batch(&files, &base, opts, &|report| {
            pb.set_message(
                report
                    .input
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            );
            pb.inc(1);
        })
        .await;
    pb.finish_with_message("done");
    Ok(reports)
}

fn print_summary(reports: &[FileReport]) {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    println!("\n{:<32} {:<8} {}", "File", "Status", "Stages");
    println!("{}", "-".repeat(90));
    for report in reports {
        let status = if report.is_success() { "ok" } else { "FAILED" };
        let stages: Vec<String> = report
            .stages
            .iter()
            .map(|(name, outcome)| match outcome {
                StageOutcome::Ran => format!("{} ran", name),
                StageOutcome::Skipped(_) => format!("{} skipped", name),
                StageOutcome::Failed(_) => format!("{} FAILED", name),
            })
            .collect();
        println!(
            "{:<32} {:<8} {}",
            display_relative(&report.input, &cwd),
            status,
            stages.join(", ")
        );
        for (name, outcome) in &report.stages {
            if let StageOutcome::Failed(reason) = outcome {
                println!("    {}: {}", name, reason);
            }
        }
        for (lang, ids) in &report.untranslated {
            println!("    untranslated [{}]: {:?}", lang, ids);
        }
        if let Some(error) = &report.error {
            println!("    error: {}", error);
        }
        for output in &report.outputs {
            println!("    -> {}", display_relative(output, &cwd));
        }
    }
}

fn init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()
            .ok_or_else(|| Jp2SubsError::Config("cannot determine the user config directory".to_string()))?,
    };
    if path.exists() && !force {
        return Err(Jp2SubsError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ))
        .into());
    }
    Config::default().save_to_file(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

/// Console plus a daily log file under `./.jp2subs/log`.
fn setup_logging(verbose: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".jp2subs").join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "jp2subs.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer().with_target(false);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("jp2subs.log").display()
    );

    Ok(guard)
}
