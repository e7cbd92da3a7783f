use anyhow::{Context, Result, bail};
use clap::Parser;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use vidscribe::cli::{Cli, Commands, ConfigAction, ModelsAction, OutputFormat};
use vidscribe::config::Config;
use vidscribe::media::{SourceLocator, SubtitleMode};
use vidscribe::models::catalog::list_models;
use vidscribe::models::download::{download_model, format_model_info, list_installed_models};
use vidscribe::progress::{ProgressEvent, Status};
use vidscribe::server::{self, AppState};
use vidscribe::stt::RecognizerHandle;
use vidscribe::subtitle::to_subtitle_track;
use vidscribe::transcript::{TranscriptInput, TranscriptSnapshot};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    vidscribe::logging::init(cli.verbose, cli.quiet);
    tracing::debug!(
        version = %vidscribe::version_string(),
        backend = vidscribe::defaults::gpu_backend(),
        "starting"
    );

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Serve { ref bind } => {
            let mut config = load_config(&cli, &config_path)?;
            if let Some(bind) = bind {
                config.server.bind = bind.clone();
            }
            config.validate()?;
            let state = build_state(&config)?;
            server::serve(&config, state).await?;
        }
        Commands::Transcribe { ref url, format } => {
            let config = load_config(&cli, &config_path)?;
            run_transcribe(&config, url, format, cli.quiet).await?;
        }
        Commands::Render {
            ref url,
            ref transcript,
            ref output,
            burn,
        } => {
            let config = load_config(&cli, &config_path)?;
            let mode = if burn {
                SubtitleMode::Burned
            } else {
                config.subtitle.mode
            };
            run_render(&config, url, transcript, output, mode, cli.quiet).await?;
        }
        Commands::Models { ref action } => {
            handle_models_command(action, cli.quiet).await?;
        }
        Commands::Config { ref action } => {
            handle_config_command(action, &cli, &config_path)?;
        }
    }

    Ok(())
}

/// Load configuration with precedence: CLI flags, environment, file, defaults.
fn load_config(cli: &Cli, path: &Path) -> Result<Config> {
    let mut config = if cli.config.is_some() {
        Config::load(path)?
    } else {
        Config::load_or_default(path)?
    }
    .with_env_overrides();

    if let Some(model) = &cli.model {
        config.stt.model = model.clone();
    }
    if let Some(language) = &cli.language {
        config.stt.language = language.clone();
    }
    config.validate()?;
    Ok(config)
}

fn build_state(config: &Config) -> Result<AppState> {
    let recognizer = Arc::new(RecognizerHandle::from_config(&config.stt));
    AppState::from_config(config, recognizer).context("Failed to set up the work directory")
}

fn percent_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>14} [{bar:40.cyan/blue}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    bar
}

async fn run_transcribe(config: &Config, url: &str, format: OutputFormat, quiet: bool) -> Result<()> {
    let locator = SourceLocator::parse(url)?;
    let state = build_state(config)?;
    let mut events = state.pipeline.run(locator);

    let bar = percent_bar(quiet || format == OutputFormat::Events);
    let mut transcript: Option<TranscriptSnapshot> = None;

    while let Some(event) = events.next().await {
        if format == OutputFormat::Events {
            print!("{}", event.to_ndjson()?);
        }
        match event.status {
            Status::Started => {
                bar.set_message(event.stage.to_string());
                bar.set_position(0);
            }
            Status::InProgress => bar.set_position(u64::from(event.percent)),
            Status::Completed => bar.set_position(100),
            Status::Error => {
                bar.abandon();
                bail!(
                    "{} failed: {}",
                    event.stage,
                    event.message.unwrap_or_else(|| "unknown error".into())
                );
            }
            Status::Idle => {}
        }
        if event.is_terminal() {
            transcript = final_payload(event);
        }
    }
    bar.finish_and_clear();

    let Some(transcript) = transcript else {
        bail!("transcription ended without a result");
    };
    match format {
        OutputFormat::Text => println!("{}", transcript.text.trim()),
        OutputFormat::Srt => print!(
            "{}",
            to_subtitle_track(&transcript.segments, config.subtitle.default_duration_secs)
        ),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&transcript)?),
        OutputFormat::Events => {}
    }
    Ok(())
}

fn final_payload(event: ProgressEvent) -> Option<TranscriptSnapshot> {
    (event.status == Status::Completed).then(|| event.payload.unwrap_or_default())
}

async fn run_render(
    config: &Config,
    url: &str,
    transcript: &Path,
    output: &Path,
    mode: SubtitleMode,
    quiet: bool,
) -> Result<()> {
    let locator = SourceLocator::parse(url)?;
    let raw = std::fs::read(transcript)
        .with_context(|| format!("Failed to read transcript {}", transcript.display()))?;
    let segments = serde_json::from_slice::<TranscriptInput>(&raw)
        .with_context(|| format!("{} is not a transcript", transcript.display()))?
        .into_segments();

    let state = build_state(config)?;
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_message("rendering");
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let mut video = state.assembler.assemble(&locator, &segments, mode).await?;
    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;
    while let Some(chunk) = video.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    spinner.finish_and_clear();

    if !quiet {
        eprintln!("Wrote {}", output.display());
    }
    Ok(())
}

async fn handle_models_command(action: &ModelsAction, quiet: bool) -> Result<()> {
    match action {
        ModelsAction::List => {
            println!("Available models:");
            for model in list_models() {
                println!("  {}", format_model_info(model));
            }
            let extras: Vec<String> = list_installed_models()
                .into_iter()
                .filter(|name| list_models().iter().all(|m| m.name != name.as_str()))
                .collect();
            if !extras.is_empty() {
                println!();
                println!("Other installed models:");
                for name in extras {
                    println!("  {}", name);
                }
            }
        }
        ModelsAction::Install { name } => {
            let bar = if quiet {
                ProgressBar::hidden()
            } else {
                let bar = ProgressBar::new(0);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                bar
            };
            let path = download_model(name, &mut |received, total| {
                if let Some(total) = total {
                    bar.set_length(total);
                }
                bar.set_position(received);
            })
            .await?;
            bar.finish_and_clear();
            println!("Model '{}' installed at {}", name, path.display());
        }
    }
    Ok(())
}

fn handle_config_command(action: &ConfigAction, cli: &Cli, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(cli, path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }
    Ok(())
}
