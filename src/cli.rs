//! Command-line interface for vidscribe
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Transcribe remote videos and render subtitled copies
#[derive(Parser, Debug)]
#[command(name = "vidscribe", version, about = "Transcribe remote videos and render subtitled copies")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Whisper model name (overrides stt.model)
    #[arg(long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Language code for transcription. Examples: auto, en, de, es, fr
    #[arg(long, global = true, value_name = "LANG")]
    pub language: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Listen address (overrides server.bind)
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Transcribe a video and print the result
    Transcribe {
        /// Video page or media URL
        url: String,

        /// Output format
        #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Render a copy of a video with subtitles
    Render {
        /// Video page or media URL
        url: String,

        /// Transcript JSON (a segment list or a transcription snapshot)
        #[arg(long, short = 't', value_name = "FILE")]
        transcript: PathBuf,

        /// Where to write the MP4
        #[arg(long, short = 'o', value_name = "FILE")]
        output: PathBuf,

        /// Burn the subtitles into the picture instead of adding a track
        #[arg(long)]
        burn: bool,
    },

    /// Manage Whisper models
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// What `transcribe` prints on stdout.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain transcript text
    Text,
    /// SubRip subtitles
    Srt,
    /// Final transcription snapshot as JSON
    Json,
    /// Every progress event as NDJSON, as served by /transcribe
    Events,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// List catalog and installed models
    List,
    /// Download and install a model
    Install {
        /// Model name (e.g., base, small.en, large-v3-turbo)
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["vidscribe", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { bind: None }));
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_serve_bind() {
        let cli = Cli::try_parse_from(["vidscribe", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        match cli.command {
            Commands::Serve { bind } => assert_eq!(bind.as_deref(), Some("0.0.0.0:9000")),
            other => panic!("Expected Serve, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_verbose_repeated_flags() {
        let cli = Cli::try_parse_from(["vidscribe", "-v", "-v", "serve"]).unwrap();
        assert_eq!(cli.verbose, 2);
        let cli = Cli::try_parse_from(["vidscribe", "serve", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_transcribe_format() {
        let cli = Cli::try_parse_from([
            "vidscribe",
            "transcribe",
            "https://example.com/v",
            "--format",
            "srt",
            "--model",
            "tiny",
        ])
        .unwrap();
        assert_eq!(cli.model.as_deref(), Some("tiny"));
        match cli.command {
            Commands::Transcribe { url, format } => {
                assert_eq!(url, "https://example.com/v");
                assert_eq!(format, OutputFormat::Srt);
            }
            other => panic!("Expected Transcribe, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_transcribe_default_format_is_text() {
        let cli = Cli::try_parse_from(["vidscribe", "transcribe", "https://e.com/v"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Transcribe {
                format: OutputFormat::Text,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_render() {
        let cli = Cli::try_parse_from([
            "vidscribe",
            "render",
            "https://e.com/v",
            "--transcript",
            "t.json",
            "-o",
            "out.mp4",
            "--burn",
        ])
        .unwrap();
        match cli.command {
            Commands::Render {
                transcript,
                output,
                burn,
                ..
            } => {
                assert_eq!(transcript, PathBuf::from("t.json"));
                assert_eq!(output, PathBuf::from("out.mp4"));
                assert!(burn);
            }
            other => panic!("Expected Render, got {:?}", other),
        }
    }

    #[test]
    fn test_render_requires_output() {
        assert!(Cli::try_parse_from(["vidscribe", "render", "u", "--transcript", "t.json"]).is_err());
    }

    #[test]
    fn test_parse_models_install() {
        let cli = Cli::try_parse_from(["vidscribe", "models", "install", "base.en"]).unwrap();
        match cli.command {
            Commands::Models {
                action: ModelsAction::Install { name },
            } => assert_eq!(name, "base.en"),
            other => panic!("Expected Models Install, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_path_with_global_config() {
        let cli =
            Cli::try_parse_from(["vidscribe", "config", "path", "--config", "/tmp/c.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Path
            }
        ));
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["vidscribe"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
