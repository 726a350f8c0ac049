//! CLI Entry Point for rust-framer
//!
//! Provides command-line access to:
//! - Streaming a file or stdin through a frame reader and a parse script
//! - Offline script validation
//! - Checksum calculation
//! - Starter script templates
//!
//! # Usage
//!
//! Frame a log of `$...;` records with a CRC-16 trailer and parse them with a
//! custom script:
//! ```bash
//! RUST_FRAMER_READER__FRAME_DETECTION=start-and-end \
//! RUST_FRAMER_READER__START_SEQUENCE='$' \
//! RUST_FRAMER_READER__FINISH_SEQUENCE=';' \
//! RUST_FRAMER_READER__CHECKSUM_ALGORITHM=crc16 \
//!     rust-framer run --input capture.bin --script sensors.rhai
//! ```
//!
//! Print a starter script:
//! ```bash
//! rust-framer template json > sensors.rhai
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_framer::config::Settings;
use rust_framer::events::{ConsoleLevel, TransformerEvent};
use rust_framer::logging;
use rust_framer::parsing::{checksum, FrameReader};
use rust_framer::scripting::{FrameTransformer, ScriptTemplate};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "rust-framer")]
#[command(about = "Frame byte streams and parse them with sandboxed scripts", long_about = None)]
struct Cli {
    /// Settings file (defaults to config/framer.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream input through the reader and the parse script, one JSON line per frame
    Run {
        /// Input file, or `-` for stdin
        #[arg(long, default_value = "-")]
        input: String,

        /// Script file defining `parse(frame)`
        #[arg(long)]
        script: Option<PathBuf>,

        /// Bytes delivered to the reader at a time
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Check a script's syntax and `parse` signature without running frames
    Validate {
        /// Path to .rhai script file
        script: PathBuf,
    },

    /// Print the checksum of a file or stdin in hex
    Checksum {
        /// Algorithm name (e.g. crc16, CRC-32, sha256)
        algorithm: String,

        /// Input file, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },

    /// Print a starter script
    Template {
        /// csv, json or fixed-width
        name: String,
    },

    /// Print the effective settings as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("loading settings")?;
    settings.validate().context("validating settings")?;
    logging::init_from_settings(&settings)?;

    match cli.command {
        Commands::Run {
            input,
            script,
            chunk_size,
        } => run_pipeline(settings, &input, script, chunk_size).await,
        Commands::Validate { script } => validate_script(&settings, &script).await,
        Commands::Checksum { algorithm, input } => print_checksum(&algorithm, &input).await,
        Commands::Template { name } => {
            let template: ScriptTemplate = name.parse()?;
            print!("{}", template.source());
            Ok(())
        }
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
    }
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if input == "-" {
        Ok(Box::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(input)
            .await
            .with_context(|| format!("opening {}", input))?;
        Ok(Box::new(file))
    }
}

async fn run_pipeline(
    mut settings: Settings,
    input: &str,
    script: Option<PathBuf>,
    chunk_size: Option<usize>,
) -> Result<()> {
    if let Some(path) = script {
        settings.pipeline.script_path = Some(path);
    }
    if let Some(size) = chunk_size {
        settings.pipeline.chunk_size = size;
    }
    if settings.pipeline.chunk_size == 0 {
        bail!("chunk size must be greater than zero");
    }

    let mut transformer = FrameTransformer::new(settings.script);
    let console = forward_console(transformer.subscribe());

    if let Some(path) = &settings.pipeline.script_path {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading script {}", path.display()))?;
        transformer
            .load_script(&source)
            .with_context(|| format!("loading script {}", path.display()))?;
    }

    let mut reader = FrameReader::new(settings.reader.clone());
    let decoder = settings.pipeline.decoder;
    info!(
        mode = ?settings.reader.operation_mode,
        detection = ?settings.reader.frame_detection,
        decoder = %decoder,
        "Framing input"
    );

    let mut source = open_input(input).await?;
    let mut stdout = tokio::io::stdout();
    let mut chunk = vec![0u8; settings.pipeline.chunk_size];

    loop {
        let n = source.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        reader.process_data_async(&chunk[..n]).await;

        let frames = reader.dequeue_all();
        if frames.is_empty() {
            continue;
        }
        let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        let (returned, results) = transformer
            .parse_frames_blocking(frames, decoder)
            .await?;
        transformer = returned;

        for (sequence, result) in sequences.into_iter().zip(results) {
            let line = if result.success {
                json!({ "sequence": sequence, "datasets": result.datasets })
            } else {
                json!({ "sequence": sequence, "error": result.error })
            };
            stdout.write_all(format!("{}\n", line).as_bytes()).await?;
        }
    }
    stdout.flush().await?;

    let stats = reader.stats();
    info!(
        bytes = stats.bytes_received,
        frames = stats.frames_extracted,
        checksum_failures = stats.checksum_failures,
        discarded = stats.frames_discarded,
        evicted = stats.frames_evicted,
        parse_failures = transformer.stats().parse_failures,
        "Input exhausted"
    );

    transformer.destroy();
    reader.destroy();
    let _ = console.await;
    Ok(())
}

fn forward_console(
    mut events: tokio::sync::mpsc::UnboundedReceiver<TransformerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransformerEvent::Console { level, message } => match level {
                    ConsoleLevel::Error => error!(target: "script", "{}", message),
                    ConsoleLevel::Warn => warn!(target: "script", "{}", message),
                    ConsoleLevel::Debug => debug!(target: "script", "{}", message),
                    ConsoleLevel::Log | ConsoleLevel::Info => info!(target: "script", "{}", message),
                },
                TransformerEvent::Warning(message) => warn!(target: "script", "{}", message),
                _ => {}
            }
        }
    })
}

async fn validate_script(settings: &Settings, path: &Path) -> Result<()> {
    let source = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading script {}", path.display()))?;

    let transformer = FrameTransformer::new(settings.script);
    match transformer.validate_syntax(&source) {
        Ok(()) => {
            println!("{}: ok", path.display());
            Ok(())
        }
        Err(e) => bail!("{}: {}", path.display(), e),
    }
}

async fn print_checksum(algorithm: &str, input: &str) -> Result<()> {
    let mut data = Vec::new();
    open_input(input).await?.read_to_end(&mut data).await?;
    let digest = checksum::calculate(algorithm, &data)?;
    println!("{}", hex::encode(digest));
    Ok(())
}
