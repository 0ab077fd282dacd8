//! DermaVision CLI
//!
//! Runs the skin lesion classification API, classifies single images from the
//! command line, and reports which model backend can be loaded.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use dermavision::config::{ModelConfig, ServerConfig};
use dermavision::backend::backend_name;
use dermavision::inference::{ConfidenceBand, InferenceMode, LesionClass, Predictor};
use dermavision::model::resolver::candidate_paths;
use dermavision::server::routes::predict::PredictResponse;
use dermavision::server::{create_router, AppState};
use dermavision::utils::logging::{init_logging, LogConfig, LogLevel};
use dermavision::utils::format_bytes;
use dermavision::{BackendHandle, DISCLAIMER};

/// DermaVision skin lesion classifier
///
/// Serves a benign/malignant classifier over HTTP, falling back to demo
/// predictions when no model artifact can be loaded.
#[derive(Parser, Debug)]
#[command(name = "dermavision")]
#[command(version)]
#[command(about = "Skin lesion classification API (research and education only)", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Plain log lines without colors, for log collectors
    #[arg(long, global = true, env = "DERMAVISION_PLAIN_LOGS", default_value = "false")]
    plain_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "DERMAVISION_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(flatten)]
    model: ModelArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Directory containing the model artifacts
    #[arg(long, global = true, env = "DERMAVISION_MODELS_DIR", default_value = "models")]
    models_dir: PathBuf,

    /// Compact (ONNX) artifact, overrides the path inside the models directory
    #[arg(long, global = true, env = "DERMAVISION_COMPACT_MODEL")]
    compact_model: Option<PathBuf>,

    /// Graph artifact, overrides the path inside the models directory
    #[arg(long, global = true, env = "DERMAVISION_GRAPH_MODEL")]
    graph_model: Option<PathBuf>,

    /// Where to fetch the real graph artifact when only a pointer file is present
    #[arg(long, global = true, env = "DERMAVISION_MODEL_URL")]
    model_url: Option<String>,

    /// Never download model artifacts
    #[arg(long, global = true, default_value = "false")]
    no_download: bool,

    /// Download timeout in seconds
    #[arg(long, global = true, env = "DERMAVISION_DOWNLOAD_TIMEOUT", default_value = "300")]
    download_timeout: u64,
}

impl ModelArgs {
    fn to_config(&self) -> ModelConfig {
        let mut config = ModelConfig::in_dir(&self.models_dir);
        config.download_timeout_secs = self.download_timeout;

        if let Some(path) = &self.compact_model {
            config.compact_path = path.clone();
        }
        if let Some(path) = &self.graph_model {
            config.graph_path = path.clone();
        }
        if let Some(url) = &self.model_url {
            config.download_url = Some(url.clone());
        }
        if self.no_download {
            config.download_url = None;
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, env = "DERMAVISION_HOST", default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(short, long, env = "DERMAVISION_PORT", default_value = "8000")]
        port: u16,

        /// Maximum upload size in bytes
        #[arg(long, env = "DERMAVISION_MAX_UPLOAD_BYTES", default_value = "10485760")]
        max_upload_bytes: usize,
    },

    /// Classify a single image file
    Predict {
        /// Path to the image (JPG, PNG or WebP)
        #[arg(short, long)]
        image: PathBuf,

        /// Print the API response as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Resolve the model backend once and report the result
    CheckModels,
}

/// Logging preset picked by the global flags; `--log-level` wins over the preset level
fn log_config(cli: &Cli) -> LogConfig {
    let config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else if cli.plain_logs {
        LogConfig::production()
    } else {
        LogConfig::default()
    };
    match &cli.log_level {
        Some(level) => config.with_level(LogLevel::parse(level)),
        None => config,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&log_config(&cli)).map_err(anyhow::Error::msg)?;

    let model_config = cli.model.to_config();

    match cli.command {
        Commands::Serve {
            host,
            port,
            max_upload_bytes,
        } => {
            let config = ServerConfig {
                host,
                port,
                max_upload_bytes,
                model: model_config,
            };
            cmd_serve(config).await?;
        }

        Commands::Predict { image, json } => {
            cmd_predict(model_config, &image, json).await?;
        }

        Commands::CheckModels => {
            cmd_check_models(model_config).await?;
        }
    }

    Ok(())
}

async fn cmd_serve(config: ServerConfig) -> Result<()> {
    config.validate()?;

    info!("DermaVision API v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Compact model: {}", config.model.compact_path.display());
    info!("  Graph model:   {}", config.model.graph_path.display());
    info!("  Graph runtime: {}", backend_name());
    match &config.model.download_url {
        Some(url) => info!("  Model URL:     {}", url),
        None => info!("  Model URL:     (downloads disabled)"),
    }
    info!("  Upload limit:  {}", format_bytes(config.max_upload_bytes as u64));
    info!("  Model loading: lazy, on first prediction");
    info!("  CORS:          any origin");

    let predictor = Predictor::from_config(config.model.clone())?;
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;

    let state = Arc::new(AppState::new(config, predictor));
    let app = create_router(state);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn cmd_predict(config: ModelConfig, image: &Path, json: bool) -> Result<()> {
    let bytes = std::fs::read(image)
        .with_context(|| format!("failed to read {}", image.display()))?;

    let predictor = Predictor::from_config(config)?;
    let result = predictor.predict(bytes).await?;

    if json {
        let response = PredictResponse::from_result(&result);
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let class = match result.predicted_class {
        LesionClass::Benign => result.predicted_class.name().green().bold(),
        LesionClass::Malignant => result.predicted_class.name().red().bold(),
    };
    let band = match result.confidence_band {
        ConfidenceBand::High => result.confidence_band.to_string().green(),
        ConfidenceBand::Medium => result.confidence_band.to_string().yellow(),
        ConfidenceBand::Low => result.confidence_band.to_string().red(),
    };

    println!("{}", "Prediction:".cyan().bold());
    println!("  Image:      {}", image.display());
    println!("  Class:      {}", class);
    println!(
        "  Confidence: {:.2}% ({})",
        result.confidence as f64 * 100.0,
        band
    );
    println!(
        "  Benign:     {:.4}   Malignant: {:.4}",
        result.probabilities.benign, result.probabilities.malignant
    );
    println!("  Time:       {:.2} ms", result.inference_time_ms);
    if !result.is_high_confidence() {
        println!(
            "  {}",
            "Confidence is below the High band; treat this result with extra caution".yellow()
        );
    }
    if result.mode == InferenceMode::Demo {
        println!("  Mode:       {}", "demo (no model loaded)".yellow());
    } else {
        println!("  Mode:       {}", result.mode);
    }
    println!();
    println!("{}", DISCLAIMER.dimmed());

    Ok(())
}

async fn cmd_check_models(config: ModelConfig) -> Result<()> {
    println!("{}", "Model artifacts:".cyan().bold());
    for path in candidate_paths(&config) {
        let status = match std::fs::metadata(&path) {
            Ok(meta) => format_bytes(meta.len()).green(),
            Err(_) => "missing".red(),
        };
        println!("  {}  {}", path.display(), status);
    }
    println!("  Graph runtime: {}", backend_name());
    println!();

    let predictor = Predictor::from_config(config)?;
    let handle = predictor.warm_up().await;

    match &handle {
        BackendHandle::Unavailable => println!(
            "{} {}",
            "No model loaded:".yellow().bold(),
            "predictions will run in demo mode"
        ),
        loaded => println!(
            "{} {} [{}]",
            "Loaded:".green().bold(),
            loaded.describe(),
            loaded.mode()
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("dermavision").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_log_flags() {
        assert_eq!(log_config(&parse(&["check-models"])).level, LogLevel::Info);
        assert_eq!(log_config(&parse(&["-q", "check-models"])).level, LogLevel::Error);
        assert_eq!(log_config(&parse(&["-v", "check-models"])).level, LogLevel::Debug);

        let plain = log_config(&parse(&["--plain-logs", "serve"]));
        assert!(!plain.ansi_colors);
        assert_eq!(plain.level, LogLevel::Info);

        let overridden = log_config(&parse(&["--quiet", "--log-level", "warn", "check-models"]));
        assert_eq!(overridden.level, LogLevel::Warn);

        assert!(Cli::try_parse_from(["dermavision", "-q", "-v", "check-models"]).is_err());
    }

    #[test]
    fn test_model_args() {
        let cli = parse(&["--models-dir", "/srv/models", "--no-download", "check-models"]);
        let config = cli.model.to_config();
        assert!(config.graph_path.starts_with("/srv/models"));
        assert!(config.download_url.is_none());
    }
}
