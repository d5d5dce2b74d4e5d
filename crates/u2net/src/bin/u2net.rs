use std::{path::PathBuf, process::ExitCode};

use anyhow::{anyhow, Context, Result};
use burn::config::Config as _;
use clap::{ArgAction, Parser, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use u2net::{
    burn_backend_types::{InferenceBackend, InferenceDevice, NAME},
    model::U2NetVariant,
    output::{deliver, ErrorReport, OutputTarget},
    BackgroundRemover, Fidelity, Method, RemovalConfig,
};

#[derive(Parser, Debug)]
#[command(name = "u2net", version)]
#[command(about = "Remove the background of an image with U²-Net or rembg")]
struct Cli {
    /// Input image
    input: Option<PathBuf>,

    /// Output PNG. Without it the result is printed as a base64 data URL
    output: Option<PathBuf>,

    /// Segmentation method
    #[arg(value_enum, default_value_t = Method::Auto)]
    method: Method,

    /// Weight file (.pth, .mpk or .bin)
    #[arg(long, env = "U2NET_WEIGHTS")]
    weights: Option<PathBuf>,

    /// Network variant
    #[arg(long, value_enum)]
    variant: Option<VariantArg>,

    /// Input resolution and normalization
    #[arg(long, value_enum)]
    fidelity: Option<FidelityArg>,

    /// Trimap background threshold
    #[arg(long)]
    low_threshold: Option<f32>,

    /// Trimap foreground threshold
    #[arg(long)]
    high_threshold: Option<f32>,

    /// rembg executable
    #[arg(long)]
    rembg_program: Option<String>,

    /// JSON removal configuration. Flags given explicitly override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip imageproc-backed morphology and bilateral filtering
    #[arg(long)]
    basic_refinement: bool,

    /// Log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VariantArg {
    Full,
    Lite,
}

impl From<VariantArg> for U2NetVariant {
    fn from(variant: VariantArg) -> Self {
        match variant {
            VariantArg::Full => Self::Full,
            VariantArg::Lite => Self::Lite,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FidelityArg {
    Fast,
    High,
}

impl From<FidelityArg> for Fidelity {
    fn from(fidelity: FidelityArg) -> Self {
        match fidelity {
            FidelityArg::Fast => Self::Fast,
            FidelityArg::High => Self::High,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // The network graph is deep; small default stacks (Windows) overflow.
    match stacker::grow(4096 * 1024, || run(&cli)) {
        Ok(report) => {
            println!("{report}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e:#}");
            let report = ErrorReport {
                error: format!("{e:#}"),
            };
            match serde_json::to_string(&report) {
                Ok(json) => println!("{json}"),
                Err(_) => println!(r#"{{"error":"unreportable failure"}}"#),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<String> {
    let input = cli.input.as_deref().context("no input image provided")?;
    let config = build_config(cli)?;

    let device = InferenceDevice::default();
    tracing::info!(backend = NAME, ?device, "using backend");

    let mut remover = BackgroundRemover::<InferenceBackend>::new(config, device)?;
    let removal = remover.remove(input, cli.method)?;

    let target = OutputTarget::from(cli.output.clone());
    let report = deliver(&removal, &target)?;

    Ok(serde_json::to_string(&report)?)
}

fn build_config(cli: &Cli) -> Result<RemovalConfig> {
    let mut config = match &cli.config {
        Some(path) => RemovalConfig::load(path).map_err(|e| {
            anyhow!("failed to read configuration '{}': {e:?}", path.display())
        })?,
        None => RemovalConfig::new(),
    };

    if let Some(weights) = &cli.weights {
        config.weights = Some(weights.clone());
    }
    if let Some(variant) = cli.variant {
        config.variant = variant.into();
    }
    if let Some(fidelity) = cli.fidelity {
        config.fidelity = fidelity.into();
    }
    if let Some(low) = cli.low_threshold {
        config.matting.low_threshold = low;
    }
    if let Some(high) = cli.high_threshold {
        config.matting.high_threshold = high;
    }
    if let Some(program) = &cli.rembg_program {
        config.external.program.clone_from(program);
    }
    config.basic_refinement |= cli.basic_refinement;

    Ok(config)
}
