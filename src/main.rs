//! CycleGAN for Unpaired Image-to-Image Translation
//!
//! Main entry point providing CLI interface for:
//! - Training a single run
//! - Sweeping a grid of hyperparameters
//! - Writing a default configuration file
//! - Resizing an image folder ahead of training

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rust_cyclegan::{
    data::resize_directory,
    training::{run_sweep, train_from_params, FailurePolicy, SweepGrid},
    utils::{HyperParameterConfig, HyperParameters},
};

/// CycleGAN trainer for unpaired image-to-image translation
#[derive(Parser)]
#[command(name = "cyclegan")]
#[command(version = "0.1.0")]
#[command(about = "Train CycleGAN models translating between two image domains")]
struct Cli {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbosity level
    #[arg(short, long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train one model
    Train {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Train one model per point of a hyperparameter grid
    Sweep {
        #[command(flatten)]
        overrides: Overrides,

        /// Total epoch counts to sweep
        #[arg(long, value_delimiter = ',', default_values_t = vec![200, 300])]
        num_epochs: Vec<usize>,

        /// Learning rates to sweep
        #[arg(long, value_delimiter = ',', default_values_t = vec![2e-4, 1e-4])]
        learning_rates: Vec<f64>,

        /// Decay start epochs to sweep
        #[arg(long, value_delimiter = ',', default_values_t = vec![100])]
        decay_epochs: Vec<usize>,

        /// Residual block counts to sweep
        #[arg(long, value_delimiter = ',', default_values_t = vec![9, 5, 3])]
        residual_blocks: Vec<usize>,

        /// Go on with the remaining points when one fails
        #[arg(long)]
        keep_going: bool,
    },

    /// Initialize default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },

    /// Resize every image in a directory to a square
    Preprocess {
        /// Directory of source images
        #[arg(short, long)]
        input: PathBuf,

        /// Side length of the resized images
        #[arg(short, long, default_value = "32")]
        size: i64,

        /// Output directory, defaults to `{input}_{size}`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Command-line overrides of configuration file values
#[derive(Args, Default)]
struct Overrides {
    /// Dataset name under the data root
    #[arg(long)]
    dataset_name: Option<String>,

    /// Root directory of the datasets
    #[arg(long)]
    data_root: Option<String>,

    /// Number of epochs of training
    #[arg(long)]
    n_epochs: Option<usize>,

    /// Epoch to start training from
    #[arg(long)]
    epoch: Option<usize>,

    /// Epoch from which to start lr decay
    #[arg(long)]
    decay_epoch: Option<usize>,

    /// Adam learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Size of the batches
    #[arg(long)]
    batch_size: Option<usize>,

    /// Number of residual blocks in the generators
    #[arg(long)]
    n_residual_blocks: Option<usize>,

    /// Image height
    #[arg(long)]
    img_height: Option<i64>,

    /// Image width
    #[arg(long)]
    img_width: Option<i64>,

    /// Number of image channels
    #[arg(long)]
    channels: Option<i64>,

    /// Cycle loss weight
    #[arg(long)]
    lambda_cyc: Option<f64>,

    /// Identity loss weight
    #[arg(long)]
    lambda_id: Option<f64>,

    /// Interval between saving generator samples, in batches
    #[arg(long)]
    sample_interval: Option<usize>,

    /// Interval between model checkpoints, in epochs (-1 disables)
    #[arg(long, allow_hyphen_values = true)]
    checkpoint_interval: Option<i64>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Device: cpu, cuda or auto
    #[arg(long)]
    device: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut HyperParameterConfig) {
        if let Some(v) = self.dataset_name {
            config.dataset_name = v;
        }
        if let Some(v) = self.data_root {
            config.data_root = v;
        }
        if let Some(v) = self.n_epochs {
            config.total_epochs = v;
        }
        if let Some(v) = self.epoch {
            config.start_epoch = v;
        }
        if let Some(v) = self.decay_epoch {
            config.decay_epoch = v;
        }
        if let Some(v) = self.lr {
            config.learning_rate = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.n_residual_blocks {
            config.residual_blocks = v;
        }
        if let Some(v) = self.img_height {
            config.img_height = v;
        }
        if let Some(v) = self.img_width {
            config.img_width = v;
        }
        if let Some(v) = self.channels {
            config.channels = v;
        }
        if let Some(v) = self.lambda_cyc {
            config.lambda_cycle = v;
        }
        if let Some(v) = self.lambda_id {
            config.lambda_identity = v;
        }
        if let Some(v) = self.sample_interval {
            config.sample_interval = v;
        }
        if let Some(v) = self.checkpoint_interval {
            config.checkpoint_interval = v;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(v) = self.device {
            config.device = v;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Train { overrides } => {
            train(cli.config.as_deref(), overrides)?;
        }
        Commands::Sweep {
            overrides,
            num_epochs,
            learning_rates,
            decay_epochs,
            residual_blocks,
            keep_going,
        } => {
            let grid = SweepGrid {
                num_epochs,
                learning_rates,
                decay_epochs,
                residual_blocks,
            };
            sweep(cli.config.as_deref(), overrides, grid, keep_going)?;
        }
        Commands::Init { output } => {
            init_config(&output)?;
        }
        Commands::Preprocess { input, size, output } => {
            preprocess(&input, size, output)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>, overrides: Overrides) -> Result<HyperParameterConfig> {
    let mut config = HyperParameterConfig::load_or_default(path)?;
    overrides.apply(&mut config);
    Ok(config)
}

/// Train a single model
fn train(config_path: Option<&str>, overrides: Overrides) -> Result<()> {
    let params = HyperParameters::new(load_config(config_path, overrides)?)?;
    let run_id = params.run_id().to_string();

    let metrics = train_from_params(params)?;

    info!(
        "Run {} complete. Final G_loss: {:.4}, D_loss: {:.4}",
        run_id,
        metrics.latest_gen_loss().unwrap_or(0.0),
        metrics.latest_disc_loss().unwrap_or(0.0)
    );
    Ok(())
}

/// Train every point of the grid
fn sweep(config_path: Option<&str>, overrides: Overrides, grid: SweepGrid, keep_going: bool) -> Result<()> {
    let base = load_config(config_path, overrides)?;
    let policy = if keep_going {
        FailurePolicy::Continue
    } else {
        FailurePolicy::Abort
    };

    info!("Sweeping {} hyperparameter combinations", grid.len());
    let outcomes = run_sweep(&base, &grid, policy, train_from_params);

    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.is_ok())
        .map(|o| o.run_id.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("{} sweep point(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

/// Initialize default configuration file
fn init_config(output_path: &str) -> Result<()> {
    let config = HyperParameterConfig::default();
    config.save(output_path)?;

    info!("Created default configuration at {}", output_path);
    Ok(())
}

/// Resize a directory of images
fn preprocess(input: &Path, size: i64, output: Option<PathBuf>) -> Result<()> {
    if size <= 0 {
        bail!("size must be > 0, got {}", size);
    }
    let output = output.unwrap_or_else(|| {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        input.with_file_name(format!("{}_{}", name, size))
    });

    let count = resize_directory(input, &output, size)?;
    info!("Wrote {} images to {}", count, output.display());
    Ok(())
}
