use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sl_data::{DatasetLoader, SweepStorage, TrialLedger};
use sl_engine::{CommandTrainer, StopSignal, SweepController, TopKRetrainer, Trainer};
use sl_monitor::{LogNotifier, Notifier, TelegramNotifier};
use sl_types::{Dataset, SweepConfig};

#[derive(Parser)]
#[command(name = "sweepline", version, about = "Hyperparameter sweep orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hyperparameter sweep until interrupted or out of budget.
    Sweep {
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
        /// Log notifications instead of sending them to Telegram.
        #[arg(long)]
        no_notify: bool,
    },
    /// Retrain the best ledger trials with an extended budget.
    TopK {
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
        /// Number of trials to retrain; defaults to top_k.k.
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        no_notify: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Sweep { config, no_notify } => run_sweep(&config, no_notify).await,
        Commands::TopK {
            config,
            k,
            no_notify,
        } => run_top_k(&config, k, no_notify).await,
    }
}

fn load_config(path: &Path) -> Result<SweepConfig> {
    SweepConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn notifier(no_notify: bool) -> Result<Arc<dyn Notifier>> {
    if no_notify {
        return Ok(Arc::new(LogNotifier));
    }
    let telegram = TelegramNotifier::from_env().context("notifications enabled")?;
    Ok(Arc::new(telegram))
}

fn trainer(config: &SweepConfig) -> Result<Arc<dyn Trainer>> {
    let scratch = config.results_dir.join("scratch");
    let trainer = CommandTrainer::from_settings(&config.trainer, scratch)?;
    Ok(Arc::new(trainer))
}

fn load_datasets(config: &SweepConfig) -> Result<(Dataset, Dataset)> {
    let loader = DatasetLoader::new();
    let train = loader
        .load(&config.train_path, &config.feature_columns, &config.label_column)
        .with_context(|| format!("loading {}", config.train_path.display()))?;
    let val = loader
        .load(&config.val_path, &config.feature_columns, &config.label_column)
        .with_context(|| format!("loading {}", config.val_path.display()))?;
    info!("Loaded {} training and {} validation rows", train.len(), val.len());
    Ok((train, val))
}

async fn run_sweep(path: &Path, no_notify: bool) -> Result<()> {
    let config = load_config(path)?;
    let notifier = notifier(no_notify)?;
    let trainer = trainer(&config)?;
    let (train, val) = load_datasets(&config)?;
    let storage = SweepStorage::open(&config)?;

    let stop = StopSignal::new();
    stop.install_ctrl_c();
    let mut controller =
        SweepController::new(&config, storage, trainer, notifier).with_stop_signal(stop);
    let summary = controller.run(&train, &val).await?;
    info!(
        "Sweep ended ({:?}) with best score {}",
        summary.exit,
        summary.state.describe_best()
    );
    Ok(())
}

async fn run_top_k(path: &Path, k: Option<usize>, no_notify: bool) -> Result<()> {
    let config = load_config(path)?;
    let notifier = notifier(no_notify)?;
    let trainer = trainer(&config)?;
    let (train, val) = load_datasets(&config)?;
    let ledger = TrialLedger::open(config.ledger_path())?;

    let k = k.unwrap_or(config.top_k.k);
    let retrainer = TopKRetrainer::new(trainer, notifier, config.top_k.clone())?;
    let summary = retrainer.run(&ledger, &train, &val, k).await?;
    info!(
        "Exported {} models to {} ({} failed)",
        summary.exported.len(),
        retrainer.output_dir().display(),
        summary.failed.len()
    );
    Ok(())
}
