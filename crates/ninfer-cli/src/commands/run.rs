//! Run command - infer a model over a dataset and save the result archive.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use ninfer_core::{InferenceService, TensorSpec};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Model file (.onnx or .tflite)
    #[arg(required = true)]
    model: PathBuf,

    /// Dataset file (.npy or .npz)
    #[arg(required = true)]
    dataset: PathBuf,

    /// Threads for the backend runtime (overrides the config file)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Where to copy the result archive
    #[arg(short, long, default_value = "archive.zip")]
    output: PathBuf,
}

pub async fn run(args: RunArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = super::config::load(config_path)?;
    if let Some(threads) = args.threads {
        config = config.with_num_threads(threads);
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(format!("Running {}", args.model.display()));

    let output = args.output.clone();
    let task = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<TensorSpec>> {
        let mut service = InferenceService::with_config(&args.model, &args.dataset, &config)?;
        service.run()?;
        service.copy_archive_to(&output)?;

        let outputs = service.model().output_specs().to_vec();
        service.close()?;
        Ok(outputs)
    })
    .await;

    pb.finish_and_clear();
    let summary = task??;

    info!("Archive copied to {}", args.output.display());

    println!(
        "{} Archive written to {}",
        style("✓").green(),
        args.output.display()
    );
    for spec in &summary {
        println!("  {}", style(spec).cyan());
    }
    println!(
        "{} Completed in {:.2}s",
        style("ℹ").blue(),
        start.elapsed().as_secs_f64()
    );

    Ok(())
}
