//! Inspect command - show a model's tensor signatures.

use std::path::PathBuf;

use clap::Args;
use console::style;
use serde_json::{json, Value};

use ninfer_core::{ModelDispatcher, TensorSpec};

/// Arguments for the inspect command.
#[derive(Args)]
pub struct InspectArgs {
    /// Model file (.onnx or .tflite)
    #[arg(required = true)]
    model: PathBuf,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

pub async fn run(args: InspectArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = super::config::load(config_path)?;
    let model = ModelDispatcher::new(config.runtime.num_threads).select(&args.model)?;

    if args.json {
        let report = json!({
            "path": model.path().display().to_string(),
            "format": model.format().to_string(),
            "inputs": specs_json(model.input_specs()),
            "outputs": specs_json(model.output_specs()),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{} {}", style("Model:").bold(), model.path().display());
    println!("{} {}", style("Format:").bold(), model.format());
    print_specs("Inputs", model.input_specs());
    print_specs("Outputs", model.output_specs());

    Ok(())
}

fn print_specs(title: &str, specs: &[TensorSpec]) {
    println!();
    println!("{} ({})", style(title).bold(), specs.len());
    for spec in specs {
        println!("  {}", spec);
    }
}

/// Dynamic dimensions are reported as `null`.
fn specs_json(specs: &[TensorSpec]) -> Value {
    specs
        .iter()
        .map(|spec| {
            json!({
                "name": spec.name,
                "dtype": spec.dtype.as_str(),
                "shape": spec.shape,
            })
        })
        .collect()
}
