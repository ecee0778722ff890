use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fracture_triage::cli::{Args, Command};
use fracture_triage::evaluate::evaluate;
use fracture_triage::pipeline::PredictionPipeline;
use fracture_triage::preprocess::ImageRef;
use fracture_triage::service::FractureService;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.engine_config().context("invalid configuration")?;
    info!(weights = %config.weights_dir.display(), cache = %config.cache_path.display(), "starting");
    let pipeline = PredictionPipeline::from_config(config).context("failed to build pipeline")?;

    match args.command {
        Command::Part { image } => {
            let service = FractureService::new(pipeline, 1);
            let part = service.classify_part(ImageRef::path(image)).await?;
            print_json(&serde_json::json!({ "part": part }))?;
        }
        Command::Fracture { image, part } => {
            let service = FractureService::new(pipeline, 1);
            let image = ImageRef::path(image);
            let part = match part {
                Some(part) => part,
                None => service.classify_part(image.clone()).await?,
            };
            let result = service.classify_fracture(image, part).await?;
            print_json(&result)?;
        }
        Command::Analyze { images, workers } => {
            let service = FractureService::new(pipeline, workers);
            let paths = images.clone();
            let results = service
                .analyze_many(images.into_iter().map(ImageRef::path).collect())
                .await;
            let mut failures = 0;
            for (path, result) in paths.iter().zip(results) {
                match result {
                    Ok(result) => print_json(&result)?,
                    Err(e) => {
                        failures += 1;
                        error!(path = %path.display(), error = %e, "analysis failed");
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} of {} images failed", paths.len());
            }
        }
        Command::Evaluate { root } => {
            let report = tokio::task::spawn_blocking(move || evaluate(&pipeline, &root)).await??;
            print_json(&serde_json::json!({
                "total": report.total,
                "failed": report.failed,
                "part_accuracy": report.part_accuracy(),
                "status_accuracy": report.status_accuracy(),
            }))?;
        }
    }

    Ok(())
}
