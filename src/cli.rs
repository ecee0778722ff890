use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::mapping::{load_class_mapping, BodyPart};

#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// directory holding the ONNX weights
    #[arg(long, global = true, default_value = "weights")]
    pub weights: PathBuf,

    /// SQLite result cache
    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    /// Grad-CAM overlay directory, next to the image when omitted
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,

    #[arg(long, global = true)]
    pub cuda: bool,

    /// models kept loaded at once
    #[arg(long, global = true, default_value_t = 1)]
    pub residency_cap: usize,

    /// per-request deadline
    #[arg(long, global = true, default_value_t = 120)]
    pub timeout_secs: u64,

    /// ignore filename keywords
    #[arg(long, global = true)]
    pub no_heuristics: bool,

    /// part classifier labels, one per line
    #[arg(long, global = true)]
    pub labels: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Classify the body part of a radiograph
    Part { image: PathBuf },

    /// Fracture verdict, classifying the part first unless given
    Fracture {
        image: PathBuf,
        #[arg(long)]
        part: Option<BodyPart>,
    },

    /// Part and fracture classification in one go
    Analyze {
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// concurrent requests
        #[arg(long, default_value_t = 2)]
        workers: usize,
    },

    /// Accuracy over <root>/<Part>/<fractured|normal>/<image>
    Evaluate { root: PathBuf },
}

impl Args {
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::default().with_weights_dir(&self.weights);
        if let Some(cache) = &self.cache {
            config = config.with_cache_path(cache);
        }
        if let Some(labels) = &self.labels {
            config.part_classes = load_class_mapping(labels)?;
        }
        config.output_dir = self.output.clone();
        config.use_cuda = self.cuda;
        config.residency_cap = self.residency_cap.max(1);
        config.deadline = Duration::from_secs(self.timeout_secs);
        config.heuristic_corroboration = !self.no_heuristics;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_reach_config() {
        let args = Args::try_parse_from([
            "fracture-triage",
            "fracture",
            "x.png",
            "--part",
            "Wrist",
            "--no-heuristics",
            "--timeout-secs",
            "5",
        ])
        .unwrap();
        let config = args.engine_config().unwrap();
        assert!(!config.heuristic_corroboration);
        assert_eq!(config.deadline, Duration::from_secs(5));
        match args.command {
            Command::Fracture { part, .. } => assert_eq!(part, Some(BodyPart::Wrist)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_part_is_rejected() {
        assert!(Args::try_parse_from(["fracture-triage", "fracture", "x.png", "--part", "Knee"]).is_err());
    }
}
