//! Command-line parsing for the `cama` binary.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! valuation and audit code.

use clap::{Args, Parser, Subcommand};

use crate::domain::ModelType;
use crate::logging::LogFormat;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "cama", version, about = "Mass-appraisal valuation and ratio-study engine")]
pub struct Cli {
    /// Log level (overridden by RUST_LOG).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Calibrate a model on a synthetic market, value a hold-out set, and audit it.
    Demo(DemoArgs),
    /// Run a ratio study over a synthetic assessment roll.
    RatioStudy(RatioStudyArgs),
}

/// Options shared by every command that generates a synthetic market.
#[derive(Debug, Args, Clone)]
pub struct SampleArgs {
    /// Number of synthetic sales to generate.
    #[arg(short = 'n', long, default_value_t = 400)]
    pub count: usize,

    /// Random seed for sample generation.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Log-normal price noise (standard deviation of log price).
    #[arg(long, default_value_t = 0.08)]
    pub price_noise: f64,
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    #[command(flatten)]
    pub sample: SampleArgs,

    /// Functional form of the valuation model.
    #[arg(long, value_enum, default_value_t = ModelType::Additive)]
    pub model_type: ModelType,

    /// Share of sales held out from calibration.
    #[arg(long, default_value_t = 0.25)]
    pub holdout: f64,

    /// Show top-N over- and under-valued parcels.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Print the calibration result as JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct RatioStudyArgs {
    #[command(flatten)]
    pub sample: SampleArgs,

    /// Overall assessment level (1.0 = assessed at market).
    #[arg(long, default_value_t = 1.0)]
    pub level: f64,

    /// Ratio elasticity to value; positive values make the roll regressive.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub regressivity: f64,

    /// Log-normal assessment noise.
    #[arg(long, default_value_t = 0.06)]
    pub dispersion: f64,

    /// Also report one study per neighborhood.
    #[arg(long)]
    pub stratify: bool,

    /// Print the result as JSON.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ratio_study_flags() {
        let cli = Cli::parse_from([
            "cama",
            "ratio-study",
            "--regressivity",
            "-0.1",
            "--stratify",
            "-n",
            "50",
        ]);
        let Command::RatioStudy(args) = cli.command else {
            panic!("expected ratio-study");
        };
        assert_eq!(args.regressivity, -0.1);
        assert!(args.stratify);
        assert_eq!(args.sample.count, 50);
    }

    #[test]
    fn parses_demo_defaults() {
        let cli = Cli::parse_from(["cama", "--log-format", "json", "demo", "--model-type", "multiplicative"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        let Command::Demo(args) = cli.command else {
            panic!("expected demo");
        };
        assert_eq!(args.model_type, ModelType::Multiplicative);
        assert_eq!(args.sample.count, 400);
        assert_eq!(args.holdout, 0.25);
    }
}
