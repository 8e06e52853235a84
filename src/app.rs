//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and installs logging
//! - loads configuration and reference data
//! - runs the requested workflow
//! - prints reports

use std::sync::Arc;

use clap::Parser;
use serde::Serialize;

use crate::cli::{Cli, Command, DemoArgs, RatioStudyArgs};
use crate::config::{EngineConfig, ReferenceData};
use crate::data::AssessmentProfile;
use crate::error::{EngineError, Result};

pub mod pipeline;

/// Entry point for the `cama` binary.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::logging::init(&cli.log_level, cli.log_format);

    let config = EngineConfig::from_env()?;
    let reference = config.load_reference_data()?;

    match cli.command {
        Command::Demo(args) => handle_demo(&config, reference, args),
        Command::RatioStudy(args) => handle_ratio_study(&config, &reference, args),
    }
}

fn handle_demo(config: &EngineConfig, reference: ReferenceData, args: DemoArgs) -> Result<()> {
    let opts = pipeline::DemoOptions {
        count: args.sample.count,
        seed: args.sample.seed,
        price_noise: args.sample.price_noise,
        model_type: args.model_type,
        holdout: args.holdout,
        top_n: args.top,
    };
    let out = pipeline::run_demo(config, Arc::new(reference), &opts)?;

    if args.json {
        println!("{}", to_json(&out.calibration)?);
        return Ok(());
    }

    println!("{}", crate::report::format_calibration(&out.model, &out.calibration));
    println!("{}", crate::report::format_rankings(&out.rankings));
    println!("{}", crate::report::format_quality(&out.quality, args.top));
    println!(
        "{}",
        crate::report::format_ratio_study("hold-out valuations", &out.ratio_study, &config.ratio_thresholds)
    );
    println!("{}", crate::report::format_stratified(&out.strata));
    println!(
        "{}",
        crate::report::format_reconciliation(&out.reconciled_property, Some(&out.cost), &out.reconciliation)
    );
    Ok(())
}

fn handle_ratio_study(config: &EngineConfig, reference: &ReferenceData, args: RatioStudyArgs) -> Result<()> {
    let opts = pipeline::RatioStudyOptions {
        count: args.sample.count,
        seed: args.sample.seed,
        price_noise: args.sample.price_noise,
        profile: AssessmentProfile {
            level: args.level,
            regressivity: args.regressivity,
            dispersion: args.dispersion,
        },
        stratify: args.stratify,
    };
    let out = pipeline::run_ratio_study(config, reference, &opts)?;

    if args.json {
        println!("{}", to_json(&out.result)?);
        return Ok(());
    }

    println!(
        "{}",
        crate::report::format_ratio_study("synthetic roll", &out.result, &config.ratio_thresholds)
    );
    if args.stratify {
        println!("{}", crate::report::format_stratified(&out.strata));
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| EngineError::invalid(format!("Failed to serialize output: {e}")))
}
