//! Pathfuse CLI - offline fusion runs, estimator comparison and tuning sweeps.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use pathfuse_core::config::FusionConfig;
use pathfuse_core::estimator::EstimatorKind;
use pathfuse_core::types::{CorrectionKind, FixSourceKind};
use pathfuse_sim::params::{self, find_param, get_tuning_param, set_tuning_param};
use pathfuse_sim::{generate_walk, run_fusion, FusionResult, WalkData, WalkParams};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Public function that can be called from the main binary
pub fn run_cli_main(args: &[&str]) -> Result<()> {
    let args = Args::try_parse_from(args)?;
    main_inner(args)
}

#[derive(Parser, Debug)]
#[command(name = "pathfuse-cli")]
#[command(about = "Pedestrian dead reckoning + fix fusion simulator")]
#[command(version)]
pub struct Args {
    /// Output directory
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Run a single simulation and write the trajectory
    #[arg(long)]
    single: bool,

    /// Greedy coordinate descent over EKF tuning parameters
    #[arg(long)]
    tune_sweep: bool,

    // ── Fusion configuration ──────────────────────────────────
    /// JSON file with a FusionConfig; missing fields use defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// key=value overrides applied after the config file
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    #[arg(long, value_enum, default_value = "ekf")]
    estimator: EstimatorArg,

    // ── Walk parameters ───────────────────────────────────────
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 0.7)]
    step_length: f64,

    #[arg(long, default_value_t = 3.0)]
    heading_noise_deg: f64,

    #[arg(long, default_value_t = 4000)]
    fix_interval_ms: u64,

    #[arg(long, default_value_t = 3.0)]
    fix_noise: f64,

    #[arg(long, default_value_t = 0.2)]
    fix_dropout: f64,

    #[arg(long, value_enum, default_value = "radio")]
    fix_source: FixSourceArg,

    #[arg(long, default_value_t = 0.0)]
    climb_rate: f64,

    // ── Sweep options ─────────────────────────────────────────
    /// Seeds averaged by the comparison and tuning sweeps
    #[arg(long, value_delimiter = ' ', default_values = ["42", "7", "1234"])]
    seeds: Vec<u64>,

    /// Parameters for the tuning sweep (default: all)
    #[arg(long, value_delimiter = ' ')]
    tune_params: Option<Vec<String>>,

    #[arg(long, default_value_t = 3)]
    tune_iterations: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EstimatorArg {
    Ekf,
    Displacement,
    Particle,
}

impl From<EstimatorArg> for EstimatorKind {
    fn from(a: EstimatorArg) -> Self {
        match a {
            EstimatorArg::Ekf => Self::Ekf,
            EstimatorArg::Displacement => Self::Displacement,
            EstimatorArg::Particle => Self::Particle,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FixSourceArg {
    Radio,
    Satellite,
}

impl From<FixSourceArg> for FixSourceKind {
    fn from(a: FixSourceArg) -> Self {
        match a {
            FixSourceArg::Radio => Self::Radio,
            FixSourceArg::Satellite => Self::Satellite,
        }
    }
}

fn main_inner(args: Args) -> Result<()> {
    println!("Pathfuse PDR Fusion Simulator");
    println!("=============================\n");

    let config = load_config(&args)?;

    if args.tune_sweep {
        run_tune_sweep(&args, &config)?;
    } else if args.single {
        run_single(&args, &config)?;
    } else {
        run_comparison(&args, &config)?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Single Run
// ---------------------------------------------------------------------------
fn run_single(args: &Args, config: &FusionConfig) -> Result<()> {
    println!("Running single simulation...");

    let params = build_walk_params(args, args.seed);
    let walk = generate_walk(&params);
    print_walk_stats(&walk);

    let result = run_fusion(&walk, &params, config, args.estimator.into())
        .context("fusion run failed")?;
    let summary = result.summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    write_trajectory(&args.output_dir, &result)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Estimator comparison
// ---------------------------------------------------------------------------
fn run_comparison(args: &Args, config: &FusionConfig) -> Result<()> {
    println!("Comparing estimators over seeds {:?}", args.seeds);

    let mut rows = Vec::new();
    for kind in EstimatorKind::ALL {
        for &seed in &args.seeds {
            let params = build_walk_params(args, seed);
            let walk = generate_walk(&params);
            let summary = run_fusion(&walk, &params, config, kind)?.summary();
            println!(
                "{:<12} seed {:>5} | rmse {:.3} m | final {:.3} m | fixes {}",
                kind.label(),
                seed,
                summary.rmse_m,
                summary.final_error_m,
                summary.absolute_corrections
            );
            rows.push((kind, seed, summary));
        }
    }

    std::fs::create_dir_all(&args.output_dir)?;
    let path = args.output_dir.join("sweep_summary.csv");
    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    wtr.write_record([
        "estimator",
        "seed",
        "steps",
        "absolute_corrections",
        "recursive_corrections",
        "rmse_m",
        "final_error_m",
    ])?;
    for (kind, seed, s) in rows {
        wtr.write_record([
            kind.label().to_string(),
            seed.to_string(),
            s.steps.to_string(),
            s.absolute_corrections.to_string(),
            s.recursive_corrections.to_string(),
            format!("{:.4}", s.rmse_m),
            format!("{:.4}", s.final_error_m),
        ])?;
    }
    wtr.flush()?;
    println!("\nSweep complete. Summary at {:?}", path);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tuning sweep
// ---------------------------------------------------------------------------
fn run_tune_sweep(args: &Args, config: &FusionConfig) -> Result<()> {
    println!("Running tune-sweep...");

    let specs = match &args.tune_params {
        Some(names) => names
            .iter()
            .map(|n| find_param(n).with_context(|| format!("unknown tuning parameter '{n}'")))
            .collect::<Result<Vec<_>>>()?,
        None => params::ekf::ALL.to_vec(),
    };
    if args.seeds.is_empty() {
        bail!("at least one seed is required");
    }

    let walks: Vec<(WalkParams, WalkData)> = args
        .seeds
        .iter()
        .map(|&seed| {
            let p = build_walk_params(args, seed);
            let w = generate_walk(&p);
            (p, w)
        })
        .collect();
    let estimator: EstimatorKind = args.estimator.into();

    let mut best_cfg = config.clone();
    let baseline_rmse = mean_rmse(&walks, &best_cfg, estimator)?;
    let mut best_rmse = baseline_rmse;
    println!("Baseline rmse = {:.4} m", baseline_rmse);

    let mut summary_rows = Vec::new();
    for iter in 0..args.tune_iterations {
        println!("Greedy iteration {}", iter + 1);
        let mut improved = false;

        for spec in &specs {
            let mut best_val = get_tuning_param(&best_cfg.ekf, spec.name).unwrap_or(spec.min);
            for val in spec.grid() {
                let mut cfg = best_cfg.clone();
                set_tuning_param(&mut cfg.ekf, spec.name, val);
                let rmse = mean_rmse(&walks, &cfg, estimator)?;
                summary_rows.push((iter, spec.name, val, rmse));
                if rmse < best_rmse {
                    best_rmse = rmse;
                    best_val = val;
                    improved = true;
                }
            }
            set_tuning_param(&mut best_cfg.ekf, spec.name, best_val);
            info!(param = spec.name, value = best_val, rmse = best_rmse, "tuned");
        }

        if !improved {
            println!("No improvement in iteration {}, stopping", iter + 1);
            break;
        }
    }

    std::fs::create_dir_all(&args.output_dir)?;
    let path = args.output_dir.join("tune_sweep_summary.csv");
    let mut wtr = csv::Writer::from_path(&path)?;
    wtr.write_record(["iteration", "tuning_param", "value", "rmse_m"])?;
    for (iter, param, val, rmse) in summary_rows {
        wtr.write_record([
            iter.to_string(),
            param.to_string(),
            format!("{:.6}", val),
            format!("{:.6}", rmse),
        ])?;
    }
    wtr.flush()?;
    println!("Tune-sweep summary written to {:?}", path);

    let optimised = serde_json::json!({
        "estimator": estimator.label(),
        "baseline_rmse": baseline_rmse,
        "optimised_rmse": best_rmse,
        "config": best_cfg,
    });
    let optimised_path = args.output_dir.join("optimised_tuning.json");
    std::fs::write(&optimised_path, serde_json::to_string_pretty(&optimised)?)?;
    println!("Optimised tuning written to {:?}", optimised_path);
    Ok(())
}

fn mean_rmse(
    walks: &[(WalkParams, WalkData)],
    config: &FusionConfig,
    estimator: EstimatorKind,
) -> Result<f64> {
    let mut total = 0.0;
    for (params, walk) in walks {
        total += run_fusion(walk, params, config, estimator)?.summary().rmse_m;
    }
    Ok(total / walks.len() as f64)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------
fn load_config(args: &Args) -> Result<FusionConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config {}", path.display()))?;
            FusionConfig::from_json(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => FusionConfig::default(),
    };

    let overrides = parse_overrides(&args.overrides);
    for (key, value) in &overrides {
        config.apply_override(key, value);
    }
    Ok(config)
}

fn parse_overrides(raw: &[String]) -> HashMap<String, String> {
    raw.iter()
        .filter_map(|kv| match kv.split_once('=') {
            Some((k, v)) => Some((k.trim().to_string(), v.trim().to_string())),
            None => {
                warn!(value = kv.as_str(), "ignoring override without '='");
                None
            }
        })
        .collect()
}

fn build_walk_params(args: &Args, seed: u64) -> WalkParams {
    WalkParams {
        step_length: args.step_length,
        heading_noise_std: args.heading_noise_deg.to_radians(),
        fix_interval_ms: args.fix_interval_ms,
        fix_noise_std: args.fix_noise,
        fix_dropout: args.fix_dropout,
        fix_source: args.fix_source.into(),
        climb_rate: args.climb_rate,
        seed,
        ..WalkParams::default()
    }
}

fn print_walk_stats(walk: &WalkData) {
    println!("\nWalk Stats:");
    println!("  Steps:    {}", walk.steps.len());
    println!("  Duration: {:.1} s", walk.duration_ms() as f64 / 1000.0);
    println!("  Fixes:    {}", walk.fixes.len());
    println!("-----------------------------");
}

fn write_trajectory(output_dir: &Path, result: &FusionResult) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join("trajectory.csv");
    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("cannot create {}", path.display()))?;

    wtr.write_record([
        "time_ms",
        "true_east",
        "true_north",
        "est_east",
        "est_north",
        "error_m",
        "correction",
    ])?;
    for i in 0..result.fused.len() {
        let t = result.truth[i];
        let e = result.fused[i];
        let correction = match result.corrections[i] {
            Some(CorrectionKind::Absolute(src)) => src.label(),
            Some(CorrectionKind::Recursive) => "recursive",
            None => "none",
        };
        wtr.write_record([
            result.time_ms[i].to_string(),
            format!("{:.4}", t.x),
            format!("{:.4}", t.y),
            format!("{:.4}", e.x),
            format!("{:.4}", e.y),
            format!("{:.4}", (e - t).norm()),
            correction.to_string(),
        ])?;
    }

    wtr.flush()?;
    println!("Data written to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_parse() {
        let raw = vec![
            "floor_height=3.2".to_string(),
            " weinberg_k = 0.4 ".to_string(),
            "broken".to_string(),
        ];
        let map = parse_overrides(&raw);
        assert_eq!(map.len(), 2);
        assert_eq!(map["floor_height"], "3.2");
        assert_eq!(map["weinberg_k"], "0.4");
    }

    #[test]
    fn test_args_build_config_and_walk() {
        let args = Args::try_parse_from([
            "pathfuse-cli",
            "--set",
            "floor_height=3.0",
            "--estimator",
            "particle",
            "--fix-source",
            "satellite",
            "--seed",
            "9",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.pdr.floor_height, 3.0);
        assert_eq!(EstimatorKind::from(args.estimator), EstimatorKind::Particle);

        let params = build_walk_params(&args, args.seed);
        assert_eq!(params.seed, 9);
        assert_eq!(params.fix_source, FixSourceKind::Satellite);
    }

    #[test]
    fn test_single_run_writes_trajectory() {
        let dir = std::env::temp_dir().join(format!("pathfuse-cli-{}", std::process::id()));
        let dir_str = dir.to_string_lossy().to_string();
        run_cli_main(&["pathfuse-cli", "--single", "-o", &dir_str]).unwrap();

        let text = std::fs::read_to_string(dir.join("trajectory.csv")).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("time_ms,true_east"));
        assert!(lines.count() > 100);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
