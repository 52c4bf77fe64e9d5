//! Simulator entry point: CLI wiring, logger setup, and run statistics.

use std::path::Path;
use std::process;
use std::time::Instant;

use cps_sim::config::ScenarioConfig;
use cps_sim::scenario;
use cps_sim::telemetry::FrequencyLog;

/// Parsed CLI arguments.
struct CliArgs {
    scenario_path: Option<String>,
    preset: Option<String>,
    seed_override: Option<u64>,
    horizon_override_ms: Option<u64>,
    data_out: Option<String>,
    no_data_out: bool,
}

fn print_help() {
    eprintln!("cps-sim — cyber-physical power system co-simulation");
    eprintln!();
    eprintln!("Usage: cps-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>     Load scenario from TOML config file");
    eprintln!("  --preset <name>       Use a built-in preset (reference)");
    eprintln!("  --seed <u64>          Override random seed");
    eprintln!("  --horizon-ms <u64>    Override simulated horizon");
    eprintln!("  --data-out <path>     Frequency/power log path");
    eprintln!("                        (default: vpp_freq_response_data.csv)");
    eprintln!("  --no-data-out         Disable the frequency/power log");
    eprintln!("  --help                Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the reference preset is used.");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        scenario_path: None,
        preset: None,
        seed_override: None,
        horizon_override_ms: None,
        data_out: None,
        no_data_out: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--scenario" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --scenario requires a path argument");
                    process::exit(1);
                }
                cli.scenario_path = Some(args[i].clone());
            }
            "--preset" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --preset requires a name argument");
                    process::exit(1);
                }
                cli.preset = Some(args[i].clone());
            }
            "--seed" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --seed requires a u64 argument");
                    process::exit(1);
                }
                if let Ok(seed) = args[i].parse::<u64>() {
                    cli.seed_override = Some(seed);
                } else {
                    eprintln!("error: --seed value \"{}\" is not a valid u64", args[i]);
                    process::exit(1);
                }
            }
            "--horizon-ms" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --horizon-ms requires a u64 argument");
                    process::exit(1);
                }
                if let Ok(horizon) = args[i].parse::<u64>() {
                    cli.horizon_override_ms = Some(horizon);
                } else {
                    eprintln!("error: --horizon-ms value \"{}\" is not a valid u64", args[i]);
                    process::exit(1);
                }
            }
            "--data-out" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-out requires a path argument");
                    process::exit(1);
                }
                cli.data_out = Some(args[i].clone());
            }
            "--no-data-out" => {
                cli.no_data_out = true;
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// Peak resident set size in kB, read from `/proc/self/status` on Linux.
fn peak_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmHWM:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = parse_args();

    // Load config: --scenario takes priority, then --preset, then the
    // reference default.
    let mut config = if let Some(ref path) = cli.scenario_path {
        match ScenarioConfig::from_toml_file(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else if let Some(ref name) = cli.preset {
        match ScenarioConfig::from_preset(name) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        ScenarioConfig::reference()
    };

    if let Some(seed) = cli.seed_override {
        config.simulation.seed = seed;
    }
    if let Some(horizon_ms) = cli.horizon_override_ms {
        config.simulation.horizon_ms = horizon_ms;
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    // A failed log open is reported once and the run continues without it.
    let log = if cli.no_data_out {
        FrequencyLog::disabled()
    } else {
        let path = cli
            .data_out
            .as_deref()
            .unwrap_or("vpp_freq_response_data.csv");
        match FrequencyLog::to_path(Path::new(path)) {
            Ok(log) => log,
            Err(e) => {
                eprintln!("error: cannot open data log \"{path}\": {e}");
                FrequencyLog::disabled()
            }
        }
    };

    let started = Instant::now();
    let report = scenario::run(&config, log);
    let elapsed = started.elapsed();

    println!(
        "simulation finished at {} ({} EV piles, {} ESS units)",
        report.end, report.ev_piles, report.ess_units
    );
    println!("wall-clock time: {:.3} s", elapsed.as_secs_f64());
    match peak_rss_kb() {
        Some(kb) => println!("peak memory: {} kB ({:.2} MB)", kb, kb as f64 / 1024.0),
        None => println!("peak memory: unavailable on this platform"),
    }
}
