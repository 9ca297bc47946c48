//! census_scan - one scan run over every active camera

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use traffic_census::config::ScanConfig;
use traffic_census::setup;
use traffic_census::ui::{Ui, UiMode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Count vehicles across the traffic camera fleet")]
struct Args {
    /// JSON config file (overrides CENSUS_CONFIG).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Worker threads for the camera pool.
    #[arg(long, value_name = "N")]
    max_workers: Option<usize>,
    /// Skip rendering and uploading evidence images.
    #[arg(long)]
    no_evidence: bool,
    /// Output mode: auto, plain or pretty.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());

    match run(&args, &ui) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\nFATAL ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, ui: &Ui) -> Result<()> {
    let started = Instant::now();
    ui.banner("Traffic Census Scan");

    let cfg = {
        let _stage = ui.stage("Loading configuration");
        let mut cfg = match &args.config {
            Some(path) => ScanConfig::load_from(Some(path.as_path()))?,
            None => ScanConfig::load()?,
        };
        cfg.apply_overrides(args.max_workers, args.no_evidence)?;
        cfg
    };

    let (scanner, mut store) = {
        let _stage = ui.stage("Initializing components");
        let scanner = setup::scanner(&cfg)?;
        let store = setup::open_record_store(&cfg)?;
        log::info!(
            "record store: {}, evidence: {}",
            store.name(),
            if scanner.pipeline().has_sink() { "on" } else { "off" }
        );
        (scanner, store)
    };

    {
        let _stage = ui.stage("Loading detection model");
        scanner
            .pipeline()
            .detector()
            .warm_up()
            .context("load detection model")?;
    }

    let cameras = {
        let _stage = ui.stage("Fetching active cameras");
        scanner.fetch_cameras()?
    };
    if cameras.is_empty() {
        ui.nothing_to_scan();
        return Ok(());
    }

    let report = {
        let _stage = ui.stage("Scanning cameras");
        scanner.scan_cameras(&cameras, store.as_mut(), started)?
    };
    ui.summary(&report);
    Ok(())
}
