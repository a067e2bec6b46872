#[macro_use]
extern crate log;

use chrono::Utc;
use clap::ArgMatches;
use hpa_time_scaler::{config, run_once, Config, DryRun, Error, HpaKube, Result, ResultExt};
use std::process;

fn print_error_debug(e: &Error) {
    // unwind the error chain
    for e in e.iter().skip(1) {
        warn!("caused by: {}", e);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = config::app().get_matches();

    // always show INFO messages (+1)
    if let Err(e) = loggerv::Logger::new()
        .verbosity(args.occurrences_of("verbose") + 1)
        .module_path(true)
        .line_numbers(args.is_present("debug"))
        .init()
    {
        eprintln!("failed to initialise logging: {}", e);
    }

    if let Err(e) = run(&args).await {
        error!("hpa-time-scaler error: {}", e);
        print_error_debug(&e);
        process::exit(1);
    }
    process::exit(0);
}

async fn run(args: &ArgMatches<'_>) -> Result<()> {
    // validate everything before touching the cluster
    let cfg = Config::from_matches(args).chain_err(|| "failed to load configuration")?;
    let kube = HpaKube::infer(cfg.local)
        .await
        .chain_err(|| "failed to create kubernetes client")?;

    let now = Utc::now();
    let changed = if cfg.dry_run {
        run_once(&DryRun(&kube), &cfg, now).await
    } else {
        run_once(&kube, &cfg, now).await
    }
    .chain_err(|| format!("failed to reconcile {}", cfg.target))?;

    if changed {
        info!("Updated {}", cfg.target);
    } else {
        debug!("No change needed for {}", cfg.target);
    }
    Ok(())
}
