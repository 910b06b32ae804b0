// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::path::PathBuf;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use scx_etopo::assign;
use scx_etopo::cli::EtopoArgs;
use scx_etopo::config::parse_config_file;
use scx_etopo::config::Config;
use scx_etopo::Topology;
use scx_etopo::SYSFS_CPU_ROOT;
use tracing::debug;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

/// scx_etopo: Assign physical CPUs to an emulated topology
///
/// Picks `sockets * cores * threads` CPUs out of the available ones so that
/// each emulated core's threads share a physical core whenever possible and
/// each emulated socket stays on as few physical sockets as possible.
///
/// The chosen CPUs are printed emulated socket by emulated socket, in the
/// order they were picked.
#[derive(Debug, Parser)]
struct Opts {
    #[clap(flatten)]
    etopo: EtopoArgs,

    /// TOML file with the request and optionally a synthetic topology.
    /// Command line arguments take precedence over the file.
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// Directory to read the host CPU topology from when the config file
    /// doesn't describe one.
    #[clap(long, default_value = SYSFS_CPU_ROOT)]
    sysfs: PathBuf,

    /// Print the assignment as JSON, one CPU list per emulated socket.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    json: bool,

    /// Specify the logging level. Accepts rust's envfilter syntax for modular
    /// logging: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#example-syntax. Examples: ["info", "warn,scx_etopo=debug"]
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| match EnvFilter::try_new(log_level) {
            Ok(filter) => Ok(filter),
            Err(e) => {
                eprintln!(
                    "invalid log envvar: {}, using info, err is: {}",
                    log_level, e
                );
                EnvFilter::try_new("info")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
    {
        Ok(()) => {}
        Err(e) => eprintln!("failed to init logger: {}", e),
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logging(&opts.log_level);
    debug!("opts={:?}", &opts);

    opts.etopo.validate()?;

    let config = match &opts.config {
        Some(path) => parse_config_file(path)?,
        None => Config::default(),
    };

    let topo = match config.topology()? {
        Some(topo) => topo,
        None => Topology::from_sysfs(&opts.sysfs)
            .with_context(|| format!("Failed to read topology from {}", opts.sysfs.display()))?,
    };

    let shape = match opts.etopo.shape {
        Some(shape) => shape,
        None => config.shape()?.ok_or_else(|| {
            anyhow!("No emulated topology given, use --shape or set shape in the config file")
        })?,
    };

    let available = match opts.etopo.available_mask()? {
        Some(mask) => mask,
        None => match config.available()? {
            Some(mask) => mask,
            None => topo.span(),
        },
    };

    info!(
        "Assigning emulated topology {} from cpus {} ({} sockets, {} cpus)",
        shape,
        available.to_cpulist(),
        topo.sockets().len(),
        topo.nr_cpus()
    );

    let assignment = assign(&topo, &available, shape)?;
    for (esocket, cpus) in assignment.sockets().iter().enumerate() {
        debug!("esocket {}: {:?}", esocket, cpus);
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&assignment)?);
    } else {
        let cpus: Vec<String> = assignment.cpus().iter().map(|cpu| cpu.to_string()).collect();
        println!("{}", cpus.join(","));
    }

    Ok(())
}
