//! `sensorlink` binary: run a receiver or analyse recorded log books.
//!
//! # Usage
//!
//! ```bash
//! sensorlink receive --config link.yaml
//! sensorlink analyze logs/2024.10.03/*.csv --window 5
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use sensorlink::gps::read_fixes;
use sensorlink::logbook::{AnalysisSettings, analyze, grade};
use sensorlink::{LinkConfig, LinkState, SensorLink};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sensorlink", version, about = "V2X sensor link receiver and log tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the modem and report link metrics until interrupted
    Receive {
        /// YAML configuration file; defaults are used when omitted
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Override the modem address
        #[arg(long, value_name = "HOST:PORT")]
        device: Option<String>,

        /// NMEA source (serial device or capture file) for the receiver position
        #[arg(long, value_name = "PATH")]
        gps: Option<PathBuf>,

        /// Seconds to wait for the handshake before giving up
        #[arg(long, default_value_t = 30)]
        connect_wait: u64,
    },
    /// Summarise one or more recorded CSV log files
    Analyze {
        #[arg(required = true, value_name = "CSV")]
        files: Vec<PathBuf>,

        /// Rows averaged into one
        #[arg(long, default_value_t = 0)]
        window: usize,

        /// Z-score at which a row counts as an outlier
        #[arg(long, default_value_t = 3.0)]
        threshold: f64,

        /// Scale maximum used for grading PDR
        #[arg(long, default_value_t = 100.0)]
        max_pdr: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Receive { config, device, gps, connect_wait } => {
            receive(config, device, gps, connect_wait).await
        }
        Command::Analyze { files, window, threshold, max_pdr } => {
            analyze_logs(&files, AnalysisSettings { z_threshold: threshold, window }, max_pdr)
        }
    }
}

async fn receive(
    config: Option<PathBuf>,
    device: Option<String>,
    gps: Option<PathBuf>,
    connect_wait: u64,
) -> anyhow::Result<()> {
    let mut config = match config {
        Some(path) => LinkConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => LinkConfig::default(),
    };
    if let Some(device) = device {
        config.device_addr = device;
    }

    let connection = SensorLink::receive(&config).await.context("starting receiver")?;
    connection
        .wait_for_state(LinkState::Connected, Duration::from_secs(connect_wait))
        .await
        .with_context(|| format!("no handshake with {}", config.device_addr))?;
    connection.start();

    let (fix_tx, mut fixes) = mpsc::channel(16);
    if let Some(path) = gps {
        let source = File::open(&path).with_context(|| format!("opening GPS source {}", path.display()))?;
        tokio::task::spawn_blocking(move || {
            let count = read_fixes(BufReader::new(source), |fix| fix_tx.blocking_send(fix).is_ok());
            info!("GPS source ended after {} fixes", count);
        });
    }

    let mut samples = Box::pin(connection.samples());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping");
                break;
            }
            Some(fix) = fixes.recv() => connection.set_position(fix),
            sample = samples.next() => match sample {
                Some(sample) => info!(
                    "PDR {:6.2}% | {:7.3} Mbps | {:8.3} ms | {:8.1} m",
                    sample.pdr, sample.throughput_mbps, sample.latency_ms, sample.distance_m
                ),
                None => {
                    warn!("Metrics stream ended");
                    break;
                }
            },
        }
    }

    connection.stop();
    connection.shutdown().await;
    Ok(())
}

fn analyze_logs(files: &[PathBuf], settings: AnalysisSettings, max_pdr: f64) -> anyhow::Result<()> {
    let (rows, summary) = analyze(files, &settings).context("analysing log files")?;

    println!("rows loaded      {}", summary.loaded);
    println!("rows kept        {}", summary.kept);
    println!("mean PDR         {:.2} %", summary.mean_pdr);
    println!("mean latency     {:.3} ms", summary.mean_latency);
    println!("mean throughput  {:.3} Mbps", summary.mean_throughput);
    println!("max distance     {:.1} m", summary.max_distance);
    println!("route length     {:.1} m", summary.route_length);

    let mut bands = [0usize; 10];
    for row in &rows {
        bands[grade(row.pdr, max_pdr) as usize] += 1;
    }
    println!("PDR grade bands  {:?}", bands);
    Ok(())
}
