use std::path::PathBuf;
use std::process::ExitCode;

use cantel_pipeline::{PipelineConfig, PipelineError};
use cantel_queue::Terminate;
use clap::Parser;

/// Vehicle-side CAN telemetry ingestion pipeline.
#[derive(Debug, Parser)]
#[command(name = "cantel", version, about)]
struct Args {
    /// Path to a TOML config file. Defaults are used for anything it omits.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `car` from the config file.
    #[arg(long)]
    car: Option<u8>,

    /// Override `can_if` from the config file.
    #[arg(long)]
    can_if: Option<String>,

    /// Override `tcp_ip` from the config file.
    #[arg(long)]
    tcp_ip: Option<String>,

    /// Override `tcp_port` from the config file.
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Override `spill_dir` from the config file.
    #[arg(long)]
    spill_dir: Option<PathBuf>,
}

impl Args {
    fn apply_overrides(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(car) = self.car {
            config.car = car;
        }
        if let Some(can_if) = &self.can_if {
            config.can_if = can_if.clone();
        }
        if let Some(tcp_ip) = &self.tcp_ip {
            config.tcp_ip = tcp_ip.clone();
        }
        if let Some(tcp_port) = self.tcp_port {
            config.tcp_port = tcp_port;
        }
        if let Some(spill_dir) = &self.spill_dir {
            config.spill_dir = spill_dir.clone();
        }
        config
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "cantel exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), PipelineError> {
    let base_config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    let config = args.apply_overrides(base_config);
    config.validate()?;

    let terminate = Terminate::new();
    install_signal_handlers(terminate.clone());

    run_with_can_socket(config, terminate)
}

#[cfg(target_os = "linux")]
fn run_with_can_socket(config: PipelineConfig, terminate: Terminate) -> Result<(), PipelineError> {
    let can_socket = cantel_pipeline::can::LinuxCanSocket::open(&config.can_if)?;
    cantel_pipeline::run(config, can_socket, terminate)
}

#[cfg(not(target_os = "linux"))]
fn run_with_can_socket(_config: PipelineConfig, _terminate: Terminate) -> Result<(), PipelineError> {
    panic!("cantel requires Linux SocketCAN support; this platform has no CanSocket implementation");
}

#[cfg(target_os = "linux")]
fn install_signal_handlers(terminate: Terminate) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    let flagged = Arc::new(AtomicBool::new(false));
    if let Err(err) = flag::register(SIGTERM, flagged.clone()) {
        tracing::warn!(%err, "could not install SIGTERM handler");
    }
    if let Err(err) = flag::register(SIGINT, flagged.clone()) {
        tracing::warn!(%err, "could not install SIGINT handler");
    }

    std::thread::spawn(move || loop {
        if flagged.load(std::sync::atomic::Ordering::SeqCst) {
            terminate.set();
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    });
}

#[cfg(not(target_os = "linux"))]
fn install_signal_handlers(_terminate: Terminate) {}
