use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("could not parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("car must be 1, 2 or 3, got {0}")]
    InvalidCar(u8),
    #[error("msgs_per_file must be a positive integer, got 0")]
    InvalidMsgsPerFile,
    #[error("q_frame must be a positive integer, got 0")]
    InvalidFrameQueueSize,
    #[error("q_spill must be a positive integer, got 0")]
    InvalidSpillQueueSize,
    #[error("could not resolve collector address {host}:{port}")]
    UnresolvableAddr { host: String, port: u16 },
}

#[derive(Error, Debug)]
pub enum CanError {
    #[error("could not open CAN socket: {0}")]
    Open(#[source] io::Error),
    #[error("could not find interface index for {iface}: {source}")]
    InterfaceLookup { iface: String, source: io::Error },
    #[error("could not bind CAN socket to {iface}: {source}")]
    Bind { iface: String, source: io::Error },
    #[error("could not poll CAN socket: {0}")]
    Poll(#[source] io::Error),
    #[error("could not read CAN frame: {0}")]
    Read(#[source] io::Error),
}

#[derive(Error, Debug)]
pub enum SpillError {
    #[error("could not create spill directory {path}: {source}")]
    CreateDir { path: String, source: io::Error },
    #[error("could not open spill file {path}: {source}")]
    OpenFile { path: String, source: io::Error },
    #[error("system clock is before the Unix epoch")]
    ClockWentBackwards,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Spill(#[from] SpillError),
    #[error(transparent)]
    Can(#[from] CanError),
}
