use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_car() -> u8 {
    1
}
fn default_can_if() -> String {
    "vcan0".to_string()
}
fn default_tcp_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_tcp_port() -> u16 {
    5000
}
fn default_queue_size() -> usize {
    256
}
fn default_msgs_per_file() -> u32 {
    250_000
}
fn default_spill_dir() -> PathBuf {
    PathBuf::from("spill")
}
fn default_t_poll_ms() -> u64 {
    10
}
fn default_cond_timeout_ms() -> u64 {
    5000
}
fn default_recon_delay_ms() -> u64 {
    4000
}
fn default_prog_dur_ms() -> u64 {
    60_000
}

/// All tunables listed in the spec's "Configuration" section, with defaults
/// matching `original_source/user_src/StellaCANRead.h`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    #[serde(default = "default_car")]
    pub car: u8,
    #[serde(default = "default_can_if")]
    pub can_if: String,
    #[serde(default = "default_tcp_ip")]
    pub tcp_ip: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_queue_size")]
    pub q_frame: usize,
    #[serde(default = "default_queue_size")]
    pub q_spill: usize,
    #[serde(default = "default_msgs_per_file")]
    pub msgs_per_file: u32,
    #[serde(default = "default_spill_dir")]
    pub spill_dir: PathBuf,
    #[serde(default = "default_t_poll_ms")]
    pub t_poll_ms: u64,
    #[serde(default = "default_cond_timeout_ms")]
    pub cond_timeout_ms: u64,
    #[serde(default = "default_recon_delay_ms")]
    pub recon_delay_ms: u64,
    #[serde(default)]
    pub use_timer: bool,
    #[serde(default = "default_prog_dur_ms")]
    pub prog_dur_ms: u64,
    #[serde(default = "true_default")]
    pub use_tcp_nodelay: bool,
    #[serde(default)]
    pub print_msg: bool,
    #[serde(default)]
    pub debug_cond: bool,
}

fn true_default() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            car: default_car(),
            can_if: default_can_if(),
            tcp_ip: default_tcp_ip(),
            tcp_port: default_tcp_port(),
            q_frame: default_queue_size(),
            q_spill: default_queue_size(),
            msgs_per_file: default_msgs_per_file(),
            spill_dir: default_spill_dir(),
            t_poll_ms: default_t_poll_ms(),
            cond_timeout_ms: default_cond_timeout_ms(),
            recon_delay_ms: default_recon_delay_ms(),
            use_timer: false,
            prog_dur_ms: default_prog_dur_ms(),
            use_tcp_nodelay: true,
            print_msg: false,
            debug_cond: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Required positivity/range checks; see SPEC_FULL.md §9 for why
    /// `msgs_per_file == 0` is rejected rather than silently defaulted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3).contains(&self.car) {
            return Err(ConfigError::InvalidCar(self.car));
        }
        if self.msgs_per_file == 0 {
            return Err(ConfigError::InvalidMsgsPerFile);
        }
        if self.q_frame == 0 {
            return Err(ConfigError::InvalidFrameQueueSize);
        }
        if self.q_spill == 0 {
            return Err(ConfigError::InvalidSpillQueueSize);
        }
        Ok(())
    }

    pub fn collector_addr(&self) -> Result<SocketAddr, ConfigError> {
        (self.tcp_ip.as_str(), self.tcp_port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut it| it.next())
            .ok_or(ConfigError::UnresolvableAddr { host: self.tcp_ip.clone(), port: self.tcp_port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_header() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.car, 1);
        assert_eq!(cfg.can_if, "vcan0");
        assert_eq!(cfg.q_frame, 256);
        assert_eq!(cfg.q_spill, 256);
        assert!(cfg.use_tcp_nodelay);
        assert!(!cfg.use_timer);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_car() {
        let mut cfg = PipelineConfig::default();
        cfg.car = 7;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidCar(7))));
    }

    #[test]
    fn rejects_zero_msgs_per_file() {
        let mut cfg = PipelineConfig::default();
        cfg.msgs_per_file = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidMsgsPerFile)));
    }

    #[test]
    fn parses_partial_toml_with_defaults_for_rest() {
        let toml_text = "car = 2\ntcp_port = 9000\n";
        let cfg: PipelineConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.car, 2);
        assert_eq!(cfg.tcp_port, 9000);
        assert_eq!(cfg.can_if, "vcan0");
    }
}
