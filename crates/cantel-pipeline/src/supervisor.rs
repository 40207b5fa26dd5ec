//! Supervisor: owns both TCP Clients, keeps them reconnected, and drives
//! process-level shutdown — either on external `terminate` or on the
//! optional program-duration timer.

use std::time::{Duration, Instant};

use cantel_net::TcpClient;
use cantel_queue::Terminate;
use tracing::{info, warn};

use crate::config::PipelineConfig;

/// Blocks until both `live` and `upload` are connected, reconnecting
/// whichever has dropped, sleeping `recon_delay` between attempts. Returns
/// once `terminate` is set — either externally or, if `use_timer` is
/// configured, once `prog_dur_ms` has elapsed since the call began.
pub fn monitor_loop(
    live: &TcpClient,
    upload: &TcpClient,
    config: &PipelineConfig,
    terminate: &Terminate,
) {
    let started = Instant::now();
    let program_duration =
        config.use_timer.then(|| Duration::from_millis(config.prog_dur_ms));
    let recon_delay = Duration::from_millis(config.recon_delay_ms);
    let connect_timeout = Duration::from_millis(config.t_poll_ms.max(1) * 100);

    while !terminate.is_set() {
        if let Some(limit) = program_duration {
            if started.elapsed() >= limit {
                info!("supervisor: program duration elapsed, terminating");
                terminate.set();
                break;
            }
        }

        for (name, client) in [("live", live), ("upload", upload)] {
            if client.is_connected() {
                continue;
            }
            match client.reconnect(connect_timeout) {
                Ok(()) => info!(client = name, "supervisor: reconnected"),
                Err(source) => warn!(client = name, %source, "supervisor: reconnect failed"),
            }
        }

        // Sleep `recon_delay` in short slices rather than one long sleep, so
        // `terminate` latency stays bounded without a condvar shared across
        // both clients' independent mutexes.
        let slice = Duration::from_millis(10);
        let mut waited = Duration::ZERO;
        while waited < recon_delay && !terminate.is_set() {
            std::thread::sleep(slice);
            waited += slice;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn timer_sets_terminate_after_program_duration() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                if stream.is_err() {
                    break;
                }
            }
        });

        let live = TcpClient::new(addr, false);
        let upload = TcpClient::new(addr, false);
        live.connect(Duration::from_secs(1)).unwrap();
        upload.connect(Duration::from_secs(1)).unwrap();

        let mut config = PipelineConfig::default();
        config.use_timer = true;
        config.prog_dur_ms = 20;
        config.recon_delay_ms = 10;
        let terminate = Terminate::new();

        monitor_loop(&live, &upload, &config, &terminate);
        assert!(terminate.is_set());
    }

    #[test]
    fn reconnects_a_dropped_client() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                drop(stream);
            }
        });

        let live = TcpClient::new(addr, false);
        let upload = TcpClient::new(addr, false);
        live.connect(Duration::from_secs(1)).unwrap();
        upload.connect(Duration::from_secs(1)).unwrap();
        live.close();
        assert!(!live.is_connected());

        let mut config = PipelineConfig::default();
        config.recon_delay_ms = 10;
        let terminate = Terminate::new();

        std::thread::scope(|scope| {
            let t2 = terminate.clone();
            let live_ref = &live;
            let upload_ref = &upload;
            let config_ref = &config;
            scope.spawn(move || monitor_loop(live_ref, upload_ref, config_ref, &t2));
            std::thread::sleep(Duration::from_millis(100));
            terminate.set();
        });

        assert!(live.is_connected());
    }
}
