//! Formatter: turns raw CAN frames into wire lines and routes each line
//! either straight out over the live TCP connection or, if that's not an
//! option right now, onto the spill queue.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cantel_net::{SendOutcome, TcpClient};
use cantel_queue::{BoundedQueue, PushOutcome, Terminate};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::format::format_line;
use crate::frame::CanFrame;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Tries the live client first (a dirty read, by design: a stale "connected"
/// is just a wasted send attempt that falls through to spill; a stale
/// "disconnected" only costs one extra round through the spill path).
/// Falls back to the spill queue on anything short of a confirmed send.
///
/// `send_timeout` (T_POLL) bounds the TCP readiness poll inside `send`;
/// `queue_poll_interval` (COND_TIMEOUT) bounds the spill queue's condvar
/// wait when it's full.
fn route_line(
    line: String,
    live_client: &TcpClient,
    spill_queue: &BoundedQueue<String>,
    config: &PipelineConfig,
    terminate: &Terminate,
    send_timeout: Duration,
    queue_poll_interval: Duration,
) {
    if live_client.dirty_is_connected() {
        match live_client.send(line.as_bytes(), send_timeout) {
            SendOutcome::Sent => {
                if config.print_msg {
                    info!(%line, "sent live");
                }
                return;
            }
            SendOutcome::NotConnected
            | SendOutcome::NotWritable
            | SendOutcome::PollFailed
            | SendOutcome::SendFailed => {}
        }
    }

    if spill_queue.push_blocking(line, terminate, queue_poll_interval) == PushOutcome::Terminated {
        warn!("dropping line: spill queue full at shutdown");
    }
}

/// Drains `frame_queue` until `terminate` is set and it runs dry, formatting
/// and routing each frame in turn.
pub fn formatter_loop(
    frame_queue: &BoundedQueue<CanFrame>,
    spill_queue: &BoundedQueue<String>,
    live_client: &TcpClient,
    config: &PipelineConfig,
    terminate: &Terminate,
) {
    let queue_poll_interval = Duration::from_millis(config.cond_timeout_ms);
    let send_timeout = Duration::from_millis(config.t_poll_ms);
    while let Some(frame) = frame_queue.pop_blocking(terminate, queue_poll_interval) {
        let line = format_line(config.car, now_ms(), &frame);
        route_line(line, live_client, spill_queue, config, terminate, send_timeout, queue_poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn routes_to_spill_when_not_connected() {
        let spill: BoundedQueue<String> = BoundedQueue::new(4);
        let client = TcpClient::new("127.0.0.1:1".parse().unwrap(), false);
        let config = PipelineConfig::default();
        let terminate = Terminate::new();

        route_line(
            "car1:1#00000001#0000000000000000\n".to_string(),
            &client,
            &spill,
            &config,
            &terminate,
            Duration::from_millis(5),
            Duration::from_millis(5),
        );

        assert_eq!(spill.len(), 1);
    }

    #[test]
    fn routes_live_when_connected_and_writable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let _ = listener.accept();
            std::thread::sleep(Duration::from_millis(200));
        });

        let client = TcpClient::new(addr, true);
        client.connect(Duration::from_secs(1)).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let spill: BoundedQueue<String> = BoundedQueue::new(4);
        let config = PipelineConfig::default();
        let terminate = Terminate::new();

        route_line(
            "car1:1#00000001#0000000000000000\n".to_string(),
            &client,
            &spill,
            &config,
            &terminate,
            Duration::from_millis(200),
            Duration::from_millis(5),
        );

        assert!(spill.is_empty());
    }
}
