//! Vehicle-side CAN telemetry ingestion pipeline: reads frames off a CAN
//! bus, formats them, and delivers them to a collector either live over TCP
//! or, when the link is down, spooled to disk and uploaded once it's back.

pub mod can;
pub mod can_reader;
pub mod config;
pub mod error;
pub mod format;
pub mod formatter;
pub mod frame;
pub mod spill;
pub mod supervisor;
pub mod uploader;

use std::thread;
use std::time::Duration;

use cantel_net::TcpClient;
use cantel_queue::{BoundedQueue, Terminate};
use tracing::info;

pub use can::CanSocket;
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use frame::CanFrame;

/// Runs the full pipeline until `terminate` is set, joining every worker
/// before returning. `can_socket` is injected so tests can drive the
/// pipeline with [`can::FakeCanSocket`] instead of a real bus.
pub fn run<S>(config: PipelineConfig, mut can_socket: S, terminate: Terminate) -> Result<(), PipelineError>
where
    S: CanSocket + 'static,
{
    config.validate()?;
    let collector_addr = config.collector_addr()?;

    // Fatal init per SPEC_FULL.md §6: an unwritable spill directory must
    // fail the process before any worker starts, not surface as a buried
    // log line from the Spill Writer thread later on.
    std::fs::create_dir_all(&config.spill_dir).map_err(|source| {
        error::SpillError::CreateDir { path: config.spill_dir.display().to_string(), source }
    })?;

    let frame_queue: BoundedQueue<CanFrame> = BoundedQueue::new(config.q_frame);
    let spill_queue: BoundedQueue<String> = BoundedQueue::new(config.q_spill);
    let current_file = spill::CurrentFilePointer::new();

    let live_client = TcpClient::new(collector_addr, config.use_tcp_nodelay);
    let upload_client = TcpClient::new(collector_addr, config.use_tcp_nodelay);

    let connect_timeout = Duration::from_millis(config.t_poll_ms.max(1) * 100);
    if let Err(source) = live_client.connect(connect_timeout) {
        info!(%source, "live client: initial connect failed, supervisor will retry");
    }
    if let Err(source) = upload_client.connect(connect_timeout) {
        info!(%source, "upload client: initial connect failed, supervisor will retry");
    }

    // COND_TIMEOUT bounds every queue/condvar wait; T_POLL is reserved for
    // TCP readiness polling (see `connect_timeout` above and each worker's
    // own use of `config.t_poll_ms` for its TCP send/poll calls).
    let queue_poll_interval = Duration::from_millis(config.cond_timeout_ms);

    thread::scope(|scope| {
        let can_reader_handle = {
            let frame_queue = &frame_queue;
            let terminate = &terminate;
            scope.spawn(move || {
                can_reader::can_reader_loop(&mut can_socket, frame_queue, terminate, queue_poll_interval);
            })
        };

        let formatter_handle = {
            let frame_queue = &frame_queue;
            let spill_queue = &spill_queue;
            let live_client = &live_client;
            let config = &config;
            let terminate = &terminate;
            scope.spawn(move || {
                formatter::formatter_loop(frame_queue, spill_queue, live_client, config, terminate);
            })
        };

        let spill_writer_handle = {
            let spill_queue = &spill_queue;
            let config = &config;
            let terminate = &terminate;
            let current_file = &current_file;
            scope.spawn(move || spill::spill_writer_loop(spill_queue, terminate, config, current_file))
        };

        // A short gap before starting the Uploader so the Spill Writer has
        // published an initial Current-File Pointer.
        thread::sleep(Duration::from_millis(10));

        let uploader_handle = {
            let upload_client = &upload_client;
            let config = &config;
            let current_file = &current_file;
            let terminate = &terminate;
            scope.spawn(move || uploader::uploader_loop(upload_client, config, current_file, terminate))
        };

        supervisor::monitor_loop(&live_client, &upload_client, &config, &terminate);

        can_reader_handle.join().expect("can reader worker panicked");
        formatter_handle.join().expect("formatter worker panicked");
        let spill_result = spill_writer_handle.join().expect("spill writer worker panicked");
        uploader_handle.join().expect("uploader worker panicked");

        spill_result.map_err(PipelineError::from)
    })?;

    live_client.close();
    upload_client.close();
    Ok(())
}
