//! CAN Reader: pulls frames off the CAN bus and onto the Frame Queue.

use std::time::Duration;

use cantel_queue::{BoundedQueue, PushOutcome, Terminate};
use tracing::{error, warn};

use crate::can::CanSocket;
use crate::frame::CanFrame;

const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Reads frames from `socket` and pushes them onto `frame_queue` until
/// `terminate` is set. A read error other than a timeout is fatal for this
/// worker: it logs and returns, leaving the rest of the pipeline to drain
/// naturally (the Formatter will eventually see an empty queue).
///
/// `push_poll_interval` is COND_TIMEOUT, bounding the Frame Queue's condvar
/// wait when it's full; socket readiness uses its own fixed poll timeout.
pub fn can_reader_loop(
    socket: &mut dyn CanSocket,
    frame_queue: &BoundedQueue<CanFrame>,
    terminate: &Terminate,
    push_poll_interval: Duration,
) {
    while !terminate.is_set() {
        match socket.poll_readable(POLL_TIMEOUT) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(source) => {
                error!(%source, "can reader: poll failed, exiting");
                return;
            }
        }

        let frame = match socket.read_frame() {
            Ok(frame) => frame,
            Err(source) => {
                error!(%source, "can reader: read failed, exiting");
                return;
            }
        };

        if frame_queue.push_blocking(frame, terminate, push_poll_interval) == PushOutcome::Terminated
        {
            warn!("can reader: dropping frame, terminated while frame queue full");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::FakeCanSocket;

    #[test]
    fn drains_all_fake_frames_into_the_queue() {
        let mut socket = FakeCanSocket::new(vec![
            CanFrame::new(1, [0; 8]),
            CanFrame::new(2, [0; 8]),
            CanFrame::new(3, [0; 8]),
        ]);
        let queue: BoundedQueue<CanFrame> = BoundedQueue::new(8);
        let terminate = Terminate::new();

        std::thread::scope(|scope| {
            let t2 = terminate.clone();
            let queue_ref = &queue;
            scope.spawn(move || {
                can_reader_loop(&mut socket, queue_ref, &t2, Duration::from_millis(5));
            });
            std::thread::sleep(Duration::from_millis(100));
            terminate.set();
        });

        assert_eq!(queue.len(), 3);
    }
}
