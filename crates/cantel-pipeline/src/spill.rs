//! Spill Writer: drains the spill queue onto rotating append-only text
//! files on disk, so unsent lines survive a crash or a long offline period.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cantel_queue::{BoundedQueue, Terminate};
use tracing::{error, warn};

use crate::config::PipelineConfig;
use crate::error::SpillError;

/// Shared pointer to the name of the file the Spill Writer currently has
/// open. The Uploader reads this to skip the live file when scanning the
/// spill directory, and blocks on `file_ready` while no other file exists.
pub struct CurrentFilePointer {
    state: Mutex<Option<String>>,
    pub file_ready: Condvar,
}

impl CurrentFilePointer {
    pub fn new() -> Self {
        Self { state: Mutex::new(None), file_ready: Condvar::new() }
    }

    fn set(&self, name: Option<String>) {
        *self.state.lock().unwrap() = name;
        self.file_ready.notify_all();
    }

    pub fn current(&self) -> Option<String> {
        self.state.lock().unwrap().clone()
    }

    /// Blocks up to `timeout` for a change to the current-file pointer.
    pub fn wait(&self, timeout: Duration) {
        let guard = self.state.lock().unwrap();
        let _ = self.file_ready.wait_timeout(guard, timeout);
    }
}

impl Default for CurrentFilePointer {
    fn default() -> Self {
        Self::new()
    }
}

struct OpenSpillFile {
    file: File,
    name: String,
    msg_count: u32,
}

/// Opens a new `msgs_<epoch-seconds>.txt` file in `dir`, disambiguating on
/// collision (two rotations within the same wall-clock second).
fn open_new_spill_file(dir: &PathBuf) -> Result<OpenSpillFile, SpillError> {
    fs::create_dir_all(dir)
        .map_err(|source| SpillError::CreateDir { path: dir.display().to_string(), source })?;

    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| SpillError::ClockWentBackwards)?
        .as_secs();

    let mut suffix = 0u32;
    loop {
        let name = if suffix == 0 {
            format!("msgs_{epoch}.txt")
        } else {
            format!("msgs_{epoch}_{suffix}.txt")
        };
        let path = dir.join(&name);
        match OpenOptions::new().create_new(true).write(true).open(&path) {
            Ok(file) => return Ok(OpenSpillFile { file, name, msg_count: 0 }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                suffix += 1;
                continue;
            }
            Err(source) => {
                return Err(SpillError::OpenFile { path: path.display().to_string(), source })
            }
        }
    }
}

/// Drains `queue` onto rotating spill files until `terminate` is set and the
/// queue has run dry, matching the original SD controller's
/// `while(!(terminate && message_buffer.empty()))` loop.
///
/// A write or flush failure drops that one line rather than advancing the
/// rotation counter, so a full file never gets marked ready on a partial
/// write (see SPEC_FULL.md §9).
pub fn spill_writer_loop(
    queue: &BoundedQueue<String>,
    terminate: &Terminate,
    config: &PipelineConfig,
    current_file: &CurrentFilePointer,
) -> Result<(), SpillError> {
    // COND_TIMEOUT, not T_POLL: this is a queue condvar wait, not TCP
    // readiness polling.
    let poll_interval = Duration::from_millis(config.cond_timeout_ms);
    let mut current: Option<OpenSpillFile> = None;

    while let Some(line) = queue.pop_blocking(terminate, poll_interval) {
        if current.is_none() {
            let opened = open_new_spill_file(&config.spill_dir)?;
            current_file.set(Some(opened.name.clone()));
            current = Some(opened);
        }

        let open = current.as_mut().expect("just opened above");
        match open.file.write_all(line.as_bytes()).and_then(|()| open.file.flush()) {
            Ok(()) => open.msg_count += 1,
            Err(source) => warn!(file = %open.name, %source, "dropping line: spill write failed"),
        }

        if open.msg_count >= config.msgs_per_file {
            current = None;
        }
    }

    if let Some(open) = current.take() {
        if let Err(source) = open.file.sync_all() {
            error!(file = %open.name, %source, "failed to sync final spill file");
        }
    }
    current_file.set(None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    fn test_config(dir: PathBuf, msgs_per_file: u32) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.spill_dir = dir;
        cfg.msgs_per_file = msgs_per_file;
        cfg.t_poll_ms = 5;
        cfg.cond_timeout_ms = 5;
        cfg
    }

    #[test]
    fn writes_all_lines_and_clears_pointer_on_terminate() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path().to_path_buf(), 100);
        let queue: BoundedQueue<String> = BoundedQueue::new(8);
        let terminate = Terminate::new();
        let pointer = CurrentFilePointer::new();

        queue.push_blocking("a\n".to_string(), &terminate, Duration::from_millis(5));
        queue.push_blocking("b\n".to_string(), &terminate, Duration::from_millis(5));

        let handle = std::thread::scope(|scope| {
            let t2 = terminate.clone();
            let pointer_ref = &pointer;
            scope.spawn(move || spill_writer_loop(&queue, &t2, &cfg, pointer_ref).unwrap());
            std::thread::sleep(Duration::from_millis(30));
            terminate.set();
        });
        let _ = handle;

        assert!(pointer.current().is_none());
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let contents = fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert_eq!(contents, "a\nb\n");
    }

    #[test]
    fn rotates_to_a_new_file_after_msgs_per_file() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path().to_path_buf(), 1);
        let queue: BoundedQueue<String> = BoundedQueue::new(8);
        let terminate = Terminate::new();
        let pointer = CurrentFilePointer::new();

        queue.push_blocking("a\n".to_string(), &terminate, Duration::from_millis(5));
        queue.push_blocking("b\n".to_string(), &terminate, Duration::from_millis(5));

        std::thread::scope(|scope| {
            let t2 = terminate.clone();
            scope.spawn(move || spill_writer_loop(&queue, &t2, &cfg, &pointer).unwrap());
            std::thread::sleep(Duration::from_millis(30));
            terminate.set();
        });

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 2);
    }
}
