//! Uploader: drains completed spill files over the second TCP connection,
//! deleting each file once fully sent, and persists a resume pointer
//! (`last.txt`) across restarts.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cantel_net::TcpClient;
use cantel_queue::Terminate;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::spill::CurrentFilePointer;

const RESUME_FILE_NAME: &str = "last.txt";

/// Where the uploader left off, as persisted in `last.txt`.
struct ResumePointer {
    file_name: Option<String>,
    offset: u64,
}

fn resume_pointer_path(spill_dir: &Path) -> PathBuf {
    spill_dir.join(RESUME_FILE_NAME)
}

/// Reads `last.txt`. A missing file, a missing second line, or a
/// non-numeric offset all fall back to "no resume point" rather than
/// failing the whole uploader, mirroring the original client's behaviour.
fn read_resume_pointer(spill_dir: &Path) -> ResumePointer {
    let path = resume_pointer_path(spill_dir);
    let Ok(text) = fs::read_to_string(&path) else {
        return ResumePointer { file_name: None, offset: 0 };
    };
    let mut lines = text.lines();
    let Some(name) = lines.next().filter(|l| !l.is_empty()) else {
        return ResumePointer { file_name: None, offset: 0 };
    };
    let offset = lines.next().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
    ResumePointer { file_name: Some(name.to_string()), offset }
}

/// Writes the resume pointer on shutdown. `None` truncates the file to
/// empty so a future run doesn't try to resume a file we finished with.
fn write_resume_pointer(spill_dir: &Path, pointer: Option<(&str, u64)>) {
    let path = resume_pointer_path(spill_dir);
    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&path)?;
        if let Some((name, offset)) = pointer {
            writeln!(file, "{name}")?;
            writeln!(file, "{offset}")?;
        }
        file.flush()
    })();
    if let Err(source) = result {
        warn!(path = %path.display(), %source, "failed to persist resume pointer");
    }
}

/// A file currently open for draining, plus the read position before the
/// last line taken from it (so a failed send can rewind).
struct OpenDrainFile {
    reader: BufReader<File>,
    name: String,
    pos_before_last_line: u64,
}

/// Picks the next file to drain from `spill_dir`: any regular file other
/// than the one the Spill Writer currently has open and `last.txt` itself.
/// Blocks on `current_file`'s condvar when no candidate exists yet.
fn select_next_file(
    spill_dir: &Path,
    current_file: &CurrentFilePointer,
    terminate: &Terminate,
    poll_interval: Duration,
) -> Option<OpenDrainFile> {
    loop {
        // No ordering requirement across files (SPEC_FULL.md §9): take the
        // first eligible entry `read_dir` happens to yield.
        let excluded = current_file.current();
        let candidate = fs::read_dir(spill_dir).ok().and_then(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .find(|name| name != RESUME_FILE_NAME && Some(name.as_str()) != excluded.as_deref())
        });

        if let Some(name) = candidate {
            let path = spill_dir.join(&name);
            match File::open(&path) {
                Ok(file) => {
                    return Some(OpenDrainFile {
                        reader: BufReader::new(file),
                        name,
                        pos_before_last_line: 0,
                    })
                }
                Err(source) => {
                    warn!(file = %name, %source, "could not open spill file, skipping");
                    let _ = fs::remove_file(&path);
                    continue;
                }
            }
        }

        if terminate.is_set() {
            return None;
        }
        current_file.wait(poll_interval);
    }
}

/// Resumes a file named in `last.txt` at the recorded byte offset, if it
/// still exists; otherwise falls through to [`select_next_file`].
fn open_resume_file(spill_dir: &Path, pointer: ResumePointer) -> Option<OpenDrainFile> {
    let name = pointer.file_name?;
    let path = spill_dir.join(&name);
    let mut file = File::open(&path).ok()?;
    file.seek(SeekFrom::Start(pointer.offset)).ok()?;
    Some(OpenDrainFile { reader: BufReader::new(file), name, pos_before_last_line: pointer.offset })
}

enum SendResult {
    Sent,
    NotSent,
    Cancelled,
}

/// Waits for `client` to connect (re-checking `terminate`), then tries to
/// send `line` once. Mirrors `ft_client.cxx`'s `send_msg`: a poll timeout,
/// a poll error, or a send error all count as "not sent this round", only
/// a `terminate` while disconnected counts as cancelled.
fn send_line(
    client: &TcpClient,
    line: &str,
    terminate: &Terminate,
    poll_interval: Duration,
    send_timeout: Duration,
) -> SendResult {
    let connected = client.wait_connected(poll_interval, || terminate.is_set());
    if !connected {
        return SendResult::Cancelled;
    }
    match client.send(line.as_bytes(), send_timeout) {
        cantel_net::SendOutcome::Sent => SendResult::Sent,
        _ => SendResult::NotSent,
    }
}

/// Runs the uploader until `terminate` is set, returning once the current
/// file (if any) has had its resume pointer written out.
pub fn uploader_loop(
    client: &TcpClient,
    config: &PipelineConfig,
    current_file: &CurrentFilePointer,
    terminate: &Terminate,
) {
    // COND_TIMEOUT governs the condvar waits below (`wait_connected`,
    // `current_file.wait`); T_POLL is reserved for TCP #2's send-readiness
    // poll inside `send_line`.
    let poll_interval = Duration::from_millis(config.cond_timeout_ms);
    let send_timeout = Duration::from_millis(config.t_poll_ms);

    let mut open = open_resume_file(&config.spill_dir, read_resume_pointer(&config.spill_dir))
        .or_else(|| select_next_file(&config.spill_dir, current_file, terminate, poll_interval));

    while let Some(mut file) = open.take() {
        let mut line = String::new();
        file.pos_before_last_line = file.reader.stream_position().unwrap_or(0);

        let read = file.reader.read_line(&mut line).unwrap_or(0);
        if read == 0 {
            // EOF: this file is fully drained, delete it and move on.
            let path = config.spill_dir.join(&file.name);
            if let Err(source) = fs::remove_file(&path) {
                warn!(file = %file.name, %source, "could not delete drained spill file");
            } else {
                info!(file = %file.name, "drained and deleted spill file");
            }
            open = select_next_file(&config.spill_dir, current_file, terminate, poll_interval);
            continue;
        }

        if !line.ends_with('\n') {
            line.push('\n');
        }

        match send_line(client, &line, terminate, poll_interval, send_timeout) {
            SendResult::Sent => {
                open = Some(file);
            }
            SendResult::NotSent => {
                let _ = file.reader.seek(SeekFrom::Start(file.pos_before_last_line));
                open = Some(file);
            }
            SendResult::Cancelled => {
                let offset = file.pos_before_last_line;
                write_resume_pointer(&config.spill_dir, Some((&file.name, offset)));
                return;
            }
        }
    }

    write_resume_pointer(&config.spill_dir, None);
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::net::TcpListener;

    use tempfile::tempdir;

    use super::*;

    fn test_config(dir: PathBuf) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.spill_dir = dir;
        cfg.t_poll_ms = 5;
        cfg.cond_timeout_ms = 5;
        cfg
    }

    #[test]
    fn resume_pointer_round_trips() {
        let dir = tempdir().unwrap();
        write_resume_pointer(dir.path(), Some(("msgs_1.txt", 42)));
        let read = read_resume_pointer(dir.path());
        assert_eq!(read.file_name.as_deref(), Some("msgs_1.txt"));
        assert_eq!(read.offset, 42);
    }

    #[test]
    fn missing_resume_file_defaults_to_none() {
        let dir = tempdir().unwrap();
        let read = read_resume_pointer(dir.path());
        assert!(read.file_name.is_none());
        assert_eq!(read.offset, 0);
    }

    #[test]
    fn malformed_offset_defaults_to_zero() {
        let dir = tempdir().unwrap();
        let mut f = File::create(resume_pointer_path(dir.path())).unwrap();
        writeln!(f, "msgs_1.txt").unwrap();
        writeln!(f, "not-a-number").unwrap();
        let read = read_resume_pointer(dir.path());
        assert_eq!(read.file_name.as_deref(), Some("msgs_1.txt"));
        assert_eq!(read.offset, 0);
    }

    #[test]
    fn drains_and_deletes_a_completed_file_over_loopback() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("msgs_1.txt"), "line one\nline two\n").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let received = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            std::io::Read::read_to_end(&mut stream, &mut buf).ok();
            buf
        });

        let client = TcpClient::new(addr, true);
        client.connect(Duration::from_secs(1)).unwrap();

        let cfg = test_config(dir.path().to_path_buf());
        let current_file = CurrentFilePointer::new();
        let terminate = Terminate::new();

        std::thread::scope(|scope| {
            let t2 = terminate.clone();
            let client_ref = &client;
            let cfg_ref = &cfg;
            let current_file_ref = &current_file;
            scope.spawn(move || uploader_loop(client_ref, cfg_ref, current_file_ref, &t2));
            std::thread::sleep(Duration::from_millis(200));
            terminate.set();
            client.close();
        });

        assert!(!dir.path().join("msgs_1.txt").exists());
        let data = received.join().unwrap();
        assert_eq!(String::from_utf8(data).unwrap(), "line one\nline two\n");
    }
}
