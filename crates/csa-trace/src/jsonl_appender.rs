use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

const FLUSH_SIZE_BYTES: usize = 64 * 1024;
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendStats {
    pub lines_written: u64,
    pub bytes_written: u64,
    pub write_failures: u64,
}

/// Buffered append-only JSONL writer shared by [`crate::tracer::Tracer`] and
/// [`crate::session_memory::SessionMemory`]. Size- and time-based flush,
/// resume-safe trailing-line truncation so a process killed mid-write never
/// leaves a half-written line at the tail.
pub struct JsonlAppender {
    output_path: PathBuf,
    writer: Option<File>,
    pending: Vec<u8>,
    pending_lines: u64,
    lines_written: u64,
    bytes_written: u64,
    write_failures: u64,
    last_flush: Instant,
}

impl JsonlAppender {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        let output_path = output_path.into();
        let (writer, write_failures) = match open_for_append(&output_path) {
            Ok(mut file) => match truncate_partial_trailing_line(&mut file) {
                Ok(()) => (Some(file), 0),
                Err(err) => {
                    warn!(path = %output_path.display(), error = %err, "failed to truncate partial trailing jsonl line");
                    (None, 1)
                }
            },
            Err(err) => {
                warn!(path = %output_path.display(), error = %err, "failed to open jsonl appender");
                (None, 1)
            }
        };
        Self {
            output_path,
            writer,
            pending: Vec::new(),
            pending_lines: 0,
            lines_written: 0,
            bytes_written: 0,
            write_failures,
            last_flush: Instant::now(),
        }
    }

    pub fn append<T: Serialize>(&mut self, value: &T) {
        match serde_json::to_vec(value) {
            Ok(mut line) => {
                line.push(b'\n');
                self.pending.extend_from_slice(&line);
                self.pending_lines += 1;
                if self.should_flush() {
                    self.flush();
                }
            }
            Err(err) => {
                self.write_failures += 1;
                warn!(path = %self.output_path.display(), error = %err, "failed to serialize jsonl line");
            }
        }
    }

    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            self.last_flush = Instant::now();
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            self.write_failures += 1;
            self.pending.clear();
            self.pending_lines = 0;
            self.last_flush = Instant::now();
            return;
        };
        let pending_bytes = self.pending.len() as u64;
        let pending_lines = self.pending_lines;
        let result = writer.write_all(&self.pending).and_then(|_| writer.flush());
        self.last_flush = Instant::now();
        match result {
            Ok(()) => {
                self.bytes_written += pending_bytes;
                self.lines_written += pending_lines;
            }
            Err(err) => {
                self.write_failures += 1;
                warn!(path = %self.output_path.display(), error = %err, "failed to flush jsonl buffer");
            }
        }
        self.pending.clear();
        self.pending_lines = 0;
    }

    pub fn stats(&self) -> AppendStats {
        AppendStats {
            lines_written: self.lines_written,
            bytes_written: self.bytes_written,
            write_failures: self.write_failures,
        }
    }

    fn should_flush(&self) -> bool {
        self.pending.len() >= FLUSH_SIZE_BYTES || self.last_flush.elapsed() >= FLUSH_INTERVAL
    }
}

impl Drop for JsonlAppender {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Reads every complete (newline-terminated) JSON line from `path`,
/// returning the last `n`. Missing files and trailing partial lines are
/// silently ignored.
pub fn read_last_n<T: for<'de> serde::Deserialize<'de>>(path: &Path, n: usize) -> Vec<T> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let values: Vec<T> = content.lines().filter_map(|line| serde_json::from_str(line).ok()).collect();
    let start = values.len().saturating_sub(n);
    values.into_iter().skip(start).collect()
}

fn open_for_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).read(true).open(path)
}

fn truncate_partial_trailing_line(file: &mut File) -> std::io::Result<()> {
    let file_len = file.metadata()?.len();
    if file_len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last_byte = [0u8; 1];
    file.read_exact(&mut last_byte)?;
    if last_byte[0] == b'\n' {
        file.seek(SeekFrom::End(0))?;
        return Ok(());
    }
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    let truncate_len = buf.iter().rposition(|b| *b == b'\n').map_or(0u64, |pos| pos as u64 + 1);
    file.set_len(truncate_len)?;
    file.seek(SeekFrom::End(0))?;
    Ok(())
}
