//! Log destinations.
//!
//! `RotatingFileSink` alternates between `<base>.native1` and
//! `<base>.native2` once the active file grows past
//! `max_writes * AVG_LINE_LENGTH` bytes. No handle is kept open between
//! writes: every line is an open-append-flush-close cycle.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

/// Suffix appended to the configured base name
pub const LOG_SUFFIX: &str = ".native";

/// Assumed bytes per line when converting a write count into a file size
pub const AVG_LINE_LENGTH: u64 = 80;

/// Destination for fully formatted log lines.
pub trait LogSink: Send + Sync {
    /// Write one line (including its trailing newline) as a single write.
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Appends to `<base>.native`, or alternates between two numbered files.
#[derive(Debug)]
pub struct RotatingFileSink {
    base: PathBuf,
    max_writes: u64,
    /// Digit of the file last selected; settles equal modification times
    last: Mutex<Option<char>>,
}

impl RotatingFileSink {
    pub fn new(base: impl Into<PathBuf>, max_writes: u64) -> Self {
        Self {
            base: base.into(),
            max_writes,
            last: Mutex::new(None),
        }
    }

    pub fn rotates(&self) -> bool {
        self.max_writes > 0
    }

    /// Size in bytes above which the active file is abandoned.
    pub fn size_limit(&self) -> u64 {
        self.max_writes.saturating_mul(AVG_LINE_LENGTH)
    }

    /// `<base>.native` followed by `digit` (if any).
    pub fn file_name(&self, digit: Option<char>) -> PathBuf {
        let mut name: OsString = self.base.as_os_str().to_owned();
        name.push(LOG_SUFFIX);
        if let Some(d) = digit {
            let mut buf = [0u8; 4];
            name.push(d.encode_utf8(&mut buf));
        }
        PathBuf::from(name)
    }

    /// Pick the file the next line goes to, truncating it when switching.
    ///
    /// The more recently modified of the two files is active. Equal times
    /// (coarse timestamps during a burst) go to the file this sink picked
    /// last, else to the smaller file, else to the second. When only one
    /// file exists it is active; when neither does the second is used.
    pub fn which_file(&self) -> io::Result<PathBuf> {
        if !self.rotates() {
            return Ok(self.file_name(None));
        }

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let first = self.file_name(Some('1'));
        let second = self.file_name(Some('2'));
        let first_meta = fs::metadata(&first).ok();
        let second_meta = fs::metadata(&second).ok();

        let first_active = match (&first_meta, &second_meta) {
            (Some(f1), Some(f2)) => match modified(f1).cmp(&modified(f2)) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => match *last {
                    Some(digit) => digit == '1',
                    None => f1.len() < f2.len(),
                },
            },
            (Some(_), None) => true,
            (None, _) => false,
        };

        let (active, active_meta, alternate, alternate_digit) = if first_active {
            (first, first_meta, second, '2')
        } else {
            (second, second_meta, first, '1')
        };
        let size = active_meta.map_or(0, |m| m.len());

        if size > self.size_limit() {
            truncate(&alternate)?;
            *last = Some(alternate_digit);
            return Ok(alternate);
        }
        *last = Some(if alternate_digit == '1' { '2' } else { '1' });
        Ok(active)
    }
}

fn modified(meta: &fs::Metadata) -> SystemTime {
    meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

fn truncate(path: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map(drop)
}

impl LogSink for RotatingFileSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let path = self.which_file()?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn line(n: usize) -> String {
        format!("{n:0>79}\n")
    }

    #[test]
    fn file_names() {
        let sink = RotatingFileSink::new("/var/log/bridge", 10);
        assert_eq!(sink.file_name(None), PathBuf::from("/var/log/bridge.native"));
        assert_eq!(sink.file_name(Some('1')), PathBuf::from("/var/log/bridge.native1"));
        assert_eq!(sink.file_name(Some('2')), PathBuf::from("/var/log/bridge.native2"));
    }

    #[test]
    fn without_rotation_single_file_grows() {
        let tmp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(tmp.path().join("log"), 0);
        for n in 0..50 {
            sink.write_line(&line(n)).unwrap();
        }
        let content = fs::read_to_string(tmp.path().join("log.native")).unwrap();
        assert_eq!(content.lines().count(), 50);
        assert!(!tmp.path().join("log.native1").exists());
        assert!(!tmp.path().join("log.native2").exists());
    }

    #[test]
    fn first_write_goes_to_second_file() {
        let tmp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(tmp.path().join("log"), 5);
        sink.write_line(&line(0)).unwrap();
        assert!(tmp.path().join("log.native2").exists());
        assert!(!tmp.path().join("log.native1").exists());
    }

    #[test]
    fn only_first_file_is_used_when_alone() {
        let tmp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(tmp.path().join("log"), 5);
        fs::write(tmp.path().join("log.native1"), line(0)).unwrap();
        assert_eq!(sink.which_file().unwrap(), tmp.path().join("log.native1"));
    }

    #[test]
    fn switches_and_truncates_past_limit() {
        let tmp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(tmp.path().join("log"), 3);
        let second = tmp.path().join("log.native2");
        let first = tmp.path().join("log.native1");

        // 4 lines of 80 bytes = 320 > 3 * 80
        for n in 0..4 {
            sink.write_line(&line(n)).unwrap();
        }
        assert_eq!(fs::metadata(&second).unwrap().len(), 4 * AVG_LINE_LENGTH);

        // stale content in the older alternate file must be discarded
        fs::write(&first, "stale\n").unwrap();
        fs::File::options()
            .write(true)
            .open(&first)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000))
            .unwrap();

        sink.write_line(&line(99)).unwrap();
        let content = fs::read_to_string(&first).unwrap();
        assert_eq!(content, line(99));
        assert_eq!(fs::metadata(&second).unwrap().len(), 4 * AVG_LINE_LENGTH);
    }

    #[test]
    fn stays_on_file_at_exact_limit() {
        let tmp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(tmp.path().join("log"), 2);
        sink.write_line(&line(0)).unwrap();
        sink.write_line(&line(1)).unwrap();
        // size == limit, not above it
        assert_eq!(sink.which_file().unwrap(), tmp.path().join("log.native2"));
    }

    #[test]
    fn burst_rotation_never_truncates_the_active_file() {
        let tmp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(tmp.path().join("log"), 2);
        let first = tmp.path().join("log.native1");
        let second = tmp.path().join("log.native2");
        let read = |p: &Path| fs::read_to_string(p).unwrap_or_default();

        let mut lost = Vec::new();
        for n in 0..2000 {
            sink.write_line(&line(n)).unwrap();
            let (a, b) = (read(&first), read(&second));
            for wanted in [n.saturating_sub(1), n] {
                let text = line(wanted);
                if !a.contains(&text) && !b.contains(&text) {
                    lost.push(wanted);
                }
            }
        }
        assert!(lost.is_empty(), "lost lines: {:?}", &lost[..lost.len().min(10)]);
    }

    #[test]
    fn equal_times_prefer_the_file_picked_last() {
        let tmp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(tmp.path().join("log"), 2);
        let first = tmp.path().join("log.native1");
        let second = tmp.path().join("log.native2");
        let stamp = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(5_000);

        // both full with one mtime: the tie goes to the second, which rotates
        fs::write(&first, line(0).repeat(3)).unwrap();
        fs::write(&second, line(1).repeat(3)).unwrap();
        for p in [&first, &second] {
            fs::File::options().write(true).open(p).unwrap().set_modified(stamp).unwrap();
        }
        assert_eq!(sink.which_file().unwrap(), first);
        // .native1 was just truncated; make its time match again
        fs::write(&first, line(2)).unwrap();
        for p in [&first, &second] {
            fs::File::options().write(true).open(p).unwrap().set_modified(stamp).unwrap();
        }
        assert_eq!(sink.which_file().unwrap(), first);
        assert_eq!(fs::read_to_string(&first).unwrap(), line(2));
    }

    #[test]
    fn equal_times_without_history_pick_the_smaller_file() {
        let tmp = TempDir::new().unwrap();
        let sink = RotatingFileSink::new(tmp.path().join("log"), 5);
        let first = tmp.path().join("log.native1");
        let second = tmp.path().join("log.native2");
        let stamp = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(5_000);

        fs::write(&first, line(0)).unwrap();
        fs::write(&second, line(1).repeat(3)).unwrap();
        for p in [&first, &second] {
            fs::File::options().write(true).open(p).unwrap().set_modified(stamp).unwrap();
        }
        assert_eq!(sink.which_file().unwrap(), first);
    }
}
