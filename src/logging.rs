use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_CAP: u64 = 10 * 1024 * 1024;

/// Where human-facing log lines go. The `ask` command keeps stdout for the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
}

pub fn parse_level(log_level: &str) -> Level {
    Level::from_str(log_level).unwrap_or_else(|_| {
        eprintln!("Invalid log level: {}. Using INFO level.", log_level);
        Level::INFO
    })
}

pub fn init_logging(log_level: Level, log_file: Option<&str>, console: Console) {
    let level_filter = LevelFilter::from_level(log_level);
    let console_layer = match console {
        Console::Stdout => tracing_subscriber::fmt::layer().with_writer(io::stdout).boxed(),
        Console::Stderr => tracing_subscriber::fmt::layer().with_writer(io::stderr).boxed(),
    };

    if let Some(path) = log_file {
        let capped_writer = make_capped_file_writer(PathBuf::from(path), LOG_FILE_CAP);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(capped_writer);
        tracing_subscriber::registry()
            .with(console_layer.with_filter(level_filter))
            .with(file_layer.with_filter(level_filter))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(console_layer.with_filter(level_filter))
            .init();
    }
}

fn make_capped_file_writer(path: PathBuf, max_len: u64) -> impl Fn() -> CappedFileWriter {
    let lock = Arc::new(Mutex::new(()));
    move || CappedFileWriter { path: path.clone(), max_len, lock: lock.clone() }
}

/// Appends to a file; once it reaches `max_len` only the newest half is kept.
struct CappedFileWriter {
    path: PathBuf,
    max_len: u64,
    lock: Arc<Mutex<()>>,
}

impl CappedFileWriter {
    fn truncate_to_tail(&self) -> io::Result<()> {
        let keep_bytes = self.max_len / 2;
        let mut tail = Vec::new();
        {
            let mut rf = OpenOptions::new().read(true).open(&self.path)?;
            let size = rf.metadata()?.len();
            rf.seek(SeekFrom::Start(size.saturating_sub(keep_bytes)))?;
            rf.read_to_end(&mut tail)?;
        }
        // Start on a line boundary so the first kept record is whole.
        let start = match tail.iter().position(|b| *b == b'\n') {
            Some(i) if i + 1 < tail.len() => i + 1,
            _ => 0,
        };
        let mut wf = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        wf.write_all(&tail[start..])
    }
}

impl Write for CappedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A poisoned lock only means another writer panicked mid-line.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Ok(meta) = std::fs::metadata(&self.path) {
            if meta.len() >= self.max_len {
                self.truncate_to_tail()?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
