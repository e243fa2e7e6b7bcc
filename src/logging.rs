//! Tracing setup for the proxy binary.
//!
//! Stdout carries the MCP protocol, so logs go to stderr unless a log file
//! is configured. A configured file is rotated on startup and written through
//! a line-flushing writer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Rotated copies kept next to the active log file.
pub const KEEP_ROTATED_LOGS: u32 = 3;

/// Where and how to write logs.
#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `mcp_proxy=debug`.
    pub level: String,
    pub file: Option<PathBuf>,
    pub json: bool,
}

/// Install the global subscriber.
pub fn init_tracing(settings: &LogSettings) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &settings.file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            rotate_log_file(path, KEEP_ROTATED_LOGS);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            install(filter, FlushingWriter::new(file), settings.json, false);
        }
        None => install(filter, std::io::stderr, settings.json, true),
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?settings.file,
        pid = std::process::id(),
        "mcp-proxy starting"
    );
    Ok(())
}

fn install<W>(filter: EnvFilter, writer: W, json: bool, ansi: bool)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(false);
    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.with_ansi(ansi).try_init()
    };
}

/// Rotate `proxy.log` → `proxy.log.1` → … → `proxy.log.{keep}`.
///
/// The oldest file beyond `keep` is deleted; gaps in the chain are skipped.
pub fn rotate_log_file(base_path: &Path, keep: u32) {
    if keep == 0 {
        let _ = std::fs::remove_file(base_path);
        return;
    }
    let _ = std::fs::remove_file(rotated(base_path, keep));

    for i in (1..keep).rev() {
        let _ = std::fs::rename(rotated(base_path, i), rotated(base_path, i + 1));
    }

    if base_path.exists() {
        let _ = std::fs::rename(base_path, rotated(base_path, 1));
    }
}

fn rotated(base_path: &Path, n: u32) -> PathBuf {
    PathBuf::from(format!("{}.{n}", base_path.display()))
}

/// File writer that flushes after every write, so nothing is lost if a
/// backend takes the process down.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
