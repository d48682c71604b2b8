//! Minimal shared logger for the satsuma workspace.
//!
//! The host decides once where log lines go (stdout or a file under the
//! system temp directory); afterwards any crate can call [`log`] without
//! holding configuration. Lines are prefixed with the time elapsed since
//! [`init_logger`] was called.

use std::{
    fs::File,
    io::{self, Write},
    sync::Mutex,
    time::Instant,
};

use chrono::Utc;
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<Logger> = OnceCell::new();

/// Where log lines are written.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum Sink {
    /// Log to the console, the default choice.
    Stdout,

    /// Log to `satsuma-<timestamp>.log` in the system temp directory.
    TempFile,
}

struct Logger {
    inner: Mutex<Inner>,
}

struct Inner {
    sink: Box<dyn Write + Send>,
    started: Instant,
}

impl Inner {
    fn new(sink: Sink) -> Self {
        let started = Instant::now();
        match sink {
            Sink::Stdout => Self {
                sink: Box::new(io::stdout()),
                started,
            },
            Sink::TempFile => {
                let filename = format!("satsuma-{}.log", Utc::now().timestamp());
                let path = std::env::temp_dir().join(filename);
                Self {
                    sink: Box::new(File::create(path).unwrap()),
                    started,
                }
            }
        }
    }

    fn log<T: std::fmt::Display>(&mut self, data: T) {
        let elapsed = self.started.elapsed();
        let seconds = elapsed.as_secs();
        let hours = seconds / 3600;
        let minutes = (seconds / 60) % 60;
        let seconds = seconds % 60;
        let millis = elapsed.subsec_millis();

        writeln!(
            self.sink,
            "[{hours:02}:{minutes:02}:{seconds:02}.{millis:03}] {data}"
        )
        .unwrap();
    }
}

/// Install the global logger. Later calls are ignored.
pub fn init_logger(sink: Sink) {
    LOGGER
        .set(Logger {
            inner: Mutex::new(Inner::new(sink)),
        })
        .ok();
}

/// Write one line through the global logger.
///
/// A no-op until [`init_logger`] has been called, so library code can log
/// unconditionally.
pub fn log<T: std::fmt::Display>(data: T) {
    if let Some(logger) = LOGGER.get() {
        if let Ok(ref mut inner) = logger.inner.lock() {
            inner.log(data);
        }
    }
}
