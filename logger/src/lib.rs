use std::{
    fs::File,
    io::{self, Write},
    sync::Mutex,
    time::Instant,
};

use chrono::Utc;
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<Logger> = OnceCell::new();

/// Severity of a log line. `Trace` lines are suppressed unless the logger
/// was initialized with a verbose [`LogKind`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error,
    Info,
    Trace,
}

impl Level {
    const fn tag(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Info => "INFO",
            Self::Trace => "TRACE",
        }
    }
}

struct LoggerImpl {
    pub sink: Box<dyn Write + Send>,
    pub start_instant: Instant,
}

impl LoggerImpl {
    fn new(kind: &LogKind) -> Self {
        let start_instant = Instant::now();
        match kind.sink {
            SinkKind::Stdout => Self {
                sink: Box::new(io::stdout()),
                start_instant,
            },
            SinkKind::File => {
                let now = Utc::now();
                let filename = format!("mandarin-{}.log", now.timestamp());
                let path = std::env::temp_dir().join(filename);
                Self {
                    sink: Box::new(File::create(path).unwrap()),
                    start_instant,
                }
            }
        }
    }

    fn log<T>(&mut self, level: Level, data: T)
    where
        T: std::fmt::Display,
    {
        let now = self.start_instant.elapsed();
        let seconds = now.as_secs();
        let hours = seconds / 3600;
        let minutes = (seconds / 60) % 60;
        let seconds = seconds % 60;
        let milliseconds = now.subsec_millis();

        writeln!(
            self.sink,
            "[{hours:02}:{minutes:02}:{seconds:02}.{milliseconds:03}] {} {data}",
            level.tag()
        )
        .unwrap();
    }
}

enum SinkKind {
    Stdout,
    File,
}

/// `LogKind` selects the sink (console or logfile) and whether `Trace`
/// lines are emitted.
pub struct LogKind {
    sink: SinkKind,
    max_level: Level,
}

impl LogKind {
    /// Log to console, `Error` and `Info` only. The default choice.
    #[must_use]
    pub const fn stdout() -> Self {
        Self {
            sink: SinkKind::Stdout,
            max_level: Level::Info,
        }
    }

    /// Log on a file in /tmp/mandarin-<timestamp>.log
    #[must_use]
    pub const fn file() -> Self {
        Self {
            sink: SinkKind::File,
            max_level: Level::Info,
        }
    }

    /// Also emit `Trace` lines.
    #[must_use]
    pub const fn verbose(mut self) -> Self {
        self.max_level = Level::Trace;
        self
    }
}

struct Logger {
    inner_impl: Mutex<LoggerImpl>,
    max_level: Level,
}

impl Logger {
    fn new(kind: &LogKind) -> Self {
        Self {
            inner_impl: Mutex::new(LoggerImpl::new(kind)),
            max_level: kind.max_level,
        }
    }

    fn log<T>(&self, level: Level, data: T)
    where
        T: std::fmt::Display,
    {
        if level > self.max_level {
            return;
        }
        if let Ok(ref mut inner) = self.inner_impl.lock() {
            inner.log(level, data);
        }
    }
}

pub fn init_logger(kind: LogKind) {
    LOGGER.set(Logger::new(&kind)).ok();
}

/// Log at an explicit level. A message logged before `init_logger` is
/// silently dropped.
pub fn log<T>(level: Level, data: T)
where
    T: std::fmt::Display,
{
    LOGGER.get().map_or((), |logger| logger.log(level, data));
}

pub fn error<T: std::fmt::Display>(data: T) {
    log(Level::Error, data);
}

pub fn info<T: std::fmt::Display>(data: T) {
    log(Level::Info, data);
}

pub fn trace<T: std::fmt::Display>(data: T) {
    log(Level::Trace, data);
}
