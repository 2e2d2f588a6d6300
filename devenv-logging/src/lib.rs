//! Process-wide tracing setup for devenv binaries.
//!
//! Configured from the environment:
//!
//! - `DEVENV_LOG_LEVEL` (or `RUST_LOG`): filter directives, default `info`
//! - `DEVENV_LOG_OUTPUT`: `console`, `file`, `both` or `none`
//! - `DEVENV_LOG_FORMAT`: `human` or `json`
//! - `DEVENV_LOG_FILE`: path of the daily-rolling log file

use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

const DEFAULT_LOG_FILE: &str = "/tmp/devenv.log";

// Caps for chatty dependencies.
const QUIET_TARGETS: &[&str] = &["tokio=warn", "hyper=warn", "sqlx=warn", "tower_http=info"];

// --- Custom "Tee" Writer ---
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A, B> Write for Tee<A, B>
where
    A: Write,
    B: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;
    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    None,
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" => Ok(LogOutput::Both),
            "none" | "off" => Ok(LogOutput::None),
            other => Err(format!("unknown log output '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" | "pretty" | "text" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
    pub file: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Console,
            format: LogFormat::Human,
            file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl LogSettings {
    /// Read `DEVENV_LOG_*`; unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            level: lookup("DEVENV_LOG_LEVEL").unwrap_or(defaults.level),
            output: lookup("DEVENV_LOG_OUTPUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.output),
            format: lookup("DEVENV_LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.format),
            file: lookup("DEVENV_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.file),
        }
    }

    fn filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        for target in QUIET_TARGETS {
            if let Ok(directive) = target.parse() {
                filter = filter.add_directive(directive);
            }
        }

        filter
    }

    fn file_parts(&self) -> (&Path, &Path) {
        let dir = self
            .file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("/tmp"));
        let name = self
            .file
            .file_name()
            .map(Path::new)
            .unwrap_or_else(|| Path::new("devenv.log"));
        (dir, name)
    }
}

/// Initializes the global tracing subscriber from `DEVENV_LOG_*`.
///
/// Keep the returned guard alive for the life of the process when logging
/// to a file; dropping it flushes and stops the background writer.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(&LogSettings::from_env())
}

pub fn init_with(settings: &LogSettings) -> Option<WorkerGuard> {
    let is_json = settings.format == LogFormat::Json;
    let subscriber = registry().with(settings.filter());

    match settings.output {
        LogOutput::Both => {
            let (dir, name) = settings.file_parts();
            let file_appender = tracing_appender::rolling::daily(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let tee_writer = MakeTee {
                make_a: std::io::stdout,
                make_b: non_blocking,
            };

            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(tee_writer);
            if is_json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer.pretty()).init();
            }
            Some(guard)
        }
        LogOutput::Console => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
            if is_json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer.pretty()).init();
            }
            None
        }
        LogOutput::File => {
            let (dir, name) = settings.file_parts();
            let file_appender = tracing_appender::rolling::daily(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            if is_json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
            Some(guard)
        }
        LogOutput::None => {
            subscriber.init();
            None
        }
    }
}
