use std::{
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Once},
};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt::{
        writer::{BoxMakeWriter, MakeWriterExt},
        MakeWriter,
    },
    prelude::*,
    EnvFilter,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file as well. If it cannot be opened, file logging
    /// is disabled and the other sinks stay active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    /// Directives for the configured level. A bare level applies to the
    /// `bcp.*` targets; dependencies stay at `warn` unless the level is
    /// stricter. Anything else is passed through as a directive string.
    pub(crate) fn directives(&self) -> String {
        let level = self.level.trim();
        let bare = match level.to_ascii_lowercase().as_str() {
            "" => Some("info"),
            "trace" => Some("trace"),
            "debug" => Some("debug"),
            "info" => Some("info"),
            "warn" | "warning" => Some("warn"),
            "error" => Some("error"),
            "off" => Some("off"),
            _ => None,
        };
        match bare {
            Some(level @ ("error" | "off")) => level.to_owned(),
            Some(level) => format!("warn,bcp={level}"),
            None => level.to_owned(),
        }
    }

    /// The effective filter: the configured directives followed by
    /// `RUST_LOG`, so environment directives win on conflicts. Invalid
    /// input falls back to `RUST_LOG` alone, then to `info` for `bcp`.
    pub fn env_filter(&self) -> EnvFilter {
        let directives = self.directives();
        let env = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let mut candidates = Vec::with_capacity(2);
        if let Some(env) = &env {
            candidates.push(format!("{directives},{env}"));
            candidates.push(env.clone());
        } else {
            candidates.push(directives);
        }
        candidates
            .into_iter()
            .find_map(|candidate| EnvFilter::try_new(candidate).ok())
            .unwrap_or_else(|| EnvFilter::new("warn,bcp=info"))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

struct FileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriter {
            guard: self.file.lock(),
        }
    }
}

struct FileWriter<'a> {
    guard: MutexGuard<'a, std::fs::File>,
}

impl Write for FileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Safe to call more than once; only the first call has an effect. Returns
/// whether this call installed the subscriber.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let mut installed = false;
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let mut file_open_failed = false;
        let file = config.file.as_ref().and_then(|path| {
            let opened = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok();
            file_open_failed = opened.is_none();
            opened
        });

        let mut writer = if config.stderr {
            BoxMakeWriter::new(io::stderr)
        } else {
            BoxMakeWriter::new(io::sink)
        };
        if let Some(file) = file {
            writer = BoxMakeWriter::new(writer.and(FileMakeWriter {
                file: Arc::new(Mutex::new(file)),
            }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        installed = tracing::subscriber::set_global_default(subscriber).is_ok();
        if installed && file_open_failed {
            if let Some(path) = &config.file {
                tracing::warn!(
                    target = "bcp.config",
                    path = %path.display(),
                    "failed to open log file; logging to the remaining sinks"
                );
            }
        }
    });
    installed
}
