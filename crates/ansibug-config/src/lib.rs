//! Configuration for the ansibug debuggee.
//!
//! The debuggee runs inside `ansible-playbook`, so configuration is read from
//! an optional TOML file (`ANSIBUG_CONFIG`) and otherwise falls back to
//! defaults. Nothing here is required for the debugger to work.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

/// Environment variable pointing at a TOML config file.
pub const CONFIG_ENV_VAR: &str = "ANSIBUG_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebuggeeConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl DebuggeeConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load the file named by `ANSIBUG_CONFIG`, or defaults when it is unset.
    ///
    /// A broken config file must not stop the playbook from running, so load
    /// failures are logged and defaults are used instead.
    pub fn load_from_env() -> Self {
        let Some(path) = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from) else {
            return Self::default();
        };

        match Self::load_from_path(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(
                    target: "ansibug.config",
                    path = %path.display(),
                    error = %err,
                    "failed to load config; continuing with defaults"
                );
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    /// Mirror logs to stderr.
    ///
    /// Off by default: `ansible-playbook` owns the terminal and interleaved
    /// debugger logs make its output unreadable.
    #[serde(default)]
    pub stderr: bool,

    /// Append logs to this file. If it cannot be opened, file logging is
    /// disabled and other sinks keep working.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: false,
            file: None,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        tracing_subscriber::EnvFilter::try_new(Self::normalize_level_directives(&self.level))
            .unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::default()
                    .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
            })
    }

    /// The effective filter: `level` merged with `RUST_LOG` when it is set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        match env_directives {
            Some(env_directives) => {
                let combined = format!(
                    "{},{env_directives}",
                    Self::normalize_level_directives(&self.level)
                );
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Upper bound on how long `start` waits for the socket address.
    /// Unset means wait indefinitely.
    #[serde(default)]
    pub start_timeout_ms: Option<u64>,

    /// Upper bound on how long `shutdown` waits for queued messages to be
    /// written before cancelling the transport.
    #[serde(default = "SessionConfig::default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Default bound for `wait_for_client`.
    #[serde(default = "SessionConfig::default_wait_for_client_timeout_ms")]
    pub wait_for_client_timeout_ms: u64,

    /// Directory for the discovery file. Defaults to `$TMPDIR`, then `/tmp`.
    #[serde(default)]
    pub discovery_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: None,
            drain_timeout_ms: Self::default_drain_timeout_ms(),
            wait_for_client_timeout_ms: Self::default_wait_for_client_timeout_ms(),
            discovery_dir: None,
        }
    }
}

impl SessionConfig {
    fn default_drain_timeout_ms() -> u64 {
        5_000
    }

    fn default_wait_for_client_timeout_ms() -> u64 {
        10_000
    }

    pub fn start_timeout(&self) -> Option<Duration> {
        self.start_timeout_ms.map(Duration::from_millis)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn wait_for_client_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_for_client_timeout_ms)
    }
}

struct SharedFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for SharedFileMakeWriter {
    type Writer = SharedFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileWriter {
            guard: self.file.lock(),
        }
    }
}

struct SharedFileWriter<'a> {
    guard: parking_lot::MutexGuard<'a, std::fs::File>,
}

impl Write for SharedFileWriter<'_> {
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
/// Safe to call more than once; only the first call has any effect. Returns
/// `true` if this call installed the subscriber.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let mut installed = false;
    TRACING_INIT.call_once(|| {
        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_failed = config.file.is_some() && file.is_none();

        // Without any sink the subscriber still filters, it just writes nowhere.
        let mut make_writer = BoxMakeWriter::new(io::sink);
        if config.stderr {
            make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(SharedFileMakeWriter {
                file: Arc::new(Mutex::new(file)),
            }));
        }

        let layer: Box<dyn Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .with_thread_names(true)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry()
            .with(config.env_filter())
            .with(layer);
        installed = tracing::subscriber::set_global_default(subscriber).is_ok();

        if installed && file_failed {
            if let Some(path) = config.file.as_ref() {
                tracing::warn!(
                    target: "ansibug.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
    installed
}
