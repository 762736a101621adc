//! Logging setup (tracing)

use crate::config::LoggingConfig;
use crate::error::LogError;
use std::fs;
use std::path::Path;
use tracing::Span;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Owns the logging configuration and the file writer's flush guard.
///
/// `main` builds one and hands it to each component, which takes a named
/// span from it. Nothing is global until `init` runs, and `init` only
/// installs a subscriber once per context.
pub struct LogContext {
    config: LoggingConfig,
    initialized: bool,
    guard: Option<WorkerGuard>,
}

impl LogContext {
    pub fn new(config: LoggingConfig) -> Self {
        Self {
            config,
            initialized: false,
            guard: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn init(&mut self) -> Result<(), LogError> {
        if self.initialized {
            return Ok(());
        }
        let directives =
            std::env::var("RUST_LOG").unwrap_or_else(|_| self.config.level.clone());
        let filter = EnvFilter::try_new(directives)?;

        let console = self
            .config
            .console
            .then(|| fmt::layer().with_writer(std::io::stderr));

        let file = match &self.config.file {
            Some(path) => {
                let (writer, guard) = file_writer(path)?;
                self.guard = Some(guard);
                Some(fmt::layer().with_ansi(false).with_writer(writer))
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(file)
            .try_init()?;
        self.initialized = true;
        Ok(())
    }

    /// Span that tags every event a component emits with its name.
    pub fn component(&self, name: &'static str) -> Span {
        tracing::info_span!("component", name)
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new(LoggingConfig {
            file: None,
            ..LoggingConfig::default()
        })
    }
}

fn file_writer(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), LogError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|source| LogError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;
    let file_name = path
        .file_name()
        .ok_or_else(|| LogError::FileName(path.to_path_buf()))?;
    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
