//! Structured logging setup for the event log store
//!
//! Builds a `tracing` subscriber from a [`LogConfig`]: JSONL or pretty console
//! output, optional rotated JSONL files, and `EnvFilter` level control with
//! per-target overrides.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines format for log aggregation (default)
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//! - **Target Overrides**: e.g. `eventlog_store::store=debug` on top of the default level
//! - **Test Capture**: the testing preset writes through the test harness
//!
//! # Quick Start
//!
//! ```ignore
//! use eventlog_logging::{EventlogSubscriberBuilder, LogConfig};
//!
//! // Simple setup with defaults (JSONL to console)
//! EventlogSubscriberBuilder::new().init();
//!
//! // Development mode with pretty human-readable output
//! EventlogSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .with_target("eventlog_store::barrel", "trace")
//!     .init();
//! ```

pub mod config;
pub mod error;

pub use config::{
    ConsoleConfig, ConsoleFormat, FileConfig, JsonFields, LogConfig, RotationStrategy,
};
pub use error::LogError;
pub use tracing_appender::non_blocking::WorkerGuard;

use std::fs::{self, File};

use tracing::Dispatch;
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{self, MakeWriter, TestWriter};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer, Registry};

type Base = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

/// Builder for configuring and initializing the logging subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable pretty output during development.
#[derive(Debug, Clone, Default)]
pub struct EventlogSubscriberBuilder {
    config: LogConfig,
}

impl EventlogSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Override the level for one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.config = self.config.with_target(target, level);
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the subscriber without installing it
    ///
    /// `RUST_LOG` takes precedence over the configured directives. The guard,
    /// present when file output is enabled, must outlive all logging.
    ///
    /// # Errors
    ///
    /// Returns an error if a directive does not parse or the log file cannot
    /// be opened.
    pub fn build(self) -> Result<(Dispatch, Option<WorkerGuard>), LogError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.config.directives())?,
        };

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        let console = &self.config.console;
        if console.enabled {
            let layer = if console.capture {
                console_layer(&self.config, TestWriter::new)
            } else {
                console_layer(&self.config, std::io::stdout)
            };
            let layer = match &console.level {
                Some(level) => layer.with_filter(EnvFilter::try_new(level)?).boxed(),
                None => layer,
            };
            layers.push(layer);
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(json_layer(&self.config, writer));
        }

        let subscriber = Registry::default().with(env_filter).with(layers);
        Ok((Dispatch::new(subscriber), guard))
    }

    /// Try to initialize the subscriber globally
    ///
    /// # Errors
    ///
    /// Returns an error if building fails or a global subscriber has already
    /// been set.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LogError> {
        let (dispatch, guard) = self.build()?;
        tracing::dispatcher::set_global_default(dispatch)?;
        Ok(guard)
    }

    /// Initialize the subscriber globally
    ///
    /// Returns a guard that must be kept alive for the duration of the program
    /// when file output is enabled. Failures are reported on stderr.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {}", e);
                None
            }
        }
    }
}

fn console_layer<W>(config: &LogConfig, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    if config.console.format == ConsoleFormat::Pretty {
        fmt::layer()
            .with_ansi(config.console.ansi)
            .with_target(true)
            .with_writer(writer)
            .boxed()
    } else {
        json_layer(config, writer)
    }
}

fn json_layer<W>(config: &LogConfig, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let fields = config.json;
    fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(fields.span_context)
        .with_span_list(fields.span_context)
        .with_file(fields.source_location)
        .with_line_number(fields.source_location)
        .with_writer(writer)
        .boxed()
}

/// Open the file writer; `Never` truncates a single file, the others append
/// to rotated files
fn file_writer(file_config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LogError> {
    fs::create_dir_all(&file_config.directory)?;

    let rotation = match file_config.rotation {
        RotationStrategy::Never => {
            let path = file_config
                .directory
                .join(format!("{}.log", file_config.prefix));
            let file = File::create(path)?;
            return Ok(tracing_appender::non_blocking(file));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(file_config.prefix.clone());
    if let Some(max_files) = file_config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder.build(&file_config.directory)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() {
    EventlogSubscriberBuilder::new().init();
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() {
    EventlogSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init();
}

/// Initialize logging for testing (minimal output)
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_testing() {
    let _ = EventlogSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
