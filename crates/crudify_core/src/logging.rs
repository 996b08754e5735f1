//! Logging bootstrap and operation-aware log lines.
//!
//! # Responsibility
//! - Install one size-rotated file logger per process, sized from
//!   [`CrudConfig`].
//! - Tag every file line with the operation running on the writing thread.
//! - Redact secret field values before they reach a log line.
//!
//! # Invariants
//! - Repeated init with identical settings is a no-op; any different
//!   setting is rejected, never applied.
//! - Lines written outside an operation carry `op=-`.
//! - Initialization never panics.

use crate::config::CrudConfig;
use crate::context::OperationId;
use flexi_logger::{
    Cleanup, Criterion, DeferredNow, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{error, info, Record as LogRecord};
use once_cell::sync::OnceCell;
use std::cell::Cell;
use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "crudify";
const BYTES_PER_MB: u64 = 1024 * 1024;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;
const MAX_FIELD_CHARS: usize = 80;

/// Written in place of secret values.
pub const REDACTED: &str = "<redacted>";

static LOGGER: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

thread_local! {
    static CURRENT_OPERATION: Cell<Option<OperationId>> = const { Cell::new(None) };
}

/// Validated logger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: &'static str,
    pub log_dir: PathBuf,
    pub max_file_bytes: u64,
    pub keep_files: usize,
}

impl LogSettings {
    /// Settings for `level` under `log_dir` with the default rotation limits.
    ///
    /// # Errors
    /// - Unsupported `level`.
    /// - Empty or relative `log_dir`.
    pub fn new(level: &str, log_dir: &str) -> Result<Self, String> {
        let defaults = CrudConfig::default();
        Ok(Self {
            level: normalize_level(level)?,
            log_dir: normalize_log_dir(log_dir)?,
            max_file_bytes: defaults.log_max_file_mb * BYTES_PER_MB,
            keep_files: defaults.log_keep_files,
        })
    }

    /// Settings described by `config`; `None` when it names no log directory.
    pub fn from_config(config: &CrudConfig) -> Result<Option<Self>, String> {
        let Some(dir) = &config.log_dir else {
            return Ok(None);
        };
        let dir = dir
            .to_str()
            .ok_or_else(|| format!("log_dir `{}` is not valid UTF-8", dir.display()))?;
        let mut settings = Self::new(&config.log_level, dir)?;
        settings.max_file_bytes = config.log_max_file_mb.max(1) * BYTES_PER_MB;
        settings.keep_files = config.log_keep_files.max(1);
        Ok(Some(settings))
    }
}

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

impl ActiveLogger {
    fn start(settings: LogSettings) -> Result<Self, String> {
        std::fs::create_dir_all(&settings.log_dir).map_err(|err| {
            format!(
                "failed to create log directory `{}`: {err}",
                settings.log_dir.display()
            )
        })?;

        let handle = Logger::try_with_str(settings.level)
            .map_err(|err| format!("invalid log level `{}`: {err}", settings.level))?
            .log_to_file(
                FileSpec::default()
                    .directory(settings.log_dir.as_path())
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(settings.max_file_bytes),
                Naming::Numbers,
                Cleanup::KeepLogFiles(settings.keep_files),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(operation_format)
            .start()
            .map_err(|err| format!("failed to start logger: {err}"))?;

        install_panic_hook_once();
        info!(
            "event=logging_init module=logging status=ok level={} log_dir={} max_file_bytes={} keep_files={} version={}",
            settings.level,
            settings.log_dir.display(),
            settings.max_file_bytes,
            settings.keep_files,
            env!("CARGO_PKG_VERSION")
        );

        Ok(Self {
            settings,
            _handle: handle,
        })
    }
}

/// Starts file logging at `level` under `log_dir` with default rotation.
///
/// # Errors
/// - Invalid `level` or `log_dir`, a failed backend start, or a logger
///   already running with different settings.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    start(LogSettings::new(level, log_dir)?)
}

/// Starts logging from `config` when it names a log directory.
///
/// Returns `Ok(false)` when `config.log_dir` is unset and nothing was started.
pub fn init_from_config(config: &CrudConfig) -> Result<bool, String> {
    match LogSettings::from_config(config)? {
        Some(settings) => start(settings).map(|()| true),
        None => Ok(false),
    }
}

/// Starts the process logger, or confirms the running one matches.
pub fn start(settings: LogSettings) -> Result<(), String> {
    let active = LOGGER.get_or_try_init(|| ActiveLogger::start(settings.clone()))?;
    check_compatible(&active.settings, &settings)
}

/// `(level, log_dir)` of the active logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    LOGGER
        .get()
        .map(|active| (active.settings.level, active.settings.log_dir.clone()))
}

/// `debug` in debug builds, `info` in release builds.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Runs `work` with log lines of this thread tagged by `operation_id`.
///
/// The previous tag is restored afterwards, also when `work` panics.
pub fn with_operation<R>(operation_id: OperationId, work: impl FnOnce() -> R) -> R {
    let previous = CURRENT_OPERATION.with(|slot| slot.replace(Some(operation_id)));
    let _restore = RestoreOperation(previous);
    work()
}

/// Operation whose work is running on this thread.
pub fn current_operation() -> Option<OperationId> {
    CURRENT_OPERATION.with(Cell::get)
}

/// Renders `value` for a debug line, or [`REDACTED`] when it is secret.
pub fn redact(value: &dyn Display, secret: bool) -> String {
    if secret {
        return REDACTED.to_string();
    }
    sanitize_message(&value.to_string(), MAX_FIELD_CHARS)
}

struct RestoreOperation(Option<OperationId>);

impl Drop for RestoreOperation {
    fn drop(&mut self) {
        CURRENT_OPERATION.with(|slot| slot.set(self.0));
    }
}

fn check_compatible(active: &LogSettings, requested: &LogSettings) -> Result<(), String> {
    if active.log_dir != requested.log_dir {
        return Err(format!(
            "logging already initialized at `{}`; refusing to switch to `{}`",
            active.log_dir.display(),
            requested.log_dir.display()
        ));
    }
    if active.level != requested.level {
        return Err(format!(
            "logging already initialized with level `{}`; refusing to switch to `{}`",
            active.level, requested.level
        ));
    }
    if (active.max_file_bytes, active.keep_files) != (requested.max_file_bytes, requested.keep_files)
    {
        return Err(format!(
            "logging already rotates at {} bytes keeping {} files; refusing to switch to {} bytes keeping {}",
            active.max_file_bytes, active.keep_files, requested.max_file_bytes, requested.keep_files
        ));
    }
    Ok(())
}

fn operation_tag() -> String {
    current_operation().map_or_else(|| "-".to_string(), |id| id.to_string())
}

fn operation_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &LogRecord<'_>,
) -> std::io::Result<()> {
    write!(w, "op={} ", operation_tag())?;
    flexi_logger::detailed_format(w, now, record)
}

fn normalize_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error"
        )),
    }
}

fn normalize_log_dir(log_dir: &str) -> Result<PathBuf, String> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err("log_dir cannot be empty".to_string());
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(format!("log_dir must be an absolute path, got `{trimmed}`"));
    }
    Ok(path.to_path_buf())
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map_or_else(|| "unknown".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        error!(
            "event=panic_captured module=logging status=error operation_id={} location={} payload={}",
            operation_tag(),
            location,
            panic_payload_summary(panic_info)
        );
        previous_hook(panic_info);
    }));
}

fn panic_payload_summary(info: &std::panic::PanicHookInfo<'_>) -> String {
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    sanitize_message(&payload, MAX_PANIC_PAYLOAD_CHARS)
}

fn sanitize_message(value: &str, max_chars: usize) -> String {
    let normalized = value.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(max_chars).collect::<String>();
    if normalized.chars().count() > max_chars {
        truncated.push_str("...");
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::{
        check_compatible, current_operation, init_from_config, init_logging, logging_status,
        operation_format, redact, with_operation, LogSettings, BYTES_PER_MB, REDACTED,
    };
    use crate::config::CrudConfig;
    use flexi_logger::DeferredNow;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};
    use uuid::Uuid;

    fn unique_temp_dir(suffix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "crudify-logging-{suffix}-{}-{nanos}",
            std::process::id()
        ))
    }

    fn formatted_line() -> String {
        let mut buffer = Vec::new();
        operation_format(
            &mut buffer,
            &mut DeferredNow::new(),
            &log::Record::builder()
                .args(format_args!("event=test module=logging status=ok"))
                .level(log::Level::Info)
                .target("crudify")
                .build(),
        )
        .expect("format should succeed");
        String::from_utf8(buffer).expect("utf-8 line")
    }

    #[test]
    fn settings_validate_level_and_directory() {
        let settings = LogSettings::new(" WARNING ", "/var/log/crudify").expect("valid settings");
        assert_eq!(settings.level, "warn");
        assert_eq!(settings.max_file_bytes, 10 * BYTES_PER_MB);
        assert_eq!(settings.keep_files, 5);

        let error = LogSettings::new("info", "logs/dev").expect_err("relative dir");
        assert!(error.contains("absolute"));
        assert!(LogSettings::new("verbose", "/tmp").is_err());
    }

    #[test]
    fn rotation_limits_come_from_config() {
        let config = CrudConfig {
            log_dir: Some(PathBuf::from("/var/log/crudify")),
            log_max_file_mb: 3,
            log_keep_files: 7,
            ..CrudConfig::default()
        };
        let settings = LogSettings::from_config(&config)
            .expect("valid config")
            .expect("log dir set");
        assert_eq!(settings.max_file_bytes, 3 * BYTES_PER_MB);
        assert_eq!(settings.keep_files, 7);
    }

    #[test]
    fn config_without_log_dir_starts_nothing() {
        let started = init_from_config(&CrudConfig::default()).expect("no-op should succeed");
        assert!(!started);
    }

    #[test]
    fn changed_rotation_is_a_conflict() {
        let active = LogSettings::new("info", "/var/log/crudify").expect("settings");
        assert!(check_compatible(&active, &active.clone()).is_ok());

        let mut resized = active.clone();
        resized.keep_files = 1;
        let error = check_compatible(&active, &resized).expect_err("rotation conflict");
        assert!(error.contains("refusing to switch"));
    }

    #[test]
    fn lines_carry_the_running_operation() {
        assert!(formatted_line().starts_with("op=- "));

        let id = Uuid::new_v4();
        let line = with_operation(id, formatted_line);
        assert!(line.starts_with(&format!("op={id} ")));
        assert!(line.contains("event=test"));
        assert_eq!(current_operation(), None);
    }

    #[test]
    fn operation_tag_is_restored_after_panic() {
        let outer = Uuid::new_v4();
        with_operation(outer, || {
            let inner = std::panic::catch_unwind(|| {
                with_operation(Uuid::new_v4(), || panic!("job failed"));
            });
            assert!(inner.is_err());
            assert_eq!(current_operation(), Some(outer));
        });
        assert_eq!(current_operation(), None);
    }

    #[test]
    fn secrets_are_redacted_and_values_capped() {
        assert_eq!(redact(&"hunter2", true), REDACTED);
        assert_eq!(redact(&"line1\nline2", false), "line1 line2");
        let long = "x".repeat(200);
        assert!(redact(&long, false).ends_with("..."));
    }

    #[test]
    fn init_logging_is_idempotent_for_same_config_and_rejects_conflicts() {
        let log_dir = unique_temp_dir("idempotent");
        let log_dir_str = log_dir
            .to_str()
            .expect("temp dir should be valid UTF-8")
            .to_string();
        let second_dir = unique_temp_dir("different");
        let second_dir_str = second_dir
            .to_str()
            .expect("temp dir should be valid UTF-8")
            .to_string();

        init_logging("info", &log_dir_str).expect("first init should succeed");
        init_logging("info", &log_dir_str).expect("same config should be idempotent");

        let level_error =
            init_logging("debug", &log_dir_str).expect_err("level conflict should fail");
        assert!(level_error.contains("refusing to switch"));

        let dir_error =
            init_logging("info", &second_dir_str).expect_err("directory conflict should fail");
        assert!(dir_error.contains("refusing to switch"));

        let (active_level, active_dir) = logging_status().expect("logging should be active");
        assert_eq!(active_level, "info");
        assert_eq!(active_dir, log_dir);
    }
}
