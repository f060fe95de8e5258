use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

/// Privacy-preserving file logger for the shell.
///
/// Prompts, embedded shell commands and model responses are never written to
/// the log. Only operational events (requests, stream statistics, how many
/// commands ran and how they were classified) are recorded. Debug mode is
/// opt-in and marks every entry it produces.
pub struct PrivacyLogger {
    log_file_path: PathBuf,
    debug_mode: bool,
    writer: Arc<Mutex<Option<std::fs::File>>>,
}

/// Log entry structure for structured logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    pub context: Option<LogContext>,
    pub is_debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LogCategory {
    System,
    Configuration,
    Network,
    Stream,
    Interpolation,
    Shell,
    Debug,
}

/// Context information for log entries (privacy-safe)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogContext {
    pub component: Option<String>,
    pub operation: Option<String>,
    pub duration_ms: Option<u64>,
    pub error_code: Option<String>,
    pub model: Option<String>,
    pub count: Option<usize>,
    pub success: Option<bool>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_component(mut self, component: &str) -> Self {
        self.component = Some(component.to_string());
        self
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error_code(mut self, error_code: &str) -> Self {
        self.error_code = Some(error_code.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }
}

impl PrivacyLogger {
    /// Create a logger writing to the default location under the config directory
    pub fn new() -> Result<Self> {
        let log_file_path = Self::default_log_path()?;
        Self::with_path(log_file_path)
    }

    /// Create a logger writing to an explicit file
    pub fn with_path(log_file_path: PathBuf) -> Result<Self> {
        if let Some(parent) = log_file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            log_file_path,
            debug_mode: false,
            writer: Arc::new(Mutex::new(None)),
        })
    }

    /// Turn on debug entries. Debug entries are clearly marked in the file.
    pub fn enable_debug_mode(&mut self) -> Result<()> {
        self.debug_mode = true;
        self.log_warning(
            LogCategory::Debug,
            "DEBUG MODE ACTIVE: detailed logging enabled".to_string(),
            None,
        )
    }

    pub fn log_error(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        self.write_entry(LogLevel::Error, category, message, context)
    }

    pub fn log_warning(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        self.write_entry(LogLevel::Warning, category, message, context)
    }

    pub fn log_info(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        self.write_entry(LogLevel::Info, category, message, context)
    }

    /// Log a debug event (only written when debug mode is on)
    pub fn log_debug(
        &self,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        if !self.debug_mode {
            return Ok(());
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Debug,
            category,
            message: format!("[DEBUG] {}", message),
            context,
            is_debug: true,
        };

        self.write_log_entry(&entry)
    }

    /// Log system startup information
    pub fn log_startup(&self, version: &str, base_url: &str) -> Result<()> {
        let context = LogContext::new()
            .with_component("system")
            .with_operation("startup");

        self.log_info(
            LogCategory::System,
            format!("cocollama {} started against {}", version, base_url),
            Some(context),
        )
    }

    /// Log a session setting change (e.g. the active model)
    pub fn log_config_change(&self, setting: &str, old_value: &str, new_value: &str) -> Result<()> {
        let context = LogContext::new()
            .with_component("session")
            .with_operation("update");

        self.log_info(
            LogCategory::Configuration,
            format!("{} changed from {} to {}", setting, old_value, new_value),
            Some(context),
        )
    }

    /// Log one HTTP exchange with the model server
    pub fn log_request(&self, endpoint: &str, duration_ms: u64, success: bool) -> Result<()> {
        let mut context = LogContext::new()
            .with_component("client")
            .with_operation(endpoint)
            .with_duration_ms(duration_ms)
            .with_success(success);
        if !success {
            context = context.with_error_code("request_failed");
        }

        let level = if success { LogLevel::Info } else { LogLevel::Warning };
        let message = format!(
            "Request {}: {} ({}ms)",
            endpoint,
            if success { "success" } else { "failed" },
            duration_ms
        );

        self.write_entry(level, LogCategory::Network, message, Some(context))
    }

    /// Log the outcome of one interpolation batch. Only counts are recorded.
    pub fn log_interpolation(
        &self,
        event: &str,
        command_count: usize,
        details: Option<&str>,
    ) -> Result<()> {
        let context = LogContext::new()
            .with_component("interpolation")
            .with_operation(event)
            .with_count(command_count);

        let message = match details {
            Some(details) => format!("Interpolation {}: {} command(s) ({})", event, command_count, details),
            None => format!("Interpolation {}: {} command(s)", event, command_count),
        };

        self.log_info(LogCategory::Interpolation, message, Some(context))
    }

    fn write_entry(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: String,
        context: Option<LogContext>,
    ) -> Result<()> {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            category,
            message: self.redact_sensitive_info(&message),
            context,
            is_debug: false,
        };

        self.write_log_entry(&entry)
    }

    fn default_log_path() -> Result<PathBuf> {
        let mut log_path =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not find config directory"))?;
        log_path.push("cocollama");
        log_path.push("cocollama.log");
        Ok(log_path)
    }

    fn write_log_entry(&self, entry: &LogEntry) -> Result<()> {
        let mut writer_guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("Failed to acquire log writer lock"))?;

        if writer_guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file_path)?;
            *writer_guard = Some(file);
        }

        if let Some(ref mut file) = *writer_guard {
            writeln!(file, "{}", self.format_log_entry(entry))?;
            file.flush()?;
        }

        Ok(())
    }

    fn format_log_entry(&self, entry: &LogEntry) -> String {
        let timestamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
        let level = format!("{:?}", entry.level).to_uppercase();
        let category = format!("{:?}", entry.category).to_uppercase();

        let mut formatted = format!("[{}] {} {} {}", timestamp, level, category, entry.message);

        if let Some(ref context) = entry.context {
            let mut parts = Vec::new();

            if let Some(ref component) = context.component {
                parts.push(format!("component={}", component));
            }
            if let Some(ref operation) = context.operation {
                parts.push(format!("operation={}", operation));
            }
            if let Some(duration) = context.duration_ms {
                parts.push(format!("duration={}ms", duration));
            }
            if let Some(ref error_code) = context.error_code {
                parts.push(format!("error={}", error_code));
            }
            if let Some(ref model) = context.model {
                parts.push(format!("model={}", model));
            }
            if let Some(count) = context.count {
                parts.push(format!("count={}", count));
            }
            if let Some(success) = context.success {
                parts.push(format!("success={}", success));
            }

            if !parts.is_empty() {
                formatted.push_str(&format!(" [{}]", parts.join(", ")));
            }
        }

        if entry.is_debug {
            formatted = format!("DEBUG: {}", formatted);
        }

        formatted
    }

    /// Strip home directories and credential-looking values from a message
    fn redact_sensitive_info(&self, message: &str) -> String {
        if self.debug_mode {
            return message.to_string();
        }

        redaction_rules()
            .iter()
            .fold(message.to_string(), |text, (pattern, replacement)| {
                pattern.replace_all(&text, *replacement).into_owned()
            })
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_file_path
    }
}

fn redaction_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            (r"/home/[^/\s]+", "/home/[USER]"),
            (r"/Users/[^/\s]+", "/Users/[USER]"),
            (r"api_key=\S+", "api_key=[REDACTED]"),
            (r"token=\S+", "token=[REDACTED]"),
            (r"password=\S+", "password=[REDACTED]"),
            (r"://[^/@\s]+@", "://[REDACTED]@"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Global logger instance
static GLOBAL_LOGGER: OnceLock<Arc<Mutex<PrivacyLogger>>> = OnceLock::new();

/// Initialize the global logger
pub fn init_logger() -> Result<()> {
    let logger = PrivacyLogger::new()?;
    let _ = GLOBAL_LOGGER.set(Arc::new(Mutex::new(logger)));
    Ok(())
}

/// Get the global logger instance
pub fn get_logger() -> Result<Arc<Mutex<PrivacyLogger>>> {
    GLOBAL_LOGGER
        .get()
        .cloned()
        .ok_or_else(|| anyhow!("Logger not initialized. Call init_logger() first."))
}

/// Run `f` against the global logger, ignoring a missing or poisoned logger.
pub fn with_logger<F>(f: F)
where
    F: FnOnce(&PrivacyLogger) -> Result<()>,
{
    if let Ok(logger) = get_logger() {
        if let Ok(logger_guard) = logger.lock() {
            let _ = f(&logger_guard);
        }
    }
}

#[macro_export]
macro_rules! log_error {
    ($category:expr, $message:expr) => {
        $crate::logging::with_logger(|l| l.log_error($category, $message.to_string(), None))
    };
    ($category:expr, $message:expr, $context:expr) => {
        $crate::logging::with_logger(|l| l.log_error($category, $message.to_string(), Some($context)))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($category:expr, $message:expr) => {
        $crate::logging::with_logger(|l| l.log_warning($category, $message.to_string(), None))
    };
    ($category:expr, $message:expr, $context:expr) => {
        $crate::logging::with_logger(|l| l.log_warning($category, $message.to_string(), Some($context)))
    };
}

#[macro_export]
macro_rules! log_info {
    ($category:expr, $message:expr) => {
        $crate::logging::with_logger(|l| l.log_info($category, $message.to_string(), None))
    };
    ($category:expr, $message:expr, $context:expr) => {
        $crate::logging::with_logger(|l| l.log_info($category, $message.to_string(), Some($context)))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($category:expr, $message:expr) => {
        $crate::logging::with_logger(|l| l.log_debug($category, $message.to_string(), None))
    };
    ($category:expr, $message:expr, $context:expr) => {
        $crate::logging::with_logger(|l| l.log_debug($category, $message.to_string(), Some($context)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_logger() -> (PrivacyLogger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let logger = PrivacyLogger::with_path(temp_dir.path().join("test.log")).unwrap();
        (logger, temp_dir)
    }

    #[test]
    fn test_log_error_writes_level_and_category() {
        let (logger, _temp_dir) = create_test_logger();

        logger
            .log_error(LogCategory::Network, "Connection dropped".to_string(), None)
            .unwrap();

        let log_content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(log_content.contains("ERROR"));
        assert!(log_content.contains("NETWORK"));
        assert!(log_content.contains("Connection dropped"));
    }

    #[test]
    fn test_log_with_context() {
        let (logger, _temp_dir) = create_test_logger();

        let context = LogContext::new()
            .with_component("stream")
            .with_operation("generate")
            .with_duration_ms(120)
            .with_model("gemma3:1b")
            .with_count(4);

        logger
            .log_info(LogCategory::Stream, "Stream finished".to_string(), Some(context))
            .unwrap();

        let log_content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(log_content.contains("component=stream"));
        assert!(log_content.contains("operation=generate"));
        assert!(log_content.contains("duration=120ms"));
        assert!(log_content.contains("model=gemma3:1b"));
        assert!(log_content.contains("count=4"));
    }

    #[test]
    fn test_debug_logs_only_in_debug_mode() {
        let (mut logger, _temp_dir) = create_test_logger();

        logger
            .log_debug(LogCategory::Debug, "hidden".to_string(), None)
            .unwrap();
        if logger.log_path().exists() {
            let log_content = fs::read_to_string(logger.log_path()).unwrap();
            assert!(!log_content.contains("hidden"));
        }

        logger.enable_debug_mode().unwrap();
        assert!(logger.is_debug_mode());
        logger
            .log_debug(LogCategory::Debug, "visible".to_string(), None)
            .unwrap();

        let log_content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(log_content.contains("DEBUG: "));
        assert!(log_content.contains("[DEBUG] visible"));
    }

    #[test]
    fn test_redact_sensitive_info() {
        let (logger, _temp_dir) = create_test_logger();

        let redacted = logger.redact_sensitive_info(
            "saved /home/alice/notes.txt via http://user:pw@localhost:11434 token=abc123",
        );

        assert!(redacted.contains("/home/[USER]/notes.txt"));
        assert!(redacted.contains("http://[REDACTED]@localhost:11434"));
        assert!(redacted.contains("token=[REDACTED]"));
        assert!(!redacted.contains("alice"));
        assert!(!redacted.contains("abc123"));
    }

    #[test]
    fn test_log_request_failure_is_warning() {
        let (logger, _temp_dir) = create_test_logger();

        logger.log_request("/api/generate", 250, false).unwrap();

        let log_content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(log_content.contains("WARNING"));
        assert!(log_content.contains("Request /api/generate: failed (250ms)"));
        assert!(log_content.contains("error=request_failed"));
    }

    #[test]
    fn test_log_interpolation_records_counts_only() {
        let (logger, _temp_dir) = create_test_logger();

        logger
            .log_interpolation("executed", 2, Some("1 succeeded, 1 failed"))
            .unwrap();

        let log_content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(log_content.contains("INTERPOLATION"));
        assert!(log_content.contains("Interpolation executed: 2 command(s) (1 succeeded, 1 failed)"));
        assert!(log_content.contains("count=2"));
    }

    #[test]
    fn test_log_config_change() {
        let (logger, _temp_dir) = create_test_logger();

        logger.log_config_change("model", "gemma3:1b", "llama3.2").unwrap();

        let log_content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(log_content.contains("model changed from gemma3:1b to llama3.2"));
        assert!(log_content.contains("component=session"));
    }

    #[test]
    fn test_macros_are_silent_without_global_logger() {
        crate::log_info!(LogCategory::Shell, "Command interrupted");
        crate::log_warning!(
            LogCategory::Stream,
            "Skipped a line",
            LogContext::new().with_component("stream")
        );
        crate::log_error!(LogCategory::Network, format!("failed after {}ms", 5));
        crate::log_debug!(LogCategory::Debug, "detail");
    }
}
