use colored::*;
use std::fmt;

use crate::logging::{with_logger, LogCategory, LogContext};

/// An error rendered for the terminal with actionable suggestions
#[derive(Debug, Clone)]
pub struct UserFriendlyError {
    pub error_type: ErrorType,
    pub message: String,
    pub suggestions: Vec<String>,
    pub technical_details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorType {
    /// The model server could not be reached at all
    Connection,
    /// The connection failed or the server answered with an error mid-request
    Transport,
    /// A response body could not be decoded
    Decode,
    Timeout,
    NotFound,
    Permission,
    Configuration,
    General,
}

impl UserFriendlyError {
    pub fn new(error_type: ErrorType, message: String) -> Self {
        Self {
            error_type,
            message,
            suggestions: Vec::new(),
            technical_details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestions.push(suggestion.to_string());
        self
    }

    pub fn with_suggestions(mut self, suggestions: &[&str]) -> Self {
        self.suggestions
            .extend(suggestions.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_technical_details(mut self, details: String) -> Self {
        self.technical_details = Some(details);
        self
    }

    fn title(&self) -> &'static str {
        match self.error_type {
            ErrorType::Connection => "Connection Error",
            ErrorType::Transport => "Request Failed",
            ErrorType::Decode => "Response Error",
            ErrorType::Timeout => "Timeout Error",
            ErrorType::NotFound => "Not Found",
            ErrorType::Permission => "Permission Error",
            ErrorType::Configuration => "Configuration Error",
            ErrorType::General => "Error",
        }
    }

    /// Print the error with suggestions and record it in the log
    pub fn display(&self) {
        with_logger(|logger| {
            let context = LogContext::new()
                .with_component("error_handling")
                .with_operation("display_error")
                .with_error_code(&format!("{:?}", self.error_type))
                .with_success(false);
            logger.log_error(
                LogCategory::System,
                format!("{:?}: {}", self.error_type, self.message),
                Some(context),
            )
        });

        eprintln!("{}: {}", self.title().bold().red(), self.message);

        if !self.suggestions.is_empty() {
            eprintln!("{}", "Suggested solutions:".bold().yellow());
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                eprintln!("  {}. {}", (i + 1).to_string().green(), suggestion);
            }
        }

        if let Some(details) = &self.technical_details {
            eprintln!("{} {}", "Technical details:".dimmed(), details.dimmed());
        }
    }
}

impl fmt::Display for UserFriendlyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UserFriendlyError {}

/// Classify an error from a shell operation for display
pub fn enhance_error(error: &anyhow::Error) -> UserFriendlyError {
    if let Some(reqwest_error) = error.downcast_ref::<reqwest::Error>() {
        return enhance_request_error(reqwest_error, error);
    }

    let error_msg = format!("{:#}", error).to_lowercase();

    if error_msg.contains("connection refused") || error_msg.contains("failed to connect") {
        return UserFriendlyError::new(
            ErrorType::Connection,
            "Unable to reach the Ollama server".to_string(),
        )
        .with_suggestions(&[
            "Ensure Ollama is running: ollama serve",
            "Check the --host and --port values",
        ])
        .with_technical_details(format!("{:#}", error));
    }

    if error_msg.contains("timed out") || error_msg.contains("timeout") {
        return UserFriendlyError::new(
            ErrorType::Timeout,
            "The request timed out".to_string(),
        )
        .with_suggestion("Try again, the model may still be loading")
        .with_technical_details(format!("{:#}", error));
    }

    if error_msg.contains("permission denied") {
        return UserFriendlyError::new(ErrorType::Permission, "Permission denied".to_string())
            .with_suggestion("Choose a location you can write to")
            .with_technical_details(format!("{:#}", error));
    }

    if error_msg.contains("no such file") || error_msg.contains("not found") {
        return UserFriendlyError::new(
            ErrorType::NotFound,
            "File or resource not found".to_string(),
        )
        .with_suggestions(&[
            "Check the path or model name for typos",
            "List installed models with: list",
        ])
        .with_technical_details(format!("{:#}", error));
    }

    if error_msg.contains("decode") || error_msg.contains("parse") {
        return UserFriendlyError::new(
            ErrorType::Decode,
            "The server sent a response that could not be read".to_string(),
        )
        .with_technical_details(format!("{:#}", error));
    }

    if error_msg.contains("config") {
        return UserFriendlyError::new(
            ErrorType::Configuration,
            "Configuration issue detected".to_string(),
        )
        .with_suggestion("Check ~/.config/cocollama/config.json or delete it to restore defaults")
        .with_technical_details(format!("{:#}", error));
    }

    UserFriendlyError::new(ErrorType::General, format!("{:#}", error))
}

fn enhance_request_error(request_error: &reqwest::Error, error: &anyhow::Error) -> UserFriendlyError {
    let details = format!("{:#}", error);

    if request_error.is_connect() {
        return UserFriendlyError::new(
            ErrorType::Connection,
            "Unable to reach the Ollama server".to_string(),
        )
        .with_suggestions(&[
            "Ensure Ollama is running: ollama serve",
            "Check the --host and --port values",
        ])
        .with_technical_details(details);
    }

    if request_error.is_timeout() {
        return UserFriendlyError::new(ErrorType::Timeout, "The request timed out".to_string())
            .with_suggestion("Try again, the model may still be loading")
            .with_technical_details(details);
    }

    if let Some(status) = request_error.status() {
        if status == reqwest::StatusCode::NOT_FOUND {
            return UserFriendlyError::new(
                ErrorType::NotFound,
                "The server does not know that model".to_string(),
            )
            .with_suggestions(&["List installed models with: list", "Download it with: pull <name>"])
            .with_technical_details(details);
        }
        return UserFriendlyError::new(
            ErrorType::Transport,
            format!("Server answered with HTTP {}", status),
        )
        .with_technical_details(details);
    }

    if request_error.is_decode() {
        return UserFriendlyError::new(
            ErrorType::Decode,
            "The server sent a response that could not be read".to_string(),
        )
        .with_technical_details(details);
    }

    UserFriendlyError::new(ErrorType::Transport, "Request failed".to_string())
        .with_technical_details(details)
}

pub fn display_warning(message: &str) {
    eprintln!("{}", message.yellow());
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_builder() {
        let error = UserFriendlyError::new(ErrorType::Transport, "boom".to_string())
            .with_suggestion("Try this")
            .with_suggestions(&["Or this"])
            .with_technical_details("details".to_string());

        assert_eq!(error.suggestions, vec!["Try this", "Or this"]);
        assert_eq!(error.technical_details.as_deref(), Some("details"));
        assert_eq!(error.to_string(), "boom");
    }

    #[test]
    fn test_enhance_connection_error() {
        let enhanced = enhance_error(&anyhow!("tcp connect error: Connection refused (os error 111)"));

        assert_eq!(enhanced.error_type, ErrorType::Connection);
        assert!(enhanced.suggestions.iter().any(|s| s.contains("ollama serve")));
    }

    #[test]
    fn test_enhance_timeout_error() {
        let enhanced = enhance_error(&anyhow!("operation timed out"));
        assert_eq!(enhanced.error_type, ErrorType::Timeout);
    }

    #[test]
    fn test_enhance_permission_error() {
        let enhanced = enhance_error(&anyhow!("Permission denied (os error 13)"));
        assert_eq!(enhanced.error_type, ErrorType::Permission);
    }

    #[test]
    fn test_enhance_not_found_error() {
        let enhanced = enhance_error(&anyhow!("No such file or directory (os error 2)"));
        assert_eq!(enhanced.error_type, ErrorType::NotFound);
    }

    #[test]
    fn test_enhance_context_chain_is_searched() {
        let error = anyhow!("Permission denied").context("Failed to write out.txt");
        let enhanced = enhance_error(&error);

        assert_eq!(enhanced.error_type, ErrorType::Permission);
        assert!(enhanced
            .technical_details
            .unwrap()
            .contains("Failed to write out.txt"));
    }

    #[test]
    fn test_enhance_generic_error_keeps_message() {
        let enhanced = enhance_error(&anyhow!("something odd"));

        assert_eq!(enhanced.error_type, ErrorType::General);
        assert_eq!(enhanced.message, "something odd");
    }
}
