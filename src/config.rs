use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemma3:1b";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 11434;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Wall-clock limit for each embedded shell command, in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Timeout for the startup connectivity probe, in seconds
    #[serde(default = "default_probe_timeout", alias = "connect_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_command_timeout() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            host: default_host(),
            port: default_port(),
            command_timeout_secs: default_command_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl Config {
    /// Load the persisted configuration, falling back to defaults when the file
    /// is missing, unreadable or invalid. A missing file is created.
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::create_default_config(Some(path));
        }

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                eprintln!("Warning: Failed to read configuration: {}. Using defaults.", e);
                return Self::default();
            }
        };

        match serde_json::from_str::<Config>(&content) {
            Ok(config) => match config.validate() {
                Ok(()) => config,
                Err(e) => {
                    eprintln!(
                        "Warning: Invalid configuration detected: {}. Using defaults.",
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to parse configuration: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    fn create_default_config(config_path: Option<&Path>) -> Self {
        let default_config = Self::default();

        if let Some(path) = config_path {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Ok(content) = serde_json::to_string_pretty(&default_config) {
                let _ = fs::write(path, content);
            }
        }

        default_config
    }

    /// Apply command-line overrides on top of the loaded values
    pub fn with_overrides(
        mut self,
        model: Option<String>,
        host: Option<String>,
        port: Option<u16>,
    ) -> Result<Self> {
        if let Some(model) = model {
            self.model = model;
        }
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model name cannot be empty"));
        }

        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }

        if self.port == 0 {
            return Err(anyhow!("port must be greater than 0"));
        }

        if self.command_timeout_secs == 0 || self.command_timeout_secs > 600 {
            return Err(anyhow!("command_timeout_secs must be between 1 and 600"));
        }

        if self.probe_timeout_secs == 0 || self.probe_timeout_secs > 60 {
            return Err(anyhow!("probe_timeout_secs must be between 1 and 60"));
        }

        Ok(())
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("cocollama");
            path.push("config.json");
            path
        })
    }
}
