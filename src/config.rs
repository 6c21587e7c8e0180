use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::DEFAULT_USER_ID;

#[derive(Parser, Debug)]
#[command(name = "highlighter")]
#[command(about = "Runs the highlighter sync service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".highlighter")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

/// Config path and data directory. Data lives next to an explicit config file,
/// otherwise under ~/.highlighter/.
pub fn resolve_paths(config_path: Option<String>) -> (PathBuf, PathBuf) {
    match config_path {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    database: String,
    port: u16,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

fn default_sync_interval() -> u64 {
    60
}

fn default_cors_origin() -> String {
    "*".to_string()
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }
}

/// Settings for the extension-side client (page agent, popup, local cache).
#[derive(Debug, Deserialize, Clone)]
pub struct Client {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub cache_path: Option<String>,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

fn default_user_id() -> String {
    DEFAULT_USER_ID.to_string()
}

fn default_write_timeout() -> u64 {
    3000
}

fn default_read_timeout() -> u64 {
    5000
}

impl Default for Client {
    fn default() -> Self {
        Client {
            api_base_url: None,
            user_id: default_user_id(),
            cache_path: None,
            write_timeout_ms: default_write_timeout(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl Client {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn cache_file(&self, data_dir: &Path) -> PathBuf {
        match &self.cache_path {
            Some(p) => PathBuf::from(p),
            None => data_dir.join("highlights.json"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub client: Client,
}

impl Config {
    pub fn new(path: &Path) -> Result<Self> {
        let yaml_str = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_with_env = substitute_env_vars(yaml_str);
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }
}

/// Expands `${VAR}` and `${VAR:-default}` references.
fn substitute_env_vars(yaml_str: &str) -> String {
    let mut out = String::with_capacity(yaml_str.len());
    let mut rest = yaml_str;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);

        let reference = &rest[start + 2..start + len];
        let value = match reference.split_once(":-") {
            Some((name, fallback)) => env::var(name).unwrap_or_else(|_| fallback.to_string()),
            None => env::var(reference).unwrap_or_else(|_| {
                tracing::warn!(var = reference, "environment variable not set");
                String::new()
            }),
        };
        out.push_str(&value);
        rest = &rest[start + len + 1..];
    }

    out.push_str(rest);
    out
}
