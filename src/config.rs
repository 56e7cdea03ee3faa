//! Client configuration

use serde::{Deserialize, Serialize};

/// Remote endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
  /// Redis host
  #[serde(default = "default_host")]
  pub host: String,

  /// Redis port
  #[serde(default = "default_port")]
  pub port: u16,

  /// Redis password (optional)
  #[serde(default)]
  pub password: Option<String>,

  /// Redis database number (0-15)
  #[serde(default)]
  pub db: u8,
}

fn default_host() -> String {
  "localhost".to_string()
}

fn default_port() -> u16 {
  6379
}

impl Default for RedisConfig {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_port(),
      password: None,
      db: 0,
    }
  }
}

impl RedisConfig {
  /// Generate the Redis connection URL
  pub fn connection_url(&self) -> String {
    let auth = match &self.password {
      Some(pwd) if !pwd.is_empty() => format!(":{}@", pwd),
      _ => String::new(),
    };
    format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.db)
  }

  fn validated(mut self) -> Self {
    if self.host.is_empty() {
      self.host = default_host();
    }
    if self.port == 0 {
      self.port = default_port();
    }
    self.db = self.db.min(15);
    self
  }
}

/// Tunables for the fallback machinery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
  /// Root of the on-disk layered tree
  #[serde(default = "default_db_root")]
  pub db_root: String,

  /// Remote retry attempts before switching to fallback mode
  #[serde(default = "default_max_retry")]
  pub max_retry: u32,

  /// Write-behind channel capacity
  #[serde(default = "default_max_queue")]
  pub max_queue: usize,

  /// Write-behind flush period in seconds
  #[serde(default = "default_time_to_write")]
  pub time_to_write: u64,

  /// Health-check period in seconds
  #[serde(default = "default_time_to_check")]
  pub time_to_check: u64,
}

fn default_db_root() -> String {
  "./files/redisFallback/db".to_string()
}

fn default_max_retry() -> u32 {
  3
}

fn default_max_queue() -> usize {
  1000
}

fn default_time_to_write() -> u64 {
  3
}

fn default_time_to_check() -> u64 {
  60
}

impl Default for Options {
  fn default() -> Self {
    Self {
      db_root: default_db_root(),
      max_retry: default_max_retry(),
      max_queue: default_max_queue(),
      time_to_write: default_time_to_write(),
      time_to_check: default_time_to_check(),
    }
  }
}

impl Options {
  fn validated(mut self) -> Self {
    if self.db_root.is_empty() {
      self.db_root = default_db_root();
    }
    if self.max_retry == 0 {
      self.max_retry = default_max_retry();
    }
    if self.max_queue == 0 {
      self.max_queue = default_max_queue();
    }
    if self.time_to_write == 0 {
      self.time_to_write = default_time_to_write();
    }
    if self.time_to_check == 0 {
      self.time_to_check = default_time_to_check();
    }
    self
  }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
  /// Remote endpoint
  #[serde(default)]
  pub redis: RedisConfig,

  /// Fallback tunables ("option" accepted for compatibility)
  #[serde(default, alias = "option")]
  pub options: Options,
}

impl Config {
  /// Coerce out-of-range values back to their defaults
  pub fn validated(self) -> Self {
    Self {
      redis: self.redis.validated(),
      options: self.options.validated(),
    }
  }
}
