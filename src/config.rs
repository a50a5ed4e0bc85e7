use chrono_tz::Tz;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rt::api_types::TagFields;
use crate::rt::TicketQueries;
use crate::stats::{AnalyticsPolicy, NoResponsePolicy};
use crate::sync::SyncSettings;

const APP_NAME: &str = "rtstat";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub rt: RtConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub analytics: AnalyticsConfig,
  /// Directory for log files (defaults to the cache's parent data directory)
  pub log_dir: Option<PathBuf>,
  /// Control loop tick in milliseconds
  #[serde(default = "default_tick_ms")]
  pub tick_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RtConfig {
  /// REST 1.0 base URL, e.g. https://support.example.edu/REST/1.0/
  pub url: String,
  #[serde(default = "default_queue")]
  pub queue: String,
  /// File holding a single username:password line
  pub credentials: Option<PathBuf>,
  #[serde(default = "default_category_field")]
  pub category_field: String,
  #[serde(default = "default_subcategory_field")]
  pub subcategory_field: String,
  /// Resolved tickets older than this date are never blamed for missing tags
  #[serde(default = "default_untagged_since")]
  pub untagged_since: String,
  /// Zone RT interprets TicketSQL dates in (defaults to analytics.timezone)
  pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  pub dir: Option<PathBuf>,
  #[serde(default = "default_sync_concurrency")]
  pub sync_concurrency: usize,
  /// How far back the first sync looks when the cache has no checkpoint
  #[serde(default = "default_initial_lookback_days")]
  pub initial_lookback_days: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      dir: None,
      sync_concurrency: default_sync_concurrency(),
      initial_lookback_days: default_initial_lookback_days(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
  /// IANA timezone in which weekends are counted
  #[serde(default = "default_timezone")]
  pub timezone: String,
  #[serde(default = "default_system_account")]
  pub system_account: String,
  #[serde(default)]
  pub no_response: NoResponsePolicy,
}

impl Default for AnalyticsConfig {
  fn default() -> Self {
    Self {
      timezone: default_timezone(),
      system_account: default_system_account(),
      no_response: NoResponsePolicy::default(),
    }
  }
}

fn default_tick_ms() -> u64 {
  300
}

fn default_queue() -> String {
  "uss-helpdesk".to_string()
}

fn default_category_field() -> String {
  "USS_Ticket_Category".to_string()
}

fn default_subcategory_field() -> String {
  "USS_Ticket_Subcategory".to_string()
}

fn default_untagged_since() -> String {
  "2015-09-13".to_string()
}

fn default_sync_concurrency() -> usize {
  4
}

fn default_initial_lookback_days() -> i64 {
  30
}

fn default_timezone() -> String {
  "America/Los_Angeles".to_string()
}

fn default_system_account() -> String {
  "RT_System".to_string()
}

fn parse_timezone(key: &str, name: &str) -> Result<Tz> {
  name
    .parse()
    .map_err(|e| eyre!("Invalid {} '{}': {}", key, name, e))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./rtstat.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/rtstat/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/rtstat/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(format!("{}.yaml", APP_NAME));
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_NAME).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    // Fail at startup rather than on the first report
    config.business_timezone()?;
    config.rt_timezone()?;
    Ok(config)
  }

  pub fn credentials_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.rt.credentials {
      return Ok(path.clone());
    }
    dirs::config_dir()
      .map(|d| d.join(APP_NAME).join("credentials"))
      .ok_or_else(|| eyre!("Could not determine config directory; set rt.credentials"))
  }

  pub fn cache_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache.dir {
      return Ok(dir.clone());
    }
    Self::data_dir().map(|d| d.join("ticket_cache"))
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    match &self.log_dir {
      Some(dir) => Ok(dir.clone()),
      None => Self::data_dir(),
    }
  }

  fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
      .map(|d| d.join(APP_NAME))
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }

  pub fn tick_rate(&self) -> Duration {
    Duration::from_millis(self.tick_ms)
  }

  pub fn business_timezone(&self) -> Result<Tz> {
    parse_timezone("analytics.timezone", &self.analytics.timezone)
  }

  pub fn rt_timezone(&self) -> Result<Tz> {
    match &self.rt.timezone {
      Some(name) => parse_timezone("rt.timezone", name),
      None => self.business_timezone(),
    }
  }

  pub fn tag_fields(&self) -> TagFields {
    TagFields {
      category: self.rt.category_field.clone(),
      subcategory: self.rt.subcategory_field.clone(),
    }
  }

  pub fn queries(&self) -> Result<TicketQueries> {
    Ok(TicketQueries {
      queue: self.rt.queue.clone(),
      category_field: self.rt.category_field.clone(),
      subcategory_field: self.rt.subcategory_field.clone(),
      untagged_since: self.rt.untagged_since.clone(),
      timezone: self.rt_timezone()?,
    })
  }

  pub fn sync_settings(&self) -> SyncSettings {
    SyncSettings {
      concurrency: self.cache.sync_concurrency,
      initial_lookback: chrono::Duration::days(self.cache.initial_lookback_days),
    }
  }

  pub fn analytics_policy(&self) -> AnalyticsPolicy {
    AnalyticsPolicy {
      system_account: self.analytics.system_account.clone(),
      no_response: self.analytics.no_response.clone(),
    }
  }
}
