use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::export::ReportLocale;
use crate::gateway::DEFAULT_DEADLINE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Jobs dispatched together in one wave.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

fn default_concurrency_limit() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            concurrency_limit: default_concurrency_limit(),
            gateway: GatewayConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_DEADLINE.as_secs()
}

fn default_api_key_env() -> Option<String> {
    Some("GEMINI_API_KEY".to_string())
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            api_key: None,
            api_key_file: None,
            api_key_env: default_api_key_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub locale: ReportLocale,
    /// Overrides the locale's default report file name.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Prefix the CSV with a UTF-8 byte-order mark for spreadsheet tools.
    #[serde(default = "default_true")]
    pub bom: bool,
    /// Offset used to display timestamps, e.g. "+09:00".
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

fn default_true() -> bool {
    true
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

impl ExportConfig {
    pub fn file_name(&self) -> String {
        self.file_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.locale.default_file_name().to_string())
    }

    pub fn display_offset(&self) -> Option<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            locale: ReportLocale::default(),
            file_name: None,
            bom: true,
            utc_offset: default_utc_offset(),
        }
    }
}

/// Parses "+09:00", "-05:30", "Z" or "UTC".
pub fn parse_utc_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    value.parse::<FixedOffset>().ok()
}
