use crate::error::SetupError;
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};
use toml_edit::{DocumentMut, Item, Table, value};

pub const DEFAULT_CONFIG_PATH: &str = "monitor_config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub dedupe: DedupeConfig,
}

/// Locations chosen once by the operator and cached in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    pub watch_root: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_extract_path")]
    pub extract_path: String,
    #[serde(default = "default_mapping_path")]
    pub mapping_path: String,
    #[serde(default = "default_forward_path")]
    pub forward_path: String,
    #[serde(default = "default_upload_field")]
    pub upload_field: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_extract_path() -> String {
    "/extract/".to_string()
}

fn default_mapping_path() -> String {
    "/mapping/get-mappings".to_string()
}

fn default_forward_path() -> String {
    "/sap/PurchaseInvoices".to_string()
}

fn default_upload_field() -> String {
    "file_list".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            extract_path: default_extract_path(),
            mapping_path: default_mapping_path(),
            forward_path: default_forward_path(),
            upload_field: default_upload_field(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_ready_poll_ms")]
    pub ready_poll_ms: u64,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_day_recheck_secs")]
    pub day_recheck_secs: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_scan_existing")]
    pub scan_existing: bool,
}

fn default_ready_poll_ms() -> u64 {
    1000
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_day_recheck_secs() -> u64 {
    60
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_scan_existing() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            ready_poll_ms: default_ready_poll_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
            day_recheck_secs: default_day_recheck_secs(),
            tick_ms: default_tick_ms(),
            scan_existing: default_scan_existing(),
        }
    }
}

impl WatchConfig {
    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn day_recheck(&self) -> Duration {
        Duration::from_secs(self.day_recheck_secs)
    }

    pub fn tick(&self) -> Duration {
        // interval() panics on a zero period
        Duration::from_millis(self.tick_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

fn default_bucket() -> String {
    "ap_invoice".to_string()
}

fn default_file_name() -> String {
    "ap_invoice_output.xlsx".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            file_name: default_file_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DedupeConfig {
    pub store_path: Option<PathBuf>,
}

/// Paths that must be known before monitoring can start.
#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub watch_root: PathBuf,
    pub output_root: PathBuf,
    pub log_file: PathBuf,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SetupError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|message| SetupError::ConfigParse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Load the config if the file exists, otherwise start from defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn resolved_paths(&self) -> Result<ResolvedPaths, SetupError> {
        Ok(ResolvedPaths {
            watch_root: self
                .paths
                .watch_root
                .clone()
                .ok_or(SetupError::MissingSetting("paths.watch_root"))?,
            output_root: self
                .paths
                .output_root
                .clone()
                .ok_or(SetupError::MissingSetting("paths.output_root"))?,
            log_file: self
                .paths
                .log_file
                .clone()
                .ok_or(SetupError::MissingSetting("paths.log_file"))?,
        })
    }

    /// Write operator-supplied paths into the `[paths]` table, keeping the
    /// rest of the file (comments, other sections) untouched.
    pub fn remember_paths(
        path: impl AsRef<Path>,
        paths: &PathsConfig,
    ) -> Result<(), SetupError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(SetupError::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let mut doc = content
            .parse::<DocumentMut>()
            .map_err(|e| SetupError::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if !doc.contains_table("paths") {
            doc["paths"] = Item::Table(Table::new());
        }
        let entries = [
            ("watch_root", &paths.watch_root),
            ("output_root", &paths.output_root),
            ("log_file", &paths.log_file),
        ];
        for (key, entry) in entries {
            if let Some(p) = entry {
                doc["paths"][key] = value(p.to_string_lossy().as_ref());
            }
        }

        fs::write(path, doc.to_string()).map_err(|source| SetupError::ConfigWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl PathsConfig {
    pub fn is_empty(&self) -> bool {
        self.watch_root.is_none() && self.output_root.is_none() && self.log_file.is_none()
    }

    /// Fill in any path given here, keeping the existing value otherwise.
    pub fn overlay(&self, base: &mut PathsConfig) {
        if let Some(p) = &self.watch_root {
            base.watch_root = Some(p.clone());
        }
        if let Some(p) = &self.output_root {
            base.output_root = Some(p.clone());
        }
        if let Some(p) = &self.log_file {
            base.log_file = Some(p.clone());
        }
    }
}
