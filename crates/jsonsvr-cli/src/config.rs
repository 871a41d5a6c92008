use anyhow::{Context as _, Result};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "./config.json";
pub const DEFAULT_SERVICE_DESCRIPTOR: &str = "./data/service.json";

/// Contents of `config.json`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    #[serde(deserialize_with = "port_from_number_or_string")]
    pub port: u16,
    pub service_descriptor: String,
    pub access_log: bool,
    pub no_default_index: bool,
    pub log_level: String,
    /// Script module name to script file.
    pub imports: BTreeMap<String, PathBuf>,
    pub object_storage: ObjectStorageConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            service_descriptor: DEFAULT_SERVICE_DESCRIPTOR.to_string(),
            access_log: false,
            no_default_index: false,
            log_level: "info".to_string(),
            imports: BTreeMap::new(),
            object_storage: ObjectStorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectStorageConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl ObjectStorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: jsonsvr_core::reader::DEFAULT_OBJECT_STORAGE_ENDPOINT.to_string(),
            timeout_ms: jsonsvr_core::reader::DEFAULT_OBJECT_STORAGE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ServerConfig {
    /// Read `path`. `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(config))
    }

    /// Like [`ServerConfig::load`], falling back to defaults. The second
    /// element explains a fallback so it can be logged once logging is up.
    pub fn load_or_default(path: &Path) -> (Self, Option<String>) {
        match Self::load(path) {
            Ok(Some(config)) => (config, None),
            Ok(None) => (
                Self::default(),
                Some(format!("{} not found; using defaults", path.display())),
            ),
            Err(e) => (Self::default(), Some(format!("{e:#}; using defaults"))),
        }
    }
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {text}"))),
    }
}
