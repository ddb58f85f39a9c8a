use config::{Config, ConfigError};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub datastore: DatastoreSettings,
    #[serde(default)]
    pub filter: FilterSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceSettings {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_version")]
    pub version: String,
    #[serde(default = "default_documentation_url")]
    pub documentation_url: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Initial maintenance state; flipped at runtime by the operator.
    #[serde(default)]
    pub closed: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitSettings {
    #[serde(default = "default_max_query_bytes")]
    pub max_query_bytes: usize,
    #[serde(default = "default_max_post_bytes")]
    pub max_post_bytes: usize,
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
    /// Zero disables the response size cap.
    #[serde(default)]
    pub max_response_bytes: u64,
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Parquet,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatastoreSettings {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_daily_path")]
    pub daily_path: String,
    #[serde(default = "default_segments_path")]
    pub segments_path: String,
    #[serde(default)]
    pub object_store: Option<ObjectStoreSettings>,
    /// NDJSON files loaded by the memory backend.
    #[serde(default)]
    pub fixtures: Option<FixtureSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObjectStoreSettings {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FixtureSettings {
    pub daily: String,
    pub segments: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterSettings {
    /// `NET.STA.LOC.CHA` wildcard patterns hidden from every request.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingSettings {
    #[serde(default)]
    pub json: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_service_version(),
            documentation_url: default_documentation_url(),
            host: default_host(),
            port: default_port(),
            closed: false,
        }
    }
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_query_bytes: default_max_query_bytes(),
            max_post_bytes: default_max_post_bytes(),
            max_segments: default_max_segments(),
            max_response_bytes: 0,
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl Default for DatastoreSettings {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            daily_path: default_daily_path(),
            segments_path: default_segments_path(),
            object_store: None,
            fixtures: None,
        }
    }
}

fn default_service_name() -> String {
    "wfcatalog".to_string()
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_documentation_url() -> String {
    "https://www.orfeus-eu.org/data/eida/webservices/wfcatalog/".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_max_query_bytes() -> usize {
    4096
}

fn default_max_post_bytes() -> usize {
    1024 * 1024
}

fn default_max_segments() -> usize {
    1000
}

fn default_stream_buffer() -> usize {
    16
}

fn default_daily_path() -> String {
    "data/daily_streams/".to_string()
}

fn default_segments_path() -> String {
    "data/c_segments/".to_string()
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Build the configuration
        let config = builder.build()?;

        let settings: Settings = config.try_deserialize()?;

        debug!(
            service = %settings.service.name,
            backend = ?settings.datastore.backend,
            excluded = settings.filter.exclude.len(),
            "Parsed service settings"
        );

        Ok(settings)
    }
}
