use config::{Config, ConfigError, File};
use serde::Deserialize;

/// Shard/replica settings for one index, configuration rather than protocol.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct IndexSettings {
    pub shards: u32,
    pub replicas: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub elasticsearch_url: String,
    pub grid_host: String,
    pub grid_port: u16,
    pub grid_zone: String,
    pub grid_username: String,
    /// Root of the grid namespace under which collection directories live.
    pub grid_base_path: String,
    /// Root directory used by the local-disk grid connector.
    pub grid_local_root: String,
    pub users_index: IndexSettings,
    pub metadata_index: IndexSettings,
    pub collections_index: IndexSettings,
    pub sites_index: IndexSettings,
    /// Upper bound on entries per upload archive, one slot is always reserved.
    pub max_files_per_archive: usize,
    pub scroll_page_size: i64,
    pub background_workers: usize,
    pub immediate_task_cap: usize,
    pub log_level: String,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .build()?;

        s.try_deserialize()
    }
}
