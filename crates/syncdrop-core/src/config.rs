//! Runtime configuration for a [`crate::SyncDrop`] context.

use std::path::PathBuf;

use serde::Deserialize;

use crate::device::default_device_label;
use crate::notifier::DEFAULT_CHANNEL_NAME;

/// File name of the local database inside `data_dir`
pub const DATABASE_FILE: &str = "syncdrop.redb";

/// Default capacity of the engine's event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for one sync context
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory holding the local database
    pub data_dir: PathBuf,
    /// Name of the cross-context refresh channel
    pub channel_name: String,
    /// Label stored with this device's remote row
    pub device_label: String,
    /// Capacity of the [`crate::SyncEvent`] broadcast channel
    pub event_capacity: usize,
    /// Remote backend, if any
    pub remote: Option<RemoteConfig>,
}

impl SyncConfig {
    /// Default configuration rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            device_label: default_device_label(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            remote: None,
        }
    }
}

/// Connection settings for a PostgREST-style backend
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base REST URL, e.g. `https://<project>.supabase.co/rest/v1`
    pub url: String,
    /// Project (anon) API key
    pub api_key: String,
    /// Session token of the signed-in user; falls back to `api_key`
    pub access_token: Option<String>,
    /// How often the change poller checks for remote mutations
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            access_token: None,
            poll_interval_ms: 2_000,
            timeout_secs: 15,
        }
    }
}

/// `<platform data dir>/syncdrop`, or `./syncdrop` when the platform has none
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("syncdrop")
}
