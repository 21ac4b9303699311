// Client configuration. Values come from built-in defaults, then an
// optional JSON file in the user's config directory, then environment
// variables. The binary applies command-line flags on top of that.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default server location when neither the config file nor the
/// environment name one.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";

/// Client-side upper bound on file size (100 MiB). The server stays the
/// authority; this only avoids sending something it would refuse.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

pub const DEFAULT_ERROR_DISPLAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the web application, without trailing slash.
    pub server_url: String,

    /// CSRF token to echo in `X-CSRFToken`. When `None` the client reads it
    /// from the meta tag of the index page.
    pub csrf_token: Option<String>,

    /// Maximum accepted file size in bytes.
    pub max_file_size: u64,

    /// Chunk requests allowed in flight at once. `1` uploads strictly in
    /// order.
    pub max_in_flight: usize,

    /// How long an inline error stays visible.
    pub error_display: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            csrf_token: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            error_display: DEFAULT_ERROR_DISPLAY,
        }
    }
}

/// On-disk shape of `config.json`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    server_url: Option<String>,
    csrf_token: Option<String>,
    max_file_size: Option<u64>,
    max_in_flight: Option<usize>,
    error_display_secs: Option<u64>,
}

impl ClientConfig {
    /// Load configuration from the default config file (if present) and the
    /// environment.
    pub fn load() -> Self {
        let mut config = Self::default();
        if let Some(path) = default_config_path() {
            config.apply_file(&path);
        }
        config.apply_env();
        config
    }

    /// Merge values from a JSON config file. A missing file is not an
    /// error; a malformed one is logged and ignored.
    pub fn apply_file(&mut self, path: &Path) {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return,
        };
        match serde_json::from_str::<FileConfig>(&text) {
            Ok(file) => self.merge(file),
            Err(e) => warn!(path = %path.display(), error = %e, "ignoring malformed config file"),
        }
    }

    fn merge(&mut self, file: FileConfig) {
        if let Some(url) = file.server_url {
            self.server_url = url;
        }
        if file.csrf_token.is_some() {
            self.csrf_token = file.csrf_token;
        }
        if let Some(max) = file.max_file_size {
            self.max_file_size = max;
        }
        if let Some(n) = file.max_in_flight {
            self.max_in_flight = n;
        }
        if let Some(secs) = file.error_display_secs {
            self.error_display = Duration::from_secs(secs);
        }
        self.normalize();
    }

    /// Override values from `IFC_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(url) = env::var("IFC_SERVER_URL") {
            self.server_url = url;
        }
        if let Ok(token) = env::var("IFC_CSRF_TOKEN") {
            self.csrf_token = Some(token);
        }
        if let Some(max) = env::var("IFC_MAX_FILE_SIZE").ok().and_then(|v| v.parse().ok()) {
            self.max_file_size = max;
        }
        if let Some(n) = env::var("IFC_MAX_IN_FLIGHT").ok().and_then(|v| v.parse().ok()) {
            self.max_in_flight = n;
        }
        if let Some(secs) = env::var("IFC_ERROR_DISPLAY_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.error_display = Duration::from_secs(secs);
        }
        self.normalize();
    }

    /// Strip a trailing slash from the base URL and keep the window at
    /// least one request wide.
    pub fn normalize(&mut self) {
        while self.server_url.ends_with('/') {
            self.server_url.pop();
        }
        self.max_in_flight = self.max_in_flight.max(1);
    }
}

/// `<config dir>/ifc-upload/config.json`, e.g. `~/.config/ifc-upload/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ifc-upload").join("config.json"))
}
