//! Environment-derived configuration.
//!
//! Every recognized NEXTAI_* variable is read once here, at startup;
//! no other module touches the process environment. Components receive
//! the snapshot they need via `Config`.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host (`NEXTAI_HOST`, default `127.0.0.1`).
    pub host: String,
    /// Bind port (`NEXTAI_PORT`, default `8088`).
    pub port: u16,
    /// State and lease directory (`NEXTAI_DATA_DIR`, default `.data`).
    pub data_dir: PathBuf,
    /// Required API key (`NEXTAI_API_KEY`).
    pub api_key: String,
    /// Explicit bypass for running without an API key
    /// (`NEXTAI_ALLOW_INSECURE_NO_API_KEY`).
    pub allow_insecure_no_api_key: bool,
    /// Gate for the shell tool (`NEXTAI_ENABLE_SHELL_TOOL`).
    pub enable_shell_tool: bool,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Default)]
pub struct SearchConfig {
    /// `NEXTAI_SEARCH_DEFAULT_PROVIDER` ("serpapi", "tavily", "brave").
    pub default_provider: String,
    pub serpapi: SearchBackend,
    pub tavily: SearchBackend,
    pub brave: SearchBackend,
}

#[derive(Debug, Clone, Default)]
pub struct SearchBackend {
    pub key: String,
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8088,
            data_dir: PathBuf::from(".data"),
            api_key: String::new(),
            allow_insecure_no_api_key: false,
            enable_shell_tool: false,
            search: SearchConfig::default(),
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(name: &str) -> bool {
    matches!(
        env_str(name).as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

impl Config {
    /// Read the full configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let port = env_str("NEXTAI_PORT")
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        Self {
            host: env_str("NEXTAI_HOST").unwrap_or(defaults.host),
            port,
            data_dir: env_str("NEXTAI_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            api_key: env_str("NEXTAI_API_KEY").unwrap_or_default(),
            allow_insecure_no_api_key: env_bool("NEXTAI_ALLOW_INSECURE_NO_API_KEY"),
            enable_shell_tool: env_bool("NEXTAI_ENABLE_SHELL_TOOL"),
            search: SearchConfig {
                default_provider: env_str("NEXTAI_SEARCH_DEFAULT_PROVIDER").unwrap_or_default(),
                serpapi: SearchBackend {
                    key: env_str("NEXTAI_SEARCH_SERPAPI_KEY").unwrap_or_default(),
                    base_url: env_str("NEXTAI_SEARCH_SERPAPI_BASE_URL").unwrap_or_default(),
                },
                tavily: SearchBackend {
                    key: env_str("NEXTAI_SEARCH_TAVILY_KEY").unwrap_or_default(),
                    base_url: env_str("NEXTAI_SEARCH_TAVILY_BASE_URL").unwrap_or_default(),
                },
                brave: SearchBackend {
                    key: env_str("NEXTAI_SEARCH_BRAVE_KEY").unwrap_or_default(),
                    base_url: env_str("NEXTAI_SEARCH_BRAVE_BASE_URL").unwrap_or_default(),
                },
            },
        }
    }

    /// Path of the persisted state document.
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    /// Root of the cron lease slot files.
    pub fn leases_path(&self) -> PathBuf {
        self.data_dir.join("cron-leases")
    }

    /// Root of the HTTP-managed workspace files.
    pub fn workspace_path(&self) -> PathBuf {
        self.data_dir.join("workspace")
    }

    /// Whether unauthenticated requests are acceptable.
    pub fn auth_disabled(&self) -> bool {
        self.api_key.is_empty() && self.allow_insecure_no_api_key
    }
}
