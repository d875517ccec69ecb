use std::sync::Arc;

use nx_domain::config::Config;
use nx_store::StateStore;

use crate::runtime::channels::ChannelDispatcher;
use crate::runtime::cron::CronScheduler;
use crate::runtime::Engine;

/// How the API authenticates requests, decided once at startup.
#[derive(Clone)]
pub enum AuthMode {
    /// `NEXTAI_API_KEY` is set; requests must present it.
    /// Holds the SHA-256 digest of the key.
    Required(Vec<u8>),
    /// No key, but the insecure bypass was explicitly enabled.
    Disabled,
    /// No key and no bypass: every protected request is refused.
    Locked,
}

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<StateStore>,
    /// The agent turn engine (config + store + tools + chats).
    pub engine: Arc<Engine>,
    pub channels: Arc<ChannelDispatcher>,
    pub cron: Arc<CronScheduler>,
    pub auth: AuthMode,
}
