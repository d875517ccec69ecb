//! Core runtime — the engine that ties provider streaming, tool
//! dispatch, chat persistence, and the cron scheduler together.
//!
//! Entry point for conversation work: [`turn::run_turn`] /
//! [`turn::run_turn_collect`].

pub mod channels;
pub mod chats;
pub mod cron;
pub mod prompts;
pub mod turn;

use std::sync::Arc;

use nx_domain::config::Config;
use nx_store::StateStore;
use nx_tools::ToolRegistry;

use chats::ChatManager;

/// Everything a turn needs. Cheap to clone behind `Arc`s; handed to the
/// HTTP surface, the channel dispatcher, and the cron scheduler alike.
pub struct Engine {
    pub config: Arc<Config>,
    pub store: Arc<StateStore>,
    pub tools: Arc<ToolRegistry>,
    pub chats: Arc<ChatManager>,
}

impl Engine {
    pub fn new(config: Arc<Config>, store: Arc<StateStore>, tools: Arc<ToolRegistry>) -> Self {
        let chats = Arc::new(ChatManager::new(store.clone()));
        Self {
            config,
            store,
            tools,
            chats,
        }
    }
}

/// Truncate to at most `max` chars, appending an ellipsis when cut.
pub(crate) fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_string_untouched() {
        assert_eq!(truncate_str("hello", 10), "hello");
    }

    #[test]
    fn truncate_long_string_appends_ellipsis() {
        assert_eq!(truncate_str("hello world", 5), "hello…");
    }
}
