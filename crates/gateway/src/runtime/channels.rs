//! Channel dispatcher — maps job/agent output onto a channel send.
//!
//! Built-ins:
//! - `console` re-enters the agent turn engine, so text produced by a
//!   cron job shows up as a real chat under the dispatch target.
//! - `webhook` POSTs `{text, user_id, session_id}` to a configured URL,
//!   guarded against SSRF unless the config opts into private targets.
//! - `qq` is inbound-only; sends fail fast.
//!
//! Send errors wrap as `channel_error{channel, cause}`; cron treats them
//! as a task failure without retry.

use std::sync::Arc;

use serde_json::Value;

use nx_domain::error::{Error, Result};

use super::turn::{run_turn_collect, ProcessRequest};
use super::Engine;

pub const CHANNEL_TYPES: &[&str] = &["console", "webhook", "qq"];

pub struct ChannelDispatcher {
    engine: Arc<Engine>,
    client: reqwest::Client,
}

impl ChannelDispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            client: reqwest::Client::new(),
        }
    }

    /// Resolve a channel name to its type and stored config. Empty names
    /// resolve to `console`.
    pub fn resolve(&self, name: &str) -> Result<(String, Value)> {
        let resolved = if name.is_empty() { "console" } else { name };
        if !CHANNEL_TYPES.contains(&resolved) {
            return Err(Error::ChannelNotSupported(resolved.to_string()));
        }
        let config = self
            .engine
            .store
            .read(|doc| doc.channels.get(resolved).cloned())
            .unwrap_or_else(|| Value::Object(Default::default()));
        Ok((resolved.to_string(), config))
    }

    /// Send `text` to `(user_id, session_id)` over `channel`.
    pub async fn send_text(
        &self,
        channel: &str,
        user_id: &str,
        session_id: &str,
        text: &str,
    ) -> Result<()> {
        let (resolved, config) = self.resolve(channel)?;
        match resolved.as_str() {
            "console" => self.send_console(user_id, session_id, text).await,
            "webhook" => self.send_webhook(&config, user_id, session_id, text).await,
            "qq" => Err(Error::Channel {
                channel: "qq".into(),
                message: "qq is inbound-only; outbound sends are not supported".into(),
            }),
            other => Err(Error::ChannelNotSupported(other.to_string())),
        }
    }

    /// Console: drive a full agent turn so the message lands in chat
    /// history under the dispatch target.
    async fn send_console(&self, user_id: &str, session_id: &str, text: &str) -> Result<()> {
        let req = ProcessRequest::from_text(user_id, session_id, "console", text);
        let outcome = run_turn_collect(&self.engine, req).await;
        if outcome.failed {
            let cause = outcome
                .error
                .map(|m| m.message)
                .unwrap_or_else(|| "turn failed".into());
            return Err(Error::Channel {
                channel: "console".into(),
                message: cause,
            });
        }
        Ok(())
    }

    async fn send_webhook(
        &self,
        config: &Value,
        user_id: &str,
        session_id: &str,
        text: &str,
    ) -> Result<()> {
        let url = config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Channel {
                channel: "webhook".into(),
                message: "webhook channel has no url configured".into(),
            })?;
        let allow_private = config
            .get("allow_private")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !allow_private {
            validate_url(url).map_err(|cause| Error::Channel {
                channel: "webhook".into(),
                message: cause,
            })?;
        }

        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "text": text,
                "user_id": user_id,
                "session_id": session_id,
            }))
            .send()
            .await
            .map_err(|e| Error::Channel {
                channel: "webhook".into(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Channel {
                channel: "webhook".into(),
                message: format!("webhook returned HTTP {}", status.as_u16()),
            });
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSRF guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a URL for safety: must be http(s) and must not target
/// private/internal networks.
///
/// Blocks non-http(s) schemes, loopback, private ranges, link-local
/// (cloud metadata), unspecified/broadcast addresses, localhost names,
/// and IPv4-mapped IPv6 forms of all of the above.
pub fn validate_url(url: &str) -> std::result::Result<(), String> {
    use std::net::{Ipv4Addr, Ipv6Addr};

    let lower = url.to_ascii_lowercase();

    let after_scheme = if let Some(r) = lower.strip_prefix("https://") {
        r
    } else if let Some(r) = lower.strip_prefix("http://") {
        r
    } else {
        return Err("URL must use http or https scheme".into());
    };

    // Reject userinfo (http://evil@internal-host tricks).
    let after_userinfo = match after_scheme.split_once('@') {
        Some((_, rest)) => rest,
        None => after_scheme,
    };

    let authority = after_userinfo.split('/').next().unwrap_or("");

    // IPv6 bracket notation [::1]:port.
    let host = if authority.starts_with('[') {
        authority
            .split(']')
            .next()
            .unwrap_or("")
            .trim_start_matches('[')
    } else {
        authority.split(':').next().unwrap_or("")
    };

    if host.is_empty() {
        return Err("URL has empty host".into());
    }

    if host == "localhost" || host.ends_with(".localhost") || host == "metadata.google.internal" {
        return Err(format!("URL must not target internal host: {host}"));
    }

    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        if ip.is_loopback()
            || ip.is_private()
            || ip.is_link_local()
            || ip.is_unspecified()
            || ip.is_broadcast()
        {
            return Err(format!("URL must not target private/internal IP: {ip}"));
        }
    }

    if let Ok(ip) = host.parse::<Ipv6Addr>() {
        if ip.is_loopback() || ip.is_unspecified() {
            return Err(format!("URL must not target private/internal IPv6: {ip}"));
        }
        let segs = ip.segments();
        if segs[..6] == [0, 0, 0, 0, 0, 0xffff] {
            let mapped = Ipv4Addr::new(
                (segs[6] >> 8) as u8,
                segs[6] as u8,
                (segs[7] >> 8) as u8,
                segs[7] as u8,
            );
            if mapped.is_loopback()
                || mapped.is_private()
                || mapped.is_link_local()
                || mapped.is_unspecified()
            {
                return Err(format!("URL must not target private/internal IP: {mapped}"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nx_domain::config::Config;
    use nx_store::StateStore;
    use nx_tools::ToolRegistry;

    fn dispatcher() -> (tempfile::TempDir, ChannelDispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path().join("state.json")).unwrap());
        let engine = Arc::new(Engine::new(
            Arc::new(Config::default()),
            store,
            Arc::new(ToolRegistry::new()),
        ));
        (dir, ChannelDispatcher::new(engine))
    }

    #[tokio::test]
    async fn console_send_lands_in_chat_history() {
        let (_dir, d) = dispatcher();
        d.send_text("console", "u", "s2", "tick").await.unwrap();

        let chats = d.engine.chats.list(Some("u"), Some("console"));
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].session_id, "s2");
        let history = d.engine.chats.history(&chats[0].id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            nx_domain::message::join_text_parts(&history[1].content),
            "Echo: tick"
        );
    }

    #[tokio::test]
    async fn qq_is_outbound_incapable() {
        let (_dir, d) = dispatcher();
        let err = d.send_text("qq", "u", "s", "hi").await.unwrap_err();
        assert_eq!(err.code(), "channel_error");
        assert!(err.to_string().contains("inbound-only"));
    }

    #[tokio::test]
    async fn unknown_channel_not_supported() {
        let (_dir, d) = dispatcher();
        let err = d.send_text("telegram", "u", "s", "hi").await.unwrap_err();
        assert_eq!(err.code(), "channel_not_supported");
    }

    #[tokio::test]
    async fn empty_channel_resolves_to_console() {
        let (_dir, d) = dispatcher();
        let (resolved, _) = d.resolve("").unwrap();
        assert_eq!(resolved, "console");
    }

    #[tokio::test]
    async fn webhook_without_url_is_channel_error() {
        let (_dir, d) = dispatcher();
        let err = d.send_text("webhook", "u", "s", "hi").await.unwrap_err();
        assert_eq!(err.code(), "channel_error");
        assert!(err.to_string().contains("no url"));
    }

    #[tokio::test]
    async fn webhook_to_private_target_is_blocked() {
        let (_dir, d) = dispatcher();
        d.engine
            .store
            .write(|doc| {
                doc.channels.insert(
                    "webhook".into(),
                    serde_json::json!({ "url": "http://169.254.169.254/hook" }),
                );
                Ok(())
            })
            .unwrap();
        let err = d.send_text("webhook", "u", "s", "hi").await.unwrap_err();
        assert_eq!(err.code(), "channel_error");
        assert!(err.to_string().contains("private"));
    }

    // ── URL validation (SSRF prevention) ────────────────────────────

    #[test]
    fn validate_url_accepts_public() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://example.com/path?q=1").is_ok());
        assert!(validate_url("https://8.8.8.8/dns").is_ok());
    }

    #[test]
    fn validate_url_rejects_non_http() {
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn validate_url_rejects_private_ips() {
        assert!(validate_url("http://127.0.0.1").is_err());
        assert!(validate_url("http://10.0.0.1").is_err());
        assert!(validate_url("http://172.16.0.1").is_err());
        assert!(validate_url("http://192.168.1.1").is_err());
        assert!(validate_url("http://169.254.169.254/latest/meta-data/").is_err());
        assert!(validate_url("http://0.0.0.0").is_err());
    }

    #[test]
    fn validate_url_rejects_localhost_and_metadata() {
        assert!(validate_url("http://localhost:3000").is_err());
        assert!(validate_url("https://app.localhost/api").is_err());
        assert!(validate_url("http://metadata.google.internal").is_err());
    }

    #[test]
    fn validate_url_rejects_ipv6_loopback_and_mapped() {
        assert!(validate_url("http://[::1]").is_err());
        assert!(validate_url("http://[::ffff:127.0.0.1]/x").is_err());
    }

    #[test]
    fn validate_url_rejects_userinfo_trick() {
        assert!(validate_url("http://evil@127.0.0.1/").is_err());
    }
}
