//! Web search tool — SerpAPI, Tavily, or Brave behind one item shape.
//!
//! Per item: `{query, provider?, count <= 10, timeout_seconds <= 120}`.
//! The default provider comes from the config snapshot; a provider
//! without a key is not offered.

use serde::Deserialize;
use serde_json::Value;

use crate::Tool;
use nx_domain::config::SearchConfig;
use nx_domain::error::{Error, Result};

const MAX_COUNT: u64 = 10;
const DEFAULT_COUNT: u64 = 5;
const MAX_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    query: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct SearchTool {
    config: SearchConfig,
    client: reqwest::Client,
}

impl SearchTool {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Requested provider, or the configured default, or the first
    /// backend that has a key.
    fn pick_provider(&self, requested: Option<&str>) -> Result<String> {
        let known = |p: &str| -> Result<String> {
            match p {
                "serpapi" | "tavily" | "brave" => Ok(p.to_string()),
                other => Err(Error::tool(
                    "search_provider_unknown",
                    format!("unknown search provider '{other}'"),
                )),
            }
        };
        if let Some(p) = requested {
            return known(p);
        }
        if !self.config.default_provider.is_empty() {
            return known(&self.config.default_provider);
        }
        for (name, backend) in [
            ("serpapi", &self.config.serpapi),
            ("tavily", &self.config.tavily),
            ("brave", &self.config.brave),
        ] {
            if !backend.key.is_empty() {
                return Ok(name.to_string());
            }
        }
        Err(Error::tool(
            "search_not_configured",
            "no search backend has a key configured",
        ))
    }
}

fn base_url_or(backend_url: &str, fallback: &str) -> String {
    if backend_url.is_empty() {
        fallback.to_string()
    } else {
        backend_url.trim_end_matches('/').to_string()
    }
}

// ── Response parsing (one function per provider, pure) ─────────────

pub fn parse_serpapi(body: &Value) -> Vec<SearchHit> {
    body.get("organic_results")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|r| SearchHit {
                    title: str_field(r, "title"),
                    url: str_field(r, "link"),
                    snippet: str_field(r, "snippet"),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_tavily(body: &Value) -> Vec<SearchHit> {
    body.get("results")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|r| SearchHit {
                    title: str_field(r, "title"),
                    url: str_field(r, "url"),
                    snippet: str_field(r, "content"),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_brave(body: &Value) -> Vec<SearchHit> {
    body.get("web")
        .and_then(|w| w.get("results"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|r| SearchHit {
                    title: str_field(r, "title"),
                    url: str_field(r, "url"),
                    snippet: str_field(r, "description"),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string()
}

fn render_hits(query: &str, provider: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("no {provider} results for {query:?}");
    }
    let lines: Vec<String> = hits
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{}. {} — {}\n   {}", i + 1, h.title, h.url, h.snippet))
        .collect();
    lines.join("\n")
}

#[async_trait::async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &'static str {
        "search"
    }

    fn description(&self) -> &'static str {
        "Web search via SerpAPI, Tavily, or Brave. Returns a compact \
         list of {title, url, snippet} results."
    }

    fn item_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "provider": { "type": "string", "enum": ["serpapi", "tavily", "brave"] },
                "count": { "type": "integer", "minimum": 1, "maximum": MAX_COUNT },
                "timeout_seconds": { "type": "integer", "minimum": 1, "maximum": MAX_TIMEOUT_SECS },
            },
            "required": ["query"],
        })
    }

    async fn invoke_item(&self, item: &Value) -> Result<Value> {
        let item: SearchItem = serde_json::from_value(item.clone())
            .map_err(|e| Error::tool("search_items_invalid", e.to_string()))?;
        if item.query.trim().is_empty() {
            return Err(Error::tool("search_query_missing", "query is required"));
        }

        let provider = self.pick_provider(item.provider.as_deref())?;
        let count = item.count.unwrap_or(DEFAULT_COUNT).clamp(1, MAX_COUNT);
        let timeout = std::time::Duration::from_secs(
            item.timeout_seconds
                .unwrap_or(DEFAULT_TIMEOUT_SECS)
                .clamp(1, MAX_TIMEOUT_SECS),
        );

        let request = match provider.as_str() {
            "serpapi" => {
                let backend = &self.config.serpapi;
                if backend.key.is_empty() {
                    return Err(Error::tool(
                        "search_not_configured",
                        "serpapi has no key configured",
                    ));
                }
                self.client
                    .get(format!(
                        "{}/search.json",
                        base_url_or(&backend.base_url, "https://serpapi.com")
                    ))
                    .query(&[
                        ("q", item.query.as_str()),
                        ("api_key", backend.key.as_str()),
                        ("num", &count.to_string()),
                    ])
            }
            "tavily" => {
                let backend = &self.config.tavily;
                if backend.key.is_empty() {
                    return Err(Error::tool(
                        "search_not_configured",
                        "tavily has no key configured",
                    ));
                }
                self.client
                    .post(format!(
                        "{}/search",
                        base_url_or(&backend.base_url, "https://api.tavily.com")
                    ))
                    .json(&serde_json::json!({
                        "api_key": backend.key,
                        "query": item.query,
                        "max_results": count,
                    }))
            }
            "brave" => {
                let backend = &self.config.brave;
                if backend.key.is_empty() {
                    return Err(Error::tool(
                        "search_not_configured",
                        "brave has no key configured",
                    ));
                }
                self.client
                    .get(format!(
                        "{}/res/v1/web/search",
                        base_url_or(&backend.base_url, "https://api.search.brave.com")
                    ))
                    .header("X-Subscription-Token", &backend.key)
                    .query(&[("q", item.query.as_str()), ("count", &count.to_string())])
            }
            _ => unreachable!("pick_provider only returns known providers"),
        };

        let resp = request.timeout(timeout).send().await.map_err(|e| {
            Error::tool(
                "search_request_failed",
                format!("{provider} request failed: {e}"),
            )
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::tool(
                "search_request_failed",
                format!("{provider} returned HTTP {}", status.as_u16()),
            ));
        }

        let body: Value = resp.json().await.map_err(|e| {
            Error::tool(
                "search_request_failed",
                format!("{provider} reply did not decode: {e}"),
            )
        })?;

        let hits = match provider.as_str() {
            "serpapi" => parse_serpapi(&body),
            "tavily" => parse_tavily(&body),
            _ => parse_brave(&body),
        };
        let hits: Vec<SearchHit> = hits.into_iter().take(count as usize).collect();

        Ok(serde_json::json!({
            "ok": true,
            "provider": provider,
            "query": item.query,
            "results": hits,
            "text": render_hits(&item.query, &provider, &hits),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nx_domain::config::SearchBackend;

    fn config_with(default: &str, serp_key: &str, tavily_key: &str) -> SearchConfig {
        SearchConfig {
            default_provider: default.into(),
            serpapi: SearchBackend {
                key: serp_key.into(),
                base_url: String::new(),
            },
            tavily: SearchBackend {
                key: tavily_key.into(),
                base_url: String::new(),
            },
            brave: SearchBackend::default(),
        }
    }

    #[test]
    fn parse_serpapi_results() {
        let body = serde_json::json!({
            "organic_results": [
                { "title": "T1", "link": "https://a", "snippet": "S1" },
                { "title": "T2", "link": "https://b", "snippet": "S2" },
            ]
        });
        let hits = parse_serpapi(&body);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://a");
    }

    #[test]
    fn parse_tavily_results() {
        let body = serde_json::json!({
            "results": [{ "title": "T", "url": "https://x", "content": "C" }]
        });
        let hits = parse_tavily(&body);
        assert_eq!(hits[0].snippet, "C");
    }

    #[test]
    fn parse_brave_results() {
        let body = serde_json::json!({
            "web": { "results": [{ "title": "T", "url": "https://x", "description": "D" }] }
        });
        let hits = parse_brave(&body);
        assert_eq!(hits[0].snippet, "D");
    }

    #[test]
    fn parse_empty_bodies() {
        assert!(parse_serpapi(&serde_json::json!({})).is_empty());
        assert!(parse_tavily(&serde_json::json!({})).is_empty());
        assert!(parse_brave(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn provider_defaults_from_config() {
        let tool = SearchTool::new(config_with("tavily", "", "k"));
        assert_eq!(tool.pick_provider(None).unwrap(), "tavily");
    }

    #[test]
    fn provider_falls_back_to_first_keyed_backend() {
        let tool = SearchTool::new(config_with("", "", "k"));
        assert_eq!(tool.pick_provider(None).unwrap(), "tavily");
    }

    #[test]
    fn unknown_provider_is_sentinel() {
        let tool = SearchTool::new(config_with("", "k", ""));
        let err = tool.pick_provider(Some("duckduckgo")).unwrap_err();
        assert_eq!(err.code(), "search_provider_unknown");
    }

    #[test]
    fn no_keys_is_not_configured() {
        let tool = SearchTool::new(config_with("", "", ""));
        let err = tool.pick_provider(None).unwrap_err();
        assert_eq!(err.code(), "search_not_configured");
    }

    #[tokio::test]
    async fn empty_query_is_sentinel() {
        let tool = SearchTool::new(config_with("", "k", ""));
        let err = tool
            .invoke_item(&serde_json::json!({ "query": " " }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "search_query_missing");
    }

    #[test]
    fn render_includes_rank_and_url() {
        let hits = vec![SearchHit {
            title: "Rust".into(),
            url: "https://rust-lang.org".into(),
            snippet: "A language".into(),
        }];
        let text = render_hits("rust", "brave", &hits);
        assert!(text.starts_with("1. Rust — https://rust-lang.org"));
    }
}
