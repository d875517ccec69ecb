//! System prompt layers.
//!
//! Each prompt mode selects a layer bundle; the bundle composition is
//! opaque configuration, stacked in order into one system message.
//! The introspection endpoint exposes per-layer previews and token
//! estimates so clients can budget context.

use serde::Serialize;

pub const DEFAULT_MODE: &str = "default";
pub const CODEX_MODE: &str = "codex";

#[derive(Debug, Clone, Copy)]
pub struct PromptLayer {
    pub name: &'static str,
    pub role: &'static str,
    pub source: &'static str,
    pub text: &'static str,
}

const IDENTITY_LAYER: PromptLayer = PromptLayer {
    name: "identity",
    role: "system",
    source: "builtin",
    text: "You are nextai, a conversational assistant that can call tools to \
           answer questions. Be concise. When a tool fails, explain what went \
           wrong and continue if you can.",
};

const TOOLING_LAYER: PromptLayer = PromptLayer {
    name: "tooling",
    role: "system",
    source: "builtin",
    text: "Tools accept a batch input of the form { items: [ ... ] }. Prefer a \
           single call with several items over several calls. Never fabricate \
           tool output.",
};

const CODEX_LAYER: PromptLayer = PromptLayer {
    name: "codex",
    role: "system",
    source: "builtin",
    text: "You are operating in code mode. Favor precise, minimal edits; read \
           files with the view tool before editing them; keep shell commands \
           non-interactive.",
};

const DEFAULT_LAYERS: &[PromptLayer] = &[IDENTITY_LAYER, TOOLING_LAYER];
const CODEX_LAYERS: &[PromptLayer] = &[IDENTITY_LAYER, CODEX_LAYER, TOOLING_LAYER];

/// Layer bundle for a prompt mode. Unknown modes fall back to `default`.
pub fn layers_for_mode(mode: &str) -> &'static [PromptLayer] {
    match mode {
        CODEX_MODE => CODEX_LAYERS,
        _ => DEFAULT_LAYERS,
    }
}

/// Stack the mode's layers into one system prompt.
pub fn system_prompt(mode: &str) -> String {
    layers_for_mode(mode)
        .iter()
        .map(|l| l.text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Rough token estimate used for client-side budgeting.
pub fn token_estimate(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Read-only layer view for `GET /agent/system-layers`.
#[derive(Debug, Clone, Serialize)]
pub struct LayerInfo {
    pub name: String,
    pub role: String,
    pub source: String,
    pub preview: String,
    pub token_estimate: usize,
}

pub fn layer_infos(mode: &str) -> Vec<LayerInfo> {
    layers_for_mode(mode)
        .iter()
        .map(|l| LayerInfo {
            name: l.name.to_string(),
            role: l.role.to_string(),
            source: l.source.to_string(),
            preview: super::truncate_str(l.text, 200),
            token_estimate: token_estimate(l.text),
        })
        .collect()
}
