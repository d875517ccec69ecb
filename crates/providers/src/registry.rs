//! Adapter selection.
//!
//! Rule: no active provider → demo. Otherwise the provider's configured
//! `adapter_id` wins; an empty `adapter_id` defaults by provider family.
//! Unknown adapter ids are an error, as is an active provider with no
//! usable credentials.

use std::sync::Arc;

use crate::adapter::ChatAdapter;
use crate::demo::DemoAdapter;
use crate::openai_compat::OpenAiCompatAdapter;
use nx_domain::error::{Error, Result};
use nx_domain::state::{ActiveLlm, ProviderSetting};

/// Default adapter for a provider family. Every known upstream family
/// speaks the chat-completions dialect; `demo` is its own family.
fn default_adapter_for(provider_id: &str) -> &'static str {
    match provider_id {
        "demo" => "demo",
        _ => "openai_compat",
    }
}

/// Resolve the adapter + model for the active slot.
///
/// `setting` is the active provider's configuration (if any); callers
/// read it from the state document in the same snapshot as `active`.
pub fn resolve_adapter(
    active: &ActiveLlm,
    setting: Option<&ProviderSetting>,
) -> Result<(Arc<dyn ChatAdapter>, String)> {
    if active.is_empty() {
        return Ok((Arc::new(DemoAdapter), String::new()));
    }

    let setting = setting.ok_or_else(|| {
        Error::ProviderNotConfigured(format!(
            "active provider '{}' has no configuration",
            active.provider_id
        ))
    })?;

    if active.model.is_empty() {
        return Err(Error::ProviderNotConfigured(format!(
            "active provider '{}' has no model",
            active.provider_id
        )));
    }

    let adapter_id = if setting.adapter_id.is_empty() {
        default_adapter_for(&active.provider_id)
    } else {
        setting.adapter_id.as_str()
    };

    match adapter_id {
        "demo" => Ok((Arc::new(DemoAdapter), active.model.clone())),
        "openai_compat" => {
            if setting.api_key.is_empty() {
                return Err(Error::ProviderNotConfigured(format!(
                    "provider '{}' has no api_key",
                    active.provider_id
                )));
            }
            let adapter = OpenAiCompatAdapter::new(&active.provider_id, setting)?;
            Ok((Arc::new(adapter), active.model.clone()))
        }
        other => Err(Error::ProviderNotSupported(format!(
            "unknown adapter '{other}' for provider '{}'",
            active.provider_id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(api_key: &str, adapter_id: &str) -> ProviderSetting {
        ProviderSetting {
            adapter_id: adapter_id.into(),
            api_key: api_key.into(),
            ..ProviderSetting::default()
        }
    }

    #[test]
    fn empty_active_selects_demo() {
        let (adapter, model) = resolve_adapter(&ActiveLlm::default(), None).unwrap();
        assert_eq!(adapter.adapter_id(), "demo");
        assert!(model.is_empty());
    }

    #[test]
    fn missing_setting_is_not_configured() {
        let active = ActiveLlm {
            provider_id: "openai".into(),
            model: "gpt-4o".into(),
        };
        let err = resolve_adapter(&active, None).unwrap_err();
        assert_eq!(err.code(), "provider_not_configured");
    }

    #[test]
    fn missing_api_key_is_not_configured() {
        let active = ActiveLlm {
            provider_id: "openai".into(),
            model: "gpt-4o".into(),
        };
        let err = resolve_adapter(&active, Some(&setting("", ""))).unwrap_err();
        assert_eq!(err.code(), "provider_not_configured");
    }

    #[test]
    fn missing_model_is_not_configured() {
        let active = ActiveLlm {
            provider_id: "openai".into(),
            model: String::new(),
        };
        let err = resolve_adapter(&active, Some(&setting("sk-x", ""))).unwrap_err();
        assert_eq!(err.code(), "provider_not_configured");
    }

    #[test]
    fn family_defaults_to_openai_compat() {
        let active = ActiveLlm {
            provider_id: "deepseek".into(),
            model: "deepseek-chat".into(),
        };
        let (adapter, model) = resolve_adapter(&active, Some(&setting("sk-x", ""))).unwrap();
        assert_eq!(adapter.adapter_id(), "openai_compat");
        assert_eq!(model, "deepseek-chat");
    }

    #[test]
    fn unknown_adapter_is_not_supported() {
        let active = ActiveLlm {
            provider_id: "weird".into(),
            model: "m".into(),
        };
        let err = resolve_adapter(&active, Some(&setting("k", "grpc_thing"))).unwrap_err();
        assert_eq!(err.code(), "provider_not_supported");
    }
}
