//! Shared error type used across all nextai crates.
//!
//! Every variant carries a stable wire `code()` that clients may match on,
//! and maps to one HTTP status. Messages are human-readable; codes are not.

/// Shared error type used across all nextai crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // ── Validation (400) ──────────────────────────────────────────────
    #[error("invalid cron task type: {0}")]
    InvalidCronTaskType(String),

    #[error("invalid cron schedule: {0}")]
    InvalidCronSchedule(String),

    #[error("invalid cron workflow: {0}")]
    InvalidCronWorkflow(String),

    #[error("invalid env key: {0}")]
    InvalidEnvKey(String),

    #[error("channel not supported: {0}")]
    ChannelNotSupported(String),

    #[error("invalid provider config: {0}")]
    InvalidProviderConfig(String),

    #[error("invalid model slot: {0}")]
    InvalidModelSlot(String),

    #[error("invalid import mode: {0}")]
    InvalidImportMode(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    // ── Not found (404) ───────────────────────────────────────────────
    #[error("cron job not found: {0}")]
    CronJobNotFound(String),

    #[error("workspace file not found: {0}")]
    WorkspaceFileNotFound(String),

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("chat not found: {0}")]
    ChatNotFound(String),

    // ── State violation (409) ─────────────────────────────────────────
    #[error("the default cron job cannot be deleted")]
    CronDefaultProtected,

    #[error("max_concurrency limit reached ({0})")]
    CronMaxConcurrencyReached(u32),

    #[error("workspace method not allowed: {0}")]
    WorkspaceMethodNotAllowed(String),

    // ── Provider ──────────────────────────────────────────────────────
    #[error("provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("provider not supported: {0}")]
    ProviderNotSupported(String),

    #[error("provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("provider returned an invalid reply: {0}")]
    ProviderInvalidReply(String),

    // ── Channel dispatch ──────────────────────────────────────────────
    #[error("channel {channel}: {message}")]
    Channel { channel: String, message: String },

    // ── Tool sentinels ────────────────────────────────────────────────
    /// Tool-defined sentinel errors (`shell_command_missing`, etc.).
    /// Reported as `tool_result.ok=false`, never as an HTTP error.
    #[error("{message}")]
    Tool { code: String, message: String },

    // ── Fatal (500) ───────────────────────────────────────────────────
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Stable wire code, safe for programmatic handling.
    pub fn code(&self) -> String {
        match self {
            Error::InvalidCronTaskType(_) => "invalid_cron_task_type".into(),
            Error::InvalidCronSchedule(_) => "invalid_cron_schedule".into(),
            Error::InvalidCronWorkflow(_) => "invalid_cron_workflow".into(),
            Error::InvalidEnvKey(_) => "invalid_env_key".into(),
            Error::ChannelNotSupported(_) => "channel_not_supported".into(),
            Error::InvalidProviderConfig(_) => "invalid_provider_config".into(),
            Error::InvalidModelSlot(_) => "invalid_model_slot".into(),
            Error::InvalidImportMode(_) => "invalid_import_mode".into(),
            Error::InvalidPath(_) => "invalid_path".into(),
            Error::InvalidJson(_) => "invalid_json".into(),
            Error::CronJobNotFound(_) => "cron_job_not_found".into(),
            Error::WorkspaceFileNotFound(_) => "workspace_file_not_found".into(),
            Error::ProviderNotFound(_) => "provider_not_found".into(),
            Error::ChatNotFound(_) => "chat_not_found".into(),
            Error::CronDefaultProtected => "cron_default_protected".into(),
            Error::CronMaxConcurrencyReached(_) => "cron_max_concurrency_reached".into(),
            Error::WorkspaceMethodNotAllowed(_) => "workspace_method_not_allowed".into(),
            Error::ProviderNotConfigured(_) => "provider_not_configured".into(),
            Error::ProviderNotSupported(_) => "provider_not_supported".into(),
            Error::ProviderRequestFailed(_) => "provider_request_failed".into(),
            Error::ProviderInvalidReply(_) => "provider_invalid_reply".into(),
            Error::Channel { .. } => "channel_error".into(),
            Error::Tool { code, .. } => code.clone(),
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "internal_error".into(),
        }
    }

    /// HTTP status this error maps to at the API surface.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidCronTaskType(_)
            | Error::InvalidCronSchedule(_)
            | Error::InvalidCronWorkflow(_)
            | Error::InvalidEnvKey(_)
            | Error::ChannelNotSupported(_)
            | Error::InvalidProviderConfig(_)
            | Error::InvalidModelSlot(_)
            | Error::InvalidImportMode(_)
            | Error::InvalidPath(_)
            | Error::InvalidJson(_) => 400,

            Error::CronJobNotFound(_)
            | Error::WorkspaceFileNotFound(_)
            | Error::ProviderNotFound(_)
            | Error::ChatNotFound(_) => 404,

            Error::CronDefaultProtected
            | Error::CronMaxConcurrencyReached(_)
            | Error::WorkspaceMethodNotAllowed(_) => 409,

            // Upstream fault vs. local misconfiguration.
            Error::ProviderRequestFailed(_) | Error::ProviderInvalidReply(_) => 502,
            Error::ProviderNotConfigured(_) | Error::ProviderNotSupported(_) => 400,

            Error::Channel { .. } => 502,

            // Tool sentinels never surface as HTTP errors; if one leaks
            // this far it is a programmer bug.
            Error::Tool { .. } => 500,

            Error::Io(_) | Error::Json(_) | Error::Internal(_) => 500,
        }
    }

    /// Build a tool sentinel error.
    pub fn tool(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::CronDefaultProtected.code(), "cron_default_protected");
        assert_eq!(
            Error::CronMaxConcurrencyReached(3).code(),
            "cron_max_concurrency_reached"
        );
        assert_eq!(
            Error::ProviderInvalidReply("x".into()).code(),
            "provider_invalid_reply"
        );
        assert_eq!(
            Error::tool("shell_command_missing", "no command").code(),
            "shell_command_missing"
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(Error::InvalidJson("x".into()).http_status(), 400);
        assert_eq!(Error::ChatNotFound("c1".into()).http_status(), 404);
        assert_eq!(Error::CronDefaultProtected.http_status(), 409);
        assert_eq!(Error::CronMaxConcurrencyReached(1).http_status(), 409);
        assert_eq!(Error::ProviderRequestFailed("x".into()).http_status(), 502);
        assert_eq!(Error::ProviderNotConfigured("x".into()).http_status(), 400);
        assert_eq!(Error::Internal("boom".into()).http_status(), 500);
    }

    #[test]
    fn max_concurrency_message_carries_limit() {
        let e = Error::CronMaxConcurrencyReached(2);
        assert_eq!(e.to_string(), "max_concurrency limit reached (2)");
    }
}
