//! The persisted state document and every entity it contains.
//!
//! One JSON document backs the whole gateway: chats, messages, cron jobs
//! and their runtime state, provider settings, envs, channel configs, and
//! skills. All fields default so old documents keep loading as the schema
//! grows (migrations are forward-only).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::{ContentPart, Role, TimelineEntry};

/// The protected default job. Created on first boot, never deletable.
pub const DEFAULT_CRON_JOB_ID: &str = "cron-default";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDoc {
    #[serde(default)]
    pub chats: HashMap<String, ChatSpec>,
    /// Messages per chat id, in insertion order.
    #[serde(default)]
    pub messages: HashMap<String, Vec<ChatMessage>>,
    #[serde(default)]
    pub cron_jobs: HashMap<String, CronJobSpec>,
    #[serde(default)]
    pub cron_states: HashMap<String, CronJobState>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderSetting>,
    #[serde(default)]
    pub active_llm: ActiveLlm,
    #[serde(default)]
    pub envs: HashMap<String, String>,
    #[serde(default)]
    pub channels: HashMap<String, Value>,
    #[serde(default)]
    pub skills: HashMap<String, SkillSpec>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chats & messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chat thread. Identity is the server-assigned `id`;
/// `(user_id, channel, session_id)` is the natural key clients resume by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub session_id: String,
    pub user_id: String,
    pub channel: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// A persisted message. Immutable once appended, except metadata
/// amendments carrying tool-call traces and ordering hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ChatMessage {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            metadata: Map::new(),
        }
    }

    /// Parse the `timeline` metadata key back into timeline entries.
    /// Returns an empty vec when the key is absent or malformed.
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.metadata
            .get("timeline")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The active provider/model slot. Either fully empty, or it references
/// a configured provider with a non-empty model (enforced on write).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveLlm {
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub model: String,
}

impl ActiveLlm {
    pub fn is_empty(&self) -> bool {
        self.provider_id.is_empty() && self.model.is_empty()
    }
}

/// Per-provider connection settings. `model` lives on [`ActiveLlm`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSetting {
    /// Adapter implementation id ("openai_compat", "demo").
    /// Empty = derive from the provider family.
    #[serde(default)]
    pub adapter_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cron jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronTaskType {
    Text,
    Workflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Interval,
    Cron,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSchedule {
    #[serde(rename = "type")]
    pub kind: ScheduleKind,
    /// Duration literal ("30s", "5m", integer seconds) for interval
    /// schedules, or a 5/6-field cron expression for cron schedules.
    pub cron: String,
    /// Optional IANA timezone for cron expressions. Empty = UTC.
    #[serde(default)]
    pub timezone: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchTarget {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronDispatch {
    pub channel: String,
    #[serde(default)]
    pub target: DispatchTarget,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

fn default_max_concurrency() -> u32 {
    1
}

fn default_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronRuntime {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// 0 = never skip a misfired window.
    #[serde(default)]
    pub misfire_grace_seconds: u64,
}

impl Default for CronRuntime {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_seconds: default_timeout_seconds(),
            misfire_grace_seconds: 0,
        }
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobSpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub schedule: CronSchedule,
    pub task_type: CronTaskType,
    /// Task text when `task_type == Text`.
    #[serde(default)]
    pub text: String,
    /// Workflow DAG when `task_type == Workflow`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<CronWorkflowSpec>,
    pub dispatch: CronDispatch,
    #[serde(default)]
    pub runtime: CronRuntime,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronRunStatus {
    Paused,
    Resumed,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronJobState {
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: Option<CronRunStatus>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub last_execution: Option<CronExecution>,
}

/// Record of one job execution. `nodes` is empty for text tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronExecution {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nodes: Vec<NodeExecution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WorkflowNodeType,
    pub status: NodeRunStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workflow DAG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const WORKFLOW_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNodeType {
    Start,
    TextEvent,
    Delay,
    IfEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WorkflowNodeType,
    /// Non-empty for `text_event` nodes.
    #[serde(default)]
    pub text: String,
    /// For `delay` nodes.
    #[serde(default)]
    pub delay_seconds: u64,
    /// For `if_event` nodes: `<field> (==|!=) <value>`.
    #[serde(default)]
    pub if_condition: String,
    /// Keep executing later nodes when this one fails.
    #[serde(default)]
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronWorkflowSpec {
    pub version: String,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skills
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}
